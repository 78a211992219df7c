use super::speech_cache::{CacheKey, SpeechAudio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPurpose {
    /// Needed to continue playback; at most one is current at a time.
    Foreground { request_id: u64 },
    /// Cache warm-up; never gates playback.
    Prefetch,
}

/// A synthesis call the event loop must run outside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisJob {
    pub purpose: JobPurpose,
    pub key: CacheKey,
    pub text: String,
}

impl SynthesisJob {
    pub fn is_foreground(&self) -> bool {
        matches!(self.purpose, JobPurpose::Foreground { .. })
    }
}

#[derive(Debug)]
pub struct SynthesisOutcome {
    pub job: SynthesisJob,
    pub result: Result<SpeechAudio, String>,
}
