//! Narration playback engine.
//!
//! The engine is synchronous and free of I/O apart from the audio handle the
//! controller owns. Synthesis calls and timers are handled by the caller
//! through the job outbox and [`NarrationSession::next_deadline`].

mod controller;
mod jobs;
mod prefetch;
mod progress;
mod session;
mod sleep_timer;
mod speech_cache;

pub use controller::{ControllerAction, LifecycleState, PlaybackController, PositionCause};
pub use jobs::{JobPurpose, SynthesisJob, SynthesisOutcome};
pub use prefetch::PrefetchScheduler;
#[cfg(test)]
pub(crate) use progress::RecordingProgressSink;
pub use progress::{
    DEFAULT_PROGRESS_DEBOUNCE, MetadataUpdate, ProgressSink, ProgressTracker, ProgressUpdate,
    percent_for,
};
pub use session::{
    Command, NarrationSession, NarrationSnapshot, Notice, SessionEvent, SessionSettings,
};
pub use sleep_timer::{MAX_SLEEP_TIMER, SLEEP_TIMER_PRESETS, SleepTimer};
pub use speech_cache::{CacheKey, DEFAULT_CACHE_CAPACITY, SpeechAudio, SpeechCache};
