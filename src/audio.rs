//! Audio playback handle.
//!
//! The narration controller is the only owner of an [`AudioOutput`]; nothing
//! else starts, pauses or swaps its source.

use crate::narration::SpeechAudio;
use anyhow::{Context, Result, anyhow};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub trait AudioOutput {
    /// Replace the current source with `audio` and start it from zero.
    fn play(&mut self, audio: &SpeechAudio, rate: f32) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self) -> Result<()>;
    /// Drop the current source and reset the position to zero.
    fn stop(&mut self);
    fn set_rate(&mut self, rate: f32);
    fn set_volume(&mut self, volume: f32);
    /// True once a started source has played to its end.
    fn is_finished(&self) -> bool;
    fn position(&self) -> Duration;
}

/// Default output device via `rodio`.
pub struct RodioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    rate: f32,
    volume: f32,
    started_at: Option<Instant>,
    elapsed: Duration,
}

impl RodioOutput {
    pub fn open_default() -> Result<Self> {
        let (_stream, handle) = OutputStream::try_default().context("Opening audio output")?;
        info!("Opened default audio output");
        Ok(Self {
            _stream,
            handle,
            sink: None,
            rate: 1.0,
            volume: 1.0,
            started_at: None,
            elapsed: Duration::ZERO,
        })
    }

    fn bank_elapsed(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.elapsed += Instant::now()
                .saturating_duration_since(started)
                .mul_f32(self.rate);
        }
    }
}

impl AudioOutput for RodioOutput {
    fn play(&mut self, audio: &SpeechAudio, rate: f32) -> Result<()> {
        self.stop();
        let sink = Sink::try_new(&self.handle).context("Creating sink")?;
        let source = Decoder::new(Cursor::new(audio.clone())).context("Decoding sentence audio")?;
        self.rate = rate;
        sink.set_speed(rate);
        sink.set_volume(self.volume);
        sink.append(source);
        sink.play();
        debug!(bytes = audio.len(), rate, "Started sentence audio");
        self.sink = Some(sink);
        self.elapsed = Duration::ZERO;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            debug!("Pausing playback");
            sink.pause();
        }
        self.bank_elapsed();
    }

    fn resume(&mut self) -> Result<()> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| anyhow!("No audio loaded to resume"))?;
        debug!("Resuming playback");
        sink.play();
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.started_at = None;
        self.elapsed = Duration::ZERO;
    }

    fn set_rate(&mut self, rate: f32) {
        let running = self.started_at.is_some();
        self.bank_elapsed();
        self.rate = rate;
        if let Some(sink) = &self.sink {
            sink.set_speed(rate);
        }
        if running {
            self.started_at = Some(Instant::now());
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().is_some_and(Sink::empty)
    }

    fn position(&self) -> Duration {
        let running = self
            .started_at
            .map(|started| {
                Instant::now()
                    .saturating_duration_since(started)
                    .mul_f32(self.rate)
            })
            .unwrap_or(Duration::ZERO);
        self.elapsed + running
    }
}

/// In-memory handle for tests: records calls and lets the test decide when a
/// source has finished or whether the device refuses to play.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingAudio {
    pub(crate) played: Vec<usize>,
    pub(crate) loaded: bool,
    pub(crate) paused: bool,
    pub(crate) finished: bool,
    pub(crate) fail_next_play: bool,
    pub(crate) stops: usize,
    pub(crate) resumes: usize,
    pub(crate) rate: f32,
    pub(crate) volume: f32,
}

#[cfg(test)]
impl AudioOutput for RecordingAudio {
    fn play(&mut self, audio: &SpeechAudio, rate: f32) -> Result<()> {
        if std::mem::take(&mut self.fail_next_play) {
            return Err(anyhow!("device busy"));
        }
        self.played.push(audio.len());
        self.loaded = true;
        self.paused = false;
        self.finished = false;
        self.rate = rate;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(anyhow!("nothing loaded"));
        }
        self.paused = false;
        self.resumes += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.loaded = false;
        self.paused = false;
        self.finished = false;
        self.stops += 1;
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn is_finished(&self) -> bool {
        self.loaded && self.finished
    }

    fn position(&self) -> Duration {
        if self.loaded {
            Duration::from_millis(250)
        } else {
            Duration::ZERO
        }
    }
}
