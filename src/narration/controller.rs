//! Playback state machine.
//!
//! Every mutation goes through a named transition on [`PlaybackController`].
//! Transitions never perform I/O beyond the owned audio handle; instead they
//! return [`ControllerAction`]s the session turns into synthesis jobs,
//! progress writes and prefetches.

use super::jobs::{JobPurpose, SynthesisJob};
use super::speech_cache::{CacheKey, SpeechAudio, SpeechCache};
use crate::audio::AudioOutput;
use crate::book::{Book, Coordinate};
use crate::config::{MAX_PLAYBACK_RATE, MAX_VOLUME, MIN_PLAYBACK_RATE, MIN_VOLUME};
use crate::error::PlaybackError;
use crate::text_utils::is_speakable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Loading => "loading",
            LifecycleState::Playing => "playing",
            LifecycleState::Paused => "paused",
        };
        write!(f, "{label}")
    }
}

/// Why the coordinate moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionCause {
    /// Audio ended or an empty sentence was skipped.
    Advance,
    Seek,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerAction {
    Synthesize(SynthesisJob),
    PositionCommitted {
        coordinate: Coordinate,
        cause: PositionCause,
    },
    Started {
        coordinate: Coordinate,
    },
    /// Advanced past the last sentence of the book.
    Finished,
    Failed(PlaybackError),
}

#[derive(Debug, Clone)]
struct PendingSynthesis {
    request_id: u64,
    key: CacheKey,
}

pub struct PlaybackController<A: AudioOutput> {
    book: Arc<Book>,
    audio: A,
    coordinate: Coordinate,
    state: LifecycleState,
    chapter_sentences: Vec<String>,
    voice: String,
    rate: f32,
    volume: f32,
    request_id: u64,
    pending: Option<PendingSynthesis>,
    loaded: Option<CacheKey>,
}

impl<A: AudioOutput> PlaybackController<A> {
    pub fn new(
        book: Arc<Book>,
        start: Coordinate,
        voice: impl Into<String>,
        rate: f32,
        volume: f32,
        mut audio: A,
    ) -> Self {
        let coordinate = book.clamp(start).unwrap_or_default();
        if coordinate != start {
            warn!(
                requested = %start,
                resolved = %coordinate,
                "Start position outside the book; clamped"
            );
        }
        let rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        let volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        audio.set_rate(rate);
        audio.set_volume(volume);
        let chapter_sentences = book
            .chapter(coordinate.chapter)
            .map(|chapter| chapter.sentences())
            .unwrap_or_default();
        Self {
            book,
            audio,
            coordinate,
            state: LifecycleState::Idle,
            chapter_sentences,
            voice: voice.into(),
            rate,
            volume,
            request_id: 0,
            pending: None,
            loaded: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn book(&self) -> &Arc<Book> {
        &self.book
    }

    pub fn chapter_sentences(&self) -> &[String] {
        &self.chapter_sentences
    }

    pub fn current_sentence(&self) -> Option<&str> {
        self.chapter_sentences
            .get(self.coordinate.sentence)
            .map(String::as_str)
    }

    /// Elapsed position within the current sentence's audio.
    pub fn elapsed(&self) -> Duration {
        if self.loaded.is_some() {
            self.audio.position()
        } else {
            Duration::ZERO
        }
    }

    pub fn is_audio_finished(&self) -> bool {
        self.state == LifecycleState::Playing && self.loaded.is_some() && self.audio.is_finished()
    }

    pub fn play(&mut self, cache: &SpeechCache) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        match self.state {
            LifecycleState::Loading | LifecycleState::Playing => {
                debug!(state = %self.state, "Play ignored; already active");
            }
            LifecycleState::Paused if self.has_current_audio() => match self.audio.resume() {
                Ok(()) => {
                    info!(at = %self.coordinate, "Resuming narration");
                    self.set_state(LifecycleState::Playing);
                }
                Err(err) => self.fail_device(err, &mut actions),
            },
            LifecycleState::Paused | LifecycleState::Idle => {
                info!(at = %self.coordinate, "Starting narration");
                self.begin(cache, &mut actions);
            }
        }
        actions
    }

    pub fn pause(&mut self) -> Vec<ControllerAction> {
        match self.state {
            LifecycleState::Playing => {
                self.audio.pause();
                self.set_state(LifecycleState::Paused);
            }
            LifecycleState::Loading => {
                // The in-flight response becomes stale; play() starts over.
                self.pending = None;
                self.set_state(LifecycleState::Paused);
            }
            LifecycleState::Idle | LifecycleState::Paused => {
                debug!(state = %self.state, "Pause ignored");
            }
        }
        Vec::new()
    }

    /// Explicit navigation. Playing (or loading) restarts at the target;
    /// paused and idle only move the coordinate.
    pub fn seek(
        &mut self,
        target: Coordinate,
        cache: &SpeechCache,
    ) -> Result<Vec<ControllerAction>, PlaybackError> {
        if !self.book.contains(target) {
            return Err(PlaybackError::InvalidCoordinate { coordinate: target });
        }
        let mut actions = Vec::new();
        info!(from = %self.coordinate, to = %target, state = %self.state, "Seeking");
        self.commit(target, PositionCause::Seek, &mut actions);
        match self.state {
            LifecycleState::Playing | LifecycleState::Loading => {
                self.unload();
                self.pending = None;
                self.begin(cache, &mut actions);
            }
            LifecycleState::Paused => {
                if !self.has_current_audio() {
                    self.unload();
                }
            }
            LifecycleState::Idle => {}
        }
        Ok(actions)
    }

    pub fn skip_forward(&mut self, cache: &SpeechCache) -> Vec<ControllerAction> {
        match self.book.next_coordinate(self.coordinate) {
            Some(next) => self.seek(next, cache).unwrap_or_default(),
            None => {
                debug!(at = %self.coordinate, "No sentence after current position");
                Vec::new()
            }
        }
    }

    pub fn skip_backward(&mut self, cache: &SpeechCache) -> Vec<ControllerAction> {
        match self.book.previous_coordinate(self.coordinate) {
            Some(previous) => self.seek(previous, cache).unwrap_or_default(),
            None => {
                debug!(at = %self.coordinate, "No sentence before current position");
                Vec::new()
            }
        }
    }

    pub fn stop(&mut self) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        self.unload();
        self.pending = None;
        self.set_state(LifecycleState::Idle);
        let reset = Coordinate::new(self.coordinate.chapter, 0);
        if reset != self.coordinate {
            self.commit(reset, PositionCause::Stop, &mut actions);
        }
        actions
    }

    pub fn audio_ended(&mut self, cache: &SpeechCache) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        if self.state != LifecycleState::Playing {
            debug!(state = %self.state, "Ignoring audio end outside playback");
            return actions;
        }
        self.unload();
        match self.book.next_coordinate(self.coordinate) {
            Some(next) => {
                self.commit(next, PositionCause::Advance, &mut actions);
                self.begin(cache, &mut actions);
            }
            None => self.finish(&mut actions),
        }
        actions
    }

    /// Apply a foreground synthesis result. Responses for anything but the
    /// outstanding request at the current coordinate and voice are dropped.
    pub fn on_synthesis_result(
        &mut self,
        request_id: u64,
        key: &CacheKey,
        result: Result<SpeechAudio, String>,
    ) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        let is_current = self.state == LifecycleState::Loading
            && self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.request_id == request_id && &pending.key == key)
            && key.coordinate() == self.coordinate
            && key.voice == self.voice;
        if !is_current {
            debug!(
                request_id,
                current = self.request_id,
                response_at = %key.coordinate(),
                at = %self.coordinate,
                "Discarding stale synthesis response"
            );
            return actions;
        }
        self.pending = None;
        match result {
            Ok(audio) => self.start_audio(key.clone(), &audio, &mut actions),
            Err(reason) => {
                warn!(at = %self.coordinate, request_id, "Speech synthesis failed: {reason}");
                self.set_state(LifecycleState::Idle);
                actions.push(ControllerAction::Failed(PlaybackError::SynthesisFailure {
                    coordinate: self.coordinate,
                    reason,
                }));
            }
        }
        actions
    }

    pub fn set_voice(&mut self, voice: &str, cache: &SpeechCache) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        if voice == self.voice {
            return actions;
        }
        info!(from = %self.voice, to = %voice, "Changing narration voice");
        self.voice = voice.to_string();
        match self.state {
            LifecycleState::Playing | LifecycleState::Loading => {
                self.unload();
                self.pending = None;
                self.begin(cache, &mut actions);
            }
            LifecycleState::Paused => self.unload(),
            LifecycleState::Idle => {}
        }
        actions
    }

    /// Applied to the audio handle only; synthesis always runs at 1.0.
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        self.audio.set_rate(self.rate);
        debug!(rate = self.rate, "Adjusted playback rate");
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        self.audio.set_volume(self.volume);
        debug!(volume = self.volume, "Adjusted volume");
    }

    /// Teardown: silence the device and forget any outstanding request.
    pub fn release(&mut self) {
        self.unload();
        self.pending = None;
        self.set_state(LifecycleState::Idle);
    }

    /// Find the first speakable sentence at or after the coordinate and
    /// either start it from cache or request synthesis.
    fn begin(&mut self, cache: &SpeechCache, actions: &mut Vec<ControllerAction>) {
        loop {
            if !self.book.contains(self.coordinate) {
                self.finish(actions);
                return;
            }
            if self.current_sentence().is_some_and(is_speakable) {
                break;
            }
            debug!(at = %self.coordinate, "Skipping empty sentence");
            match self.book.next_coordinate(self.coordinate) {
                Some(next) => self.commit(next, PositionCause::Advance, actions),
                None => {
                    self.finish(actions);
                    return;
                }
            }
        }

        let key = CacheKey::new(&self.voice, self.coordinate);
        if let Some(audio) = cache.get(&key) {
            debug!(at = %self.coordinate, "Sentence audio served from cache");
            self.pending = None;
            self.set_state(LifecycleState::Loading);
            self.start_audio(key, &audio, actions);
            return;
        }

        let text = self
            .current_sentence()
            .map(|sentence| sentence.trim().to_string())
            .unwrap_or_default();
        self.request_id = self.request_id.wrapping_add(1);
        let request_id = self.request_id;
        self.pending = Some(PendingSynthesis {
            request_id,
            key: key.clone(),
        });
        self.set_state(LifecycleState::Loading);
        debug!(at = %self.coordinate, request_id, voice = %self.voice, "Requesting synthesis");
        actions.push(ControllerAction::Synthesize(SynthesisJob {
            purpose: JobPurpose::Foreground { request_id },
            key,
            text,
        }));
    }

    fn start_audio(
        &mut self,
        key: CacheKey,
        audio: &SpeechAudio,
        actions: &mut Vec<ControllerAction>,
    ) {
        match self.audio.play(audio, self.rate) {
            Ok(()) => {
                self.loaded = Some(key);
                self.set_state(LifecycleState::Playing);
                actions.push(ControllerAction::Started {
                    coordinate: self.coordinate,
                });
            }
            Err(err) => self.fail_device(err, actions),
        }
    }

    fn fail_device(&mut self, err: anyhow::Error, actions: &mut Vec<ControllerAction>) {
        warn!(at = %self.coordinate, "Audio device rejected playback: {err:#}");
        self.unload();
        self.set_state(LifecycleState::Idle);
        actions.push(ControllerAction::Failed(
            PlaybackError::PlaybackDeviceFailure {
                coordinate: self.coordinate,
                reason: format!("{err:#}"),
            },
        ));
    }

    fn finish(&mut self, actions: &mut Vec<ControllerAction>) {
        info!(at = %self.coordinate, "Reached end of book");
        self.unload();
        self.pending = None;
        self.set_state(LifecycleState::Idle);
        actions.push(ControllerAction::Finished);
    }

    /// Move to `next`, swapping the chapter's sentence list in the same step
    /// when the chapter changes.
    fn commit(
        &mut self,
        next: Coordinate,
        cause: PositionCause,
        actions: &mut Vec<ControllerAction>,
    ) {
        if next.chapter != self.coordinate.chapter {
            self.chapter_sentences = self
                .book
                .chapter(next.chapter)
                .map(|chapter| chapter.sentences())
                .unwrap_or_default();
            debug!(
                chapter = next.chapter,
                sentences = self.chapter_sentences.len(),
                "Loaded chapter sentences"
            );
        }
        self.coordinate = next;
        actions.push(ControllerAction::PositionCommitted {
            coordinate: next,
            cause,
        });
    }

    fn has_current_audio(&self) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|key| key.coordinate() == self.coordinate && key.voice == self.voice)
    }

    fn unload(&mut self) {
        if self.loaded.take().is_some() {
            self.audio.stop();
        }
    }

    fn set_state(&mut self, next: LifecycleState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Lifecycle transition");
            self.state = next;
        }
    }

    #[cfg(test)]
    pub(crate) fn audio_mut(&mut self) -> &mut A {
        &mut self.audio
    }
}
