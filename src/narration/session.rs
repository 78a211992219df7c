//! Session facade composing the narration engine.
//!
//! The session owns every engine component and is driven by three inputs:
//! user commands, finished synthesis jobs and the clock. Each input is applied
//! as a single step, after which the caller drains the job and notice outbox.

use super::controller::{ControllerAction, LifecycleState, PlaybackController, PositionCause};
use super::jobs::{JobPurpose, SynthesisJob, SynthesisOutcome};
use super::prefetch::PrefetchScheduler;
use super::progress::{MetadataUpdate, ProgressSink, ProgressTracker, ProgressUpdate};
use super::sleep_timer::SleepTimer;
use super::speech_cache::SpeechCache;
use crate::audio::AudioOutput;
use crate::book::{Book, Coordinate};
use crate::config::AppConfig;
use crate::error::PlaybackError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub voice: String,
    pub playback_rate: f32,
    pub volume: f32,
    pub prefetch: bool,
    pub cache_capacity: usize,
    pub progress_debounce: Duration,
    pub poll_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            playback_rate: config.playback_rate,
            volume: config.volume,
            prefetch: config.prefetch,
            cache_capacity: config.cache_capacity,
            progress_debounce: config.progress_debounce(),
            poll_interval: config.audio_poll_interval(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    TogglePlayPause,
    Stop,
    Seek(Coordinate),
    SkipForward,
    SkipBackward,
    SetVoice(String),
    SetPlaybackRate(f32),
    SetVolume(f32),
    SetSleepTimer { minutes: u64 },
    ClearSleepTimer,
    CacheChapter,
    UpdateMetadata(MetadataUpdate),
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Play => "narration_play",
            Self::Pause => "narration_pause",
            Self::TogglePlayPause => "narration_toggle_play_pause",
            Self::Stop => "narration_stop",
            Self::Seek(_) => "narration_seek",
            Self::SkipForward => "narration_skip_forward",
            Self::SkipBackward => "narration_skip_backward",
            Self::SetVoice(_) => "narration_set_voice",
            Self::SetPlaybackRate(_) => "narration_set_playback_rate",
            Self::SetVolume(_) => "narration_set_volume",
            Self::SetSleepTimer { .. } => "narration_set_sleep_timer",
            Self::ClearSleepTimer => "narration_clear_sleep_timer",
            Self::CacheChapter => "narration_cache_chapter",
            Self::UpdateMetadata(_) => "narration_update_metadata",
        }
    }
}

/// Things the user should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Narration stopped; `play` retries from the same coordinate.
    Failure(PlaybackError),
    /// A progress write failed; narration continues.
    PersistenceWarning(PlaybackError),
    BookFinished,
    SleepTimerElapsed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrationSnapshot {
    pub title: String,
    pub author: Option<String>,
    pub state: LifecycleState,
    pub coordinate: Coordinate,
    pub chapter_title: Option<String>,
    pub sentence: Option<String>,
    pub chapter_sentence_count: usize,
    pub elapsed: Duration,
    pub percent: u8,
    pub voice: String,
    pub playback_rate: f32,
    pub volume: f32,
    pub sleep_timer_ends_at: Option<u64>,
    pub sleep_timer_remaining: Option<Duration>,
    pub cached_sentences: usize,
    pub cache_capacity: usize,
    pub prefetching: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub action: &'static str,
    pub snapshot: NarrationSnapshot,
}

pub struct NarrationSession<A: AudioOutput, P: ProgressSink> {
    book: Arc<Book>,
    title: String,
    author: Option<String>,
    controller: PlaybackController<A>,
    cache: SpeechCache,
    prefetch: PrefetchScheduler,
    progress: ProgressTracker<P>,
    sleep_timer: SleepTimer,
    poll_interval: Duration,
    jobs: Vec<SynthesisJob>,
    notices: Vec<Notice>,
    closed: bool,
}

impl<A: AudioOutput, P: ProgressSink> NarrationSession<A, P> {
    /// Open a book, resuming from `resume` when a stored record exists.
    pub fn open(
        book: Arc<Book>,
        settings: SessionSettings,
        resume: Option<&ProgressUpdate>,
        audio: A,
        sink: P,
    ) -> Self {
        let start = resume
            .and_then(ProgressUpdate::coordinate)
            .unwrap_or_default();
        let controller = PlaybackController::new(
            Arc::clone(&book),
            start,
            settings.voice,
            settings.playback_rate,
            settings.volume,
            audio,
        );
        let progress = ProgressTracker::new(book.id.clone(), sink, settings.progress_debounce)
            .resume_from(resume);
        let title = resume
            .and_then(|record| record.title.clone())
            .unwrap_or_else(|| book.title.clone());
        let author = resume
            .and_then(|record| record.author.clone())
            .or_else(|| book.author.clone());
        info!(
            book = %book.id,
            at = %controller.coordinate(),
            percent = progress.percent(),
            "Opened narration session"
        );
        Self {
            book,
            title,
            author,
            controller,
            cache: SpeechCache::new(settings.cache_capacity),
            prefetch: PrefetchScheduler::new(settings.prefetch),
            progress,
            sleep_timer: SleepTimer::default(),
            poll_interval: settings.poll_interval,
            jobs: Vec::new(),
            notices: Vec::new(),
            closed: false,
        }
    }

    pub fn apply_command(
        &mut self,
        command: Command,
        now: Instant,
    ) -> Result<SessionEvent, PlaybackError> {
        let action = command.action();
        debug!(action, "Applying command");
        let actions = match command {
            Command::Play => self.controller.play(&self.cache),
            Command::Pause => self.controller.pause(),
            Command::TogglePlayPause => match self.controller.state() {
                LifecycleState::Playing | LifecycleState::Loading => self.controller.pause(),
                LifecycleState::Idle | LifecycleState::Paused => self.controller.play(&self.cache),
            },
            Command::Stop => self.controller.stop(),
            Command::Seek(target) => self.controller.seek(target, &self.cache)?,
            Command::SkipForward => self.controller.skip_forward(&self.cache),
            Command::SkipBackward => self.controller.skip_backward(&self.cache),
            Command::SetVoice(voice) => self.controller.set_voice(&voice, &self.cache),
            Command::SetPlaybackRate(rate) => {
                self.controller.set_rate(rate);
                Vec::new()
            }
            Command::SetVolume(volume) => {
                self.controller.set_volume(volume);
                Vec::new()
            }
            Command::SetSleepTimer { minutes } => {
                self.sleep_timer.set_minutes(minutes, now);
                Vec::new()
            }
            Command::ClearSleepTimer => {
                self.sleep_timer.clear();
                Vec::new()
            }
            Command::CacheChapter => {
                let jobs = self.prefetch.warm_chapter(
                    self.controller.coordinate().chapter,
                    self.controller.chapter_sentences(),
                    self.controller.voice(),
                    &self.cache,
                );
                self.jobs.extend(jobs);
                Vec::new()
            }
            Command::UpdateMetadata(update) => {
                if let Some(title) = &update.title {
                    self.title = title.clone();
                }
                if update.author.is_some() {
                    self.author = update.author.clone();
                }
                if let Err(err) = self.progress.update_metadata(update, now) {
                    self.notices.push(Notice::PersistenceWarning(err));
                }
                Vec::new()
            }
        };
        self.absorb(actions, now);
        Ok(SessionEvent {
            action,
            snapshot: self.snapshot(now),
        })
    }

    /// Feed back a finished synthesis job.
    pub fn on_synthesis_complete(&mut self, outcome: SynthesisOutcome, now: Instant) {
        let SynthesisOutcome { job, result } = outcome;
        match job.purpose {
            JobPurpose::Foreground { request_id } => {
                // Stale or not, good audio is worth keeping.
                if let Ok(audio) = &result {
                    self.cache.put(job.key.clone(), audio.clone());
                }
                let actions = self
                    .controller
                    .on_synthesis_result(request_id, &job.key, result);
                self.absorb(actions, now);
            }
            JobPurpose::Prefetch => self.prefetch.complete(job.key, result, &mut self.cache),
        }
    }

    /// Advance timers and poll the audio handle.
    pub fn tick(&mut self, now: Instant) {
        if self.sleep_timer.poll(now) {
            let actions = self.controller.pause();
            self.absorb(actions, now);
            self.notices.push(Notice::SleepTimerElapsed);
        }
        if self.controller.is_audio_finished() {
            let actions = self.controller.audio_ended(&self.cache);
            self.absorb(actions, now);
        }
        if let Err(err) = self.progress.poll(now) {
            self.notices.push(Notice::PersistenceWarning(err));
        }
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        let polling = if self.controller.state() == LifecycleState::Playing {
            now.checked_add(self.poll_interval)
        } else {
            None
        };
        [
            self.progress.next_deadline(),
            self.sleep_timer.deadline(),
            polling,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn take_jobs(&mut self) -> Vec<SynthesisJob> {
        std::mem::take(&mut self.jobs)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn coordinate(&self) -> Coordinate {
        self.controller.coordinate()
    }

    pub fn book(&self) -> &Arc<Book> {
        &self.book
    }

    pub fn cache(&self) -> &SpeechCache {
        &self.cache
    }

    pub fn snapshot(&self, now: Instant) -> NarrationSnapshot {
        let coordinate = self.controller.coordinate();
        NarrationSnapshot {
            title: self.title.clone(),
            author: self.author.clone(),
            state: self.controller.state(),
            coordinate,
            chapter_title: self
                .book
                .chapter(coordinate.chapter)
                .map(|chapter| chapter.title.clone()),
            sentence: self
                .controller
                .current_sentence()
                .map(|sentence| sentence.trim().to_string()),
            chapter_sentence_count: self.controller.chapter_sentences().len(),
            elapsed: self.controller.elapsed(),
            percent: self.progress.percent(),
            voice: self.controller.voice().to_string(),
            playback_rate: self.controller.rate(),
            volume: self.controller.volume(),
            sleep_timer_ends_at: self.sleep_timer.ends_at_unix(),
            sleep_timer_remaining: self.sleep_timer.remaining(now),
            cached_sentences: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            prefetching: self.prefetch.in_flight(),
        }
    }

    /// Write pending progress now, ignoring the debounce.
    pub fn flush(&mut self, now: Instant) -> Result<(), PlaybackError> {
        self.progress.set_listening(false, now);
        let result = self.progress.flush(now);
        self.progress
            .set_listening(self.controller.state() == LifecycleState::Playing, now);
        result
    }

    /// Tear down: silence audio and flush progress synchronously.
    pub fn close(mut self) -> Result<(), PlaybackError> {
        self.closed = true;
        self.shutdown(Instant::now())
    }

    fn shutdown(&mut self, now: Instant) -> Result<(), PlaybackError> {
        self.controller.release();
        self.sleep_timer.clear();
        self.progress.set_listening(false, now);
        let result = self.progress.flush(now);
        info!(book = %self.book.id, at = %self.controller.coordinate(), "Closed narration session");
        result
    }

    /// Route controller output to progress, prefetch and the outbox.
    fn absorb(&mut self, actions: Vec<ControllerAction>, now: Instant) {
        let mut moved = false;
        for action in actions {
            match action {
                ControllerAction::Synthesize(job) => self.jobs.push(job),
                ControllerAction::PositionCommitted { coordinate, cause } => {
                    if cause != PositionCause::Advance {
                        debug!(at = %coordinate, ?cause, "Position committed");
                    }
                    self.progress.observe_position(&self.book, coordinate, now);
                    moved = true;
                }
                ControllerAction::Started { .. } => moved = true,
                ControllerAction::Finished => {
                    self.progress.observe_finished(now);
                    self.notices.push(Notice::BookFinished);
                }
                ControllerAction::Failed(err) if err.is_foreground() => {
                    self.notices.push(Notice::Failure(err))
                }
                ControllerAction::Failed(err) => warn!("{err}"),
            }
        }
        if moved {
            self.schedule_prefetch();
        }
        self.progress
            .set_listening(self.controller.state() == LifecycleState::Playing, now);
    }

    fn schedule_prefetch(&mut self) {
        if let Some(job) = self.prefetch.schedule(
            &self.book,
            self.controller.coordinate(),
            self.controller.chapter_sentences(),
            self.controller.voice(),
            &self.cache,
        ) {
            debug!(at = %job.key.coordinate(), "Queued prefetch");
            self.jobs.push(job);
        }
    }

    #[cfg(test)]
    pub(crate) fn progress(&self) -> &ProgressTracker<P> {
        &self.progress
    }

    #[cfg(test)]
    pub(crate) fn audio_mut(&mut self) -> &mut A {
        self.controller.audio_mut()
    }
}

impl<A: AudioOutput, P: ProgressSink> Drop for NarrationSession<A, P> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.shutdown(Instant::now()) {
            warn!("Final progress write failed: {err}");
        }
    }
}
