//! Progress reporting toward the persistence collaborator.
//!
//! Position changes are coalesced behind a restartable debounce deadline;
//! metadata edits bypass it and are written straight away together with
//! whatever position change is pending.

use crate::book::{Book, Coordinate};
use crate::config::MAX_PROGRESS_DEBOUNCE_MS;
use crate::error::PlaybackError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const DEFAULT_PROGRESS_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Partial progress record. Absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        Some(Coordinate::new(self.chapter?, self.sentence.unwrap_or(0)))
    }

    /// Overlay every field `newer` sets.
    pub fn merge(&mut self, newer: ProgressUpdate) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if newer.$field.is_some() { self.$field = newer.$field; })*
            };
        }
        overlay!(
            chapter,
            sentence,
            percent,
            listen_seconds,
            finished_at,
            title,
            author,
            tags
        );
    }
}

/// User edits to book metadata; written without debounce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl From<MetadataUpdate> for ProgressUpdate {
    fn from(update: MetadataUpdate) -> Self {
        Self {
            title: update.title,
            author: update.author,
            tags: update.tags,
            ..Self::default()
        }
    }
}

/// Persistence collaborator. Called synchronously from the engine.
pub trait ProgressSink {
    fn update_progress(&mut self, book_id: &str, update: &ProgressUpdate) -> anyhow::Result<()>;
}

pub struct ProgressTracker<P: ProgressSink> {
    book_id: String,
    sink: P,
    debounce: Duration,
    pending: ProgressUpdate,
    deadline: Option<Instant>,
    percent: u8,
    finished_at: Option<u64>,
    listened: Duration,
    listening_since: Option<Instant>,
}

impl<P: ProgressSink> ProgressTracker<P> {
    /// `debounce` is capped at [`MAX_PROGRESS_DEBOUNCE_MS`].
    pub fn new(book_id: impl Into<String>, sink: P, debounce: Duration) -> Self {
        let max = Duration::from_millis(MAX_PROGRESS_DEBOUNCE_MS);
        if debounce > max {
            warn!(?debounce, ?max, "Capping progress debounce");
        }
        Self {
            book_id: book_id.into(),
            sink,
            debounce: debounce.min(max),
            pending: ProgressUpdate::default(),
            deadline: None,
            percent: 0,
            finished_at: None,
            listened: Duration::ZERO,
            listening_since: None,
        }
    }

    /// Seed from the last stored record so finish stamps and listen time
    /// survive across sessions.
    pub fn resume_from(mut self, record: Option<&ProgressUpdate>) -> Self {
        if let Some(record) = record {
            self.percent = record.percent.unwrap_or(0).min(100);
            self.finished_at = record.finished_at;
            self.listened = Duration::from_secs(record.listen_seconds.unwrap_or(0));
        }
        self
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn finished_at(&self) -> Option<u64> {
        self.finished_at
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending_timer(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn listened(&self, now: Instant) -> Duration {
        self.listened
            + self
                .listening_since
                .map(|since| now.saturating_duration_since(since))
                .unwrap_or(Duration::ZERO)
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    #[cfg(test)]
    pub(crate) fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }

    /// Record a committed position. Reaching the end of the book reports 100.
    pub fn observe_position(&mut self, book: &Book, coordinate: Coordinate, now: Instant) {
        let percent = percent_for(book, coordinate);
        self.record_percent(Some(coordinate), percent, now);
    }

    pub fn observe_finished(&mut self, now: Instant) {
        self.record_percent(None, 100, now);
    }

    fn record_percent(&mut self, coordinate: Option<Coordinate>, percent: u8, now: Instant) {
        let mut update = ProgressUpdate {
            chapter: coordinate.map(|c| c.chapter),
            sentence: coordinate.map(|c| c.sentence),
            percent: Some(percent),
            ..ProgressUpdate::default()
        };
        if percent == 100 && self.percent < 100 && self.finished_at.is_none() {
            let stamp = unix_now();
            info!(book = %self.book_id, finished_at = stamp, "Book finished");
            self.finished_at = Some(stamp);
            update.finished_at = Some(stamp);
        }
        self.percent = percent;
        self.queue(update, now);
    }

    /// Start or stop accruing listen time.
    pub fn set_listening(&mut self, playing: bool, now: Instant) {
        match (playing, self.listening_since) {
            (true, None) => self.listening_since = Some(now),
            (false, Some(since)) => {
                self.listened += now.saturating_duration_since(since);
                self.listening_since = None;
            }
            _ => {}
        }
    }

    /// Merge into the pending write and restart the debounce window.
    pub fn queue(&mut self, update: ProgressUpdate, now: Instant) {
        self.pending.merge(update);
        self.deadline = Some(now.checked_add(self.debounce).unwrap_or(now));
    }

    /// Metadata edits are written at once, carrying any pending position.
    pub fn update_metadata(
        &mut self,
        update: MetadataUpdate,
        now: Instant,
    ) -> Result<(), PlaybackError> {
        self.pending.merge(update.into());
        self.flush(now)
    }

    /// Flush if the debounce deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Result<(), PlaybackError> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(now),
            _ => Ok(()),
        }
    }

    /// Write everything pending now. On failure the update is kept so the
    /// next write retries it.
    pub fn flush(&mut self, now: Instant) -> Result<(), PlaybackError> {
        self.deadline = None;
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut update = std::mem::take(&mut self.pending);
        if update.chapter.is_some() || update.percent.is_some() {
            update.listen_seconds = Some(self.listened(now).as_secs());
        }
        match self.sink.update_progress(&self.book_id, &update) {
            Ok(()) => {
                debug!(book = %self.book_id, ?update, "Progress saved");
                Ok(())
            }
            Err(err) => {
                warn!(book = %self.book_id, "Saving progress failed: {err:#}");
                update.merge(std::mem::take(&mut self.pending));
                self.pending = update;
                Err(PlaybackError::PersistenceFailure(format!("{err:#}")))
            }
        }
    }
}

/// Whole-book completion: sentences before the coordinate over all sentences.
pub fn percent_for(book: &Book, coordinate: Coordinate) -> u8 {
    let total = book.total_sentences();
    if total == 0 {
        return 0;
    }
    let before = book.sentences_before(coordinate) as f64;
    ((100.0 * before / total as f64).round() as u8).min(100)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// In-memory sink for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingProgressSink {
    pub(crate) writes: Vec<ProgressUpdate>,
    pub(crate) fail: bool,
}

#[cfg(test)]
impl ProgressSink for RecordingProgressSink {
    fn update_progress(&mut self, _book_id: &str, update: &ProgressUpdate) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("disk full");
        }
        self.writes.push(update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::book_from;

    fn tracker() -> ProgressTracker<RecordingProgressSink> {
        ProgressTracker::new(
            "test-book",
            RecordingProgressSink::default(),
            DEFAULT_PROGRESS_DEBOUNCE,
        )
    }

    #[test]
    fn percent_covers_the_whole_book() {
        let book = book_from(&[&["A.", " B.", " C."], &["D.", " E.", " F."]]);
        assert_eq!(percent_for(&book, Coordinate::new(0, 0)), 0);
        assert_eq!(percent_for(&book, Coordinate::new(1, 0)), 50);
        assert_eq!(percent_for(&book, Coordinate::new(1, 2)), 83);
        assert_eq!(percent_for(&book_from(&[]), Coordinate::new(0, 0)), 0);
    }

    #[test]
    fn rapid_positions_collapse_into_one_write() {
        let book = book_from(&[&["A.", " B.", " C.", " D."]]);
        let mut progress = tracker();
        let start = Instant::now();

        for sentence in 0..4 {
            let now = start + Duration::from_millis(500 * sentence as u64);
            progress.observe_position(&book, Coordinate::new(0, sentence), now);
        }
        let last = start + Duration::from_millis(1500);

        progress.poll(last + Duration::from_millis(1999)).unwrap();
        assert!(progress.sink().writes.is_empty());

        progress.poll(last + Duration::from_millis(2000)).unwrap();
        let writes = &progress.sink().writes;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].sentence, Some(3));
        assert_eq!(writes[0].percent, Some(75));
        assert!(!progress.has_pending_timer());
    }

    #[test]
    fn oversized_debounce_is_capped() {
        let book = book_from(&[&["A.", " B."]]);
        let mut progress =
            ProgressTracker::new("test-book", RecordingProgressSink::default(), Duration::MAX);
        let now = Instant::now();

        progress.observe_position(&book, Coordinate::new(0, 1), now);

        let cap = Duration::from_millis(MAX_PROGRESS_DEBOUNCE_MS);
        assert_eq!(progress.next_deadline(), Some(now + cap));
        progress.poll(now + cap).unwrap();
        assert_eq!(progress.sink().writes.len(), 1);
    }

    #[test]
    fn metadata_writes_immediately_and_cancels_the_timer() {
        let book = book_from(&[&["A.", " B."]]);
        let mut progress = tracker();
        let now = Instant::now();
        progress.observe_position(&book, Coordinate::new(0, 1), now);
        assert!(progress.has_pending_timer());

        progress
            .update_metadata(
                MetadataUpdate {
                    title: Some("Renamed".into()),
                    ..MetadataUpdate::default()
                },
                now,
            )
            .unwrap();

        assert!(!progress.has_pending_timer());
        let writes = &progress.sink().writes;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].title.as_deref(), Some("Renamed"));
        assert_eq!(writes[0].sentence, Some(1));
    }

    #[test]
    fn finish_is_stamped_once() {
        let book = book_from(&[&["A.", " B."]]);
        let mut progress = tracker();
        let now = Instant::now();

        progress.observe_position(&book, Coordinate::new(0, 1), now);
        progress.observe_finished(now);
        let stamp = progress.finished_at();
        assert!(stamp.is_some());

        progress.observe_position(&book, Coordinate::new(0, 0), now);
        progress.observe_finished(now);
        progress.flush(now).unwrap();

        assert_eq!(progress.finished_at(), stamp);
        assert_eq!(progress.sink().writes.len(), 1);
        assert_eq!(progress.sink().writes[0].finished_at, stamp);
    }

    #[test]
    fn stored_finish_stamp_is_not_overwritten() {
        let mut progress = tracker().resume_from(Some(&ProgressUpdate {
            percent: Some(40),
            finished_at: Some(17),
            ..ProgressUpdate::default()
        }));
        progress.observe_finished(Instant::now());
        assert_eq!(progress.finished_at(), Some(17));
    }

    #[test]
    fn failed_write_is_retried_with_later_changes() {
        let book = book_from(&[&["A.", " B.", " C."]]);
        let mut progress = tracker();
        let now = Instant::now();
        progress.observe_position(&book, Coordinate::new(0, 1), now);
        progress.sink.fail = true;

        let err = progress.flush(now).unwrap_err();
        assert!(matches!(err, PlaybackError::PersistenceFailure(_)));

        progress.sink.fail = false;
        progress
            .update_metadata(
                MetadataUpdate {
                    author: Some("Anon".into()),
                    ..MetadataUpdate::default()
                },
                now,
            )
            .unwrap();
        let write = &progress.sink().writes[0];
        assert_eq!(write.sentence, Some(1));
        assert_eq!(write.author.as_deref(), Some("Anon"));
    }

    #[test]
    fn listen_time_accumulates_across_play_spans() {
        let book = book_from(&[&["A.", " B."]]);
        let mut progress = tracker().resume_from(Some(&ProgressUpdate {
            listen_seconds: Some(100),
            ..ProgressUpdate::default()
        }));
        let start = Instant::now();
        progress.set_listening(true, start);
        progress.set_listening(false, start + Duration::from_secs(30));
        progress.set_listening(true, start + Duration::from_secs(60));

        progress.observe_position(&book, Coordinate::new(0, 1), start + Duration::from_secs(70));
        progress.flush(start + Duration::from_secs(70)).unwrap();

        assert_eq!(progress.sink().writes[0].listen_seconds, Some(140));
    }

    #[test]
    fn merge_keeps_fields_the_newer_update_omits() {
        let mut base = ProgressUpdate {
            chapter: Some(1),
            title: Some("Old".into()),
            ..ProgressUpdate::default()
        };
        base.merge(ProgressUpdate {
            chapter: Some(2),
            ..ProgressUpdate::default()
        });
        assert_eq!(base.chapter, Some(2));
        assert_eq!(base.title.as_deref(), Some("Old"));
    }
}
