//! Look-ahead cache warming.
//!
//! The scheduler only produces jobs; it never touches the controller or the
//! audio handle, and nothing waits on its results.

use super::jobs::{JobPurpose, SynthesisJob};
use super::speech_cache::{CacheKey, SpeechAudio, SpeechCache};
use crate::book::{Book, Coordinate};
use crate::error::PlaybackError;
use crate::text_utils::is_speakable;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct PrefetchScheduler {
    enabled: bool,
    in_flight: HashSet<CacheKey>,
}

impl PrefetchScheduler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            in_flight: HashSet::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Job for the immediate successor of `current`, if it is worth fetching.
    /// `chapter_sentences` is the segmented text of `current.chapter`.
    pub fn schedule(
        &mut self,
        book: &Book,
        current: Coordinate,
        chapter_sentences: &[String],
        voice: &str,
        cache: &SpeechCache,
    ) -> Option<SynthesisJob> {
        if !self.enabled {
            return None;
        }
        let next = book.next_coordinate(current)?;
        let text = if next.chapter == current.chapter {
            chapter_sentences.get(next.sentence).cloned()
        } else {
            book.chapter(next.chapter)
                .and_then(|chapter| chapter.sentences().into_iter().nth(next.sentence))
        }?;
        self.job_for(CacheKey::new(voice, next), &text, cache)
    }

    /// Jobs for every uncached sentence of the current chapter.
    pub fn warm_chapter(
        &mut self,
        chapter: usize,
        chapter_sentences: &[String],
        voice: &str,
        cache: &SpeechCache,
    ) -> Vec<SynthesisJob> {
        let jobs: Vec<SynthesisJob> = chapter_sentences
            .iter()
            .enumerate()
            .filter_map(|(sentence, text)| {
                let key = CacheKey::new(voice, Coordinate::new(chapter, sentence));
                self.job_for(key, text, cache)
            })
            .collect();
        debug!(chapter, jobs = jobs.len(), "Warming chapter audio");
        jobs
    }

    /// Record a finished background job. Failures are logged and dropped.
    pub fn complete(
        &mut self,
        key: CacheKey,
        result: Result<SpeechAudio, String>,
        cache: &mut SpeechCache,
    ) {
        self.in_flight.remove(&key);
        match result {
            Ok(audio) => {
                debug!(at = %key.coordinate(), bytes = audio.len(), "Prefetched sentence audio");
                cache.put(key, audio);
            }
            Err(reason) => {
                let err = PlaybackError::PrefetchFailure {
                    coordinate: key.coordinate(),
                    reason,
                };
                warn!("{err}");
            }
        }
    }

    fn job_for(&mut self, key: CacheKey, text: &str, cache: &SpeechCache) -> Option<SynthesisJob> {
        if !is_speakable(text) || cache.has(&key) || self.in_flight.contains(&key) {
            return None;
        }
        self.in_flight.insert(key.clone());
        Some(SynthesisJob {
            purpose: JobPurpose::Prefetch,
            key,
            text: text.trim().to_string(),
        })
    }
}
