//! Bounded in-memory store of synthesized sentences.
//!
//! Entries are keyed by voice as well as position so a voice change never
//! replays audio made with another voice. Eviction is FIFO by insertion order
//! and silent apart from a debug log.

use crate::book::Coordinate;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Encoded audio for one sentence. Cloning shares the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SpeechAudio(Arc<[u8]>);

impl SpeechAudio {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SpeechAudio {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl AsRef<[u8]> for SpeechAudio {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SpeechAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpeechAudio({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub voice: String,
    pub chapter: usize,
    pub sentence: usize,
}

impl CacheKey {
    pub fn new(voice: &str, coordinate: Coordinate) -> Self {
        Self {
            voice: voice.to_string(),
            chapter: coordinate.chapter,
            sentence: coordinate.sentence,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.chapter, self.sentence)
    }
}

#[derive(Debug)]
pub struct SpeechCache {
    capacity: usize,
    entries: HashMap<CacheKey, SpeechAudio>,
    order: VecDeque<CacheKey>,
}

impl Default for SpeechCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl SpeechCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<SpeechAudio> {
        self.entries.get(key).cloned()
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert, evicting the oldest insertion first when full. Re-putting an
    /// existing key replaces the asset and keeps its original slot.
    pub fn put(&mut self, key: CacheKey, audio: SpeechAudio) {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = audio;
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                debug!(
                    voice = %oldest.voice,
                    chapter = oldest.chapter,
                    sentence = oldest.sentence,
                    "Evicted cached sentence audio"
                );
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, audio);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest insertion.
    #[cfg(test)]
    pub(crate) fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sentence: usize) -> CacheKey {
        CacheKey::new("nova", Coordinate::new(0, sentence))
    }

    fn audio(tag: u8) -> SpeechAudio {
        SpeechAudio::from(vec![tag; 4])
    }

    #[test]
    fn evicts_oldest_insertion_at_capacity() {
        let mut cache = SpeechCache::new(2);
        cache.put(key(0), audio(0));
        cache.put(key(1), audio(1));
        cache.put(key(2), audio(2));

        assert!(!cache.has(&key(0)));
        assert!(cache.has(&key(1)));
        assert!(cache.has(&key(2)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reads_do_not_refresh_insertion_order() {
        let mut cache = SpeechCache::new(2);
        cache.put(key(0), audio(0));
        cache.put(key(1), audio(1));
        assert!(cache.get(&key(0)).is_some());
        cache.put(key(2), audio(2));

        assert!(!cache.has(&key(0)));
        assert!(cache.has(&key(1)));
    }

    #[test]
    fn re_put_replaces_without_growing() {
        let mut cache = SpeechCache::new(2);
        cache.put(key(0), audio(0));
        cache.put(key(1), audio(1));
        cache.put(key(0), audio(9));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(0)), Some(audio(9)));
        let order: Vec<usize> = cache.keys().map(|k| k.sentence).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn voice_is_part_of_the_key() {
        let mut cache = SpeechCache::new(4);
        let at = Coordinate::new(3, 1);
        cache.put(CacheKey::new("nova", at), audio(1));
        assert!(!cache.has(&CacheKey::new("onyx", at)));
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_in_insertion_order() {
        let mut cache = SpeechCache::new(5);
        for sentence in 0..40 {
            cache.put(key(sentence), audio(sentence as u8));
            assert!(cache.len() <= 5);
        }
        let remaining: Vec<usize> = cache.keys().map(|k| k.sentence).collect();
        assert_eq!(remaining, vec![35, 36, 37, 38, 39]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut cache = SpeechCache::new(0);
        cache.put(key(0), audio(0));
        cache.put(key(1), audio(1));
        assert_eq!(cache.capacity(), 1);
        assert!(cache.has(&key(1)));
    }
}
