//! Book model handed to the narration engine.
//!
//! A book is an ordered list of chapters. Sentences are never stored; they are
//! derived from a chapter's narratable text whenever that chapter becomes
//! current. Only per-chapter sentence counts are kept, for progress math.

use crate::text_utils::split_sentences;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// A `(chapter, sentence)` playback position.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Coordinate {
    pub chapter: usize,
    pub sentence: usize,
}

impl Coordinate {
    pub const fn new(chapter: usize, sentence: usize) -> Self {
        Self { chapter, sentence }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chapter {} sentence {}", self.chapter, self.sentence)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterFormat {
    #[default]
    Plain,
    Markup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub format: ChapterFormat,
}

impl Chapter {
    pub fn plain(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            format: ChapterFormat::Plain,
        }
    }

    /// Text suitable for the segmenter; markup is flattened first.
    pub fn narratable_text(&self) -> String {
        match self.format {
            ChapterFormat::Plain => self.content.clone(),
            ChapterFormat::Markup => match html2text::from_read(self.content.as_bytes(), 10_000) {
                Ok(clean) => clean,
                Err(err) => {
                    warn!(title = %self.title, "html2text failed: {err}");
                    self.content.clone()
                }
            },
        }
    }

    pub fn sentences(&self) -> Vec<String> {
        split_sentences(&self.narratable_text())
    }
}

#[derive(Debug, Clone)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    chapters: Vec<Chapter>,
    sentence_counts: Vec<usize>,
}

impl Book {
    pub fn new(id: impl Into<String>, title: impl Into<String>, chapters: Vec<Chapter>) -> Self {
        let sentence_counts = chapters.iter().map(|c| c.sentences().len()).collect();
        Self {
            id: id.into(),
            title: title.into(),
            author: None,
            chapters,
            sentence_counts,
        }
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn chapter(&self, idx: usize) -> Option<&Chapter> {
        self.chapters.get(idx)
    }

    pub fn sentence_count(&self, chapter: usize) -> usize {
        self.sentence_counts.get(chapter).copied().unwrap_or(0)
    }

    pub fn total_sentences(&self) -> usize {
        self.sentence_counts.iter().sum()
    }

    pub fn contains(&self, coordinate: Coordinate) -> bool {
        coordinate.sentence < self.sentence_count(coordinate.chapter)
    }

    /// Number of sentences that precede `coordinate` across the whole book.
    pub fn sentences_before(&self, coordinate: Coordinate) -> usize {
        let earlier: usize = self
            .sentence_counts
            .iter()
            .take(coordinate.chapter)
            .sum();
        earlier + coordinate.sentence.min(self.sentence_count(coordinate.chapter))
    }

    pub fn first_coordinate(&self) -> Option<Coordinate> {
        self.first_chapter_with_sentences(0)
            .map(|chapter| Coordinate::new(chapter, 0))
    }

    /// Immediate successor: next sentence in the chapter, otherwise the first
    /// sentence of the next chapter that has any.
    pub fn next_coordinate(&self, coordinate: Coordinate) -> Option<Coordinate> {
        if coordinate.sentence + 1 < self.sentence_count(coordinate.chapter) {
            return Some(Coordinate::new(coordinate.chapter, coordinate.sentence + 1));
        }
        self.first_chapter_with_sentences(coordinate.chapter + 1)
            .map(|chapter| Coordinate::new(chapter, 0))
    }

    /// Immediate predecessor, landing on the last sentence of the previous
    /// non-empty chapter when stepping back from a chapter start.
    pub fn previous_coordinate(&self, coordinate: Coordinate) -> Option<Coordinate> {
        if coordinate.sentence > 0 && self.contains(coordinate) {
            return Some(Coordinate::new(coordinate.chapter, coordinate.sentence - 1));
        }
        (0..coordinate.chapter.min(self.chapters.len()))
            .rev()
            .find(|&chapter| self.sentence_count(chapter) > 0)
            .map(|chapter| Coordinate::new(chapter, self.sentence_count(chapter) - 1))
    }

    /// Map a possibly stale position (e.g. from an older copy of the book)
    /// into range. Returns `None` only when the book has no sentences at all.
    pub fn clamp(&self, coordinate: Coordinate) -> Option<Coordinate> {
        let count = self.sentence_count(coordinate.chapter);
        if count > 0 {
            return Some(Coordinate::new(
                coordinate.chapter,
                coordinate.sentence.min(count - 1),
            ));
        }
        self.first_chapter_with_sentences(coordinate.chapter)
            .map(|chapter| Coordinate::new(chapter, 0))
            .or_else(|| self.first_coordinate())
    }

    fn first_chapter_with_sentences(&self, from: usize) -> Option<usize> {
        (from..self.chapters.len()).find(|&chapter| self.sentence_count(chapter) > 0)
    }
}

#[derive(Debug, Deserialize)]
struct BookManifest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    chapters: Vec<Chapter>,
}

/// Load a book from a TOML/JSON manifest, or from a single text/HTML file
/// treated as a one-chapter book.
pub fn load_book(path: &Path) -> Result<Book> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Reading book from {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("book")
        .to_string();

    let manifest = match extension.as_str() {
        "toml" => Some(toml::from_str::<BookManifest>(&contents).context("Parsing TOML manifest")?),
        "json" => Some(
            serde_json::from_str::<BookManifest>(&contents).context("Parsing JSON manifest")?,
        ),
        _ => None,
    };

    let book = match manifest {
        Some(manifest) => {
            if manifest.chapters.is_empty() {
                return Err(anyhow!("Manifest {} lists no chapters", path.display()));
            }
            let id = manifest.id.unwrap_or_else(|| path_id(path));
            let title = manifest.title.unwrap_or_else(|| stem.clone());
            Book::new(id, title, manifest.chapters).with_author(manifest.author)
        }
        None => {
            let format = if matches!(extension.as_str(), "html" | "htm" | "xhtml") {
                ChapterFormat::Markup
            } else {
                ChapterFormat::Plain
            };
            debug!(?format, "Treating file as a single chapter");
            let chapter = Chapter {
                title: stem.clone(),
                content: contents,
                format,
            };
            Book::new(path_id(path), stem, vec![chapter])
        }
    };

    info!(
        path = %path.display(),
        chapters = book.chapter_count(),
        sentences = book.total_sentences(),
        "Loaded book"
    );
    Ok(book)
}

fn path_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
pub(crate) fn book_from(chapters: &[&[&str]]) -> Book {
    let chapters = chapters
        .iter()
        .enumerate()
        .map(|(idx, sentences)| Chapter::plain(format!("Chapter {}", idx + 1), sentences.concat()))
        .collect();
    Book::new("test-book", "Test Book", chapters)
}
