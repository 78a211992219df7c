//! Sentence-by-sentence narration of long-form text.
//!
//! Chapters are split into sentences, each sentence is synthesized on demand
//! by a remote speech service, and playback moves through the book with a
//! small look-ahead cache while reading progress is saved in the background.

pub mod audio;
pub mod book;
pub mod cache;
pub mod config;
pub mod error;
pub mod narration;
pub mod runtime;
pub mod synthesis;
pub mod text_utils;
