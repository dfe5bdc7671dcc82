//! Prize phrase generation from a word list.

use std::{fs, path::Path};

use rand::RngExt;
use serde::Deserialize;
use thiserror::Error;

/// Chance of returning a bare abstract noun instead of a prize.
const EASTER_EGG_PROB: f64 = 0.04;

/// Chance of using two adjectives instead of one.
const TWO_ADJECTIVE_PROB: f64 = 0.5;

#[derive(Debug, Error)]
pub enum PrizeError {
    #[error("Failed to read word list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid word list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Word list has no {0}")]
    Empty(&'static str),
}

/// Produces one prize phrase per call.
pub trait PrizeGenerator: Send + Sync {
    fn phrase(&self) -> String;
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WordList {
    #[serde(default)]
    pub adjectives: Vec<String>,
    #[serde(default)]
    pub nouns: Vec<String>,
    #[serde(default)]
    pub abstracts: Vec<String>,
}

/// Random "adjective [adjective] noun" phrases, with the occasional abstract.
#[derive(Clone, Debug)]
pub struct WordListGenerator {
    words: WordList,
}

impl WordListGenerator {
    pub fn new(words: WordList) -> Result<Self, PrizeError> {
        if words.adjectives.is_empty() {
            return Err(PrizeError::Empty("adjectives"));
        }
        if words.nouns.is_empty() {
            return Err(PrizeError::Empty("nouns"));
        }
        Ok(Self { words })
    }

    pub fn from_path(path: &Path) -> Result<Self, PrizeError> {
        let text = fs::read_to_string(path).map_err(|source| PrizeError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(serde_json::from_str(&text)?)
    }

    pub fn words(&self) -> &WordList {
        &self.words
    }
}

impl PrizeGenerator for WordListGenerator {
    fn phrase(&self) -> String {
        let WordList {
            adjectives,
            nouns,
            abstracts,
        } = &self.words;
        let mut rng = rand::rng();

        if !abstracts.is_empty() && rng.random_bool(EASTER_EGG_PROB) {
            return abstracts[rng.random_range(0..abstracts.len())].clone();
        }

        let noun = &nouns[rng.random_range(0..nouns.len())];
        if adjectives.len() >= 2 && rng.random_bool(TWO_ADJECTIVE_PROB) {
            let first = rng.random_range(0..adjectives.len());
            let mut second = rng.random_range(0..adjectives.len() - 1);
            if second >= first {
                second += 1;
            }
            format!("{} {} {noun}", adjectives[first], adjectives[second])
        } else {
            let adjective = &adjectives[rng.random_range(0..adjectives.len())];
            format!("{adjective} {noun}")
        }
    }
}
