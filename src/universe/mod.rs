//! The word universe: every string the learner assigns probability to.
//!
//! The universe is the Cartesian product of the segment inventory up to the
//! maximum observed word length, sorted by spelling. Each word has exactly one
//! index, and the violation matrix rows are aligned with those indices:
//! ```text
//! lookup(spelling(i)) == i        for every i < len()
//! spelling(lookup(w)) == w        for every w in the universe
//! ```

use crate::core::{FeatureIndex, PfaError, PfaResult, SegmentId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound on universe size; beyond this the violation matrix is unusable.
const MAX_UNIVERSE_WORDS: usize = 10_000_000;

/// Which word lengths the universe enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniverseShape {
    /// Every length from 1 to the maximum
    #[default]
    UpTo,
    /// Only words of exactly the maximum length
    Exact,
}

/// Enumerated word universe with a stable word ↔ index bijection.
#[derive(Debug, Clone)]
pub struct WordUniverse {
    words: Vec<Vec<SegmentId>>,
    spellings: Vec<String>,
    lookup: HashMap<String, usize>,
    max_len: usize,
    shape: UniverseShape,
}

impl WordUniverse {
    /// Enumerate all words over the inventory of `features`.
    ///
    /// # Errors
    /// - `InvalidConfig` if `max_len` is zero, the inventory is empty, the
    ///   universe would be too large, or two segment sequences share a spelling
    pub fn enumerate(
        features: &FeatureIndex,
        max_len: usize,
        shape: UniverseShape,
    ) -> PfaResult<Self> {
        let n = features.segment_count();
        if max_len == 0 {
            return Err(PfaError::InvalidConfig(
                "Maximum word length must be > 0".to_string(),
            ));
        }
        if n == 0 {
            return Err(PfaError::InvalidConfig(
                "Segment inventory is empty".to_string(),
            ));
        }

        let lengths: Vec<usize> = match shape {
            UniverseShape::UpTo => (1..=max_len).collect(),
            UniverseShape::Exact => vec![max_len],
        };
        let total = universe_size(n, &lengths).ok_or_else(|| {
            PfaError::InvalidConfig(format!(
                "Universe of {} segments up to length {} exceeds {} words",
                n, max_len, MAX_UNIVERSE_WORDS
            ))
        })?;

        let mut entries: Vec<(String, Vec<SegmentId>)> = Vec::with_capacity(total);
        for &len in &lengths {
            // Odometer over segment ids, last position fastest
            let mut word = vec![0; len];
            loop {
                entries.push((features.spell(&word), word.clone()));

                let mut pos = len;
                loop {
                    if pos == 0 {
                        break;
                    }
                    pos -= 1;
                    word[pos] += 1;
                    if word[pos] < n {
                        break;
                    }
                    word[pos] = 0;
                }
                if word.iter().all(|&s| s == 0) {
                    break;
                }
            }
        }

        entries.sort();
        if let Some(pair) = entries.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(PfaError::InvalidConfig(format!(
                "Segment inventory is ambiguous: two segment sequences spell '{}'",
                pair[0].0
            )));
        }

        let (spellings, words): (Vec<String>, Vec<Vec<SegmentId>>) = entries.into_iter().unzip();
        let lookup = spellings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        Ok(Self {
            words,
            spellings,
            lookup,
            max_len,
            shape,
        })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn shape(&self) -> UniverseShape {
        self.shape
    }

    /// Segment sequence of word `index`.
    pub fn word(&self, index: usize) -> &[SegmentId] {
        &self.words[index]
    }

    pub fn spelling(&self, index: usize) -> &str {
        &self.spellings[index]
    }

    pub fn words(&self) -> impl Iterator<Item = &[SegmentId]> {
        self.words.iter().map(Vec::as_slice)
    }

    pub fn lookup(&self, spelling: &str) -> Option<usize> {
        self.lookup.get(spelling).copied()
    }

    /// Index of a word given as a string.
    ///
    /// # Errors
    /// - `UnknownSegment` if the word does not tokenize
    /// - `WordTooLong` if it exceeds the maximum length
    /// - `UnknownWord` if it is otherwise absent (e.g. too short for an exact-length universe)
    pub fn index_of(&self, features: &FeatureIndex, word: &str) -> PfaResult<usize> {
        let segments = features.tokenize(word)?;
        if segments.len() > self.max_len {
            return Err(PfaError::WordTooLong {
                word: word.to_string(),
                length: segments.len(),
                max: self.max_len,
            });
        }
        self.lookup(word)
            .ok_or_else(|| PfaError::UnknownWord(word.to_string()))
    }
}

/// `Σ n^len` over `lengths`, or `None` past the size cap.
fn universe_size(n: usize, lengths: &[usize]) -> Option<usize> {
    let mut total = 0usize;
    for &len in lengths {
        let count = u32::try_from(len).ok().and_then(|l| n.checked_pow(l))?;
        total = total.checked_add(count)?;
    }
    (total <= MAX_UNIVERSE_WORDS).then_some(total)
}
