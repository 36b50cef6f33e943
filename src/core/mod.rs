//! Core types shared by every stage of the learner.
//!
//! This module provides:
//! - The crate error type ([`PfaError`]) and result alias
//! - Valued features (`+voice`, `-voice`) and their polarity
//! - The [`FeatureIndex`]: segment inventory plus the valued-feature → segment-set mapping
//!
//! ## Valued Feature Order
//!
//! Valued features are enumerated positive-first, in feature-table header order:
//! ```text
//! +f1, +f2, ..., +fn, -f1, -f2, ..., -fn
//! ```
//! Constraint generation walks this order, so it must stay stable.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

/// Error type for learner operations.
#[derive(Debug, Error)]
pub enum PfaError {
    /// Invalid run configuration or malformed input table
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// Dimension disagreement between matrices, vectors or tables
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A word contains a symbol that is not in the segment inventory
    #[error("Unknown segment in word '{word}' at byte {offset}")]
    UnknownSegment { word: String, offset: usize },
    /// A word is well-formed but absent from the word universe
    #[error("Word '{0}' is not in the word universe")]
    UnknownWord(String),
    /// A word is longer than the universe's maximum word length
    #[error("Word '{word}' has {length} segments, universe maximum is {max}")]
    WordTooLong {
        word: String,
        length: usize,
        max: usize,
    },
    /// The ambiguous-segment table has no row for an ignored-feature set
    #[error("No ambiguous-segment row for ignored features '{0}'")]
    MissingAmbiguity(String),
    /// A training step produced NaN or infinite weights
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// Weight `constraint` became non-finite after a step on universe row `word`
    #[error("Weight {constraint} became non-finite after training on word {word}")]
    NonFiniteWeight { constraint: usize, word: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PfaResult<T> = Result<T, PfaError>;

/// Index of a segment in the [`FeatureIndex`] inventory.
pub type SegmentId = usize;

/// Feature value: `+` or `-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Polarity {
    Plus,
    Minus,
}

impl Polarity {
    /// Parse a feature-table cell. Only `+` and `-` are accepted.
    pub fn parse(cell: &str) -> Option<Self> {
        match cell.trim() {
            "+" => Some(Polarity::Plus),
            "-" => Some(Polarity::Minus),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Polarity::Plus => '+',
            Polarity::Minus => '-',
        }
    }
}

/// A (polarity, feature name) pair such as `+voice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValuedFeature {
    pub polarity: Polarity,
    pub name: String,
}

impl fmt::Display for ValuedFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.polarity.symbol(), self.name)
    }
}

/// Segment inventory and valued-feature extensions.
///
/// # Invariants
///
/// - `valued[i]` and `extensions[i]` are aligned
/// - For feature `k` of `n`, `+k` sits at index `k` and `-k` at index `n + k`
/// - Segment ids are dense: `0..segment_count()`
///
/// The `+F`/`-F` extensions are assumed to partition the unambiguous part of the
/// inventory. This is not checked; ambiguous segments may belong to both.
#[derive(Debug, Clone)]
pub struct FeatureIndex {
    segments: Vec<String>,
    lookup: HashMap<String, SegmentId>,
    feature_names: Vec<String>,
    valued: Vec<ValuedFeature>,
    extensions: Vec<BTreeSet<SegmentId>>,
    /// Longest symbol in bytes, bounds the tokenizer's lookahead
    longest_symbol: usize,
}

impl FeatureIndex {
    /// Create an index with the given feature names and no segments.
    ///
    /// # Errors
    /// - `InvalidConfig` if a name is empty or repeated
    pub fn new(feature_names: Vec<String>) -> PfaResult<Self> {
        let mut seen = BTreeSet::new();
        for name in &feature_names {
            if name.is_empty() {
                return Err(PfaError::InvalidConfig(
                    "Feature names must be non-empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(PfaError::InvalidConfig(format!(
                    "Duplicate feature name '{}'",
                    name
                )));
            }
        }

        let valued: Vec<ValuedFeature> = [Polarity::Plus, Polarity::Minus]
            .iter()
            .flat_map(|&polarity| {
                feature_names.iter().map(move |name| ValuedFeature {
                    polarity,
                    name: name.clone(),
                })
            })
            .collect();
        let extensions = vec![BTreeSet::new(); valued.len()];

        Ok(Self {
            segments: Vec::new(),
            lookup: HashMap::new(),
            feature_names,
            valued,
            extensions,
            longest_symbol: 0,
        })
    }

    /// Register a fully specified segment.
    ///
    /// `values[k]` is the segment's value for `feature_names()[k]`.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `values` does not cover every feature
    /// - `InvalidConfig` if the symbol is empty or already registered
    pub fn add_segment(&mut self, symbol: &str, values: &[Polarity]) -> PfaResult<SegmentId> {
        if values.len() != self.feature_names.len() {
            return Err(PfaError::ShapeMismatch(format!(
                "Segment '{}': expected {} feature values, got {}",
                symbol,
                self.feature_names.len(),
                values.len()
            )));
        }
        if self.lookup.contains_key(symbol) {
            return Err(PfaError::InvalidConfig(format!(
                "Duplicate segment '{}'",
                symbol
            )));
        }

        let id = self.push_symbol(symbol)?;
        for (k, &polarity) in values.iter().enumerate() {
            let idx = self.valued_index(polarity, k);
            self.extensions[idx].insert(id);
        }
        Ok(id)
    }

    /// Register a segment with no feature values of its own, or return the
    /// existing id if the symbol is already known.
    ///
    /// Ambiguous segments gain feature membership through [`Self::extend`].
    pub fn add_ambiguous_segment(&mut self, symbol: &str) -> PfaResult<SegmentId> {
        match self.lookup.get(symbol) {
            Some(&id) => Ok(id),
            None => self.push_symbol(symbol),
        }
    }

    fn push_symbol(&mut self, symbol: &str) -> PfaResult<SegmentId> {
        if symbol.is_empty() {
            return Err(PfaError::InvalidConfig(
                "Segment symbols must be non-empty".to_string(),
            ));
        }
        let id = self.segments.len();
        self.segments.push(symbol.to_string());
        self.lookup.insert(symbol.to_string(), id);
        self.longest_symbol = self.longest_symbol.max(symbol.len());
        Ok(id)
    }

    /// Add a segment to the extension of valued feature `valued_idx`.
    pub fn extend(&mut self, valued_idx: usize, segment: SegmentId) -> PfaResult<()> {
        if valued_idx >= self.valued.len() || segment >= self.segments.len() {
            return Err(PfaError::ShapeMismatch(format!(
                "extend: valued feature {} / segment {} out of range ({} / {})",
                valued_idx,
                segment,
                self.valued.len(),
                self.segments.len()
            )));
        }
        self.extensions[valued_idx].insert(segment);
        Ok(())
    }

    /// Position of `polarity` + `feature_names()[feature]` in [`Self::valued_features`].
    pub fn valued_index(&self, polarity: Polarity, feature: usize) -> usize {
        match polarity {
            Polarity::Plus => feature,
            Polarity::Minus => self.feature_names.len() + feature,
        }
    }

    /// Index of the feature name underlying valued feature `valued_idx`.
    pub fn feature_of(&self, valued_idx: usize) -> usize {
        valued_idx % self.feature_names.len().max(1)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn valued_features(&self) -> &[ValuedFeature] {
        &self.valued
    }

    /// Segments satisfying valued feature `valued_idx`.
    pub fn extension(&self, valued_idx: usize) -> &BTreeSet<SegmentId> {
        &self.extensions[valued_idx]
    }

    /// Feature names in the fixed sorted order used for attention sampling.
    pub fn attention_features(&self) -> Vec<String> {
        let mut names = self.feature_names.clone();
        names.sort();
        names
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn symbol(&self, id: SegmentId) -> &str {
        &self.segments[id]
    }

    pub fn segment_id(&self, symbol: &str) -> Option<SegmentId> {
        self.lookup.get(symbol).copied()
    }

    /// Split a word into segments.
    ///
    /// Prefers the longest symbol at each position, backing off to a shorter
    /// one when the longer choice leaves a remainder that cannot be split.
    ///
    /// # Errors
    /// - `UnknownSegment` at the end of the longest prefix that does split
    pub fn tokenize(&self, word: &str) -> PfaResult<Vec<SegmentId>> {
        let n = word.len();
        // completes[i]: word[i..] splits into known symbols
        let mut completes = vec![false; n + 1];
        completes[n] = true;
        for pos in (0..n).rev() {
            completes[pos] = self
                .matches_at(word, pos)
                .iter()
                .any(|&(_, end)| completes[end]);
        }
        if !completes[0] {
            return Err(PfaError::UnknownSegment {
                word: word.to_string(),
                offset: self.longest_prefix(word),
            });
        }

        let mut out = Vec::with_capacity(n);
        let mut pos = 0;
        while let Some((id, end)) = self
            .matches_at(word, pos)
            .into_iter()
            .find(|&(_, end)| completes[end])
        {
            out.push(id);
            pos = end;
            if pos == n {
                break;
            }
        }
        Ok(out)
    }

    /// Symbols starting at byte `pos`, longest first, as (id, end offset).
    fn matches_at(&self, word: &str, pos: usize) -> Vec<(SegmentId, usize)> {
        if !word.is_char_boundary(pos) {
            return Vec::new();
        }
        let max_end = (pos + self.longest_symbol).min(word.len());
        (pos + 1..=max_end)
            .rev()
            .filter(|&end| word.is_char_boundary(end))
            .filter_map(|end| self.lookup.get(&word[pos..end]).map(|&id| (id, end)))
            .collect()
    }

    /// Byte length of the longest prefix of `word` that splits into symbols.
    fn longest_prefix(&self, word: &str) -> usize {
        let mut reached = vec![false; word.len() + 1];
        reached[0] = true;
        let mut furthest = 0;
        for pos in 0..word.len() {
            if !reached[pos] {
                continue;
            }
            furthest = pos;
            for (_, end) in self.matches_at(word, pos) {
                reached[end] = true;
            }
        }
        furthest
    }

    /// Concatenate segment symbols back into a word string.
    pub fn spell(&self, word: &[SegmentId]) -> String {
        word.iter().map(|&id| self.segments[id].as_str()).collect()
    }
}

const EXPONENT_THRESHOLD: f64 = 1e-4;

/// Render a float with at least one decimal place (`1.0`, `0.75`, `0.0`).
/// Magnitudes below `1e-4` switch to exponent form (`2.5e-7`).
///
/// File names and logged probabilities use this form.
pub fn format_probability(p: f64) -> String {
    if p != 0.0 && p.abs() < EXPONENT_THRESHOLD {
        return format!("{:e}", p);
    }
    let text = p.to_string();
    if text.contains('.') || text.contains('e') || !p.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}
