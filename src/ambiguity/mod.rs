//! Feature-attention ambiguity: neutralizing words when features are ignored.
//!
//! When a learner fails to attend to a set of features, segments that differ
//! only in those features collapse to a shared ambiguous symbol. The
//! ambiguous-segment table lists, per ignored-feature set, the symbol each
//! unambiguous segment becomes:
//! ```text
//!          p   b   t   d
//! voice    P   P   T   T
//! ```
//!
//! Registering a table has two effects on the [`FeatureIndex`], both of which
//! must happen before the word universe is enumerated:
//! 1. Ambiguous symbols join the segment inventory
//! 2. Each feature's extension gains every ambiguous symbol that can stand for
//!    one of its original segments, so constraints count ambiguous segments
//!    like any segment they could be
//!
//! The [`AmbiguityResolver`] then precomputes, for every ignored-feature set
//! and every word, the index of the neutralized word.

use crate::core::{FeatureIndex, PfaError, PfaResult, SegmentId};
use crate::universe::WordUniverse;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Largest feature count for which every ignored-feature subset is checked.
const MAX_COVERAGE_FEATURES: usize = 20;

/// Canonical (sorted, deduplicated) set of ignored feature names.
///
/// Renders as the concatenated names, e.g. `nasalvoice`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AmbiguityKey(Vec<String>);

impl AmbiguityKey {
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = features.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self(names)
    }

    /// The "nothing ignored" key.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a table cell of `+`-separated feature names (`voice+nasal`).
    pub fn parse(cell: &str) -> Self {
        Self::new(
            cell.split('+')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn features(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for AmbiguityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.0 {
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// Parsed ambiguous-segment table, still in symbols.
#[derive(Debug, Clone)]
pub struct AmbiguityTable {
    unambiguous: Vec<String>,
    rows: Vec<(AmbiguityKey, Vec<String>)>,
}

impl AmbiguityTable {
    /// # Errors
    /// - `ShapeMismatch` if a row's width differs from the header's
    /// - `InvalidConfig` if two rows share a key
    pub fn new(
        unambiguous: Vec<String>,
        rows: Vec<(AmbiguityKey, Vec<String>)>,
    ) -> PfaResult<Self> {
        let mut keys = BTreeSet::new();
        for (key, cells) in &rows {
            if cells.len() != unambiguous.len() {
                return Err(PfaError::ShapeMismatch(format!(
                    "ambiguous-segment row '{}' has {} cells, header has {}",
                    key,
                    cells.len(),
                    unambiguous.len()
                )));
            }
            if !keys.insert(key.clone()) {
                return Err(PfaError::InvalidConfig(format!(
                    "duplicate ambiguous-segment row '{}'",
                    key
                )));
            }
        }
        Ok(Self { unambiguous, rows })
    }

    pub fn unambiguous(&self) -> &[String] {
        &self.unambiguous
    }

    pub fn rows(&self) -> &[(AmbiguityKey, Vec<String>)] {
        &self.rows
    }

    /// Add the table's ambiguous symbols to `features` and extend feature
    /// extensions with them.
    ///
    /// # Errors
    /// - `InvalidConfig` if the header names an unknown segment or a key names
    ///   an unknown feature
    pub fn register(&self, features: &mut FeatureIndex) -> PfaResult<AmbiguityMap> {
        let unambiguous: Vec<SegmentId> = self
            .unambiguous
            .iter()
            .map(|symbol| {
                features.segment_id(symbol).ok_or_else(|| {
                    PfaError::InvalidConfig(format!(
                        "ambiguous-segment header names unknown segment '{}'",
                        symbol
                    ))
                })
            })
            .collect::<PfaResult<_>>()?;

        let mut substitutions = HashMap::new();
        let mut stands_for: Vec<(SegmentId, SegmentId)> = Vec::new();
        for (key, cells) in &self.rows {
            if let Some(name) = key
                .features()
                .iter()
                .find(|name| !features.feature_names().contains(*name))
            {
                return Err(PfaError::InvalidConfig(format!(
                    "ambiguous-segment row '{}' names unknown feature '{}'",
                    key, name
                )));
            }

            let mut row = HashMap::with_capacity(cells.len());
            for (&original, symbol) in unambiguous.iter().zip(cells) {
                let ambiguous = features.add_ambiguous_segment(symbol.trim())?;
                row.insert(original, ambiguous);
                stands_for.push((ambiguous, original));
            }
            substitutions.insert(key.clone(), row);
        }

        // Extend against the original extensions, not incrementally
        let additions: Vec<(usize, BTreeSet<SegmentId>)> = (0..features.valued_features().len())
            .map(|v| {
                let extension = features.extension(v);
                let added = stands_for
                    .iter()
                    .filter(|(_, original)| extension.contains(original))
                    .map(|&(ambiguous, _)| ambiguous)
                    .collect();
                (v, added)
            })
            .collect();
        for (v, added) in additions {
            for segment in added {
                features.extend(v, segment)?;
            }
        }

        tracing::debug!(
            rows = substitutions.len(),
            inventory = features.segment_count(),
            "registered ambiguous segments"
        );

        Ok(AmbiguityMap { substitutions })
    }
}

/// Per ignored-feature set, the segment substitutions in segment ids.
#[derive(Debug, Clone)]
pub struct AmbiguityMap {
    substitutions: HashMap<AmbiguityKey, HashMap<SegmentId, SegmentId>>,
}

impl AmbiguityMap {
    pub fn contains(&self, key: &AmbiguityKey) -> bool {
        self.substitutions.contains_key(key)
    }

    /// Check that every non-empty subset of `feature_names` has a row.
    ///
    /// # Errors
    /// - `MissingAmbiguity` naming the first uncovered subset
    /// - `InvalidConfig` if there are too many features to enumerate subsets
    pub fn require_coverage(&self, feature_names: &[String]) -> PfaResult<()> {
        let n = feature_names.len();
        if n > MAX_COVERAGE_FEATURES {
            return Err(PfaError::InvalidConfig(format!(
                "{} features is too many for feature attention (max {})",
                n, MAX_COVERAGE_FEATURES
            )));
        }
        for mask in 1u32..(1u32 << n) {
            let key = AmbiguityKey::new(
                feature_names
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, name)| name.as_str()),
            );
            if !self.contains(&key) {
                return Err(PfaError::MissingAmbiguity(key.to_string()));
            }
        }
        Ok(())
    }
}

/// Word index → neutralized word index, per ignored-feature set.
#[derive(Debug, Clone)]
pub struct AmbiguityResolver {
    neutralized: HashMap<AmbiguityKey, Vec<usize>>,
}

impl AmbiguityResolver {
    /// Rewrite every word of `universe` under every row of `map`.
    ///
    /// `features` must be the index `map` was registered against, and
    /// `universe` must have been enumerated after registration.
    pub fn build(
        map: &AmbiguityMap,
        features: &FeatureIndex,
        universe: &WordUniverse,
    ) -> PfaResult<Self> {
        let mut neutralized = HashMap::with_capacity(map.substitutions.len());
        for (key, row) in &map.substitutions {
            let targets = (0..universe.len())
                .map(|w| {
                    let rewritten: Vec<SegmentId> = universe
                        .word(w)
                        .iter()
                        .map(|seg| row.get(seg).copied().unwrap_or(*seg))
                        .collect();
                    let spelling = features.spell(&rewritten);
                    universe
                        .lookup(&spelling)
                        .ok_or(PfaError::UnknownWord(spelling))
                })
                .collect::<PfaResult<Vec<usize>>>()?;
            neutralized.insert(key.clone(), targets);
        }
        Ok(Self { neutralized })
    }

    /// Index of the word `word` becomes when the features in `key` are ignored.
    ///
    /// With nothing ignored and no explicit row, a word resolves to itself.
    pub fn resolve(&self, word: usize, key: &AmbiguityKey) -> PfaResult<usize> {
        match self.neutralized.get(key) {
            Some(targets) => targets.get(word).copied().ok_or_else(|| {
                PfaError::ShapeMismatch(format!(
                    "word index {} outside universe of {}",
                    word,
                    targets.len()
                ))
            }),
            None if key.is_empty() => Ok(word),
            None => Err(PfaError::MissingAmbiguity(key.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.neutralized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neutralized.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::Polarity;
    use crate::universe::UniverseShape;

    /// p/b contrast in voice; ignoring voice collapses both to `P`.
    pub(crate) fn voice_table() -> AmbiguityTable {
        AmbiguityTable::new(
            vec!["p".to_string(), "b".to_string()],
            vec![(AmbiguityKey::parse("voice"), vec!["P".to_string(), "P".to_string()])],
        )
        .expect("table")
    }

    pub(crate) fn voice_index() -> FeatureIndex {
        let mut index = FeatureIndex::new(vec!["voice".to_string()]).expect("index");
        index.add_segment("p", &[Polarity::Minus]).expect("p");
        index.add_segment("b", &[Polarity::Plus]).expect("b");
        index
    }

    #[test]
    fn test_key_canonical() {
        let a = AmbiguityKey::parse("voice+nasal");
        let b = AmbiguityKey::new(["nasal", "voice"]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "nasalvoice");
        assert!(AmbiguityKey::parse("").is_empty());
        assert!(AmbiguityKey::parse(" ").is_empty());
    }

    #[test]
    fn test_register_extends_inventory_and_features() {
        let mut index = voice_index();
        let map = voice_table().register(&mut index).expect("register");
        let big_p = index.segment_id("P").expect("P registered");
        assert_eq!(index.segment_count(), 3);
        assert!(index.extension(0).contains(&big_p));
        assert!(index.extension(1).contains(&big_p));
        assert!(map.contains(&AmbiguityKey::parse("voice")));
    }

    #[test]
    fn test_resolve_neutralizes() {
        let mut index = voice_index();
        let map = voice_table().register(&mut index).expect("register");
        let universe = WordUniverse::enumerate(&index, 2, UniverseShape::UpTo).expect("universe");
        let resolver = AmbiguityResolver::build(&map, &index, &universe).expect("resolver");

        let voice = AmbiguityKey::parse("voice");
        let bp = universe.lookup("bp").expect("bp");
        let pp_big = universe.lookup("PP").expect("PP");
        assert_eq!(resolver.resolve(bp, &voice).expect("resolve"), pp_big);
        assert_eq!(
            resolver.resolve(bp, &AmbiguityKey::empty()).expect("resolve"),
            bp
        );
        assert!(matches!(
            resolver.resolve(bp, &AmbiguityKey::parse("nasal")),
            Err(PfaError::MissingAmbiguity(_))
        ));
    }

    #[test]
    fn test_coverage() {
        let mut index = voice_index();
        let map = voice_table().register(&mut index).expect("register");
        assert!(map.require_coverage(&["voice".to_string()]).is_ok());
        let err = map.require_coverage(&["nasal".to_string(), "voice".to_string()]);
        assert!(matches!(err, Err(PfaError::MissingAmbiguity(k)) if k == "nasal"));
    }

    #[test]
    fn test_unknown_header_segment() {
        let table = AmbiguityTable::new(
            vec!["q".to_string()],
            vec![(AmbiguityKey::parse("voice"), vec!["Q".to_string()])],
        )
        .expect("table");
        let mut index = voice_index();
        assert!(matches!(
            table.register(&mut index),
            Err(PfaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_key_feature() {
        let table = AmbiguityTable::new(
            vec!["p".to_string()],
            vec![(AmbiguityKey::parse("round"), vec!["P".to_string()])],
        )
        .expect("table");
        let mut index = voice_index();
        assert!(table.register(&mut index).is_err());
    }

    #[test]
    fn test_row_width_checked() {
        let table = AmbiguityTable::new(
            vec!["p".to_string(), "b".to_string()],
            vec![(AmbiguityKey::parse("voice"), vec!["P".to_string()])],
        );
        assert!(matches!(table, Err(PfaError::ShapeMismatch(_))));
    }
}
