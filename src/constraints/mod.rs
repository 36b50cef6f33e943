//! Constraint catalogue generation and matching.
//!
//! Constraints are ordered lists of feature bundles. Each bundle compiles to a
//! [`SegmentClass`] (the segments satisfying every feature in it), and a
//! constraint compiles to a [`Pattern`] that is counted over a word with a
//! sliding window:
//! ```text
//! count(word) = number of non-overlapping, leftmost matches scanning left to right
//! ```
//!
//! ## Generation Order
//!
//! 1. Bias constraint (index 0)
//! 2. Multi-feature bundles, size 2..=F, in combination order over the valued features
//! 3. Singleton bundles, in valued-feature order
//! 4. N-grams for n = 2..=max_len: every combination-with-repetition of the
//!    bundles above, expanded into its distinct orderings. Orderings are
//!    lexicographic over bundles ranked by size, then by rendered features
//!
//! A constraint with an empty class anywhere is dropped, and so is one whose
//! pattern equals an earlier constraint's. First occurrence wins, so the order
//! above fixes which name survives.

use crate::core::{FeatureIndex, SegmentId};
use std::collections::HashSet;

/// Name of the constraint at index 0.
pub const BIAS_NAME: &str = "Bias Constraint";

/// Sorted, non-empty set of segments one pattern position accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentClass(Vec<SegmentId>);

impl SegmentClass {
    pub fn contains(&self, segment: SegmentId) -> bool {
        self.0.binary_search(&segment).is_ok()
    }

    pub fn members(&self) -> &[SegmentId] {
        &self.0
    }
}

/// Compiled matcher for one constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Matches every segment; violations equal word length
    AnySegment,
    /// One class per consecutive position
    Sequence(Vec<SegmentClass>),
}

impl Pattern {
    /// Count non-overlapping matches in `word`, scanning left to right.
    pub fn count(&self, word: &[SegmentId]) -> usize {
        match self {
            Pattern::AnySegment => word.len(),
            Pattern::Sequence(classes) => {
                let width = classes.len();
                let mut count = 0;
                let mut i = 0;
                while i + width <= word.len() {
                    let hit = classes
                        .iter()
                        .zip(&word[i..i + width])
                        .all(|(class, &seg)| class.contains(seg));
                    if hit {
                        count += 1;
                        i += width;
                    } else {
                        i += 1;
                    }
                }
                count
            }
        }
    }

    /// Number of word positions one match spans.
    pub fn width(&self) -> usize {
        match self {
            Pattern::AnySegment => 1,
            Pattern::Sequence(classes) => classes.len(),
        }
    }
}

/// A surviving constraint.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    /// Valued-feature indices per position; empty for the bias constraint
    pub bundles: Vec<Vec<usize>>,
    pub pattern: Pattern,
}

/// The deduplicated constraint catalogue, aligned with weight vectors by index.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    /// Generate and compile the full catalogue for `features`.
    ///
    /// `max_len` bounds the n-gram size. With no valued features only the
    /// bias constraint survives.
    pub fn compile(features: &FeatureIndex, max_len: usize) -> Self {
        let bundles = unigram_bundles(features);

        let mut constraints = vec![Constraint {
            name: BIAS_NAME.to_string(),
            bundles: Vec::new(),
            pattern: Pattern::AnySegment,
        }];
        let mut seen: HashSet<Pattern> = HashSet::new();
        seen.insert(Pattern::AnySegment);

        let mut keep = |sequence: Vec<Vec<usize>>| {
            if let Some(pattern) = compile_sequence(features, &sequence) {
                if seen.insert(pattern.clone()) {
                    constraints.push(Constraint {
                        name: render_name(features, &sequence),
                        bundles: sequence,
                        pattern,
                    });
                }
            }
        };

        for bundle in &bundles {
            keep(vec![bundle.clone()]);
        }

        // Rank bundles by size, then rendered key; orderings follow this rank
        let keys: Vec<Vec<String>> = bundles.iter().map(|b| bundle_key(features, b)).collect();
        let mut by_rank: Vec<usize> = (0..bundles.len()).collect();
        by_rank.sort_by(|&a, &b| {
            (keys[a].len(), &keys[a]).cmp(&(keys[b].len(), &keys[b]))
        });
        let mut rank_of = vec![0; bundles.len()];
        for (rank, &idx) in by_rank.iter().enumerate() {
            rank_of[idx] = rank;
        }

        for gram in 2..=max_len {
            for combo in combinations_with_replacement(bundles.len(), gram) {
                let mut ranks: Vec<usize> = combo.iter().map(|&i| rank_of[i]).collect();
                ranks.sort_unstable();
                loop {
                    keep(ranks.iter().map(|&r| bundles[by_rank[r]].clone()).collect());
                    if !next_permutation(&mut ranks) {
                        break;
                    }
                }
            }
        }

        tracing::debug!(
            bundles = bundles.len(),
            constraints = constraints.len(),
            "compiled constraint catalogue"
        );

        Self { constraints }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn get(&self, index: usize) -> &Constraint {
        &self.constraints[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.constraints.iter().map(|c| c.name.as_str()).collect()
    }

    /// Negated match counts of every constraint in `word`.
    pub fn violation_profile(&self, word: &[SegmentId]) -> Vec<f64> {
        self.constraints
            .iter()
            .map(|c| -(c.pattern.count(word) as f64))
            .collect()
    }
}

/// Multi-feature bundles (sizes 2..=F, contradictions rejected), then singletons.
fn unigram_bundles(features: &FeatureIndex) -> Vec<Vec<usize>> {
    let n_valued = features.valued_features().len();
    let n_features = features.feature_names().len();
    let mut bundles = Vec::new();

    for size in 2..=n_features {
        for combo in combinations(n_valued, size) {
            let mut named: Vec<usize> = combo.iter().map(|&v| features.feature_of(v)).collect();
            named.sort_unstable();
            named.dedup();
            if named.len() < combo.len() {
                continue;
            }
            let mut bundle = combo;
            bundle.sort_by_key(|&v| features.valued_features()[v].to_string());
            bundles.push(bundle);
        }
    }
    bundles.extend((0..n_valued).map(|v| vec![v]));
    bundles
}

fn bundle_key(features: &FeatureIndex, bundle: &[usize]) -> Vec<String> {
    bundle
        .iter()
        .map(|&v| features.valued_features()[v].to_string())
        .collect()
}

/// Intersect each bundle's extensions; `None` if any class is empty.
fn compile_sequence(features: &FeatureIndex, sequence: &[Vec<usize>]) -> Option<Pattern> {
    let mut classes = Vec::with_capacity(sequence.len());
    for bundle in sequence {
        let (first, rest) = bundle.split_first()?;
        let members: Vec<SegmentId> = features
            .extension(*first)
            .iter()
            .copied()
            .filter(|seg| rest.iter().all(|&v| features.extension(v).contains(seg)))
            .collect();
        if members.is_empty() {
            return None;
        }
        classes.push(SegmentClass(members));
    }
    Some(Pattern::Sequence(classes))
}

fn render_name(features: &FeatureIndex, sequence: &[Vec<usize>]) -> String {
    sequence
        .iter()
        .map(|bundle| format!("[{}]", bundle_key(features, bundle).join(",")))
        .collect()
}

/// k-combinations of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        let Some(i) = (0..k).rev().find(|&i| idx[i] != i + n - k) else {
            return out;
        };
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// k-multisets of `0..n` (non-decreasing sequences) in lexicographic order.
fn combinations_with_replacement(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || n == 0 {
        return out;
    }
    let mut idx = vec![0; k];
    loop {
        out.push(idx.clone());
        let Some(i) = (0..k).rev().find(|&i| idx[i] != n - 1) else {
            return out;
        };
        let next = idx[i] + 1;
        for slot in &mut idx[i..] {
            *slot = next;
        }
    }
}

/// Advance to the next lexicographic permutation; `false` once wrapped.
fn next_permutation(v: &mut [usize]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let Some(i) = (0..v.len() - 1).rev().find(|&i| v[i] < v[i + 1]) else {
        v.reverse();
        return false;
    };
    let j = (i + 1..v.len())
        .rev()
        .find(|&j| v[j] > v[i])
        .unwrap_or(i + 1);
    v.swap(i, j);
    v[i + 1..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tests::pbm_index;
    use crate::core::Polarity;

    fn voice_index() -> FeatureIndex {
        let mut index = FeatureIndex::new(vec!["voice".to_string()]).expect("index");
        index.add_segment("p", &[Polarity::Minus]).expect("p");
        index.add_segment("b", &[Polarity::Plus]).expect("b");
        index
    }

    #[test]
    fn test_voice_unigrams() {
        let set = ConstraintSet::compile(&voice_index(), 1);
        assert_eq!(set.names(), vec![BIAS_NAME, "[+voice]", "[-voice]"]);
        assert_eq!(set.get(0).pattern, Pattern::AnySegment);
    }

    #[test]
    fn test_multi_feature_bundles_precede_singletons() {
        let set = ConstraintSet::compile(&pbm_index(), 1);
        assert_eq!(
            set.names(),
            vec![
                BIAS_NAME,
                "[+nasal,+voice]",
                "[+voice,-nasal]",
                "[-nasal,-voice]",
                "[+voice]",
                "[-nasal]",
            ]
        );
    }

    #[test]
    fn test_no_features_only_bias() {
        let mut index = FeatureIndex::new(Vec::new()).expect("index");
        index.add_segment("a", &[]).expect("a");
        let set = ConstraintSet::compile(&index, 3);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).name, BIAS_NAME);
    }

    #[test]
    fn test_patterns_unique() {
        let set = ConstraintSet::compile(&pbm_index(), 2);
        let unique: HashSet<&Pattern> = set.iter().map(|c| &c.pattern).collect();
        assert_eq!(unique.len(), set.len());
        assert!(set.iter().skip(1).all(|c| c.pattern != Pattern::AnySegment));
    }

    #[test]
    fn test_no_contradictory_bundles() {
        let index = pbm_index();
        let set = ConstraintSet::compile(&index, 2);
        for constraint in set.iter() {
            for bundle in &constraint.bundles {
                let mut named: Vec<usize> = bundle.iter().map(|&v| index.feature_of(v)).collect();
                named.sort_unstable();
                named.dedup();
                assert_eq!(named.len(), bundle.len(), "{}", constraint.name);
            }
        }
    }

    #[test]
    fn test_bigram_orderings() {
        let set = ConstraintSet::compile(&voice_index(), 2);
        // Unigram classes {b} and {p}: 2 unigrams + 4 ordered bigrams
        assert_eq!(set.len(), 1 + 2 + 4);
        assert_eq!(set.get(3).name, "[+voice][+voice]");
        assert_eq!(set.get(4).name, "[+voice][-voice]");
        assert_eq!(set.get(5).name, "[-voice][+voice]");
        assert_eq!(set.get(6).name, "[-voice][-voice]");
    }

    #[test]
    fn test_bigram_order_ranks_smaller_bundles_first() {
        let set = ConstraintSet::compile(&pbm_index(), 2);
        assert_eq!(
            set.names(),
            vec![
                BIAS_NAME,
                "[+nasal,+voice]",
                "[+voice,-nasal]",
                "[-nasal,-voice]",
                "[+voice]",
                "[-nasal]",
                "[+nasal,+voice][+nasal,+voice]",
                "[+nasal,+voice][+voice,-nasal]",
                "[+voice,-nasal][+nasal,+voice]",
                "[+nasal,+voice][-nasal,-voice]",
                "[-nasal,-voice][+nasal,+voice]",
                "[+voice][+nasal,+voice]",
                "[+nasal,+voice][+voice]",
                "[-nasal][+nasal,+voice]",
                "[+nasal,+voice][-nasal]",
                "[+voice,-nasal][+voice,-nasal]",
                "[+voice,-nasal][-nasal,-voice]",
                "[-nasal,-voice][+voice,-nasal]",
                "[+voice][+voice,-nasal]",
                "[+voice,-nasal][+voice]",
                "[-nasal][+voice,-nasal]",
                "[+voice,-nasal][-nasal]",
                "[-nasal,-voice][-nasal,-voice]",
                "[+voice][-nasal,-voice]",
                "[-nasal,-voice][+voice]",
                "[-nasal][-nasal,-voice]",
                "[-nasal,-voice][-nasal]",
                "[+voice][+voice]",
                "[+voice][-nasal]",
                "[-nasal][+voice]",
                "[-nasal][-nasal]",
            ]
        );
    }

    #[test]
    fn test_count_non_overlapping() {
        let b = SegmentClass(vec![1]);
        let bigram = Pattern::Sequence(vec![b.clone(), b.clone()]);
        assert_eq!(bigram.count(&[1, 1, 1]), 1);
        assert_eq!(bigram.count(&[1, 1, 1, 1]), 2);
        assert_eq!(bigram.count(&[0, 1, 1, 0]), 1);
        assert_eq!(Pattern::Sequence(vec![b]).count(&[1, 0, 1]), 2);
        assert_eq!(Pattern::AnySegment.count(&[0, 1, 0]), 3);
        assert_eq!(bigram.width(), 2);
    }

    #[test]
    fn test_violation_profile() {
        let set = ConstraintSet::compile(&voice_index(), 1);
        // "bpb": length 3, two voiced, one voiceless
        assert_eq!(set.violation_profile(&[1, 0, 1]), vec![-3.0, -2.0, -1.0]);
    }

    #[test]
    fn test_combinatorics() {
        assert_eq!(
            combinations(4, 2),
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(
            combinations_with_replacement(2, 2),
            vec![vec![0, 0], vec![0, 1], vec![1, 1]]
        );
        let mut perm = vec![0, 0, 1];
        let mut seen = vec![perm.clone()];
        while next_permutation(&mut perm) {
            seen.push(perm.clone());
        }
        assert_eq!(seen, vec![vec![0, 0, 1], vec![0, 1, 0], vec![1, 0, 0]]);
    }
}
