//! Simulation driver: turns loaded tables into a trained learner per language.
//!
//! ## Preparation
//!
//! ```text
//! feature table ─► FeatureIndex ─(attention < 1)─► register ambiguous segments
//!                                   │
//! training data ─► max word length ─┴─► WordUniverse ─► ConstraintSet ─► ViolationMatrix
//! ```
//!
//! Everything that can fail on malformed input fails here or in the first
//! part of [`Simulation::run`], before any weight is updated.
//!
//! ## Loop
//!
//! For each language (file order), for each repetition, weights start at zero
//! and train for `epochs` epochs. The shuffle order of a language is kept
//! across epochs and repetitions. After every epoch the learner's probability
//! of each test word is recorded.

use crate::ambiguity::{AmbiguityResolver, AmbiguityTable};
use crate::constraints::ConstraintSet;
use crate::core::{FeatureIndex, PfaError, PfaResult};
use crate::data::{FeatureTable, Language, TrainingData};
use crate::output::{EpochRecord, OutputSink};
use crate::training::{Attention, AttentionGradientLearner};
use crate::universe::WordUniverse;
use crate::violations::{CacheKey, ViolationMatrix, ViolationStore};
use crate::Config;
use ndarray::Array1;
use rand::Rng;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Everything derived from the input tables, shared by all languages.
#[derive(Debug)]
pub struct PreparedRun {
    pub features: FeatureIndex,
    pub universe: WordUniverse,
    pub constraints: ConstraintSet,
    pub violations: ViolationMatrix,
    /// Present only when attention < 1
    pub resolver: Option<AmbiguityResolver>,
}

/// Build the universe, constraints and violation matrix for one run.
///
/// # Errors
/// - `InvalidConfig` on a bad config, or attention < 1 without an ambiguity table
/// - `MissingAmbiguity` if some set of ignored features has no table row
/// - `UnknownSegment` if a training word does not tokenize
pub fn prepare<S: ViolationStore + ?Sized>(
    feature_table: &FeatureTable,
    training: &TrainingData,
    ambiguity: Option<&AmbiguityTable>,
    config: &Config,
    store: &S,
    pattern: &str,
) -> PfaResult<PreparedRun> {
    config.validate()?;
    let mut features = feature_table.to_index()?;

    let map = if config.attention < 1.0 {
        let table = ambiguity.ok_or_else(|| {
            PfaError::InvalidConfig(format!(
                "Attention {} requires an ambiguous-segment table",
                config.attention
            ))
        })?;
        let map = table.register(&mut features)?;
        map.require_coverage(features.feature_names())?;
        Some(map)
    } else {
        if ambiguity.is_some() {
            debug!("full attention, ambiguous-segment table ignored");
        }
        None
    };

    let max_len = training.max_word_length(&features)?;
    let universe = WordUniverse::enumerate(&features, max_len, config.universe)?;
    let resolver = map
        .map(|m| AmbiguityResolver::build(&m, &features, &universe))
        .transpose()?;
    let constraints = ConstraintSet::compile(&features, max_len);
    info!(
        segments = features.segment_count(),
        max_len,
        words = universe.len(),
        constraints = constraints.len(),
        "run prepared"
    );

    let key = CacheKey {
        pattern: pattern.to_string(),
        attention: config.attention,
        shape: config.universe,
    };
    let violations = ViolationMatrix::load_or_build(store, &key, &universe, &constraints);

    Ok(PreparedRun {
        features,
        universe,
        constraints,
        violations,
        resolver,
    })
}

/// Uniform mass over a language's distinct grammatical words.
#[derive(Debug, Clone)]
pub struct TrainingDistribution {
    pub probs: Array1<f64>,
    /// Sorted universe indices of the grammatical words
    pub grammatical: Vec<usize>,
}

impl TrainingDistribution {
    pub fn new(
        language: &Language,
        features: &FeatureIndex,
        universe: &WordUniverse,
    ) -> PfaResult<Self> {
        let grammatical: BTreeSet<usize> = language
            .words
            .iter()
            .map(|w| universe.index_of(features, w))
            .collect::<PfaResult<_>>()?;
        if grammatical.is_empty() {
            return Err(PfaError::InvalidConfig(format!(
                "Language '{}' has no grammatical words",
                language.name
            )));
        }

        let mass = 1.0 / grammatical.len() as f64;
        let mut probs = Array1::zeros(universe.len());
        for &i in &grammatical {
            probs[i] = mass;
        }
        Ok(Self {
            probs,
            grammatical: grammatical.into_iter().collect(),
        })
    }
}

/// Final weights of one language after its last repetition.
#[derive(Debug, Clone)]
pub struct LanguageOutcome {
    pub name: String,
    pub final_weights: Array1<f64>,
}

impl LanguageOutcome {
    /// Constraint names paired with weights, heaviest first.
    pub fn ranked<'c>(&self, constraints: &'c ConstraintSet) -> Vec<(&'c str, f64)> {
        let mut ranked: Vec<(&str, f64)> = constraints
            .iter()
            .zip(self.final_weights.iter())
            .map(|(c, &w)| (c.name.as_str(), w))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulationSummary {
    pub languages: Vec<LanguageOutcome>,
    /// Records written to the sink
    pub records: usize,
}

/// Drives training of every language over a prepared run.
pub struct Simulation<'a> {
    run: &'a PreparedRun,
    config: &'a Config,
}

impl<'a> Simulation<'a> {
    pub fn new(run: &'a PreparedRun, config: &'a Config) -> Self {
        Self { run, config }
    }

    fn learner(&self) -> PfaResult<AttentionGradientLearner<'a>> {
        let run: &'a PreparedRun = self.run;
        let learner = AttentionGradientLearner::new(&run.violations, self.config.eta);
        match &run.resolver {
            Some(resolver) => {
                let attention = Attention::new(self.config.attention, &run.features, resolver)?;
                Ok(learner.with_attention(attention))
            }
            None => Ok(learner),
        }
    }

    /// Train every language and stream records into `sink`.
    ///
    /// All words are resolved against the universe before training starts,
    /// so a bad word aborts the run without partial output.
    pub fn run<S, R>(
        &self,
        training: &TrainingData,
        sink: &mut S,
        rng: &mut R,
    ) -> PfaResult<SimulationSummary>
    where
        S: OutputSink + ?Sized,
        R: Rng + ?Sized,
    {
        let run = self.run;
        let distributions = training
            .languages
            .iter()
            .map(|l| TrainingDistribution::new(l, &run.features, &run.universe))
            .collect::<PfaResult<Vec<_>>>()?;
        let nonce = training
            .nonce
            .iter()
            .map(|w| run.universe.index_of(&run.features, w))
            .collect::<PfaResult<Vec<usize>>>()?;

        let learner = self.learner()?;
        let mut summary = SimulationSummary::default();

        for (language, distribution) in training.languages.iter().zip(&distributions) {
            let test_words: BTreeSet<usize> = distribution
                .grammatical
                .iter()
                .chain(&nonce)
                .copied()
                .collect();
            info!(
                language = %language.name,
                grammatical = distribution.grammatical.len(),
                test_words = test_words.len(),
                "training language"
            );

            let mut order: Vec<usize> = (0..run.universe.len()).collect();
            let mut weights = Array1::zeros(run.constraints.len());

            for rep in 0..self.config.reps {
                weights.fill(0.0);
                for epoch in 0..self.config.epochs {
                    let (updated, metrics) = learner
                        .train_epoch(weights, &mut order, &distribution.probs, rng, true)
                        .map_err(|e| match e {
                            PfaError::NonFiniteWeight { constraint, word } => {
                                PfaError::NumericalInstability(format!(
                                    "language '{}', rep {}, epoch {}: weight of '{}' became non-finite after training on '{}'",
                                    language.name,
                                    rep,
                                    epoch,
                                    run.constraints.get(constraint).name,
                                    run.universe.spelling(word)
                                ))
                            }
                            other => other,
                        })?;
                    weights = updated;

                    if epoch % self.config.progress_every == 0 {
                        info!(epoch, language = %language.name, rep, "training progress");
                    }
                    debug!(
                        epoch,
                        rep,
                        samples = metrics.num_samples,
                        neutralized = metrics.num_neutralized,
                        "epoch complete"
                    );

                    let probs = learner.model().distribution(&weights)?;
                    for &word in &test_words {
                        sink.record(&EpochRecord {
                            language: language.name.clone(),
                            rep,
                            epoch,
                            word: run.universe.spelling(word).to_string(),
                            td_prob: distribution.probs[word],
                            le_prob: probs[word],
                        })?;
                        summary.records += 1;
                    }
                }
            }

            summary.languages.push(LanguageOutcome {
                name: language.name.clone(),
                final_weights: weights,
            });
        }

        sink.finish()?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read_ambiguity_table;
    use crate::output::MemorySink;
    use crate::universe::UniverseShape;
    use crate::violations::MemoryViolationStore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn voice_table() -> FeatureTable {
        FeatureTable::from_reader("seg,voice\np,-\nb,+\n".as_bytes()).expect("features")
    }

    fn training(text: &str) -> TrainingData {
        TrainingData::from_reader(text.as_bytes()).expect("training")
    }

    fn config(epochs: usize, eta: f64, attention: f64, reps: usize) -> Config {
        Config {
            epochs,
            eta,
            attention,
            reps,
            ..Config::default()
        }
    }

    #[test]
    fn test_prepare_voice() {
        let store = MemoryViolationStore::new();
        let run = prepare(
            &voice_table(),
            &training("L1,b\n"),
            None,
            &Config::default(),
            &store,
            "Voice",
        )
        .expect("prepare");
        assert_eq!(run.universe.len(), 2);
        assert_eq!(run.constraints.len(), 3);
        assert_eq!(run.violations.dim(), (2, 3));
        assert!(run.resolver.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_attention_requires_table() {
        let store = MemoryViolationStore::new();
        let err = prepare(
            &voice_table(),
            &training("L1,b\n"),
            None,
            &config(1, 0.1, 0.5, 1),
            &store,
            "Voice",
        );
        assert!(matches!(err, Err(PfaError::InvalidConfig(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_words_counted_once() {
        let table = voice_table();
        let data = training("L1,b,b,p\n");
        let store = MemoryViolationStore::new();
        let run = prepare(&table, &data, None, &Config::default(), &store, "Voice")
            .expect("prepare");
        let dist = TrainingDistribution::new(&data.languages[0], &run.features, &run.universe)
            .expect("distribution");
        assert_eq!(dist.grammatical.len(), 2);
        assert!((dist.probs.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_epoch_raises_trained_word() {
        let data = training("L1,b\n");
        let store = MemoryViolationStore::new();
        let cfg = config(1, 1.0, 1.0, 1);
        let run = prepare(&voice_table(), &data, None, &cfg, &store, "Voice").expect("prepare");
        let mut sink = MemorySink::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let summary = Simulation::new(&run, &cfg)
            .run(&data, &mut sink, &mut rng)
            .expect("run");

        assert_eq!(summary.records, 1);
        let record = &sink.records[0];
        assert_eq!(record.word, "b");
        assert_eq!(record.td_prob, 1.0);
        assert!(record.le_prob > 0.5);

        let ranked = summary.languages[0].ranked(&run.constraints);
        assert_eq!(ranked.len(), 3);
        assert!(ranked[0].1 >= ranked[2].1);
    }

    #[test]
    fn test_nonce_words_are_recorded() {
        let data = training("L1,b\nNonce,p\n");
        let store = MemoryViolationStore::new();
        let cfg = config(2, 0.1, 1.0, 2);
        let run = prepare(&voice_table(), &data, None, &cfg, &store, "Voice").expect("prepare");
        let mut sink = MemorySink::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let summary = Simulation::new(&run, &cfg)
            .run(&data, &mut sink, &mut rng)
            .expect("run");

        // 2 reps × 2 epochs × {b, p}
        assert_eq!(summary.records, 8);
        let nonce: Vec<_> = sink.records.iter().filter(|r| r.word == "p").collect();
        assert_eq!(nonce.len(), 4);
        assert!(nonce.iter().all(|r| r.td_prob == 0.0));
        assert_eq!(sink.records[0].rep, 0);
        assert_eq!(sink.records[7].rep, 1);
    }

    #[test]
    fn test_unknown_nonce_word_aborts_before_output() {
        let data = training("L1,b\nNonce,bb\n");
        let store = MemoryViolationStore::new();
        let cfg = config(1, 0.1, 1.0, 1);
        let run = prepare(&voice_table(), &data, None, &cfg, &store, "Voice").expect("prepare");
        let mut sink = MemorySink::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = Simulation::new(&run, &cfg).run(&data, &mut sink, &mut rng);
        assert!(matches!(err, Err(PfaError::WordTooLong { .. })));
        assert!(sink.records.is_empty());
    }

    #[test]
    fn test_instability_names_language_and_word() {
        let features = voice_table().to_index().expect("index");
        let universe = WordUniverse::enumerate(&features, 1, UniverseShape::UpTo).expect("universe");
        let constraints = ConstraintSet::compile(&features, 1);
        // Bias, [+voice], [-voice] over {b, p}, scaled so the second step overflows
        let violations = ViolationMatrix::from_array(ndarray::array![
            [-1e308, -1e308, 0.0],
            [-1e308, 0.0, -1e308],
        ]);
        let run = PreparedRun {
            features,
            universe,
            constraints,
            violations,
            resolver: None,
        };
        let data = training("L1,b\n");
        let cfg = config(1, 1.0, 1.0, 1);
        let mut sink = MemorySink::new();
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        match Simulation::new(&run, &cfg).run(&data, &mut sink, &mut rng) {
            Err(PfaError::NumericalInstability(msg)) => {
                assert!(msg.contains("language 'L1', rep 0, epoch 0"), "{}", msg);
                assert!(
                    msg.contains("training on 'b'") || msg.contains("training on 'p'"),
                    "{}",
                    msg
                );
            }
            other => panic!("expected NumericalInstability, got {:?}", other),
        }
        assert!(sink.records.is_empty());
    }

    #[test]
    fn test_attention_run_is_deterministic() {
        let data = training("L1,b\n");
        let ambiguity = read_ambiguity_table(",p,b\nvoice,P,P\n".as_bytes()).expect("table");
        let cfg = Config {
            seed: Some(7),
            ..config(5, 0.2, 0.5, 2)
        };
        let store = MemoryViolationStore::new();
        let run = prepare(&voice_table(), &data, Some(&ambiguity), &cfg, &store, "Voice")
            .expect("prepare");
        assert_eq!(run.universe.len(), 3);
        assert!(run.resolver.is_some());

        let simulate = || {
            let mut sink = MemorySink::new();
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            Simulation::new(&run, &cfg)
                .run(&data, &mut sink, &mut rng)
                .expect("run");
            sink.records
        };
        assert_eq!(simulate(), simulate());
    }
}
