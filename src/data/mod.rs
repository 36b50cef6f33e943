//! Input tables: feature table, training data, ambiguous segments.
//!
//! All three are comma-separated files without quoting conventions of their
//! own. Rows may have different lengths and blank cells are ignored where the
//! format allows. A pattern name selects one set of files in a data directory:
//! ```text
//! <pattern>_Features.csv   header: label,f1,f2,...    rows: seg,+,-,...
//! <pattern>_TD.csv         rows: language,word,word,...   ("Nonce" row: probe words)
//! <pattern>_AmSegs.csv     header: label,seg1,seg2,...    rows: f1+f2,amb1,amb2,...
//! ```

use crate::ambiguity::{AmbiguityKey, AmbiguityTable};
use crate::core::{format_probability, FeatureIndex, PfaError, PfaResult, Polarity};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Reserved training-data row holding held-out probe words.
pub const NONCE_LANGUAGE: &str = "Nonce";

fn csv_rows<R: Read>(reader: R) -> PfaResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Parsed feature table.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub feature_names: Vec<String>,
    /// (segment symbol, one value per feature)
    pub rows: Vec<(String, Vec<Polarity>)>,
}

impl FeatureTable {
    pub fn from_path(path: &Path) -> PfaResult<Self> {
        Self::from_reader(open(path)?)
    }

    /// # Errors
    /// - `InvalidConfig` on a missing header, a cell other than `+`/`-`, or an empty table
    /// - `ShapeMismatch` if a row's width differs from the header's
    pub fn from_reader<R: Read>(reader: R) -> PfaResult<Self> {
        let mut rows = csv_rows(reader)?.into_iter();
        let header = rows
            .next()
            .ok_or_else(|| PfaError::InvalidConfig("Feature table is empty".to_string()))?;
        let feature_names: Vec<String> = header.into_iter().skip(1).collect();

        let mut parsed = Vec::new();
        for row in rows {
            let mut cells = row.into_iter();
            let segment = cells.next().unwrap_or_default();
            let values: Vec<String> = cells.collect();
            if values.len() != feature_names.len() {
                return Err(PfaError::ShapeMismatch(format!(
                    "Feature row '{}' has {} values, header has {} features",
                    segment,
                    values.len(),
                    feature_names.len()
                )));
            }
            let values = values
                .iter()
                .zip(&feature_names)
                .map(|(cell, feature)| {
                    Polarity::parse(cell).ok_or_else(|| {
                        PfaError::InvalidConfig(format!(
                            "Segment '{}', feature '{}': expected + or -, got '{}'",
                            segment, feature, cell
                        ))
                    })
                })
                .collect::<PfaResult<Vec<Polarity>>>()?;
            parsed.push((segment, values));
        }

        if parsed.is_empty() {
            return Err(PfaError::InvalidConfig(
                "Feature table has no segments".to_string(),
            ));
        }
        Ok(Self {
            feature_names,
            rows: parsed,
        })
    }

    /// Build the [`FeatureIndex`] in row order.
    pub fn to_index(&self) -> PfaResult<FeatureIndex> {
        let mut index = FeatureIndex::new(self.feature_names.clone())?;
        for (segment, values) in &self.rows {
            index.add_segment(segment, values)?;
        }
        Ok(index)
    }
}

/// A training language: a name and its grammatical words.
#[derive(Debug, Clone, PartialEq)]
pub struct Language {
    pub name: String,
    pub words: Vec<String>,
}

/// Training languages in file order, plus nonce probe words.
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub languages: Vec<Language>,
    pub nonce: Vec<String>,
}

impl TrainingData {
    pub fn from_path(path: &Path) -> PfaResult<Self> {
        Self::from_reader(open(path)?)
    }

    /// # Errors
    /// - `InvalidConfig` on a duplicate language name, a language with no
    ///   words, or a file with no languages
    pub fn from_reader<R: Read>(reader: R) -> PfaResult<Self> {
        let mut data = TrainingData::default();
        let mut names = HashSet::new();

        for row in csv_rows(reader)? {
            let mut cells = row.into_iter();
            let name = cells.next().unwrap_or_default();
            let words: Vec<String> = cells.filter(|w| !w.is_empty()).collect();

            if name == NONCE_LANGUAGE {
                data.nonce.extend(words);
                continue;
            }
            if !names.insert(name.clone()) {
                return Err(PfaError::InvalidConfig(format!(
                    "Duplicate language '{}' in training data",
                    name
                )));
            }
            if words.is_empty() {
                return Err(PfaError::InvalidConfig(format!(
                    "Language '{}' has no grammatical words",
                    name
                )));
            }
            data.languages.push(Language { name, words });
        }

        if data.languages.is_empty() {
            return Err(PfaError::InvalidConfig(
                "Training data has no languages".to_string(),
            ));
        }
        Ok(data)
    }

    /// Longest grammatical word, in segments. Nonce words do not count.
    pub fn max_word_length(&self, features: &FeatureIndex) -> PfaResult<usize> {
        let mut max = 0;
        for language in &self.languages {
            for word in &language.words {
                max = max.max(features.tokenize(word)?.len());
            }
        }
        Ok(max)
    }
}

/// Parse an ambiguous-segment table.
///
/// # Errors
/// - `InvalidConfig` if the table is empty
/// - `ShapeMismatch` if a row's width differs from the header's
pub fn read_ambiguity_table<R: Read>(reader: R) -> PfaResult<AmbiguityTable> {
    let mut rows = csv_rows(reader)?.into_iter();
    let header = rows.next().ok_or_else(|| {
        PfaError::InvalidConfig("Ambiguous-segment table is empty".to_string())
    })?;
    let unambiguous: Vec<String> = header.into_iter().skip(1).collect();

    let parsed = rows
        .map(|row| {
            let mut cells = row.into_iter();
            let key = AmbiguityKey::parse(&cells.next().unwrap_or_default());
            (key, cells.collect())
        })
        .collect();
    AmbiguityTable::new(unambiguous, parsed)
}

pub fn load_ambiguity_table(path: &Path) -> PfaResult<AmbiguityTable> {
    read_ambiguity_table(open(path)?)
}

fn open(path: &Path) -> PfaResult<std::fs::File> {
    std::fs::File::open(path).map_err(|e| {
        PfaError::InvalidConfig(format!("Cannot open {}: {}", path.display(), e))
    })
}

/// File naming for one pattern's inputs and outputs.
#[derive(Debug, Clone)]
pub struct PatternFiles {
    data_dir: PathBuf,
    output_dir: PathBuf,
    pattern: String,
}

impl PatternFiles {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn features(&self) -> PathBuf {
        self.data_dir.join(format!("{}_Features.csv", self.pattern))
    }

    pub fn training(&self) -> PathBuf {
        self.data_dir.join(format!("{}_TD.csv", self.pattern))
    }

    pub fn ambiguous_segments(&self) -> PathBuf {
        self.data_dir.join(format!("{}_AmSegs.csv", self.pattern))
    }

    /// Per-epoch log, `<pattern>_output (attention=<a>).<extension>`.
    pub fn output(&self, attention: f64, extension: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}_output (attention={}).{}",
            self.pattern,
            format_probability(attention),
            extension
        ))
    }
}
