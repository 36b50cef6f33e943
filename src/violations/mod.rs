//! Violation matrix construction and caching.
//!
//! ```text
//! V[w, c] = -count(constraint c, word w)
//! ```
//!
//! Rows follow [`WordUniverse`] indices and columns follow [`ConstraintSet`]
//! indices. The matrix is immutable once built. Building is the slowest part
//! of a run, so a [`ViolationStore`] can hand back a previously saved matrix.
//! A store lookup is a two-state result ([`CacheLookup`]); a missing,
//! unreadable or wrongly shaped cache is a miss, never an error.

use crate::constraints::ConstraintSet;
use crate::core::{format_probability, PfaError, PfaResult};
use crate::universe::{UniverseShape, WordUniverse};
use ndarray::{Array2, ArrayView1};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// |WordUniverse| × |Constraints| matrix of negated match counts.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationMatrix {
    values: Array2<f64>,
}

impl ViolationMatrix {
    /// Count every constraint in every word.
    pub fn build(universe: &WordUniverse, constraints: &ConstraintSet) -> Self {
        let values = Array2::from_shape_fn((universe.len(), constraints.len()), |(w, c)| {
            -(constraints.get(c).pattern.count(universe.word(w)) as f64)
        });
        Self { values }
    }

    /// Wrap precomputed values.
    pub fn from_array(values: Array2<f64>) -> Self {
        Self { values }
    }

    /// Load from `store` if it holds a matrix of the right shape, else build
    /// and offer the result back to the store.
    pub fn load_or_build<S: ViolationStore + ?Sized>(
        store: &S,
        key: &CacheKey,
        universe: &WordUniverse,
        constraints: &ConstraintSet,
    ) -> Self {
        let expected = (universe.len(), constraints.len());
        match store.load(key) {
            CacheLookup::Hit(matrix) if matrix.dim() == expected => {
                info!(key = %key, "violation profiles loaded from cache");
                return matrix;
            }
            CacheLookup::Hit(matrix) => {
                warn!(
                    key = %key,
                    cached = ?matrix.dim(),
                    expected = ?expected,
                    "cached violation matrix has the wrong shape, rebuilding"
                );
            }
            CacheLookup::Miss => {}
        }

        info!(
            key = %key,
            words = expected.0,
            constraints = expected.1,
            "computing violation profiles from scratch"
        );
        let matrix = Self::build(universe, constraints);
        if let Err(e) = store.save(key, &matrix) {
            warn!(key = %key, error = %e, "failed to cache violation matrix");
        }
        matrix
    }

    /// (words, constraints)
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Violation profile of word `index`.
    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.row(index)
    }
}

/// Identifies one cached matrix: input pattern, attention probability, universe shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub pattern: String,
    pub attention: f64,
    pub shape: UniverseShape,
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_Violations (attention={})",
            self.pattern,
            format_probability(self.attention)
        )?;
        if self.shape == UniverseShape::Exact {
            write!(f, " exact")?;
        }
        Ok(())
    }
}

/// Result of a store lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(ViolationMatrix),
    Miss,
}

/// Load-if-present / save-after-compute persistence for violation matrices.
///
/// Saved values must reload bit-identically.
pub trait ViolationStore {
    fn load(&self, key: &CacheKey) -> CacheLookup;
    fn save(&self, key: &CacheKey, matrix: &ViolationMatrix) -> PfaResult<()>;
}

/// Stores matrices as headerless CSV files, one row per word.
#[derive(Debug, Clone)]
pub struct CsvViolationStore {
    dir: PathBuf,
}

impl CsvViolationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.csv", key))
    }

    fn read(path: &Path) -> PfaResult<ViolationMatrix> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;

        let mut data = Vec::new();
        let mut rows = 0;
        let mut cols = None;
        for record in reader.records() {
            let record = record?;
            match cols {
                None => cols = Some(record.len()),
                Some(n) if n != record.len() => {
                    return Err(PfaError::ShapeMismatch(format!(
                        "row {} has {} columns, expected {}",
                        rows,
                        record.len(),
                        n
                    )))
                }
                Some(_) => {}
            }
            for cell in record.iter() {
                let value: f64 = cell.trim().parse().map_err(|_| {
                    PfaError::InvalidConfig(format!("bad violation value '{}'", cell))
                })?;
                data.push(value);
            }
            rows += 1;
        }

        let values = Array2::from_shape_vec((rows, cols.unwrap_or(0)), data)
            .map_err(|e| PfaError::ShapeMismatch(e.to_string()))?;
        Ok(ViolationMatrix { values })
    }
}

impl ViolationStore for CsvViolationStore {
    fn load(&self, key: &CacheKey) -> CacheLookup {
        let path = self.path_for(key);
        if !path.exists() {
            return CacheLookup::Miss;
        }
        match Self::read(&path) {
            Ok(matrix) => CacheLookup::Hit(matrix),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable violation cache");
                CacheLookup::Miss
            }
        }
    }

    fn save(&self, key: &CacheKey, matrix: &ViolationMatrix) -> PfaResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let file = File::create(self.path_for(key))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        for row in matrix.values.rows() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// In-process store keyed by the rendered [`CacheKey`].
#[derive(Debug, Default)]
pub struct MemoryViolationStore {
    matrices: RefCell<HashMap<String, ViolationMatrix>>,
}

impl MemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.matrices.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.borrow().is_empty()
    }
}

impl ViolationStore for MemoryViolationStore {
    fn load(&self, key: &CacheKey) -> CacheLookup {
        match self.matrices.borrow().get(&key.to_string()) {
            Some(matrix) => CacheLookup::Hit(matrix.clone()),
            None => CacheLookup::Miss,
        }
    }

    fn save(&self, key: &CacheKey, matrix: &ViolationMatrix) -> PfaResult<()> {
        self.matrices
            .borrow_mut()
            .insert(key.to_string(), matrix.clone());
        Ok(())
    }
}
