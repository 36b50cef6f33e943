//! Per-epoch probability records and where they go.

use crate::core::{format_probability, PfaResult};
use serde::Serialize;
use std::io::Write;

/// Column names of the CSV log.
pub const CSV_HEADER: [&str; 6] = ["Language", "Rep", "Epoch", "Word", "TD_Prob", "LE_Prob"];

/// Training and learned probability of one test word after one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    pub language: String,
    pub rep: usize,
    pub epoch: usize,
    pub word: String,
    /// Mass of the word in the training distribution
    pub td_prob: f64,
    /// Probability the learner currently assigns
    pub le_prob: f64,
}

/// Destination for epoch records.
pub trait OutputSink {
    fn record(&mut self, record: &EpochRecord) -> PfaResult<()>;

    /// Flush buffered output. Called once after the last record.
    fn finish(&mut self) -> PfaResult<()> {
        Ok(())
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn record(&mut self, record: &EpochRecord) -> PfaResult<()> {
        (**self).record(record)
    }

    fn finish(&mut self) -> PfaResult<()> {
        (**self).finish()
    }
}

/// Comma-separated log with a `Language,Rep,Epoch,Word,TD_Prob,LE_Prob` header.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> PfaResult<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(CSV_HEADER)?;
        Ok(Self { writer })
    }
}

impl<W: Write> OutputSink for CsvSink<W> {
    fn record(&mut self, record: &EpochRecord) -> PfaResult<()> {
        self.writer.write_record([
            record.language.as_str(),
            &record.rep.to_string(),
            &record.epoch.to_string(),
            record.word.as_str(),
            &format_probability(record.td_prob),
            &format_probability(record.le_prob),
        ])?;
        Ok(())
    }

    fn finish(&mut self) -> PfaResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// One JSON object per line.
pub struct JsonlSink<W: Write> {
    inner: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> OutputSink for JsonlSink<W> {
    fn record(&mut self, record: &EpochRecord) -> PfaResult<()> {
        serde_json::to_writer(&mut self.inner, record)?;
        writeln!(self.inner)?;
        Ok(())
    }

    fn finish(&mut self) -> PfaResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<EpochRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for MemorySink {
    fn record(&mut self, record: &EpochRecord) -> PfaResult<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
