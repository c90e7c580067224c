//! Telemetry export.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use tracing::warn;

use crate::config::CsvConfig;

/// Comma-separated sample log.
///
/// Rows carry a fixed `Shot,Frame,Sampled` prefix followed by the configured
/// value columns. A failed write is retried once; a second failure disables
/// the sink for the rest of the run so telemetry trouble never aborts a
/// search.
#[derive(Debug)]
pub struct CsvSink {
    writer: Option<BufWriter<File>>,
    sample_period: u64,
    rows: u64,
}

impl CsvSink {
    /// Opens the sink and writes the header row.
    ///
    /// Open or header failures disable the sink immediately.
    pub fn create(config: &CsvConfig) -> Self {
        let mut sink = Self {
            writer: None,
            sample_period: config.sample_period,
            rows: 0,
        };
        match File::create(&config.path) {
            Ok(file) => {
                sink.writer = Some(BufWriter::new(file));
                let mut header = String::from("Shot,Frame,Sampled");
                for label in &config.labels {
                    header.push(',');
                    header.push_str(label);
                }
                sink.write_line(&header);
            }
            Err(error) => {
                warn!(path = %config.path.display(), %error, "csv export disabled");
            }
        }
        sink
    }

    /// Whether the sink can still accept rows.
    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    /// Rows written, header excluded.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Whether the `count`-th accepted pellet should be sampled.
    pub fn should_sample(&self, count: u64) -> bool {
        self.writer.is_some() && count % self.sample_period == 0
    }

    /// Appends one sample row.
    pub fn record(&mut self, shot: u64, frame: u64, sampled: u64, values: &[f64]) {
        if self.writer.is_none() {
            return;
        }
        let mut line = format!("{shot},{frame},{sampled}");
        for value in values {
            line.push(',');
            line.push_str(&value.to_string());
        }
        if self.write_line(&line) {
            self.rows += 1;
        }
    }

    /// Flushes buffered rows to disk.
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut()
            && let Err(error) = writer.flush()
        {
            warn!(%error, "csv flush failed, export disabled");
            self.writer = None;
        }
    }

    fn write_line(&mut self, line: &str) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        if Self::try_write(writer, line).is_ok() {
            return true;
        }
        // One retry; writers that fail twice stay broken.
        if let Err(error) = Self::try_write(writer, line) {
            warn!(%error, "csv write failed twice, export disabled");
            self.writer = None;
            return false;
        }
        true
    }

    fn try_write(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }
}
