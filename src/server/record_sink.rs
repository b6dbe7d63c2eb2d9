//! Durable storage of finished games as JSON lines, one file per run.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;

use crate::msg::GameRecord;

/// Appends every finished game to a timestamped `.jsonl` file, so a
/// training run can be replayed or resumed from disk.
pub struct RecordSink {
    path: PathBuf,
    writer: BufWriter<File>,
    num_written: u64,
}

impl RecordSink {
    pub fn new(dir: impl AsRef<Path>) -> crate::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let filename = format!("games-{}.jsonl", Local::now().format("%Y%m%d-%H%M%S"));
        let path = dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("writing game records to {}", path.display());
        Ok(RecordSink {
            path,
            writer: BufWriter::new(file),
            num_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_written(&self) -> u64 {
        self.num_written
    }

    pub fn write(&mut self, record: &GameRecord) -> crate::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.num_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> crate::Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Loads records back from a `.jsonl` file written by a sink.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Vec<GameRecord>> {
        let content = fs::read_to_string(path)?;
        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}
