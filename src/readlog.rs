//! Optional JSONL trace of every read attempt, one record per line.
//! Useful for plotting how a failing device behaved over a run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ReadRecord {
    pub pos: i64,
    pub size: i64,
    pub copied: i64,
    pub error: i64,
}

pub struct ReadLogger {
    writer: BufWriter<File>,
}

impl ReadLogger {
    pub fn create(path: &Path) -> io::Result<ReadLogger> {
        let file = File::create(path)?;
        Ok(ReadLogger {
            writer: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, rec: &ReadRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, rec)?;
        self.writer.write_all(b"\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
