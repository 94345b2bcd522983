//! JSON-lines engine: one `<table>.jsonl` file per table inside a directory.
//!
//! There is no per-record sync state, so this engine does not sync.

use crate::model::MessageData;
use crate::storage::{validate_table, Engine, StorageError};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub struct JsonEngine {
    dir: PathBuf,
    host: Option<String>,
    files: HashMap<String, File>,
    closed: bool,
}

impl JsonEngine {
    /// Open (or create) the directory at `dir`.
    pub fn open(dir: impl Into<PathBuf>, host: Option<String>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            host,
            files: HashMap::new(),
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.jsonl"))
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Engine for JsonEngine {
    fn save(&mut self, data: &MessageData, table: &str) -> Result<(), StorageError> {
        self.check_open()?;
        validate_table(table)?;

        let line = serde_json::to_string(data)?;
        if !self.files.contains_key(table) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.table_path(table))?;
            self.files.insert(table.to_string(), file);
        }
        if let Some(file) = self.files.get_mut(table) {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    fn start_sync(&mut self, _table: &str) -> Result<usize, StorageError> {
        self.check_open()?;
        if self.host.is_none() {
            return Ok(0);
        }
        Err(StorageError::SyncUnsupported("json"))
    }

    fn records(&mut self, table: &str) -> Result<Vec<MessageData>, StorageError> {
        self.check_open()?;
        validate_table(table)?;

        if let Some(file) = self.files.get_mut(table) {
            file.flush()?;
        }

        let path = self.table_path(table);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for line in BufReader::new(File::open(path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        for file in self.files.values_mut() {
            file.flush()?;
        }
        self.files.clear();
        self.closed = true;
        Ok(())
    }
}
