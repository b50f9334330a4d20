//! RecordStore - the on-disk contact table
//!
//! A flat comma-delimited file with a fixed header row. Emails are the
//! unique key: an upsert of an existing email rewrites that row in place,
//! a new email is appended. Phones are a de-facto secondary lookup key
//! (not unique). Every operation opens, reads/writes, and closes the file
//! within its own call; nothing is held open across requests.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Header row written when the table file is first created.
pub const TABLE_HEADER: &str = "name,email,phone,age";

/// One stored contact record.
///
/// All fields are kept as text, including `age` - the table is a text
/// format and the wire protocol echoes values back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub age: String,
}

impl Record {
    /// Parse one table row. Returns None for rows that do not have
    /// exactly four fields (the format does not quote embedded commas,
    /// so such rows are undefined and skipped by scans).
    pub fn from_row(row: &str) -> Option<Record> {
        let mut fields = row.split(',');
        let record = Record {
            name: fields.next()?.to_string(),
            email: fields.next()?.to_string(),
            phone: fields.next()?.to_string(),
            age: fields.next()?.to_string(),
        };
        if fields.next().is_some() {
            return None;
        }
        Some(record)
    }

    /// Render as a table row.
    pub fn to_row(&self) -> String {
        format!("{},{},{},{}", self.name, self.email, self.phone, self.age)
    }
}

/// Durable upsert-by-email and scan-by-phone-set over a delimited file.
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or update a record, keyed by email.
    ///
    /// Creates the table file with its header row if missing. The whole
    /// table is rewritten into a temporary file in the same directory,
    /// which is then moved over the original with a single atomic rename;
    /// a crash at any point leaves either the old or the new table on
    /// disk, never a torn one. Updating an existing email is silent and
    /// replaces the full row, preserving its position.
    pub fn upsert(&self, record: &Record) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !self.path.exists() {
            fs::write(&self.path, format!("{}\n", TABLE_HEADER))?;
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let tmp_path = self.path.with_extension("csv.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);

        let mut replaced = false;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let is_match = index > 0
                && Record::from_row(&line)
                    .map(|existing| existing.email == record.email)
                    .unwrap_or(false);
            if is_match {
                writeln!(writer, "{}", record.to_row())?;
                replaced = true;
            } else {
                writeln!(writer, "{}", line)?;
            }
        }
        if !replaced {
            writeln!(writer, "{}", record.to_row())?;
        }

        writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Collect every row whose phone is in `phones`, in table order.
    ///
    /// An empty input returns immediately without touching storage. A
    /// table that was never written behaves like an empty one. Unknown
    /// phones contribute nothing; if duplicate phone rows exist they all
    /// surface.
    pub fn search(&self, phones: &[String]) -> Result<Vec<Record>> {
        if phones.is_empty() {
            return Ok(Vec::new());
        }
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let wanted: HashSet<&str> = phones.iter().map(String::as_str).collect();
        let reader = BufReader::new(File::open(&self.path)?);

        let mut matches = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if index == 0 {
                continue;
            }
            if let Some(record) = Record::from_row(&line) {
                if wanted.contains(record.phone.as_str()) {
                    matches.push(record);
                }
            }
        }
        Ok(matches)
    }
}
