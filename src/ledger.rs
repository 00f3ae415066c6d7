//! Persistent record of which notes have been extracted and converted.
//!
//! One row per note guid. A note counts as converted only while its source
//! modification time is not newer than the recorded extraction time, so an
//! edit in WizNote after a run invalidates the earlier conversion.

use crate::importer::{Note, TIMESTAMP_FORMAT, parse_timestamp};
use chrono::{Local, NaiveDateTime};
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Params, params};
use std::fs;
use std::path::Path;
use tracing::{debug, error, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS wiz_convertor (
    guid TEXT PRIMARY KEY,
    location TEXT NOT NULL,
    name TEXT NOT NULL,
    title TEXT NOT NULL,
    file_name TEXT,
    success INTEGER,
    extract_time TIMESTAMP
);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub guid: String,
    pub location: String,
    pub name: String,
    pub title: String,
    pub file_name: Option<String>,
    pub success: bool,
    pub extract_time: Option<String>,
}

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open the ledger at `path`, creating the file and table on first run.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .wrap_err_with(|| format!("Failed to open ledger: {}", path.display()))?;
        debug!("ledger opened at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().wrap_err("Failed to open in-memory ledger")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .wrap_err("Failed to create ledger table")?;
        Ok(Self { conn })
    }

    /// True iff a success record exists and the source has not changed since
    /// it was extracted. Disagreeing rows (success without an extraction
    /// time) count as not converted.
    pub fn is_converted(&self, note: &Note) -> rusqlite::Result<bool> {
        let row: Option<(Option<i64>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT success, extract_time FROM wiz_convertor WHERE guid = ?1",
                [&note.guid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((Some(1), extract_time)) => !modified_after(note, extract_time.as_deref()),
            _ => false,
        })
    }

    /// True when the note has never been extracted or was edited since.
    pub fn is_stale(&self, note: &Note) -> rusqlite::Result<bool> {
        let extract_time: Option<String> = self
            .conn
            .query_row(
                "SELECT extract_time FROM wiz_convertor WHERE guid = ?1",
                [&note.guid],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(modified_after(note, extract_time.as_deref()))
    }

    pub fn record_extraction(&self, guid: &str) -> rusqlite::Result<()> {
        self.record_extraction_at(guid, Local::now().naive_local())
    }

    pub(crate) fn record_extraction_at(&self, guid: &str, at: NaiveDateTime) -> rusqlite::Result<()> {
        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        let changed = self.write(
            "UPDATE wiz_convertor SET extract_time = ?1 WHERE guid = ?2",
            params![stamp, guid],
        )?;
        if changed == 0 {
            warn!("extraction of {} recorded for a note missing from the ledger", guid);
        }
        Ok(())
    }

    /// Fails when the note has no ledger row, since the result would be lost
    /// and the note reconverted on every run.
    pub fn record_result(&self, guid: &str, success: bool) -> rusqlite::Result<()> {
        let changed = self.write(
            "UPDATE wiz_convertor SET success = ?1 WHERE guid = ?2",
            params![success, guid],
        )?;
        if changed == 0 {
            error!("result of {} recorded for a note missing from the ledger", guid);
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        Ok(())
    }

    /// Insert a row for `note` unless one already exists; existing rows are
    /// never overwritten.
    pub fn register_if_absent(&self, note: &Note) -> rusqlite::Result<bool> {
        let inserted = self.write(
            "INSERT INTO wiz_convertor (guid, location, name, title, file_name)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(guid) DO NOTHING",
            params![
                note.guid,
                note.location,
                note.name,
                note.title,
                note.output_file_name
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn entry(&self, guid: &str) -> rusqlite::Result<Option<LedgerEntry>> {
        self.conn
            .query_row(
                "SELECT guid, location, name, title, file_name, success, extract_time
                 FROM wiz_convertor WHERE guid = ?1",
                [guid],
                |row| {
                    Ok(LedgerEntry {
                        guid: row.get(0)?,
                        location: row.get(1)?,
                        name: row.get(2)?,
                        title: row.get(3)?,
                        file_name: row.get(4)?,
                        success: row.get::<_, Option<i64>>(5)? == Some(1),
                        extract_time: row.get(6)?,
                    })
                },
            )
            .optional()
    }

    /// Run one statement in its own transaction. Dropping the transaction
    /// on error rolls it back.
    fn write<P: Params>(&self, sql: &str, params: P) -> rusqlite::Result<usize> {
        self.transact(sql, params)
            .inspect_err(|e| error!("ledger write failed: {}", e))
    }

    fn transact<P: Params>(&self, sql: &str, params: P) -> rusqlite::Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(sql, params)?;
        tx.commit()?;
        Ok(changed)
    }
}

fn modified_after(note: &Note, extract_time: Option<&str>) -> bool {
    match (extract_time.and_then(parse_timestamp), note.modified_at()) {
        (Some(extracted), Some(modified)) => extracted < modified,
        _ => true,
    }
}
