//! In-memory index of every note, tag and attachment in a WizNote `index.db`.

use crate::importer::{Attachment, Note, NoteRecord, Tag, compute_nesting_names};
use crate::ledger::Ledger;
use eyre::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const NOTE_COLUMNS: &str = "
    DOCUMENT_GUID, DOCUMENT_TITLE, DOCUMENT_LOCATION, DOCUMENT_NAME,
    DOCUMENT_TYPE, DT_CREATED, DT_MODIFIED, DT_ACCESSED, DOCUMENT_URL,
    DOCUMENT_ATTACHEMENT_COUNT";

/// Lookup of notes by guid, used when rewriting links between notes.
pub trait NoteLookup {
    fn find_note(&self, guid: &str) -> Result<Option<Note>>;
}

pub struct Catalog {
    conn: Connection,
    wiz_dir: PathBuf,
    tags: Vec<Tag>,
    tag_index: HashMap<String, usize>,
    notes: Vec<Note>,
}

impl Catalog {
    /// Load the catalog from a (snapshot of a) WizNote `index.db`, opened
    /// read-only. Each note is registered in `ledger` as it is discovered.
    pub fn load(db_path: &Path, wiz_dir: &Path, ledger: &Ledger) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .wrap_err_with(|| format!("Failed to open WizNote database: {}", db_path.display()))?;
        Self::from_connection(conn, wiz_dir, ledger)
    }

    pub fn from_connection(conn: Connection, wiz_dir: &Path, ledger: &Ledger) -> Result<Self> {
        let mut catalog = Self {
            conn,
            wiz_dir: wiz_dir.to_path_buf(),
            tags: Vec::new(),
            tag_index: HashMap::new(),
            notes: Vec::new(),
        };

        // Tags first, so notes pick up nesting names when they are resolved
        let mut tags = catalog.query_tags().wrap_err("Failed to read tags")?;
        compute_nesting_names(&mut tags);
        catalog.tag_index = tags
            .iter()
            .enumerate()
            .map(|(i, t)| (t.guid.clone(), i))
            .collect();
        catalog.tags = tags;

        let records = catalog.query_notes().wrap_err("Failed to read notes")?;
        let mut notes = Vec::with_capacity(records.len());
        for record in records {
            let guid = record.guid.clone();
            let note = catalog
                .resolve(record)
                .wrap_err_with(|| format!("Failed to resolve note {}", guid))?;
            // A failed registration is already logged, and fails the note when its result is recorded.
            let _ = ledger.register_if_absent(&note);
            notes.push(note);
        }
        debug!("catalog loaded: {} notes, {} tags", notes.len(), catalog.tags.len());
        catalog.notes = notes;

        Ok(catalog)
    }

    /// All notes in load order.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    fn resolve(&self, record: NoteRecord) -> rusqlite::Result<Note> {
        let mut note = Note::from_record(record, &self.wiz_dir);
        note.resolve_attachments(self.query_attachments(&note.guid)?);
        note.resolve_tags(self.query_note_tags(&note.guid)?);
        Ok(note)
    }

    fn query_notes(&self) -> rusqlite::Result<Vec<NoteRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM WIZ_DOCUMENT", NOTE_COLUMNS))?;
        stmt.query_map([], read_note_record)?.collect()
    }

    fn query_note(&self, guid: &str) -> rusqlite::Result<Option<NoteRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM WIZ_DOCUMENT WHERE DOCUMENT_GUID = ?1", NOTE_COLUMNS),
                [guid],
                read_note_record,
            )
            .optional()
    }

    fn query_tags(&self) -> rusqlite::Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT TAG_GUID, TAG_NAME, TAG_GROUP_GUID FROM WIZ_TAG")?;
        stmt.query_map([], |row| {
            Ok(Tag::new(
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect()
    }

    fn query_attachments(&self, note_guid: &str) -> rusqlite::Result<Vec<Attachment>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT ATTACHMENT_GUID, DOCUMENT_GUID, ATTACHMENT_NAME, DT_DATA_MODIFIED
             FROM WIZ_DOCUMENT_ATTACHMENT
             WHERE DOCUMENT_GUID = ?1",
        )?;
        stmt.query_map([note_guid], |row| {
            Ok(Attachment {
                guid: row.get(0)?,
                note_guid: row.get(1)?,
                name: row.get(2)?,
                modified: row.get(3)?,
            })
        })?
        .collect()
    }

    /// Tags of one note, carrying the nesting names computed at load time.
    fn query_note_tags(&self, note_guid: &str) -> rusqlite::Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT WIZ_DOCUMENT_TAG.TAG_GUID, TAG_NAME
             FROM WIZ_DOCUMENT_TAG
             LEFT JOIN WIZ_TAG ON WIZ_DOCUMENT_TAG.TAG_GUID = WIZ_TAG.TAG_GUID
             WHERE DOCUMENT_GUID = ?1",
        )?;
        let rows = stmt.query_map([note_guid], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut tags = Vec::new();
        for row in rows {
            let (guid, name) = row?;
            match self.tag_index.get(&guid) {
                Some(&i) => tags.push(self.tags[i].clone()),
                None => match name {
                    Some(name) => tags.push(Tag::new(guid, name, None)),
                    None => debug!("note {} references unknown tag {}", note_guid, guid),
                },
            }
        }
        Ok(tags)
    }
}

impl NoteLookup for Catalog {
    /// Re-reads the note from the database with the same resolution as the
    /// bulk load. Unknown guids yield `Ok(None)`.
    fn find_note(&self, guid: &str) -> Result<Option<Note>> {
        let Some(record) = self
            .query_note(guid)
            .wrap_err_with(|| format!("Failed to look up note {}", guid))?
        else {
            return Ok(None);
        };
        let note = self
            .resolve(record)
            .wrap_err_with(|| format!("Failed to resolve note {}", guid))?;
        Ok(Some(note))
    }
}

fn read_note_record(row: &Row<'_>) -> rusqlite::Result<NoteRecord> {
    Ok(NoteRecord {
        guid: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        location: row.get::<_, Option<String>>(2)?.unwrap_or_else(|| "/".into()),
        name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        doc_type: row.get(4)?,
        created: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        modified: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        accessed: row.get(7)?,
        url: row.get(8)?,
        attachment_count: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
    })
}
