//! Unpacks `.ziw` note packages into a scratch directory.
//!
//! A package is a zip file with the body in `index.html` and embedded
//! resources under `index_files/`. Encrypted notes are not valid zips.

use crate::importer::Note;
use crate::ledger::Ledger;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot unpack {}: corrupt or encrypted note package", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("I/O error while extracting {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger update failed")]
    Ledger(#[from] rusqlite::Error),
}

pub struct ArchiveExtractor<'a> {
    scratch_dir: PathBuf,
    ledger: &'a Ledger,
}

impl<'a> ArchiveExtractor<'a> {
    pub fn new(scratch_dir: impl Into<PathBuf>, ledger: &'a Ledger) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            ledger,
        }
    }

    pub fn extract_dir(&self, note: &Note) -> PathBuf {
        self.scratch_dir.join(&note.guid)
    }

    /// Extract `note` into `<scratch>/<guid>`, reusing an earlier extraction
    /// when the note has not changed since.
    pub fn extract(&self, note: &Note) -> Result<PathBuf, ExtractError> {
        let dir = self.extract_dir(note);
        if dir.is_dir() && !self.ledger.is_stale(note)? {
            debug!("reusing extracted package {}", dir.display());
            return Ok(dir);
        }

        let file = File::open(&note.file).map_err(|source| ExtractError::Io {
            path: note.file.clone(),
            source,
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| classify(&note.file, e))?;

        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|source| ExtractError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        if let Err(e) = archive.extract(&dir) {
            // leave nothing half-written behind for the next run to reuse
            let _ = fs::remove_dir_all(&dir);
            return Err(classify(&note.file, e));
        }

        self.ledger.record_extraction(&note.guid)?;
        debug!("extracted {} to {}", note.file.display(), dir.display());
        Ok(dir)
    }
}

/// Short reads mean a truncated package, which is as unreadable as a bad header.
fn classify(path: &Path, err: ZipError) -> ExtractError {
    match err {
        ZipError::Io(source)
            if !matches!(source.kind(), ErrorKind::UnexpectedEof | ErrorKind::InvalidData) =>
        {
            ExtractError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
        source => ExtractError::Corrupt {
            path: path.to_path_buf(),
            source,
        },
    }
}
