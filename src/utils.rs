use eyre::{Context, Result};
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Configuration required to run a conversion.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug)]
pub struct ConvertConfig {
    /// WizNote account data directory, the one holding `index.db`.
    pub wiz_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Scratch space for extracted note packages.
    pub temp_dir: PathBuf,
    pub ledger_path: PathBuf,
    /// Reconvert notes even when the ledger says they are up to date.
    pub always_convert: bool,
}

impl ConvertConfig {
    pub fn new(wiz_dir: impl Into<PathBuf>) -> Self {
        Self {
            wiz_dir: wiz_dir.into(),
            output_dir: PathBuf::from("output/notes"),
            temp_dir: PathBuf::from("output/temp"),
            ledger_path: PathBuf::from("output/convertor.db"),
            always_convert: false,
        }
    }

    pub fn source_db_path(&self) -> PathBuf {
        self.wiz_dir.join("index.db")
    }
}

/// Copy the source database into a temporary file with SQLite's online
/// backup, so a running WizNote keeps its lock and the original is never
/// touched.
pub fn backup_database(db_path: &Path) -> Result<NamedTempFile> {
    use rusqlite::{Connection, OpenFlags, backup::Backup};

    let src = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open source database: {}", db_path.display()))?;

    let tmp = NamedTempFile::new().wrap_err("Failed to create temporary file")?;
    let mut dst =
        Connection::open(tmp.path()).wrap_err("Failed to open snapshot database connection")?;

    {
        let backup = Backup::new(&src, &mut dst).wrap_err("Failed to initialize backup")?;
        backup
            .run_to_completion(1000, Duration::from_millis(5), None)
            .wrap_err("Backup did not complete successfully")?;
    }

    drop(src);
    Ok(tmp)
}

/// Read an HTML body. Older WizNote packages are UTF-16LE with a BOM,
/// newer ones UTF-8 with a BOM; anything without a BOM is read as UTF-8.
pub fn read_html_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    let (text, _, _) = encoding_rs::UTF_8.decode(&bytes);
    Ok(text.into_owned())
}

/// Copy `src` into `dst_dir` (created if needed), keeping the source's
/// access and modification times.
pub fn copy_preserving_times(src: &Path, dst_dir: &Path) -> io::Result<PathBuf> {
    let metadata = fs::metadata(src)?;
    let file_name = src
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;

    fs::create_dir_all(dst_dir)?;
    let dst = dst_dir.join(file_name);
    fs::copy(src, &dst)?;

    let mut times = FileTimes::new().set_modified(metadata.modified()?);
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    File::options().write(true).open(&dst)?.set_times(times)?;
    Ok(dst)
}
