use crate::archive::{ArchiveExtractor, ExtractError};
use crate::catalog::Catalog;
use crate::exporter;
use crate::importer::{Note, NoteKind};
use crate::ledger::Ledger;
use crate::todo::{RenderedTodoConverter, TodoConverter};
use crate::transform::{self, TransformContext};
use crate::utils::{ConvertConfig, backup_database, copy_preserving_times, read_html_file};
use eyre::{Context, Result, eyre};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// How a single note left the pipeline, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOutcome {
    /// Already converted and unchanged since.
    Skipped,
    /// The `.ziw` package is not on disk.
    MissingSource,
    /// The package is corrupt or encrypted.
    Unreadable,
    Converted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub missing: usize,
    pub unreadable: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: NoteOutcome) {
        match outcome {
            NoteOutcome::Skipped => self.skipped += 1,
            NoteOutcome::MissingSource => self.missing += 1,
            NoteOutcome::Unreadable => self.unreadable += 1,
            NoteOutcome::Converted => self.converted += 1,
        }
    }
}

/// The main entry point for a conversion run.
/// Snapshots the source database, loads the catalog and converts every note.
pub fn execute(config: &ConvertConfig) -> Result<RunSummary> {
    let db_path = config.source_db_path();
    if !db_path.is_file() {
        return Err(eyre!(
            "WizNote database not found at: {}\nPass the account data directory that contains index.db.",
            db_path.display()
        ));
    }

    let snapshot = backup_database(&db_path)?;
    let ledger = Ledger::open(&config.ledger_path)?;
    let catalog = Catalog::load(snapshot.path(), &config.wiz_dir, &ledger)?;

    Converter::new(config, &catalog, &ledger).run()
}

pub struct Converter<'a> {
    config: &'a ConvertConfig,
    catalog: &'a Catalog,
    ledger: &'a Ledger,
    extractor: ArchiveExtractor<'a>,
    todo: Box<dyn TodoConverter + 'a>,
}

impl<'a> Converter<'a> {
    pub fn new(config: &'a ConvertConfig, catalog: &'a Catalog, ledger: &'a Ledger) -> Self {
        Self {
            config,
            catalog,
            ledger,
            extractor: ArchiveExtractor::new(&config.temp_dir, ledger),
            todo: Box::new(RenderedTodoConverter),
        }
    }

    pub fn with_todo_converter(mut self, todo: impl TodoConverter + 'a) -> Self {
        self.todo = Box::new(todo);
        self
    }

    /// Convert every catalog note in load order. Per-note failures are logged
    /// and counted; only setup failures abort the run.
    pub fn run(&self) -> Result<RunSummary> {
        fs::create_dir_all(&self.config.output_dir).wrap_err_with(|| {
            format!(
                "Failed to create output directory: {}",
                self.config.output_dir.display()
            )
        })?;
        fs::create_dir_all(&self.config.temp_dir).wrap_err_with(|| {
            format!(
                "Failed to create temp directory: {}",
                self.config.temp_dir.display()
            )
        })?;

        let notes = self.catalog.notes();
        let mut summary = RunSummary {
            total: notes.len(),
            ..RunSummary::default()
        };
        info!("Found {} notes.", summary.total);

        for (i, note) in notes.iter().enumerate() {
            match self.convert_note(i + 1, summary.total, note) {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    summary.failed += 1;
                    error!("{}{} [{}]: {:#}", note.location, note.title, note.guid, e);
                }
            }
        }

        let mut line = format!(
            "Done. {} converted, {} skipped, {} missing, {} unreadable.",
            summary.converted, summary.skipped, summary.missing, summary.unreadable
        );
        if summary.failed > 0 {
            line.push_str(&format!(" Completed with {} error(s).", summary.failed));
            warn!("{}", line);
        } else {
            info!("{}", line);
        }
        Ok(summary)
    }

    pub fn convert_note(&self, position: usize, total: usize, note: &Note) -> Result<NoteOutcome> {
        if !self.config.always_convert
            && self
                .ledger
                .is_converted(note)
                .wrap_err("Failed to read ledger")?
        {
            debug!("({}/{}) {}{} up to date", position, total, note.location, note.title);
            return Ok(NoteOutcome::Skipped);
        }
        info!("({}/{}) {}{}", position, total, note.location, note.title);

        if !note.file.exists() {
            error!("{} not found", note.file.display());
            return Ok(NoteOutcome::MissingSource);
        }

        let extract_dir = match self.extractor.extract(note) {
            Ok(dir) => dir,
            Err(e @ ExtractError::Corrupt { .. }) => {
                error!("{}", e);
                return Ok(NoteOutcome::Unreadable);
            }
            Err(e) => return Err(e).wrap_err("Failed to extract note package"),
        };
        let index = extract_dir.join("index.html");
        if !index.is_file() {
            return Err(eyre!("index.html missing from {}", extract_dir.display()));
        }

        let output_root = &self.config.output_dir;
        let output_dir = note.output_dir(output_root);
        fs::create_dir_all(&output_dir)
            .wrap_err_with(|| format!("Failed to create {}", output_dir.display()))?;

        self.copy_attachments(note)?;

        let content = match note.kind_in(&extract_dir) {
            NoteKind::Todo => self
                .todo
                .convert(&extract_dir)
                .wrap_err("Failed to convert checklist")?,
            NoteKind::Generic => {
                let html = read_html_file(&index)?;
                let attachments_dir = note.output_attachments_dir(output_root);
                let ctx = TransformContext {
                    note,
                    extract_dir: &extract_dir,
                    attachments_dir: &attachments_dir,
                    output_root,
                    lookup: self.catalog,
                };
                let markdown = transform::html_to_markdown(&html, &ctx)?;
                if note.is_markdown() {
                    markdown.replace('\u{a0}', " ")
                } else {
                    markdown
                }
            }
        };

        exporter::finalize_note(&note.output_path(output_root), note, &content)?;
        self.ledger
            .record_result(&note.guid, true)
            .wrap_err("Failed to record conversion result")?;
        info!("ok");
        Ok(NoteOutcome::Converted)
    }

    fn copy_attachments(&self, note: &Note) -> Result<()> {
        if note.attachments.len() != note.attachment_count {
            warn!(
                "{} lists {} attachments, found {}",
                note.title,
                note.attachment_count,
                note.attachments.len()
            );
        }
        if note.attachments.is_empty() {
            return Ok(());
        }

        let target = note.output_attachments_dir(&self.config.output_dir);
        for attachment in &note.attachments {
            let src = note.attachments_dir.join(&attachment.name);
            copy_attachment(&src, &target)?;
        }
        Ok(())
    }
}

fn copy_attachment(src: &Path, target: &Path) -> Result<()> {
    match copy_preserving_times(src, target) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("{} attachment not found", src.display());
            Ok(())
        }
        Err(e) => Err(e).wrap_err_with(|| format!("Failed to copy {}", src.display())),
    }
}
