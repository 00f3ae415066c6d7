//! # wiz2md
//!
//! A CLI tool that migrates a [WizNote](https://www.wiz.cn) data directory into a folder of
//! portable Markdown files, ready to open as an Obsidian vault.
//!
//! ## What it does
//!
//! WizNote keeps its catalog in a SQLite database (`index.db`) and each note as a zip package
//! (`.ziw`) holding an HTML body and its embedded images. This tool reads the catalog, unpacks
//! every note, rewrites the HTML (embedded images, `wiz://` links between notes and to
//! attachments, broken nested lists) and writes it as Markdown with YAML frontmatter carrying
//! the note's guid, tags, creation date, original title and source URL. Attachments are copied
//! next to the note, and the output file gets the note's original modification time.
//!
//! The source database is snapshotted and opened **read-only**; your data is never modified.
//!
//! ## Incremental conversion
//!
//! A small ledger database (`convertor.db`) records which notes were converted and when their
//! package was last extracted. On repeated runs, notes that have not been edited in WizNote
//! since are skipped. Failed notes are retried on the next run.
//!
//! ## Usage
//!
//! ```sh
//! # Convert everything into ./output/notes
//! wiz2md ~/.wiznote/someone@example.com/data
//!
//! # Custom output location, reconverting every note
//! wiz2md ~/.wiznote/someone@example.com/data --output ~/vault --force
//! ```
//!
//! Preferences can be persisted in `~/.config/wiz2md/config.toml`.
pub mod archive;
pub mod catalog;
pub mod dom;
pub mod exporter;
pub mod importer;
pub mod ledger;
pub mod link;
pub mod markdown;
pub mod pipeline;
pub mod todo;
pub mod transform;
pub mod utils;
