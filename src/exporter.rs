use crate::importer::{Note, to_system_time};
use eyre::{Context, Result};
use serde::Serialize;
use std::fs::{File, FileTimes};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

#[derive(Serialize)]
struct Frontmatter<'a> {
    #[serde(rename = "wiz-guid")]
    guid: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<&'a str>,
    cdate: &'a str,
    /// The original title, kept when sanitizing changed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    aliases: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

impl<'a> Frontmatter<'a> {
    fn for_note(note: &'a Note) -> Self {
        Self {
            guid: &note.guid,
            tags: note.tags.iter().map(|t| t.nesting_name()).collect(),
            cdate: &note.created,
            aliases: (note.title != note.output_file_name).then(|| vec![note.title.as_str()]),
            source: note.url.as_deref(),
        }
    }
}

pub fn render_front_matter(note: &Note) -> std::io::Result<String> {
    let yaml = serde_yaml::to_string(&Frontmatter::for_note(note))
        .map_err(std::io::Error::other)?;
    Ok(format!("---\n{yaml}---\n"))
}

pub fn write_note_markdown<W: Write>(writer: &mut W, note: &Note, content: &str) -> std::io::Result<()> {
    write!(writer, "{}", render_front_matter(note)?)?;
    writeln!(writer)?;
    write!(writer, "{}", content)?;
    Ok(())
}

/// Write the note to `path` and stamp it with the note's original access and
/// modification times.
pub fn finalize_note(path: &Path, note: &Note, content: &str) -> Result<()> {
    let file =
        File::create(path).wrap_err_with(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_note_markdown(&mut writer, note, content)
        .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .wrap_err_with(|| format!("Failed to flush {}", path.display()))?;

    restore_times(&file, note).wrap_err_with(|| format!("Failed to set times on {}", path.display()))
}

fn restore_times(file: &File, note: &Note) -> std::io::Result<()> {
    let Some(modified) = note.modified_at().and_then(to_system_time) else {
        warn!("Unparsable modification time {:?} for {}", note.modified, note.guid);
        return Ok(());
    };
    let mut times = FileTimes::new().set_modified(modified);
    if let Some(accessed) = note.accessed_at().and_then(to_system_time) {
        times = times.set_accessed(accessed);
    }
    file.set_times(times)
}
