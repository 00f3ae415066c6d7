/// Type definitions for the WizNote catalog (`index.db`).
///
/// Table schema (only the columns read here):
/// ```sql
/// WIZ_DOCUMENT(
///     DOCUMENT_GUID, DOCUMENT_TITLE, DOCUMENT_LOCATION, DOCUMENT_NAME,
///     DOCUMENT_TYPE, DT_CREATED, DT_MODIFIED, DT_ACCESSED, DOCUMENT_URL,
///     DOCUMENT_ATTACHEMENT_COUNT
/// );
/// WIZ_DOCUMENT_ATTACHMENT(ATTACHMENT_GUID, DOCUMENT_GUID, ATTACHMENT_NAME, DT_DATA_MODIFIED);
/// WIZ_TAG(TAG_GUID, TAG_NAME, TAG_GROUP_GUID);
/// WIZ_DOCUMENT_TAG(DOCUMENT_GUID, TAG_GUID);
/// ```
///
/// Timestamps are stored as local wall-clock text (`YYYY-MM-DD HH:MM:SS`).
/// Locations are slash-wrapped folder paths such as `/My Notes/Work/`.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime, TimeZone};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Document type WizNote uses for checklist notes.
const TODO_DOCUMENT_TYPE: &str = "todolist2";

/// Characters that cannot appear in a file name, and what replaces them.
const FILE_NAME_SUBSTITUTIONS: &[(char, &str)] = &[
    ('*', "-"),
    ('"', "''"),
    ('\\', "╲"),
    ('/', "╱"),
    ('<', "〈"),
    ('>', "〉"),
    (':', "："),
    ('|', "｜"),
    ('?', "？"),
];

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()
}

/// Interpret a catalog timestamp in the local timezone.
pub fn to_system_time(ts: NaiveDateTime) -> Option<SystemTime> {
    Local
        .from_local_datetime(&ts)
        .earliest()
        .map(SystemTime::from)
}

/// Turn a slash-wrapped WizNote location into a relative path. `.` and `..`
/// segments are dropped so the result never leaves the directory it is
/// joined onto.
pub fn relative_location(location: &str) -> PathBuf {
    location
        .split('/')
        .filter(|part| !matches!(*part, "" | "." | ".."))
        .collect()
}

/// Derive the output file stem from a note title.
pub fn sanitize_file_name(title: &str) -> String {
    let mut name = String::with_capacity(title.len());
    for c in title.chars() {
        match FILE_NAME_SUBSTITUTIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => name.push_str(to),
            None => name.push(c),
        }
    }

    // "notes.md" would otherwise become "notes.md.md"
    if let Some(stripped) = name.strip_suffix(".md") {
        name.truncate(stripped.len());
    }

    // Hidden files are skipped by most vault tools
    if name.starts_with('.') {
        name.insert(0, '_');
    }

    name
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub guid: String,
    pub name: String,
    pub parent_guid: Option<String>,
    /// `parent/child/grandchild`, filled in by [`compute_nesting_names`].
    pub nesting_name: Option<String>,
}

impl Tag {
    pub fn new(guid: impl Into<String>, name: impl Into<String>, parent: Option<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            parent_guid: parent.filter(|p| !p.is_empty()),
            nesting_name: None,
        }
    }

    /// The hierarchical name, or the plain name when none was computed.
    pub fn nesting_name(&self) -> &str {
        self.nesting_name.as_deref().unwrap_or(&self.name)
    }
}

/// Compute `nesting_name` for every tag in a (possibly partial) tag forest.
///
/// Walks each tag's parent chain until it hits a root, an unknown parent, or a
/// tag whose nesting name was already computed earlier in this pass.
pub fn compute_nesting_names(tags: &mut [Tag]) {
    let index: HashMap<&str, usize> = tags
        .iter()
        .enumerate()
        .map(|(i, t)| (t.guid.as_str(), i))
        .collect();
    let mut resolved: Vec<Option<String>> = vec![None; tags.len()];

    for i in 0..tags.len() {
        let mut chain = vec![tags[i].name.as_str()];
        let mut prefix: Option<String> = None;
        let mut cursor = tags[i].parent_guid.as_deref();
        let mut steps = 0;

        while let Some(parent) = cursor.and_then(|guid| index.get(guid)).copied() {
            if let Some(known) = &resolved[parent] {
                prefix = Some(known.clone());
                break;
            }
            chain.push(tags[parent].name.as_str());
            cursor = tags[parent].parent_guid.as_deref();

            // a cycle would otherwise never terminate
            steps += 1;
            if steps > tags.len() {
                break;
            }
        }

        chain.reverse();
        let own = chain.join("/");
        resolved[i] = Some(match prefix {
            Some(prefix) => format!("{}/{}", prefix, own),
            None => own,
        });
    }

    for (tag, name) in tags.iter_mut().zip(resolved) {
        tag.nesting_name = name;
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub guid: String,
    pub note_guid: String,
    pub name: String,
    pub modified: Option<String>,
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Generic,
    Todo,
}

impl NoteKind {
    pub fn from_document_type(doc_type: Option<&str>) -> Self {
        match doc_type {
            Some(TODO_DOCUMENT_TYPE) => NoteKind::Todo,
            _ => NoteKind::Generic,
        }
    }
}

/// One `WIZ_DOCUMENT` row, as read from the catalog.
#[derive(Debug, Clone, Default)]
pub struct NoteRecord {
    pub guid: String,
    pub title: String,
    pub location: String,
    pub name: String,
    pub doc_type: Option<String>,
    pub created: String,
    pub modified: String,
    pub accessed: Option<String>,
    pub url: Option<String>,
    pub attachment_count: i64,
}

#[derive(Debug, Clone)]
pub struct Note {
    pub guid: String,
    pub title: String,
    pub location: String,
    pub name: String,
    pub kind: NoteKind,
    pub created: String,
    pub modified: String,
    pub accessed: Option<String>,
    pub url: Option<String>,
    pub attachment_count: usize,
    /// Title with characters that are illegal in file names substituted.
    pub output_file_name: String,
    /// The `.ziw` package on disk.
    pub file: PathBuf,
    /// Where WizNote keeps this note's attachment files.
    pub attachments_dir: PathBuf,
    pub attachments: Vec<Attachment>,
    pub tags: Vec<Tag>,
}

impl Note {
    pub fn from_record(record: NoteRecord, wiz_dir: &Path) -> Self {
        let file = wiz_dir
            .join(relative_location(&record.location))
            .join(&record.name);
        let stem = Path::new(&record.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| record.name.clone());
        let attachments_dir = file
            .parent()
            .unwrap_or(wiz_dir)
            .join(format!("{}_Attachments", stem));

        let mut output_file_name = sanitize_file_name(&record.title);
        if output_file_name.is_empty() {
            output_file_name = record.guid.clone();
        }

        Self {
            kind: NoteKind::from_document_type(record.doc_type.as_deref()),
            attachment_count: usize::try_from(record.attachment_count).unwrap_or(0),
            url: record.url.filter(|u| !u.trim().is_empty()),
            guid: record.guid,
            title: record.title,
            location: record.location,
            name: record.name,
            created: record.created,
            modified: record.modified,
            accessed: record.accessed,
            output_file_name,
            file,
            attachments_dir,
            attachments: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn resolve_attachments(&mut self, attachments: Vec<Attachment>) {
        self.attachments = attachments;
    }

    pub fn resolve_tags(&mut self, tags: Vec<Tag>) {
        self.tags = tags;
    }

    /// Notes written in WizNote's markdown mode carry a `.md` title.
    pub fn is_markdown(&self) -> bool {
        self.title.ends_with(".md")
    }

    /// The note kind, refined by what the extracted package contains.
    /// Some checklist notes have no document type recorded.
    pub fn kind_in(&self, extract_dir: &Path) -> NoteKind {
        if self.kind == NoteKind::Todo
            || extract_dir
                .join("index_files")
                .join("wiz_todolist.xml")
                .exists()
        {
            NoteKind::Todo
        } else {
            NoteKind::Generic
        }
    }

    pub fn modified_at(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.modified)
    }

    /// Falls back to the modification time when no access time is recorded.
    pub fn accessed_at(&self) -> Option<NaiveDateTime> {
        self.accessed
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.modified_at())
    }

    pub fn output_dir(&self, output_root: &Path) -> PathBuf {
        output_root.join(relative_location(&self.location))
    }

    pub fn output_path(&self, output_root: &Path) -> PathBuf {
        self.output_dir(output_root)
            .join(format!("{}.md", self.output_file_name))
    }

    pub fn output_attachments_dir(&self, output_root: &Path) -> PathBuf {
        self.output_dir(output_root)
            .join(format!("{}_Attachments", self.output_file_name))
    }

    /// Vault-relative link target: folder plus output file name.
    pub fn link_target(&self) -> String {
        format!("{}{}", self.location, self.output_file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(guid: &str, name: &str, parent: Option<&str>) -> Tag {
        Tag::new(guid, name, parent.map(str::to_string))
    }

    fn record(title: &str) -> NoteRecord {
        NoteRecord {
            guid: "6f1c2a7e".into(),
            title: title.into(),
            location: "/My Notes/Work/".into(),
            name: format!("{}.ziw", title),
            created: "2023-04-01 09:15:00".into(),
            modified: "2023-04-02 10:00:00".into(),
            ..Default::default()
        }
    }

    #[test]
    fn nesting_names_follow_parent_chain() {
        let mut tags = vec![
            tag("c", "Rust", Some("b")),
            tag("a", "Tech", None),
            tag("b", "Lang", Some("a")),
            tag("d", "Misc", None),
        ];
        compute_nesting_names(&mut tags);

        assert_eq!(tags[0].nesting_name(), "Tech/Lang/Rust");
        assert_eq!(tags[1].nesting_name(), "Tech");
        assert_eq!(tags[2].nesting_name(), "Tech/Lang");
        assert_eq!(tags[3].nesting_name(), "Misc");
    }

    #[test]
    fn nesting_names_reuse_already_computed_ancestors() {
        let mut tags = vec![
            tag("a", "Tech", None),
            tag("b", "Lang", Some("a")),
            tag("c", "Rust", Some("b")),
            tag("e", "Go", Some("b")),
        ];
        compute_nesting_names(&mut tags);

        assert_eq!(tags[2].nesting_name(), "Tech/Lang/Rust");
        assert_eq!(tags[3].nesting_name(), "Tech/Lang/Go");
    }

    #[test]
    fn orphaned_parent_is_treated_as_root() {
        let mut tags = vec![tag("x", "Lonely", Some("missing")), tag("y", "Child", Some("x"))];
        compute_nesting_names(&mut tags);

        assert_eq!(tags[0].nesting_name(), "Lonely");
        assert_eq!(tags[1].nesting_name(), "Lonely/Child");
    }

    #[test]
    fn empty_parent_guid_means_root() {
        let t = Tag::new("a", "Top", Some(String::new()));
        assert_eq!(t.parent_guid, None);
        assert_eq!(t.nesting_name(), "Top");
    }

    #[test]
    fn cyclic_tags_terminate() {
        let mut tags = vec![tag("a", "A", Some("b")), tag("b", "B", Some("a"))];
        compute_nesting_names(&mut tags);
        assert!(tags.iter().all(|t| t.nesting_name.is_some()));
    }

    #[test]
    fn sanitize_substitutes_illegal_characters() {
        assert_eq!(sanitize_file_name("A/B*C"), "A╱B-C");
        assert_eq!(sanitize_file_name(r#"a:b|c?"d"<e>\f"#), "a：b｜c？''d''〈e〉╲f");
    }

    #[test]
    fn sanitize_strips_one_markdown_suffix() {
        assert_eq!(sanitize_file_name("notes.md"), "notes");
        assert_eq!(sanitize_file_name("notes.md.md"), "notes.md");
        assert_eq!(sanitize_file_name("notes.mdx"), "notes.mdx");
    }

    #[test]
    fn sanitize_escapes_leading_dot() {
        assert_eq!(sanitize_file_name(".bashrc"), "_.bashrc");
        assert_eq!(sanitize_file_name("a.b"), "a.b");
    }

    #[test]
    fn note_paths_are_derived_from_location() {
        let wiz_dir = Path::new("/data/wiz");
        let note = Note::from_record(record("Plan: Q3"), wiz_dir);

        assert_eq!(note.output_file_name, "Plan： Q3");
        assert_eq!(note.file, wiz_dir.join("My Notes/Work/Plan: Q3.ziw"));
        assert_eq!(
            note.attachments_dir,
            wiz_dir.join("My Notes/Work/Plan: Q3_Attachments")
        );

        let out = Path::new("/out");
        assert_eq!(note.output_path(out), out.join("My Notes/Work/Plan： Q3.md"));
        assert_eq!(
            note.output_attachments_dir(out),
            out.join("My Notes/Work/Plan： Q3_Attachments")
        );
        assert_eq!(note.link_target(), "/My Notes/Work/Plan： Q3");
    }

    #[test]
    fn empty_title_falls_back_to_guid() {
        let note = Note::from_record(record(""), Path::new("/data"));
        assert_eq!(note.output_file_name, "6f1c2a7e");
    }

    #[test]
    fn note_kind_and_markdown_detection() {
        let mut rec = record("todo");
        rec.doc_type = Some("todolist2".into());
        assert_eq!(Note::from_record(rec, Path::new("/d")).kind, NoteKind::Todo);

        let note = Note::from_record(record("readme.md"), Path::new("/d"));
        assert_eq!(note.kind, NoteKind::Generic);
        assert!(note.is_markdown());
    }

    #[test]
    fn accessed_falls_back_to_modified() {
        let note = Note::from_record(record("x"), Path::new("/d"));
        assert_eq!(note.accessed_at(), note.modified_at());
        assert_eq!(
            note.modified_at(),
            NaiveDateTime::parse_from_str("2023-04-02 10:00:00", TIMESTAMP_FORMAT).ok()
        );
    }

    #[test]
    fn relative_location_drops_slashes() {
        assert_eq!(relative_location("/a/b/"), PathBuf::from("a/b"));
        assert_eq!(relative_location("/"), PathBuf::new());
    }

    #[test]
    fn location_cannot_escape_the_output_root() {
        assert_eq!(relative_location("/../x/./y/.."), PathBuf::from("x/y"));

        let mut rec = record("Escape");
        rec.location = "/../../etc/".into();
        let note = Note::from_record(rec, Path::new("/data/wiz"));
        let out = Path::new("/out");
        assert_eq!(note.output_path(out), out.join("etc/Escape.md"));
        assert!(note.file.starts_with("/data/wiz"));
    }
}
