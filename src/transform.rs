//! Rewrites a WizNote HTML body into Markdown for an Obsidian-style vault.
//!
//! The tree is repaired and rewritten first (nested lists, embedded images,
//! `wiz://` links), then handed to [`MarkdownSerializer`]. Every rewrite
//! collects its targets before touching the tree.

use crate::catalog::NoteLookup;
use crate::dom;
use crate::importer::Note;
use crate::link::{InternalLink, LinkKind};
use crate::markdown::{HeadingStyle, MarkdownOptions, MarkdownSerializer};
use crate::utils::copy_preserving_times;
use eyre::{Context, Result};
use markup5ever_rcdom::Handle;
use regex::Regex;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Folder inside a note package that holds embedded resources.
const RESOURCE_PREFIX: &str = "index_files/";

const LIST_CONTAINERS: &[&str] = &["ul", "ol", "dl"];

static BRUSH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"brush:([^;,]+)").unwrap());

/// Highlighter names that differ between WizNote and Prism.
const CODE_LANGUAGE_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("bat", "batch"),
    ("c#", "csharp"),
    ("cmd", "batch"),
    ("dos", "batch"),
    ("ps", "powershell"),
];

pub struct TransformContext<'a> {
    pub note: &'a Note,
    /// Directory the note package was extracted to.
    pub extract_dir: &'a Path,
    /// Destination for copied images and attachments.
    pub attachments_dir: &'a Path,
    pub output_root: &'a Path,
    pub lookup: &'a dyn NoteLookup,
}

pub fn markdown_options() -> MarkdownOptions {
    MarkdownOptions {
        escape_asterisks: false,
        escape_underscores: false,
        escape_misc: false,
        heading_style: HeadingStyle::Atx,
        code_language: Some(code_language),
        ..MarkdownOptions::default()
    }
}

/// Convert a note body. An empty result is valid and only logged.
pub fn html_to_markdown(html: &str, ctx: &TransformContext<'_>) -> Result<String> {
    let dom = dom::parse_html(html);
    let root = &dom.document;

    repair_nested_lists(root);

    let link_prefix = vault_relative_prefix(ctx.attachments_dir, ctx.output_root)?;
    rewrite_images(root, ctx, &link_prefix)?;
    rewrite_internal_links(root, ctx, &link_prefix);

    let markdown = MarkdownSerializer::new(markdown_options())
        .serialize(root)
        .replace("\r\n", "\n");
    if markdown.is_empty() {
        warn!("Markdown is empty.");
    }
    Ok(markdown)
}

/// Move every list that directly follows a list item into that item, so the
/// serializer nests it instead of flattening it.
pub fn repair_nested_lists(root: &Handle) {
    for list in dom::find_elements(root, LIST_CONTAINERS) {
        if let Some(item) = dom::previous_significant_sibling(&list)
            && dom::is_element(&item, "li")
        {
            dom::append_child(&item, &list);
        }
    }
}

/// `attachments_dir` relative to the vault root, `/`-separated with a
/// trailing slash.
fn vault_relative_prefix(attachments_dir: &Path, output_root: &Path) -> Result<String> {
    let relative = attachments_dir.strip_prefix(output_root).wrap_err_with(|| {
        format!(
            "{} is not inside the output directory {}",
            attachments_dir.display(),
            output_root.display()
        )
    })?;
    let mut prefix = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    prefix.push('/');
    Ok(prefix)
}

/// `<img src="index_files/x.png">` becomes `![[<attachments>/x.png]]` and the
/// file is copied next to the note.
fn rewrite_images(root: &Handle, ctx: &TransformContext<'_>, link_prefix: &str) -> Result<()> {
    let images: Vec<(Handle, String)> = dom::find_elements(root, &["img"])
        .into_iter()
        .filter_map(|img| {
            let src = dom::attr(&img, "src")?;
            src.starts_with(RESOURCE_PREFIX).then_some((img, src))
        })
        .collect();

    for (img, src) in images {
        let Some(file_name) = Path::new(&src).file_name().map(|f| f.to_string_lossy().into_owned())
        else {
            continue;
        };
        dom::replace_with_text(&img, format!("![[{}{}]]", link_prefix, file_name));

        let source = ctx.extract_dir.join(&src);
        match copy_preserving_times(&source, ctx.attachments_dir) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("image {} not found in note package", source.display());
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("Failed to copy image {}", source.display()));
            }
        }
    }
    Ok(())
}

/// Anchor text as a wikilink label. Line breaks are dropped, and the
/// characters that end a label or a link become their full-width forms.
fn link_label(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| match c {
            '|' => '｜',
            '[' => '［',
            ']' => '］',
            c => c,
        })
        .collect()
}

/// Rewrite `wiz://` anchors into `[[target|label]]` links. Anything that
/// cannot be resolved is logged and left as it was.
fn rewrite_internal_links(root: &Handle, ctx: &TransformContext<'_>, link_prefix: &str) {
    let anchors: Vec<(Handle, String)> = dom::find_elements(root, &["a"])
        .into_iter()
        .filter_map(|a| {
            let href = dom::attr(&a, "href")?;
            href.starts_with("wiz://").then_some((a, href))
        })
        .collect();

    for (anchor, href) in anchors {
        let Some(link) = InternalLink::parse(&href) else {
            continue;
        };
        let replacement = match link.kind {
            LinkKind::Note => match ctx.lookup.find_note(&link.guid) {
                Ok(Some(target)) => {
                    let label = link_label(&dom::text_content(&anchor));
                    if label.trim().is_empty() {
                        format!("[[{}]]", target.link_target())
                    } else {
                        format!("[[{}|{}]]", target.link_target(), label)
                    }
                }
                Ok(None) => {
                    warn!("internal link: note {} not found", link.guid);
                    continue;
                }
                Err(e) => {
                    warn!("internal link: lookup of note {} failed: {:#}", link.guid, e);
                    continue;
                }
            },
            LinkKind::Attachment => {
                match ctx.note.attachments.iter().find(|a| a.guid == link.guid) {
                    Some(attachment) => format!("[[{}{}]]", link_prefix, attachment.name),
                    None => {
                        warn!("internal link: attachment {} not found", link.guid);
                        continue;
                    }
                }
            }
        };
        debug!("rewrote {} -> {}", href, replacement);
        dom::replace_with_text(&anchor, replacement);
    }
}

/// Fence language for a code block, from its `class` attribute.
///
/// `brush:python;toolbar:false` yields `python`; otherwise the first class
/// token is used.
pub fn code_language(class: &str) -> Option<String> {
    let token = match BRUSH.captures(class) {
        Some(caps) => caps[1].trim().to_string(),
        None => class.split_whitespace().next()?.to_string(),
    };
    if token.is_empty() {
        return None;
    }
    let bare = token.strip_prefix("language-").unwrap_or(&token);
    let fixed = CODE_LANGUAGE_SUBSTITUTIONS
        .iter()
        .find(|(from, _)| *from == bare)
        .map_or(bare, |&(_, to)| to);
    Some(fixed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::{Attachment, NoteRecord};
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct StubLookup(HashMap<String, Note>);

    impl NoteLookup for StubLookup {
        fn find_note(&self, guid: &str) -> Result<Option<Note>> {
            Ok(self.0.get(guid).cloned())
        }
    }

    fn note(guid: &str, title: &str, location: &str) -> Note {
        Note::from_record(
            NoteRecord {
                guid: guid.into(),
                title: title.into(),
                location: location.into(),
                name: format!("{}.ziw", title),
                created: "2024-01-01 08:00:00".into(),
                modified: "2024-01-02 08:00:00".into(),
                ..Default::default()
            },
            Path::new("/wiz"),
        )
    }

    struct Fixture {
        _tmp: TempDir,
        extract_dir: PathBuf,
        output_root: PathBuf,
        attachments_dir: PathBuf,
        note: Note,
        lookup: StubLookup,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let extract_dir = tmp.path().join("extract");
            fs::create_dir_all(extract_dir.join("index_files")).unwrap();
            let output_root = tmp.path().join("out");
            let mut source = note("b", "Source", "/Work/");
            source.resolve_attachments(vec![Attachment {
                guid: "att-1".into(),
                note_guid: "b".into(),
                name: "report.pdf".into(),
                modified: None,
            }]);
            let attachments_dir = source.output_attachments_dir(&output_root);
            let target = note("a", "Target: A", "/Other/");
            Self {
                _tmp: tmp,
                extract_dir,
                output_root,
                attachments_dir,
                note: source,
                lookup: StubLookup(HashMap::from([("a".to_string(), target)])),
            }
        }

        fn convert(&self, html: &str) -> String {
            let ctx = TransformContext {
                note: &self.note,
                extract_dir: &self.extract_dir,
                attachments_dir: &self.attachments_dir,
                output_root: &self.output_root,
                lookup: &self.lookup,
            };
            html_to_markdown(html, &ctx).unwrap()
        }
    }

    #[test]
    fn repairs_lists_following_an_item() {
        let fx = Fixture::new();
        let md = fx.convert("<ul><li>one</li>\n<ul><li>inner</li></ul><li>two</li></ul>");
        assert_eq!(md, "- one\n  - inner\n- two\n");
    }

    #[test]
    fn repair_leaves_other_lists_alone() {
        let dom = dom::parse_html("<p>intro</p><ul><li>a</li></ul>");
        repair_nested_lists(&dom.document);
        let ul = dom::find_elements(&dom.document, &["ul"]).remove(0);
        assert!(dom::is_element(&dom::parent(&ul).unwrap(), "body"));
    }

    #[test]
    fn embeds_and_copies_images() {
        let fx = Fixture::new();
        fs::write(fx.extract_dir.join("index_files/pic.png"), b"png").unwrap();

        let md = fx.convert("<div>before</div><div><img src=\"index_files/pic.png\"></div>");
        assert_eq!(md, "before\n\n![[Work/Source_Attachments/pic.png]]\n");
        assert_eq!(fs::read(fx.attachments_dir.join("pic.png")).unwrap(), b"png");
    }

    #[test]
    fn missing_image_keeps_embed() {
        let fx = Fixture::new();
        let md = fx.convert("<p><img src=\"index_files/gone.png\"></p>");
        assert_eq!(md, "![[Work/Source_Attachments/gone.png]]\n");
    }

    #[test]
    fn external_images_are_untouched() {
        let fx = Fixture::new();
        let md = fx.convert("<p><img src=\"https://x.org/a.png\" alt=\"a\"></p>");
        assert_eq!(md, "![a](https://x.org/a.png)\n");
    }

    #[test]
    fn rewrites_note_link_with_clean_label() {
        let fx = Fixture::new();
        let md = fx.convert(
            "<p>see <a href=\"wiz://open_document/?guid=a&amp;kbguid=\">the\r\ntarget</a></p>",
        );
        assert_eq!(md, "see [[/Other/Target： A|thetarget]]\n");
    }

    #[test]
    fn link_label_cannot_break_the_wikilink() {
        let fx = Fixture::new();
        let md = fx.convert("<p><a href=\"wiz://open_document/?guid=a\">a|b]]c</a></p>");
        assert_eq!(md, "[[/Other/Target： A|a｜b］］c]]\n");
    }

    #[test]
    fn unknown_note_link_is_left_alone() {
        let fx = Fixture::new();
        let md = fx.convert("<p><a href=\"wiz://open_document/?guid=zzz\">lost</a></p>");
        assert_eq!(md, "[lost](wiz://open_document/?guid=zzz)\n");
    }

    #[test]
    fn rewrites_attachment_link() {
        let fx = Fixture::new();
        let md = fx.convert(
            "<p><a href=\"wiz://open_attachment?guid=att-1\">report</a> \
             <a href=\"wiz://open_attachment?guid=nope\">x</a></p>",
        );
        assert_eq!(
            md,
            "[[Work/Source_Attachments/report.pdf]] [x](wiz://open_attachment?guid=nope)\n"
        );
    }

    #[test]
    fn keeps_literal_markdown_characters() {
        let fx = Fixture::new();
        let md = fx.convert("<div>**bold** and snake_case #tag</div>");
        assert_eq!(md, "**bold** and snake_case #tag\n");
    }

    #[test]
    fn code_blocks_get_prism_language() {
        let fx = Fixture::new();
        let md = fx.convert("<pre class=\"brush:bat;toolbar:false\">echo hi</pre>");
        assert_eq!(md, "```batch\necho hi\n```\n");
    }

    #[test]
    fn code_language_table() {
        assert_eq!(code_language("brush:python;toolbar:false").as_deref(), Some("python"));
        assert_eq!(code_language("brush:c#;").as_deref(), Some("csharp"));
        assert_eq!(code_language("cmd").as_deref(), Some("batch"));
        assert_eq!(code_language("dos").as_deref(), Some("batch"));
        assert_eq!(code_language("language-bash").as_deref(), Some("bash"));
        assert_eq!(code_language("language-markup").as_deref(), Some("markup"));
        assert_eq!(code_language("ps").as_deref(), Some("powershell"));
        assert_eq!(code_language("   "), None);
    }

    #[test]
    fn empty_body_is_valid() {
        let fx = Fixture::new();
        assert_eq!(fx.convert("<html><body></body></html>"), "");
    }
}
