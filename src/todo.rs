//! Checklist notes (`todolist2`).
//!
//! WizNote renders checklists into `index.html` as checkbox inputs, so the
//! default converter serializes that rendering without the link and image
//! rewrites generic notes get.

use crate::dom;
use crate::markdown::MarkdownSerializer;
use crate::transform::markdown_options;
use crate::utils::read_html_file;
use eyre::Result;
use std::path::Path;

pub trait TodoConverter {
    /// Produce Markdown for the checklist extracted into `extract_dir`.
    fn convert(&self, extract_dir: &Path) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RenderedTodoConverter;

impl TodoConverter for RenderedTodoConverter {
    fn convert(&self, extract_dir: &Path) -> Result<String> {
        let html = read_html_file(&extract_dir.join("index.html"))?;
        let dom = dom::parse_html(&html);
        Ok(MarkdownSerializer::new(markdown_options())
            .serialize(&dom.document)
            .replace("\r\n", "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn checkboxes_become_task_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("index.html"),
            "<div><input type='checkbox' checked>Buy milk</div>\
             <div><input type='checkbox'>Call home</div>",
        )
        .unwrap();

        let md = RenderedTodoConverter.convert(dir.path()).unwrap();
        assert!(md.contains("[x] Buy milk"), "{md}");
        assert!(md.contains("[ ] Call home"), "{md}");
    }

    #[test]
    fn missing_body_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RenderedTodoConverter.convert(dir.path()).is_err());
    }
}
