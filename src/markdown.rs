//! Generic HTML to Markdown serializer over an `RcDom` tree.
//!
//! Knows nothing about WizNote. Callers tune it through [`MarkdownOptions`]
//! and rewrite the tree beforehand.

use crate::dom;
use markup5ever_rcdom::{Handle, NodeData};
use regex::{Captures, Regex};
use std::cell::RefCell;
use std::sync::LazyLock;

// ASCII only: non-breaking and ideographic spaces are content.
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\n\x0C]+").unwrap());
static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]+$").unwrap());
static EXTRA_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static CODE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(.*?)\x{E000}(\d+)\x{E001}").unwrap());

/// Elements whose surrounding whitespace is insignificant.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "center", "dd", "div", "dl", "dt",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header", "hr",
    "html", "li", "main", "nav", "ol", "p", "pre", "section", "table", "tbody", "td", "tfoot",
    "th", "thead", "tr", "ul",
];

const SKIPPED_ELEMENTS: &[&str] = &[
    "head", "link", "meta", "noscript", "script", "style", "template", "title",
];

/// Maps the class attribute of a code block to a fence language.
pub type CodeLanguageFn = fn(&str) -> Option<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadingStyle {
    #[default]
    Atx,
    Setext,
}

#[derive(Debug, Clone)]
pub struct MarkdownOptions {
    pub escape_asterisks: bool,
    pub escape_underscores: bool,
    /// Backslashes, backticks, brackets, angle brackets, `#` and `|`.
    pub escape_misc: bool,
    pub heading_style: HeadingStyle,
    pub bullet: char,
    pub code_language: Option<CodeLanguageFn>,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            escape_asterisks: true,
            escape_underscores: true,
            escape_misc: true,
            heading_style: HeadingStyle::Atx,
            bullet: '-',
            code_language: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    in_pre: bool,
    in_list: bool,
    in_cell: bool,
}

pub struct MarkdownSerializer {
    options: MarkdownOptions,
    /// Fenced blocks, kept out of the text until whitespace cleanup is done.
    code_blocks: RefCell<Vec<String>>,
}

impl MarkdownSerializer {
    pub fn new(options: MarkdownOptions) -> Self {
        Self {
            options,
            code_blocks: RefCell::default(),
        }
    }

    pub fn serialize(&self, root: &Handle) -> String {
        self.code_blocks.borrow_mut().clear();
        let text = finish(&self.convert(root, Context::default()));
        restore_code_blocks(&text, &self.code_blocks.take())
    }

    fn convert(&self, node: &Handle, ctx: Context) -> String {
        match &node.data {
            NodeData::Document => self.children(node, ctx),
            NodeData::Text { contents } => self.text(&contents.borrow(), node, ctx),
            NodeData::Element { name, .. } => self.element(&name.local, node, ctx),
            _ => String::new(),
        }
    }

    fn children(&self, node: &Handle, ctx: Context) -> String {
        node.children
            .borrow()
            .iter()
            .map(|child| self.convert(child, ctx))
            .collect()
    }

    fn text(&self, raw: &str, node: &Handle, ctx: Context) -> String {
        if ctx.in_pre {
            return raw.to_string();
        }
        if raw.trim_ascii().is_empty() && next_to_block(node) {
            return String::new();
        }
        self.escape(&WHITESPACE.replace_all(raw, " "))
    }

    fn escape(&self, text: &str) -> String {
        let o = &self.options;
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            let escaped = match c {
                '*' => o.escape_asterisks,
                '_' => o.escape_underscores,
                '\\' | '`' | '[' | ']' | '<' | '>' | '#' | '|' => o.escape_misc,
                _ => false,
            };
            if escaped {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    fn element(&self, tag: &str, node: &Handle, ctx: Context) -> String {
        if SKIPPED_ELEMENTS.contains(&tag) {
            return String::new();
        }
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = usize::from(tag.as_bytes()[1] - b'0');
                self.heading(level, node, ctx)
            }
            "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "nav"
            | "aside" | "address" | "figure" | "center" | "form" => {
                let text = self.children(node, ctx);
                let text = text.trim_ascii();
                if text.is_empty() {
                    String::new()
                } else if ctx.in_cell {
                    format!(" {} ", text)
                } else {
                    format!("\n\n{}\n\n", text)
                }
            }
            "br" => {
                if ctx.in_pre {
                    "\n".into()
                } else if ctx.in_cell {
                    " ".into()
                } else {
                    "  \n".into()
                }
            }
            "hr" => "\n\n---\n\n".into(),
            "strong" | "b" => self.inline_wrap("**", node, ctx),
            "em" | "i" => self.inline_wrap("*", node, ctx),
            "del" | "s" | "strike" => self.inline_wrap("~~", node, ctx),
            "code" | "kbd" | "samp" | "tt" => {
                if ctx.in_pre {
                    self.children(node, ctx)
                } else {
                    inline_code(&dom::text_content(node))
                }
            }
            "a" => self.anchor(node, ctx),
            "img" => image(node),
            "input" => checkbox(node),
            "ul" => self.list(node, false, ctx),
            "ol" => self.list(node, true, ctx),
            "dl" => self.definition_list(node, ctx),
            "blockquote" => self.blockquote(node, ctx),
            "pre" => self.code_block(node, ctx),
            "table" => self.table(node, ctx),
            _ => self.children(node, ctx),
        }
    }

    fn heading(&self, level: usize, node: &Handle, ctx: Context) -> String {
        let text = self.children(node, ctx);
        let text = WHITESPACE.replace_all(text.trim_ascii(), " ");
        if text.is_empty() {
            return String::new();
        }
        if ctx.in_cell {
            return text.into_owned();
        }
        match self.options.heading_style {
            HeadingStyle::Setext if level <= 2 => {
                let rule = if level == 1 { "=" } else { "-" };
                format!("\n\n{}\n{}\n\n", text, rule.repeat(text.chars().count()))
            }
            _ => format!("\n\n{} {}\n\n", "#".repeat(level), text),
        }
    }

    fn inline_wrap(&self, marker: &str, node: &Handle, ctx: Context) -> String {
        let text = self.children(node, ctx);
        let inner = text.trim_ascii();
        if inner.is_empty() {
            return text;
        }
        let lead = &text[..text.len() - text.trim_ascii_start().len()];
        let trail = &text[text.trim_ascii_end().len()..];
        format!("{}{}{}{}{}", lead, marker, inner, marker, trail)
    }

    fn anchor(&self, node: &Handle, ctx: Context) -> String {
        let text = self.children(node, ctx);
        let Some(href) = dom::attr(node, "href").filter(|h| !h.is_empty()) else {
            return text;
        };
        let label = text.trim();
        if label.is_empty() {
            return String::new();
        }
        if label == href {
            return format!("<{}>", href);
        }
        match dom::attr(node, "title").filter(|t| !t.is_empty()) {
            Some(title) => format!("[{}]({} \"{}\")", label, href, title.replace('"', "\\\"")),
            None => format!("[{}]({})", label, href),
        }
    }

    fn list(&self, node: &Handle, ordered: bool, ctx: Context) -> String {
        let mut number = if ordered {
            dom::attr(node, "start")
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(1)
        } else {
            0
        };
        let nested = Context {
            in_list: true,
            ..ctx
        };

        let mut items = String::new();
        for child in dom::children(node) {
            if dom::is_element(&child, "li") {
                let bullet = if ordered {
                    number += 1;
                    format!("{}.", number - 1)
                } else {
                    self.options.bullet.to_string()
                };
                let body = self.children(&child, nested);
                let body = EXTRA_NEWLINES.replace_all(body.trim_ascii(), "\n\n");
                items.push_str(&list_item(&bullet, &body));
            } else {
                // stray content, including lists that were never nested in an item
                let stray = self.convert(&child, nested);
                let stray = stray.trim();
                if !stray.is_empty() {
                    items.push_str(stray);
                    items.push('\n');
                }
            }
        }

        if ctx.in_cell {
            items.replace('\n', " ")
        } else if ctx.in_list {
            format!("\n{}", items)
        } else {
            format!("\n\n{}\n", items)
        }
    }

    fn definition_list(&self, node: &Handle, ctx: Context) -> String {
        let mut out = String::new();
        for child in dom::children(node) {
            let text = self.children(&child, ctx);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match dom::element_name(&child) {
                Some("dt") => out.push_str(&format!("{}\n", text)),
                Some("dd") => out.push_str(&format!(":   {}\n", text)),
                _ => out.push_str(&format!("{}\n", text)),
            }
        }
        format!("\n\n{}\n", out)
    }

    fn blockquote(&self, node: &Handle, ctx: Context) -> String {
        let text = self.children(node, ctx);
        let text = EXTRA_NEWLINES.replace_all(text.trim_ascii(), "\n\n");
        if text.is_empty() {
            return String::new();
        }
        let quoted: Vec<String> = text
            .lines()
            .map(|line| {
                if line.is_empty() {
                    ">".to_string()
                } else {
                    format!("> {}", line)
                }
            })
            .collect();
        format!("\n\n{}\n\n", quoted.join("\n"))
    }

    fn code_block(&self, node: &Handle, ctx: Context) -> String {
        let mut code = String::new();
        raw_text(node, &mut code);
        let code = code.trim_start_matches('\n').trim_end();
        if ctx.in_cell {
            return inline_code(&WHITESPACE.replace_all(code, " "));
        }

        let language = self
            .options
            .code_language
            .and_then(|callback| code_class(node).and_then(|class| callback(&class)))
            .unwrap_or_default();
        let fence = "`".repeat(longest_backtick_run(code).max(2) + 1);

        let mut blocks = self.code_blocks.borrow_mut();
        blocks.push(format!("{}{}\n{}\n{}", fence, language, code, fence));
        format!("\n\n\u{E000}{}\u{E001}\n\n", blocks.len() - 1)
    }

    fn table(&self, node: &Handle, ctx: Context) -> String {
        let cell_ctx = Context {
            in_cell: true,
            ..ctx
        };
        let mut lines = Vec::new();
        for (i, row) in table_rows(node).iter().enumerate() {
            let cells: Vec<String> = dom::children(row)
                .iter()
                .filter(|c| dom::is_element(c, "td") || dom::is_element(c, "th"))
                .map(|cell| {
                    let text = self.children(cell, cell_ctx);
                    text.split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace('|', "\\|")
                })
                .collect();
            if cells.is_empty() {
                continue;
            }
            lines.push(format!("| {} |", cells.join(" | ")));
            if i == 0 {
                lines.push(format!("|{}", " --- |".repeat(cells.len())));
            }
        }
        if lines.is_empty() {
            return String::new();
        }
        format!("\n\n{}\n\n", lines.join("\n"))
    }
}

/// Whitespace-only text between blocks carries no meaning.
fn next_to_block(node: &Handle) -> bool {
    let is_block = |n: &Handle| dom::element_name(n).is_some_and(|t| BLOCK_ELEMENTS.contains(&t));
    let parent_is_container = dom::parent(node).is_some_and(|p| {
        dom::element_name(&p).is_some_and(|t| {
            matches!(
                t,
                "html" | "head" | "body" | "ul" | "ol" | "dl" | "table" | "thead" | "tbody"
                    | "tfoot" | "tr"
            )
        })
    });
    parent_is_container
        || dom::previous_sibling(node).is_some_and(|s| is_block(&s))
        || dom::next_sibling(node).is_some_and(|s| is_block(&s))
}

fn list_item(bullet: &str, body: &str) -> String {
    let indent = " ".repeat(bullet.chars().count() + 1);
    let mut lines = body.lines();
    let mut out = format!("{} {}\n", bullet, lines.next().unwrap_or_default());
    for line in lines {
        if !line.trim().is_empty() {
            out.push_str(&indent);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn inline_code(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let ticks = "`".repeat(longest_backtick_run(text) + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{} {} {}", ticks, text, ticks)
    } else {
        format!("{}{}{}", ticks, text, ticks)
    }
}

fn image(node: &Handle) -> String {
    let Some(src) = dom::attr(node, "src").filter(|s| !s.is_empty()) else {
        return String::new();
    };
    let alt = dom::attr(node, "alt").unwrap_or_default();
    match dom::attr(node, "title").filter(|t| !t.is_empty()) {
        Some(title) => format!("![{}]({} \"{}\")", alt, src, title.replace('"', "\\\"")),
        None => format!("![{}]({})", alt, src),
    }
}

fn checkbox(node: &Handle) -> String {
    let is_checkbox = dom::attr(node, "type").is_some_and(|t| t.eq_ignore_ascii_case("checkbox"));
    match (is_checkbox, dom::has_attr(node, "checked")) {
        (true, true) => "[x] ".into(),
        (true, false) => "[ ] ".into(),
        _ => String::new(),
    }
}

/// Text of a `<pre>` block with line breaks restored.
fn raw_text(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        NodeData::Element { .. } => {
            let tag = dom::element_name(node).unwrap_or_default();
            if tag == "br" {
                out.push('\n');
                return;
            }
            for child in node.children.borrow().iter() {
                raw_text(child, out);
            }
            if matches!(tag, "div" | "p" | "li") && !out.ends_with('\n') {
                out.push('\n');
            }
        }
        _ => {}
    }
}

/// Class of the `<pre>`, or of its `<code>` child when the pre has none.
fn code_class(pre: &Handle) -> Option<String> {
    dom::attr(pre, "class")
        .filter(|c| !c.trim().is_empty())
        .or_else(|| {
            dom::children(pre)
                .iter()
                .find(|c| dom::is_element(c, "code"))
                .and_then(|code| dom::attr(code, "class"))
                .filter(|c| !c.trim().is_empty())
        })
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Rows of a table, without descending into nested tables.
fn table_rows(table: &Handle) -> Vec<Handle> {
    let mut rows = Vec::new();
    for child in dom::children(table) {
        match dom::element_name(&child) {
            Some("tr") => rows.push(child),
            Some("thead" | "tbody" | "tfoot") => rows.extend(
                dom::children(&child)
                    .into_iter()
                    .filter(|c| dom::is_element(c, "tr")),
            ),
            _ => {}
        }
    }
    rows
}

fn finish(raw: &str) -> String {
    let text = BLANK_LINE.replace_all(raw, "");
    let text = EXTRA_NEWLINES.replace_all(&text, "\n\n");
    let text = text.trim_matches('\n').trim_ascii_end();
    if text.is_empty() {
        String::new()
    } else {
        format!("{}\n", text)
    }
}

/// Put fenced blocks back in place of their markers. Continuation lines get
/// the marker line's prefix, with list bullets turned into indentation.
fn restore_code_blocks(text: &str, blocks: &[String]) -> String {
    if blocks.is_empty() {
        return text.to_string();
    }
    CODE_PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let prefix = &caps[1];
            let Some(block) = caps[2].parse::<usize>().ok().and_then(|i| blocks.get(i)) else {
                return caps[0].to_string();
            };
            let continuation: String = prefix
                .chars()
                .map(|c| if c == '>' { '>' } else { ' ' })
                .collect();
            let mut lines = block.lines();
            let mut out = format!("{}{}", prefix, lines.next().unwrap_or_default());
            for line in lines {
                out.push('\n');
                if line.is_empty() {
                    out.push_str(continuation.trim_end());
                } else {
                    out.push_str(&continuation);
                    out.push_str(line);
                }
            }
            out
        })
        .into_owned()
}
