//! Small helpers over the `markup5ever_rcdom` tree.

use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{ParseOpts, parse_document};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};
use std::cell::RefCell;
use std::rc::Rc;

pub fn parse_html(html: &str) -> RcDom {
    parse_document(RcDom::default(), ParseOpts::default()).one(html)
}

pub fn element_name(node: &Node) -> Option<&str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(&*name.local),
        _ => None,
    }
}

pub fn is_element(node: &Node, tag: &str) -> bool {
    element_name(node) == Some(tag)
}

pub fn attr(node: &Node, key: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == key)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub fn has_attr(node: &Node, key: &str) -> bool {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs.borrow().iter().any(|a| &*a.name.local == key),
        _ => false,
    }
}

pub fn is_blank_text(node: &Node) -> bool {
    match &node.data {
        NodeData::Text { contents } => contents.borrow().trim().is_empty(),
        _ => false,
    }
}

pub fn children(node: &Handle) -> Vec<Handle> {
    node.children.borrow().clone()
}

pub fn parent(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

fn position(parent: &Handle, node: &Handle) -> Option<usize> {
    parent
        .children
        .borrow()
        .iter()
        .position(|child| Rc::ptr_eq(child, node))
}

pub fn previous_sibling(node: &Handle) -> Option<Handle> {
    let parent = parent(node)?;
    let index = position(&parent, node)?;
    index
        .checked_sub(1)
        .and_then(|i| parent.children.borrow().get(i).cloned())
}

pub fn next_sibling(node: &Handle) -> Option<Handle> {
    let parent = parent(node)?;
    let index = position(&parent, node)?;
    parent.children.borrow().get(index + 1).cloned()
}

/// Preceding sibling, skipping whitespace-only text.
pub fn previous_significant_sibling(node: &Handle) -> Option<Handle> {
    let mut sibling = previous_sibling(node);
    while let Some(candidate) = sibling {
        if !is_blank_text(&candidate) {
            return Some(candidate);
        }
        sibling = previous_sibling(&candidate);
    }
    None
}

/// All elements below `root` whose tag is in `tags`, in document order.
pub fn find_elements(root: &Handle, tags: &[&str]) -> Vec<Handle> {
    let mut found = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        if element_name(&node).is_some_and(|name| tags.contains(&name)) {
            found.push(node.clone());
        }
        stack.extend(node.children.borrow().iter().rev().cloned());
    }
    found
}

pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        _ => {
            for child in node.children.borrow().iter() {
                collect_text(child, out);
            }
        }
    }
}

pub fn detach(node: &Handle) {
    if let Some(parent) = parent(node) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
    node.parent.set(None);
}

/// Move `child` (from wherever it is) to the end of `parent`.
pub fn append_child(parent: &Handle, child: &Handle) {
    detach(child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

pub fn new_text(text: impl Into<String>) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text.into())),
    })
}

/// Swap `node` for a text node in its parent. Returns false for detached nodes.
pub fn replace_with_text(node: &Handle, text: impl Into<String>) -> bool {
    let Some(parent) = parent(node) else {
        return false;
    };
    let Some(index) = position(&parent, node) else {
        return false;
    };
    let replacement = new_text(text);
    replacement.parent.set(Some(Rc::downgrade(&parent)));
    parent.children.borrow_mut()[index] = replacement;
    node.parent.set(None);
    true
}
