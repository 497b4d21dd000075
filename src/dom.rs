//! Document tree exchanged between the Rust host and the in-isolate DOM shim.
//!
//! Parsing uses `scraper` (html5ever) on the Rust side. The same tree comes
//! back out of the isolate at the end of a render and is serialized here.
//!
//! This file is also compiled into `build.rs` (see `ops.rs`), so it must not
//! reference other crate modules.

use ego_tree::NodeRef;
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};

/// A node of the mounted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomNode {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<DomNode>,
    },
    Text {
        data: String,
    },
    Comment {
        data: String,
    },
}

/// A whole document: optional doctype plus the `<html>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomDocument {
    pub doctype: Option<String>,
    pub root: DomNode,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "plaintext", "script", "style", "xmp",
];

impl DomNode {
    pub fn element(name: &str, attrs: Vec<(String, String)>, children: Vec<DomNode>) -> Self {
        DomNode::Element {
            name: name.to_string(),
            attrs,
            children,
        }
    }

    pub fn text(data: &str) -> Self {
        DomNode::Text {
            data: data.to_string(),
        }
    }

    /// Depth-first search for the first element with the given tag name.
    pub fn find_element(&self, tag: &str) -> Option<&DomNode> {
        match self {
            DomNode::Element { name, children, .. } => {
                if name == tag {
                    return Some(self);
                }
                children.iter().find_map(|c| c.find_element(tag))
            }
            _ => None,
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(node: &DomNode, out: &mut String) {
    match node {
        DomNode::Text { data } => out.push_str(data),
        DomNode::Element { children, .. } => children.iter().for_each(|c| collect_text(c, out)),
        DomNode::Comment { .. } => {}
    }
}

/// Parse a full HTML document. html5ever never fails; malformed input is
/// repaired the way a browser would.
pub fn parse_document(html: &str) -> DomDocument {
    let parsed = Html::parse_document(html);
    let mut doctype = None;
    let mut root = None;

    for child in parsed.tree.root().children() {
        match child.value() {
            Node::Doctype(dt) => doctype = Some(dt.name().to_string()),
            Node::Element(_) if root.is_none() => root = convert(child),
            _ => {}
        }
    }

    DomDocument {
        doctype,
        root: root.unwrap_or_else(|| {
            DomNode::element(
                "html",
                Vec::new(),
                vec![
                    DomNode::element("head", Vec::new(), Vec::new()),
                    DomNode::element("body", Vec::new(), Vec::new()),
                ],
            )
        }),
    }
}

/// Parse an HTML fragment in a `<body>` context (used by `innerHTML`).
pub fn parse_fragment(html: &str) -> Vec<DomNode> {
    let parsed = Html::parse_fragment(html);
    let root = parsed.tree.root();

    // scraper wraps fragment content in a synthetic <html> element
    let container = root
        .children()
        .find(|c| matches!(c.value(), Node::Element(el) if el.name() == "html"));

    match container {
        Some(html_el) => html_el.children().filter_map(convert).collect(),
        None => root.children().filter_map(convert).collect(),
    }
}

fn convert(node: NodeRef<'_, Node>) -> Option<DomNode> {
    match node.value() {
        Node::Element(el) => Some(DomNode::Element {
            name: el.name().to_string(),
            attrs: el
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children: node.children().filter_map(convert).collect(),
        }),
        Node::Text(text) => Some(DomNode::Text {
            data: (**text).to_owned(),
        }),
        Node::Comment(comment) => Some(DomNode::Comment {
            data: (**comment).to_owned(),
        }),
        _ => None,
    }
}

/// Serialize a document, doctype first.
pub fn serialize_document(doc: &DomDocument) -> String {
    let mut out = String::new();
    if let Some(name) = &doc.doctype {
        out.push_str("<!DOCTYPE ");
        out.push_str(name);
        out.push('>');
    }
    write_node(&doc.root, false, &mut out);
    out
}

/// Serialize a list of sibling nodes (the `innerHTML` of their parent).
pub fn serialize_nodes(nodes: &[DomNode], parent: Option<&str>) -> String {
    let raw = parent.is_some_and(|p| RAW_TEXT_ELEMENTS.contains(&p));
    let mut out = String::new();
    for node in nodes {
        write_node(node, raw, &mut out);
    }
    out
}

fn write_node(node: &DomNode, raw_text: bool, out: &mut String) {
    match node {
        DomNode::Text { data } if raw_text => out.push_str(data),
        DomNode::Text { data } => escape_into(data, false, out),
        DomNode::Comment { data } => {
            out.push_str("<!--");
            out.push_str(data);
            out.push_str("-->");
        }
        DomNode::Element {
            name,
            attrs,
            children,
        } => {
            out.push('<');
            out.push_str(name);
            for (key, value) in attrs {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                escape_into(value, true, out);
                out.push('"');
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&name.as_str()) {
                return;
            }

            let raw = RAW_TEXT_ELEMENTS.contains(&name.as_str());
            for child in children {
                write_node(child, raw, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
    }
}

fn escape_into(s: &str, attribute: bool, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}
