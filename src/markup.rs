//! Markup canonicalization.
//!
//! Entries are validated with `roxmltree` (namespace-aware, rejects anything
//! that is not well-formed) and then re-serialized from `quick-xml` events so
//! that the source attribute order, prefixes and escaping survive untouched.
//!
//! Layout rules:
//! - element-only content is indented two spaces per level, one child per line;
//! - whitespace-only text between elements is dropped;
//! - mixed content, text-only content and anything under
//!   `xml:space="preserve"` is written inline, verbatim;
//! - elements without children become self-closing.
//!
//! The result parses back to the same layout, so canonicalizing is idempotent.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

const INDENT: &str = "  ";
const UTF8_BOM: &str = "\u{feff}";

/// Canonicalize a markup entry. `part` only names the entry in errors.
pub fn canonicalize(part: &str, bytes: &[u8]) -> Result<String> {
    let malformed = |reason: String| Error::MalformedMarkup {
        part: part.to_string(),
        reason,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| malformed(format!("not UTF-8: {}", e)))?;
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);

    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(text, options).map_err(|e| malformed(e.to_string()))?;

    let prolog = read_nodes(text).map_err(malformed)?;

    let mut out = String::with_capacity(text.len());
    for node in &prolog {
        // Whitespace around the root element carries no meaning
        if let Node::Text(t) = node {
            if t.trim().is_empty() {
                continue;
            }
        }
        write_node(&mut out, node, 0, false);
    }
    Ok(out)
}

/// Indent every canonical line for embedding in a document block, trimming
/// trailing whitespace per line.
pub fn indent_lines(canonical: &str, indent: &str) -> String {
    let mut out = String::with_capacity(canonical.len() + canonical.len() / 8);
    for line in canonical.lines() {
        let line = line.trim_end();
        if !line.is_empty() {
            out.push_str(indent);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

#[derive(Debug)]
enum Node {
    Element(Element),
    /// Raw, still-escaped character data
    Text(String),
    /// Comments, CDATA, processing instructions, declarations; written as-is
    Raw(String),
}

#[derive(Debug)]
struct Element {
    start: String,
    name: String,
    preserve: bool,
    children: Vec<Node>,
}

impl Element {
    fn has_significant_text(&self) -> bool {
        self.children.iter().any(|child| match child {
            Node::Text(t) => !t.trim().is_empty(),
            Node::Raw(r) => r.starts_with("<![CDATA["),
            Node::Element(_) => false,
        })
    }

    fn has_elements(&self) -> bool {
        self.children.iter().any(|c| !matches!(c, Node::Text(_)))
    }
}

fn read_nodes(text: &str) -> std::result::Result<Vec<Node>, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut top: Vec<Node> = Vec::new();
    let mut stack: Vec<Element> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {}", reader.buffer_position(), e))?;

        let parent_preserve = stack.last().map(|e| e.preserve).unwrap_or(false);
        let node = match event {
            Event::Start(start) => {
                stack.push(open_element(&start, parent_preserve)?);
                continue;
            }
            Event::End(_) => match stack.pop() {
                Some(element) => Node::Element(element),
                None => return Err("unbalanced end tag".to_string()),
            },
            Event::Empty(start) => Node::Element(open_element(&start, parent_preserve)?),
            Event::Text(t) => Node::Text(utf8(&t)?.to_string()),
            Event::CData(c) => Node::Raw(format!("<![CDATA[{}]]>", utf8(&c)?)),
            Event::Comment(c) => Node::Raw(format!("<!--{}-->", utf8(&c)?)),
            Event::Decl(d) => Node::Raw(format!("<?{}?>", utf8(&d)?)),
            Event::PI(p) => Node::Raw(format!("<?{}?>", utf8(&p)?)),
            Event::DocType(d) => Node::Raw(format!("<!DOCTYPE {}>", utf8(&d)?.trim())),
            Event::Eof => break,
        };

        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => top.push(node),
        }
    }

    if !stack.is_empty() {
        return Err("unexpected end of input inside an element".to_string());
    }
    Ok(top)
}

fn utf8(bytes: &[u8]) -> std::result::Result<&str, String> {
    std::str::from_utf8(bytes).map_err(|e| e.to_string())
}

/// Rebuild a start tag from its name and attributes, single-spaced and
/// double-quoted, keeping source order and escaping.
fn open_element(start: &BytesStart<'_>, parent_preserve: bool) -> std::result::Result<Element, String> {
    let name = utf8(start.name().as_ref())?.to_string();
    let mut tag = format!("<{}", name);
    let mut preserve = parent_preserve;

    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = utf8(attr.key.as_ref())?;
        let value = utf8(&attr.value)?;
        if key == "xml:space" {
            preserve = value == "preserve";
        }
        // Values quoted with ' may contain a bare "
        let value: Cow<'_, str> = if value.contains('"') {
            Cow::Owned(value.replace('"', "&quot;"))
        } else {
            Cow::Borrowed(value)
        };
        tag.push(' ');
        tag.push_str(key);
        tag.push_str("=\"");
        tag.push_str(&value);
        tag.push('"');
    }

    Ok(Element {
        start: tag,
        name,
        preserve,
        children: Vec::new(),
    })
}

fn write_node(out: &mut String, node: &Node, depth: usize, inline: bool) {
    match node {
        Node::Element(element) => write_element(out, element, depth, inline),
        Node::Text(text) => out.push_str(text),
        Node::Raw(raw) => {
            if !inline {
                push_indent(out, depth);
            }
            out.push_str(raw);
            if !inline {
                out.push('\n');
            }
        }
    }
}

fn write_element(out: &mut String, element: &Element, depth: usize, inline: bool) {
    if !inline {
        push_indent(out, depth);
    }

    // Text-only content is kept whole, even when it is all whitespace
    let verbatim = inline
        || element.preserve
        || element.has_significant_text()
        || !element.has_elements();
    let children: Vec<&Node> = if verbatim {
        element.children.iter().collect()
    } else {
        element
            .children
            .iter()
            .filter(|c| !matches!(c, Node::Text(_)))
            .collect()
    };

    if children.is_empty() {
        out.push_str(&element.start);
        out.push_str("/>");
    } else if verbatim {
        out.push_str(&element.start);
        out.push('>');
        for child in children {
            write_node(out, child, depth + 1, true);
        }
        out.push_str("</");
        out.push_str(&element.name);
        out.push('>');
    } else {
        out.push_str(&element.start);
        out.push_str(">\n");
        for child in children {
            write_node(out, child, depth + 1, false);
        }
        push_indent(out, depth);
        out.push_str("</");
        out.push_str(&element.name);
        out.push('>');
    }

    if !inline {
        out.push('\n');
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}
