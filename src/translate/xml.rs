//! XML → JSON translation for IRS e-files.
//!
//! Conversion rules:
//! - only local names are kept; namespace declarations and `xsi:` attributes
//!   are dropped
//! - non-ASCII characters are removed before parsing
//! - attributes are flattened into the enclosing object as `Element@attr`
//! - an element with only text collapses to its string value
//! - repeated siblings become an array, in document order
//! - elements with no text, children, or attributes are dropped
//!
//! Inside arrays there is no enclosing object to flatten into, so an item
//! keeps its attributes as `@attr` keys and any text under `_`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use super::{TranslateError, Translator};

/// Default translator for e-file XML documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlJsonTranslator;

impl XmlJsonTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl Translator for XmlJsonTranslator {
    fn translate(&self, raw: &[u8]) -> Result<Value, TranslateError> {
        let root = parse_tree(&strip_non_ascii(raw))?;
        let mut out = Map::new();
        insert_children(&mut out, std::slice::from_ref(&root));
        Ok(Value::Object(out))
    }
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

fn conversion(e: impl std::fmt::Display) -> TranslateError {
    TranslateError::Conversion(e.to_string())
}

fn strip_non_ascii(raw: &[u8]) -> String {
    // Every byte of a multi-byte UTF-8 sequence is >= 0x80, so this drops
    // whole characters and leaves valid ASCII.
    raw.iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

fn open_node(start: &BytesStart<'_>) -> Result<Node, TranslateError> {
    let name = std::str::from_utf8(start.local_name().as_ref())
        .map_err(conversion)?
        .to_string();

    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(conversion)?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        if attr.key.prefix().is_some_and(|p| p.as_ref() == b"xsi") {
            continue;
        }
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(conversion)?
            .to_string();
        let value = attr.unescape_value().map_err(conversion)?.trim().to_string();
        attrs.push((key, value));
    }

    Ok(Node {
        name,
        attrs,
        ..Node::default()
    })
}

fn parse_tree(xml: &str) -> Result<Node, TranslateError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event().map_err(conversion)? {
            Event::Start(e) => {
                if root.is_some() {
                    return Err(conversion("multiple root elements"));
                }
                stack.push(open_node(&e)?);
            }
            Event::Empty(e) => {
                let node = open_node(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => return Err(conversion("multiple root elements")),
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| conversion("unbalanced closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(conversion)?;
                match stack.last_mut() {
                    Some(node) => node.text.push_str(text.trim()),
                    None if text.trim().is_empty() => {}
                    None => return Err(conversion("text outside of root element")),
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    let inner = c.into_inner();
                    node.text
                        .push_str(std::str::from_utf8(&inner).map_err(conversion)?.trim());
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctypes.
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(conversion("unexpected end of document"));
    }
    root.ok_or_else(|| conversion("empty document"))
}

/// Content of an element that has an enclosing object to flatten into.
fn element_content(node: &Node) -> Option<Value> {
    if !node.children.is_empty() {
        let mut map = Map::new();
        insert_children(&mut map, &node.children);
        return (!map.is_empty()).then_some(Value::Object(map));
    }
    (!node.text.is_empty()).then(|| Value::String(node.text.clone()))
}

/// Value of an element that appears as an array item.
fn item_value(node: &Node) -> Value {
    if node.children.is_empty() && node.attrs.is_empty() {
        return Value::String(node.text.clone());
    }

    let mut map = Map::new();
    for (key, value) in &node.attrs {
        map.insert(format!("@{}", key), Value::String(value.clone()));
    }
    if node.children.is_empty() {
        if !node.text.is_empty() {
            map.insert("_".to_string(), Value::String(node.text.clone()));
        }
    } else {
        insert_children(&mut map, &node.children);
    }
    Value::Object(map)
}

fn insert_children(map: &mut Map<String, Value>, children: &[Node]) {
    // Group by name, preserving first-appearance order.
    let mut groups: Vec<(&str, Vec<&Node>)> = Vec::new();
    for child in children {
        match groups.iter_mut().find(|(name, _)| *name == child.name) {
            Some((_, nodes)) => nodes.push(child),
            None => groups.push((&child.name, vec![child])),
        }
    }

    for (name, nodes) in groups {
        if let [node] = nodes.as_slice() {
            for (attr, value) in &node.attrs {
                map.insert(format!("{}@{}", name, attr), Value::String(value.clone()));
            }
            if let Some(content) = element_content(node) {
                map.insert(name.to_string(), content);
            }
        } else {
            let items = nodes.into_iter().map(item_value).collect();
            map.insert(name.to_string(), Value::Array(items));
        }
    }
}
