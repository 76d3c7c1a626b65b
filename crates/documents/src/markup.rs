//! Element-tree view over quick-xml, sized for the UBL subset this crate
//! writes and checks.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::codec::NOT_APPLICABLE;

/// Fill blank values so no element is ever written empty. Control
/// characters other than whitespace are not representable in XML 1.0.
fn filled(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return NOT_APPLICABLE.to_string();
    }
    trimmed
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriteError {
    Unclosed(Vec<&'static str>),
    Io(String),
}

/// Indented writer that tracks open elements.
pub(crate) struct XmlWriter {
    inner: Writer<Vec<u8>>,
    open: Vec<&'static str>,
    failed: Option<String>,
}

impl XmlWriter {
    pub(crate) fn new() -> Self {
        let mut w = Self {
            inner: Writer::new_with_indent(Vec::with_capacity(8 * 1024), b' ', 2),
            open: Vec::new(),
            failed: None,
        };
        w.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
        w
    }

    fn emit(&mut self, event: Event<'_>) {
        if self.failed.is_some() {
            return;
        }
        if let Err(e) = self.inner.write_event(event) {
            self.failed = Some(e.to_string());
        }
    }

    fn start<'a>(name: &'a str, attrs: &[(&str, &str)]) -> BytesStart<'a> {
        let mut start = BytesStart::new(name);
        for (key, value) in attrs {
            let value = filled(value);
            start.push_attribute((*key, value.as_str()));
        }
        start
    }

    pub(crate) fn open(&mut self, name: &'static str, attrs: &[(&str, &str)]) {
        self.emit(Event::Start(Self::start(name, attrs)));
        self.open.push(name);
    }

    pub(crate) fn close(&mut self) {
        if let Some(name) = self.open.pop() {
            self.emit(Event::End(BytesEnd::new(name)));
        }
    }

    /// Text element; blank values are written as the filler.
    pub(crate) fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], value: &str) {
        let text = filled(value);
        self.emit(Event::Start(Self::start(name, attrs)));
        self.emit(Event::Text(BytesText::new(&text)));
        self.emit(Event::End(BytesEnd::new(name)));
    }

    /// Text element written only when a non-blank value is present.
    pub(crate) fn leaf_opt(&mut self, name: &str, attrs: &[(&str, &str)], value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.leaf(name, attrs, value);
        }
    }

    pub(crate) fn finish(self) -> Result<String, WriteError> {
        if let Some(reason) = self.failed {
            return Err(WriteError::Io(reason));
        }
        if !self.open.is_empty() {
            return Err(WriteError::Unclosed(self.open));
        }
        String::from_utf8(self.inner.into_inner()).map_err(|e| WriteError::Io(e.to_string()))
    }
}

/// Parsed element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub(crate) fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a chain of first-match child names.
    pub(crate) fn path(&self, names: &[&str]) -> Option<&Element> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    pub(crate) fn value(&self) -> &str {
        self.text.trim()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.children.is_empty() && self.value().is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct Parsed {
    pub has_declaration: bool,
    pub root: Element,
}

fn element(start: &BytesStart<'_>) -> Result<Element, String> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| format!("bad attribute in <{name}>: {e}"))?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|e| e.to_string())?;
        let value = attr
            .unescape_value()
            .map_err(|e| format!("bad attribute {key} in <{name}>: {e}"))?;
        attrs.push((key.to_string(), value.into_owned()));
    }
    Ok(Element {
        name,
        attrs,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err("multiple root elements".to_string()),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), String> {
    match stack.last_mut() {
        Some(top) => top.text.push_str(text),
        None if text.trim().is_empty() => {}
        None => return Err("text outside the root element".to_string()),
    }
    Ok(())
}

pub(crate) fn parse(input: &str) -> Result<Parsed, String> {
    let mut reader = Reader::from_str(input.trim_start_matches('\u{feff}'));
    reader.config_mut().trim_text(true);

    let mut has_declaration = false;
    let mut seen_markup = false;
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("{e} at byte {}", reader.error_position()))?;
        match event {
            Event::Decl(_) => {
                has_declaration |= !seen_markup;
                seen_markup = true;
            }
            Event::Start(start) => {
                seen_markup = true;
                let element = element(&start)?;
                if root.is_some() && stack.is_empty() {
                    return Err(format!("content after root element: <{}>", element.name));
                }
                stack.push(element);
            }
            Event::Empty(start) => {
                seen_markup = true;
                let element = element(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                let element = stack
                    .pop()
                    .ok_or_else(|| format!("unexpected end tag </{name}>"))?;
                if element.name != name {
                    return Err(format!("end tag </{name}> does not match <{}>", element.name));
                }
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data).map_err(|e| e.to_string())?;
                push_text(&mut stack, text)?;
            }
            Event::Eof => break,
            _ => seen_markup = true,
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("element <{}> is never closed", open.name));
    }
    let root = root.ok_or("document has no root element")?;
    Ok(Parsed {
        has_declaration,
        root,
    })
}
