//! Mutable XML element tree used to edit LEMS documents in memory.
use std::fs;
use std::path::Path;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, SedError};

/// A node of an XML tree.
#[derive(Debug, PartialEq, Clone)]
pub enum XmlNode {
    Element(XmlElement),
    /// Character data, kept escaped as it appears in the document.
    Text(String),
    CData(String),
    Comment(String),
}

/// An XML element with its attributes (in document order) and children.
#[derive(Debug, PartialEq, Clone)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element.
    pub fn new(name: &str) -> Self {
        XmlElement {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns the qualified name of the element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the element without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    /// Returns the (unescaped) value of an attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Set the value of an attribute, keeping its position if it already exists.
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((key.to_string(), value.to_string())),
        }
    }

    /// Builder variant of [`XmlElement::set_attribute`].
    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Remove an attribute, returning its value.
    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<XmlNode> {
        &mut self.children
    }

    /// Iterate over the child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Iterate mutably over the child elements.
    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Iterate over the child elements with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.child_elements()
            .filter(move |element| element.local_name() == name)
    }

    /// Iterate mutably over the child elements with the given local name.
    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut XmlElement> + 'a {
        self.child_elements_mut()
            .filter(move |element| element.local_name() == name)
    }

    /// Append a child element.
    pub fn append(&mut self, element: XmlElement) {
        self.children.push(XmlNode::Element(element));
    }

    /// Remove the child elements with the given local name, returning how many were removed.
    pub fn remove_children_named(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|node| match node {
            XmlNode::Element(element) => element.local_name() != name,
            _ => true,
        });
        before - self.children.len()
    }

    /// Returns the concatenated (unescaped) text content of the element.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .map(|node| match node {
                XmlNode::Text(raw) => unescape(raw)
                    .map(|text| text.into_owned())
                    .unwrap_or_else(|_| raw.clone()),
                XmlNode::CData(text) => text.clone(),
                _ => String::new(),
            })
            .collect()
    }

    fn push_raw_text(&mut self, raw: &str) {
        if let Some(XmlNode::Text(text)) = self.children.last_mut() {
            text.push_str(raw);
        } else {
            self.children.push(XmlNode::Text(raw.to_string()));
        }
    }
}

/// Returns the part of a qualified name after its namespace prefix.
pub fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| SedError::Xml(e.to_string()))
}

fn element_from_start(start: &BytesStart) -> Result<XmlElement> {
    let mut element = XmlElement::new(utf8(start.name().as_ref())?);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| SedError::Xml(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?;
        let value = unescape(utf8(&attr.value)?).map_err(|e| SedError::Xml(e.to_string()))?;
        element.attributes.push((key.to_string(), value.into_owned()));
    }
    Ok(element)
}

fn attach(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.append(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(SedError::Xml(
                "document has more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

/// Parse an XML document into its root element.
///
/// With `remove_blank_text`, whitespace-only text between elements is dropped so
/// that the document can be pretty-printed again.
pub fn parse_xml(source: &str, remove_blank_text: bool) -> Result<XmlElement> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(remove_blank_text);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SedError::Xml("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let raw = utf8(&text)?;
                    if !raw.is_empty() {
                        parent.push_raw_text(raw);
                    }
                }
            }
            Event::GeneralRef(reference) => {
                if let Some(parent) = stack.last_mut() {
                    parent.push_raw_text(&format!("&{};", utf8(&reference)?));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(XmlNode::CData(utf8(&data)?.to_string()));
                }
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(XmlNode::Comment(utf8(&comment)?.to_string()));
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }

    if !stack.is_empty() {
        return Err(SedError::Xml(format!(
            "element `{}` is not closed",
            stack[stack.len() - 1].name
        )));
    }
    root.ok_or_else(|| SedError::Xml("document has no root element".to_string()))
}

/// Read an XML file into its root element.
pub fn read_xml_file<P: AsRef<Path>>(path: P, remove_blank_text: bool) -> Result<XmlElement> {
    let source = fs::read_to_string(path.as_ref()).map_err(|e| {
        SedError::IOError(format!("{}: {}", path.as_ref().display(), e))
    })?;
    parse_xml(&source, remove_blank_text)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in element.attributes.iter() {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in element.children.iter() {
        match child {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(raw) => writer.write_event(Event::Text(BytesText::from_escaped(raw.as_str())))?,
            XmlNode::CData(data) => writer.write_event(Event::CData(BytesCData::new(data.as_str())))?,
            XmlNode::Comment(raw) => {
                writer.write_event(Event::Comment(BytesText::from_escaped(raw.as_str())))?
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

/// Serialize an element as a standalone XML document.
pub fn write_xml(root: &XmlElement, pretty_print: bool) -> Result<String> {
    let mut writer = if pretty_print {
        Writer::new_with_indent(Vec::new(), b' ', 2)
    } else {
        Writer::new(Vec::new())
    };
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_element(&mut writer, root)?;
    let mut xml = String::from_utf8(writer.into_inner()).map_err(|e| SedError::Xml(e.to_string()))?;
    xml.push('\n');
    Ok(xml)
}

/// Write an element as an XML file.
pub fn write_xml_file<P: AsRef<Path>>(root: &XmlElement, path: P, pretty_print: bool) -> Result<()> {
    let xml = write_xml(root, pretty_print)?;
    fs::write(path, xml)?;
    Ok(())
}
