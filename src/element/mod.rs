/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod builder;
mod error;

use std::fmt::Display;
use std::str::FromStr;

use crate::SaxParser;
use crate::entities::escape_fmt;
use crate::entities::escaped_size;

pub(crate) use builder::ElementBuilder;
use error::description;
pub use error::ElementError;

/// A child of an [Element].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An owned XML element.
///
/// This is the in-memory form of stanzas. Elements are plain values which
/// can be cloned and moved between threads freely, so the I/O thread can
/// hand them to any number of subscribers.
///
/// ```
/// use iksjab::Element;
///
/// let message = Element::new("message")
///     .with_attribute("to", "juliet@example.com")
///     .with_child(Element::new("body").with_text("Art thou not Romeo?"));
/// assert_eq!(
///     message.to_string(),
///     "<message to=\"juliet@example.com\"><body>Art thou not Romeo?</body></message>"
/// );
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Element {
        Element {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Parses a complete XML document into an element tree.
    pub fn parse(bytes: &[u8]) -> Result<Element, ElementError> {
        let mut parser = SaxParser::new();
        let mut builder = ElementBuilder::new();
        parser.parse_bytes_finish(&mut builder, bytes)?;
        builder
            .take()
            .ok_or(ElementError::BadXml(description::NO_DOCUMENT))
    }

    /// Full name of the tag, including the namespace prefix if any.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the tag without the namespace prefix.
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Value of the `xmlns` attribute.
    pub fn namespace(&self) -> Option<&str> {
        self.attribute("xmlns")
    }

    /// True if the local name and the declared namespace both match.
    pub fn is(&self, local_name: &str, namespace: &str) -> bool {
        self.local_name() == local_name && self.namespace() == Some(namespace)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Sets an attribute, replacing the old value if it already exists.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) -> &mut Element {
        let value = value.into();
        match self.attributes.iter_mut().find(|(attr, _)| attr == name) {
            Some((_, old)) => *old = value,
            None => self.attributes.push((name.to_string(), value)),
        }
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Element {
        self.set_attribute(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Element {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: &str) -> Element {
        self.append_text(text);
        self
    }

    /// Appends a child element and returns a reference to it.
    pub fn append_child(&mut self, child: Element) -> &mut Element {
        self.children.push(Node::Element(child));
        match self.children.last_mut() {
            Some(Node::Element(element)) => element,
            _ => unreachable!(),
        }
    }

    /// Appends character data, merging it with a directly preceding text node.
    pub fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Child elements, skipping the text nodes.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given full name.
    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.children().find(|child| child.name() == name)
    }

    /// First child element with the given local name and namespace.
    pub fn find_child_ns(&self, local_name: &str, namespace: &str) -> Option<&Element> {
        self.children()
            .find(|child| child.is(local_name, namespace))
    }

    /// Concatenated character data of the direct text children.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            if let Node::Text(cdata) = node {
                text.push_str(cdata);
            }
        }
        text
    }

    pub fn str_size(&self) -> usize {
        let mut size = 1 + self.name.len();
        for (name, value) in &self.attributes {
            // space, =" and " characters
            size += 1 + name.len() + 2 + escaped_size(value) + 1;
        }
        if self.children.is_empty() {
            return size + 2;
        }
        size += 1;
        for node in &self.children {
            size += match node {
                Node::Element(element) => element.str_size(),
                Node::Text(cdata) => escaped_size(cdata),
            };
        }
        size + 3 + self.name.len()
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<")?;
        f.write_str(&self.name)?;
        for (name, value) in &self.attributes {
            f.write_str(" ")?;
            f.write_str(name)?;
            f.write_str("=\"")?;
            escape_fmt(value, f)?;
            f.write_str("\"")?;
        }
        if self.children.is_empty() {
            return f.write_str("/>");
        }
        f.write_str(">")?;
        for node in &self.children {
            match node {
                Node::Element(element) => Display::fmt(element, f)?,
                Node::Text(cdata) => escape_fmt(cdata, f)?,
            }
        }
        f.write_str("</")?;
        f.write_str(&self.name)?;
        f.write_str(">")
    }
}

impl FromStr for Element {
    type Err = ElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Element::parse(s.as_bytes())
    }
}

#[cfg(test)]
mod tests;
