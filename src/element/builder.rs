/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use crate::Location;
use crate::SaxElement;
use crate::SaxError;
use crate::SaxHandler;

use super::Element;
use super::Node;
use super::error::description;

/// Builds an [Element] tree from the SAX parser events.
pub(crate) struct ElementBuilder {
    stack: Vec<Element>,
    root: Option<Element>,
}

impl ElementBuilder {
    pub(crate) fn new() -> Self {
        ElementBuilder {
            stack: Vec::new(),
            root: None,
        }
    }

    pub(crate) fn take(&mut self) -> Option<Element> {
        self.root.take()
    }

    fn close(&mut self) {
        let Some(element) = self.stack.pop() else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(Node::Element(element)),
            None => self.root = Some(element),
        }
    }
}

impl SaxHandler for ElementBuilder {
    fn handle_element(&mut self, element: &SaxElement, _: &Location) -> Result<(), SaxError> {
        match element {
            SaxElement::StartTag(name) => {
                if self.stack.is_empty() && self.root.is_some() {
                    return Err(SaxError::BadXml(description::SECOND_ROOT));
                }
                self.stack.push(Element::new(*name));
            }
            SaxElement::Attribute(name, value) => {
                let Some(tag) = self.stack.last_mut() else {
                    return Err(SaxError::HandlerAbort);
                };
                if tag.attribute(name).is_some() {
                    return Err(SaxError::BadXml(description::DUPLICATE_ATTRIBUTE));
                }
                tag.attributes.push((name.to_string(), value.to_string()));
            }
            SaxElement::StartTagContent => {}
            SaxElement::StartTagEmpty => self.close(),
            SaxElement::EndTag(name) => {
                match self.stack.last() {
                    Some(tag) if tag.name() == *name => {}
                    _ => return Err(SaxError::BadXml(description::TAG_MISMATCH)),
                }
                self.close();
            }
            SaxElement::CData(cdata) => {
                if let Some(tag) = self.stack.last_mut() {
                    tag.append_text(cdata);
                }
            }
        }
        Ok(())
    }
}
