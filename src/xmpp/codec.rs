/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use crate::Element;

/// Conversion between stanzas and their wire form.
pub trait StanzaCodec: Send + Sync {
    fn serialize(&self, stanza: &Element) -> Vec<u8>;

    /// Decodes the raw XML of a top level element named `name`.
    ///
    /// Returns None if the element cannot be decoded.
    fn deserialize(&self, name: &str, xml: &str) -> Option<Element>;
}

/// Default codec using the [Element] tree directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlCodec;

impl StanzaCodec for XmlCodec {
    fn serialize(&self, stanza: &Element) -> Vec<u8> {
        stanza.to_string().into_bytes()
    }

    fn deserialize(&self, name: &str, xml: &str) -> Option<Element> {
        let element = Element::parse(xml.as_bytes()).ok()?;
        if element.name() != name {
            return None;
        }
        Some(element)
    }
}
