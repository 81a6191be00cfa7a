/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod error;

use std::fmt::Display;

pub use error::SaxError;
use error::description;

/// An XML element returned from the parser.
#[derive(Debug, Eq, PartialEq)]
pub enum SaxElement<'a> {
    /// Name of a start tag or an empty element tag.
    ///
    /// Sent as soon as the name is parsed, attributes follow.
    StartTag(&'a str),

    /// A tag attribute for the last StartTag.
    ///
    /// First argument is the attribute name and the second argument is the
    /// attribute value with all references replaced.
    Attribute(&'a str, &'a str),

    /// The last StartTag is closed with '>' and has content.
    StartTagContent,

    /// The last StartTag is closed with '/>' and has no content.
    StartTagEmpty,

    /// An end tag, sent when its closing '>' is parsed.
    EndTag(&'a str),

    /// Character data.
    ///
    /// A continuous block of text can be delivered in several parts when the
    /// input arrives in several parse calls.
    CData(&'a str),
}

pub trait SaxHandler {
    /// Called for every parsed element.
    ///
    /// The `location` points at the byte which completed the element, so
    /// `location.bytes` is the absolute offset of that byte.
    fn handle_element(&mut self, element: &SaxElement, location: &Location)
    -> Result<(), SaxError>;
}

/// A position in the parser input byte stream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Location {
    /// Byte position in the input stream.
    pub bytes: usize,
    /// How many lines have been parsed.
    pub lines: usize,
    /// How many bytes after the last newline character.
    pub column: usize,
}

impl Location {
    pub fn new() -> Self {
        Location::default()
    }

    fn advance(&mut self, c: u8) {
        self.bytes += 1;
        if c == b'\n' {
            self.lines += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "byte: {}, line: {}, column: {}",
            self.bytes, self.lines, self.column
        )
    }
}

/// SAX (Simple API for XML) based XML parser for XMPP streams.
///
/// Bytes can be fed in arbitrary pieces, the handler is invoked for each
/// element as soon as it is complete. Only the XML subset allowed on XMPP
/// streams (RFC 6120 section 11) is accepted: comments, document type
/// declarations and processing instructions other than the XML declaration
/// are rejected.
///
/// ```
/// use iksjab::{Location, SaxElement, SaxError, SaxHandler, SaxParser};
///
/// struct Printer;
/// impl SaxHandler for Printer {
///     fn handle_element(&mut self, element: &SaxElement, _: &Location) -> Result<(), SaxError> {
///         println!("{element:?}");
///         Ok(())
///     }
/// }
///
/// let mut parser = SaxParser::new();
/// parser.parse_bytes(&mut Printer, b"<message><bo").unwrap();
/// parser.parse_bytes(&mut Printer, b"dy>hi</body></message>").unwrap();
/// parser.parse_finish().unwrap();
/// ```
pub struct SaxParser {
    state: State,
    uni_len: u32,
    uni_left: u32,
    uni_char: u32,
    depth: usize,
    is_end_tag: bool,
    is_quot_value: bool,
    is_value_ref: bool,
    seen_content: bool,
    failed: bool,
    value_pos: usize,
    char_ref_value: u32,
    buffer: Vec<u8>,
    text: Vec<u8>,
    ref_buffer: Vec<u8>,
    location: Location,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum State {
    Prolog,
    TagStart,
    PI,
    PIEnd,
    Markup,
    CDataSectionStart(usize),
    CDataSectionBody,
    CDataSectionMaybeEnd,
    CDataSectionMaybeEnd2,
    TagName,
    EndTagWhitespace,
    EmptyTagEnd,
    AttributeWhitespace,
    AttributeName,
    AttributeEq,
    AttributeValueStart,
    AttributeValue,
    CData,
    Reference,
    CharReference,
    CharReferenceBody,
    HexCharReference,
    Entity,
    Epilog,
}

const INITIAL_BUFFER_CAPACITY: usize = 128;

const REF_BUFFER_SIZE: usize = 8;

const CDATA_SECTION_START: &[u8] = b"CDATA[";

macro_rules! whitespace {
    () => {
        b' ' | b'\t' | b'\r' | b'\n'
    };
}

macro_rules! xml_error {
    ($a:ident) => {
        return Err(SaxError::BadXml(description::$a))
    };
}

fn is_valid_xml_char(c: u32) -> bool {
    matches!(c, 0x09 | 0x0a | 0x0d | 0x20..=0xd7ff | 0xe000..=0xfffd | 0x10000..=0x10ffff)
}

fn extend(buffer: &mut Vec<u8>, bytes: &[u8]) -> Result<(), SaxError> {
    if buffer.try_reserve(bytes.len()).is_err() {
        return Err(SaxError::NoMemory);
    }
    buffer.extend_from_slice(bytes);
    Ok(())
}

fn as_str(bytes: &[u8]) -> Result<&str, SaxError> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(_) => xml_error!(UTF8_INVALID_PREFIX_BYTE),
    }
}

impl SaxParser {
    /// Creates a new SAX parser instance.
    pub fn new() -> SaxParser {
        SaxParser {
            state: State::Prolog,
            uni_len: 0,
            uni_left: 0,
            uni_char: 0,
            depth: 0,
            is_end_tag: false,
            is_quot_value: false,
            is_value_ref: false,
            seen_content: false,
            failed: false,
            value_pos: 0,
            char_ref_value: 0,
            buffer: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            text: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            ref_buffer: Vec::with_capacity(REF_BUFFER_SIZE),
            location: Location::new(),
        }
    }

    /// Resets the parser into a clean state, keeping the allocated buffers.
    pub fn reset(&mut self) {
        self.state = State::Prolog;
        self.uni_len = 0;
        self.uni_left = 0;
        self.uni_char = 0;
        self.depth = 0;
        self.is_end_tag = false;
        self.is_quot_value = false;
        self.is_value_ref = false;
        self.seen_content = false;
        self.failed = false;
        self.value_pos = 0;
        self.char_ref_value = 0;
        self.buffer.clear();
        self.text.clear();
        self.ref_buffer.clear();
        self.location = Location::new();
    }

    /// Position of the last parsed byte.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Number of currently open tags.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Checks if the document is complete.
    pub fn parse_finish(&mut self) -> Result<(), SaxError> {
        if !self.seen_content {
            xml_error!(DOC_NO_CONTENT);
        }
        if self.depth > 0 {
            xml_error!(DOC_OPEN_TAGS);
        }
        if self.state != State::Epilog {
            xml_error!(DOC_OPEN_MARKUP);
        }
        Ok(())
    }

    /// Parses given bytes and checks if the document is complete.
    pub fn parse_bytes_finish(
        &mut self,
        handler: &mut impl SaxHandler,
        bytes: &[u8],
    ) -> Result<(), SaxError> {
        self.parse_bytes(handler, bytes)?;
        self.parse_finish()
    }

    /// Parses given XML bytes.
    ///
    /// After an error the parser refuses further input until it is reset.
    pub fn parse_bytes(
        &mut self,
        handler: &mut impl SaxHandler,
        bytes: &[u8],
    ) -> Result<(), SaxError> {
        if self.failed {
            xml_error!(PARSER_REUSE);
        }
        let result = self.parse_chunk(handler, bytes);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn flush_text(&mut self, handler: &mut impl SaxHandler, complete: bool) -> Result<(), SaxError> {
        if self.text.is_empty() {
            return Ok(());
        }
        let valid = match std::str::from_utf8(&self.text) {
            Ok(_) => self.text.len(),
            Err(err) => {
                if complete || err.error_len().is_some() {
                    xml_error!(UTF8_INVALID_PREFIX_BYTE);
                }
                // Keep the incomplete sequence for the next chunk
                err.valid_up_to()
            }
        };
        if valid > 0 {
            let s = as_str(&self.text[..valid])?;
            handler.handle_element(&SaxElement::CData(s), &self.location)?;
            self.text.drain(..valid);
        }
        Ok(())
    }

    fn push_char_ref(&mut self) -> Result<(), SaxError> {
        let value = self.char_ref_value;
        if !is_valid_xml_char(value) {
            xml_error!(CHAR_INVALID);
        }
        let Some(c) = char::from_u32(value) else {
            xml_error!(CHAR_INVALID);
        };
        let mut buf = [0u8; 4];
        let encoded = c.encode_utf8(&mut buf).as_bytes();
        if self.is_value_ref {
            extend(&mut self.buffer, encoded)
        } else {
            extend(&mut self.text, encoded)
        }
    }

    fn close_tag(&mut self) {
        self.depth -= 1;
        if self.depth == 0 {
            self.state = State::Epilog;
        } else {
            self.state = State::CData;
        }
    }

    fn parse_chunk(&mut self, handler: &mut impl SaxHandler, bytes: &[u8]) -> Result<(), SaxError> {
        let mut pos: usize = 0;
        let mut back: usize = 0;

        while pos < bytes.len() {
            let mut redo = false;
            let c = bytes[pos];

            if self.uni_left > 0 {
                if c & 0xc0 != 0x80 {
                    xml_error!(UTF8_INVALID_CONT_BYTE);
                }
                self.uni_char <<= 6;
                self.uni_char += c as u32 & 0x3f;
                self.uni_left -= 1;
                if self.uni_left == 0 {
                    // Sequences longer than the actual character codepoint
                    // size are security hazards.
                    if (self.uni_len == 2 && self.uni_char <= 0x7f)
                        || (self.uni_len == 3 && self.uni_char <= 0x7ff)
                        || (self.uni_len == 4 && self.uni_char <= 0xffff)
                    {
                        xml_error!(UTF8_OVERLONG_SEQUENCE);
                    }
                    if !is_valid_xml_char(self.uni_char) {
                        xml_error!(CHAR_INVALID);
                    }
                }
            } else if c & 0x80 == 0x80 {
                if c & 0x60 == 0x40 {
                    self.uni_len = 2;
                    self.uni_left = 1;
                    self.uni_char = c as u32 & 0x1f;
                } else if c & 0x70 == 0x60 {
                    self.uni_len = 3;
                    self.uni_left = 2;
                    self.uni_char = c as u32 & 0x0f;
                } else if c & 0x78 == 0x70 {
                    self.uni_len = 4;
                    self.uni_left = 3;
                    self.uni_char = c as u32 & 0x07;
                } else {
                    xml_error!(UTF8_INVALID_PREFIX_BYTE);
                }
            } else if c < 0x20 && c != 0x09 && c != 0x0a && c != 0x0d {
                xml_error!(CHAR_INVALID);
            }

            match self.state {
                State::Prolog | State::Epilog => match c {
                    b'<' => self.state = State::TagStart,
                    whitespace!() => (),
                    _ => xml_error!(DOC_CDATA_WITHOUT_PARENT),
                },

                State::TagStart => match c {
                    b'!' => self.state = State::Markup,
                    b'?' => {
                        if self.seen_content {
                            xml_error!(PI_NOT_ALLOWED);
                        }
                        self.state = State::PI;
                    }
                    b'/' => {
                        if self.depth == 0 {
                            xml_error!(TAG_CLOSE_WITHOUT_OPEN);
                        }
                        back = pos + 1;
                        self.is_end_tag = true;
                        self.state = State::TagName;
                    }
                    whitespace!() => xml_error!(TAG_WHITESPACE_START),
                    b'>' => xml_error!(TAG_EMPTY_NAME),
                    _ => {
                        if self.depth == 0 && self.seen_content {
                            xml_error!(TAG_OUTSIDE_ROOT);
                        }
                        self.depth += 1;
                        back = pos;
                        self.is_end_tag = false;
                        self.seen_content = true;
                        self.state = State::TagName;
                    }
                },

                State::PI => {
                    if c == b'?' {
                        self.state = State::PIEnd;
                    }
                }

                State::PIEnd => match c {
                    b'>' => self.state = State::Prolog,
                    b'?' => (),
                    _ => self.state = State::PI,
                },

                State::Markup => match c {
                    b'[' => {
                        if self.depth == 0 {
                            xml_error!(MARKUP_CDATA_SECTION_OUTSIDE_ROOT);
                        }
                        self.state = State::CDataSectionStart(0);
                    }
                    b'-' => xml_error!(COMMENT_NOT_ALLOWED),
                    b'D' => xml_error!(DOCTYPE_NOT_ALLOWED),
                    _ => xml_error!(MARKUP_UNRECOGNIZED),
                },

                State::CDataSectionStart(index) => {
                    if c != CDATA_SECTION_START[index] {
                        xml_error!(MARKUP_CDATA_SECTION_BAD_START);
                    }
                    if index + 1 == CDATA_SECTION_START.len() {
                        back = pos + 1;
                        self.state = State::CDataSectionBody;
                    } else {
                        self.state = State::CDataSectionStart(index + 1);
                    }
                }

                State::CDataSectionBody => {
                    if c == b']' {
                        extend(&mut self.text, &bytes[back..pos])?;
                        self.state = State::CDataSectionMaybeEnd;
                    }
                }

                State::CDataSectionMaybeEnd => match c {
                    b']' => self.state = State::CDataSectionMaybeEnd2,
                    _ => {
                        extend(&mut self.text, b"]")?;
                        back = pos;
                        self.state = State::CDataSectionBody;
                    }
                },

                State::CDataSectionMaybeEnd2 => match c {
                    b'>' => {
                        back = pos + 1;
                        self.state = State::CData;
                    }
                    b']' => extend(&mut self.text, b"]")?,
                    _ => {
                        extend(&mut self.text, b"]]")?;
                        back = pos;
                        self.state = State::CDataSectionBody;
                    }
                },

                State::TagName => match c {
                    b'/' | b'>' | whitespace!() => {
                        extend(&mut self.buffer, &bytes[back..pos])?;
                        if self.buffer.is_empty() {
                            xml_error!(TAG_EMPTY_NAME);
                        }
                        if self.is_end_tag {
                            match c {
                                b'/' => xml_error!(TAG_DOUBLE_END),
                                b'>' => {
                                    let name = as_str(&self.buffer)?;
                                    handler.handle_element(&SaxElement::EndTag(name), &self.location)?;
                                    self.buffer.clear();
                                    back = pos + 1;
                                    self.close_tag();
                                }
                                _ => self.state = State::EndTagWhitespace,
                            }
                        } else {
                            let name = as_str(&self.buffer)?;
                            handler.handle_element(&SaxElement::StartTag(name), &self.location)?;
                            self.buffer.clear();
                            match c {
                                b'/' => self.state = State::EmptyTagEnd,
                                b'>' => {
                                    handler.handle_element(&SaxElement::StartTagContent, &self.location)?;
                                    back = pos + 1;
                                    self.state = State::CData;
                                }
                                _ => self.state = State::AttributeWhitespace,
                            }
                        }
                    }
                    _ => (),
                },

                State::EndTagWhitespace => match c {
                    b'>' => {
                        let name = as_str(&self.buffer)?;
                        handler.handle_element(&SaxElement::EndTag(name), &self.location)?;
                        self.buffer.clear();
                        back = pos + 1;
                        self.close_tag();
                    }
                    whitespace!() => (),
                    _ => xml_error!(TAG_END_TAG_ATTRIBUTES),
                },

                State::EmptyTagEnd => match c {
                    b'>' => {
                        handler.handle_element(&SaxElement::StartTagEmpty, &self.location)?;
                        back = pos + 1;
                        self.close_tag();
                    }
                    _ => xml_error!(TAG_EMPTY_TAG_MISSING_END),
                },

                State::AttributeWhitespace => match c {
                    whitespace!() => (),
                    b'/' => self.state = State::EmptyTagEnd,
                    b'>' => {
                        handler.handle_element(&SaxElement::StartTagContent, &self.location)?;
                        back = pos + 1;
                        self.state = State::CData;
                    }
                    _ => {
                        back = pos;
                        self.state = State::AttributeName;
                        redo = true;
                    }
                },

                State::AttributeName => match c {
                    b'=' | whitespace!() => {
                        extend(&mut self.buffer, &bytes[back..pos])?;
                        if c == b'=' {
                            self.state = State::AttributeValueStart;
                        } else {
                            self.state = State::AttributeEq;
                        }
                    }
                    b'/' | b'>' | b'<' => xml_error!(TAG_ATTRIBUTE_BAD_NAME),
                    _ => (),
                },

                State::AttributeEq => match c {
                    b'=' => self.state = State::AttributeValueStart,
                    whitespace!() => (),
                    _ => xml_error!(TAG_ATTRIBUTE_WITHOUT_EQUAL),
                },

                State::AttributeValueStart => match c {
                    b'"' | b'\'' => {
                        self.is_quot_value = c == b'\'';
                        self.value_pos = self.buffer.len();
                        back = pos + 1;
                        self.state = State::AttributeValue;
                    }
                    whitespace!() => (),
                    _ => xml_error!(TAG_ATTRIBUTE_WITHOUT_QUOTE),
                },

                State::AttributeValue => {
                    if (self.is_quot_value && c == b'\'') || (!self.is_quot_value && c == b'"') {
                        extend(&mut self.buffer, &bytes[back..pos])?;
                        let name = as_str(&self.buffer[..self.value_pos])?;
                        let value = as_str(&self.buffer[self.value_pos..])?;
                        handler.handle_element(&SaxElement::Attribute(name, value), &self.location)?;
                        self.buffer.clear();
                        self.state = State::AttributeWhitespace;
                    } else if c == b'&' {
                        extend(&mut self.buffer, &bytes[back..pos])?;
                        self.ref_buffer.clear();
                        self.is_value_ref = true;
                        self.state = State::Reference;
                    } else if c == b'<' {
                        xml_error!(TAG_ATTRIBUTE_BAD_VALUE);
                    }
                }

                State::CData => match c {
                    b'<' => {
                        extend(&mut self.text, &bytes[back..pos])?;
                        self.flush_text(handler, true)?;
                        self.state = State::TagStart;
                    }
                    b'&' => {
                        extend(&mut self.text, &bytes[back..pos])?;
                        self.ref_buffer.clear();
                        self.is_value_ref = false;
                        self.state = State::Reference;
                    }
                    _ => (),
                },

                State::Reference => match c {
                    b'#' => {
                        self.char_ref_value = 0;
                        self.state = State::CharReference;
                    }
                    b';' => xml_error!(REFERENCE_CUSTOM_ENTITY),
                    _ => {
                        self.ref_buffer.push(c);
                        self.state = State::Entity;
                    }
                },

                State::Entity => match c {
                    b';' => {
                        let ent: &[u8] = match self.ref_buffer.as_slice() {
                            b"amp" => b"&",
                            b"lt" => b"<",
                            b"gt" => b">",
                            b"quot" => b"\"",
                            b"apos" => b"'",
                            _ => xml_error!(REFERENCE_CUSTOM_ENTITY),
                        };
                        back = pos + 1;
                        if self.is_value_ref {
                            extend(&mut self.buffer, ent)?;
                            self.state = State::AttributeValue;
                        } else {
                            extend(&mut self.text, ent)?;
                            self.state = State::CData;
                        }
                    }
                    _ => {
                        if self.ref_buffer.len() >= REF_BUFFER_SIZE {
                            xml_error!(REFERENCE_CUSTOM_ENTITY);
                        }
                        self.ref_buffer.push(c);
                    }
                },

                State::CharReference => match c {
                    b'x' => self.state = State::HexCharReference,
                    b'0'..=b'9' => {
                        self.char_ref_value = (c - b'0') as u32;
                        self.state = State::CharReferenceBody;
                    }
                    _ => xml_error!(REFERENCE_INVALID_DECIMAL),
                },

                State::CharReferenceBody | State::HexCharReference => {
                    let radix = if self.state == State::HexCharReference { 16 } else { 10 };
                    if c == b';' {
                        self.push_char_ref()?;
                        back = pos + 1;
                        if self.is_value_ref {
                            self.state = State::AttributeValue;
                        } else {
                            self.state = State::CData;
                        }
                    } else {
                        let Some(digit) = (c as char).to_digit(radix) else {
                            if radix == 16 {
                                xml_error!(REFERENCE_INVALID_HEX);
                            }
                            xml_error!(REFERENCE_INVALID_DECIMAL);
                        };
                        self.char_ref_value = self
                            .char_ref_value
                            .saturating_mul(radix)
                            .saturating_add(digit);
                    }
                }
            }

            if !redo {
                pos += 1;
                self.location.advance(c);
            }
        }

        match self.state {
            State::TagName | State::AttributeName | State::AttributeValue => {
                extend(&mut self.buffer, &bytes[back..pos])?;
            }
            State::CData | State::CDataSectionBody => {
                extend(&mut self.text, &bytes[back..pos])?;
                if self.state == State::CData {
                    self.flush_text(handler, false)?;
                }
            }
            _ => (),
        }

        Ok(())
    }
}

impl Default for SaxParser {
    fn default() -> Self {
        Self::new()
    }
}
