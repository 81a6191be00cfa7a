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

use std::collections::VecDeque;

use crate::Location;
use crate::SaxElement;
use crate::SaxError;
use crate::SaxHandler;
use crate::SaxParser;

use super::constants::STREAM_END;
use super::constants::STREAM_TAG;
pub(crate) use error::description;
pub use error::StreamError;

/// A complete top level element of an XMPP stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StreamElement {
    name: String,
    xml: String,
    opens_stream: bool,
    closes_stream: bool,
}

impl StreamElement {
    /// Tag name of the element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw XML text of the element exactly as received.
    ///
    /// For the stream header this is the unclosed start tag.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// True for the `<stream:stream>` start tag.
    pub fn opens_stream(&self) -> bool {
        self.opens_stream
    }

    /// True for the `</stream:stream>` end tag.
    pub fn closes_stream(&self) -> bool {
        self.closes_stream
    }

    /// Value of an attribute of the stream header.
    pub fn stream_attribute(&self, name: &str) -> Option<String> {
        if !self.opens_stream {
            return None;
        }
        let mut closed = self.xml.trim_end().trim_end_matches('>').to_string();
        if !closed.ends_with('/') {
            closed.push('/');
        }
        closed.push('>');
        let element = crate::Element::parse(closed.as_bytes()).ok()?;
        element.attribute(name).map(str::to_string)
    }
}

struct Frame {
    name: String,
    start: usize,
    end: usize,
    opens_stream: bool,
    closes_stream: bool,
}

struct Framer {
    depth: usize,
    tags: Vec<String>,
    start: usize,
    // end of the last element completed at the top levels
    settled: usize,
    name: String,
    error: Option<&'static str>,
    ready: VecDeque<Frame>,
}

impl Framer {
    fn new() -> Self {
        Framer {
            depth: 0,
            tags: Vec::new(),
            start: 0,
            settled: 0,
            name: String::new(),
            error: None,
            ready: VecDeque::new(),
        }
    }

    fn abort(&mut self, reason: &'static str) -> Result<(), SaxError> {
        self.error = Some(reason);
        Err(SaxError::HandlerAbort)
    }

    fn push(&mut self, frame: Frame) {
        self.settled = frame.end;
        self.ready.push_back(frame);
    }

    fn complete(&mut self, end: usize) {
        let frame = Frame {
            name: std::mem::take(&mut self.name),
            start: self.start,
            end,
            opens_stream: false,
            closes_stream: false,
        };
        self.push(frame);
    }
}

impl SaxHandler for Framer {
    fn handle_element(&mut self, element: &SaxElement, location: &Location) -> Result<(), SaxError> {
        match element {
            SaxElement::StartTag(name) => {
                self.depth += 1;
                if self.depth == 1 && *name != STREAM_TAG {
                    return self.abort(description::NOT_A_STREAM);
                }
                self.tags.push(name.to_string());
                if self.depth <= 2 {
                    // location points at the byte right after the tag name
                    self.start = location.bytes - name.len() - 1;
                    self.name.clear();
                    self.name.push_str(name);
                }
            }
            SaxElement::Attribute(_, _) => {}
            SaxElement::StartTagContent => {
                if self.depth == 1 {
                    let frame = Frame {
                        name: std::mem::take(&mut self.name),
                        start: self.start,
                        end: location.bytes + 1,
                        opens_stream: true,
                        closes_stream: false,
                    };
                    self.push(frame);
                }
            }
            SaxElement::StartTagEmpty => {
                match self.depth {
                    1 => {
                        let frame = Frame {
                            name: std::mem::take(&mut self.name),
                            start: self.start,
                            end: location.bytes + 1,
                            opens_stream: true,
                            closes_stream: true,
                        };
                        self.push(frame);
                    }
                    2 => self.complete(location.bytes + 1),
                    _ => {}
                }
                self.tags.pop();
                self.depth -= 1;
            }
            SaxElement::EndTag(name) => {
                if self.tags.pop().as_deref() != Some(*name) {
                    return Err(SaxError::BadXml(description::TAG_MISMATCH));
                }
                match self.depth {
                    1 => self.push(Frame {
                        name: name.to_string(),
                        start: location.bytes + 1,
                        end: location.bytes + 1,
                        opens_stream: false,
                        closes_stream: true,
                    }),
                    2 => self.complete(location.bytes + 1),
                    _ => {}
                }
                self.depth -= 1;
            }
            SaxElement::CData(text) => {
                if self.depth == 1 && !text.trim_ascii().is_empty() {
                    return self.abort(description::TEXT_AT_TOP_LEVEL);
                }
            }
        }
        Ok(())
    }
}

/// Incremental framer for the XMPP stream.
///
/// Bytes are fed as they arrive from the network, and complete top level
/// elements are taken out one by one. The start tag of the stream and its
/// end tag are reported as separate elements. Every byte is tokenized only
/// once, and the bytes of the elements already taken out are released.
///
/// A parser instance handles exactly one stream. A new one must be created
/// after a TLS upgrade or a stream restart.
///
/// ```
/// use iksjab::StreamParser;
///
/// let mut parser = StreamParser::new();
/// parser.feed(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams'><mess");
/// assert!(parser.read_next_node().unwrap().unwrap().opens_stream());
/// assert!(parser.read_next_node().unwrap().is_none());
/// parser.feed(b"age><body>hi</body></message>");
/// let stanza = parser.read_next_node().unwrap().unwrap();
/// assert_eq!(stanza.xml(), "<message><body>hi</body></message>");
/// ```
pub struct StreamParser {
    parser: SaxParser,
    framer: Framer,
    buffer: Vec<u8>,
    base: usize,
    parsed: usize,
    failure: Option<StreamError>,
}

impl StreamParser {
    pub fn new() -> Self {
        StreamParser {
            parser: SaxParser::new(),
            framer: Framer::new(),
            buffer: Vec::new(),
            base: 0,
            parsed: 0,
            failure: None,
        }
    }

    /// Appends received bytes to the input buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes held in the input buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete element, or None if more bytes are needed.
    ///
    /// Elements completed before a syntax error are still returned in
    /// order, the error is reported after them.
    pub fn read_next_node(&mut self) -> Result<Option<StreamElement>, StreamError> {
        let total = self.base + self.buffer.len();
        if self.framer.ready.is_empty() && self.failure.is_none() && self.parsed < total {
            let tail = &self.buffer[self.parsed - self.base..];
            let result = self.parser.parse_bytes(&mut self.framer, tail);
            self.parsed = total;
            if let Err(err) = result {
                self.failure = Some(match self.framer.error.take() {
                    Some(reason) => StreamError::BadStream(reason),
                    None => err.into(),
                });
            }
        }

        let Some(frame) = self.framer.ready.pop_front() else {
            return match self.failure {
                Some(err) => Err(err),
                None => Ok(None),
            };
        };
        let xml = if frame.closes_stream && !frame.opens_stream {
            STREAM_END.to_string()
        } else {
            let bytes = &self.buffer[frame.start - self.base..frame.end - self.base];
            match std::str::from_utf8(bytes) {
                Ok(xml) => xml.to_string(),
                Err(_) => return Err(StreamError::BadStream(description::BAD_STANZA)),
            }
        };
        self.compact();
        Ok(Some(StreamElement {
            name: frame.name,
            xml,
            opens_stream: frame.opens_stream,
            closes_stream: frame.closes_stream,
        }))
    }

    fn compact(&mut self) {
        let mut keep = self.parsed;
        if let Some(next) = self.framer.ready.front() {
            keep = keep.min(next.start);
        }
        if self.framer.depth >= 2 {
            keep = keep.min(self.framer.start);
        } else {
            // a start tag may be cut before its name is complete
            keep = keep.min(self.framer.settled);
        }
        let drop = keep - self.base;
        if drop > 0 {
            self.buffer.drain(..drop);
            self.base = keep;
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
