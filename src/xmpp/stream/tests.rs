/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use super::*;

const STREAM: &str = "<?xml version='1.0'?>\
    <stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='c2s_123' from='example.com' version='1.0'>\
    <stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features>\
    \n \
    <message to='user@example.com'><body>Hello &amp; bye!</body></message>\
    <presence/>\
    <iq type='result' id='çğ'><query xmlns='jabber:iq:version'><name>Ötük</name></query></iq >\
    </stream:stream>";

fn collect(chunks: &[&[u8]]) -> Vec<StreamElement> {
    let mut parser = StreamParser::new();
    let mut elements = Vec::new();
    for chunk in chunks {
        parser.feed(chunk);
        while let Some(element) = parser.read_next_node().unwrap() {
            elements.push(element);
        }
    }
    elements
}

#[test]
fn stream_elements() {
    let elements = collect(&[STREAM.as_bytes()]);
    assert_eq!(elements.len(), 6);

    assert!(elements[0].opens_stream());
    assert!(!elements[0].closes_stream());
    assert_eq!(elements[0].name(), "stream:stream");
    assert!(elements[0].xml().starts_with("<stream:stream xmlns='jabber:client'"));
    assert!(elements[0].xml().ends_with("version='1.0'>"));
    assert_eq!(elements[0].stream_attribute("id").as_deref(), Some("c2s_123"));

    assert_eq!(elements[1].name(), "stream:features");
    assert_eq!(
        elements[2].xml(),
        "<message to='user@example.com'><body>Hello &amp; bye!</body></message>"
    );
    assert_eq!(elements[3].xml(), "<presence/>");
    assert_eq!(elements[4].name(), "iq");
    assert!(elements[4].xml().ends_with("</iq >"));
    assert!(!elements[4].opens_stream());

    assert!(elements[5].closes_stream());
    assert_eq!(elements[5].xml(), "</stream:stream>");
    assert_eq!(elements[1].stream_attribute("id"), None);
}

#[test]
fn framing_is_split_independent() {
    let whole = collect(&[STREAM.as_bytes()]);
    let bytes = STREAM.as_bytes();

    let single: Vec<&[u8]> = bytes.chunks(1).collect();
    assert_eq!(collect(&single), whole);

    for size in [2, 3, 7, 13, 64] {
        let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
        assert_eq!(collect(&chunks), whole);
    }

    for split in 0..bytes.len() {
        let (a, b) = bytes.split_at(split);
        assert_eq!(collect(&[a, b]), whole);
    }
}

#[test]
fn tag_name_split() {
    let mut parser = StreamParser::new();
    parser.feed(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams'><mes");
    assert!(parser.read_next_node().unwrap().unwrap().opens_stream());
    assert!(parser.read_next_node().unwrap().is_none());
    parser.feed(b"sage/>  <pres");
    assert_eq!(parser.read_next_node().unwrap().unwrap().xml(), "<message/>");
    assert!(parser.read_next_node().unwrap().is_none());
    parser.feed(b"ence type='unavailable'/>");
    let presence = parser.read_next_node().unwrap().unwrap();
    assert_eq!(presence.name(), "presence");
    assert_eq!(presence.xml(), "<presence type='unavailable'/>");
    assert_eq!(parser.buffered_len(), 0);
}

#[test]
fn incomplete_stanzas_wait() {
    let mut parser = StreamParser::new();
    parser.feed(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams'>");
    assert!(parser.read_next_node().unwrap().unwrap().opens_stream());
    parser.feed(b"<message><body>par");
    assert!(parser.read_next_node().unwrap().is_none());
    assert!(parser.read_next_node().unwrap().is_none());
    parser.feed(b"tial</body></message");
    assert!(parser.read_next_node().unwrap().is_none());
    parser.feed(b">");
    let element = parser.read_next_node().unwrap().unwrap();
    assert_eq!(element.xml(), "<message><body>partial</body></message>");
    assert_eq!(parser.buffered_len(), 0);
}

#[test]
fn header_alone() {
    let mut parser = StreamParser::new();
    parser.feed(b"<stream:stream to='example.com' ");
    assert!(parser.read_next_node().unwrap().is_none());
    parser.feed(b"version='1.0'>");
    let header = parser.read_next_node().unwrap().unwrap();
    assert!(header.opens_stream());
    assert_eq!(header.stream_attribute("to").as_deref(), Some("example.com"));
    assert!(parser.read_next_node().unwrap().is_none());
}

#[test]
fn close_alone() {
    let mut parser = StreamParser::new();
    parser.feed(b"<stream:stream>");
    assert!(parser.read_next_node().unwrap().unwrap().opens_stream());
    parser.feed(b"  </stream:stream>");
    let end = parser.read_next_node().unwrap().unwrap();
    assert!(end.closes_stream());
    assert!(!end.opens_stream());
    assert_eq!(parser.buffered_len(), 0);
}

#[test]
fn bad_streams() {
    let mut parser = StreamParser::new();
    parser.feed(b"<message/>");
    assert_eq!(
        parser.read_next_node(),
        Err(StreamError::BadStream(description::NOT_A_STREAM))
    );

    let mut parser = StreamParser::new();
    parser.feed(b"<stream:stream>garbage<message/>");
    assert!(parser.read_next_node().unwrap().unwrap().opens_stream());
    assert_eq!(
        parser.read_next_node(),
        Err(StreamError::BadStream(description::TEXT_AT_TOP_LEVEL))
    );

    let mut parser = StreamParser::new();
    parser.feed(b"<stream:stream><message></iq></stream:stream>");
    assert!(parser.read_next_node().unwrap().unwrap().opens_stream());
    assert_eq!(
        parser.read_next_node(),
        Err(StreamError::BadXml(description::TAG_MISMATCH))
    );
    assert_eq!(
        parser.read_next_node(),
        Err(StreamError::BadXml(description::TAG_MISMATCH))
    );

    let mut parser = StreamParser::new();
    parser.feed(b"<stream:stream><a/><b>&bogus;</b>");
    assert!(parser.read_next_node().unwrap().unwrap().opens_stream());
    assert_eq!(parser.read_next_node().unwrap().unwrap().xml(), "<a/>");
    assert!(matches!(
        parser.read_next_node(),
        Err(StreamError::BadXml(_))
    ));
}
