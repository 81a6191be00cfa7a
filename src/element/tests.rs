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

#[test]
fn build_and_serialize() {
    let mut iq = Element::new("iq")
        .with_attribute("type", "set")
        .with_attribute("id", "bind_1");
    let bind = iq.append_child(
        Element::new("bind").with_attribute("xmlns", "urn:ietf:params:xml:ns:xmpp-bind"),
    );
    bind.append_child(Element::new("resource").with_text("balcony"));
    assert_eq!(
        iq.to_string(),
        "<iq type=\"set\" id=\"bind_1\"><bind xmlns=\"urn:ietf:params:xml:ns:xmpp-bind\"><resource>balcony</resource></bind></iq>"
    );
    assert_eq!(iq.str_size(), iq.to_string().len());
}

#[test]
fn escaping() {
    let element = Element::new("body")
        .with_attribute("x", "a'b\"c")
        .with_text("1 < 2 & 3 > 2");
    let xml = element.to_string();
    assert_eq!(
        xml,
        "<body x=\"a&apos;b&quot;c\">1 &lt; 2 &amp; 3 &gt; 2</body>"
    );
    assert_eq!(element.str_size(), xml.len());
    assert_eq!(Element::parse(xml.as_bytes()).unwrap(), element);
}

#[test]
fn attributes() {
    let mut element = Element::new("presence").with_attribute("type", "away");
    element.set_attribute("type", "unavailable");
    element.set_attribute("to", "romeo@example.net");
    assert_eq!(element.attribute("type"), Some("unavailable"));
    assert_eq!(element.attribute("from"), None);
    let all: Vec<(&str, &str)> = element.attributes().collect();
    assert_eq!(all, [("type", "unavailable"), ("to", "romeo@example.net")]);
}

#[test]
fn text_merging() {
    let mut element = Element::new("a");
    element.append_text("abc");
    element.append_text("");
    element.append_text("def");
    assert_eq!(element.nodes().len(), 1);
    element.append_child(Element::new("b"));
    element.append_text("ghi");
    assert_eq!(element.nodes().len(), 3);
    assert_eq!(element.text(), "abcdefghi");
}

#[test]
fn parsing() {
    let element: Element = "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism><mechanism>DIGEST-MD5</mechanism></mechanisms></stream:features>"
        .parse()
        .unwrap();
    assert_eq!(element.name(), "stream:features");
    assert_eq!(element.local_name(), "features");
    let tls = element
        .find_child_ns("starttls", "urn:ietf:params:xml:ns:xmpp-tls")
        .unwrap();
    assert!(tls.find_child("required").is_some());
    let mechanisms: Vec<String> = element
        .find_child("mechanisms")
        .unwrap()
        .children()
        .map(Element::text)
        .collect();
    assert_eq!(mechanisms, ["PLAIN", "DIGEST-MD5"]);
    assert!(element.find_child("bind").is_none());
}

#[test]
fn bad_documents() {
    assert!(matches!(
        Element::parse(b"<a><b></a></b>"),
        Err(ElementError::BadXml(description::TAG_MISMATCH))
    ));
    assert!(matches!(
        Element::parse(b"<a x='1' x='2'/>"),
        Err(ElementError::BadXml(description::DUPLICATE_ATTRIBUTE))
    ));
    assert!(Element::parse(b"").is_err());
    assert!(Element::parse(b"<a>").is_err());
}
