/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::Weak;
use std::thread;

use parking_lot::Mutex;
use rustls::ServerConnection;
use rustls::StreamOwned;

use super::*;
use crate::Jid;
use crate::xmpp::CertificatePolicy;
use crate::xmpp::ProxyOptions;
use crate::xmpp::ProxyType;
use crate::xmpp::XmlCodec;
use crate::xmpp::testing::*;

fn config(port: u16) -> ConnectionString {
    ConnectionString::new(Jid::new("juliet@localhost").unwrap(), "r0m30")
        .server(Some("127.0.0.1".to_string()))
        .port(port)
}

fn codec() -> Arc<dyn StanzaCodec> {
    Arc::new(XmlCodec)
}

#[test]
fn tcp_stream() {
    let (port, server) = serve_one(|mut stream| {
        let header = read_until(&mut stream, "version='1.0'>");
        assert!(header.contains("to='localhost'"));
        say(&mut stream, &server_header("abc"));
        say(&mut stream, "\n<message from='romeo@localhost'><body>hi</bo");
        say(&mut stream, "dy></message> ");
        read_until(&mut stream, "</message>");
        say(&mut stream, "</stream:stream>");
        read_until(&mut stream, "</stream:stream>");
    });
    let recorder = Recorder::new();
    let transport = Transport::open(&config(port), recorder.clone(), codec(), None).unwrap();
    assert!(transport.supports_starttls());
    assert!(!transport.is_secure());
    transport.initialize_stream().unwrap();
    let events = recorder.wait_for(2);
    assert_eq!(events[0], "open abc");
    assert_eq!(
        events[1],
        "<message from=\"romeo@localhost\"><body>hi</body></message>"
    );
    let reply = Element::new("message")
        .with_attribute("to", "romeo@localhost")
        .with_child(Element::new("body").with_text("hello"));
    transport.send(&reply).unwrap();
    let events = recorder.wait_for(3);
    assert_eq!(events[2], "close ");
    transport.close();
    transport.close();
    server.join().unwrap();
    assert_eq!(recorder.events().len(), 3);
}

#[test]
fn tcp_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let result = Transport::open(&config(port), Recorder::new(), codec(), None);
    assert!(matches!(result, Err(XmppError::Connect { .. })));
}

#[test]
fn tcp_bad_xml_fails_transport() {
    let (port, server) = serve_one(|mut stream| {
        read_until(&mut stream, "version='1.0'>");
        say(&mut stream, &server_header("x"));
        say(&mut stream, "<message></iq>");
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    });
    let recorder = Recorder::new();
    let transport = Transport::open(&config(port), recorder.clone(), codec(), None).unwrap();
    transport.initialize_stream().unwrap();
    let events = recorder.wait_for(2);
    assert!(events[1].starts_with("failed "), "{events:?}");
    transport.close();
    server.join().unwrap();
}

/// Closes its transport on the first stanza, then records it.
struct CloseOnStanza {
    transport: Mutex<Weak<TcpTransport>>,
    recorder: Arc<Recorder>,
}

impl TransportHandler for CloseOnStanza {
    fn stream_opened(&self, id: &str) {
        self.recorder.stream_opened(id);
    }

    fn stream_closed(&self, reason: &str) {
        self.recorder.stream_closed(reason);
    }

    fn stanza_received(&self, stanza: Element) {
        let transport = self.transport.lock().upgrade();
        if let Some(transport) = transport {
            transport.close();
        }
        self.recorder.stanza_received(stanza);
    }

    fn transport_failed(&self, err: &XmppError) {
        self.recorder.transport_failed(err);
    }
}

#[test]
fn tcp_close_from_handler() {
    let (port, server) = serve_one(|mut stream| {
        read_until(&mut stream, "version='1.0'>");
        say(&mut stream, &server_header("h"));
        say(&mut stream, "<message><body>bye</body></message><presence/>");
        read_until(&mut stream, "</stream:stream>");
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    });
    let recorder = Recorder::new();
    let handler = Arc::new(CloseOnStanza {
        transport: Mutex::new(Weak::new()),
        recorder: recorder.clone(),
    });
    let transport = Arc::new(TcpTransport::open(&config(port), handler.clone(), codec(), None).unwrap());
    *handler.transport.lock() = Arc::downgrade(&transport);
    transport.initialize_stream().unwrap();
    let events = recorder.wait_for(2);
    assert_eq!(events[1], "<message><body>bye</body></message>");
    server.join().unwrap();
    transport.close();
    assert_eq!(recorder.events().len(), 2);
}

#[test]
fn starttls_upgrade() {
    let (port, server) = serve_one(|mut stream| {
        read_until(&mut stream, "version='1.0'>");
        say(&mut stream, &server_header("plain"));
        say(
            &mut stream,
            "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls></stream:features>",
        );
        read_until(&mut stream, "<starttls");
        say(
            &mut stream,
            "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>",
        );
        let conn = ServerConnection::new(tls_server_config()).unwrap();
        let mut tls = StreamOwned::new(conn, stream);
        let header = read_until(&mut tls, "version='1.0'>");
        assert!(header.starts_with("<?xml"));
        say(&mut tls, &server_header("secure"));
        say(&mut tls, "<message><body>over tls</body></message>");
        read_until(&mut tls, "</stream:stream>");
    });
    let recorder = Recorder::new();
    let config = config(port).certificate_policy(CertificatePolicy::AcceptAny);
    let transport = Transport::open(&config, recorder.clone(), codec(), None).unwrap();
    transport.initialize_stream().unwrap();
    let events = recorder.wait_for(2);
    assert_eq!(events[0], "open plain");
    assert!(events[1].starts_with("<stream:features>"));

    transport.open_secure_connection().unwrap();
    assert!(transport.is_secure());
    let events = recorder.wait_for(4);
    // The proceed element is consumed by the transport
    assert_eq!(events[2], "open secure");
    assert_eq!(events[3], "<message><body>over tls</body></message>");
    let Transport::Tcp(tcp) = &transport else {
        panic!("not a TCP transport");
    };
    assert_eq!(tcp.buffered_len(), 0);
    transport.close();
    server.join().unwrap();
}

#[test]
fn starttls_refused() {
    let (port, server) = serve_one(|mut stream| {
        read_until(&mut stream, "version='1.0'>");
        say(&mut stream, &server_header("plain"));
        read_until(&mut stream, "<starttls");
        say(
            &mut stream,
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-tls'/></stream:stream>",
        );
    });
    let recorder = Recorder::new();
    let transport = Transport::open(&config(port), recorder.clone(), codec(), None).unwrap();
    transport.initialize_stream().unwrap();
    recorder.wait_for(1);
    let result = transport.open_secure_connection();
    assert!(matches!(result, Err(XmppError::Tls(_))), "{result:?}");
    assert!(!transport.is_secure());
    transport.close();
    server.join().unwrap();
}

#[test]
fn socks5_proxy() {
    let (port, server) = serve_one(|mut stream| {
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).unwrap();
        assert_eq!(greeting, [5, 1, 0]);
        stream.write_all(&[5, 0]).unwrap();
        let mut request = [0u8; 5];
        stream.read_exact(&mut request).unwrap();
        assert_eq!(request[..4], [5, 1, 0, 3]);
        let mut target = vec![0u8; request[4] as usize + 2];
        stream.read_exact(&mut target).unwrap();
        assert_eq!(&target[..target.len() - 2], b"xmpp.example.com");
        assert_eq!(target[target.len() - 2..], 5222u16.to_be_bytes());
        stream.write_all(&[5, 0, 0, 1, 10, 0, 0, 1, 0x14, 0x66]).unwrap();

        read_until(&mut stream, "version='1.0'>");
        say(&mut stream, &server_header("proxied"));
        read_until(&mut stream, "</stream:stream>");
    });
    let proxy = ProxyOptions {
        kind: ProxyType::Socks5,
        host: "127.0.0.1".to_string(),
        port,
        user: None,
        password: None,
    };
    let config = ConnectionString::new(Jid::new("juliet@example.com").unwrap(), "r0m30")
        .server(Some("xmpp.example.com".to_string()))
        .proxy(Some(proxy));
    let recorder = Recorder::new();
    let transport = Transport::open(&config, recorder.clone(), codec(), None).unwrap();
    transport.initialize_stream().unwrap();
    assert_eq!(recorder.wait_for(1)[0], "open proxied");
    transport.close();
    server.join().unwrap();
}

/// In memory peer with a scripted reply.
struct Scripted {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Scripted {
    fn new(reply: &[u8]) -> Self {
        Scripted {
            input: Cursor::new(reply.to_vec()),
            output: Vec::new(),
        }
    }
}

impl Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Scripted {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn proxy(kind: ProxyType, user: Option<&str>, password: Option<&str>) -> ProxyOptions {
    ProxyOptions {
        kind,
        host: "proxy".to_string(),
        port: 1080,
        user: user.map(str::to_string),
        password: password.map(str::to_string),
    }
}

#[test]
fn socks4_requests() {
    let mut peer = Scripted::new(&[0, 0x5a, 0, 0, 0, 0, 0, 0]);
    socks::handshake(&mut peer, &proxy(ProxyType::Socks4, None, None), "10.1.2.3", 5222).unwrap();
    assert_eq!(peer.output, [4, 1, 0x14, 0x66, 10, 1, 2, 3, 0]);

    let mut peer = Scripted::new(&[0, 0x5a, 0, 0, 0, 0, 0, 0]);
    socks::handshake(&mut peer, &proxy(ProxyType::Socks4, Some("bob"), None), "jabber.org", 5222)
        .unwrap();
    assert_eq!(peer.output, b"\x04\x01\x14\x66\x00\x00\x00\x01bob\x00jabber.org\x00");

    let mut peer = Scripted::new(&[0, 0x5b, 0, 0, 0, 0, 0, 0]);
    let result = socks::handshake(&mut peer, &proxy(ProxyType::Socks4, None, None), "10.1.2.3", 5222);
    assert!(matches!(result, Err(XmppError::Proxy(_))));
}

#[test]
fn socks5_authentication() {
    let reply = [
        &[5u8, 2][..],
        &[1, 0][..],
        &[5, 0, 0, 4][..],
        &[0; 16][..],
        &[0x14, 0x66][..],
    ]
    .concat();
    let mut peer = Scripted::new(&reply);
    let options = proxy(ProxyType::Socks5, Some("bob"), Some("secret"));
    socks::handshake(&mut peer, &options, "::1", 5222).unwrap();
    let mut expected = vec![5, 2, 0, 2];
    expected.extend_from_slice(b"\x01\x03bob\x06secret");
    expected.extend_from_slice(&[5, 1, 0, 4]);
    expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    expected.extend_from_slice(&[0x14, 0x66]);
    assert_eq!(peer.output, expected);

    let mut peer = Scripted::new(&[5, 2, 1, 1]);
    let result = socks::handshake(&mut peer, &options, "jabber.org", 5222);
    assert!(matches!(result, Err(XmppError::Proxy(_))));

    let mut peer = Scripted::new(&[5, 0xff]);
    let result = socks::handshake(&mut peer, &proxy(ProxyType::Socks5, None, None), "jabber.org", 5222);
    assert!(matches!(result, Err(XmppError::Proxy(_))));
}

#[test]
fn http_connect() {
    let mut peer = Scripted::new(b"HTTP/1.1 200 Connection established\r\n\r\n<stream");
    let options = proxy(ProxyType::Http, Some("bob"), Some("secret"));
    socks::handshake(&mut peer, &options, "jabber.org", 5222).unwrap();
    let request = String::from_utf8(peer.output).unwrap();
    assert!(request.starts_with("CONNECT jabber.org:5222 HTTP/1.1\r\n"));
    assert!(request.contains("Proxy-Authorization: Basic Ym9iOnNlY3JldA==\r\n"));
    // Nothing after the reply header is consumed
    let mut rest = String::new();
    peer.input.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "<stream");

    let mut peer = Scripted::new(b"HTTP/1.0 407 Proxy Authentication Required\r\n\r\n");
    let result = socks::handshake(&mut peer, &options, "jabber.org", 5222);
    assert!(matches!(result, Err(XmppError::Proxy(_))));
}

const FEATURES: &str = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features>";

fn bosh_config(base: &str) -> ConnectionString {
    ConnectionString::new(Jid::new("juliet@localhost").unwrap(), "r0m30")
        .http_binding(Some(format!("{base}/http-bind")))
}

fn rid_of(body: &str) -> u32 {
    let body = Element::parse(body.as_bytes()).unwrap();
    body.attribute("rid").unwrap().parse().unwrap()
}

#[test]
fn bosh_rid_sequence() {
    let (url, server) = http_server(5, |index, _| {
        if index == 0 {
            format!(
                "<body xmlns='http://jabber.org/protocol/httpbind' sid='s1' authid='a1' wait='60'>{FEATURES}</body>"
            )
        } else {
            "<body xmlns='http://jabber.org/protocol/httpbind'/>".to_string()
        }
    });
    let recorder = Recorder::new();
    let transport = Transport::open(&bosh_config(&url), recorder.clone(), codec(), None).unwrap();
    assert!(!transport.supports_starttls());
    assert!(!transport.is_secure());
    transport.initialize_stream().unwrap();
    for text in ["one", "two", "three"] {
        transport
            .send(&Element::new("message").with_child(Element::new("body").with_text(text)))
            .unwrap();
    }
    transport.close();
    let requests = server.join().unwrap();
    assert!(requests.iter().all(|request| request.path == "/http-bind"));
    let bodies: Vec<&str> = requests.iter().map(|request| request.body.as_str()).collect();

    let first = Element::parse(bodies[0].as_bytes()).unwrap();
    assert_eq!(first.attribute("sid"), None);
    assert_eq!(first.attribute("hold"), Some("1"));
    assert_eq!(first.attribute("xmpp:version"), Some("1.0"));
    let rid0 = rid_of(&bodies[0]);
    assert!(rid0 <= i32::MAX as u32 + 1);
    for (index, body) in bodies.iter().enumerate() {
        assert_eq!(rid_of(body), rid0 + index as u32);
    }
    assert!(bodies[1].contains("sid='s1'"));
    assert!(bodies[1].contains("<body>one</body>"));
    assert!(bodies[4].contains("type='terminate'"));
    assert!(bodies[4].contains("type='unavailable'"));

    let events = recorder.events();
    assert_eq!(events[0], "open a1");
    assert!(events[1].starts_with("<stream:features"));
}

#[test]
fn bosh_concurrent_senders_keep_order() {
    const SENDS: usize = 8;
    let (url, server) = http_server(2 * SENDS + 2, |index, _| {
        if index == 0 {
            format!("<body xmlns='http://jabber.org/protocol/httpbind' sid='s4'>{FEATURES}</body>")
        } else {
            format!("<body xmlns='http://jabber.org/protocol/httpbind'><message id='m{index}'/></body>")
        }
    });
    let recorder = Recorder::new();
    let transport = Transport::open(&bosh_config(&url), recorder.clone(), codec(), None).unwrap();
    transport.initialize_stream().unwrap();
    thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..SENDS {
                    transport.send_raw("<presence/>").unwrap();
                }
            });
        }
    });
    let events = recorder.wait_for(2 + 2 * SENDS);
    let ids: Vec<String> = events[2..]
        .iter()
        .map(|event| {
            let message = Element::parse(event.as_bytes()).unwrap();
            message.attribute("id").unwrap().to_string()
        })
        .collect();
    let expected: Vec<String> = (1..=2 * SENDS).map(|index| format!("m{index}")).collect();
    assert_eq!(ids, expected);
    transport.close();
    server.join().unwrap();
}

#[test]
fn bosh_polls_for_features() {
    let (url, server) = http_server(3, |index, body| match index {
        0 => "<body xmlns='http://jabber.org/protocol/httpbind' sid='s2'/>".to_string(),
        1 => {
            assert!(body.contains("sid='s2'"));
            "<body xmlns='http://jabber.org/protocol/httpbind'/>".to_string()
        }
        _ => format!("<body xmlns='http://jabber.org/protocol/httpbind'>{FEATURES}</body>"),
    });
    let recorder = Recorder::new();
    let transport = Transport::open(&bosh_config(&url), recorder.clone(), codec(), None).unwrap();
    let Transport::Bosh(bosh) = &transport else {
        panic!("not a BOSH transport");
    };
    let rid0 = bosh.next_rid();
    transport.initialize_stream().unwrap();
    assert_eq!(bosh.next_rid(), rid0 + 3);
    assert_eq!(bosh.sid().as_deref(), Some("s2"));
    assert_eq!(server.join().unwrap().len(), 3);
    assert_eq!(recorder.events().len(), 2);
}

#[test]
fn bosh_terminate() {
    let (url, server) = http_server(2, |index, _| match index {
        0 => format!("<body xmlns='http://jabber.org/protocol/httpbind' sid='s3'>{FEATURES}</body>"),
        _ => "<body xmlns='http://jabber.org/protocol/httpbind' type='terminate' condition='system-shutdown'/>".to_string(),
    });
    let recorder = Recorder::new();
    let transport = Transport::open(&bosh_config(&url), recorder.clone(), codec(), None).unwrap();
    transport.initialize_stream().unwrap();
    let result = transport.poll();
    assert!(matches!(result, Err(XmppError::StreamClosed(ref condition)) if condition == "system-shutdown"));
    assert_eq!(recorder.events()[2], "close system-shutdown");
    // Nothing left to terminate
    transport.close();
    server.join().unwrap();
}

#[test]
fn bosh_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_until(&mut stream, "/>");
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .unwrap();
    });
    let transport = Transport::open(&bosh_config(&url), Recorder::new(), codec(), None).unwrap();
    let result = transport.initialize_stream();
    assert!(matches!(result, Err(XmppError::Http(_))), "{result:?}");
    server.join().unwrap();
}

struct FixedResolver {
    asked: Mutex<Vec<String>>,
}

impl SrvResolver for FixedResolver {
    fn resolve_srv(&self, name: &str) -> Option<String> {
        self.asked.lock().push(name.to_string());
        Some("127.0.0.1".to_string())
    }
}

#[test]
fn srv_resolution() {
    let (port, server) = serve_one(|mut stream| {
        read_until(&mut stream, "version='1.0'>");
        say(&mut stream, &server_header("srv"));
        read_until(&mut stream, "</stream:stream>");
    });
    let resolver = FixedResolver {
        asked: Mutex::new(Vec::new()),
    };
    let config = ConnectionString::new(Jid::new("juliet@example.net").unwrap(), "r0m30")
        .port(port)
        .resolve_host_name(true);
    let recorder = Recorder::new();
    let transport = Transport::open(&config, recorder.clone(), codec(), Some(&resolver)).unwrap();
    transport.initialize_stream().unwrap();
    assert_eq!(recorder.wait_for(1)[0], "open srv");
    assert_eq!(*resolver.asked.lock(), ["_xmpp-client._tcp.example.net"]);
    transport.close();
    server.join().unwrap();
}
