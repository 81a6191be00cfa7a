/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

//! Helpers shared by the tests of the client layer.

use std::io::Read;
use std::io::Write;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;
use rustls::ServerConfig;
use rustls::pki_types::PrivateKeyDer;
use rustls::pki_types::PrivatePkcs8KeyDer;

use super::TransportHandler;
use super::XmppError;
use crate::Element;

pub(crate) const SERVER_HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' from='localhost' version='1.0'";

/// Stream header sent by the fake servers, with the given stream id.
pub(crate) fn server_header(id: &str) -> String {
    format!("{SERVER_HEADER} id='{id}'>")
}

/// Reads until the received text contains `needle`, returns all of it.
pub(crate) fn read_until<S: Read>(stream: &mut S, needle: &str) -> String {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !String::from_utf8_lossy(&received).contains(needle) {
        let len = stream.read(&mut buf).unwrap();
        assert!(
            len > 0,
            "eof before {needle}, got {}",
            String::from_utf8_lossy(&received)
        );
        received.extend_from_slice(&buf[..len]);
    }
    String::from_utf8(received).unwrap()
}

/// Runs a scripted server for a single client on a loopback port.
pub(crate) fn serve_one<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        script(stream);
    });
    (port, handle)
}

/// Writes a string to the client.
pub(crate) fn say<S: Write>(stream: &mut S, text: &str) {
    stream.write_all(text.as_bytes()).unwrap();
    stream.flush().unwrap();
}

/// A request received by [http_server].
pub(crate) struct HttpRequest {
    pub(crate) path: String,
    pub(crate) body: String,
}

/// Loopback HTTP responder answering `count` requests, one per
/// connection. Returns the base URL and the handle yielding the requests.
pub(crate) fn http_server<F>(count: usize, respond: F) -> (String, JoinHandle<Vec<HttpRequest>>)
where
    F: Fn(usize, &str) -> String + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for index in 0..count {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            let head = read_until(&mut stream, "\r\n\r\n");
            let (headers, partial) = head.split_once("\r\n\r\n").unwrap();
            let path = headers.split(' ').nth(1).unwrap().to_string();
            let length: usize = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().unwrap())
                })
                .unwrap();
            let mut body = partial.as_bytes().to_vec();
            let mut rest = vec![0u8; length - body.len()];
            stream.read_exact(&mut rest).unwrap();
            body.extend_from_slice(&rest);
            let body = String::from_utf8(body).unwrap();
            let reply = respond(index, &body);
            requests.push(HttpRequest { path, body });
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                reply.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        }
        requests
    });
    (base, handle)
}

/// Server side TLS configuration with a fresh self signed certificate.
pub(crate) fn tls_server_config() -> Arc<ServerConfig> {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], key)
        .unwrap();
    Arc::new(config)
}

/// Transport handler which records every callback as a line of text.
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<String>>,
    changed: Condvar,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Recorder> {
        Arc::new(Recorder::default())
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
        self.changed.notify_all();
    }

    /// Waits until at least `count` events are recorded.
    pub(crate) fn wait_for(&self, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = self.events.lock();
        while events.len() < count {
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                panic!("expected {count} events, got {:?}", *events);
            }
        }
        events.clone()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl TransportHandler for Recorder {
    fn stream_opened(&self, id: &str) {
        self.push(format!("open {id}"));
    }

    fn stream_closed(&self, reason: &str) {
        self.push(format!("close {reason}"));
    }

    fn stanza_received(&self, stanza: Element) {
        self.push(stanza.to_string());
    }

    fn transport_failed(&self, err: &XmppError) {
        self.push(format!("failed {err}"));
    }
}
