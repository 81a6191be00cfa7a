/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::ClientConnection;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::SrvResolver;
use super::TransportHandler;
use super::socks;
use super::tls;
use crate::Element;
use crate::StreamParser;
use crate::xmpp::CertificatePolicy;
use crate::xmpp::ConnectionString;
use crate::xmpp::StanzaCodec;
use crate::xmpp::XmppError;
use crate::xmpp::constants::SRV_PREFIX;
use crate::xmpp::constants::STARTTLS;
use crate::xmpp::constants::STREAM_END;
use crate::xmpp::constants::TLS_NS;
use crate::xmpp::constants::stream_header;
use crate::xmpp::error::description;
use crate::xmpp::signal::Rendezvous;
use crate::xmpp::signal::Wait;

const READ_SIZE: usize = 4096;

enum Session {
    Plain,
    Tls(Box<ClientConnection>),
}

struct TcpShared {
    socket: TcpStream,
    // Write lock, also guards the TLS state
    session: Mutex<Session>,
    // Read lock
    parser: Mutex<StreamParser>,
    tls_signal: Rendezvous<bool>,
    handler: Arc<dyn TransportHandler>,
    codec: Arc<dyn StanzaCodec>,
    domain: String,
    policy: CertificatePolicy,
    timeout: Duration,
    closing: AtomicBool,
    secure: AtomicBool,
}

impl TcpShared {
    fn write_bytes(&self, bytes: &[u8]) -> Result<(), XmppError> {
        trace!(bytes = %String::from_utf8_lossy(bytes), "send");
        let mut session = self.session.lock();
        match &mut *session {
            Session::Plain => (&self.socket).write_all(bytes)?,
            Session::Tls(conn) => {
                conn.writer().write_all(bytes)?;
                while conn.wants_write() {
                    conn.write_tls(&mut &self.socket)?;
                }
            }
        }
        Ok(())
    }

    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, XmppError> {
        let mut session = self.session.lock();
        let conn = match &mut *session {
            Session::Plain => return Ok(bytes.to_vec()),
            Session::Tls(conn) => conn,
        };
        let mut plain = Vec::new();
        let mut input = bytes;
        while !input.is_empty() {
            conn.read_tls(&mut input)?;
            let state = conn.process_new_packets()?;
            let available = state.plaintext_bytes_to_read();
            if available > 0 {
                let start = plain.len();
                plain.resize(start + available, 0);
                conn.reader().read_exact(&mut plain[start..])?;
            }
        }
        while conn.wants_write() {
            conn.write_tls(&mut &self.socket)?;
        }
        Ok(plain)
    }

    /// Feeds the parser and dispatches what is complete. Returns false
    /// when the read loop must stop.
    fn dispatch(&self, bytes: &[u8]) -> bool {
        trace!(bytes = %String::from_utf8_lossy(bytes), "receive");
        let mut parser = self.parser.lock();
        parser.feed(bytes);
        loop {
            let element = match parser.read_next_node() {
                Ok(Some(element)) => element,
                Ok(None) => return true,
                Err(err) => {
                    self.lost(Some(err.into()));
                    return false;
                }
            };
            if element.opens_stream() {
                let id = element.stream_attribute("id").unwrap_or_default();
                self.handler.stream_opened(&id);
            }
            if element.closes_stream() {
                self.handler.stream_closed("");
                return false;
            }
            if element.opens_stream() {
                continue;
            }
            let Some(stanza) = self.codec.deserialize(element.name(), element.xml()) else {
                warn!(name = element.name(), "cannot decode stanza");
                continue;
            };
            if stanza.is("proceed", TLS_NS) {
                self.tls_signal.set(true);
                return false;
            }
            if stanza.is("failure", TLS_NS) {
                self.tls_signal.set(false);
                continue;
            }
            self.handler.stanza_received(stanza);
            if self.closing.load(Ordering::SeqCst) {
                return false;
            }
        }
    }

    fn lost(&self, err: Option<XmppError>) {
        self.tls_signal.release();
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let err = err.unwrap_or_else(|| {
            XmppError::Io(std::io::Error::from(ErrorKind::UnexpectedEof))
        });
        debug!(error = %err, "connection lost");
        self.handler.transport_failed(&err);
    }
}

fn read_loop(shared: Arc<TcpShared>) {
    let mut buf = vec![0u8; READ_SIZE];
    loop {
        let len = match (&shared.socket).read(&mut buf) {
            Ok(0) => {
                shared.lost(None);
                return;
            }
            Ok(len) => len,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                shared.lost(Some(err.into()));
                return;
            }
        };
        let plain = match shared.decrypt(&buf[..len]) {
            Ok(plain) => plain,
            Err(err) => {
                shared.lost(Some(err));
                return;
            }
        };
        if !plain.is_empty() && !shared.dispatch(&plain) {
            return;
        }
    }
}

fn connect_to(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, XmppError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let connect_error = |source| XmppError::Connect {
        host: host.to_string(),
        source,
    };
    let addresses = (bare, port).to_socket_addrs().map_err(connect_error)?;
    let mut last_error = None;
    for address in addresses {
        debug!(%address, "connecting");
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = Some(err),
        }
    }
    let source = last_error
        .unwrap_or_else(|| std::io::Error::new(ErrorKind::NotFound, description::NO_ADDRESS));
    Err(connect_error(source))
}

fn connect_socket(
    config: &ConnectionString,
    resolver: Option<&dyn SrvResolver>,
) -> Result<TcpStream, XmppError> {
    let mut host = config.host().to_string();
    if !config.explicit_server() && config.resolves_host_name() {
        let name = format!("{SRV_PREFIX}{}", config.jid().domainpart());
        if let Some(target) = resolver.and_then(|resolver| resolver.resolve_srv(&name)) {
            host = target;
        }
    }
    let port = config.port_number();
    let stream = match config.proxy_options() {
        Some(proxy) => {
            let mut stream = connect_to(&proxy.host, proxy.port, config.timeout())?;
            stream.set_read_timeout(Some(config.timeout()))?;
            socks::handshake(&mut stream, proxy, &host, port)?;
            stream.set_read_timeout(None)?;
            stream
        }
        None => connect_to(&host, port, config.timeout())?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// XMPP stream over a TCP socket, upgradable to TLS.
pub struct TcpTransport {
    shared: Arc<TcpShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Connects and starts the read loop.
    pub fn open(
        config: &ConnectionString,
        handler: Arc<dyn TransportHandler>,
        codec: Arc<dyn StanzaCodec>,
        resolver: Option<&dyn SrvResolver>,
    ) -> Result<TcpTransport, XmppError> {
        let socket = connect_socket(config, resolver)?;
        let transport = TcpTransport {
            shared: Arc::new(TcpShared {
                socket,
                session: Mutex::new(Session::Plain),
                parser: Mutex::new(StreamParser::new()),
                tls_signal: Rendezvous::new(),
                handler,
                codec,
                domain: config.jid().domainpart().to_string(),
                policy: config.policy(),
                timeout: config.timeout(),
                closing: AtomicBool::new(false),
                secure: AtomicBool::new(false),
            }),
            reader: Mutex::new(None),
        };
        transport.spawn_reader()?;
        Ok(transport)
    }

    fn spawn_reader(&self) -> Result<(), XmppError> {
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("iksjab-reader".to_string())
            .spawn(move || read_loop(shared))?;
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    /// Waits for the read loop to end. Returns false when called from the
    /// reader thread itself, which still holds the parser.
    fn join_reader(&self) -> bool {
        let Some(handle) = self.reader.lock().take() else {
            return true;
        };
        if handle.thread().id() == thread::current().id() {
            // Closed from a handler callback, the loop exits by itself
            return false;
        }
        if handle.join().is_err() {
            warn!("reader thread panicked");
        }
        true
    }

    pub fn initialize_stream(&self) -> Result<(), XmppError> {
        self.shared
            .write_bytes(stream_header(&self.shared.domain).as_bytes())
    }

    /// Starts a new stream on the same connection, after authentication.
    pub fn restart_stream(&self) -> Result<(), XmppError> {
        *self.shared.parser.lock() = StreamParser::new();
        self.initialize_stream()
    }

    pub fn send(&self, stanza: &Element) -> Result<(), XmppError> {
        let bytes = self.shared.codec.serialize(stanza);
        self.shared.write_bytes(&bytes)
    }

    pub fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        self.shared.write_bytes(xml.as_bytes())
    }

    pub fn is_secure(&self) -> bool {
        self.shared.secure.load(Ordering::SeqCst)
    }

    /// Number of bytes waiting in the stream parser.
    pub fn buffered_len(&self) -> usize {
        self.shared.parser.lock().buffered_len()
    }

    /// Negotiates STARTTLS and restarts the stream over TLS.
    pub fn open_secure_connection(&self) -> Result<(), XmppError> {
        let shared = &self.shared;
        shared.tls_signal.reset();
        shared.write_bytes(STARTTLS.as_bytes())?;
        match shared.tls_signal.wait(shared.timeout) {
            Wait::Value(true) => {}
            Wait::Value(false) => return Err(XmppError::Tls(description::TLS_REFUSED.to_string())),
            Wait::Released => return Err(XmppError::NotConnected),
            Wait::TimedOut => return Err(XmppError::TimedOut(description::TLS_PROCEED)),
        }

        // The reader stops right after the proceed element
        self.join_reader();
        *shared.parser.lock() = StreamParser::new();
        {
            let mut session = shared.session.lock();
            let config = tls::client_config(shared.policy)?;
            let mut conn =
                ClientConnection::new(Arc::new(config), tls::server_name(&shared.domain)?)?;
            shared.socket.set_read_timeout(Some(shared.timeout))?;
            let mut result = Ok(());
            while conn.is_handshaking() && result.is_ok() {
                result = conn.complete_io(&mut &shared.socket).map(|_| ());
            }
            shared.socket.set_read_timeout(None)?;
            result.map_err(|err| XmppError::Tls(err.to_string()))?;
            debug!(
                version = ?conn.protocol_version(),
                "TLS established"
            );
            *session = Session::Tls(Box::new(conn));
        }
        shared.secure.store(true, Ordering::SeqCst);
        self.spawn_reader()?;
        self.initialize_stream()
    }

    /// Ends the stream and shuts the socket down. Safe to call repeatedly.
    pub fn close(&self) {
        let shared = &self.shared;
        if shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = shared.write_bytes(STREAM_END.as_bytes()) {
            warn!(error = %err, "cannot send stream end");
        }
        shared.tls_signal.release();
        {
            let mut session = shared.session.lock();
            if let Session::Tls(conn) = &mut *session {
                conn.send_close_notify();
                if let Err(err) = conn.write_tls(&mut &shared.socket) {
                    debug!(error = %err, "cannot send close notify");
                }
            }
            *session = Session::Plain;
        }
        if let Err(err) = shared.socket.shutdown(Shutdown::Both) {
            debug!(error = %err, "socket shutdown");
        }
        if self.join_reader() {
            *shared.parser.lock() = StreamParser::new();
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
