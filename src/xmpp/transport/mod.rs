/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod bosh;
mod dns;
mod socks;
mod tcp;
mod tls;

use std::sync::Arc;

use crate::Element;

use super::ConnectionString;
use super::StanzaCodec;
use super::XmppError;
pub use bosh::BoshTransport;
#[cfg(feature = "dns")]
pub use dns::DnsSrvResolver;
pub use dns::SrvResolver;
pub use tcp::TcpTransport;

/// Receiver of everything a transport reads from the server.
///
/// Callbacks run on the transport's own thread for TCP, and on the thread
/// doing the HTTP request for BOSH. They must not block.
pub trait TransportHandler: Send + Sync {
    /// The server opened its stream, `id` is the stream or session id.
    fn stream_opened(&self, id: &str);

    /// The server ended its stream.
    fn stream_closed(&self, reason: &str);

    fn stanza_received(&self, stanza: Element);

    /// The connection is gone, no more callbacks will follow.
    fn transport_failed(&self, err: &XmppError);
}

/// Byte channel between the client and the server.
pub enum Transport {
    Tcp(TcpTransport),
    Bosh(BoshTransport),
}

impl Transport {
    /// Opens the transport chosen by the configuration, BOSH if an HTTP
    /// binding is configured, plain TCP otherwise.
    pub fn open(
        config: &ConnectionString,
        handler: Arc<dyn TransportHandler>,
        codec: Arc<dyn StanzaCodec>,
        resolver: Option<&dyn SrvResolver>,
    ) -> Result<Transport, XmppError> {
        if config.uses_http_binding() {
            Ok(Transport::Bosh(BoshTransport::open(config, handler, codec)?))
        } else {
            Ok(Transport::Tcp(TcpTransport::open(
                config, handler, codec, resolver,
            )?))
        }
    }

    pub fn initialize_stream(&self) -> Result<(), XmppError> {
        match self {
            Transport::Tcp(tcp) => tcp.initialize_stream(),
            Transport::Bosh(bosh) => bosh.initialize_stream(),
        }
    }

    pub fn restart_stream(&self) -> Result<(), XmppError> {
        match self {
            Transport::Tcp(tcp) => tcp.restart_stream(),
            Transport::Bosh(bosh) => bosh.restart_stream(),
        }
    }

    pub fn send(&self, stanza: &Element) -> Result<(), XmppError> {
        match self {
            Transport::Tcp(tcp) => tcp.send(stanza),
            Transport::Bosh(bosh) => bosh.send(stanza),
        }
    }

    pub fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        match self {
            Transport::Tcp(tcp) => tcp.send_raw(xml),
            Transport::Bosh(bosh) => bosh.send_raw(xml),
        }
    }

    /// STARTTLS is only negotiated in band on a TCP stream.
    pub fn supports_starttls(&self) -> bool {
        matches!(self, Transport::Tcp(_))
    }

    pub fn open_secure_connection(&self) -> Result<(), XmppError> {
        match self {
            Transport::Tcp(tcp) => tcp.open_secure_connection(),
            Transport::Bosh(_) => Err(XmppError::Tls(
                super::error::description::TLS_NOT_OFFERED.to_string(),
            )),
        }
    }

    /// Fetches pending stanzas. The TCP reader is always receiving.
    pub fn poll(&self) -> Result<(), XmppError> {
        match self {
            Transport::Tcp(_) => Ok(()),
            Transport::Bosh(bosh) => bosh.poll(),
        }
    }

    pub fn is_secure(&self) -> bool {
        match self {
            Transport::Tcp(tcp) => tcp.is_secure(),
            Transport::Bosh(bosh) => bosh.is_secure(),
        }
    }

    pub fn close(&self) {
        match self {
            Transport::Tcp(tcp) => tcp.close(),
            Transport::Bosh(bosh) => bosh.close(),
        }
    }
}

#[cfg(test)]
mod tests;
