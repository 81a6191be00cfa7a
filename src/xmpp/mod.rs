/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod codec;
pub(crate) mod config;
mod connection;
pub(crate) mod constants;
pub(crate) mod error;
mod events;
mod jid;
mod sasl;
pub(crate) mod signal;
mod stream;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::StanzaCodec;
pub use codec::XmlCodec;
pub use config::CertificatePolicy;
pub use config::ConnectionString;
pub use config::ProxyOptions;
pub use config::ProxyType;
pub use config::TlsMode;
pub use connection::Connection;
pub use error::SaslError;
pub use error::XmppError;
pub use events::ConnectionEvent;
pub use events::ConnectionState;
pub use events::EventHub;
pub use events::PendingMessageSet;
pub use events::Subscription;
pub use events::SubscriptionId;
pub use jid::BadJid;
pub use jid::Jid;
pub use sasl::Authenticator;
pub use sasl::DigestChallenge;
pub use sasl::DigestMd5;
pub use sasl::GoogleClientLogin;
pub use sasl::Mechanism;
pub use sasl::Plain;
pub use sasl::SaslInbox;
pub use sasl::SaslOptions;
pub use sasl::SaslState;
pub use sasl::TokenExchange;
pub use sasl::XGoogleToken;
pub use stream::StreamElement;
pub use stream::StreamError;
pub use stream::StreamParser;
pub use transport::BoshTransport;
#[cfg(feature = "dns")]
pub use transport::DnsSrvResolver;
pub use transport::SrvResolver;
pub use transport::TcpTransport;
pub use transport::Transport;
pub use transport::TransportHandler;
