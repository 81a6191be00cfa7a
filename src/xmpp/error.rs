/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::error::Error;
use std::fmt::Display;

use super::BadJid;
use super::StreamError;

#[derive(Debug)]
pub enum XmppError {
    Connect {
        host: String,
        source: std::io::Error,
    },
    Io(std::io::Error),
    Http(String),
    Tls(String),
    Proxy(&'static str),
    Stream(StreamError),
    StreamClosed(String),
    BadJid(BadJid),
    Authentication(SaslError),
    NotConnected,
    AlreadyOpen,
    TimedOut(&'static str),
    Config(&'static str),
    Protocol(&'static str),
}

impl Display for XmppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XmppError::Connect { host, source } => write!(f, "cannot connect to {host}: {source}"),
            XmppError::Io(err) => err.fmt(f),
            XmppError::Http(msg) => write!(f, "HTTP binding failed: {msg}"),
            XmppError::Tls(msg) => write!(f, "TLS failed: {msg}"),
            XmppError::Proxy(msg) => write!(f, "proxy failed: {msg}"),
            XmppError::Stream(err) => err.fmt(f),
            XmppError::StreamClosed(condition) => {
                write!(f, "stream closed by the server: {condition}")
            }
            XmppError::BadJid(err) => err.fmt(f),
            XmppError::Authentication(err) => write!(f, "authentication failed: {err}"),
            XmppError::NotConnected => write!(f, "connection is not open"),
            XmppError::AlreadyOpen => write!(f, "connection is already open"),
            XmppError::TimedOut(what) => write!(f, "timed out waiting for {what}"),
            XmppError::Config(msg) => write!(f, "invalid connection string: {msg}"),
            XmppError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl Error for XmppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            XmppError::Connect { source, .. } => Some(source),
            XmppError::Io(err) => Some(err),
            XmppError::Stream(err) => Some(err),
            XmppError::BadJid(err) => Some(err),
            XmppError::Authentication(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for XmppError {
    fn from(err: std::io::Error) -> Self {
        XmppError::Io(err)
    }
}

impl From<StreamError> for XmppError {
    fn from(err: StreamError) -> Self {
        XmppError::Stream(err)
    }
}

impl From<BadJid> for XmppError {
    fn from(err: BadJid) -> Self {
        XmppError::BadJid(err)
    }
}

impl From<SaslError> for XmppError {
    fn from(err: SaslError) -> Self {
        XmppError::Authentication(err)
    }
}

impl From<rustls::Error> for XmppError {
    fn from(err: rustls::Error) -> Self {
        XmppError::Tls(err.to_string())
    }
}

impl From<ureq::Error> for XmppError {
    fn from(err: ureq::Error) -> Self {
        XmppError::Http(err.to_string())
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum SaslError {
    MalformedChallenge,
    DuplicateNonce,
    MissingNonce,
    UnsupportedCharset,
    UnsupportedAlgorithm,
    NoMechanism,
    TimedOut,
    Failure(String),
    TokenExchange(String),
}

impl Display for SaslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaslError::MalformedChallenge => write!(f, "malformed challenge"),
            SaslError::DuplicateNonce => write!(f, "challenge has more than one nonce"),
            SaslError::MissingNonce => write!(f, "challenge has no nonce"),
            SaslError::UnsupportedCharset => write!(f, "unsupported challenge charset"),
            SaslError::UnsupportedAlgorithm => write!(f, "unsupported challenge algorithm"),
            SaslError::NoMechanism => write!(f, "no supported mechanism offered"),
            SaslError::TimedOut => write!(f, "authentication timed out"),
            SaslError::Failure(reason) => write!(f, "{reason}"),
            SaslError::TokenExchange(reason) => write!(f, "token exchange failed: {reason}"),
        }
    }
}

impl Error for SaslError {}

pub(crate) mod description {
    pub(crate) const TLS_NOT_OFFERED: &str = "server does not offer STARTTLS";
    pub(crate) const TLS_REQUIRED: &str = "server requires STARTTLS but it is disabled";
    pub(crate) const TLS_REFUSED: &str = "server refused STARTTLS";
    pub(crate) const BAD_SERVER_NAME: &str = "invalid server name for TLS";
    pub(crate) const NO_ADDRESS: &str = "host name has no address";
    pub(crate) const PROXY_REFUSED: &str = "proxy refused the connection";
    pub(crate) const PROXY_BAD_REPLY: &str = "unexpected reply from proxy";
    pub(crate) const PROXY_AUTH: &str = "proxy authentication failed";
    pub(crate) const PROXY_NAME_TOO_LONG: &str = "host name or credentials too long for proxy";
    pub(crate) const NO_BIND: &str = "server does not offer resource binding";
    pub(crate) const BIND_FAILED: &str = "resource binding failed";
    pub(crate) const SESSION_FAILED: &str = "session establishment failed";
    pub(crate) const FEATURES: &str = "stream features";
    pub(crate) const TLS_PROCEED: &str = "STARTTLS proceed";
    pub(crate) const IQ_REPLY: &str = "IQ reply";
    pub(crate) const BOSH_NO_SID: &str = "session creation response has no sid";
    pub(crate) const BOSH_NOT_BODY: &str = "response is not a BOSH body";
    pub(crate) const BOSH_RID_EXHAUSTED: &str = "request ids are exhausted";
    pub(crate) const SASL_ABORTED: &str = "authentication aborted";
    pub(crate) const NO_SID: &str = "no SID in the ClientLogin reply";
}
