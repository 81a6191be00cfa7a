/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod digest;
mod google;
mod plain;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use crate::Element;

use super::ConnectionString;
use super::PendingMessageSet;
use super::SaslError;
use super::XmppError;
use super::constants::SASL_NS;
use super::error::description;
use super::signal::Rendezvous;
use super::signal::Wait;
pub use digest::DigestChallenge;
pub use digest::DigestMd5;
pub use google::GoogleClientLogin;
pub use google::TokenExchange;
pub use google::XGoogleToken;
pub use plain::Plain;

/// One SASL mechanism, driven by the [Authenticator].
pub trait Mechanism: Send {
    /// Name used in the `mechanism` attribute.
    fn name(&self) -> &'static str;

    /// Data sent along with the `<auth>` element, if the mechanism starts
    /// with the client.
    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError>;

    /// Answers a decoded server challenge.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError>;

    /// True when no more challenges are expected before the success.
    fn is_complete(&self) -> bool {
        true
    }
}

/// Steps of an authentication exchange.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SaslState {
    Start,
    SentAuth,
    AwaitingChallenge,
    SentResponse,
    AwaitingSuccess,
    Succeeded,
    Failed,
}

/// Where the connection delivers the SASL replies of the server.
///
/// The connection holds one while an authentication is running, and
/// releases it in its teardown so a blocked authenticator wakes up.
pub struct SaslInbox {
    reply: Rendezvous<Element>,
    failed: AtomicBool,
    error: Mutex<Option<String>>,
    pending: Arc<PendingMessageSet>,
}

impl SaslInbox {
    pub fn new(pending: Arc<PendingMessageSet>) -> Arc<SaslInbox> {
        Arc::new(SaslInbox {
            reply: Rendezvous::new(),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
            pending,
        })
    }

    /// Hands a `<challenge>` or `<success>` element to the authenticator.
    pub fn on_challenge(&self, stanza: Element) {
        self.reply.set(stanza);
    }

    /// Records a failure reported by the server and wakes the
    /// authenticator.
    pub fn on_auth_error(&self, reason: &str) {
        self.pending.clear();
        *self.error.lock() = Some(reason.to_string());
        self.failed.store(true, Ordering::SeqCst);
        self.reply.release();
    }

    /// Wakes the authenticator without a reply.
    pub fn release(&self) {
        self.reply.release();
    }

    pub fn authentication_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn authentication_error(&self) -> Option<String> {
        self.error.lock().clone()
    }
}

/// Settings for the mechanisms, beyond the connection credentials.
#[derive(Clone)]
pub struct SaslOptions {
    service: String,
    cnonce: Option<String>,
    token_exchange: Option<Arc<dyn TokenExchange>>,
}

impl SaslOptions {
    pub fn new() -> Self {
        SaslOptions {
            service: "xmpp".to_string(),
            cnonce: None,
            token_exchange: Some(Arc::new(GoogleClientLogin::new())),
        }
    }

    /// Service name of the DIGEST-MD5 digest-uri.
    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    /// Fixed DIGEST-MD5 client nonce instead of a random one.
    pub fn cnonce(mut self, cnonce: Option<String>) -> Self {
        self.cnonce = cnonce;
        self
    }

    /// Token source for X-GOOGLE-TOKEN, None disables the mechanism.
    pub fn token_exchange(mut self, exchange: Option<Arc<dyn TokenExchange>>) -> Self {
        self.token_exchange = exchange;
        self
    }
}

impl Default for SaslOptions {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(data: &[u8]) -> String {
    if data.is_empty() {
        // An empty response is sent as a single equals sign
        "=".to_string()
    } else {
        STANDARD.encode(data)
    }
}

fn decode(text: &str) -> Result<Vec<u8>, SaslError> {
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    STANDARD
        .decode(text)
        .map_err(|_| SaslError::MalformedChallenge)
}

fn sasl_element(name: &str) -> Element {
    Element::new(name).with_attribute("xmlns", SASL_NS)
}

/// Runs a SASL exchange with one mechanism.
pub struct Authenticator {
    mechanism: Box<dyn Mechanism>,
    inbox: Arc<SaslInbox>,
    state: SaslState,
}

impl Authenticator {
    pub fn new(mechanism: Box<dyn Mechanism>, inbox: Arc<SaslInbox>) -> Self {
        Authenticator {
            mechanism,
            inbox,
            state: SaslState::Start,
        }
    }

    /// Picks the best mechanism the server offers. DIGEST-MD5 is
    /// preferred over X-GOOGLE-TOKEN, and both over PLAIN.
    pub fn select(
        offered: &[String],
        config: &ConnectionString,
        options: &SaslOptions,
        inbox: Arc<SaslInbox>,
    ) -> Result<Authenticator, SaslError> {
        let offers = |name: &str| offered.iter().any(|mech| mech.eq_ignore_ascii_case(name));
        let jid = config.jid();
        let mechanism: Box<dyn Mechanism> = match (jid.localpart(), &options.token_exchange) {
            (Some(user), _) if offers("DIGEST-MD5") => Box::new(
                DigestMd5::new(user, config.user_password(), jid.domainpart())
                    .service(&options.service)
                    .cnonce(options.cnonce.clone()),
            ),
            (_, Some(exchange)) if offers("X-GOOGLE-TOKEN") => Box::new(XGoogleToken::new(
                jid.bare(),
                config.user_password(),
                exchange.clone(),
            )),
            _ if offers("PLAIN") => Box::new(Plain::new(jid.bare(), config.user_password())),
            _ => return Err(SaslError::NoMechanism),
        };
        debug!(mechanism = mechanism.name(), "selected SASL mechanism");
        Ok(Authenticator::new(mechanism, inbox))
    }

    pub fn mechanism_name(&self) -> &'static str {
        self.mechanism.name()
    }

    pub fn state(&self) -> SaslState {
        self.state
    }

    pub fn inbox(&self) -> &Arc<SaslInbox> {
        &self.inbox
    }

    fn transition(&mut self, state: SaslState) {
        debug!(from = ?self.state, to = ?state, "SASL");
        self.state = state;
    }

    fn awaiting(&self) -> SaslState {
        if self.mechanism.is_complete() {
            SaslState::AwaitingSuccess
        } else {
            SaslState::AwaitingChallenge
        }
    }

    fn fail(&mut self, err: SaslError) -> XmppError {
        self.transition(SaslState::Failed);
        err.into()
    }

    /// Runs the exchange until the server reports success or failure.
    ///
    /// `send` writes an element to the server. The replies arrive through
    /// the inbox, and each wait is bounded by `timeout`.
    pub fn authenticate<F>(&mut self, mut send: F, timeout: Duration) -> Result<(), XmppError>
    where
        F: FnMut(&Element) -> Result<(), XmppError>,
    {
        self.inbox.reply.reset();
        self.transition(SaslState::Start);

        let initial = match self.mechanism.initial_response() {
            Ok(initial) => initial,
            Err(err) => return Err(self.fail(err)),
        };
        let mut auth = sasl_element("auth").with_attribute("mechanism", self.mechanism.name());
        if let Some(data) = &initial {
            auth.append_text(&encode(data));
        }
        send(&auth)?;
        self.transition(SaslState::SentAuth);
        let next = if initial.is_some() {
            self.awaiting()
        } else {
            SaslState::AwaitingChallenge
        };
        self.transition(next);

        loop {
            let reply = match self.inbox.reply.wait(timeout) {
                Wait::Value(reply) => reply,
                Wait::Released => {
                    let reason = self
                        .inbox
                        .authentication_error()
                        .unwrap_or_else(|| description::SASL_ABORTED.to_string());
                    return Err(self.fail(SaslError::Failure(reason)));
                }
                Wait::TimedOut => return Err(self.fail(SaslError::TimedOut)),
            };
            match reply.local_name() {
                "success" => {
                    self.transition(SaslState::Succeeded);
                    return Ok(());
                }
                "challenge" => {
                    let response = decode(&reply.text())
                        .and_then(|challenge| self.mechanism.respond(&challenge));
                    let response = match response {
                        Ok(response) => response,
                        Err(err) => {
                            if let Err(abort_err) = send(&sasl_element("abort")) {
                                warn!(error = %abort_err, "cannot abort authentication");
                            }
                            return Err(self.fail(err));
                        }
                    };
                    let mut element = sasl_element("response");
                    if !response.is_empty() {
                        element.append_text(&STANDARD.encode(&response));
                    }
                    send(&element)?;
                    self.transition(SaslState::SentResponse);
                    let next = self.awaiting();
                    self.transition(next);
                }
                _ => return Err(self.fail(SaslError::MalformedChallenge)),
            }
        }
    }
}
