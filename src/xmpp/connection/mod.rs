/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;

use crate::Element;
use crate::Jid;

use super::Authenticator;
use super::ConnectionEvent;
use super::ConnectionState;
use super::ConnectionString;
use super::EventHub;
use super::PendingMessageSet;
use super::SaslInbox;
use super::SaslOptions;
use super::SrvResolver;
use super::StanzaCodec;
use super::Subscription;
use super::SubscriptionId;
use super::TlsMode;
use super::Transport;
use super::TransportHandler;
use super::XmlCodec;
use super::XmppError;
use super::constants::BIND_NS;
use super::constants::FEATURES_TAG;
use super::constants::SASL_NS;
use super::constants::SESSION_NS;
use super::constants::STREAM_NS;
use super::constants::TLS_NS;
use super::error::description;
use super::signal::Rendezvous;
use super::signal::Wait;

/// State shared with the transport, which reports into it.
struct Shared {
    state: Mutex<ConnectionState>,
    events: EventHub,
    features: Rendezvous<Element>,
    iq_reply: Rendezvous<Element>,
    pending: Arc<PendingMessageSet>,
    sasl: Mutex<Option<Arc<SaslInbox>>>,
    stream_id: Mutex<Option<String>>,
    closed: Mutex<Option<String>>,
    bound_jid: Mutex<Option<Jid>>,
    next_id: AtomicU64,
}

fn first_condition(element: &Element, default: &str) -> String {
    element
        .children()
        .map(|child| child.local_name())
        .find(|name| *name != "text")
        .unwrap_or(default)
        .to_string()
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: Mutex::new(ConnectionState::Closed),
            events: EventHub::new(),
            features: Rendezvous::new(),
            iq_reply: Rendezvous::new(),
            pending: Arc::new(PendingMessageSet::new()),
            sasl: Mutex::new(None),
            stream_id: Mutex::new(None),
            closed: Mutex::new(None),
            bound_jid: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let old = std::mem::replace(&mut *self.state.lock(), state);
        if old != state {
            debug!(from = %old, to = %state, "connection state");
            self.events.publish(ConnectionEvent::StateChanged(state));
        }
    }

    /// Moves to `state` only if the current state is `from`.
    fn set_state_from(&self, from: ConnectionState, state: ConnectionState) -> bool {
        {
            let mut current = self.state.lock();
            if *current != from {
                return false;
            }
            *current = state;
        }
        debug!(from = %from, to = %state, "connection state");
        self.events.publish(ConnectionEvent::StateChanged(state));
        true
    }

    fn reset(&self) {
        self.features.reset();
        self.iq_reply.reset();
        self.pending.clear();
        *self.sasl.lock() = None;
        *self.stream_id.lock() = None;
        *self.closed.lock() = None;
        *self.bound_jid.lock() = None;
    }

    fn next_stanza_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn release_waiters(&self) {
        self.features.release();
        self.iq_reply.release();
        if let Some(inbox) = self.sasl.lock().as_ref() {
            inbox.release();
        }
    }

    /// The stream is gone, wake every waiter and leave Open.
    fn lost(&self, reason: &str) {
        *self.closed.lock() = Some(reason.to_string());
        self.release_waiters();
        self.set_state_from(ConnectionState::Open, ConnectionState::Error);
    }

    fn closed_error(&self) -> XmppError {
        match self.closed.lock().clone() {
            Some(reason) => XmppError::StreamClosed(reason),
            None => XmppError::NotConnected,
        }
    }

    fn sasl_reply(&self, stanza: Element) {
        let inbox = self.sasl.lock().clone();
        let Some(inbox) = inbox else {
            debug!(name = stanza.name(), "SASL reply without authentication");
            return;
        };
        if stanza.local_name() == "failure" {
            let reason = first_condition(&stanza, "failure");
            inbox.on_auth_error(&reason);
            self.events
                .publish(ConnectionEvent::AuthenticationFailed(reason));
        } else {
            inbox.on_challenge(stanza);
        }
    }
}

impl TransportHandler for Shared {
    fn stream_opened(&self, id: &str) {
        *self.stream_id.lock() = Some(id.to_string());
        self.events
            .publish(ConnectionEvent::StreamInitialized(id.to_string()));
    }

    fn stream_closed(&self, reason: &str) {
        self.events
            .publish(ConnectionEvent::StreamClosed(reason.to_string()));
        self.lost(reason);
    }

    fn stanza_received(&self, stanza: Element) {
        if stanza.name() == FEATURES_TAG || stanza.is("features", STREAM_NS) {
            self.features.set(stanza);
            return;
        }
        if stanza.namespace() == Some(SASL_NS) {
            self.sasl_reply(stanza);
            return;
        }
        if stanza.name() == "stream:error" || stanza.is("error", STREAM_NS) {
            let reason = first_condition(&stanza, "undefined-condition");
            info!(%reason, "stream error");
            self.events
                .publish(ConnectionEvent::StreamClosed(reason.clone()));
            self.lost(&reason);
            return;
        }
        if stanza.name() == "iq" {
            if let Some(id) = stanza.attribute("id") {
                if self.pending.remove(id) {
                    self.iq_reply.set(stanza);
                    return;
                }
            }
        }
        self.events.publish(ConnectionEvent::MessageReceived(stanza));
    }

    fn transport_failed(&self, err: &XmppError) {
        let reason = err.to_string();
        self.events
            .publish(ConnectionEvent::TransportFailed(reason.clone()));
        self.lost(&reason);
    }
}

/// An XMPP client connection.
///
/// `open()` runs the whole stream setup, STARTTLS, authentication and
/// resource binding, on the calling thread. Everything the server sends
/// afterwards is published to the subscribers as events.
///
/// ```no_run
/// use std::time::Duration;
///
/// use iksjab::{Connection, ConnectionEvent};
///
/// let connection = Connection::new();
/// let events = connection.subscribe();
/// let config = "user id=juliet@example.com; user password=r0m30".parse().unwrap();
/// connection.open(&config).unwrap();
/// while let Some(event) = events.next_event(Duration::from_secs(60)) {
///     if let ConnectionEvent::MessageReceived(stanza) = event {
///         println!("{stanza}");
///     }
/// }
/// connection.close();
/// ```
pub struct Connection {
    shared: Arc<Shared>,
    transport: RwLock<Option<Arc<Transport>>>,
    codec: Arc<dyn StanzaCodec>,
    resolver: Option<Arc<dyn SrvResolver>>,
    sasl_options: SaslOptions,
    open_lock: Mutex<()>,
}

impl Connection {
    pub fn new() -> Self {
        #[cfg(feature = "dns")]
        let resolver: Option<Arc<dyn SrvResolver>> = Some(Arc::new(super::DnsSrvResolver::new()));
        #[cfg(not(feature = "dns"))]
        let resolver: Option<Arc<dyn SrvResolver>> = None;
        Connection {
            shared: Arc::new(Shared::new()),
            transport: RwLock::new(None),
            codec: Arc::new(XmlCodec),
            resolver,
            sasl_options: SaslOptions::new(),
            open_lock: Mutex::new(()),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn StanzaCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_resolver(mut self, resolver: Option<Arc<dyn SrvResolver>>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_sasl_options(mut self, options: SaslOptions) -> Self {
        self.sasl_options = options;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Full JID assigned by the server during resource binding.
    pub fn bound_jid(&self) -> Option<Jid> {
        self.shared.bound_jid.lock().clone()
    }

    /// Id of the current stream as sent by the server.
    pub fn stream_id(&self) -> Option<String> {
        self.shared.stream_id.lock().clone()
    }

    pub fn is_secure(&self) -> bool {
        self.current_transport()
            .is_some_and(|transport| transport.is_secure())
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    /// Returns false if the subscription was already released.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    fn current_transport(&self) -> Option<Arc<Transport>> {
        self.transport.read().clone()
    }

    fn open_transport(&self) -> Result<Arc<Transport>, XmppError> {
        if self.state() != ConnectionState::Open {
            return Err(XmppError::NotConnected);
        }
        self.current_transport().ok_or(XmppError::NotConnected)
    }

    pub fn send(&self, stanza: &Element) -> Result<(), XmppError> {
        self.open_transport()?.send(stanza)
    }

    pub fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        self.open_transport()?.send_raw(xml)
    }

    /// Fetches pending stanzas over BOSH, nothing to do over TCP.
    pub fn poll(&self) -> Result<(), XmppError> {
        self.open_transport()?.poll()
    }

    /// Connects, authenticates and binds a resource.
    pub fn open(&self, config: &ConnectionString) -> Result<(), XmppError> {
        let _opening = self.open_lock.lock();
        {
            let mut state = self.shared.state.lock();
            match *state {
                ConnectionState::Closed | ConnectionState::Error => {}
                _ => return Err(XmppError::AlreadyOpen),
            }
            *state = ConnectionState::Opening;
        }
        self.shared
            .events
            .publish(ConnectionEvent::StateChanged(ConnectionState::Opening));
        self.shared.reset();

        match self.bootstrap(config) {
            Ok(jid) => {
                info!(jid = %jid, "connection open");
                *self.shared.bound_jid.lock() = Some(jid);
                if !self
                    .shared
                    .set_state_from(ConnectionState::Opening, ConnectionState::Open)
                {
                    return Err(self.shared.closed_error());
                }
                // The stream may have ended while the last reply was handled
                if self.shared.closed.lock().is_some() {
                    self.shared
                        .set_state_from(ConnectionState::Open, ConnectionState::Error);
                }
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "open failed");
                self.teardown();
                self.shared
                    .set_state_from(ConnectionState::Opening, ConnectionState::Error);
                Err(err)
            }
        }
    }

    fn wait_features(&self, timeout: Duration) -> Result<Element, XmppError> {
        match self.shared.features.wait(timeout) {
            Wait::Value(features) => Ok(features),
            Wait::Released => Err(self.shared.closed_error()),
            Wait::TimedOut => Err(XmppError::TimedOut(description::FEATURES)),
        }
    }

    fn bootstrap(&self, config: &ConnectionString) -> Result<Jid, XmppError> {
        let timeout = config.timeout();
        let transport = Arc::new(Transport::open(
            config,
            self.shared.clone(),
            self.codec.clone(),
            self.resolver.as_deref(),
        )?);
        *self.transport.write() = Some(transport.clone());

        transport.initialize_stream()?;
        let mut features = self.wait_features(timeout)?;

        // Some(true) when the server insists on TLS
        let starttls = features
            .find_child_ns("starttls", TLS_NS)
            .map(|offer| offer.find_child("required").is_some());
        match (starttls, config.tls()) {
            (Some(true), TlsMode::Disabled) => {
                return Err(XmppError::Tls(description::TLS_REQUIRED.to_string()));
            }
            (Some(_), TlsMode::Disabled) => {}
            (Some(_), _) if transport.supports_starttls() => {
                self.shared.features.reset();
                transport.open_secure_connection()?;
                features = self.wait_features(timeout)?;
            }
            _ => {
                if config.tls() == TlsMode::Required && !transport.is_secure() {
                    return Err(XmppError::Tls(description::TLS_NOT_OFFERED.to_string()));
                }
            }
        }

        self.authenticate(&transport, &features, config)?;
        transport.restart_stream()?;
        let features = self.wait_features(timeout)?;
        self.bind(&transport, &features, config)
    }

    fn authenticate(
        &self,
        transport: &Transport,
        features: &Element,
        config: &ConnectionString,
    ) -> Result<(), XmppError> {
        let offered: Vec<String> = features
            .find_child_ns("mechanisms", SASL_NS)
            .map(|mechanisms| {
                mechanisms
                    .children()
                    .filter(|child| child.local_name() == "mechanism")
                    .map(|child| child.text().trim().to_string())
                    .collect()
            })
            .unwrap_or_default();
        debug!(?offered, "SASL mechanisms");
        let inbox = SaslInbox::new(self.shared.pending.clone());
        let mut authenticator =
            Authenticator::select(&offered, config, &self.sasl_options, inbox.clone())?;
        *self.shared.sasl.lock() = Some(inbox);
        self.shared.features.reset();
        let result = authenticator.authenticate(|element| transport.send(element), config.timeout());
        *self.shared.sasl.lock() = None;
        result
    }

    /// Sends an IQ and waits for the reply with the same id.
    fn query(
        &self,
        transport: &Transport,
        iq: &Element,
        id: &str,
        timeout: Duration,
        failure: &'static str,
    ) -> Result<Element, XmppError> {
        self.shared.iq_reply.reset();
        self.shared.pending.insert(id);
        transport.send(iq)?;
        let reply = match self.shared.iq_reply.wait(timeout) {
            Wait::Value(reply) => reply,
            Wait::Released => return Err(self.shared.closed_error()),
            Wait::TimedOut => {
                self.shared.pending.remove(id);
                return Err(XmppError::TimedOut(description::IQ_REPLY));
            }
        };
        if reply.attribute("type") != Some("result") {
            return Err(XmppError::Protocol(failure));
        }
        Ok(reply)
    }

    fn bind(
        &self,
        transport: &Transport,
        features: &Element,
        config: &ConnectionString,
    ) -> Result<Jid, XmppError> {
        if features.find_child_ns("bind", BIND_NS).is_none() {
            return Err(XmppError::Protocol(description::NO_BIND));
        }
        let resource = config.resource_name();
        let id = self.shared.next_stanza_id("bind");
        let iq = Element::new("iq")
            .with_attribute("type", "set")
            .with_attribute("id", id.as_str())
            .with_child(
                Element::new("bind")
                    .with_attribute("xmlns", BIND_NS)
                    .with_child(Element::new("resource").with_text(resource)),
            );
        let reply = self.query(transport, &iq, &id, config.timeout(), description::BIND_FAILED)?;
        let assigned = reply
            .find_child_ns("bind", BIND_NS)
            .and_then(|bind| bind.find_child("jid"))
            .map(|jid| jid.text());
        let jid = match assigned {
            Some(text) => Jid::new(text.trim())?,
            None => config.jid().to_bare().with_resource(resource)?,
        };

        if let Some(session) = features.find_child_ns("session", SESSION_NS) {
            if session.find_child("optional").is_none() {
                let id = self.shared.next_stanza_id("sess");
                let iq = Element::new("iq")
                    .with_attribute("type", "set")
                    .with_attribute("id", id.as_str())
                    .with_child(Element::new("session").with_attribute("xmlns", SESSION_NS));
                self.query(
                    transport,
                    &iq,
                    &id,
                    config.timeout(),
                    description::SESSION_FAILED,
                )?;
            }
        }
        Ok(jid)
    }

    fn teardown(&self) {
        let transport = self.transport.write().take();
        self.shared.release_waiters();
        *self.shared.sasl.lock() = None;
        if let Some(transport) = transport {
            transport.close();
        }
        self.shared.pending.clear();
    }

    /// Ends the stream and closes the transport. Safe to call in any
    /// state, always ends in Closed.
    pub fn close(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.shared.set_state(ConnectionState::Closing);
        self.teardown();
        self.shared.set_state(ConnectionState::Closed);
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
