/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::TransportHandler;
use crate::Element;
use crate::entities::escape;
use crate::xmpp::CertificatePolicy;
use crate::xmpp::ConnectionString;
use crate::xmpp::ProxyType;
use crate::xmpp::StanzaCodec;
use crate::xmpp::XmppError;
use crate::xmpp::config::description::MISSING_BINDING;
use crate::xmpp::constants::CLIENT_NS;
use crate::xmpp::constants::CLIENT_PORT;
use crate::xmpp::constants::FEATURES_TAG;
use crate::xmpp::constants::HTTPBIND_NS;
use crate::xmpp::constants::STREAM_NS;
use crate::xmpp::constants::XBOSH_NS;
use crate::xmpp::error::description;

const BOSH_VERSION: &str = "1.6";
const HOLD: u32 = 1;
const WAIT: u32 = 60;
const FEATURE_POLLS: usize = 5;

struct BoshSession {
    rid: u32,
    sid: Option<String>,
}

impl BoshSession {
    /// Takes the rid for the next request.
    fn take_rid(&mut self) -> Result<u32, XmppError> {
        let rid = self.rid;
        self.rid = rid
            .checked_add(1)
            .ok_or_else(|| XmppError::Http(description::BOSH_RID_EXHAUSTED.to_string()))?;
        Ok(rid)
    }
}

/// Responses waiting to be handed over in rid order. A failed request
/// leaves an empty slot.
struct Inbox {
    next: u32,
    bodies: BTreeMap<u32, Option<Element>>,
    draining: bool,
}

/// XMPP over BOSH (XEP-0124, XEP-0206).
///
/// Every request is a synchronous POST. Requests are serialized, and the
/// request id grows by exactly one for each of them. Responses reach the
/// handler in request id order, whichever thread made the request.
pub struct BoshTransport {
    agent: ureq::Agent,
    url: String,
    domain: String,
    route: Option<String>,
    handler: Arc<dyn TransportHandler>,
    codec: Arc<dyn StanzaCodec>,
    session: Mutex<BoshSession>,
    inbox: Mutex<Inbox>,
    closing: AtomicBool,
}

fn proxy_url(config: &ConnectionString) -> Result<Option<ureq::Proxy>, XmppError> {
    let Some(proxy) = config.proxy_options() else {
        return Ok(None);
    };
    let scheme = match proxy.kind {
        ProxyType::Socks4 => "socks4a",
        ProxyType::Socks5 => "socks5",
        ProxyType::Http => "http",
    };
    let credentials = match (&proxy.user, &proxy.password) {
        (Some(user), Some(password)) => format!("{user}:{password}@"),
        (Some(user), None) => format!("{user}@"),
        _ => String::new(),
    };
    let url = format!("{scheme}://{credentials}{}:{}", proxy.host, proxy.port);
    Ok(Some(ureq::Proxy::new(&url)?))
}

impl BoshTransport {
    pub fn open(
        config: &ConnectionString,
        handler: Arc<dyn TransportHandler>,
        codec: Arc<dyn StanzaCodec>,
    ) -> Result<BoshTransport, XmppError> {
        let url = config
            .bosh_url()
            .ok_or(XmppError::Config(MISSING_BINDING))?;
        let tls = ureq::tls::TlsConfig::builder()
            .disable_verification(config.policy() == CertificatePolicy::AcceptAny)
            .build();
        // The connection manager may hold a request for up to WAIT seconds
        let timeout = config
            .timeout()
            .max(std::time::Duration::from_secs(WAIT as u64 + 10));
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_global(Some(timeout))
                .tls_config(tls)
                .proxy(proxy_url(config)?)
                .build(),
        );
        let route = config
            .explicit_server()
            .then(|| format!("xmpp:{}:{CLIENT_PORT}", config.host()));
        let rid = rand::random::<i32>().unsigned_abs();
        debug!(%url, rid, "BOSH transport");
        Ok(BoshTransport {
            agent,
            url,
            domain: config.jid().domainpart().to_string(),
            route,
            handler,
            codec,
            session: Mutex::new(BoshSession { rid, sid: None }),
            inbox: Mutex::new(Inbox {
                next: rid,
                bodies: BTreeMap::new(),
                draining: false,
            }),
            closing: AtomicBool::new(false),
        })
    }

    /// Request id of the next request.
    pub fn next_rid(&self) -> u32 {
        self.session.lock().rid
    }

    pub fn sid(&self) -> Option<String> {
        self.session.lock().sid.clone()
    }

    pub fn is_secure(&self) -> bool {
        self.url.starts_with("https://")
    }

    /// Creates the BOSH session on the first call, restarts the stream on
    /// the later ones.
    pub fn initialize_stream(&self) -> Result<(), XmppError> {
        let (rid, body) = {
            let mut session = self.session.lock();
            if session.sid.is_some() {
                drop(session);
                return self.restart_stream();
            }
            let rid = session.take_rid()?;
            let mut attributes = vec![
                ("content", "text/xml; charset=utf-8".to_string()),
                ("hold", HOLD.to_string()),
                ("rid", rid.to_string()),
                ("to", self.domain.clone()),
                ("ver", BOSH_VERSION.to_string()),
                ("wait", WAIT.to_string()),
                ("ack", "1".to_string()),
                ("xml:lang", "en".to_string()),
                ("xmpp:version", "1.0".to_string()),
                ("xmlns", HTTPBIND_NS.to_string()),
                ("xmlns:xmpp", XBOSH_NS.to_string()),
            ];
            if let Some(route) = &self.route {
                attributes.push(("route", route.clone()));
            }
            let body = envelope(&attributes, "");
            (rid, self.post(rid, &body)?)
        };
        let Some(sid) = body.attribute("sid").map(str::to_string) else {
            self.skip(rid);
            return Err(XmppError::Http(description::BOSH_NO_SID.to_string()));
        };
        let id = body.attribute("authid").unwrap_or(sid.as_str()).to_string();
        self.session.lock().sid = Some(sid);
        self.handler.stream_opened(&id);
        self.deliver_until_features(rid, body)
    }

    /// Asks the connection manager for a new stream after authentication.
    pub fn restart_stream(&self) -> Result<(), XmppError> {
        let (rid, body) = self.request(|rid, sid| {
            envelope(
                &[
                    ("rid", rid.to_string()),
                    ("sid", sid.to_string()),
                    ("to", self.domain.clone()),
                    ("xml:lang", "en".to_string()),
                    ("xmpp:restart", "true".to_string()),
                    ("xmlns", HTTPBIND_NS.to_string()),
                    ("xmlns:xmpp", XBOSH_NS.to_string()),
                ],
                "",
            )
        })?;
        self.deliver_until_features(rid, body)
    }

    pub fn send(&self, stanza: &Element) -> Result<(), XmppError> {
        let payload = self.codec.serialize(stanza);
        self.send_raw(&String::from_utf8_lossy(&payload))
    }

    pub fn send_raw(&self, xml: &str) -> Result<(), XmppError> {
        let (rid, body) = self.request(|rid, sid| Self::wrap(rid, sid, xml))?;
        self.deliver(rid, body)
    }

    /// Sends an empty body to fetch what the server has queued.
    pub fn poll(&self) -> Result<(), XmppError> {
        self.send_raw("")
    }

    /// Terminates the session with an unavailable presence. Best effort,
    /// safe to call repeatedly.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.session.lock().sid.is_none() {
            return;
        }
        let presence = format!("<presence type='unavailable' xmlns='{CLIENT_NS}'/>");
        let result = self.request(|rid, sid| {
            envelope(
                &[
                    ("rid", rid.to_string()),
                    ("sid", sid.to_string()),
                    ("type", "terminate".to_string()),
                    ("xmlns", HTTPBIND_NS.to_string()),
                ],
                &presence,
            )
        });
        match result {
            // The reply is not handed over
            Ok((rid, _)) => self.skip(rid),
            Err(err) => warn!(error = %err, "cannot terminate BOSH session"),
        }
        self.session.lock().sid = None;
    }

    fn wrap(rid: u32, sid: &str, payload: &str) -> String {
        envelope(
            &[
                ("rid", rid.to_string()),
                ("sid", sid.to_string()),
                ("xmlns", HTTPBIND_NS.to_string()),
            ],
            payload,
        )
    }

    /// Builds the body with the next rid and the session id, and posts it.
    fn request(
        &self,
        build: impl FnOnce(u32, &str) -> String,
    ) -> Result<(u32, Element), XmppError> {
        let mut session = self.session.lock();
        let sid = session.sid.clone().ok_or(XmppError::NotConnected)?;
        let rid = session.take_rid()?;
        let body = build(rid, &sid);
        Ok((rid, self.post(rid, &body)?))
    }

    fn post(&self, rid: u32, body: &str) -> Result<Element, XmppError> {
        let result = self.exchange(body);
        if result.is_err() {
            self.skip(rid);
        }
        result
    }

    fn exchange(&self, body: &str) -> Result<Element, XmppError> {
        trace!(body, "send");
        let mut response = self
            .agent
            .post(&self.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .send(body.as_bytes())?;
        let text = response.body_mut().read_to_string()?;
        trace!(body = %text, "receive");
        let element = Element::parse(text.as_bytes())
            .map_err(|_| XmppError::Http(description::BOSH_NOT_BODY.to_string()))?;
        if element.local_name() != "body" {
            return Err(XmppError::Http(description::BOSH_NOT_BODY.to_string()));
        }
        Ok(element)
    }

    fn is_features(element: &Element) -> bool {
        element.name() == FEATURES_TAG || element.is("features", STREAM_NS)
    }

    fn deliver_until_features(&self, mut rid: u32, mut body: Element) -> Result<(), XmppError> {
        for _ in 0..FEATURE_POLLS {
            let has_features = body.children().any(Self::is_features);
            self.deliver(rid, body)?;
            if has_features {
                return Ok(());
            }
            (rid, body) = self.request(|rid, sid| Self::wrap(rid, sid, ""))?;
        }
        self.deliver(rid, body)
    }

    fn skip(&self, rid: u32) {
        self.inbox.lock().bodies.insert(rid, None);
    }

    /// Queues a response and hands over every response that is next in
    /// rid order. Only one thread hands over at a time, the others leave
    /// their responses to it.
    fn deliver(&self, rid: u32, body: Element) -> Result<(), XmppError> {
        let terminated = (body.attribute("type") == Some("terminate"))
            .then(|| body.attribute("condition").unwrap_or("").to_string());
        {
            let mut inbox = self.inbox.lock();
            inbox.bodies.insert(rid, Some(body));
            if inbox.draining {
                trace!(rid, "response queued");
            } else {
                inbox.draining = true;
                drop(inbox);
                self.drain();
            }
        }
        match terminated {
            Some(condition) => Err(XmppError::StreamClosed(condition)),
            None => Ok(()),
        }
    }

    fn drain(&self) {
        loop {
            let body = {
                let mut inbox = self.inbox.lock();
                let next = inbox.next;
                match inbox.bodies.remove(&next) {
                    Some(body) => {
                        inbox.next = next.wrapping_add(1);
                        body
                    }
                    None => {
                        inbox.draining = false;
                        return;
                    }
                }
            };
            if let Some(body) = body {
                self.hand_over(body);
            }
        }
    }

    /// Hands the children of a response body to the handler.
    fn hand_over(&self, body: Element) {
        for child in body.children() {
            let xml = child.to_string();
            match self.codec.deserialize(child.name(), &xml) {
                Some(stanza) => self.handler.stanza_received(stanza),
                None => warn!(name = child.name(), "cannot decode stanza"),
            }
        }
        if body.attribute("type") == Some("terminate") {
            let condition = body.attribute("condition").unwrap_or("");
            debug!(%condition, "BOSH session terminated");
            self.session.lock().sid = None;
            self.handler.stream_closed(condition);
        }
    }
}

impl Drop for BoshTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn envelope(attributes: &[(&str, String)], payload: &str) -> String {
    let mut body = String::from("<body");
    for (name, value) in attributes {
        body.push_str(&format!(" {name}='{}'", escape(value)));
    }
    if payload.is_empty() {
        body.push_str("/>");
    } else {
        body.push('>');
        body.push_str(payload);
        body.push_str("</body>");
    }
    body
}
