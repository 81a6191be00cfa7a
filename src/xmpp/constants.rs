/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::time::Duration;

pub const CLIENT_PORT: u16 = 5222;

pub const STREAM_TAG: &str = "stream:stream";

pub const FEATURES_TAG: &str = "stream:features";

pub const CLIENT_NS: &str = "jabber:client";

pub const STREAM_NS: &str = "http://etherx.jabber.org/streams";

pub const TLS_NS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

pub const SASL_NS: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

pub const BIND_NS: &str = "urn:ietf:params:xml:ns:xmpp-bind";

pub const SESSION_NS: &str = "urn:ietf:params:xml:ns:xmpp-session";

pub const HTTPBIND_NS: &str = "http://jabber.org/protocol/httpbind";

pub const XBOSH_NS: &str = "urn:xmpp:xbosh";

pub const SRV_PREFIX: &str = "_xmpp-client._tcp.";

pub const STREAM_END: &str = "</stream:stream>";

pub const STARTTLS: &str = "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_RESOURCE: &str = "iksjab";

/// The opening stream tag sent to the server.
pub fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0' encoding='UTF-8'?><stream:stream xmlns='{CLIENT_NS}' xmlns:stream='{STREAM_NS}' to='{}' version='1.0'>",
        crate::entities::escape(domain)
    )
}
