/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use super::Mechanism;
use crate::xmpp::SaslError;

/// PLAIN mechanism (RFC 4616) with the bare JID as the identity.
pub struct Plain {
    user: String,
    password: String,
}

impl Plain {
    pub fn new(user: &str, password: &str) -> Self {
        Plain {
            user: user.to_string(),
            password: password.to_string(),
        }
    }
}

/// `\0user\0secret`, shared with X-GOOGLE-TOKEN.
pub(super) fn credentials(user: &str, secret: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(user.len() + secret.len() + 2);
    payload.push(0);
    payload.extend_from_slice(user.as_bytes());
    payload.push(0);
    payload.extend_from_slice(secret.as_bytes());
    payload
}

impl Mechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
        Ok(Some(credentials(&self.user, &self.password)))
    }

    fn respond(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        Err(SaslError::MalformedChallenge)
    }
}
