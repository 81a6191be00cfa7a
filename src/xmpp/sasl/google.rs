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
use std::time::Duration;

use tracing::debug;

use super::Mechanism;
use super::plain::credentials;
use crate::xmpp::SaslError;
use crate::xmpp::constants::DEFAULT_TIMEOUT;
use crate::xmpp::error::description;

const CLIENT_AUTH_URL: &str = "https://www.google.com/accounts/ClientAuth";
const ISSUE_TOKEN_URL: &str = "https://www.google.com/accounts/IssueAuthToken";

/// Turns account credentials into an X-GOOGLE-TOKEN auth token.
pub trait TokenExchange: Send + Sync {
    fn exchange(&self, user: &str, password: &str) -> Result<String, SaslError>;
}

/// Token exchange with the Google ClientLogin service.
pub struct GoogleClientLogin {
    agent: ureq::Agent,
    client_auth_url: String,
    issue_token_url: String,
    source: String,
}

impl GoogleClientLogin {
    pub fn new() -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_global(Some(DEFAULT_TIMEOUT))
                .build(),
        );
        GoogleClientLogin {
            agent,
            client_auth_url: CLIENT_AUTH_URL.to_string(),
            issue_token_url: ISSUE_TOKEN_URL.to_string(),
            source: format!("iksjab-{}", crate::VERSION),
        }
    }

    /// Overrides the ClientAuth and IssueAuthToken endpoints.
    pub fn endpoints(mut self, client_auth_url: &str, issue_token_url: &str) -> Self {
        self.client_auth_url = client_auth_url.to_string();
        self.issue_token_url = issue_token_url.to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_global(Some(timeout))
                .build(),
        );
        self
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, SaslError> {
        let fail = |err: ureq::Error| SaslError::TokenExchange(err.to_string());
        let mut response = self
            .agent
            .post(url)
            .send_form(form.iter().copied())
            .map_err(fail)?;
        response.body_mut().read_to_string().map_err(fail)
    }
}

impl Default for GoogleClientLogin {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenExchange for GoogleClientLogin {
    fn exchange(&self, user: &str, password: &str) -> Result<String, SaslError> {
        let reply = self.post_form(
            &self.client_auth_url,
            &[
                ("Email", user),
                ("Passwd", password),
                ("PersistentCookie", "false"),
                ("source", self.source.as_str()),
            ],
        )?;
        let mut sid = None;
        let mut lsid = None;
        for line in reply.lines() {
            match line.split_once('=') {
                Some(("SID", value)) => sid = Some(value.trim()),
                Some(("LSID", value)) => lsid = Some(value.trim()),
                _ => {}
            }
        }
        let (Some(sid), Some(lsid)) = (sid, lsid) else {
            return Err(SaslError::TokenExchange(description::NO_SID.to_string()));
        };
        debug!("ClientLogin accepted the credentials");
        let token = self.post_form(
            &self.issue_token_url,
            &[
                ("SID", sid),
                ("LSID", lsid),
                ("service", "mail"),
                ("Session", "true"),
            ],
        )?;
        Ok(token.trim().to_string())
    }
}

/// X-GOOGLE-TOKEN mechanism, PLAIN style payload with an auth token.
pub struct XGoogleToken {
    user: String,
    password: String,
    exchange: Arc<dyn TokenExchange>,
}

impl XGoogleToken {
    pub fn new(user: &str, password: &str, exchange: Arc<dyn TokenExchange>) -> Self {
        XGoogleToken {
            user: user.to_string(),
            password: password.to_string(),
            exchange,
        }
    }
}

impl Mechanism for XGoogleToken {
    fn name(&self) -> &'static str {
        "X-GOOGLE-TOKEN"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
        let token = self.exchange.exchange(&self.user, &self.password)?;
        Ok(Some(credentials(&self.user, &token)))
    }

    fn respond(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        Err(SaslError::MalformedChallenge)
    }
}
