/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::collections::HashMap;

use tracing::debug;

use super::Mechanism;
use crate::xmpp::SaslError;

const NONCE_COUNT: &str = "00000001";

/// Directives of a DIGEST-MD5 challenge (RFC 2831).
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DigestChallenge {
    directives: HashMap<String, String>,
}

impl DigestChallenge {
    /// Parses `key=value` pairs separated by commas, values may be quoted.
    ///
    /// Only the first value of a repeated directive is kept, except for
    /// `nonce` which must be unique.
    pub fn parse(challenge: &str) -> Result<DigestChallenge, SaslError> {
        let mut directives = HashMap::new();
        let mut rest = challenge.trim();
        while !rest.is_empty() {
            let (key, after) = rest
                .split_once('=')
                .ok_or(SaslError::MalformedChallenge)?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(SaslError::MalformedChallenge);
            }
            let after = after.trim_start();
            let (value, after) = if let Some(quoted) = after.strip_prefix('"') {
                let mut value = String::new();
                let mut chars = quoted.char_indices();
                let mut end = None;
                while let Some((pos, c)) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => {
                            end = Some(pos);
                            break;
                        }
                        c => value.push(c),
                    }
                }
                let end = end.ok_or(SaslError::MalformedChallenge)?;
                (value, &quoted[end + 1..])
            } else {
                match after.split_once(',') {
                    Some((value, _)) => (value.trim().to_string(), &after[value.len()..]),
                    None => (after.trim().to_string(), ""),
                }
            };
            let after = after.trim_start();
            rest = match after.strip_prefix(',') {
                Some(next) => next.trim_start(),
                None if after.is_empty() => after,
                None => return Err(SaslError::MalformedChallenge),
            };
            if directives.contains_key(&key) {
                if key == "nonce" {
                    return Err(SaslError::DuplicateNonce);
                }
                continue;
            }
            directives.insert(key, value);
        }
        Ok(DigestChallenge { directives })
    }

    pub fn get(&self, directive: &str) -> Option<&str> {
        self.directives.get(directive).map(String::as_str)
    }
}

/// Computes the `response` value, or the `rspauth` value when
/// `method` is empty.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_response(
    username: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    cnonce: &str,
    digest_uri: &str,
    qop: &str,
    method: &str,
) -> String {
    let secret = md5::compute(format!("{username}:{realm}:{password}"));
    let mut a1 = secret.0.to_vec();
    a1.extend_from_slice(format!(":{nonce}:{cnonce}").as_bytes());
    let ha1 = hex::encode(md5::compute(&a1).0);
    let mut a2 = format!("{method}:{digest_uri}");
    if qop != "auth" {
        a2.push_str(":00000000000000000000000000000000");
    }
    let ha2 = hex::encode(md5::compute(a2).0);
    hex::encode(md5::compute(format!("{ha1}:{nonce}:{NONCE_COUNT}:{cnonce}:{qop}:{ha2}")).0)
}

/// Picks the quality of protection from the offered `qop` options.
///
/// Integrity and privacy layers are not supported, so `auth-int` and
/// `auth-conf` are passed over. `auth` is used when nothing else fits.
fn select_qop(options: Option<&str>) -> &'static str {
    for option in options.unwrap_or("").split(',').map(str::trim) {
        match option {
            "auth" => return "auth",
            "" => {}
            other => debug!(qop = other, "unsupported protection skipped"),
        }
    }
    "auth"
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

enum Step {
    Initial,
    Responded { rspauth: String },
    Done,
}

/// DIGEST-MD5 mechanism (RFC 2831).
pub struct DigestMd5 {
    username: String,
    password: String,
    domain: String,
    service: String,
    cnonce: Option<String>,
    step: Step,
}

impl DigestMd5 {
    pub fn new(username: &str, password: &str, domain: &str) -> Self {
        DigestMd5 {
            username: username.to_string(),
            password: password.to_string(),
            domain: domain.to_string(),
            service: "xmpp".to_string(),
            cnonce: None,
            step: Step::Initial,
        }
    }

    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    /// Uses a fixed client nonce, a random one is generated otherwise.
    pub fn cnonce(mut self, cnonce: Option<String>) -> Self {
        self.cnonce = cnonce;
        self
    }

    fn first_response(&mut self, challenge: &DigestChallenge) -> Result<Vec<u8>, SaslError> {
        let nonce = challenge.get("nonce").ok_or(SaslError::MissingNonce)?;
        if let Some(charset) = challenge.get("charset") {
            if !charset.eq_ignore_ascii_case("utf-8") {
                return Err(SaslError::UnsupportedCharset);
            }
        }
        match challenge.get("algorithm") {
            Some(algorithm) if algorithm.eq_ignore_ascii_case("md5-sess") => {}
            _ => return Err(SaslError::UnsupportedAlgorithm),
        }
        let qop = select_qop(challenge.get("qop"));
        let realm = challenge.get("realm").unwrap_or(self.domain.as_str()).to_string();
        let cnonce = match &self.cnonce {
            Some(cnonce) => cnonce.clone(),
            None => hex::encode(rand::random::<[u8; 16]>()),
        };
        let digest_uri = format!("{}/{}", self.service, self.domain);
        let response = compute_response(
            &self.username,
            &realm,
            &self.password,
            nonce,
            &cnonce,
            &digest_uri,
            qop,
            "AUTHENTICATE",
        );
        let rspauth = compute_response(
            &self.username,
            &realm,
            &self.password,
            nonce,
            &cnonce,
            &digest_uri,
            qop,
            "",
        );
        self.step = Step::Responded { rspauth };
        Ok(format!(
            "charset=utf-8,username=\"{}\",realm=\"{}\",nonce=\"{}\",nc={NONCE_COUNT},cnonce=\"{}\",digest-uri=\"{}\",response={response},qop={qop}",
            quote(&self.username),
            quote(&realm),
            quote(nonce),
            quote(&cnonce),
            quote(&digest_uri),
        )
        .into_bytes())
    }
}

impl Mechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
        self.step = Step::Initial;
        Ok(None)
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        let text = std::str::from_utf8(challenge).map_err(|_| SaslError::MalformedChallenge)?;
        let challenge = DigestChallenge::parse(text)?;
        match std::mem::replace(&mut self.step, Step::Done) {
            Step::Initial => self.first_response(&challenge),
            Step::Responded { rspauth } => {
                if challenge.get("rspauth") != Some(rspauth.as_str()) {
                    return Err(SaslError::MalformedChallenge);
                }
                Ok(Vec::new())
            }
            Step::Done => Err(SaslError::MalformedChallenge),
        }
    }

    fn is_complete(&self) -> bool {
        !matches!(self.step, Step::Responded { .. })
    }
}
