/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod error;

use std::fmt::Display;
use std::hash::Hash;
use std::hash::Hasher;
use std::num::NonZero;
use std::str::FromStr;

pub use error::BadJid;
use error::description;

const MAX_PART_SIZE: usize = 1023;

struct JidParts<'a> {
    local: Option<&'a str>,
    domain: &'a str,
    resource: Option<&'a str>,
}

fn check_resource(resource: &str) -> Result<(), BadJid> {
    if resource.is_empty() {
        return Err(BadJid(description::RESOURCE_EMPTY));
    }
    if resource.len() > MAX_PART_SIZE {
        return Err(BadJid(description::RESOURCE_TOO_LONG));
    }
    if resource.chars().any(char::is_control) {
        return Err(BadJid(description::RESOURCE_BAD_CHAR));
    }
    Ok(())
}

fn is_bad_domain_char(c: char) -> bool {
    c == '@' || c.is_whitespace() || c.is_control()
}

fn is_bad_local_char(c: char) -> bool {
    matches!(c, '"' | '&' | '\'' | ':' | '<' | '>') || c.is_whitespace() || c.is_control()
}

impl<'a> JidParts<'a> {
    fn new(jid: &'a str) -> Result<JidParts<'a>, BadJid> {
        let slash_pos = jid.find('/');
        let bare = match slash_pos {
            Some(pos) => &jid[..pos],
            None => jid,
        };
        let at_pos = bare.find('@');
        let mut domain = match at_pos {
            Some(pos) => &bare[pos + 1..],
            None => bare,
        };
        // Remove final dot as per RFC 7622 section 3.2
        if let Some(stripped) = domain.strip_suffix('.') {
            domain = stripped;
        }
        if domain.is_empty() {
            return Err(BadJid(description::DOMAIN_EMPTY));
        }
        if domain.len() > MAX_PART_SIZE {
            return Err(BadJid(description::DOMAIN_TOO_LONG));
        }
        if domain.contains(is_bad_domain_char) {
            return Err(BadJid(description::DOMAIN_BAD_CHAR));
        }
        let local = match at_pos {
            Some(0) => return Err(BadJid(description::LOCAL_EMPTY)),
            Some(pos) if pos > MAX_PART_SIZE => {
                return Err(BadJid(description::LOCAL_TOO_LONG));
            }
            Some(pos) if bare[..pos].contains(is_bad_local_char) => {
                return Err(BadJid(description::LOCAL_BAD_CHAR));
            }
            Some(pos) => Some(&bare[..pos]),
            None => None,
        };
        let resource = match slash_pos {
            Some(pos) => {
                let part = &jid[pos + 1..];
                check_resource(part)?;
                Some(part)
            }
            None => None,
        };

        Ok(JidParts {
            local,
            domain,
            resource,
        })
    }
}

fn position(pos: usize) -> Option<NonZero<u16>> {
    // Parts are limited to 1023 octets so a position always fits
    NonZero::new(pos as u16)
}

/// The address of an entity in the XMPP protocol.
///
/// Each JID has three parts:
/// - Local part: Optionally identifies a local entity on the domain.
/// - Domain part: Identifies an XMPP server.
/// - Resource part: Optionally identifies a service or an object.
///
/// The domain part is stored in its normalized form, lowercased and
/// without a final dot, so comparisons treat `Example.COM.` and
/// `example.com` as the same server.
///
/// More details can be found in [RFC7622](https://datatracker.ietf.org/doc/rfc7622/)
///
/// ```
/// use iksjab::Jid;
///
/// let jid = Jid::new("juliet@Capulet.LIT./balcony").unwrap();
/// assert_eq!(jid.full(), "juliet@capulet.lit/balcony");
/// assert_eq!(jid.bare(), "juliet@capulet.lit");
/// ```
#[derive(Debug, Clone, Eq)]
pub struct Jid {
    full: String,
    slash_pos: Option<NonZero<u16>>,
    at_pos: Option<NonZero<u16>>,
}

impl Jid {
    /// Create a JID from a string.
    pub fn new(jid: &str) -> Result<Self, BadJid> {
        let parts = JidParts::new(jid)?;

        let mut full_size = parts.domain.len();
        if let Some(local) = parts.local {
            full_size += local.len() + 1;
        }
        if let Some(resource) = parts.resource {
            full_size += resource.len() + 1;
        }
        let mut full = String::with_capacity(full_size);
        let mut slash_pos = None;
        let mut at_pos = None;
        if let Some(local) = parts.local {
            full.push_str(local);
            at_pos = position(full.len());
            full.push('@');
        }
        full.push_str(&parts.domain.to_lowercase());
        if let Some(resource) = parts.resource {
            slash_pos = position(full.len());
            full.push('/');
            full.push_str(resource);
        }

        Ok(Jid {
            full,
            slash_pos,
            at_pos,
        })
    }

    /// Full form of the JID with all the components.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// Bare form of the JID without the resource part.
    pub fn bare(&self) -> &str {
        match self.slash_pos {
            Some(pos) => &self.full[..pos.get() as usize],
            None => &self.full,
        }
    }

    /// Only the local part of the JID.
    pub fn localpart(&self) -> Option<&str> {
        match self.at_pos {
            Some(pos) => self.full.get(..pos.get() as usize),
            None => None,
        }
    }

    /// Only the domain part of the JID.
    pub fn domainpart(&self) -> &str {
        let start = match self.at_pos {
            Some(pos) => pos.get() as usize + 1,
            None => 0,
        };
        let end = match self.slash_pos {
            Some(pos) => pos.get() as usize,
            None => self.full.len(),
        };
        &self.full[start..end]
    }

    /// Only the resource part of the JID.
    pub fn resourcepart(&self) -> Option<&str> {
        match self.slash_pos {
            Some(pos) => self.full.get(pos.get() as usize + 1..),
            None => None,
        }
    }

    /// True if the JID does not contain a resource part.
    pub fn is_bare(&self) -> bool {
        self.slash_pos.is_none()
    }

    /// Creates a copy of the JID without the resource part.
    pub fn to_bare(&self) -> Jid {
        Jid {
            full: self.bare().to_string(),
            slash_pos: None,
            at_pos: self.at_pos,
        }
    }

    /// Creates another JID by overriding the resource part.
    pub fn with_resource(self, resource: &str) -> Result<Jid, BadJid> {
        check_resource(resource)?;
        let bare_len = self.bare().len();
        let mut full = String::with_capacity(bare_len + 1 + resource.len());
        full.push_str(self.bare());
        full.push('/');
        full.push_str(resource);
        Ok(Jid {
            full,
            slash_pos: position(bare_len),
            at_pos: self.at_pos,
        })
    }
}

impl FromStr for Jid {
    type Err = BadJid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::new(s)
    }
}

impl Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

impl PartialEq for Jid {
    fn eq(&self, other: &Jid) -> bool {
        self.full == other.full
    }
}

impl PartialOrd for Jid {
    fn partial_cmp(&self, other: &Jid) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Jid {
    fn cmp(&self, other: &Jid) -> std::cmp::Ordering {
        self.full.cmp(&other.full)
    }
}

impl Hash for Jid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full.hash(state)
    }
}
