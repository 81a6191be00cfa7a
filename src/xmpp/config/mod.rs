/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use super::Jid;
use super::XmppError;
use super::constants::CLIENT_PORT;
use super::constants::DEFAULT_RESOURCE;
use super::constants::DEFAULT_TIMEOUT;

const BOSH_PORT: u16 = 5280;

pub(crate) mod description {
    pub(crate) const MISSING_EQUALS: &str = "option without '='";
    pub(crate) const UNKNOWN_KEY: &str = "unknown option";
    pub(crate) const MISSING_USER: &str = "'user id' is required";
    pub(crate) const BAD_JID: &str = "'user id' is not a valid JabberID";
    pub(crate) const BAD_NUMBER: &str = "invalid number";
    pub(crate) const BAD_BOOL: &str = "invalid boolean, use true or false";
    pub(crate) const BAD_PROXY_TYPE: &str = "proxy type must be socks4, socks5 or http";
    pub(crate) const BAD_TLS_MODE: &str = "tls must be required, optional or disabled";
    pub(crate) const BAD_POLICY: &str = "certificate policy must be verify or accept any";
    pub(crate) const MISSING_PROXY: &str = "'proxy server' is required when 'use proxy' is set";
    pub(crate) const MISSING_BINDING: &str = "'http binding' is not set";
}

/// When to upgrade the stream with STARTTLS.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum TlsMode {
    /// Fail if the server does not offer STARTTLS.
    Required,
    /// Upgrade whenever the server offers it.
    #[default]
    Optional,
    /// Never upgrade, fail if the server requires it.
    Disabled,
}

/// How to check the certificate of the server.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum CertificatePolicy {
    /// Verify the chain against the bundled web PKI roots.
    #[default]
    Verify,
    /// Accept any certificate. Only for testing against private servers.
    AcceptAny,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProxyType {
    Socks4,
    Socks5,
    Http,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProxyOptions {
    pub kind: ProxyType,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ProxyOptions {
    fn default_port(kind: ProxyType) -> u16 {
        match kind {
            ProxyType::Socks4 | ProxyType::Socks5 => 1080,
            ProxyType::Http => 8080,
        }
    }
}

/// Everything needed to open a connection.
///
/// Can be built with the setters or parsed from the semicolon separated
/// `key=value` form. Keys are case insensitive:
///
/// ```
/// use iksjab::{ConnectionString, TlsMode};
///
/// let config: ConnectionString =
///     "User ID=juliet@example.com; user password=r0m30; tls=required; connection timeout=10"
///         .parse()
///         .unwrap();
/// assert_eq!(config.jid().bare(), "juliet@example.com");
/// assert_eq!(config.tls(), TlsMode::Required);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionString {
    jid: Jid,
    password: String,
    server: Option<String>,
    port: Option<u16>,
    resource: Option<String>,
    resolve_host_name: bool,
    proxy: Option<ProxyOptions>,
    http_binding: Option<String>,
    timeout: Duration,
    tls: TlsMode,
    certificate_policy: CertificatePolicy,
}

impl ConnectionString {
    pub fn new(jid: Jid, password: &str) -> Self {
        ConnectionString {
            jid,
            password: password.to_string(),
            server: None,
            port: None,
            resource: None,
            resolve_host_name: false,
            proxy: None,
            http_binding: None,
            timeout: DEFAULT_TIMEOUT,
            tls: TlsMode::default(),
            certificate_policy: CertificatePolicy::default(),
        }
    }

    pub fn server(mut self, server: Option<String>) -> Self {
        self.server = server;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn resource(mut self, resource: Option<String>) -> Self {
        self.resource = resource;
        self
    }

    pub fn resolve_host_name(mut self, resolve: bool) -> Self {
        self.resolve_host_name = resolve;
        self
    }

    pub fn proxy(mut self, proxy: Option<ProxyOptions>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Selects BOSH. The value is either a full URL of the connection
    /// manager or `true` to use `http://<host>:5280/http-bind`.
    pub fn http_binding(mut self, binding: Option<String>) -> Self {
        self.http_binding = binding;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    pub fn certificate_policy(mut self, policy: CertificatePolicy) -> Self {
        self.certificate_policy = policy;
        self
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn user_password(&self) -> &str {
        &self.password
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// Host to connect to, the domain of the JID unless overridden.
    pub fn host(&self) -> &str {
        match &self.server {
            Some(server) => server,
            None => self.jid.domainpart(),
        }
    }

    pub fn explicit_server(&self) -> bool {
        self.server.is_some()
    }

    pub fn port_number(&self) -> u16 {
        self.port.unwrap_or(CLIENT_PORT)
    }

    /// Resource to bind, either configured or taken from the JID.
    pub fn resource_name(&self) -> &str {
        if let Some(resource) = &self.resource {
            return resource;
        }
        self.jid.resourcepart().unwrap_or(DEFAULT_RESOURCE)
    }

    pub fn resolves_host_name(&self) -> bool {
        self.resolve_host_name
    }

    pub fn proxy_options(&self) -> Option<&ProxyOptions> {
        self.proxy.as_ref()
    }

    pub fn uses_http_binding(&self) -> bool {
        self.http_binding.is_some()
    }

    /// URL of the BOSH connection manager.
    pub fn bosh_url(&self) -> Option<String> {
        let binding = self.http_binding.as_deref()?;
        if binding.starts_with("http://") || binding.starts_with("https://") {
            return Some(binding.to_string());
        }
        let port = self.port.unwrap_or(BOSH_PORT);
        let scheme = if port == 443 || port == 5443 { "https" } else { "http" };
        Some(format!("{scheme}://{}:{port}/http-bind", self.host()))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tls(&self) -> TlsMode {
        self.tls
    }

    pub fn policy(&self) -> CertificatePolicy {
        self.certificate_policy
    }
}

fn parse_bool(value: &str) -> Result<bool, XmppError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(XmppError::Config(description::BAD_BOOL)),
    }
}

fn parse_number<T: FromStr>(value: &str) -> Result<T, XmppError> {
    value
        .parse()
        .map_err(|_| XmppError::Config(description::BAD_NUMBER))
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[derive(Default)]
struct ProxyFields {
    enabled: bool,
    kind: Option<ProxyType>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
}

impl FromStr for ConnectionString {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut jid = None;
        let mut password = String::new();
        let mut proxy = ProxyFields::default();
        let mut options: Vec<(String, String)> = Vec::new();

        for pair in s.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                return Err(XmppError::Config(description::MISSING_EQUALS));
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "user id" => {
                    jid = Some(
                        Jid::new(value).map_err(|_| XmppError::Config(description::BAD_JID))?,
                    )
                }
                "user password" => password = value.to_string(),
                "use proxy" => proxy.enabled = parse_bool(value)?,
                "proxy type" => {
                    proxy.kind = Some(match value.to_ascii_lowercase().as_str() {
                        "socks4" => ProxyType::Socks4,
                        "socks5" => ProxyType::Socks5,
                        "http" => ProxyType::Http,
                        _ => return Err(XmppError::Config(description::BAD_PROXY_TYPE)),
                    })
                }
                "proxy server" => proxy.host = optional(value),
                "proxy port number" => proxy.port = Some(parse_number(value)?),
                "proxy user" => proxy.user = optional(value),
                "proxy password" => proxy.password = optional(value),
                "server" | "port number" | "resource" | "resolve host name" | "http binding"
                | "connection timeout" | "tls" | "certificate policy" => {
                    options.push((key, value.to_string()))
                }
                _ => return Err(XmppError::Config(description::UNKNOWN_KEY)),
            }
        }

        let Some(jid) = jid else {
            return Err(XmppError::Config(description::MISSING_USER));
        };
        let mut config = ConnectionString::new(jid, &password);
        for (key, value) in options {
            config = match key.as_str() {
                "server" => config.server(optional(&value)),
                "port number" => config.port(parse_number(&value)?),
                "resource" => config.resource(optional(&value)),
                "resolve host name" => config.resolve_host_name(parse_bool(&value)?),
                "http binding" => match value.as_str() {
                    "" => config,
                    url if url.starts_with("http") => config.http_binding(Some(value)),
                    flag => {
                        if parse_bool(flag)? {
                            config.http_binding(Some("true".to_string()))
                        } else {
                            config
                        }
                    }
                },
                "connection timeout" => {
                    config.connection_timeout(Duration::from_secs(parse_number(&value)?))
                }
                "tls" => config.tls_mode(match value.to_ascii_lowercase().as_str() {
                    "required" => TlsMode::Required,
                    "optional" => TlsMode::Optional,
                    "disabled" => TlsMode::Disabled,
                    _ => return Err(XmppError::Config(description::BAD_TLS_MODE)),
                }),
                "certificate policy" => {
                    config.certificate_policy(match value.to_ascii_lowercase().as_str() {
                        "verify" => CertificatePolicy::Verify,
                        "accept any" | "acceptany" => CertificatePolicy::AcceptAny,
                        _ => return Err(XmppError::Config(description::BAD_POLICY)),
                    })
                }
                _ => config,
            };
        }

        if proxy.enabled {
            let Some(host) = proxy.host else {
                return Err(XmppError::Config(description::MISSING_PROXY));
            };
            let kind = proxy.kind.unwrap_or(ProxyType::Socks5);
            config = config.proxy(Some(ProxyOptions {
                kind,
                host,
                port: proxy.port.unwrap_or(ProxyOptions::default_port(kind)),
                user: proxy.user,
                password: proxy.password,
            }));
        }

        Ok(config)
    }
}

impl Display for ConnectionString {
    /// Prints the options in the parseable form, without the password.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user id={}", self.jid)?;
        if let Some(server) = &self.server {
            write!(f, ";server={server}")?;
        }
        if let Some(port) = self.port {
            write!(f, ";port number={port}")?;
        }
        if let Some(binding) = &self.http_binding {
            write!(f, ";http binding={binding}")?;
        }
        write!(f, ";connection timeout={}", self.timeout.as_secs())
    }
}
