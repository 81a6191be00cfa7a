/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::io::Read;
use std::io::Write;
use std::net::IpAddr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::xmpp::ProxyOptions;
use crate::xmpp::ProxyType;
use crate::xmpp::XmppError;
use crate::xmpp::error::description;

const SOCKS4_VERSION: u8 = 4;
const SOCKS4_GRANTED: u8 = 0x5a;
const SOCKS5_VERSION: u8 = 5;
const SOCKS5_NO_AUTH: u8 = 0;
const SOCKS5_USER_PASS: u8 = 2;
const SOCKS5_NO_METHOD: u8 = 0xff;
const CMD_CONNECT: u8 = 1;
const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;
const ATYP_IPV6: u8 = 4;
const MAX_HTTP_REPLY: usize = 8192;

fn proxy_error(msg: &'static str) -> XmppError {
    XmppError::Proxy(msg)
}

/// Asks the proxy on the other end of `stream` to connect to host:port.
pub(crate) fn handshake<S: Read + Write>(
    stream: &mut S,
    proxy: &ProxyOptions,
    host: &str,
    port: u16,
) -> Result<(), XmppError> {
    debug!(kind = ?proxy.kind, proxy = %proxy.host, target = %host, "proxy handshake");
    match proxy.kind {
        ProxyType::Socks4 => socks4_handshake(stream, host, port, proxy.user.as_deref()),
        ProxyType::Socks5 => socks5_handshake(
            stream,
            host,
            port,
            proxy.user.as_deref(),
            proxy.password.as_deref(),
        ),
        ProxyType::Http => http_connect(
            stream,
            host,
            port,
            proxy.user.as_deref(),
            proxy.password.as_deref(),
        ),
    }
}

/// SOCKS4, with the 4a extension for host names.
fn socks4_handshake<S: Read + Write>(
    stream: &mut S,
    host: &str,
    port: u16,
    user: Option<&str>,
) -> Result<(), XmppError> {
    let mut request = vec![SOCKS4_VERSION, CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    let ipv4 = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Some(ip),
        Ok(IpAddr::V6(_)) => return Err(proxy_error(description::PROXY_BAD_REPLY)),
        Err(_) => None,
    };
    match ipv4 {
        Some(ip) => request.extend_from_slice(&ip.octets()),
        None => request.extend_from_slice(&[0, 0, 0, 1]),
    }
    request.extend_from_slice(user.unwrap_or("").as_bytes());
    request.push(0);
    if ipv4.is_none() {
        request.extend_from_slice(host.as_bytes());
        request.push(0);
    }
    stream.write_all(&request)?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply)?;
    if reply[0] != 0 {
        return Err(proxy_error(description::PROXY_BAD_REPLY));
    }
    if reply[1] != SOCKS4_GRANTED {
        return Err(proxy_error(description::PROXY_REFUSED));
    }
    Ok(())
}

fn socks5_handshake<S: Read + Write>(
    stream: &mut S,
    host: &str,
    port: u16,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<(), XmppError> {
    let credentials = user.map(|user| (user, password.unwrap_or("")));
    if let Some((user, password)) = credentials {
        if user.len() > 255 || password.len() > 255 {
            return Err(proxy_error(description::PROXY_NAME_TOO_LONG));
        }
        stream.write_all(&[SOCKS5_VERSION, 2, SOCKS5_NO_AUTH, SOCKS5_USER_PASS])?;
    } else {
        stream.write_all(&[SOCKS5_VERSION, 1, SOCKS5_NO_AUTH])?;
    }

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice)?;
    if choice[0] != SOCKS5_VERSION {
        return Err(proxy_error(description::PROXY_BAD_REPLY));
    }
    match (choice[1], credentials) {
        (SOCKS5_NO_AUTH, _) => {}
        (SOCKS5_USER_PASS, Some((user, password))) => {
            let mut request = vec![1, user.len() as u8];
            request.extend_from_slice(user.as_bytes());
            request.push(password.len() as u8);
            request.extend_from_slice(password.as_bytes());
            stream.write_all(&request)?;
            let mut status = [0u8; 2];
            stream.read_exact(&mut status)?;
            if status[1] != 0 {
                return Err(proxy_error(description::PROXY_AUTH));
            }
        }
        (SOCKS5_NO_METHOD, _) | (SOCKS5_USER_PASS, None) => {
            return Err(proxy_error(description::PROXY_AUTH));
        }
        _ => return Err(proxy_error(description::PROXY_BAD_REPLY)),
    }

    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(proxy_error(description::PROXY_NAME_TOO_LONG));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply)?;
    if reply[0] != SOCKS5_VERSION {
        return Err(proxy_error(description::PROXY_BAD_REPLY));
    }
    if reply[1] != 0 {
        return Err(proxy_error(description::PROXY_REFUSED));
    }
    let address_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            len[0] as usize
        }
        _ => return Err(proxy_error(description::PROXY_BAD_REPLY)),
    };
    // Bound address and port are not needed
    let mut bound = vec![0u8; address_len + 2];
    stream.read_exact(&mut bound)?;
    Ok(())
}

fn http_connect<S: Read + Write>(
    stream: &mut S,
    host: &str,
    port: u16,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<(), XmppError> {
    let target = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(user) = user {
        let token = STANDARD.encode(format!("{user}:{}", password.unwrap_or("")));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes())?;

    // Read byte by byte so nothing after the header is consumed
    let mut reply = Vec::new();
    let mut byte = [0u8; 1];
    while !reply.ends_with(b"\r\n\r\n") {
        if reply.len() >= MAX_HTTP_REPLY {
            return Err(proxy_error(description::PROXY_BAD_REPLY));
        }
        stream.read_exact(&mut byte)?;
        reply.push(byte[0]);
    }
    let status_line = reply.split(|c| *c == b'\r').next().unwrap_or(&[]);
    let status = String::from_utf8_lossy(status_line);
    let mut parts = status.split_whitespace();
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(proxy_error(description::PROXY_BAD_REPLY));
    }
    match parts.next() {
        Some("200") => Ok(()),
        Some("407") => Err(proxy_error(description::PROXY_AUTH)),
        _ => Err(proxy_error(description::PROXY_REFUSED)),
    }
}
