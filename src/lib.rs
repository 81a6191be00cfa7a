/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

mod element;
mod entities;
mod parser;
#[cfg(feature = "xmpp")]
mod xmpp;

/// Version of the crate, also sent as the client source name.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use parser::Location;
pub use parser::SaxElement;
pub use parser::SaxError;
pub use parser::SaxHandler;
pub use parser::SaxParser;

pub use element::Element;
pub use element::ElementError;
pub use element::Node;

#[cfg(feature = "xmpp")]
pub use xmpp::*;
