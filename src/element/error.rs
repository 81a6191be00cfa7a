/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::error::Error;
use std::fmt::Display;

use crate::SaxError;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ElementError {
    NoMemory,
    BadXml(&'static str),
}

impl Display for ElementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementError::NoMemory => write!(f, "not enough memory"),
            ElementError::BadXml(msg) => write!(f, "invalid XML syntax: {msg}"),
        }
    }
}

impl Error for ElementError {}

impl From<SaxError> for ElementError {
    fn from(err: SaxError) -> Self {
        match err {
            SaxError::NoMemory => ElementError::NoMemory,
            SaxError::BadXml(msg) => ElementError::BadXml(msg),
            SaxError::HandlerAbort => ElementError::BadXml(description::UNEXPECTED_HANDLER_ABORT),
        }
    }
}

pub(super) mod description {
    pub(super) const UNEXPECTED_HANDLER_ABORT: &str = "unexpected handler abort";
    pub(in super::super) const NO_DOCUMENT: &str = "no element parsed";
    pub(in super::super) const TAG_MISMATCH: &str = "start and end tags have different names";
    pub(in super::super) const DUPLICATE_ATTRIBUTE: &str =
        "attribute name already used in this tag";
    pub(in super::super) const SECOND_ROOT: &str = "only one root element is allowed";
}
