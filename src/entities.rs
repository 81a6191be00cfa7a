/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

pub mod predefined {
    pub const LT: &str = "&lt;";
    pub const GT: &str = "&gt;";
    pub const AMP: &str = "&amp;";
    pub const APOS: &str = "&apos;";
    pub const QUOT: &str = "&quot;";
}

fn replacement(c: char) -> Option<&'static str> {
    match c {
        '<' => Some(predefined::LT),
        '>' => Some(predefined::GT),
        '&' => Some(predefined::AMP),
        '\'' => Some(predefined::APOS),
        '"' => Some(predefined::QUOT),
        _ => None,
    }
}

pub fn escaped_size(s: &str) -> usize {
    s.chars()
        .map(|c| replacement(c).map_or(c.len_utf8(), str::len))
        .sum()
}

/// Writes the text with the XML special characters replaced.
pub fn escape_fmt(s: &str, f: &mut impl std::fmt::Write) -> std::fmt::Result {
    let mut start = 0;
    for (pos, c) in s.char_indices() {
        if let Some(entity) = replacement(c) {
            f.write_str(&s[start..pos])?;
            f.write_str(entity)?;
            start = pos + 1;
        }
    }
    f.write_str(&s[start..])
}

pub fn escape(s: &str) -> String {
    let mut buf = String::with_capacity(escaped_size(s));
    // Writing into a String cannot fail
    let _ = escape_fmt(s, &mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_size() {
        const NOESCAPE: &str = "abc$#@!%^*(){}[]=-+/.,;:FDSF3443";
        assert_eq!(escaped_size(NOESCAPE), NOESCAPE.len());
        assert_eq!(escaped_size("abc&def"), "abc&amp;def".len());
        assert_eq!(escaped_size("<>&'\""), "&lt;&gt;&amp;&apos;&quot;".len());
        assert_eq!(escaped_size("ğ<"), "ğ&lt;".len());
    }

    #[test]
    fn escaping() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a<b & 'c'"), "a&lt;b &amp; &apos;c&apos;");
        assert_eq!(escape("Çağ\"x\""), "Çağ&quot;x&quot;");
    }
}
