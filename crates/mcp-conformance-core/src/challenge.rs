//! `WWW-Authenticate` challenge parsing.
//!
//! The grammar is deliberately tolerant: real resource servers vary in their
//! spacing and quoting, and a conformance judge that chokes on a header it is
//! about to criticize helps nobody. The scheme is the first
//! whitespace-delimited token; parameters are `key=value` pairs separated by
//! commas and arbitrary whitespace, where a value is either a quoted string
//! (with `\"` escapes) or an unquoted token terminated by comma or
//! whitespace.

use std::collections::BTreeMap;

/// A parsed authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: String,
    pub params: BTreeMap<String, String>,
}

impl AuthChallenge {
    /// Parse a challenge header value. Returns `None` for an empty header.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        if header.is_empty() {
            return None;
        }

        let (scheme, rest) = match header.find(char::is_whitespace) {
            Some(idx) => (&header[..idx], &header[idx..]),
            None => (header, ""),
        };

        let mut params = BTreeMap::new();
        let mut chars = rest.chars().peekable();

        loop {
            // Skip separators between pairs.
            while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' || c == ',' || c.is_whitespace() {
                    break;
                }
                key.push(c);
                chars.next();
            }

            if chars.peek() != Some(&'=') {
                // Bare token without a value (e.g. `Bearer realm`); skip it.
                continue;
            }
            chars.next(); // consume '='

            let value = if chars.peek() == Some(&'"') {
                chars.next(); // consume opening quote
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
                value
            } else {
                let mut value = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ',' || c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value
            };

            if !key.is_empty() {
                params.insert(key, value);
            }
        }

        Some(Self {
            scheme: scheme.to_string(),
            params,
        })
    }

    /// Convenience accessor for a single parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
