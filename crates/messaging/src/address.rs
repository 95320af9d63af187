//! Network addresses (JIDs).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Server part used for plain phone numbers.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// A `user@server` address on the messaging network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    user: String,
    server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Parse a recipient the way API callers write it.
    ///
    /// A leading `+` is dropped. Anything containing `@` is taken as a full
    /// address; otherwise the value must be a phone number and gets the
    /// default user server.
    pub fn parse_recipient(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('+').unwrap_or(raw);
        if raw.is_empty() {
            return Err(Error::invalid_input("could not parse phone"));
        }

        if let Some((user, server)) = raw.split_once('@') {
            if server.is_empty() || server.contains('@') {
                return Err(Error::invalid_input("could not parse phone"));
            }
            return Ok(Self::new(user, server));
        }

        if !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::invalid_input("could not parse phone"));
        }
        Ok(Self::new(raw, DEFAULT_USER_SERVER))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_group(&self) -> bool {
        self.server == "g.us"
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            f.write_str(&self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_recipient(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_recipient(&value)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}
