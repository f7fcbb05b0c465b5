//! Recipient identities on the chat network.
//!
//! Identities look like `user@server`. Users of multi-device accounts may
//! carry an agent and device suffix: `user.agent:device@server`.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// A parsed chat-network identity (JID).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    user: String,
    agent: Option<u8>,
    device: Option<u16>,
    server: String,
}

impl Jid {
    /// The user part (phone number, group id, ...).
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The server part (`s.whatsapp.net`, `g.us`, ...).
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Device number for multi-device identities.
    pub fn device(&self) -> Option<u16> {
        self.device
    }

    /// Agent number for multi-device identities.
    pub fn agent(&self) -> Option<u8> {
        self.agent
    }
}

/// Errors produced while parsing a [`Jid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JidError {
    /// No `@` separator.
    MissingServer(String),
    /// More than one `@`.
    MultipleSeparators(String),
    /// Empty user part.
    EmptyUser(String),
    /// Server part contains characters outside `[A-Za-z0-9.-]` or is empty.
    InvalidServer(String),
    /// User part contains whitespace.
    InvalidUser(String),
    /// Agent or device suffix is not a number in range.
    InvalidDevice(String),
}

impl fmt::Display for JidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingServer(raw) => write!(f, "identity {raw:?} has no server part"),
            Self::MultipleSeparators(raw) => write!(f, "identity {raw:?} has more than one '@'"),
            Self::EmptyUser(raw) => write!(f, "identity {raw:?} has an empty user part"),
            Self::InvalidServer(raw) => write!(f, "identity {raw:?} has an invalid server part"),
            Self::InvalidUser(raw) => write!(f, "identity {raw:?} has an invalid user part"),
            Self::InvalidDevice(raw) => write!(f, "identity {raw:?} has an invalid agent/device suffix"),
        }
    }
}

impl std::error::Error for JidError {}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split('@');
        let (Some(user_part), Some(server)) = (parts.next(), parts.next()) else {
            return Err(JidError::MissingServer(raw.to_string()));
        };
        if parts.next().is_some() {
            return Err(JidError::MultipleSeparators(raw.to_string()));
        }

        if server.is_empty()
            || !server
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(JidError::InvalidServer(raw.to_string()));
        }
        if user_part.is_empty() {
            return Err(JidError::EmptyUser(raw.to_string()));
        }
        if user_part.chars().any(char::is_whitespace) {
            return Err(JidError::InvalidUser(raw.to_string()));
        }

        let invalid_device = || JidError::InvalidDevice(raw.to_string());

        let (rest, device) = match user_part.split_once(':') {
            Some((rest, device)) => (rest, Some(device.parse::<u16>().map_err(|_| invalid_device())?)),
            None => (user_part, None),
        };
        // Only multi-device identities carry an agent; plain users may contain dots.
        let (user, agent) = match (device, rest.rsplit_once('.')) {
            (Some(_), Some((user, agent))) => (user, Some(agent.parse::<u8>().map_err(|_| invalid_device())?)),
            _ => (rest, None),
        };
        if user.is_empty() {
            return Err(JidError::EmptyUser(raw.to_string()));
        }

        Ok(Self {
            user: user.to_string(),
            agent,
            device,
            server: server.to_string(),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)?;
        if let Some(agent) = self.agent {
            write!(f, ".{agent}")?;
        }
        if let Some(device) = self.device {
            write!(f, ":{device}")?;
        }
        write!(f, "@{}", self.server)
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
