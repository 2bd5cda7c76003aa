//! Connection settings.
//!
//! Where these values come from (environment, files, command line) is up to the
//! caller; this module only holds them and parses `raa://` addresses.
use std::{str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5558;
pub const DEFAULT_HOST: &str = "pbil.univ-lyon1.fr";

/// Bytes fetched per sequence fragment request.
pub const DEFAULT_FRAGMENT_WINDOW: usize = 10_000;

/// Bounded wait between checks of a caller's interrupt predicate.
pub const DEFAULT_CANCEL_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Announced to the server right after the banner when set.
    pub client_id: Option<String>,
    pub cancel_poll: Duration,
    pub fragment_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            cancel_poll: DEFAULT_CANCEL_POLL,
            fragment_window: DEFAULT_FRAGMENT_WINDOW,
        }
    }
}

impl SessionConfig {
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address '{0}' has no port")]
    MissingPort(String),

    #[error("address '{0}' has an invalid port")]
    BadPort(String),

    #[error("address '{0}' has no host")]
    MissingHost(String),
}

/// Server location and optional database, e.g. `raa://pbil.univ-lyon1.fr:5558/embl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaaAddress {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
}

impl Default for RaaAddress {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: None,
        }
    }
}

impl FromStr for RaaAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = match s.find("://") {
            Some(pos) => &s[pos + 3..],
            None => s,
        };
        let (host, rest) = body
            .split_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::MissingHost(s.to_string()));
        }

        let (port, database) = match rest.split_once('/') {
            Some((port, db)) => (port, Some(db.trim_start())),
            None => (rest, None),
        };
        let port = port
            .trim()
            .parse()
            .map_err(|_| AddressError::BadPort(s.to_string()))?;
        let database = database.filter(|db| !db.is_empty()).map(str::to_string);

        Ok(Self {
            host: host.to_string(),
            port,
            database,
        })
    }
}
