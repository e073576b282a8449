//! Controller endpoint addresses.

use std::fmt;
use std::str::FromStr;

use crate::error::ShutterError;

/// A websocket address of the controller.
///
/// Always carries a `ws://` or `wss://` scheme; a bare `host:port` is
/// normalised to `ws://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    /// Parse and normalise an endpoint string.
    pub fn parse(input: &str) -> Result<Self, ShutterError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "empty address"));
        }

        let url = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("ws://{trimmed}")
        };

        let rest = url
            .strip_prefix("ws://")
            .or_else(|| url.strip_prefix("wss://"))
            .ok_or_else(|| invalid(input, "unsupported scheme (expected ws:// or wss://)"))?;

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid(input, "missing host"));
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the endpoint uses TLS.
    pub fn is_secure(&self) -> bool {
        self.0.starts_with("wss://")
    }

    /// The `host[:port]` part of the address.
    pub fn authority(&self) -> &str {
        let rest = self
            .0
            .strip_prefix("ws://")
            .or_else(|| self.0.strip_prefix("wss://"))
            .unwrap_or(&self.0);
        rest.split(['/', '?', '#']).next().unwrap_or_default()
    }

    /// `host:port` with the scheme's default port filled in.
    pub fn socket_authority(&self) -> String {
        let authority = self.authority();
        let has_port = match authority.rfind(']') {
            // IPv6 literal: a port follows the closing bracket.
            Some(end) => authority[end..].contains(':'),
            None => authority.contains(':'),
        };
        if has_port {
            authority.to_string()
        } else if self.is_secure() {
            format!("{authority}:443")
        } else {
            format!("{authority}:80")
        }
    }
}

fn invalid(input: &str, reason: &'static str) -> ShutterError {
    ShutterError::InvalidEndpoint {
        endpoint: input.to_string(),
        reason,
    }
}

impl FromStr for Endpoint {
    type Err = ShutterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
