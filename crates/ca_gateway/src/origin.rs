//! Trusted-origin policy.
//!
//! Authenticated requests may only target the production relay origins or
//! explicit loopback entries (local development gateway). HTTPS is required
//! for everything that is not loopback. The check runs BEFORE the bearer
//! token is attached anywhere.

use url::Url;

use crate::error::GatewayError;

/// Production relay origins.
pub const TRUSTED_ORIGINS: [&str; 3] = [
    "https://commands.com",
    "https://api.commands.com",
    "https://gateway.commands.com",
];

/// Loopback hosts accepted with either scheme and any port.
const LOOPBACK_HOSTS: [&str; 3] = ["127.0.0.1", "localhost", "[::1]"];

fn is_loopback_host(host: &str) -> bool {
    LOOPBACK_HOSTS.contains(&host)
}

/// Reject any URL whose origin is not trusted. Returns the parsed URL so
/// the caller never re-parses (and never sends to) an unchecked string.
pub fn ensure_trusted(raw: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(raw).map_err(|e| GatewayError::UnsafeScheme(format!("{raw}: {e}")))?;

    match url.scheme() {
        "https" | "http" => {}
        other => return Err(GatewayError::UnsafeScheme(other.to_string())),
    }

    let host = url.host_str().unwrap_or_default();
    if is_loopback_host(host) {
        return Ok(url);
    }

    if url.scheme() != "https" {
        return Err(GatewayError::UnsafeScheme(format!(
            "http is only allowed for loopback, not {host}"
        )));
    }

    let origin = match url.port() {
        Some(port) => format!("https://{host}:{port}"),
        None => format!("https://{host}"),
    };
    if TRUSTED_ORIGINS.contains(&origin.as_str()) {
        Ok(url)
    } else {
        Err(GatewayError::UntrustedOrigin(origin))
    }
}
