//! Host normalisation and domain-pattern matching.
//!
//! Every work item stores the normalised host of its URL in `domain`; sources
//! select their items with a [`DomainPattern`]. The same matching rule is used
//! by the in-memory store, the router, and the SQL claim query
//! (`domain = $pattern OR right(domain, length($pattern) + 1) = '.' || $pattern`).

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Derive the routing domain from an absolute URL.
///
/// Lower-cases the host and strips a leading `www.`.
/// Example: `"https://www.BringATrailer.com/listing/x"` → `"bringatrailer.com"`
pub fn domain_of(url: &str) -> Result<String, AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidUrl(format!("{url}: missing host")))?;
    Ok(normalize_host(host))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

/// A host-suffix rule: matches the host itself and any of its subdomains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainPattern(String);

impl DomainPattern {
    pub fn new(pattern: impl AsRef<str>) -> Self {
        Self(normalize_host(pattern.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `domain` (already normalised) is this host or a subdomain of it.
    pub fn matches(&self, domain: &str) -> bool {
        if domain == self.0 {
            return true;
        }
        domain
            .strip_suffix(self.0.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
