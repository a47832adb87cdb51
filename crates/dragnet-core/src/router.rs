//! Closed-world mapping from listing domains to extractor functions.
//!
//! Each [`SourceRoute`] names a source, the domain pattern its items live
//! under, the extractor function that processes them, and the stealth-delay
//! profile used between calls. The default table is compiled in: adding a
//! source means adding a row to [`DEFAULT_SOURCES`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{DomainPattern, domain_of};
use crate::error::AppError;
use crate::throttle::DelayProfile;

/// Static definition of a known source.
#[derive(Debug, Clone, Copy)]
pub struct SourceDef {
    pub name: &'static str,
    pub domain: &'static str,
    pub extractor: &'static str,
    pub delay: DelayProfile,
}

/// Sources compiled into the default router.
pub const DEFAULT_SOURCES: &[SourceDef] = &[
    SourceDef {
        name: "bat",
        domain: "bringatrailer.com",
        extractor: "extract-bat-core",
        delay: DelayProfile::from_millis_const(2_000, 5_000),
    },
    SourceDef {
        name: "carsandbids",
        domain: "carsandbids.com",
        extractor: "extract-cars-and-bids-core",
        delay: DelayProfile::from_millis_const(3_000, 6_000),
    },
    SourceDef {
        name: "pcarmarket",
        domain: "pcarmarket.com",
        extractor: "extract-pcarmarket-listing",
        delay: DelayProfile::from_millis_const(1_500, 4_000),
    },
    SourceDef {
        name: "collectingcars",
        domain: "collectingcars.com",
        extractor: "extract-collecting-cars",
        delay: DelayProfile::from_millis_const(2_000, 4_000),
    },
    SourceDef {
        name: "hagerty",
        domain: "hagerty.com",
        extractor: "extract-hagerty-listing",
        delay: DelayProfile::from_millis_const(1_000, 3_000),
    },
    SourceDef {
        name: "mecum",
        domain: "mecum.com",
        extractor: "extract-mecum-lot",
        delay: DelayProfile::from_millis_const(1_000, 2_500),
    },
    SourceDef {
        name: "barrett-jackson",
        domain: "barrett-jackson.com",
        extractor: "extract-barrett-jackson",
        delay: DelayProfile::from_millis_const(1_000, 2_500),
    },
    SourceDef {
        name: "craigslist",
        domain: "craigslist.org",
        extractor: "extract-craigslist-listing",
        delay: DelayProfile::from_millis_const(4_000, 8_000),
    },
];

/// One routable source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRoute {
    pub name: String,
    pub pattern: DomainPattern,
    pub extractor: String,
    pub delay: DelayProfile,
}

impl SourceRoute {
    pub fn new(
        name: impl Into<String>,
        domain: impl AsRef<str>,
        extractor: impl Into<String>,
        delay: DelayProfile,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: DomainPattern::new(domain),
            extractor: extractor.into(),
            delay,
        }
    }
}

impl From<&SourceDef> for SourceRoute {
    fn from(def: &SourceDef) -> Self {
        SourceRoute::new(def.name, def.domain, def.extractor, def.delay)
    }
}

/// Which sources a run should visit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceFilter {
    #[default]
    All,
    Named(String),
}

impl SourceFilter {
    pub fn as_str(&self) -> &str {
        match self {
            SourceFilter::All => "all",
            SourceFilter::Named(name) => name,
        }
    }
}

impl fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Source filter must not be empty".to_string());
        }
        if s.eq_ignore_ascii_case("all") {
            Ok(SourceFilter::All)
        } else {
            Ok(SourceFilter::Named(s.to_lowercase()))
        }
    }
}

/// Resolves URLs to their source route.
#[derive(Debug, Clone)]
pub struct ExtractorRouter {
    routes: Vec<SourceRoute>,
}

impl ExtractorRouter {
    /// Build a router. Route order is the round-robin order of a run.
    pub fn new(routes: Vec<SourceRoute>) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.name.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "Duplicate source name '{}' in router",
                    route.name
                )));
            }
        }
        Ok(Self { routes })
    }

    /// Router over [`DEFAULT_SOURCES`].
    pub fn with_default_sources() -> Self {
        Self {
            routes: DEFAULT_SOURCES.iter().map(SourceRoute::from).collect(),
        }
    }

    pub fn routes(&self) -> &[SourceRoute] {
        &self.routes
    }

    /// Find the route whose pattern matches the URL's domain.
    ///
    /// The longest (most specific) matching pattern wins. `None` means the
    /// URL belongs to no configured source.
    pub fn resolve(&self, url: &str) -> Option<&SourceRoute> {
        let domain = domain_of(url).ok()?;
        self.routes
            .iter()
            .filter(|r| r.pattern.matches(&domain))
            .max_by_key(|r| r.pattern.as_str().len())
    }

    pub fn source(&self, name: &str) -> Option<&SourceRoute> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// Routes a run visits for `filter`, in round-robin order.
    pub fn select(&self, filter: &SourceFilter) -> Result<Vec<&SourceRoute>, AppError> {
        match filter {
            SourceFilter::All => Ok(self.routes.iter().collect()),
            SourceFilter::Named(name) => self.source(name).map(|r| vec![r]).ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Unknown source '{name}'. Known sources: {}",
                    self.routes
                        .iter()
                        .map(|r| r.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }),
        }
    }
}
