//! Article URL validation
//!
//! A pure, synchronous gate in front of every outbound fetch. Checks run in a
//! fixed order and the first failure wins:
//!
//! 1. the input parses as an absolute URL with a host
//! 2. the scheme is exactly `http` or `https`
//! 3. the host equals, or is a subdomain of, an allow-listed domain
//! 4. neither the raw input nor the normalized path/query matches a deny pattern
//!
//! No network access happens here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;
use url::{Host, Url};

/// Longest URL accepted before parsing
pub const MAX_URL_LENGTH: usize = 2048;

/// Medical and academic publishers accepted when no allow-list is configured
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "nejm.org",
    "pubmed.ncbi.nlm.nih.gov",
    "mayoclinic.org",
    "health.harvard.edu",
    "cdc.gov",
    "who.int",
    "nih.gov",
    "medlineplus.gov",
    "clinicaltrials.gov",
    "jamanetwork.com",
    "thelancet.com",
    "bmj.com",
    "sciencedirect.com",
];

static DEFAULT_DENY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // a path segment that is exactly `..`, literal or percent-encoded
        r"(?i)(/|\\|%2f|%5c)(\.|%2e){2}(/|\\|%2f|%5c|\?|#|$)",
        // embedded script markers
        r"(?i)(<|%3c)\s*/?\s*script",
        r"(?i)\b(javascript|vbscript|data)\s*:",
        r"(?i)file://",
        // executable downloads
        r"(?i)\.(exe|dll|bat|cmd|scr|msi)(\?|#|$)",
        // encoded NUL byte
        r"(?i)%00",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// URL validation failures, one variant per check
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid URL format: {0}")]
    Malformed(String),
    #[error("URL must use HTTP or HTTPS, got '{0}'")]
    BadScheme(String),
    #[error("Domain '{host}' is not an allowed medical or academic source")]
    DisallowedDomain { host: String },
    #[error("URL contains a disallowed pattern")]
    MaliciousPattern { pattern: String },
    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),
}

impl ValidationError {
    /// Stable machine-readable code for error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed(_) => "MALFORMED_URL",
            ValidationError::BadScheme(_) => "BAD_SCHEME",
            ValidationError::DisallowedDomain { .. } => "DISALLOWED_DOMAIN",
            ValidationError::MaliciousPattern { .. } => "MALICIOUS_PATTERN",
            ValidationError::UnsupportedPayload(_) => "UNSUPPORTED_PAYLOAD",
        }
    }
}

/// A URL that passed every validation check
///
/// Host is lowercase without a trailing dot, the fragment is removed and
/// default ports are elided. Only [`UrlValidator::validate`] constructs it, so
/// holding one proves validation happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl(Url);

impl NormalizedUrl {
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Allow-list and deny-list URL validator
#[derive(Debug, Clone)]
pub struct UrlValidator {
    allowed_domains: Vec<String>,
    deny_patterns: Vec<Regex>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_DOMAINS)
    }
}

impl UrlValidator {
    /// Create a validator for the given allow-list with the built-in deny patterns
    pub fn new<I, S>(allowed_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|domain| normalize_domain(domain.as_ref()))
            .filter(|domain| !domain.is_empty())
            .collect();

        Self {
            allowed_domains,
            deny_patterns: DEFAULT_DENY_PATTERNS.clone(),
        }
    }

    /// Append extra deny patterns
    pub fn with_deny_patterns<S: AsRef<str>>(
        mut self,
        patterns: &[S],
    ) -> Result<Self, regex::Error> {
        for pattern in patterns {
            self.deny_patterns.push(Regex::new(pattern.as_ref())?);
        }
        Ok(self)
    }

    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Run all checks in order and return the normalized URL
    pub fn validate(&self, raw: &str) -> Result<NormalizedUrl, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Malformed("URL is empty".to_string()));
        }
        if trimmed.len() > MAX_URL_LENGTH {
            return Err(ValidationError::Malformed(format!(
                "URL exceeds {MAX_URL_LENGTH} characters"
            )));
        }

        let mut url =
            Url::parse(trimmed).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::BadScheme(url.scheme().to_string()));
        }

        let host = normalize_host(&url)?;
        if !self.is_allowed_host(&url, &host) {
            return Err(ValidationError::DisallowedDomain { host });
        }
        if url.host_str() != Some(host.as_str()) {
            url.set_host(Some(&host))
                .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        }
        url.set_fragment(None);

        let path_and_query = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        for pattern in &self.deny_patterns {
            if pattern.is_match(trimmed) || pattern.is_match(&path_and_query) {
                return Err(ValidationError::MaliciousPattern {
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        Ok(NormalizedUrl(url))
    }

    /// Exact match for IP hosts, exact-or-subdomain match for domain hosts
    fn is_allowed_host(&self, url: &Url, host: &str) -> bool {
        let is_domain = matches!(url.host(), Some(Host::Domain(_)));
        self.allowed_domains.iter().any(|allowed| {
            host == allowed
                || (is_domain
                    && host.len() > allowed.len()
                    && host.ends_with(allowed.as_str())
                    && host.as_bytes()[host.len() - allowed.len() - 1] == b'.')
        })
    }

    /// True when `url` would pass validation; used by the redirect policy
    pub fn permits(&self, url: &Url) -> bool {
        self.validate(url.as_str()).is_ok()
    }
}

fn normalize_host(url: &Url) -> Result<String, ValidationError> {
    let host = url
        .host_str()
        .ok_or_else(|| ValidationError::Malformed("URL has no host".to_string()))?;
    let host = host.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return Err(ValidationError::Malformed("URL has an empty host".to_string()));
    }
    Ok(host)
}

fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_lowercase()
}
