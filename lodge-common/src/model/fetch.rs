// lodge-common/src/model/fetch.rs
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LodgeError, Result};

pub const DEFAULT_PRIMARY_HOST: &str = "https://drive.google.com";
pub const DEFAULT_ALTERNATE_HOST: &str = "https://drive.usercontent.google.com";

/// One concrete way of obtaining the artifact from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Plain download URL, streamed as-is.
    Direct,
    /// The same file served from the host's alternate download domain.
    AlternateHost,
    /// Request once, pick the warning token out of the session cookies, request again.
    CookieExchange,
    /// Request once, resolve a `confirm=` token from cookies or page text, request again.
    TokenConfirmed,
}

impl FetchStrategy {
    pub const ALL: [FetchStrategy; 4] = [
        FetchStrategy::Direct,
        FetchStrategy::AlternateHost,
        FetchStrategy::CookieExchange,
        FetchStrategy::TokenConfirmed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FetchStrategy::Direct => "direct",
            FetchStrategy::AlternateHost => "alternate-host",
            FetchStrategy::CookieExchange => "cookie-exchange",
            FetchStrategy::TokenConfirmed => "token-confirmed",
        }
    }

    /// Whether the strategy needs an initial request plus a confirmation token.
    pub fn needs_confirmation(&self) -> bool {
        matches!(
            self,
            FetchStrategy::CookieExchange | FetchStrategy::TokenConfirmed
        )
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FetchStrategy {
    type Err = LodgeError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        FetchStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == normalized)
            .ok_or_else(|| LodgeError::Config(format!("Unknown fetch strategy '{s}'")))
    }
}

/// Where the artifact lives. `id` is either a bare file id understood by the
/// host or a full `http(s)` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    #[serde(default = "default_primary_host")]
    pub primary_host: String,
    #[serde(default = "default_alternate_host")]
    pub alternate_host: String,
}

fn default_primary_host() -> String {
    DEFAULT_PRIMARY_HOST.to_string()
}

fn default_alternate_host() -> String {
    DEFAULT_ALTERNATE_HOST.to_string()
}

impl Default for SourceDescriptor {
    fn default() -> Self {
        Self::new("")
    }
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            primary_host: default_primary_host(),
            alternate_host: default_alternate_host(),
        }
    }

    pub fn with_hosts(mut self, primary: impl Into<String>, alternate: impl Into<String>) -> Self {
        self.primary_host = primary.into();
        self.alternate_host = alternate.into();
        self
    }

    pub fn is_url(&self) -> bool {
        self.id.starts_with("http://") || self.id.starts_with("https://")
    }
}

/// Everything one fetch run needs. Immutable once built.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    source: SourceDescriptor,
    strategies: Vec<FetchStrategy>,
    max_retries: u32,
    strategy_retries: HashMap<FetchStrategy, u32>,
    backoff: Duration,
    destination: PathBuf,
}

impl FetchRequest {
    pub fn new(
        source: SourceDescriptor,
        strategies: Vec<FetchStrategy>,
        max_retries: u32,
        backoff: Duration,
        destination: impl Into<PathBuf>,
    ) -> Result<Self> {
        if strategies.is_empty() {
            return Err(LodgeError::Config(
                "At least one fetch strategy must be configured".to_string(),
            ));
        }
        if source.id.trim().is_empty() {
            return Err(LodgeError::Config("Source id is empty".to_string()));
        }
        Ok(Self {
            source,
            strategies,
            max_retries: max_retries.max(1),
            strategy_retries: HashMap::new(),
            backoff,
            destination: destination.into(),
        })
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn strategies(&self) -> &[FetchStrategy] {
        &self.strategies
    }

    /// Gives one strategy its own attempt budget instead of `max_retries`.
    pub fn with_attempts_for(mut self, strategy: FetchStrategy, attempts: u32) -> Self {
        self.strategy_retries.insert(strategy, attempts.max(1));
        self
    }

    /// Default attempts per strategy, never less than one.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn attempts_for(&self, strategy: FetchStrategy) -> u32 {
        self.strategy_retries
            .get(&strategy)
            .copied()
            .unwrap_or(self.max_retries)
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success {
        path: PathBuf,
        bytes: u64,
        attempts: u32,
    },
    Failure {
        reason: String,
        attempts: u32,
    },
}

impl FetchResult {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchResult::Success { attempts, .. } | FetchResult::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_parse_back() {
        for strategy in FetchStrategy::ALL {
            assert_eq!(strategy.name().parse::<FetchStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "Token_Confirmed".parse::<FetchStrategy>().unwrap(),
            FetchStrategy::TokenConfirmed
        );
        assert!("carrier-pigeon".parse::<FetchStrategy>().is_err());
    }

    #[test]
    fn request_requires_strategies_and_clamps_retries() {
        let source = SourceDescriptor::new("abc");
        assert!(FetchRequest::new(source.clone(), vec![], 3, Duration::ZERO, "a.zip").is_err());

        let request = FetchRequest::new(
            source,
            vec![FetchStrategy::Direct],
            0,
            Duration::from_secs(1),
            "a.zip",
        )
        .unwrap();
        assert_eq!(request.max_retries(), 1);
        assert_eq!(request.destination(), Path::new("a.zip"));
    }

    #[test]
    fn per_strategy_budget_overrides_default() {
        let request = FetchRequest::new(
            SourceDescriptor::new("abc"),
            vec![FetchStrategy::Direct, FetchStrategy::AlternateHost],
            3,
            Duration::ZERO,
            "a.zip",
        )
        .unwrap()
        .with_attempts_for(FetchStrategy::Direct, 1);
        assert_eq!(request.attempts_for(FetchStrategy::Direct), 1);
        assert_eq!(request.attempts_for(FetchStrategy::AlternateHost), 3);
    }

    #[test]
    fn source_id_may_be_a_url() {
        assert!(SourceDescriptor::new("https://example.com/app.zip").is_url());
        assert!(!SourceDescriptor::new("1nmgbgX8unUmGaDzphUSWCw").is_url());
    }
}
