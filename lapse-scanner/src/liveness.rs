//! Domain liveness: is an external domain still registered and answering?
//!
//! The check runs in two stages. DNS first: a name that does not exist, or
//! exists with no address records, is expired without touching HTTP. Any
//! other DNS outcome, including SERVFAIL and timeouts, falls through to a HEAD
//! request against `http://<domain>`. A status of 400 or above, or any
//! transport error, is expired. Everything else is alive.

use crate::error::Result;
use crate::result::Verdict;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const PROBE_USER_AGENT: &str = "Lapse/0.1 (https://github.com/trapdoorsec/lapse)";

/// What a DNS lookup told us about a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOutcome {
    /// The lookup succeeded with this many address records.
    Resolved(usize),
    /// NXDOMAIN, or the name exists but has no records of the queried type.
    NoRecords,
    /// Timeout, SERVFAIL, network trouble: nothing conclusive.
    Unavailable(String),
}

#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup(&self, domain: &str) -> DnsOutcome;
}

#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Status code of a HEAD request to `http://<domain>`.
    async fn head(&self, domain: &str) -> Result<u16>;
}

pub struct LivenessChecker {
    dns: Arc<dyn DnsLookup>,
    probe: Arc<dyn HttpProbe>,
}

impl LivenessChecker {
    pub fn new(dns: Arc<dyn DnsLookup>, probe: Arc<dyn HttpProbe>) -> Self {
        Self { dns, probe }
    }

    /// Checker backed by the system resolver and a reqwest probe.
    pub fn system(probe_timeout: Duration) -> Result<Self> {
        Ok(Self::new(
            Arc::new(SystemResolver::new()),
            Arc::new(ReqwestProbe::new(probe_timeout)?),
        ))
    }

    pub async fn check(&self, domain: &str) -> Verdict {
        match self.dns.lookup(domain).await {
            DnsOutcome::NoRecords => {
                debug!("{} has no DNS records, expired", domain);
                return Verdict::Expired;
            }
            // An empty answer set counts the same as a missing name
            DnsOutcome::Resolved(0) => {
                debug!("{} resolved to an empty answer set, expired", domain);
                return Verdict::Expired;
            }
            DnsOutcome::Resolved(count) => {
                debug!("{} resolved to {} address(es), probing", domain, count);
            }
            DnsOutcome::Unavailable(reason) => {
                debug!("DNS for {} inconclusive ({}), probing", domain, reason);
            }
        }

        match self.probe.head(domain).await {
            Ok(status) if status >= 400 => {
                debug!("{} answered HEAD with {}, expired", domain, status);
                Verdict::Expired
            }
            Ok(status) => {
                debug!("{} answered HEAD with {}, alive", domain, status);
                Verdict::Alive
            }
            Err(e) => {
                debug!("HEAD to {} failed ({}), expired", domain, e);
                Verdict::Expired
            }
        }
    }
}

/// DNS through trust-dns using the host's resolver configuration.
pub struct SystemResolver {
    resolver: Option<TokioAsyncResolver>,
}

impl SystemResolver {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().or_else(|e| {
            debug!("System resolver config unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self::from_resolver(resolver)
    }

    /// Resolver pointed at specific name servers.
    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self::from_resolver(TokioAsyncResolver::tokio(config, opts))
    }

    fn from_resolver(resolver: std::result::Result<TokioAsyncResolver, ResolveError>) -> Self {
        match resolver {
            Ok(resolver) => Self {
                resolver: Some(resolver),
            },
            Err(e) => {
                warn!("Failed to create DNS resolver, every domain will be probed over HTTP: {}", e);
                Self { resolver: None }
            }
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsLookup for SystemResolver {
    async fn lookup(&self, domain: &str) -> DnsOutcome {
        let Some(ref resolver) = self.resolver else {
            return DnsOutcome::Unavailable("no resolver".to_string());
        };

        match resolver.lookup_ip(domain.to_string()).await {
            Ok(lookup) => DnsOutcome::Resolved(lookup.iter().count()),
            Err(e) => classify_error(&e),
        }
    }
}

/// Only NXDOMAIN and an empty NOERROR answer say the name has nothing behind
/// it. SERVFAIL, REFUSED and friends arrive as `NoRecordsFound` too.
fn classify_error(error: &ResolveError) -> DnsOutcome {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match response_code {
            ResponseCode::NXDomain | ResponseCode::NoError => DnsOutcome::NoRecords,
            _ => DnsOutcome::Unavailable(error.to_string()),
        },
        _ => DnsOutcome::Unavailable(error.to_string()),
    }
}

/// HEAD probe over plain HTTP. Redirects are reported, not followed.
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(PROBE_USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn head(&self, domain: &str) -> Result<u16> {
        let response = self.client.head(format!("http://{}", domain)).send().await?;
        Ok(response.status().as_u16())
    }
}
