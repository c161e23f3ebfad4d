//! Resilient HTTP client shared by every scraper and resolver.
//!
//! All outbound traffic funnels through [`Fetcher`], which owns:
//!
//! | Concern | Behavior |
//! |---------|----------|
//! | Concurrency | global semaphore (15 requests) plus a per-host semaphore (5) |
//! | HTTP 404 | [`ScrapeError::NotFound`], a routine signal for the date scanners |
//! | HTTP 429 | incremental backoff (1 s, 2 s, ...), bounded retry budget |
//! | HTTP 503 / transport error | round-robin proxy rotation, full cycle ⇒ `Connect` |
//! | Timeout | 360 s total per request |
//!
//! Responses pass through an ordered [`FetchCommand`] pipeline; an empty
//! command list returns the bare status payload, which is what the
//! probe-style date scanner wants.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, rng};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::error::{ScrapeError, ScrapeResult};

const GLOBAL_CONNECTION_LIMIT: usize = 15;
const PER_HOST_CONNECTION_LIMIT: usize = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(360);
const PROXY_RESOLVE_ATTEMPTS: usize = 3;
const PROXY_RESOLVE_PAUSE: Duration = Duration::from_secs(1);

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:98.0) Gecko/20100101 Firefox/98.0";

/// Post-processing step applied to a fetched response.
///
/// Commands run in the order given: `ReadBytes` consumes the response body,
/// `DecodeText` decodes previously read bytes. Applying a command that does
/// not fit the current pipeline stage is an [`ScrapeError::IncorrectCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCommand {
    ReadBytes,
    DecodeText,
}

impl FetchCommand {
    fn name(self) -> &'static str {
        match self {
            FetchCommand::ReadBytes => "read_bytes",
            FetchCommand::DecodeText => "decode_text",
        }
    }
}

impl FromStr for FetchCommand {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_bytes" => Ok(FetchCommand::ReadBytes),
            "decode_text" => Ok(FetchCommand::DecodeText),
            other => Err(ScrapeError::IncorrectCommand(other.to_string())),
        }
    }
}

/// What a fetch returns after its command pipeline ran.
#[derive(Debug)]
pub enum FetchPayload {
    /// No commands ran; carries the HTTP status code.
    Status(u16),
    /// Body read as raw bytes.
    Bytes(Vec<u8>),
    /// Body decoded as text.
    Text(String),
}

impl FetchPayload {
    pub fn into_text(self) -> ScrapeResult<String> {
        match self {
            FetchPayload::Text(text) => Ok(text),
            other => Err(ScrapeError::Structure(format!(
                "expected text payload, got {other:?}"
            ))),
        }
    }

    pub fn into_bytes(self) -> ScrapeResult<Vec<u8>> {
        match self {
            FetchPayload::Bytes(bytes) => Ok(bytes),
            other => Err(ScrapeError::Structure(format!(
                "expected byte payload, got {other:?}"
            ))),
        }
    }
}

/// Construction knobs for [`Fetcher`], filled in by the CLI layer.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Base URL of the proxy-rental API; `None` means direct connection only.
    pub proxy_api_url: Option<String>,
    /// Overrides the browser-like default User-Agent.
    pub user_agent: Option<String>,
    /// How many 429 responses to absorb before giving up on a request.
    pub max_rate_limit_retries: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy_api_url: None,
            user_agent: None,
            max_rate_limit_retries: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProxyLease {
    user: String,
    pass: String,
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct ProxyCatalog {
    list: HashMap<String, ProxyLease>,
}

struct ProxyClient {
    label: String,
    client: reqwest::Client,
}

/// Shared HTTP entry point. Wrap in an `Arc` and hand to every scraper.
pub struct Fetcher {
    clients: Vec<ProxyClient>,
    global_permits: Semaphore,
    host_permits: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_rate_limit_retries: usize,
}

impl Fetcher {
    /// Build the client set: one direct client plus one per rented proxy.
    ///
    /// Proxy resolution failures are retried a bounded number of times and
    /// then logged and ignored; a run degrades to direct connections rather
    /// than failing before it starts.
    pub async fn connect(config: &FetchConfig) -> ScrapeResult<Self> {
        let headers = default_headers(config.user_agent.as_deref())?;
        let direct = build_client(&headers, None)?;
        let mut clients = vec![ProxyClient {
            label: "direct".to_string(),
            client: direct.clone(),
        }];

        if let Some(api_base) = &config.proxy_api_url {
            match resolve_proxies(&direct, api_base).await {
                Ok(leases) => {
                    for (label, proxy_url) in leases {
                        match build_client(&headers, Some(&proxy_url)) {
                            Ok(client) => clients.push(ProxyClient { label, client }),
                            Err(err) => {
                                warn!(proxy = %label, error = %err, "skipping unusable proxy")
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "proxy catalog unavailable; continuing direct-only")
                }
            }
        }

        info!(proxies = clients.len() - 1, "fetch client ready");
        Ok(Self {
            clients,
            global_permits: Semaphore::new(GLOBAL_CONNECTION_LIMIT),
            host_permits: Mutex::new(HashMap::new()),
            max_rate_limit_retries: config.max_rate_limit_retries,
        })
    }

    /// GET `url` and run `commands` over the response.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str, commands: &[FetchCommand]) -> ScrapeResult<FetchPayload> {
        self.fetch_with_delay(url, commands, Duration::from_secs(1)).await
    }

    /// Like [`Fetcher::fetch`], with a custom starting backoff for 429
    /// responses. The storefront throttles aggressively and gets a longer
    /// first pause.
    pub async fn fetch_with_delay(
        &self,
        url: &str,
        commands: &[FetchCommand],
        initial_backoff: Duration,
    ) -> ScrapeResult<FetchPayload> {
        let parsed = url::Url::parse(url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        let _global = self
            .global_permits
            .acquire()
            .await
            .map_err(|_| ScrapeError::Connect("fetch pool closed".to_string()))?;
        let host_permits = self.host_semaphore(&host).await;
        let _host = host_permits
            .acquire_owned()
            .await
            .map_err(|_| ScrapeError::Connect("fetch pool closed".to_string()))?;

        let mut index = rng().random_range(0..self.clients.len());
        let initial_index = index;
        let mut backoff = initial_backoff;
        let mut rate_limit_attempts = 0usize;

        loop {
            let proxy = &self.clients[index];
            match proxy.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return run_commands(response, commands).await;
                    }
                    match status.as_u16() {
                        404 => return Err(ScrapeError::NotFound),
                        429 => {
                            rate_limit_attempts += 1;
                            if rate_limit_attempts > self.max_rate_limit_retries {
                                return Err(ScrapeError::Unsuccessful(format!(
                                    "rate limited by {host} after {rate_limit_attempts} attempts"
                                )));
                            }
                            debug!(
                                attempt = rate_limit_attempts,
                                backoff_secs = backoff.as_secs(),
                                "rate limited; backing off"
                            );
                            tokio::time::sleep(backoff).await;
                            backoff += Duration::from_secs(1);
                        }
                        503 => {
                            index = self.rotate_proxy(index, initial_index)?;
                            debug!(proxy = %self.clients[index].label, "service unavailable; rotating proxy");
                        }
                        other => {
                            return Err(ScrapeError::Unsuccessful(format!(
                                "status {other} from {host}"
                            )));
                        }
                    }
                }
                Err(err) => {
                    debug!(proxy = %proxy.label, error = %err, "transport error; rotating proxy");
                    index = self.rotate_proxy(index, initial_index)?;
                }
            }
        }
    }

    /// Status-only existence check used by the probe-style date scanner.
    #[instrument(level = "debug", skip_all, fields(%url))]
    pub async fn probe(&self, url: &str) -> ScrapeResult<()> {
        if let FetchPayload::Status(code) = self.fetch(url, &[]).await? {
            debug!(code, "probe succeeded");
        }
        Ok(())
    }

    /// Fetch and decode a page body as text.
    pub async fn fetch_text(&self, url: &str) -> ScrapeResult<String> {
        self.fetch(url, &[FetchCommand::ReadBytes, FetchCommand::DecodeText])
            .await?
            .into_text()
    }

    /// Fetch a body as raw bytes (cover image downloads).
    pub async fn fetch_bytes(&self, url: &str) -> ScrapeResult<Vec<u8>> {
        self.fetch(url, &[FetchCommand::ReadBytes]).await?.into_bytes()
    }

    fn rotate_proxy(&self, index: usize, initial_index: usize) -> ScrapeResult<usize> {
        next_proxy_index(self.clients.len(), index, initial_index)
            .ok_or_else(|| ScrapeError::Connect("no usable proxy left".to_string()))
    }

    async fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.host_permits.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(PER_HOST_CONNECTION_LIMIT)))
            .clone()
    }
}

/// The fetch surface the chart scrapers consume. [`Fetcher`] is the
/// production implementation; tests substitute canned pages.
#[async_trait]
pub trait PageFetch: Send + Sync {
    /// Fetch and decode a page body as text.
    async fn fetch_text(&self, url: &str) -> ScrapeResult<String>;
    /// Fetch a body as raw bytes.
    async fn fetch_bytes(&self, url: &str) -> ScrapeResult<Vec<u8>>;
    /// Status-only existence check.
    async fn probe(&self, url: &str) -> ScrapeResult<()>;
}

#[async_trait]
impl PageFetch for Fetcher {
    async fn fetch_text(&self, url: &str) -> ScrapeResult<String> {
        Fetcher::fetch_text(self, url).await
    }

    async fn fetch_bytes(&self, url: &str) -> ScrapeResult<Vec<u8>> {
        Fetcher::fetch_bytes(self, url).await
    }

    async fn probe(&self, url: &str) -> ScrapeResult<()> {
        Fetcher::probe(self, url).await
    }
}

/// Advance round-robin from `index`, stopping after a full cycle.
fn next_proxy_index(len: usize, index: usize, initial_index: usize) -> Option<usize> {
    let next = (index + 1) % len;
    (next != initial_index).then_some(next)
}

async fn run_commands(
    response: reqwest::Response,
    commands: &[FetchCommand],
) -> ScrapeResult<FetchPayload> {
    let mut payload = FetchPayload::Status(response.status().as_u16());
    let mut response = Some(response);
    for command in commands {
        payload = match (command, payload) {
            (FetchCommand::ReadBytes, FetchPayload::Status(_)) => {
                let pending = response
                    .take()
                    .ok_or_else(|| ScrapeError::IncorrectCommand(command.name().to_string()))?;
                FetchPayload::Bytes(pending.bytes().await?.to_vec())
            }
            (FetchCommand::DecodeText, FetchPayload::Bytes(bytes)) => {
                FetchPayload::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            (command, _) => {
                return Err(ScrapeError::IncorrectCommand(command.name().to_string()));
            }
        };
    }
    Ok(payload)
}

fn default_headers(user_agent: Option<&str>) -> ScrapeResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let agent = user_agent.unwrap_or(DEFAULT_USER_AGENT);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(agent)
            .map_err(|_| ScrapeError::Connect(format!("invalid user agent: {agent}")))?,
    );
    headers.insert(
        "Accept",
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));
    Ok(headers)
}

fn build_client(headers: &HeaderMap, proxy_url: Option<&str>) -> ScrapeResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .default_headers(headers.clone())
        .timeout(REQUEST_TIMEOUT);
    if let Some(proxy_url) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }
    Ok(builder.build()?)
}

/// Pull the rented proxy catalog, retrying on a fixed pause.
async fn resolve_proxies(
    client: &reqwest::Client,
    api_base: &str,
) -> ScrapeResult<Vec<(String, String)>> {
    let url = format!("{}/getproxy", api_base.trim_end_matches('/'));
    let mut last_err = ScrapeError::Connect("proxy catalog unreachable".to_string());
    for attempt in 1..=PROXY_RESOLVE_ATTEMPTS {
        match try_resolve_proxies(client, &url).await {
            Ok(leases) => return Ok(leases),
            Err(err) => {
                warn!(attempt, error = %err, "proxy catalog fetch failed");
                last_err = err;
                if attempt < PROXY_RESOLVE_ATTEMPTS {
                    tokio::time::sleep(PROXY_RESOLVE_PAUSE).await;
                }
            }
        }
    }
    Err(last_err)
}

async fn try_resolve_proxies(
    client: &reqwest::Client,
    url: &str,
) -> ScrapeResult<Vec<(String, String)>> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ScrapeError::Unsuccessful(format!(
            "proxy catalog status {}",
            response.status().as_u16()
        )));
    }
    let body = response.text().await?;
    let catalog: ProxyCatalog = serde_json::from_str(&body)
        .map_err(|err| ScrapeError::Structure(format!("proxy catalog payload: {err}")))?;
    Ok(catalog
        .list
        .into_iter()
        .map(|(name, lease)| {
            let proxy_url = format!(
                "http://{}:{}@{}:{}",
                lease.user, lease.pass, lease.host, lease.port
            );
            (name, proxy_url)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_parse() {
        assert_eq!("read_bytes".parse::<FetchCommand>().unwrap(), FetchCommand::ReadBytes);
        assert_eq!("decode_text".parse::<FetchCommand>().unwrap(), FetchCommand::DecodeText);
    }

    #[test]
    fn test_unknown_command_is_named_in_the_error() {
        let err = "inflate".parse::<FetchCommand>().unwrap_err();
        match err {
            ScrapeError::IncorrectCommand(name) => assert_eq!(name, "inflate"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_proxy_rotation_cycles_once() {
        assert_eq!(next_proxy_index(3, 1, 1), Some(2));
        assert_eq!(next_proxy_index(3, 2, 1), Some(0));
        assert_eq!(next_proxy_index(3, 0, 1), None);
    }

    #[test]
    fn test_single_client_cannot_rotate() {
        assert_eq!(next_proxy_index(1, 0, 0), None);
    }

    #[test]
    fn test_payload_misuse_is_structural() {
        let payload = FetchPayload::Bytes(vec![1, 2, 3]);
        assert!(payload.into_text().is_err());
        let payload = FetchPayload::Status(200);
        assert!(payload.into_bytes().is_err());
    }

    #[test]
    fn test_proxy_catalog_parses_into_urls() {
        let body = r#"{"list":{"tokyo1":{"user":"u","pass":"p","host":"10.0.0.1","port":8080}}}"#;
        let catalog: ProxyCatalog = serde_json::from_str(body).unwrap();
        let lease = &catalog.list["tokyo1"];
        assert_eq!(lease.host, "10.0.0.1");
        assert_eq!(lease.port, 8080);
    }

    #[test]
    fn test_default_config_allows_five_rate_limit_retries() {
        assert_eq!(FetchConfig::default().max_rate_limit_retries, 5);
    }
}
