// lodge-net/src/http.rs
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use lodge_common::config::Config;
use lodge_common::error::{LodgeError, Result};
use lodge_common::events::ProgressSink;
use lodge_common::model::{FetchStrategy, SourceDescriptor};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Response};
use tokio::fs::{self, File as TokioFile};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};
use url::Url;

use crate::confirm::{self, InitialResponse};
use crate::fetch::Transport;
use crate::validation::{validate_url, PREVIEW_LEN};

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) lodge/0.1";

/// Fetches strategies over HTTP(S) with one cookie-keeping session.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeouts(
            Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
        )
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_timeouts(config.request_timeout, config.connect_timeout)
    }

    pub fn with_timeouts(request_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(request_timeout, connect_timeout)?,
        })
    }

    async fn get(&self, url: &Url) -> Result<Response> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            debug!("HTTP request failed for {url}: {e}");
            LodgeError::Network(url.to_string(), format!("HTTP request failed: {e}"))
        })?;
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);
        if !status.is_success() {
            error!("HTTP error {} for URL {}", status, url);
            return Err(LodgeError::Network(
                url.to_string(),
                format!("HTTP status {status}"),
            ));
        }
        Ok(response)
    }

    /// Two-step strategies: look at the first response and only re-request
    /// with a token when the host put an interstitial in front of the file.
    async fn confirm_and_stream(
        &self,
        strategy: FetchStrategy,
        url: &Url,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64> {
        let first = self.get(url).await?;
        let content_type = confirm::content_type_of(&first);
        let cookies = confirm::cookies_of(&first);
        if !confirm::needs_confirmation(content_type.as_deref(), &cookies) {
            debug!("{} served the file without an interstitial", url);
            return stream_to_file(first, destination, sink).await;
        }

        let token = match strategy {
            FetchStrategy::CookieExchange => confirm::token_from_cookies(&cookies).ok_or_else(|| {
                LodgeError::UnexpectedContent(format!(
                    "{url} returned an interstitial without a download warning cookie"
                ))
            })?,
            _ => {
                let initial = InitialResponse::read(first).await?;
                if initial.is_virus_scan_warning() {
                    debug!("Handling virus scan warning page from {}", url);
                }
                confirm::resolve(&initial).ok_or_else(|| {
                    LodgeError::UnexpectedContent(format!(
                        "No confirmation token in response: {}",
                        initial.preview(PREVIEW_LEN)
                    ))
                })?
            }
        };
        debug!("Found confirmation token: {}", token);
        let confirmed = with_confirm(url, &token);
        let response = self.get(&confirmed).await?;
        stream_to_file(response, destination, sink).await
    }
}

impl Transport for HttpTransport {
    async fn attempt(
        &self,
        strategy: FetchStrategy,
        source: &SourceDescriptor,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64> {
        let url = strategy_url(strategy, source)?;
        if strategy.needs_confirmation() {
            self.confirm_and_stream(strategy, &url, destination, sink).await
        } else {
            let response = self.get(&url).await?;
            stream_to_file(response, destination, sink).await
        }
    }

    fn describe(&self, strategy: FetchStrategy, source: &SourceDescriptor) -> String {
        strategy_url(strategy, source)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| source.id.clone())
    }
}

pub fn build_http_client(request_timeout: Duration, connect_timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .default_headers(headers)
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| LodgeError::Generic(format!("Failed to build HTTP client: {e}")))
}

/// The first URL a strategy requests.
pub fn strategy_url(strategy: FetchStrategy, source: &SourceDescriptor) -> Result<Url> {
    match strategy {
        FetchStrategy::Direct | FetchStrategy::CookieExchange | FetchStrategy::TokenConfirmed => {
            direct_url(source)
        }
        FetchStrategy::AlternateHost => {
            if source.is_url() {
                Ok(with_confirm(&validate_url(&source.id)?, "t"))
            } else {
                let mut url = validate_url(&format!(
                    "{}/download",
                    source.alternate_host.trim_end_matches('/')
                ))?;
                url.query_pairs_mut()
                    .append_pair("id", &source.id)
                    .append_pair("export", "download")
                    .append_pair("confirm", "t");
                Ok(url)
            }
        }
    }
}

fn direct_url(source: &SourceDescriptor) -> Result<Url> {
    if source.is_url() {
        return validate_url(&source.id);
    }
    let mut url = validate_url(&format!(
        "{}/uc",
        source.primary_host.trim_end_matches('/')
    ))?;
    url.query_pairs_mut()
        .append_pair("id", &source.id)
        .append_pair("export", "download");
    Ok(url)
}

fn with_confirm(url: &Url, token: &str) -> Url {
    let mut confirmed = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "confirm")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    confirmed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("confirm", token);
    confirmed
}

/// Streams the body into `destination`, replacing any earlier file, and
/// reports cumulative bytes to `sink`.
pub async fn stream_to_file(
    response: Response,
    destination: &Path,
    sink: &dyn ProgressSink,
) -> Result<u64> {
    let url = response.url().to_string();
    let total = response.content_length();
    if fs::try_exists(destination).await.unwrap_or(false) {
        if let Err(e) = fs::remove_file(destination).await {
            tracing::warn!(
                "Could not remove existing file {}: {}",
                destination.display(),
                e
            );
        }
    }
    debug!(
        "Streaming {} to {} (declared length: {:?})",
        url,
        destination.display(),
        total
    );

    let mut file = TokioFile::create(destination).await.map_err(|e| {
        LodgeError::Io(std::sync::Arc::new(std::io::Error::new(
            e.kind(),
            format!("Failed to create {}: {}", destination.display(), e),
        )))
    })?;
    let mut received: u64 = 0;
    sink.progress(received, total);

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            LodgeError::Network(url.clone(), format!("Download interrupted: {e}"))
        })?;
        file.write_all(&chunk).await.map_err(|e| {
            LodgeError::Io(std::sync::Arc::new(std::io::Error::new(
                e.kind(),
                format!("Failed to write to {}: {}", destination.display(), e),
            )))
        })?;
        received += chunk.len() as u64;
        sink.progress(received, total);
    }
    file.flush().await?;
    drop(file);
    debug!("Finished writing {} bytes to {}", received, destination.display());
    Ok(received)
}
