// lodge-net/src/confirm.rs
//! Resolves the confirmation token large-file hosts demand before they serve
//! the real bytes.

use std::sync::LazyLock;

use lodge_common::error::{LodgeError, Result};
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use tracing::debug;

/// Cookie name prefix hosts use to flag a pending download warning.
pub const DOWNLOAD_WARNING_COOKIE_PREFIX: &str = "download_warning";
/// Body chunks inspected for a `confirm=` token before giving up.
pub const CONFIRM_CHUNK_BUDGET: usize = 8;

const VIRUS_SCAN_MARKER: &str = "Virus scan warning";

static CONFIRM_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"confirm=([0-9A-Za-z_-]+)").expect("valid token pattern"));

/// The parts of a first response that matter for token resolution: declared
/// content type, cookies the server set, and at most `CONFIRM_CHUNK_BUDGET`
/// body chunks.
#[derive(Debug, Clone, Default)]
pub struct InitialResponse {
    pub content_type: Option<String>,
    pub cookies: Vec<(String, String)>,
    pub body_chunks: Vec<Vec<u8>>,
}

impl InitialResponse {
    /// Captures headers and cookies, then reads body chunks up to the budget.
    /// Consumes the response; whatever is left unread is dropped.
    pub async fn read(mut response: Response) -> Result<Self> {
        let content_type = content_type_of(&response);
        let cookies = cookies_of(&response);
        let mut body_chunks = Vec::new();
        while body_chunks.len() < CONFIRM_CHUNK_BUDGET {
            match response.chunk().await {
                Ok(Some(chunk)) => body_chunks.push(chunk.to_vec()),
                Ok(None) => break,
                Err(e) => {
                    return Err(LodgeError::Network(
                        response.url().to_string(),
                        format!("Failed to read confirmation page: {e}"),
                    ))
                }
            }
        }
        Ok(Self {
            content_type,
            cookies,
            body_chunks,
        })
    }

    pub fn needs_confirmation(&self) -> bool {
        needs_confirmation(self.content_type.as_deref(), &self.cookies)
    }

    pub fn is_virus_scan_warning(&self) -> bool {
        self.body_chunks
            .iter()
            .take(CONFIRM_CHUNK_BUDGET)
            .any(|chunk| String::from_utf8_lossy(chunk).contains(VIRUS_SCAN_MARKER))
    }

    /// First bytes of the page for diagnostics.
    pub fn preview(&self, max: usize) -> String {
        let bytes: Vec<u8> = self.body_chunks.iter().flatten().take(max).copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

pub fn content_type_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub fn cookies_of(response: &Response) -> Vec<(String, String)> {
    response
        .cookies()
        .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
        .collect()
}

/// True when the response is a markup page rather than the artifact, or the
/// host flagged a pending download warning through a cookie.
pub fn needs_confirmation(content_type: Option<&str>, cookies: &[(String, String)]) -> bool {
    let is_html = content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/html"));
    is_html
        || cookies
            .iter()
            .any(|(name, _)| name.starts_with(DOWNLOAD_WARNING_COOKIE_PREFIX))
}

/// Cookie policy: the value of the first `download_warning*` cookie.
pub fn token_from_cookies(cookies: &[(String, String)]) -> Option<String> {
    cookies
        .iter()
        .find(|(name, value)| name.starts_with(DOWNLOAD_WARNING_COOKIE_PREFIX) && !value.is_empty())
        .map(|(_, value)| value.clone())
}

/// Body policy: scans chunks for `confirm=<token>`. Chunks are accumulated so
/// a token split across a chunk boundary is still found; a match touching the
/// end of the buffer waits for the next chunk in case the token continues.
pub fn token_from_chunks<C: AsRef<[u8]>>(chunks: &[C]) -> Option<String> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut pending: Option<String> = None;

    for chunk in chunks.iter().take(CONFIRM_CHUNK_BUDGET) {
        buffer.extend_from_slice(chunk.as_ref());
        let text = String::from_utf8_lossy(&buffer);
        if let Some(caps) = CONFIRM_TOKEN_RE.captures(&text) {
            let token = caps.get(1)?;
            if token.end() < text.len() {
                return Some(token.as_str().to_string());
            }
            pending = Some(token.as_str().to_string());
        }
    }
    pending
}

/// Cookies first, then page text; first match wins.
pub fn resolve(initial: &InitialResponse) -> Option<String> {
    if let Some(token) = token_from_cookies(&initial.cookies) {
        debug!("Confirmation token taken from download warning cookie");
        return Some(token);
    }
    let token = token_from_chunks(&initial.body_chunks);
    if token.is_some() {
        debug!("Confirmation token found in interstitial page");
    } else {
        debug!(
            "No confirmation token within {} chunk(s) of the interstitial page",
            initial.body_chunks.len().min(CONFIRM_CHUNK_BUDGET)
        );
    }
    token
}
