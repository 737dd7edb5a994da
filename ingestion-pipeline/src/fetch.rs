use std::{net::IpAddr, time::Duration};

use bytes::BytesMut;
use futures::StreamExt;
use thiserror::Error;
use tracing::{info, warn};

/// Hard ceiling on response bodies.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Fetch failure taxonomy. None of these are fatal to the caller; the
/// orchestrator decides whether the insight survives with user fields only.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),
    #[error("Fetch timed out")]
    Timeout,
    #[error("Response exceeded {MAX_BODY_BYTES} bytes")]
    TooLarge,
    #[error("Bad response status: {0}")]
    BadStatus(u16),
    #[error("Response is not HTML or text: {0}")]
    NotHtml(String),
    #[error("URL not allowed: {0}")]
    Disallowed(String),
}

/// Successful fetch output.
#[derive(Debug)]
pub struct FetchedPage {
    pub html: String,
    pub final_url: String,
    pub content_type: String,
}

pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        // No cookie store is configured, so nothing persists across fetches
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Retrieves the page at `url` with bounded time and size.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = url::Url::parse(url)
            .map_err(|_| FetchError::Disallowed("Invalid URL".to_string()))?;
        ensure_fetch_url_allowed(&parsed)?;

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        ensure_text_content_type(&content_type)?;

        if let Some(length) = response.content_length() {
            if length > MAX_BODY_BYTES as u64 {
                return Err(FetchError::TooLarge);
            }
        }

        let final_url = response.url().to_string();

        // Stream the body so an unbounded response can be cut off at the cap
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Unreachable(e.to_string())
                }
            })?;
            if body.len().saturating_add(chunk.len()) > MAX_BODY_BYTES {
                warn!(url, "aborting fetch, body exceeded size ceiling");
                return Err(FetchError::TooLarge);
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body).into_owned();
        info!(url, final_url = %final_url, bytes = body.len(), "page fetched");

        Ok(FetchedPage {
            html,
            final_url,
            content_type,
        })
    }
}

fn ensure_text_content_type(content_type: &str) -> Result<(), FetchError> {
    let essence = content_type
        .parse::<mime::Mime>()
        .map(|m| format!("{}/{}", m.type_(), m.subtype()))
        .unwrap_or_else(|_| content_type.to_string());

    match essence.as_str() {
        "text/html" | "application/xhtml+xml" | "text/plain" => Ok(()),
        other => Err(FetchError::NotHtml(other.to_string())),
    }
}

/// Rejects schemes and hosts that must never be fetched server-side.
pub fn ensure_fetch_url_allowed(url: &url::Url) -> Result<(), FetchError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "Rejected fetch URL due to unsupported scheme");
            return Err(FetchError::Disallowed(
                "Unsupported URL scheme".to_string(),
            ));
        }
    }

    let Some(host) = url.host_str() else {
        warn!(%url, "Rejected fetch URL missing host");
        return Err(FetchError::Disallowed(
            "URL is missing a host component".to_string(),
        ));
    };

    if host.eq_ignore_ascii_case("localhost") {
        warn!(%url, host, "Rejected fetch URL to localhost");
        return Err(FetchError::Disallowed("URL host is not allowed".to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let is_disallowed = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };

        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_disallowed {
            warn!(%url, host, %ip, "Rejected fetch URL pointing to restricted network range");
            return Err(FetchError::Disallowed("URL host is not allowed".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_scheme() {
        let url = url::Url::parse("ftp://example.com").expect("url");
        assert!(ensure_fetch_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_localhost() {
        let url = url::Url::parse("http://localhost/resource").expect("url");
        assert!(ensure_fetch_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_private_ipv4() {
        let url = url::Url::parse("http://192.168.1.10/index.html").expect("url");
        assert!(ensure_fetch_url_allowed(&url).is_err());
    }

    #[test]
    fn rejects_loopback_ipv4() {
        let url = url::Url::parse("http://127.0.0.1:8080/").expect("url");
        assert!(ensure_fetch_url_allowed(&url).is_err());
    }

    #[test]
    fn allows_public_domain() {
        let url = url::Url::parse("https://sub.example.com/path").expect("url");
        assert!(ensure_fetch_url_allowed(&url).is_ok());
    }

    #[test]
    fn accepts_html_and_text_content_types() {
        assert!(ensure_text_content_type("text/html; charset=utf-8").is_ok());
        assert!(ensure_text_content_type("application/xhtml+xml").is_ok());
        assert!(ensure_text_content_type("text/plain").is_ok());
    }

    #[test]
    fn rejects_binary_content_types() {
        assert!(matches!(
            ensure_text_content_type("application/pdf"),
            Err(FetchError::NotHtml(_))
        ));
        assert!(matches!(
            ensure_text_content_type("image/png"),
            Err(FetchError::NotHtml(_))
        ));
    }

    #[tokio::test]
    async fn fetch_invalid_url_is_disallowed() {
        let fetcher = PageFetcher::new().expect("fetcher");
        let result = fetcher.fetch("not a url").await;
        assert!(matches!(result, Err(FetchError::Disallowed(_))));
    }
}
