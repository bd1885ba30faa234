//! HTTP(S) web probe: fetch title/server/status/content-type/size from a port that
//! looks like it's speaking HTTP. Screenshot capture is out of scope; the field
//! exists on `WebService` as a hook and is always left `None`.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;

use crate::domain::{WebProtocol, WebService};
use crate::error::ProbeError;

pub struct ReqwestWebProbe {
    client: Client,
}

impl ReqwestWebProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("reqwest client builds with static config");
        ReqwestWebProbe { client }
    }

    pub async fn probe(
        &self,
        ipv4: &str,
        port: u16,
        https: bool,
    ) -> Result<Option<WebService>, ProbeError> {
        let scheme = if https { "https" } else { "http" };
        let url = format!("{scheme}://{ipv4}:{port}/");

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(_) => return Ok(None),
        };

        let status_code = response.status().as_u16();
        let server = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.unwrap_or_default();
        let size = Some(body.len() as u64);
        let title = extract_title(&body);

        Ok(Some(WebService {
            url,
            title,
            server,
            status_code,
            content_type,
            size,
            screenshot: None,
            port,
            protocol: if https { WebProtocol::Https } else { WebProtocol::Http },
            scanned_at: Utc::now(),
        }))
    }
}

fn extract_title(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let start = lower.find("<title>")? + "<title>".len();
    let end = lower[start..].find("</title>")? + start;
    let title = body[start..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

impl crate::probes::WebProbe for ReqwestWebProbe {
    async fn probe(
        &self,
        ipv4: &str,
        port: u16,
        https: bool,
    ) -> Result<Option<WebService>, ProbeError> {
        ReqwestWebProbe::probe(self, ipv4, port, https).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title_found() {
        let body = "<html><head><TITLE>Router Login</TITLE></head></html>";
        assert_eq!(extract_title(body).as_deref(), Some("Router Login"));
    }

    #[test]
    fn test_extract_title_missing() {
        assert_eq!(extract_title("<html><body>hi</body></html>"), None);
    }

    #[test]
    fn test_extract_title_empty() {
        assert_eq!(extract_title("<title></title>"), None);
    }

    #[tokio::test]
    async fn test_probe_unreachable_returns_none() {
        let probe = ReqwestWebProbe::new(Duration::from_millis(200));
        // Port 1 on localhost is not expected to be listening.
        let result = probe.probe("127.0.0.1", 1, false).await.unwrap();
        assert!(result.is_none());
    }
}
