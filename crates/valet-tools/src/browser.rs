//! Allowlisted web fetch and form submission.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use valet_core::truncate_chars;

const PAGE_TEXT_LIMIT: usize = 4_000;

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Hosts the browser tools may touch. A request matches on the exact
    /// host or any subdomain of an entry.
    pub allowed_domains: Vec<String>,
    pub request_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

pub struct BrowserClient {
    http: reqwest::Client,
    config: BrowserConfig,
}

impl BrowserClient {
    pub fn new(config: BrowserConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build browser http client")?;
        Ok(Self { http, config })
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.config.allowed_domains.iter().any(|domain| {
            let domain = domain.to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }

    fn check_url(&self, url: &str) -> Result<reqwest::Url> {
        let parsed = reqwest::Url::parse(url).map_err(|_| anyhow!("url {url:?} is not valid"))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("url {url:?} has no host"))?;
        if !self.host_allowed(host) {
            bail!("domain {host} is not on the allowlist");
        }
        Ok(parsed)
    }

    pub async fn fetch_page(&self, url: &str) -> Result<Value> {
        let parsed = self.check_url(url)?;
        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .context("page fetch failed")?;
        let status = response.status().as_u16();
        let body = response.text().await.context("page body was unreadable")?;
        Ok(json!({
            "url": url,
            "status": status,
            "text": truncate_chars(&body, PAGE_TEXT_LIMIT),
        }))
    }

    pub async fn submit_form(&self, url: &str, fields: &HashMap<String, String>) -> Result<Value> {
        let parsed = self.check_url(url)?;
        let response = self
            .http
            .post(parsed)
            .form(fields)
            .send()
            .await
            .context("form submission failed")?;
        let status = response.status().as_u16();
        if status >= 400 {
            bail!("form endpoint returned HTTP {status}");
        }
        let body = response.text().await.unwrap_or_default();
        Ok(json!({
            "url": url,
            "status": status,
            "response": truncate_chars(&body, PAGE_TEXT_LIMIT),
        }))
    }
}
