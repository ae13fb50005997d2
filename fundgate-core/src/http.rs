//! Shared blocking HTTP client for vendor endpoints.
//!
//! Vendors here are mainland endpoints that misbehave behind corporate or
//! system proxies, so proxies from the environment are ignored unless
//! explicitly trusted.

use crate::error::FetchError;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Proxy variables reported by diagnostics.
pub const PROXY_ENV_VARS: [&str; 6] = [
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Honor `HTTP(S)_PROXY` from the environment.
    pub trust_env_proxy: bool,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            trust_env_proxy: false,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

/// Label handed to the charset decoder for GBK bodies. GB18030 is a superset.
const GBK_CHARSET: &str = "gb18030";

/// How a vendor encodes its response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    #[default]
    Utf8,
    /// GBK regardless of what `Content-Type` claims, as some quote feeds do.
    Gbk,
}

/// One vendor GET, built by an adapter and executed by [`HttpClient::get`].
///
/// Every vendor endpoint here rejects or degrades requests without a
/// `Referer`, so one is required to build a request at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorGet {
    pub vendor: &'static str,
    pub url: String,
    pub query: Vec<(&'static str, String)>,
    pub referer: &'static str,
    pub encoding: BodyEncoding,
}

impl VendorGet {
    pub fn new(vendor: &'static str, url: impl Into<String>, referer: &'static str) -> Self {
        Self {
            vendor,
            url: url.into(),
            query: Vec::new(),
            referer,
            encoding: BodyEncoding::Utf8,
        }
    }

    pub fn param(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    pub fn gbk(mut self) -> Self {
        self.encoding = BodyEncoding::Gbk;
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .user_agent(config.user_agent.clone());
        if !config.trust_env_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Configuration(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Perform `get` and return the decoded body.
    pub fn get(&self, get: &VendorGet) -> Result<String, FetchError> {
        let req = self
            .client
            .get(&get.url)
            .query(&get.query)
            .header(REFERER, get.referer);
        self.send(get.vendor, req, get.encoding)
    }

    /// POST a JSON body and return the response body as text.
    pub fn post_json(
        &self,
        vendor: &str,
        url: &str,
        referer: &str,
        body: &Value,
    ) -> Result<String, FetchError> {
        let req = self.client.post(url).header(REFERER, referer).json(body);
        self.send(vendor, req, BodyEncoding::Utf8)
    }

    fn send(
        &self,
        vendor: &str,
        req: RequestBuilder,
        encoding: BodyEncoding,
    ) -> Result<String, FetchError> {
        let resp = req
            .header(ACCEPT, "*/*")
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9")
            .send()?;
        let status = resp.status();
        debug!(vendor, url = %resp.url(), status = status.as_u16(), "vendor response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(FetchError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                vendor: vendor.to_string(),
                status: status.as_u16(),
            });
        }
        match encoding {
            BodyEncoding::Utf8 => Ok(resp.text()?),
            BodyEncoding::Gbk => Ok(resp.text_with_charset(GBK_CHARSET)?),
        }
    }
}

/// Which proxy variables are set in this process's environment.
pub fn proxy_env_present() -> Vec<(&'static str, bool)> {
    PROXY_ENV_VARS
        .iter()
        .map(|k| (*k, std::env::var_os(k).is_some()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_bypasses_proxies() {
        let cfg = HttpConfig::default();
        assert!(!cfg.trust_env_proxy);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.read_timeout, Duration::from_secs(20));
    }

    #[test]
    fn client_builds_with_and_without_proxies() {
        assert!(HttpClient::new(HttpConfig::default()).is_ok());
        let trusting = HttpConfig {
            trust_env_proxy: true,
            ..HttpConfig::default()
        };
        assert!(HttpClient::new(trusting).unwrap().config().trust_env_proxy);
    }

    #[test]
    fn vendor_get_builder() {
        let get = VendorGet::new("v", "https://example.invalid/q", "https://example.invalid/")
            .param("code", "510300")
            .param("n", 10)
            .gbk();
        assert_eq!(get.referer, "https://example.invalid/");
        assert_eq!(get.encoding, BodyEncoding::Gbk);
        assert_eq!(get.query_value("n"), Some("10"));
        assert_eq!(get.query_value("missing"), None);
        let plain = VendorGet::new("v", "https://example.invalid/", "https://example.invalid/");
        assert_eq!(plain.encoding, BodyEncoding::Utf8);
    }

    #[test]
    fn proxy_report_lists_every_variable() {
        assert_eq!(proxy_env_present().len(), PROXY_ENV_VARS.len());
    }
}
