//! Reverse proxy collaborator
//!
//! The manager never talks to the proxy. Callers register a container's
//! `urlpath` after a successful start and unregister it before or during the
//! stop.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Proxy request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Proxy rejected {method} {urlpath}: status {status}")]
    Rejected {
        method: &'static str,
        urlpath: String,
        status: u16,
    },
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Routes public URL paths to container endpoints
#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Route `urlpath` and everything below it to `target_url`.
    async fn register(&self, urlpath: &str, target_url: &str) -> ProxyResult<()>;

    /// Drop the route for `urlpath`. Unknown routes are not an error.
    async fn unregister(&self, urlpath: &str) -> ProxyResult<()>;
}

#[derive(Serialize)]
struct RouteRequest<'a> {
    target: &'a str,
}

/// Client of the configurable-http-proxy REST API
#[derive(Clone)]
pub struct ConfigurableHttpProxy {
    client: reqwest::Client,
    api_url: String,
    auth_token: String,
}

impl ConfigurableHttpProxy {
    pub fn new(api_url: impl Into<String>, auth_token: impl Into<String>) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
        })
    }

    /// `{api_url}/api/routes{urlpath}` with the path's trailing slash dropped
    pub fn route_url(&self, urlpath: &str) -> String {
        let path = urlpath.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}/api/routes{}", self.api_url, path)
        } else {
            format!("{}/api/routes/{}", self.api_url, path)
        }
    }

    fn authorization(&self) -> String {
        format!("token {}", self.auth_token)
    }
}

#[async_trait]
impl ReverseProxy for ConfigurableHttpProxy {
    async fn register(&self, urlpath: &str, target_url: &str) -> ProxyResult<()> {
        let url = self.route_url(urlpath);
        debug!(url = %url, target = %target_url, "Registering proxy route");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&RouteRequest { target: target_url })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Rejected {
                method: "POST",
                urlpath: urlpath.to_string(),
                status: status.as_u16(),
            });
        }

        info!(urlpath = %urlpath, target = %target_url, "Proxy route registered");
        Ok(())
    }

    async fn unregister(&self, urlpath: &str) -> ProxyResult<()> {
        let url = self.route_url(urlpath);
        debug!(url = %url, "Removing proxy route");

        let response = self
            .client
            .delete(&url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(urlpath = %urlpath, "Proxy route already gone");
            return Ok(());
        }
        if !status.is_success() {
            return Err(ProxyError::Rejected {
                method: "DELETE",
                urlpath: urlpath.to_string(),
                status: status.as_u16(),
            });
        }

        info!(urlpath = %urlpath, "Proxy route removed");
        Ok(())
    }
}
