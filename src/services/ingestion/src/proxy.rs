//! Apple webhook proxy
//!
//! When an Apple connection stores the customer's original notification
//! URL, inbound Apple webhooks are forwarded there fire-and-forget. The
//! forward never blocks or fails our own processing; its outcome is logged
//! onto the webhook-log row. The destination is SSRF-guarded: loopback,
//! private and link-local hosts are rejected, and production requires
//! HTTPS.

use crate::error::{IngestionError, IngestionResult};
use revback_database::Repositories;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Validate a forwarding destination. `require_https` is set in production.
pub fn validate_forward_url(raw: &str, require_https: bool) -> IngestionResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| IngestionError::internal(format!("invalid forward URL: {e}")))?;

    match url.scheme() {
        "https" => {}
        "http" if !require_https => {}
        scheme => {
            return Err(IngestionError::internal(format!(
                "forward URL scheme {scheme} not allowed"
            )))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| IngestionError::internal("forward URL has no host"))?;

    if host == "localhost" {
        return Err(IngestionError::internal("loopback destination rejected"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        let blocked = match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
            }
            IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
        if blocked {
            return Err(IngestionError::internal(format!(
                "destination address {ip} rejected"
            )));
        }
    }
    Ok(url)
}

/// Forwards Apple webhooks to the customer's original endpoint
#[derive(Clone)]
pub struct AppleWebhookProxy {
    repos: Repositories,
    http: reqwest::Client,
    require_https: bool,
}

impl AppleWebhookProxy {
    pub fn new(repos: Repositories, http: reqwest::Client, require_https: bool) -> Self {
        Self {
            repos,
            http,
            require_https,
        }
    }

    /// Fire-and-forget forward. Spawns a task; the caller's 200 to Apple is
    /// never held up by the customer endpoint.
    pub fn forward(&self, org_id: Uuid, webhook_log_id: Uuid, destination: String, body: String) {
        let proxy = self.clone();
        tokio::spawn(async move {
            proxy
                .forward_inner(org_id, webhook_log_id, &destination, body)
                .await;
        });
    }

    async fn forward_inner(
        &self,
        org_id: Uuid,
        webhook_log_id: Uuid,
        destination: &str,
        body: String,
    ) {
        let url = match validate_forward_url(destination, self.require_https) {
            Ok(url) => url,
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "apple proxy destination rejected");
                return;
            }
        };

        let result = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .timeout(FORWARD_TIMEOUT)
            .send()
            .await;

        let status = match &result {
            Ok(response) => response.status().as_u16() as i32,
            Err(_) => 0,
        };
        match result {
            Ok(_) => debug!(org_id = %org_id, status, "apple webhook forwarded"),
            Err(e) => warn!(org_id = %org_id, error = %e, "apple webhook forward failed"),
        }

        if let Err(e) = self
            .repos
            .webhook_logs
            .set_http_status(org_id, webhook_log_id, status)
            .await
        {
            warn!(org_id = %org_id, error = %e, "could not record forward outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_https_urls_pass() {
        assert!(validate_forward_url("https://hooks.example.com/apple", true).is_ok());
        assert!(validate_forward_url("https://203.0.113.10/apple", true).is_ok());
    }

    #[test]
    fn loopback_private_and_link_local_are_rejected() {
        for destination in [
            "https://127.0.0.1/hook",
            "https://localhost/hook",
            "https://10.0.0.5/hook",
            "https://192.168.1.1/hook",
            "https://169.254.169.254/latest/meta-data",
            "https://[::1]/hook",
        ] {
            assert!(
                validate_forward_url(destination, true).is_err(),
                "{destination} must be rejected"
            );
        }
    }

    #[test]
    fn http_is_allowed_only_outside_production() {
        assert!(validate_forward_url("http://hooks.example.com/apple", true).is_err());
        assert!(validate_forward_url("http://hooks.example.com/apple", false).is_ok());
    }
}
