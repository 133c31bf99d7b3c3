use crate::{config::Settings, message::ProbeResult, pinning};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Issues one request against the target and classifies what came back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

/// Probe backed by a reqwest client whose TLS handshakes apply the pin.
///
/// The client is built once and its connection pool reused across cycles.
/// Redirects are not followed so a 3xx is reported as-is.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(settings: &Settings, pinned: &pinning::PinnedCertificate) -> Result<Self> {
        let tls = pinning::client_config(pinned)?;
        let client = reqwest::ClientBuilder::new()
            .use_preconfigured_tls(tls)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to build reqwest client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        match self.client.get(url).send().await {
            Ok(response) => ProbeResult::Response {
                status: response.status(),
            },
            Err(e) => {
                if e.is_timeout() {
                    tracing::debug!("request to {} timed out", url);
                } else if e.is_connect() {
                    tracing::debug!("failed to connect to {}", url);
                }
                // Alternate form keeps the source chain, e.g. the TLS or IO cause.
                ProbeResult::Error(format!("{:#}", anyhow::Error::new(e)))
            }
        }
    }
}
