//! JSON-over-HTTP client for deep links, SMS and wallet subscriptions.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Address, AppError, DeepLinkProvider, ExternalServiceError, Network, SmsProvider,
    WalletSubscriber,
};

/// Endpoints of the notification collaborators. Unset endpoints disable the
/// corresponding side effect.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub deep_link_url: Option<String>,
    pub sms_url: Option<String>,
    /// Home-chain subscription service
    pub subscription_url: Option<String>,
    /// Foreign-chain transfer watcher
    pub foreign_watcher_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            deep_link_url: None,
            sms_url: None,
            subscription_url: None,
            foreign_watcher_url: None,
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Notification client shared by every job handler
pub struct HttpNotifier {
    http_client: Client,
    config: NotifierConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeepLinkRequest<'a> {
    community_address: String,
    app_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeepLinkResponse {
    url: String,
}

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest {
    wallet_address: String,
    network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_block: Option<u64>,
}

impl HttpNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ExternalService(ExternalServiceError::HttpError(e.to_string())))?;
        Ok(Self {
            http_client,
            config,
        })
    }

    async fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<reqwest::Response, AppError> {
        let mut request = self.http_client.post(url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
            } else {
                AppError::ExternalService(ExternalServiceError::HttpError(e.to_string()))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::ExternalService(ExternalServiceError::RateLimited(
                url.to_string(),
            )));
        }
        if status.is_server_error() {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("{url} returned {status}"),
            )));
        }
        if !status.is_success() {
            return Err(AppError::ExternalService(ExternalServiceError::HttpError(
                format!("{url} returned {status}"),
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl DeepLinkProvider for HttpNotifier {
    #[instrument(skip(self))]
    async fn create_deep_link(
        &self,
        community: &Address,
        app_name: &str,
    ) -> Result<String, AppError> {
        let url = self.config.deep_link_url.as_deref().ok_or_else(|| {
            AppError::ExternalService(ExternalServiceError::Unavailable(
                "deep link provider is not configured".to_string(),
            ))
        })?;
        let response = self
            .post(
                url,
                &DeepLinkRequest {
                    community_address: community.to_string(),
                    app_name,
                },
            )
            .await?;
        let link: DeepLinkResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::HttpError(e.to_string()))
        })?;
        info!(link = %link.url, "Created deep link");
        Ok(link.url)
    }
}

#[async_trait]
impl SmsProvider for HttpNotifier {
    #[instrument(skip(self, body))]
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AppError> {
        let Some(url) = self.config.sms_url.as_deref() else {
            warn!("SMS provider is not configured, message dropped");
            return Ok(());
        };
        self.post(url, &SmsRequest { to, body }).await?;
        debug!("SMS sent");
        Ok(())
    }
}

#[async_trait]
impl WalletSubscriber for HttpNotifier {
    #[instrument(skip(self))]
    async fn subscribe_wallet(
        &self,
        wallet: &Address,
        network: Network,
        from_block: Option<u64>,
    ) -> Result<(), AppError> {
        let endpoint = match network {
            Network::Home => self.config.subscription_url.as_deref(),
            Network::Foreign => self.config.foreign_watcher_url.as_deref(),
        };
        let Some(url) = endpoint else {
            warn!(network = %network.as_str(), "No subscription endpoint configured");
            return Ok(());
        };
        self.post(
            url,
            &SubscribeRequest {
                wallet_address: wallet.to_string(),
                network,
                from_block,
            },
        )
        .await?;
        info!(wallet = %wallet, network = %network.as_str(), "Subscribed wallet");
        Ok(())
    }
}
