//! REST client for the table gateway.
//!
//! One `reqwest` client backs every read, poll, decryption and submission
//! call. Failures come back as `{ "code": .., "message": .. }` bodies and are
//! mapped onto [`ProviderError`] so the engine can classify them.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::error::ProviderError;
use crate::providers::{
    ActionSubmitter, AuthorityProvider, DecryptionService, LedgerReader, PollBatch, PollProvider,
};
use crate::types::{
    Address, BettingInfo, CardHandle, CardValue, CommunityCardState, DecryptionSignature,
    PlayerStates, RevealedCards, TableId, TableSnapshot, BOARD_SIZE,
};

const LOG_TARGET: &str = "table_sync::gateway";

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub api_key: Option<String>,
}

impl GatewayConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Duration::from_secs(15),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct HoleHandlesBody {
    handles: [CardHandle; 2],
}

#[derive(Serialize)]
struct SignatureRequest<'a> {
    identity: &'a Address,
    contracts: &'a [Address],
}

/// The private key stays on the client.
#[derive(Serialize)]
struct DecryptRequest<'a> {
    handles: &'a [CardHandle],
    public_key: &'a str,
    signature: &'a str,
    contract_addresses: &'a [Address],
    user_address: &'a Address,
    start_timestamp: i64,
    duration_days: u32,
}

#[derive(Deserialize)]
struct DecryptBody {
    values: Vec<CardValue>,
}

#[derive(Serialize)]
struct AuthorityRequest<'a> {
    principal: &'a Address,
    delegate: &'a Address,
    contract: &'a Address,
}

pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build gateway HTTP client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.config
            .base_url
            .join(path)
            .with_context(|| format!("invalid gateway path {path}"))
            .map_err(ProviderError::Transport)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let url = self.endpoint(path)?;
        trace!(target: LOG_TARGET, %method, %url, "gateway request");
        let builder = self.client.request(method, url);
        Ok(match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        })
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        table_id: Option<TableId>,
    ) -> Result<Response, ProviderError> {
        let response = builder.send().await.map_err(map_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let raw = response.text().await.unwrap_or_default();
        let err = decode_error(status, &raw, table_id);
        debug!(target: LOG_TARGET, %status, error = %err, "gateway rejected request");
        Err(err)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        table_id: Option<TableId>,
    ) -> Result<T, ProviderError> {
        let response = self.send(self.request(Method::GET, path)?, table_id).await?;
        decode_json(response, path).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        table_id: Option<TableId>,
    ) -> Result<T, ProviderError> {
        let builder = self.request(Method::POST, path)?.json(body);
        let response = self.send(builder, table_id).await?;
        decode_json(response, path).await
    }

    async fn post_unit<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        table_id: Option<TableId>,
    ) -> Result<(), ProviderError> {
        let builder = self.request(Method::POST, path)?.json(body);
        self.send(builder, table_id).await.map(|_| ())
    }
}

async fn decode_json<T: DeserializeOwned>(
    response: Response,
    path: &str,
) -> Result<T, ProviderError> {
    let bytes = response.bytes().await.map_err(map_transport)?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to decode gateway response for {path}"))
        .map_err(ProviderError::Transport)
}

fn map_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::Unavailable(err.to_string())
    } else {
        ProviderError::Transport(anyhow::Error::new(err))
    }
}

/// Maps a gateway error response onto the engine's error vocabulary.
pub fn decode_error(status: StatusCode, raw: &str, table_id: Option<TableId>) -> ProviderError {
    let body = serde_json::from_str::<ErrorBody>(raw).ok();
    let message = body
        .as_ref()
        .map(|body| body.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| status.to_string());

    match body.as_ref().map(|body| body.code.as_str()) {
        Some("not_yet_available") | Some("not_dealt") => ProviderError::NotYetAvailable(message),
        Some("unavailable") => ProviderError::Unavailable(message),
        Some("unauthorized") => ProviderError::Unauthorized(message),
        Some("already_granted") => ProviderError::AlreadyGranted,
        Some("user_rejected") => ProviderError::UserRejected,
        Some("not_found") => ProviderError::NotFound(message),
        Some("not_seated") => match table_id {
            Some(table_id) => ProviderError::NotSeated(table_id),
            None => ProviderError::InvalidState(message),
        },
        Some("invalid_state") => ProviderError::InvalidState(message),
        Some("insufficient_balance") => ProviderError::InsufficientBalance,
        _ => match status {
            StatusCode::NOT_FOUND => ProviderError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::Unauthorized(message)
            }
            StatusCode::TOO_MANY_REQUESTS => ProviderError::Unavailable(message),
            status if status.is_server_error() => ProviderError::Unavailable(message),
            _ => ProviderError::InvalidState(message),
        },
    }
}

#[async_trait]
impl LedgerReader for HttpGateway {
    async fn table(
        &self,
        table_id: TableId,
        viewer: &Address,
    ) -> Result<TableSnapshot, ProviderError> {
        self.get_json(&format!("tables/{table_id}?viewer={viewer}"), Some(table_id))
            .await
    }

    async fn betting(&self, table_id: TableId) -> Result<BettingInfo, ProviderError> {
        self.get_json(&format!("tables/{table_id}/betting"), Some(table_id))
            .await
    }

    async fn players(&self, table_id: TableId) -> Result<PlayerStates, ProviderError> {
        self.get_json(&format!("tables/{table_id}/players"), Some(table_id))
            .await
    }

    async fn community_cards(
        &self,
        table_id: TableId,
    ) -> Result<CommunityCardState, ProviderError> {
        self.get_json(&format!("tables/{table_id}/community"), Some(table_id))
            .await
    }

    async fn community_plaintext(
        &self,
        table_id: TableId,
    ) -> Result<[Option<CardValue>; BOARD_SIZE], ProviderError> {
        let slots: Vec<Option<CardValue>> = self
            .get_json(&format!("tables/{table_id}/community/plaintext"), Some(table_id))
            .await?;
        slots.as_slice().try_into().map_err(|_| {
            ProviderError::InvalidState(format!(
                "board must have {BOARD_SIZE} slots, gateway returned {}",
                slots.len()
            ))
        })
    }

    async fn hole_card_handles(
        &self,
        table_id: TableId,
        player: &Address,
    ) -> Result<[CardHandle; 2], ProviderError> {
        let body: HoleHandlesBody = self
            .get_json(&format!("tables/{table_id}/hole-cards/{player}"), Some(table_id))
            .await?;
        Ok(body.handles)
    }

    async fn revealed_cards(&self, table_id: TableId) -> Result<RevealedCards, ProviderError> {
        self.get_json(&format!("tables/{table_id}/revealed"), Some(table_id))
            .await
    }
}

#[async_trait]
impl PollProvider for HttpGateway {
    async fn poll(
        &self,
        table_id: Option<TableId>,
        cursor: Option<u64>,
    ) -> Result<PollBatch, ProviderError> {
        self.get_json(&events_path(table_id, cursor), table_id).await
    }
}

fn events_path(table_id: Option<TableId>, cursor: Option<u64>) -> String {
    let mut query = Vec::new();
    if let Some(table_id) = table_id {
        query.push(format!("table_id={table_id}"));
    }
    if let Some(cursor) = cursor {
        query.push(format!("cursor={cursor}"));
    }
    if query.is_empty() {
        "events".to_string()
    } else {
        format!("events?{}", query.join("&"))
    }
}

#[async_trait]
impl DecryptionService for HttpGateway {
    async fn create_signature(
        &self,
        identity: &Address,
        contracts: &[Address],
    ) -> Result<DecryptionSignature, ProviderError> {
        self.post_json(
            "decryption/signatures",
            &SignatureRequest {
                identity,
                contracts,
            },
            None,
        )
        .await
    }

    async fn user_decrypt(
        &self,
        handles: &[CardHandle],
        signature: &DecryptionSignature,
    ) -> Result<Vec<CardValue>, ProviderError> {
        let body: DecryptBody = self
            .post_json(
                "decryption/user-decrypt",
                &DecryptRequest {
                    handles,
                    public_key: &signature.public_key,
                    signature: &signature.signature,
                    contract_addresses: &signature.contract_addresses,
                    user_address: &signature.user_address,
                    start_timestamp: signature.start_timestamp,
                    duration_days: signature.duration_days,
                },
                None,
            )
            .await?;
        if body.values.len() != handles.len() {
            return Err(ProviderError::InvalidState(format!(
                "asked for {} values, got {}",
                handles.len(),
                body.values.len()
            )));
        }
        Ok(body.values)
    }
}

#[async_trait]
impl AuthorityProvider for HttpGateway {
    async fn grant_decryption_authority(
        &self,
        principal: &Address,
        delegate: &Address,
        contract: &Address,
    ) -> Result<(), ProviderError> {
        self.post_unit(
            "decryption/authority",
            &AuthorityRequest {
                principal,
                delegate,
                contract,
            },
            None,
        )
        .await
    }
}

#[async_trait]
impl ActionSubmitter for HttpGateway {
    async fn skip_timed_out_player(&self, table_id: TableId) -> Result<(), ProviderError> {
        self.post_unit(
            &format!("tables/{table_id}/skip-timed-out"),
            &serde_json::json!({}),
            Some(table_id),
        )
        .await
    }
}
