use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SpApiConfig;
use crate::domain::OrderStatus;

const MAX_RESULTS_PER_PAGE: &str = "100";
/// Refresh the LWA token this long before Amazon says it expires.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Anything that can list orders and their items. `SpApiClient` is the real
/// one; tests plug in fakes.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn orders_page(
        &self,
        query: &OrdersQuery,
        next_token: Option<&str>,
    ) -> Result<OrdersPage>;
    async fn order_items(&self, order_id: &str) -> Result<Vec<OrderItem>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdersQuery {
    pub created_after: DateTime<Utc>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrdersPage {
    #[serde(rename = "Orders", default)]
    pub orders: Vec<Order>,
    #[serde(rename = "NextToken", skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "AmazonOrderId")]
    pub amazon_order_id: String,
    /// RFC 3339; parsed by the report so a bad value can name its order.
    #[serde(rename = "PurchaseDate")]
    pub purchase_date: String,
    #[serde(rename = "OrderStatus")]
    pub order_status: OrderStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderItemsPage {
    #[serde(rename = "OrderItems", default)]
    pub order_items: Vec<OrderItem>,
    #[serde(rename = "NextToken", skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(rename = "SellerSKU", default)]
    pub seller_sku: Option<String>,
    #[serde(rename = "QuantityOrdered", default)]
    pub quantity_ordered: Option<u32>,
    /// Price of the whole line (unit price times quantity).
    #[serde(rename = "ItemPrice", default, skip_serializing_if = "Option::is_none")]
    pub item_price: Option<Money>,
}

impl OrderItem {
    pub fn quantity(&self) -> u32 {
        self.quantity_ordered.unwrap_or(1)
    }

    pub fn line_amount(&self) -> Decimal {
        self.item_price.as_ref().map(|m| m.amount).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    #[serde(rename = "CurrencyCode", default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
    #[serde(rename = "Amount")]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    payload: T,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Orders API client authenticated through Login with Amazon.
pub struct SpApiClient {
    cfg: SpApiConfig,
    http: Client,
    token: Mutex<Option<CachedToken>>,
}

impl SpApiClient {
    pub fn new(cfg: SpApiConfig) -> Self {
        let cfg = SpApiConfig {
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            ..cfg
        };
        Self {
            cfg,
            http: Client::new(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        debug!(url = %self.cfg.lwa_token_url, "sp_api.lwa_refresh");
        let resp = self
            .http
            .post(&self.cfg.lwa_token_url)
            .form(&TokenRequest {
                grant_type: "refresh_token",
                refresh_token: &self.cfg.refresh_token,
                client_id: &self.cfg.lwa_client_id,
                client_secret: &self.cfg.lwa_client_secret,
            })
            .send()
            .await
            .context("lwa token request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("lwa token exchange failed: {status} {body}"));
        }
        let token: TokenResponse = resp.json().await.context("invalid lwa token response")?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_SLACK);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    /// GET with the access token header, retrying throttling and server errors.
    async fn get_payload<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.cfg.endpoint, path);
        let mut attempt = 0;
        loop {
            let token = self.access_token().await?;
            let resp = self
                .http
                .get(&url)
                .header("x-amz-access-token", token)
                .query(query)
                .send()
                .await
                .with_context(|| format!("GET {path} failed"))?;

            let status = resp.status();
            if status.is_success() {
                let envelope: Envelope<T> = resp
                    .json()
                    .await
                    .with_context(|| format!("invalid response from {path}"))?;
                return Ok(envelope.payload);
            }

            if is_retryable(status) && attempt < self.cfg.max_retries {
                let delay = backoff_delay(Duration::from_millis(self.cfg.retry_base_ms), attempt);
                warn!(%status, path, attempt, delay_ms = delay.as_millis() as u64, "sp_api.retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("sp-api {path} failed: {status} {body}"));
        }
    }
}

#[async_trait]
impl OrderSource for SpApiClient {
    async fn orders_page(
        &self,
        query: &OrdersQuery,
        next_token: Option<&str>,
    ) -> Result<OrdersPage> {
        let mut params = vec![("MarketplaceIds", self.cfg.marketplace_id.clone())];
        match next_token {
            Some(token) => params.push(("NextToken", token.to_string())),
            None => {
                params.push(("CreatedAfter", rfc3339(query.created_after)));
                if let Some(before) = query.created_before {
                    params.push(("CreatedBefore", rfc3339(before)));
                }
                params.push(("MaxResultsPerPage", MAX_RESULTS_PER_PAGE.to_string()));
            }
        }
        self.get_payload("/orders/v0/orders", &params).await
    }

    async fn order_items(&self, order_id: &str) -> Result<Vec<OrderItem>> {
        let path = format!("/orders/v0/orders/{order_id}/orderItems");
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let params: Vec<(&str, String)> = next_token
                .take()
                .map(|t| vec![("NextToken", t)])
                .unwrap_or_default();
            let page: OrderItemsPage = self.get_payload(&path, &params).await?;
            items.extend(page.order_items);
            match page.next_token {
                Some(t) => next_token = Some(t),
                None => return Ok(items),
            }
        }
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `base * 2^attempt`, capped, plus up to half of `base` of random jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF);
    let jitter_ms = (base.as_millis() as u64) / 2;
    let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
    exp + Duration::from_millis(jitter)
}
