use std::fmt;

use anyhow::{anyhow, Context, Result};

use crate::domain::Catalog;
use crate::time::{BusinessCalendar, Zone, DEFAULT_BOUNDARY_HOUR};

const DEFAULT_ENDPOINT: &str = "https://sellingpartnerapi-na.amazon.com";
const SANDBOX_ENDPOINT: &str = "https://sandbox.sellingpartnerapi-na.amazon.com";

#[derive(Clone)]
pub struct SpApiConfig {
    // Login with Amazon
    pub lwa_client_id: String,
    pub lwa_client_secret: String,
    pub refresh_token: String,
    pub lwa_token_url: String,

    pub endpoint: String,
    pub marketplace_id: String,

    // Throttling
    pub page_delay_ms: u64,
    pub item_delay_ms: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
}

impl fmt::Debug for SpApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpApiConfig")
            .field("lwa_client_id", &self.lwa_client_id)
            .field("lwa_client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("lwa_token_url", &self.lwa_token_url)
            .field("endpoint", &self.endpoint)
            .field("marketplace_id", &self.marketplace_id)
            .field("page_delay_ms", &self.page_delay_ms)
            .field("item_delay_ms", &self.item_delay_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_base_ms", &self.retry_base_ms)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sp_api: SpApiConfig,

    // Reporting
    pub calendar: BusinessCalendar,
    pub products: Catalog,
    pub max_orders: usize,

    // HTTP
    pub host: String,
    pub port: u16,
    pub static_dir: String,
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw.map(|s| s.trim().to_lowercase()) {
        None => default,
        Some(v) if v.is_empty() => default,
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "y" || v == "on" => true,
        Some(v) if v == "0" || v == "false" || v == "no" || v == "n" || v == "off" => false,
        Some(_) => default,
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw.filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(v) => v.trim().parse().with_context(|| format!("invalid {key}: {v:?}")),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("{key} is required"))
        };

        // Login with Amazon
        let lwa_client_id = required("LWA_CLIENT_ID")?;
        let lwa_client_secret = required("LWA_CLIENT_SECRET")?;
        let refresh_token = required("REFRESH_TOKEN")?;
        let lwa_token_url = lookup("LWA_TOKEN_URL")
            .unwrap_or_else(|| "https://api.amazon.com/auth/o2/token".to_string());

        // SP-API
        let sandbox = parse_bool(lookup("SP_API_SANDBOX"), false);
        let default_endpoint = if sandbox { SANDBOX_ENDPOINT } else { DEFAULT_ENDPOINT };
        let endpoint = lookup("SP_API_ENDPOINT").unwrap_or_else(|| default_endpoint.to_string());
        let marketplace_id =
            lookup("MARKETPLACE_ID").unwrap_or_else(|| "ATVPDKIKX0DER".to_string());
        let page_delay_ms = parse_or(lookup("SP_API_PAGE_DELAY_MS"), "SP_API_PAGE_DELAY_MS", 300)?;
        let item_delay_ms = parse_or(lookup("SP_API_ITEM_DELAY_MS"), "SP_API_ITEM_DELAY_MS", 100)?;
        let max_retries = parse_or(lookup("SP_API_MAX_RETRIES"), "SP_API_MAX_RETRIES", 3)?;
        let retry_base_ms = parse_or(lookup("SP_API_RETRY_BASE_MS"), "SP_API_RETRY_BASE_MS", 500)?;

        // Reporting
        let zone = Zone::parse(&lookup("DASHBOARD_TZ").unwrap_or_else(|| "-03:00".to_string()))?;
        let day_start_hour = parse_or(
            lookup("DASHBOARD_DAY_START_HOUR"),
            "DASHBOARD_DAY_START_HOUR",
            DEFAULT_BOUNDARY_HOUR,
        )?;
        let calendar = BusinessCalendar::new(zone, day_start_hour)?;
        let products = match lookup("DASHBOARD_PRODUCTS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Catalog::parse(&raw)?,
            None => Catalog::default(),
        };
        let max_orders = parse_or(lookup("DASHBOARD_MAX_ORDERS"), "DASHBOARD_MAX_ORDERS", 500)?;
        if max_orders == 0 {
            return Err(anyhow!("DASHBOARD_MAX_ORDERS must be positive"));
        }

        // HTTP
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(lookup("PORT"), "PORT", 8000)?;
        let static_dir = lookup("DASHBOARD_STATIC_DIR").unwrap_or_else(|| "static".to_string());

        Ok(Self {
            sp_api: SpApiConfig {
                lwa_client_id,
                lwa_client_secret,
                refresh_token,
                lwa_token_url,
                endpoint,
                marketplace_id,
                page_delay_ms,
                item_delay_ms,
                max_retries,
                retry_base_ms,
            },
            calendar,
            products,
            max_orders,
            host,
            port,
            static_dir,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
