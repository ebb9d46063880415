use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pseudo-SKU meaning "every product".
pub const ALL_PRODUCTS: &str = "ALL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
}

impl Product {
    fn new(sku: &str, name: &str) -> Self {
        Self {
            sku: sku.to_string(),
            name: name.to_string(),
        }
    }
}

/// Ordered list of the SKUs the dashboard reports on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            products: vec![
                Product::new("5Y-T9K7-1HM1", "Black Mamba Lite"),
                Product::new("VM-7EA4-DVAO", "Black Mamba Premium"),
                Product::new("J9-H173-J5AF", "Old School Mini"),
            ],
        }
    }
}

impl Catalog {
    /// Parses `SKU=Name;SKU=Name`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut products = Vec::new();
        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (sku, name) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid product entry {entry:?}, expected SKU=Name"))?;
            let (sku, name) = (sku.trim(), name.trim());
            if sku.is_empty() || name.is_empty() {
                return Err(anyhow!("invalid product entry {entry:?}, expected SKU=Name"));
            }
            if sku == ALL_PRODUCTS {
                return Err(anyhow!("{ALL_PRODUCTS} is reserved and cannot be a product SKU"));
            }
            products.push(Product::new(sku, name));
        }
        if products.is_empty() {
            return Err(anyhow!("product catalog is empty"));
        }
        Ok(Self { products })
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Display name for `sku`, falling back to the SKU itself.
    pub fn name_for<'a>(&'a self, sku: &'a str) -> &'a str {
        self.products
            .iter()
            .find(|p| p.sku == sku)
            .map(|p| p.name.as_str())
            .unwrap_or(sku)
    }

    /// What the product picker shows: "All Products" first, then the catalog.
    pub fn listing(&self) -> Vec<Product> {
        std::iter::once(Product::new(ALL_PRODUCTS, "All Products"))
            .chain(self.products.iter().cloned())
            .collect()
    }
}

/// One sold line: when, how much, which product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesEvent {
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Unshipped,
    PartiallyShipped,
    Shipped,
    Canceled,
    Unfulfillable,
    InvoiceUnconfirmed,
    PendingAvailability,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub shipped: usize,
    pub pending: usize,
    pub canceled: usize,
    pub other: usize,
}

impl StatusSummary {
    pub fn record(&mut self, status: OrderStatus) {
        match status {
            OrderStatus::Shipped => self.shipped += 1,
            OrderStatus::Pending => self.pending += 1,
            OrderStatus::Canceled => self.canceled += 1,
            _ => self.other += 1,
        }
    }
}
