use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{Catalog, OrderStatus, SalesEvent, StatusSummary, ALL_PRODUCTS};
use crate::sp_api::{Order, OrderSource, OrdersQuery};
use crate::time::{parse_day, BusinessCalendar, QueryWindow};

/// SP-API refuses a `CreatedBefore` closer to now than this.
const CREATED_BEFORE_LAG_MINUTES: i64 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrdersRequest {
    pub days_back: u32,
    pub product_sku: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Default for OrdersRequest {
    fn default() -> Self {
        Self {
            days_back: 0,
            product_sku: ALL_PRODUCTS.to_string(),
            start_date: None,
            end_date: None,
        }
    }
}

impl OrdersRequest {
    /// Both ends of a custom range, when the caller supplied both.
    fn custom_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        match (present(&self.start_date), present(&self.end_date)) {
            (Some(start), Some(end)) => Ok(Some((parse_day(start)?, parse_day(end)?))),
            _ => Ok(None),
        }
    }

    fn matches(&self, sku: &str) -> bool {
        self.product_sku == ALL_PRODUCTS || self.product_sku == sku
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub order_id: String,
    pub status: OrderStatus,
    pub quantity: u32,
    /// Unit price.
    pub price: Decimal,
    pub revenue: Decimal,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub orders: Vec<OrderLine>,
    pub total_units: u64,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayTotals {
    pub units: u64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersReport {
    pub date_range: DateRange,
    pub days_back: u32,
    pub is_custom_range: bool,
    pub product_filter: String,
    pub total_orders: usize,
    pub by_product: BTreeMap<String, ProductSummary>,
    pub by_date: BTreeMap<NaiveDate, DayTotals>,
    pub summary: StatusSummary,
}

/// Groups events by business day and sums their amounts and units.
pub fn bucket_totals<'a>(
    events: impl IntoIterator<Item = &'a SalesEvent>,
    calendar: &BusinessCalendar,
) -> BTreeMap<NaiveDate, DayTotals> {
    let mut totals: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();
    for event in events {
        let day = totals.entry(calendar.day_of(event.timestamp)).or_default();
        day.units += u64::from(event.quantity);
        day.revenue += event.amount;
    }
    totals
}

fn unit_price(line_amount: Decimal, quantity: u32) -> Decimal {
    if quantity == 0 {
        return line_amount;
    }
    (line_amount / Decimal::from(quantity)).round_dp(2)
}

pub struct ReportService {
    source: Arc<dyn OrderSource>,
    calendar: BusinessCalendar,
    catalog: Catalog,
    max_orders: usize,
    page_delay: Duration,
    item_delay: Duration,
}

impl ReportService {
    pub fn new(source: Arc<dyn OrderSource>, cfg: &Config) -> Self {
        Self {
            source,
            calendar: cfg.calendar,
            catalog: cfg.products.clone(),
            max_orders: cfg.max_orders,
            page_delay: Duration::from_millis(cfg.sp_api.page_delay_ms),
            item_delay: Duration::from_millis(cfg.sp_api.item_delay_ms),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Window -> paginated orders -> items -> business-day aggregation.
    pub async fn build(&self, req: &OrdersRequest, now: DateTime<Utc>) -> Result<OrdersReport> {
        let custom = req.custom_range()?;
        let window = match custom {
            Some((start, end)) => self.calendar.window_for_range(start, end)?,
            None => self.calendar.window_for_days_back(now, req.days_back)?,
        };
        let query = query_for(&window, now);
        info!(
            first_day = %window.first_day,
            last_day = %window.last_day,
            created_after = %query.created_after,
            created_before = ?query.created_before,
            product = %req.product_sku,
            "report.window"
        );

        let orders = self.fetch_orders(&query).await?;

        let mut events = Vec::new();
        let mut by_product: BTreeMap<String, ProductSummary> = BTreeMap::new();
        let mut summary = StatusSummary::default();

        for (i, order) in orders.iter().enumerate() {
            if i > 0 && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
            let purchased = purchase_instant(order)?;
            let day = self.calendar.day_of(purchased);

            let items = match self.source.order_items(&order.amazon_order_id).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(order_id = %order.amazon_order_id, error = %e, "report.items_failed");
                    Vec::new()
                }
            };

            for item in items {
                let sku = item.seller_sku.clone().unwrap_or_default();
                if !req.matches(&sku) {
                    continue;
                }
                let quantity = item.quantity();
                let revenue = item.line_amount();

                let product = by_product
                    .entry(self.catalog.name_for(&sku).to_string())
                    .or_default();
                product.orders.push(OrderLine {
                    order_id: order.amazon_order_id.clone(),
                    status: order.order_status,
                    quantity,
                    price: unit_price(revenue, quantity),
                    revenue,
                    date: day,
                });
                product.total_units += u64::from(quantity);
                product.total_revenue += revenue;

                events.push(SalesEvent {
                    timestamp: purchased,
                    amount: revenue,
                    product_id: sku,
                    quantity,
                });
            }

            summary.record(order.order_status);
        }

        let report = OrdersReport {
            date_range: DateRange { start: window.first_day, end: window.last_day },
            days_back: req.days_back,
            is_custom_range: custom.is_some(),
            product_filter: req.product_sku.clone(),
            total_orders: orders.len(),
            by_product,
            by_date: bucket_totals(&events, &self.calendar),
            summary,
        };
        info!(
            total_orders = report.total_orders,
            sold_lines = events.len(),
            days = report.by_date.len(),
            "report.done"
        );
        Ok(report)
    }

    async fn fetch_orders(&self, query: &OrdersQuery) -> Result<Vec<Order>> {
        let mut orders = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self.source.orders_page(query, next_token.as_deref()).await?;
            orders.extend(page.orders);
            match page.next_token {
                Some(token) if orders.len() < self.max_orders => {
                    next_token = Some(token);
                    tokio::time::sleep(self.page_delay).await;
                }
                Some(_) => {
                    warn!(
                        fetched = orders.len(),
                        cap = self.max_orders,
                        "report.order_cap_reached"
                    );
                    return Ok(orders);
                }
                None => return Ok(orders),
            }
        }
    }
}

fn query_for(window: &QueryWindow, now: DateTime<Utc>) -> OrdersQuery {
    OrdersQuery {
        created_after: window.created_after,
        created_before: window
            .created_before
            .filter(|before| *before <= now - TimeDelta::minutes(CREATED_BEFORE_LAG_MINUTES)),
    }
}

fn purchase_instant(order: &Order) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&order.purchase_date)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| {
            format!(
                "order {} has invalid PurchaseDate {:?}",
                order.amazon_order_id, order.purchase_date
            )
        })
}
