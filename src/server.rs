//! HTTP surface of the dashboard.
//!
//! ```text
//! GET  /               dashboard page (static/index.html)
//! GET  /static/*       page assets
//! GET  /api/products   product picker entries
//! POST /api/orders     business-day sales report
//! GET  /health         liveness check
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::domain::Product;
use crate::report::{OrdersReport, OrdersRequest, ReportService};

pub struct AppState {
    reports: ReportService,
    static_dir: PathBuf,
}

impl AppState {
    pub fn new(reports: ReportService, static_dir: impl AsRef<Path>) -> Self {
        Self {
            reports,
            static_dir: static_dir.as_ref().to_path_buf(),
        }
    }
}

/// The page only looks at `success`, so report failures are sent in the body
/// with a 200. Bodies that do not decode keep their 4xx but use the same
/// shape.
#[derive(Serialize)]
struct Success<'a> {
    success: bool,
    #[serde(flatten)]
    report: &'a OrdersReport,
}

#[derive(Serialize)]
struct Failure {
    success: bool,
    error: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let index = ServeFile::new(state.static_dir.join("index.html"));
    let assets = ServeDir::new(&state.static_dir);

    Router::new()
        .route_service("/", index)
        .nest_service("/static", assets)
        .route("/api/products", get(products))
        .route("/api/orders", post(orders))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn products(State(state): State<Arc<AppState>>) -> Json<Vec<Product>> {
    Json(state.reports.catalog().listing())
}

async fn orders(
    State(state): State<Arc<AppState>>,
    body: Result<Json<OrdersRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            let message = rejection.body_text();
            warn!(status = %rejection.status(), error = %message, "orders.rejected");
            let failure = Failure {
                success: false,
                error: message,
            };
            return (rejection.status(), Json(failure)).into_response();
        }
    };
    match state.reports.build(&req, Utc::now()).await {
        Ok(report) => Json(Success { success: true, report: &report }).into_response(),
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, product = %req.product_sku, "orders.failed");
            Json(Failure {
                success: false,
                error: message,
            })
            .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
