use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use truemid_core::model::SymbolRecord;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_symbols(
    State(state): State<AppState>,
) -> Result<Json<Vec<SymbolRecord>>, StatusCode> {
    state
        .registry
        .all_symbols()
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Serialize)]
pub struct TrueMidPriceResponse {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub true_mid_price: Decimal,
}

/// Latest persisted consensus price. The path segment uses `-` in place
/// of `/`, e.g. `BTC-USDT`.
pub async fn true_mid_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<TrueMidPriceResponse>, StatusCode> {
    let canonical = symbol.replace('-', "/");
    let record = state
        .registry
        .get_symbol(&canonical)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let row = truemid_db::streams::get_last_true_mid_price(&state.pool, record.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(TrueMidPriceResponse {
        symbol: canonical,
        ts: row.ts,
        true_mid_price: row.true_mid_price,
    }))
}
