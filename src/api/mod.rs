//! Dashboard/API boundary (spec §6/§9): health check, per-loan reads gated
//! by the loan's own token, alert listing, and a WebSocket rebroadcast of
//! `price:update`. Thin — the core pipeline owns all the logic here; this
//! module only adapts it to HTTP/WS.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::auth::middleware::{extract_token, AuthError};
use crate::bus::EventBus;
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use crate::store::LoanStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn LoanStore>,
    pub bus: EventBus,
}

pub fn router(state: ApiState) -> Router {
    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());

    Router::new()
        .route("/health", get(health))
        .route("/api/loans/:token", get(get_loan))
        .route("/api/loans/:token/alerts", get(get_loan_alerts))
        .route("/ws", get(ws_handler))
        .layer(from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn authorize(uri: &Uri, headers: &HeaderMap, loan_token: &str) -> Result<(), AuthError> {
    let presented = extract_token(uri, headers).ok_or(AuthError::MissingToken)?;
    if presented == loan_token {
        Ok(())
    } else {
        Err(AuthError::TokenMismatch)
    }
}

async fn get_loan(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Some(loan) = state.store.get_loan(&token) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Err(e) = authorize(&uri, &headers, &loan.token) {
        return e.into_response();
    }

    let last_price = state.store.get_last_price();
    let current_ltv = last_price.as_ref().map(|p| loan.ltv_at(p.price));
    let risk_tier = last_price
        .as_ref()
        .map(|p| crate::risk::risk_tier(&loan, loan.ltv_at(p.price)));

    Json(json!({
        "loan": loan,
        "last_price": last_price,
        "current_ltv": current_ltv,
        "risk_tier": risk_tier,
        "margin_call_price": crate::risk::margin_call_price(&loan),
        "liquidation_price": crate::risk::liquidation_price(&loan),
    }))
    .into_response()
}

async fn get_loan_alerts(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Some(loan) = state.store.get_loan(&token) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Err(e) = authorize(&uri, &headers, &loan.token) {
        return e.into_response();
    }

    let price_alerts: Vec<_> = state
        .store
        .get_all_price_alerts()
        .into_iter()
        .filter(|a| a.token == token)
        .collect();
    let ltv_alerts: Vec<_> = state
        .store
        .get_all_ltv_alerts()
        .into_iter()
        .filter(|a| a.token == token)
        .collect();

    Json(json!({ "price_alerts": price_alerts, "ltv_alerts": ltv_alerts })).into_response()
}

async fn ws_handler(State(state): State<ApiState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| dashboard_socket(socket, state))
}

async fn dashboard_socket(mut socket: WebSocket, state: ApiState) {
    let mut rx = state.bus.subscribe_price_update();
    while let Ok(update) = rx.recv().await {
        let payload = json!({ "type": "price", "data": update });
        if socket.send(Message::Text(payload.to_string())).await.is_err() {
            debug!("dashboard socket closed");
            return;
        }
    }
}
