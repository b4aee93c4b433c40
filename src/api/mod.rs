//! HTTP surface: welcome text, health, picks and props.

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::ApiConfig;
use crate::odds::{build_picks, prop_candidates, rank_props, OddsClient, OddsSource, Pick, PropPick, TOP_PROPS};

pub const WELCOME: &str = "Welcome to NBA Betting Generator";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to fetch odds from upstream")]
    Upstream(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Upstream(ref cause) = self;
        error!("Request failed: {:#}", cause);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Upstream health as seen by the handlers
#[derive(Clone, Default)]
pub struct HealthState {
    pub last_success: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub error_count: Arc<RwLock<usize>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self) {
        *self.last_success.write().await = Some(Utc::now());
        *self.error_count.write().await = 0;
    }

    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }
}

#[derive(Clone)]
pub struct AppState {
    pub odds: Arc<dyn OddsSource>,
    pub health: HealthState,
}

impl AppState {
    pub fn new(odds: Arc<dyn OddsSource>) -> Self {
        Self {
            odds,
            health: HealthState::new(),
        }
    }

    async fn track<T>(&self, result: Result<T>) -> Result<T, ApiError> {
        match result {
            Ok(v) => {
                self.health.record_success().await;
                Ok(v)
            }
            Err(e) => {
                self.health.record_error().await;
                Err(ApiError::Upstream(e))
            }
        }
    }
}

pub async fn welcome() -> &'static str {
    WELCOME
}

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let last_success = state.health.last_success.read().await;
    let errors = state.health.error_count.read().await;

    let status = if *errors > 5 { "degraded" } else { "ok" };
    let http_status = if *errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "nba-insights",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "last_success": last_success.map(|t| t.to_rfc3339()),
            "consecutive_errors": *errors
        })),
    )
}

pub async fn get_picks(State(state): State<AppState>) -> Result<Json<Vec<Pick>>, ApiError> {
    let events = state.track(state.odds.game_odds().await).await?;
    let picks = build_picks(&events);
    info!("Built {} picks from {} events", picks.len(), events.len());
    Ok(Json(picks))
}

pub async fn get_props(State(state): State<AppState>) -> Result<Json<Vec<PropPick>>, ApiError> {
    let events = state.track(state.odds.events().await).await?;
    let limit = state.odds.props_event_limit();

    let mut candidates = Vec::new();
    for event in events.iter().take(limit) {
        match state.odds.event_props(&event.id).await {
            Ok(with_odds) => candidates.extend(prop_candidates(&with_odds)),
            Err(e) => warn!("Skipping props for event {}: {:#}", event.id, e),
        }
    }

    Ok(Json(rank_props(candidates, TOP_PROPS)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_handler))
        .route("/api/picks", get(get_picks))
        .route("/api/props", get(get_props))
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(config: ApiConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.api_port);
    let client = OddsClient::new(config)?;
    let app = router(AppState::new(Arc::new(client)));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
            }
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_degrades_after_repeated_errors() {
        let health = HealthState::new();
        for _ in 0..6 {
            health.record_error().await;
        }
        assert_eq!(*health.error_count.read().await, 6);
        health.record_success().await;
        assert_eq!(*health.error_count.read().await, 0);
        assert!(health.last_success.read().await.is_some());
    }

    #[test]
    fn errors_become_generic_500s() {
        let err = ApiError::from(anyhow::anyhow!("connection reset by peer at 10.0.0.1"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
