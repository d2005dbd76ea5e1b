//! HTTP query API: gline lookups and removal requests against a running
//! session, routed by network name.

use crate::engine::GlineRecord;
use crate::session::{Session, SessionError, SessionRegistry};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct GlineReply {
    pub active: bool,
    pub mask: String,
    pub expirets: i64,
    pub lastmodts: i64,
    pub hoursuntilexpire: i64,
    pub reason: String,
}

impl GlineReply {
    fn from_record(rec: &GlineRecord) -> Self {
        Self {
            active: rec.is_active(),
            mask: rec.mask().to_string(),
            expirets: rec.expire_ts(),
            lastmodts: rec.last_mod_ts(),
            hoursuntilexpire: rec.hours_until_expiration(),
            reason: rec.reason().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RemglineRequest {
    pub glinemask: String,
}

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/checkgline/:network/:query", get(check_gline))
        .route("/remgline/:network", post(rem_gline))
        .with_state(registry)
}

pub async fn run_http_server(
    listen: SocketAddr,
    registry: Arc<SessionRegistry>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "http api listening");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

fn session_for(
    registry: &SessionRegistry,
    network: &str,
) -> Result<Arc<Session>, (StatusCode, String)> {
    registry
        .by_network(network)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown network: {network}")))
}

async fn check_gline(
    State(registry): State<Arc<SessionRegistry>>,
    Path((network, query)): Path<(String, String)>,
) -> Result<Json<Vec<GlineReply>>, (StatusCode, String)> {
    let session = session_for(&registry, &network)?;
    if session.config().forbid_cidr_lookups_via_api && query.contains('/') {
        return Err((
            StatusCode::FORBIDDEN,
            "CIDR lookups are disabled for this network".to_string(),
        ));
    }
    let (active, inactive) = session
        .store()
        .check(&query, false)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    let replies = active
        .iter()
        .chain(inactive.iter())
        .map(GlineReply::from_record)
        .collect();
    Ok(Json(replies))
}

async fn rem_gline(
    State(registry): State<Arc<SessionRegistry>>,
    Path(network): Path<String>,
    Json(req): Json<RemglineRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let session = session_for(&registry, &network)?;
    match session.request_gline_removal(&req.glinemask) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(err @ SessionError::RemovalNotConfigured) => {
            Err((StatusCode::NOT_IMPLEMENTED, err.to_string()))
        }
        Err(err @ SessionError::NotConnected) => {
            Err((StatusCode::SERVICE_UNAVAILABLE, err.to_string()))
        }
    }
}
