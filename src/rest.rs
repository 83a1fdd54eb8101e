use crate::prelude::*;
use crate::snapshot::TelemetryStore;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;

const BASE_PATH: &str = "/telemetry";

/// HTTP view of the latest snapshot:
///
///   GET /telemetry/aggregated  system totals
///   GET /telemetry/{n}         unit at 1-based position n
pub struct RestService {
    listener: tokio::net::TcpListener,
    store: TelemetryStore,
}

impl RestService {
    pub async fn bind(config: &config::Rest, store: TelemetryStore) -> Result<Self> {
        let address = format!("{}:{}", config.address(), config.port());
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|err| anyhow!("rest.rs:unable to listen on {}: {}", address, err))?;

        Ok(Self { listener, store })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<()> {
        info!("Listening for requests at: http://{}{}", self.local_addr()?, BASE_PATH);
        axum::serve(self.listener, router(self.store)).await?;
        Ok(())
    }
}

pub fn router(store: TelemetryStore) -> Router {
    Router::new()
        .route(&format!("{}/aggregated", BASE_PATH), get(aggregated))
        .route(&format!("{}/{{unit}}", BASE_PATH), get(unit))
        .with_state(store)
}

async fn aggregated(State(store): State<TelemetryStore>) -> Response {
    Json(store.load().aggregated).into_response()
}

async fn unit(State(store): State<TelemetryStore>, Path(unit): Path<String>) -> Response {
    let snapshot = store.load();

    let position: i64 = match unit.parse() {
        Ok(position) => position,
        Err(_) => return bad_request(format!("Invalid machine number: {}", unit)),
    };

    let count = snapshot.units.len();
    match usize::try_from(position).ok().and_then(|p| snapshot.unit(p)) {
        Some(unit) => Json(unit).into_response(),
        None => bad_request(format!("Machine number must be between 1 and {}", count)),
    }
}

fn bad_request(message: String) -> Response {
    debug!("rejecting request: {}", message);
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
