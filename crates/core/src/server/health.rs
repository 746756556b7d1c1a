use std::{
    sync::OnceLock,
    time::Instant,
};

use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::RelayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    ok: bool,
    uptime_s: u64,
    backend_ok: bool,
}

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

pub async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        uptime_s: process_start().elapsed().as_secs(),
        backend_ok: state.backend().last_known_reachable(),
    })
}
