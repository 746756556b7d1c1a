use axum::{Json, extract::State};

use crate::{metrics::MetricsSnapshot, state::RelayState};

pub async fn metrics(State(state): State<RelayState>) -> Json<MetricsSnapshot> {
    Json(state.metrics().snapshot())
}
