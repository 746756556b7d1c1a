use axum::{Json, extract::State};

use crate::{error::RelayError, protocol::anthropic, state::RelayState};

pub async fn models(State(state): State<RelayState>) -> Result<Json<anthropic::ModelsResponse>, RelayError> {
    let backend_models = state.backend().list_models().await?;

    let data = backend_models
        .data
        .into_iter()
        .map(|model| anthropic::Model {
            display_name: model.id.clone(),
            id: model.id,
            r#type: anthropic::ModelType::Model,
            created_at: model.created.map(format_created_at).unwrap_or_default(),
        })
        .collect();

    Ok(Json(anthropic::ModelsResponse {
        data,
        has_more: false,
        first_id: None,
        last_id: None,
    }))
}

fn format_created_at(epoch_seconds: i64) -> String {
    jiff::Timestamp::from_second(epoch_seconds)
        .map(|timestamp| timestamp.to_string())
        .unwrap_or_default()
}
