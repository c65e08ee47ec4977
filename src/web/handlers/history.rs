// GET /__history: recently dispatched notifications, newest first.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use tracing::warn;

use crate::dispatch::notification::marshal_notifications_json;
use crate::web::{api_error, json_response, AppState};

pub async fn get_history(State(state): State<AppState>) -> Response {
    match marshal_notifications_json(&state.history.notifications()) {
        Ok(body) => json_response(body),
        Err(e) => {
            warn!(error = %e, "Serving /__history request");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to serialize history")
        }
    }
}
