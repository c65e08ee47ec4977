// GET /__stats: currently registered subscribers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::dispatch::subscriber::SubscriberPayload;
use crate::web::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    pub nr_of_subscribers: usize,
    pub subscribers: Vec<SubscriberPayload>,
}

pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let subscribers: Vec<SubscriberPayload> = state
        .dispatcher
        .subscribers()
        .iter()
        .map(|s| s.payload())
        .collect();

    Json(SubscriptionStats {
        nr_of_subscribers: subscribers.len(),
        subscribers,
    })
}
