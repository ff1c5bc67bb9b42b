use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{
    blacklist::{Phrase, PhraseStore},
    types::UserId,
    violations::ViolationLedger,
};

#[derive(Clone)]
pub struct AppState {
    pub phrases: Arc<PhraseStore>,
    pub ledger: Arc<ViolationLedger>,
}

#[derive(Debug, Deserialize)]
pub struct PhraseRequest {
    pub tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub text: String,
}

#[derive(Serialize)]
struct AddedResponse {
    added: bool,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
}

#[derive(Serialize)]
struct CheckResponse {
    matched: bool,
    phrase: Option<Phrase>,
}

#[derive(Serialize)]
struct ViolationsResponse {
    user_id: UserId,
    violations: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(
            "/api/blacklist",
            get(api_list_phrases)
                .post(api_add_phrase)
                .delete(api_remove_phrase),
        )
        .route("/api/blacklist/check", post(api_check_message))
        .route("/api/violations", get(api_list_violations))
        .route(
            "/api/violations/{user_id}",
            get(api_get_violations).delete(api_clear_violations),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> &'static str {
    "chatwarden admin API"
}

async fn health() -> &'static str {
    "ok"
}

async fn api_list_phrases(State(state): State<AppState>) -> Json<Vec<Phrase>> {
    Json(state.phrases.list().await)
}

async fn api_add_phrase(
    State(state): State<AppState>,
    Json(request): Json<PhraseRequest>,
) -> Result<Json<AddedResponse>, (StatusCode, String)> {
    if request.tokens.iter().all(|token| token.trim().is_empty()) {
        return Err(bad_request("tokens must contain at least one word"));
    }
    let added = state.phrases.add_phrase(&request.tokens).await;
    Ok(Json(AddedResponse { added }))
}

async fn api_remove_phrase(
    State(state): State<AppState>,
    Json(request): Json<PhraseRequest>,
) -> Json<DeletedResponse> {
    let deleted = state.phrases.remove_phrase(&request.tokens).await;
    Json(DeletedResponse { deleted })
}

async fn api_check_message(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Json<CheckResponse> {
    let phrase = state.phrases.find_match(&request.text).await;
    Json(CheckResponse {
        matched: phrase.is_some(),
        phrase,
    })
}

async fn api_list_violations(
    State(state): State<AppState>,
) -> Json<std::collections::BTreeMap<UserId, u32>> {
    Json(state.ledger.snapshot().await)
}

async fn api_get_violations(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<ViolationsResponse> {
    let violations = state.ledger.get_violations(user_id).await;
    Json(ViolationsResponse {
        user_id,
        violations,
    })
}

async fn api_clear_violations(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<DeletedResponse> {
    let deleted = state.ledger.clear_violations(user_id).await;
    Json(DeletedResponse { deleted })
}

fn bad_request(message: &str) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.to_owned())
}
