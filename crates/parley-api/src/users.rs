use anyhow::anyhow;
use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::warn;
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::models::User;

use crate::AppState;
use crate::error::ApiError;
use crate::messages::parse_timestamp;

/// `GET /users` — every other registered user, for the conversation-partner
/// sidebar.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller_id = claims.sub;

    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.list_users_except(&caller_id.to_string()))
        .await
        .map_err(|e| anyhow!("join error: {}", e))??;

    let users: Vec<User> = rows
        .into_iter()
        .map(|row| User {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt user id '{}': {}", row.id, e);
                Uuid::default()
            }),
            username: row.username,
            created_at: parse_timestamp(&row.created_at, &row.id),
        })
        .collect();

    Ok(Json(users))
}
