pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};

use parley_db::Database;
use parley_gateway::presence::Presence;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub presence: Presence,
    pub jwt_secret: String,
}

/// Build the REST router. The WebSocket gateway route is wired up by the
/// server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/messages/send/{receiver_id}", post(messages::send_message))
        .route("/messages/read/{counterpart_id}", put(messages::mark_messages_read))
        .route("/messages/unread/counts", get(messages::get_unread_counts))
        .route("/messages/recent/all", get(messages::get_recent_messages))
        .route("/messages/{counterpart_id}", get(messages::get_messages))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
