use crate::state::AppState;
use axum::Router;

pub mod credentials;
pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod users;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
