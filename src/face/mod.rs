use crate::state::AppState;
use axum::Router;

pub mod client;
pub mod descriptor;
pub mod dto;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod matcher;
pub mod store;

pub fn router() -> Router<AppState> {
    handlers::face_routes()
}
