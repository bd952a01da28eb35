pub mod app;
pub mod auth;
pub mod config;
pub mod face;
pub mod state;
