mod app;
mod auth;
mod error;
mod handlers;
mod state;

pub use app::{auth_token, build_app};
pub use state::AppState;
