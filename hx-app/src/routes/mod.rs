pub mod health;
pub mod shortcuts;
pub mod telegram;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(telegram::router())
        .merge(shortcuts::router())
}
