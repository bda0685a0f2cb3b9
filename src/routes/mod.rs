// src/routes/mod.rs

pub mod campaigns;
pub mod contacts;
pub mod dashboard;
pub mod emails;
pub mod templates;

use axum::Router;

use crate::AppState;

/// All resource routers under /api.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/contacts", contacts::router())
        .nest("/templates", templates::router())
        .nest("/campaigns", campaigns::router())
        .nest("/emails", emails::router())
        .nest("/dashboard", dashboard::router())
}
