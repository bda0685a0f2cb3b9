// src/lib.rs

pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod routes;
pub mod runner;
pub mod template;

use config::Config;
use db::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
}
