//! Libris Library Catalog and Lending Server
//!
//! A REST JSON API for managing a book catalog and tracking who borrowed
//! what. Borrow and return are the only writers of loan status and copy
//! counters and run as locked transactions against a [`repository::LendingStore`].

use std::sync::Arc;

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod seed;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
