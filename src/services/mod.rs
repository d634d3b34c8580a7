//! Business logic services

pub mod catalog;
pub mod loans;
pub mod users;

use std::sync::Arc;

use crate::{clock::Clock, config::LoansConfig, repository::{LendingStore, Repository}};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub users: users::UsersService,
    pub loans: loans::LoansService,
}

impl Services {
    /// Create all services. Lending goes through `lending`, which may be the
    /// Postgres repository itself or another [`LendingStore`].
    pub fn new(
        repository: Repository,
        lending: Arc<dyn LendingStore>,
        clock: Arc<dyn Clock>,
        loans_config: LoansConfig,
    ) -> Self {
        Self {
            catalog: catalog::CatalogService::new(repository.clone()),
            users: users::UsersService::new(repository),
            loans: loans::LoansService::new(lending, clock, loans_config),
        }
    }
}
