use axum::extract::FromRef;

use crate::matching::MatchCoordinator;
use std::sync::Arc;

use super::ServerConfig;

pub type GuardedMatchCoordinator = Arc<MatchCoordinator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub coordinator: GuardedMatchCoordinator,
}

impl ServerState {
    pub fn new(config: ServerConfig, coordinator: GuardedMatchCoordinator) -> Self {
        Self {
            config,
            coordinator,
        }
    }
}

impl FromRef<ServerState> for GuardedMatchCoordinator {
    fn from_ref(input: &ServerState) -> Self {
        input.coordinator.clone()
    }
}
