use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::history::TransferHistory;
use crate::core::transfer_engine;
use crate::core::{JobManager, ManagerHandle, Notifier, Orchestrator};
use crate::settings::SettingsStore;

/// Everything request handlers need, passed explicitly instead of globals.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub manager: ManagerHandle,
    pub settings: SettingsStore,
}

impl AppContext {
    pub fn new(config: AppConfig, manager: ManagerHandle) -> Self {
        let settings = SettingsStore::new(config.settings_path());
        Self {
            config: Arc::new(config),
            manager,
            settings,
        }
    }

    /// Build the manager from `config` and wire it to an orchestrator. The
    /// caller spawns [`Orchestrator::run`].
    pub fn build(config: AppConfig) -> (Self, Orchestrator) {
        let notifier = Notifier::new();
        let engine = transfer_engine::create_engine(&config);
        let history = TransferHistory::load(config.history_path());
        let (manager, events_rx) =
            JobManager::new(config.max_concurrent_jobs, engine, history, notifier.clone());
        let (orchestrator, handle) = Orchestrator::new(manager, events_rx, notifier);
        (Self::new(config, handle), orchestrator)
    }
}
