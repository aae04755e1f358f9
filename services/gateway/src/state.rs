use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use classlog_merkle::{AsyncMerkle, Merkle, StreamStorage};
use classlog_reducer::ReducerCatalog;

use crate::auth::Authenticator;
use crate::blacklist::BlacklistRules;
use crate::config::{GatewayConfig, RunMode};

#[derive(Clone)]
pub struct AppState {
    pub merkle: Arc<AsyncMerkle<Box<dyn StreamStorage>>>,
    pub reducers: Arc<ReducerCatalog>,
    pub reducer_generation: Arc<AtomicU64>,
    pub blacklist: Arc<BlacklistRules>,
    pub authenticator: Arc<dyn Authenticator>,
    pub run_mode: RunMode,
    pub traceback_dir: Arc<str>,
    pub study_log_dir: Arc<str>,
}

impl AppState {
    pub fn new(
        config: &GatewayConfig,
        reducers: ReducerCatalog,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let storage: Box<dyn StreamStorage> = classlog_merkle::store_from_name(
            &config.merkle.store,
            config.merkle.fs_root.as_deref().map(std::path::Path::new),
        )?;
        let categories: HashSet<String> = config.merkle.categories.iter().cloned().collect();
        let merkle = Merkle::with_categories(Arc::new(storage), categories);
        let blacklist = BlacklistRules::compile(&config.blacklist)?;

        Ok(AppState {
            merkle: Arc::new(AsyncMerkle::new(merkle)),
            reducers: Arc::new(reducers),
            reducer_generation: Arc::new(AtomicU64::new(0)),
            blacklist: Arc::new(blacklist),
            authenticator,
            run_mode: config.run_mode,
            traceback_dir: Arc::from(config.traceback_dir.as_str()),
            study_log_dir: Arc::from("/var/log/classlog/study"),
        })
    }

    pub fn bump_reducer_generation(&self) {
        self.reducer_generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reducer_generation(&self) -> u64 {
        self.reducer_generation.load(Ordering::SeqCst)
    }
}
