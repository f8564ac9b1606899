//! landlord/database — одна загруженная база: окружение документов + окружение на каждый индекс.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{validate_database_name, DatabaseConfig};
use crate::storage::{
    CatastrophicFailureNotification, IoChangesNotifications, OpenMode, StorageEnvironment,
    StorageEnvironmentOptions,
};

pub struct DocumentDatabase {
    config: DatabaseConfig,
    documents: Arc<StorageEnvironment>,
    indexes: RwLock<BTreeMap<String, Arc<StorageEnvironment>>>,
    notifications: Arc<IoChangesNotifications>,
    catastrophic: CatastrophicFailureNotification,
}

impl DocumentDatabase {
    /// Open the documents environment (created if missing) and every index directory found
    /// under `indexes_directory`.
    pub fn open(
        config: DatabaseConfig,
        notifications: Arc<IoChangesNotifications>,
        catastrophic: CatastrophicFailureNotification,
    ) -> Result<Self> {
        let documents = StorageEnvironment::open(
            StorageEnvironmentOptions::from_configuration(&config, OpenMode::ReadWrite),
            notifications.clone(),
            catastrophic.clone(),
        )
        .with_context(|| format!("open documents storage of '{}'", config.name))?;

        let mut indexes = BTreeMap::new();
        if config.indexes_directory.is_dir() {
            let rd = fs::read_dir(&config.indexes_directory)
                .with_context(|| format!("read_dir {}", config.indexes_directory.display()))?;
            let mut names = Vec::new();
            for e in rd {
                let e = e?;
                if e.file_type()?.is_dir() {
                    names.push(e.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            for name in names {
                let env = StorageEnvironment::open(
                    StorageEnvironmentOptions::for_index(&config, &name, OpenMode::ReadWrite),
                    notifications.clone(),
                    catastrophic.clone(),
                )
                .with_context(|| format!("open index '{}' of '{}'", name, config.name))?;
                indexes.insert(name, Arc::new(env));
            }
        }

        debug!(
            "database '{}': opened documents + {} index environment(s)",
            config.name,
            indexes.len()
        );
        Ok(Self {
            config,
            documents: Arc::new(documents),
            indexes: RwLock::new(indexes),
            notifications,
            catastrophic,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn documents(&self) -> &Arc<StorageEnvironment> {
        &self.documents
    }

    pub fn index(&self, name: &str) -> Option<Arc<StorageEnvironment>> {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Open (or create) the environment of one index.
    pub fn create_index(&self, name: &str) -> Result<Arc<StorageEnvironment>> {
        validate_database_name(name).context("index name")?;
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(env) = indexes.get(name) {
            return Ok(env.clone());
        }
        let env = Arc::new(StorageEnvironment::open(
            StorageEnvironmentOptions::for_index(&self.config, name, OpenMode::ReadWrite),
            self.notifications.clone(),
            self.catastrophic.clone(),
        )?);
        indexes.insert(name.to_string(), env.clone());
        Ok(env)
    }

    /// Documents environment first, then indexes in name order.
    pub fn get_all_storage_environments(&self) -> Vec<Arc<StorageEnvironment>> {
        let mut all = vec![self.documents.clone()];
        all.extend(
            self.indexes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned(),
        );
        all
    }

    /// Close every environment (even if other `Arc`s are still held). Returns the first error.
    pub fn close(&self) -> Result<()> {
        let mut first: Option<anyhow::Error> = None;
        for env in self.get_all_storage_environments() {
            if let Err(e) = env.close() {
                warn!("database '{}': close {} failed: {:#}", self.name(), env.path().display(), e);
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for DocumentDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentDatabase")
            .field("name", &self.config.name)
            .field("data_directory", &self.config.data_directory)
            .field("indexes", &self.index_names())
            .finish()
    }
}
