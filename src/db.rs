//! Named connection pools, opened once at startup and closed on shutdown.

use std::collections::HashMap;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use thiserror::Error;

use crate::config::DatabaseSettings;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database {0:?} is not registered")]
    Unknown(String),
    #[error("failed to connect to database {name:?}: {source}")]
    Connect {
        name: String,
        #[source]
        source: DbErr,
    },
    #[error("failed to close {} database(s): {}", .0.len(), .0.join("; "))]
    Close(Vec<String>),
}

#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    connections: HashMap<String, DatabaseConnection>,
}

impl DatabaseRegistry {
    pub async fn open(settings: &[DatabaseSettings]) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for entry in settings {
            let mut options = ConnectOptions::new(entry.url.clone());
            options
                .max_connections(entry.max_connections)
                .min_connections(entry.min_connections)
                .max_lifetime(entry.max_lifetime)
                .idle_timeout(entry.idle_timeout)
                .sqlx_logging(false);

            let conn = Database::connect(options)
                .await
                .map_err(|source| RegistryError::Connect {
                    name: entry.name.clone(),
                    source,
                })?;
            conn.ping().await.map_err(|source| RegistryError::Connect {
                name: entry.name.clone(),
                source,
            })?;

            tracing::info!(database = %entry.name, "database connected");
            registry.insert(entry.name.clone(), conn);
        }
        Ok(registry)
    }

    /// Registers an already opened connection under `name`.
    pub fn insert(&mut self, name: impl Into<String>, conn: DatabaseConnection) {
        self.connections.insert(name.into(), conn);
    }

    /// Returns a handle to the named pool. Handles share the underlying pool.
    pub fn get(&self, name: &str) -> Result<DatabaseConnection, RegistryError> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    /// Closes every pool, attempting all of them before reporting failures.
    pub async fn close(self) -> Result<(), RegistryError> {
        let mut failures = Vec::new();
        for (name, conn) in self.connections {
            match conn.close().await {
                Ok(()) => tracing::info!(database = %name, "database closed"),
                Err(err) => failures.push(format!("{name}: {err}")),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Close(failures))
        }
    }
}
