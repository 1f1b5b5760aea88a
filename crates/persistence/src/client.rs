//! ScyllaDB connection management
//!
//! Connection behavior follows the engine's error model: a cold or briefly
//! unreachable cluster is a transient condition, so startup retries with
//! backoff before giving up (the server then falls back to the in-memory
//! layer). Host/keyspace selection flows in from the settings layer; this
//! module never reads the environment itself.

use crate::error::PersistenceError;
use crate::schema;
use scylla::{Session, SessionBuilder};
use std::sync::Arc;
use std::time::Duration;

/// ScyllaDB configuration
#[derive(Debug, Clone)]
pub struct ScyllaConfig {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u8,
    /// Per-node connection timeout
    pub connect_timeout: Duration,
    /// Connection attempts before giving up (the caller decides whether
    /// to fall back to in-memory repositories)
    pub connect_retries: u32,
    /// First retry delay; doubles per attempt
    pub initial_backoff: Duration,
}

impl Default for ScyllaConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "helmsman".to_string(),
            replication_factor: 1,
            connect_timeout: Duration::from_secs(5),
            connect_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl ScyllaConfig {
    /// Delay before the given retry attempt (1-based)
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Shared handle to one cluster session
#[derive(Clone)]
pub struct ScyllaClient {
    session: Arc<Session>,
    config: ScyllaConfig,
}

impl ScyllaClient {
    /// Connect to the cluster, retrying transient failures with backoff
    pub async fn connect(config: ScyllaConfig) -> Result<Self, PersistenceError> {
        tracing::info!(hosts = ?config.hosts, keyspace = %config.keyspace, "Connecting to ScyllaDB");

        let mut last_error = None;
        for attempt in 0..=config.connect_retries {
            if attempt > 0 {
                let delay = config.backoff_delay(attempt);
                tracing::warn!(
                    attempt,
                    max = config.connect_retries,
                    delay_ms = delay.as_millis() as u64,
                    "ScyllaDB connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }

            match SessionBuilder::new()
                .known_nodes(&config.hosts)
                .connection_timeout(config.connect_timeout)
                .build()
                .await
            {
                Ok(session) => {
                    return Ok(Self {
                        session: Arc::new(session),
                        config,
                    })
                }
                Err(e) => last_error = Some(PersistenceError::from(e)),
            }
        }

        Err(last_error
            .unwrap_or_else(|| PersistenceError::Connection("no connection attempt ran".into())))
    }

    /// Ensure keyspace and tables exist
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        schema::create_keyspace(
            &self.session,
            &self.config.keyspace,
            self.config.replication_factor,
        )
        .await?;
        schema::create_tables(&self.session, &self.config.keyspace).await?;
        tracing::info!(keyspace = %self.config.keyspace, "Schema ensured");
        Ok(())
    }

    /// One cheap read, for the deep health endpoint
    pub async fn probe(&self) -> Result<(), PersistenceError> {
        self.session
            .query_unpaged("SELECT release_version FROM system.local", &[])
            .await?;
        Ok(())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn keyspace(&self) -> &str {
        &self.config.keyspace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_doubles() {
        let config = ScyllaConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_default_targets_local_cluster() {
        let config = ScyllaConfig::default();
        assert_eq!(config.keyspace, "helmsman");
        assert_eq!(config.hosts, vec!["127.0.0.1:9042".to_string()]);
        assert!(config.connect_retries > 0);
    }
}
