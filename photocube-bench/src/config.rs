//! Connection settings and dataset cardinalities, loaded from TOML.

use crate::{BenchError, BenchResult, Cardinalities};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Neo4j bolt endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "123".into(),
        }
    }
}

/// PostgreSQL endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "photocube".into(),
            password: "123".into(),
            dbname: "photocube".into(),
        }
    }
}

/// Complete benchmark configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Fixed seed for the query synthesizer; entropy when absent.
    pub seed: Option<u64>,
    pub cardinalities: Cardinalities,
    pub neo4j: Neo4jConfig,
    pub postgres: PostgresConfig,
}

impl BenchConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> BenchResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> BenchResult<Self> {
        let config: BenchConfig = toml::from_str(content)
            .map_err(|e| BenchError::Config(format!("failed to parse config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BenchResult<()> {
        self.cardinalities.validate()?;
        if self.neo4j.uri.is_empty() {
            return Err(BenchError::Config("neo4j.uri must not be empty".into()));
        }
        if self.postgres.host.is_empty() || self.postgres.dbname.is_empty() {
            return Err(BenchError::Config(
                "postgres.host and postgres.dbname must not be empty".into(),
            ));
        }
        Ok(())
    }
}
