//! Per-run environment overrides

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::RunConfigStore;

/// Variables exported to every step of a run
pub type RunEnvironment = BTreeMap<String, String>;

/// Stored environment overrides for one repo or schedule name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub name: String,
    #[serde(default)]
    pub env: RunEnvironment,
}

/// Looks up the environment for a repo or schedule name
pub struct EnvironmentResolver {
    configs: Arc<dyn RunConfigStore>,
}

impl EnvironmentResolver {
    pub fn new(configs: Arc<dyn RunConfigStore>) -> Self {
        Self { configs }
    }

    /// The stored environment for `name`, or an empty one.
    ///
    /// A missing entry is the normal case. Ambiguous matches and store
    /// failures also fall back to empty so that a run never stalls on its
    /// environment.
    pub async fn resolve(&self, name: &str) -> RunEnvironment {
        match self.configs.find(name).await {
            Ok(mut found) if found.len() == 1 => {
                let config = found.remove(0);
                debug!(name, vars = config.env.len(), "Resolved run environment");
                config.env
            }
            Ok(found) if found.is_empty() => RunEnvironment::new(),
            Ok(found) => {
                warn!(name, matches = found.len(), "Ambiguous run config, using empty environment");
                RunEnvironment::new()
            }
            Err(e) => {
                warn!(name, error = %e, "Run config lookup failed, using empty environment");
                RunEnvironment::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRunConfigStore;

    fn config(name: &str, pairs: &[(&str, &str)]) -> RunConfig {
        RunConfig {
            name: name.to_string(),
            env: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_resolve_single_match() {
        let store = MemoryRunConfigStore::new(vec![
            config("org/repo", &[("DB_URL", "postgres://ci")]),
            config("nightly", &[("SLOW", "1")]),
        ]);
        let resolver = EnvironmentResolver::new(Arc::new(store));

        let env = resolver.resolve("org/repo").await;
        assert_eq!(env.get("DB_URL").map(String::as_str), Some("postgres://ci"));
        assert_eq!(env.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_missing_is_empty() {
        let resolver = EnvironmentResolver::new(Arc::new(MemoryRunConfigStore::default()));
        assert!(resolver.resolve("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_ambiguous_is_empty() {
        let store = MemoryRunConfigStore::new(vec![
            config("dup", &[("A", "1")]),
            config("dup", &[("A", "2")]),
        ]);
        let resolver = EnvironmentResolver::new(Arc::new(store));
        assert!(resolver.resolve("dup").await.is_empty());
    }
}
