//! Engine configuration snapshot.
//!
//! Configuration is resolved once before execution and threaded through
//! context creation as an immutable snapshot; no ambient global lookups
//! inside the scheduler or node bodies.

use serde::{Deserialize, Serialize};

use crate::node::ExecutionMode;

/// Configuration for one execution pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether concurrent dispatch is enabled at all. When false every
    /// node serializes regardless of declared modes.
    #[serde(default)]
    pub parallel_enabled: bool,
    /// Worker-pool size. `0` means the number of CPU cores.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Mode applied to nodes that declared none.
    #[serde(default)]
    pub default_execution_mode: ExecutionMode,
    /// Attach a dump of live node ids to preemptive-timeout failures.
    #[serde(default)]
    pub task_dump_on_timeout: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallel_enabled: false,
            max_concurrency: 0,
            default_execution_mode: ExecutionMode::SameThread,
            task_dump_on_timeout: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration snapshot from JSON, as handed over by the
    /// configuration collaborator.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// The effective worker count: `max_concurrency`, or the CPU core
    /// count when 0, or 1 when parallel execution is disabled.
    pub fn effective_workers(&self) -> usize {
        if !self.parallel_enabled {
            return 1;
        }
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sequential() {
        let config = EngineConfig::default();
        assert!(!config.parallel_enabled);
        assert_eq!(config.default_execution_mode, ExecutionMode::SameThread);
        assert_eq!(config.effective_workers(), 1);
    }

    #[test]
    fn test_from_json_applies_field_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert!(!config.parallel_enabled);
        assert!(!config.task_dump_on_timeout);

        let config = EngineConfig::from_json(
            r#"{"parallel_enabled": true, "max_concurrency": 4, "default_execution_mode": "CONCURRENT"}"#,
        )
        .unwrap();
        assert!(config.parallel_enabled);
        assert_eq!(config.effective_workers(), 4);
        assert_eq!(config.default_execution_mode, ExecutionMode::Concurrent);
    }

    #[test]
    fn test_effective_workers_uses_cores_when_unset() {
        let config = EngineConfig {
            parallel_enabled: true,
            ..EngineConfig::default()
        };
        assert!(config.effective_workers() >= 1);
    }
}
