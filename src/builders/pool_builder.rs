//! Builders to construct live pools from configuration.

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::core::pool::{Pool, PoolOptions};
use crate::core::PoolError;

/// Build and register one pool per entry in the engine configuration.
///
/// Hooks and panic handlers are runtime objects; attach them by building
/// individual pools with [`PoolOptions`] instead when needed.
///
/// # Errors
///
/// `InvalidConfig` when validation fails; pool construction errors
/// propagate (pools already built are released).
pub fn build_pools(cfg: &EngineConfig) -> Result<HashMap<String, Pool>, PoolError> {
    cfg.validate().map_err(PoolError::InvalidConfig)?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        match Pool::new(name.clone(), PoolOptions::with_config(pool_cfg.clone())) {
            Ok(pool) => {
                pools.insert(name.clone(), pool);
            }
            Err(e) => {
                for pool in pools.values() {
                    let _ = pool.release();
                }
                return Err(e);
            }
        }
    }
    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    #[test]
    fn test_build_pools_from_config() {
        let mut cfg = EngineConfig {
            pools: HashMap::new(),
        };
        cfg.pools.insert(
            "builder-test-a".into(),
            PoolConfig::new().with_max_workers(2),
        );
        cfg.pools.insert(
            "builder-test-b".into(),
            PoolConfig::new().with_max_workers(3).with_min_workers(1),
        );

        let pools = build_pools(&cfg).unwrap();
        assert_eq!(pools.len(), 2);
        assert!(crate::core::registry::get("builder-test-a").is_some());

        for pool in pools.values() {
            pool.release().unwrap();
        }
        assert!(crate::core::registry::get("builder-test-a").is_none());
    }

    #[test]
    fn test_build_pools_rejects_invalid_config() {
        let mut cfg = EngineConfig {
            pools: HashMap::new(),
        };
        cfg.pools
            .insert("builder-bad".into(), PoolConfig::new().with_max_workers(0));
        assert!(matches!(
            build_pools(&cfg),
            Err(PoolError::InvalidConfig(_))
        ));
    }
}
