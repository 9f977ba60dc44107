//! Process-wide named pool registry.
//!
//! `Pool::new` registers the handle under its name; `release` removes it.
//! [`get`] returns an absence signal, [`must_get`] fails loudly.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use super::pool::Pool;

fn registry() -> &'static RwLock<HashMap<String, Pool>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Pool>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a pool handle; false when the name is taken.
pub(crate) fn register(name: &str, pool: Pool) -> bool {
    let mut map = registry().write();
    if map.contains_key(name) {
        return false;
    }
    map.insert(name.to_string(), pool);
    true
}

/// Remove a released pool's entry.
pub(crate) fn unregister(name: &str) {
    registry().write().remove(name);
}

/// Look up a registered pool by name.
#[must_use]
pub fn get(name: &str) -> Option<Pool> {
    registry().read().get(name).cloned()
}

/// Look up a registered pool, panicking on absence.
///
/// # Panics
///
/// When no pool is registered under `name`.
#[must_use]
pub fn must_get(name: &str) -> Pool {
    get(name).unwrap_or_else(|| panic!("no pool registered under `{name}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::PoolOptions;
    use crate::config::PoolConfig;

    #[test]
    fn test_register_get_unregister() {
        let pool = Pool::new(
            "registry-test-pool",
            PoolOptions::with_config(PoolConfig::new().with_max_workers(2)),
        )
        .unwrap();

        let found = get("registry-test-pool").expect("registered");
        assert_eq!(found.name(), "registry-test-pool");

        // Duplicate names are refused.
        assert!(Pool::new("registry-test-pool", PoolOptions::new()).is_err());

        pool.release().unwrap();
        assert!(get("registry-test-pool").is_none());
    }

    #[test]
    #[should_panic(expected = "no pool registered under")]
    fn test_must_get_panics_on_absence() {
        let _ = must_get("registry-test-no-such-pool");
    }
}
