//! In-process directory for publishing pools under a name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{PoolError, Result};
use crate::pool::ConnectionPool;

/// Name to pool bindings.
///
/// The directory only hands out shared handles; unbinding a pool does not
/// shut it down.
#[derive(Debug, Default)]
pub struct PoolDirectory {
    pools: RwLock<HashMap<String, Arc<ConnectionPool>>>,
}

impl PoolDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `pool` under `name`.
    pub fn bind(&self, name: impl Into<String>, pool: Arc<ConnectionPool>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PoolError::Naming("name can't be blank".to_string()));
        }
        let mut pools = self.pools.write();
        if pools.contains_key(&name) {
            return Err(PoolError::Naming(format!("'{name}' is already bound")));
        }
        tracing::debug!(name = %name, "pool bound");
        pools.insert(name, pool);
        Ok(())
    }

    /// Look up the pool bound under `name`.
    pub fn lookup(&self, name: &str) -> Result<Arc<ConnectionPool>> {
        self.pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::Naming(format!("'{name}' is not bound")))
    }

    /// Remove the binding for `name`, returning the pool.
    pub fn unbind(&self, name: &str) -> Result<Arc<ConnectionPool>> {
        let pool = self
            .pools
            .write()
            .remove(name)
            .ok_or_else(|| PoolError::Naming(format!("'{name}' is not bound")))?;
        tracing::debug!(name = %name, "pool unbound");
        Ok(pool)
    }

    /// Bound names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pools.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use beecp_testing::{MOCK_DRIVER_NAME, MOCK_URL, mock_registry};

    use super::*;
    use crate::config::PoolConfig;

    fn pool() -> Arc<ConnectionPool> {
        let (registry, _) = mock_registry();
        let config = PoolConfig::new(MOCK_DRIVER_NAME, MOCK_URL, "", "");
        Arc::new(ConnectionPool::initialize(config, &registry).unwrap())
    }

    #[test]
    fn test_bind_lookup_unbind() {
        let directory = PoolDirectory::new();
        let pool = pool();
        directory.bind("jdbc/main", Arc::clone(&pool)).unwrap();

        let found = directory.lookup("jdbc/main").unwrap();
        assert!(Arc::ptr_eq(&found, &pool));
        assert_eq!(directory.names(), vec!["jdbc/main".to_string()]);

        directory.unbind("jdbc/main").unwrap();
        assert!(matches!(
            directory.lookup("jdbc/main").unwrap_err(),
            PoolError::Naming(_)
        ));
        // still usable after unbind
        assert!(!pool.is_closed());
    }

    #[test]
    fn test_double_bind_is_rejected() {
        let directory = PoolDirectory::new();
        directory.bind("main", pool()).unwrap();
        assert!(matches!(
            directory.bind("main", pool()).unwrap_err(),
            PoolError::Naming(_)
        ));
    }

    #[test]
    fn test_unbind_unknown_and_blank_names() {
        let directory = PoolDirectory::new();
        assert!(directory.unbind("missing").is_err());
        assert!(directory.bind("  ", pool()).is_err());
    }
}
