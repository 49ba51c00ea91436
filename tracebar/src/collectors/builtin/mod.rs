//! Collectors shipped with the crate. Each only reads [`DebugState`](crate::state::DebugState).

mod flame;
mod kpi;
mod sql;

pub use flame::FlameCollector;
pub use kpi::KpiCollector;
pub use sql::SqlCollector;

use super::registry::CollectorRegistry;
use super::types::CollectorError;

/// Register every built-in collector, enabled.
pub fn register_defaults(registry: &mut CollectorRegistry) -> Result<(), CollectorError> {
    registry.register::<KpiCollector>(true)?;
    registry.register::<FlameCollector>(true)?;
    registry.register::<SqlCollector>(true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults_order() {
        let mut registry = CollectorRegistry::new();
        register_defaults(&mut registry).unwrap();
        let keys: Vec<_> = registry.metadata().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["kpi", "flame", "sql"]);

        // A second pass collides on every key.
        assert!(matches!(
            register_defaults(&mut registry),
            Err(CollectorError::DuplicateKey { .. })
        ));
    }
}
