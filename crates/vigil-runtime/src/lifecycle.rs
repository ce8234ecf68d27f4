//! Process-wide engine slot.
//!
//! A process hosts at most one engine. [`initialize`] fills the slot,
//! [`engine`] hands out the shared instance and [`shutdown`] cancels its live
//! runs and empties the slot.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;
use vigil_core::{Result, VigilError};

use crate::engine::Engine;

static ENGINE: RwLock<Option<Arc<Engine>>> = RwLock::new(None);

/// Install `engine` as the process-wide engine.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if an engine is already installed.
pub fn initialize(engine: Engine) -> Result<Arc<Engine>> {
    let mut slot = ENGINE.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(VigilError::AlreadyInitialized);
    }
    let engine = Arc::new(engine);
    *slot = Some(engine.clone());
    info!("🚀 Vigil engine initialized");
    Ok(engine)
}

/// The process-wide engine.
pub fn engine() -> Result<Arc<Engine>> {
    ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(VigilError::NotInitialized)
}

/// Check if an engine is installed.
pub fn is_initialized() -> bool {
    ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Cancel live runs and empty the slot.
///
/// # Errors
///
/// Returns `NotInitialized` if no engine is installed.
pub fn shutdown() -> Result<()> {
    let engine = ENGINE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or(VigilError::NotInitialized)?;
    engine.shutdown();
    info!("👋 Vigil engine shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedAgent;
    use vigil_core::{Action, AgentRole, Registry};

    fn build() -> Engine {
        let registry = Registry::builder()
            .action(
                Action::builder("intake", AgentRole::Intake)
                    .effect("hasImage", true)
                    .build(),
            )
            .build()
            .unwrap();
        Engine::builder(registry)
            .agent("intake", ScriptedAgent::succeeding())
            .build()
            .unwrap()
    }

    // One test only: the slot is shared by every test in this binary.
    #[test]
    fn test_lifecycle() {
        assert_eq!(engine().err(), Some(VigilError::NotInitialized));
        assert_eq!(shutdown(), Err(VigilError::NotInitialized));

        let first = initialize(build()).unwrap();
        assert!(is_initialized());
        assert_eq!(initialize(build()).err(), Some(VigilError::AlreadyInitialized));
        assert!(Arc::ptr_eq(&first, &engine().unwrap()));

        shutdown().unwrap();
        assert!(first.is_shut_down());
        assert!(!is_initialized());

        let second = initialize(build()).unwrap();
        assert!(!second.is_shut_down());
        shutdown().unwrap();
    }
}
