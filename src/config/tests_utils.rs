//! Shared test utilities for config module tests.

use std::sync::Mutex;

use super::overrides::ENV_VARS;

/// Mutex to serialize environment variable tests and prevent race conditions.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Clear every environment variable read by the config loader.
pub fn cleanup_env_vars() {
    for var in ENV_VARS {
        unsafe {
            std::env::remove_var(var);
        }
    }
}
