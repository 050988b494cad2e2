//! Environment variable abstraction for testability.
//!
//! Production code uses [`Env::real()`] which delegates to [`std::env::var`].
//! Tests use [`Env::mock()`] backed by a `HashMap`, so config layering can be
//! exercised without mutating the process environment.

use std::collections::HashMap;
use std::str::FromStr;

/// Environment variable reader.
#[derive(Clone, Debug)]
pub struct Env {
    overrides: Option<HashMap<String, String>>,
}

impl Env {
    /// Create an `Env` that reads from the real process environment.
    pub fn real() -> Self {
        Self { overrides: None }
    }

    /// Create an `Env` backed by explicit key-value pairs.
    pub fn mock(vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self {
            overrides: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Look up an environment variable by name.
    pub fn var(&self, name: &str) -> Result<String, std::env::VarError> {
        match &self.overrides {
            Some(map) => map.get(name).cloned().ok_or(std::env::VarError::NotPresent),
            None => std::env::var(name),
        }
    }

    /// Look up and parse a variable.
    ///
    /// Returns `None` when unset. A value that fails to parse is reported
    /// with a warning and also yields `None`.
    pub fn parsed<T: FromStr>(&self, name: &str) -> Option<T> {
        let raw = self.var(name).ok()?;
        match raw.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "ignoring invalid environment value");
                None
            }
        }
    }

    /// Returns `true` if the variable is set to a truthy value
    /// (`1`, `true`, `yes`, `on`).
    pub fn flag(&self, name: &str) -> bool {
        self.var(name)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::real()
    }
}
