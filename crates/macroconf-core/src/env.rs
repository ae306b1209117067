//! Environment variable sources
//!
//! Macro names that are not resolved from the document are looked up in an
//! [`EnvSource`]. The process environment is the default; tests and
//! embedding applications can substitute a fixed map or a closure.

use std::collections::HashMap;

/// A source of environment variables, read at resolution time
pub trait EnvSource: Send + Sync {
    /// Value of the variable `name`, if it is set
    fn var(&self, name: &str) -> Option<String>;
}

/// The environment of the running process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        // Names with '=' or NUL make std::env::var panic on some platforms
        if name.is_empty() || name.contains(['=', '\0']) {
            return None;
        }
        std::env::var(name).ok()
    }
}

/// A fixed set of variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// A closure-based source
pub struct FnEnv<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    func: F,
}

impl<F> FnEnv<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> EnvSource for FnEnv<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn var(&self, name: &str) -> Option<String> {
        (self.func)(name)
    }
}
