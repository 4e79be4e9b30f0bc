//! Uniform checker interface and the scheme registry that builds checkers.

mod context;
mod icmp;
mod tcp;

pub use context::{Cancellation, CheckContext, race};
pub use icmp::IcmpChecker;
pub use tcp::TcpChecker;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use crate::error::CheckError;

/// A reachability probe. `Display` shows the checker's name.
#[async_trait]
pub trait Checker: fmt::Display + Send + Sync {
    fn name(&self) -> &str;

    /// Probe the target once
    async fn check(&self, ctx: &CheckContext) -> Result<(), CheckError>;
}

/// Configuration lookup; unset variables read as the empty string
pub trait Env {
    fn get(&self, key: &str) -> String;
}

impl<F> Env for F
where
    F: Fn(&str) -> String,
{
    fn get(&self, key: &str) -> String {
        self(key)
    }
}

impl Env for HashMap<String, String> {
    fn get(&self, key: &str) -> String {
        HashMap::get(self, key).cloned().unwrap_or_default()
    }
}

/// Reads the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn get(&self, key: &str) -> String {
        std::env::var(key).unwrap_or_default()
    }
}

/// Builds a checker from `(name, address, timeout, env)`
pub type Constructor =
    fn(&str, &str, Duration, &dyn Env) -> Result<Box<dyn Checker>, CheckError>;

/// Maps an address scheme ("icmp", "tcp", ...) to its checker constructor
#[derive(Clone)]
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    /// A registry with no schemes
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register (or replace) the constructor for `scheme`
    pub fn register(&mut self, scheme: &str, constructor: Constructor) {
        self.constructors.insert(scheme.to_ascii_lowercase(), constructor);
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Build the checker for `address`, dispatching on its scheme
    pub fn build(
        &self,
        name: &str,
        address: &str,
        timeout: Duration,
        env: &dyn Env,
    ) -> Result<Box<dyn Checker>, CheckError> {
        let scheme = extract_scheme(address)?.to_ascii_lowercase();
        let constructor = self
            .constructors
            .get(&scheme)
            .ok_or(CheckError::UnknownScheme(scheme))?;
        constructor(name, address, timeout, env)
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("icmp", IcmpChecker::boxed);
        registry.register("tcp", TcpChecker::boxed);
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.schemes()).finish()
    }
}

/// The scheme in front of "://"
pub fn extract_scheme(address: &str) -> Result<&str, CheckError> {
    address
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| CheckError::MissingScheme(address.to_string()))
}

/// Drop a leading "<scheme>://" tag, case-insensitively
pub(crate) fn strip_scheme<'a>(address: &'a str, scheme: &str) -> &'a str {
    match address.split_once("://") {
        Some((tag, rest)) if tag.eq_ignore_ascii_case(scheme) => rest,
        _ => address,
    }
}
