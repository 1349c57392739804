//! Allocator configuration.
//!
//! The reference policy is compiled in ([`PoolConfig::default`]). Embedding
//! programs may override it through environment variables, read once by
//! [`PoolConfig::from_env`]:
//! - `TIERALLOC_OOM_POLICY`: `terminate` (default) or `report`.
//! - `TIERALLOC_REFILL_BATCH`: objects requested per refill (default 20,
//!   at most [`MAX_REFILL_BATCH`]).
//! - `TIERALLOC_MAX_GROWTH_BYTES`: upper bound on a single pool growth
//!   request (default: uncapped).
//! - `TIERALLOC_LIFECYCLE_LOG`: `1`/`true`/`on` records slow-path lifecycle
//!   events.
//!
//! Unparsable values fall back to the default for that field.

/// Objects requested from the pool per refill in the reference policy.
pub const DEFAULT_REFILL_BATCH: usize = 20;

/// Largest accepted refill batch. Keeps `2 * MAX_SMALL_SIZE * batch` well
/// inside `usize` so a growth request is never a saturated sentinel.
pub const MAX_REFILL_BATCH: usize = 4096;

/// Environment variable names.
pub const ENV_OOM_POLICY: &str = "TIERALLOC_OOM_POLICY";
pub const ENV_REFILL_BATCH: &str = "TIERALLOC_REFILL_BATCH";
pub const ENV_MAX_GROWTH_BYTES: &str = "TIERALLOC_MAX_GROWTH_BYTES";
pub const ENV_LIFECYCLE_LOG: &str = "TIERALLOC_LIFECYCLE_LOG";

/// What happens when the system heap is exhausted on the fatal path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OomPolicy {
    /// Print `out of memory` to stderr and exit the process with status 1.
    #[default]
    Terminate,
    /// Return [`AllocError::OutOfMemory`](crate::AllocError::OutOfMemory) to
    /// the caller. Meant for tests and sandboxes that must observe the
    /// terminal condition without the process going away.
    Report,
}

impl OomPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" | "return" | "intercept" | "error" => Self::Report,
            _ => Self::Terminate,
        }
    }

    /// Returns true if exhaustion ends the process.
    #[must_use]
    pub const fn terminates(self) -> bool {
        matches!(self, Self::Terminate)
    }
}

/// Tunables for a [`PoolAllocator`](crate::PoolAllocator) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Objects requested from `chunk_alloc` per refill.
    pub refill_batch: usize,
    /// Optional ceiling on a single pool growth request. `None` keeps the
    /// uncapped `2 * demand + heap_size / 16` formula.
    pub max_growth_bytes: Option<usize>,
    /// Fatal-path behavior.
    pub oom_policy: OomPolicy,
    /// Record slow-path lifecycle events.
    pub lifecycle_logging: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            refill_batch: DEFAULT_REFILL_BATCH,
            max_growth_bytes: None,
            oom_policy: OomPolicy::Terminate,
            lifecycle_logging: false,
        }
    }
}

impl PoolConfig {
    /// Reads overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let oom_policy = lookup(ENV_OOM_POLICY)
            .map(|v| OomPolicy::from_str_loose(&v))
            .unwrap_or(defaults.oom_policy);
        let refill_batch = lookup(ENV_REFILL_BATCH)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| (1..=MAX_REFILL_BATCH).contains(n))
            .unwrap_or(defaults.refill_batch);
        let max_growth_bytes = lookup(ENV_MAX_GROWTH_BYTES)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .or(defaults.max_growth_bytes);
        let lifecycle_logging = lookup(ENV_LIFECYCLE_LOG)
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.lifecycle_logging);

        Self {
            refill_batch,
            max_growth_bytes,
            oom_policy,
            lifecycle_logging,
        }
    }

    #[must_use]
    pub fn with_oom_policy(mut self, policy: OomPolicy) -> Self {
        self.oom_policy = policy;
        self
    }

    #[must_use]
    pub fn with_refill_batch(mut self, batch: usize) -> Self {
        self.refill_batch = batch.clamp(1, MAX_REFILL_BATCH);
        self
    }

    #[must_use]
    pub fn with_max_growth_bytes(mut self, cap: Option<usize>) -> Self {
        self.max_growth_bytes = cap;
        self
    }

    #[must_use]
    pub fn with_lifecycle_logging(mut self, enabled: bool) -> Self {
        self.lifecycle_logging = enabled;
        self
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_oom_policies() {
        assert_eq!(OomPolicy::from_str_loose("terminate"), OomPolicy::Terminate);
        assert_eq!(OomPolicy::from_str_loose("REPORT"), OomPolicy::Report);
        assert_eq!(OomPolicy::from_str_loose(" intercept "), OomPolicy::Report);
        assert_eq!(OomPolicy::from_str_loose("bogus"), OomPolicy::Terminate);
    }

    #[test]
    fn default_is_reference_policy() {
        let config = PoolConfig::default();
        assert_eq!(config.refill_batch, 20);
        assert_eq!(config.max_growth_bytes, None);
        assert!(config.oom_policy.terminates());
        assert!(!config.lifecycle_logging);
    }

    #[test]
    fn lookup_overrides_every_field() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            (ENV_OOM_POLICY, "report"),
            (ENV_REFILL_BATCH, "8"),
            (ENV_MAX_GROWTH_BYTES, "65536"),
            (ENV_LIFECYCLE_LOG, "on"),
        ]));
        assert_eq!(config.oom_policy, OomPolicy::Report);
        assert_eq!(config.refill_batch, 8);
        assert_eq!(config.max_growth_bytes, Some(65536));
        assert!(config.lifecycle_logging);
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            (ENV_REFILL_BATCH, "0"),
            (ENV_MAX_GROWTH_BYTES, "lots"),
            (ENV_LIFECYCLE_LOG, "maybe"),
        ]));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn builder_clamps_refill_batch() {
        let config = PoolConfig::default().with_refill_batch(0);
        assert_eq!(config.refill_batch, 1);
        let config = PoolConfig::default().with_refill_batch(usize::MAX);
        assert_eq!(config.refill_batch, MAX_REFILL_BATCH);
    }

    #[test]
    fn oversized_refill_batch_falls_back() {
        for raw in ["18446744073709551615", "4097"] {
            let config = PoolConfig::from_lookup(lookup_from(&[(ENV_REFILL_BATCH, raw)]));
            assert_eq!(config.refill_batch, DEFAULT_REFILL_BATCH, "value {raw}");
        }
        let config = PoolConfig::from_lookup(lookup_from(&[(ENV_REFILL_BATCH, "4096")]));
        assert_eq!(config.refill_batch, MAX_REFILL_BATCH);
    }
}
