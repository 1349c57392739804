//! Workload scenario catalogue.

use serde::Serialize;

use crate::error::HarnessError;

pub const DEFAULT_SEED: u64 = 0x7A11_A10C;
pub const DEFAULT_OPS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Random allocate/free across all sixteen classes.
    SizeClassChurn,
    /// Only requests above the small threshold; the pool must stay empty.
    LargeBypass,
    /// Forces a sub-object remainder and checks it is donated before growth.
    RemainderGrowth,
    /// Starves the heap and checks idle larger blocks are reused, then that
    /// exhaustion is reported.
    Cannibalize,
    /// Mixed allocate/free/realloc over small and large sizes.
    RandomChurn,
}

impl Scenario {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SizeClassChurn => "size_class_churn",
            Self::LargeBypass => "large_bypass",
            Self::RemainderGrowth => "remainder_growth",
            Self::Cannibalize => "cannibalize",
            Self::RandomChurn => "random_churn",
        }
    }

    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::SizeClassChurn,
            Self::LargeBypass,
            Self::RemainderGrowth,
            Self::Cannibalize,
            Self::RandomChurn,
        ]
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::SizeClassChurn => "allocate/free churn across all size classes",
            Self::LargeBypass => "requests above 128 bytes bypass the pool",
            Self::RemainderGrowth => "pool remainder is donated before the pool grows",
            Self::Cannibalize => "exhausted heap reuses idle larger blocks, then reports OOM",
            Self::RandomChurn => "mixed allocate/free/realloc with content checks",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, HarnessError> {
        let wanted = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::all()
            .into_iter()
            .find(|s| s.as_str() == wanted)
            .ok_or_else(|| HarnessError::UnknownScenario {
                name: name.to_string(),
            })
    }

    /// Resolves a CLI selector: a scenario name or `all`.
    pub fn select(selector: &str) -> Result<Vec<Self>, HarnessError> {
        if selector.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::all().to_vec());
        }
        Ok(vec![Self::from_name(selector)?])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScenarioOptions {
    pub seed: u64,
    /// Operation budget for the randomized scenarios.
    pub ops: usize,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            ops: DEFAULT_OPS,
        }
    }
}

/// Parses a decimal or `0x` hex seed; underscores are ignored.
pub fn parse_seed(raw: &str) -> Result<u64, HarnessError> {
    let s = raw.trim().replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|_| HarnessError::InvalidSeed {
        raw: raw.to_string(),
    })
}

/// Deterministic xorshift64* generator.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of the shift sequence.
        Self {
            state: if seed == 0 { DEFAULT_SEED } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish value in `low..=high_inclusive`.
    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        debug_assert!(low <= high_inclusive);
        let span = (high_inclusive - low) as u64 + 1;
        low + (self.next_u64() % span) as usize
    }

    /// True with probability `percent / 100`.
    pub fn chance(&mut self, percent: u64) -> bool {
        self.next_u64() % 100 < percent
    }
}
