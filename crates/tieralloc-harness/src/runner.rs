//! Scenario execution engine.
//!
//! Every scenario gets a fresh [`PoolAllocator`] over a [`LimitedHeap`] with
//! the OOM policy forced to `Report`, so exhaustion is observable instead of
//! terminating the harness. Live blocks are tracked by address; each
//! allocation is checked for overlap with every other live block and filled
//! with a tag that is verified again before the block is released.

use std::collections::BTreeMap;
use std::io::Write;
use std::ptr::NonNull;
use std::time::Instant;

use serde::Serialize;
use tieralloc_core::size_class::{ALIGN, NUM_SIZE_CLASSES, classify, is_small, round_up};
use tieralloc_core::{LimitedHeap, OomPolicy, PoolAllocator, PoolConfig, PoolStats};

use crate::error::HarnessError;
use crate::scenario::{Scenario, ScenarioOptions, XorShift64};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// Serializable copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub heap_size: usize,
    pub pool_bytes_left: usize,
    pub chunk_count: usize,
    pub free_blocks: [usize; NUM_SIZE_CLASSES],
    pub free_bytes: usize,
    pub refills: u64,
    pub growth_events: u64,
    pub cannibalizations: u64,
    pub donations: u64,
    pub large_forwards: u64,
    pub fatal_fallbacks: u64,
}

impl From<PoolStats> for StatsSnapshot {
    fn from(stats: PoolStats) -> Self {
        Self {
            heap_size: stats.heap_size,
            pool_bytes_left: stats.pool_bytes_left,
            chunk_count: stats.chunk_count,
            free_blocks: stats.free_blocks,
            free_bytes: stats.free_bytes(),
            refills: stats.refills,
            growth_events: stats.growth_events,
            cannibalizations: stats.cannibalizations,
            donations: stats.donations,
            large_forwards: stats.large_forwards,
            fatal_fallbacks: stats.fatal_fallbacks,
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub seed: u64,
    /// Allocator calls issued (allocate, deallocate, reallocate).
    pub ops_executed: usize,
    pub peak_live_blocks: usize,
    pub passed: bool,
    pub violations: Vec<String>,
    pub lifecycle_events: usize,
    pub duration_ms: u64,
    pub stats: StatsSnapshot,
}

/// Runs scenarios and streams their logs to an emitter.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    options: ScenarioOptions,
    config: PoolConfig,
}

impl ScenarioRunner {
    /// Runner using the environment's pool configuration.
    #[must_use]
    pub fn new(options: ScenarioOptions) -> Self {
        Self::with_config(options, PoolConfig::from_env())
    }

    /// Runner with an explicit pool configuration. The OOM policy is always
    /// overridden to `Report` and lifecycle logging is always on.
    #[must_use]
    pub fn with_config(options: ScenarioOptions, config: PoolConfig) -> Self {
        Self {
            options,
            config: config
                .with_oom_policy(OomPolicy::Report)
                .with_lifecycle_logging(true),
        }
    }

    #[must_use]
    pub fn options(&self) -> ScenarioOptions {
        self.options
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn run<W: Write>(
        &self,
        scenario: Scenario,
        emitter: &mut LogEmitter<W>,
    ) -> Result<ScenarioResult, HarnessError> {
        let name = scenario.as_str();
        emitter.emit_entry(
            LogEntry::new(String::new(), LogLevel::Info, "scenario_start")
                .with_scenario(name)
                .with_details(serde_json::json!({
                    "seed": self.options.seed,
                    "ops": self.options.ops,
                    "refill_batch": self.config.refill_batch,
                    "max_growth_bytes": self.config.max_growth_bytes,
                })),
        )?;

        let started = Instant::now();
        let mut ctx = Workload::new(self.config, self.options.seed);
        let body = match scenario {
            Scenario::SizeClassChurn => ctx.size_class_churn(self.options.ops),
            Scenario::LargeBypass => ctx.large_bypass(self.options.ops),
            Scenario::RemainderGrowth => ctx.remainder_growth(self.options.ops),
            Scenario::Cannibalize => ctx.cannibalize(),
            Scenario::RandomChurn => ctx.random_churn(self.options.ops),
        };
        match body {
            Ok(()) => {}
            Err(HarnessError::Alloc(err)) => {
                ctx.violation(format!("unexpected allocator error: {err}"));
            }
            Err(other) => return Err(other),
        }
        ctx.release_all();
        let duration_ms = started.elapsed().as_millis() as u64;

        let records = ctx.pool.drain_lifecycle_logs();
        for record in &records {
            emitter.emit_entry(LogEntry::from_lifecycle(record, name))?;
        }

        let stats = ctx.pool.stats();
        let passed = ctx.violations.is_empty();
        let (level, outcome) = if passed {
            (LogLevel::Info, Outcome::Pass)
        } else {
            (LogLevel::Error, Outcome::Fail)
        };
        emitter.emit_entry(
            LogEntry::new(String::new(), level, "scenario_end")
                .with_scenario(name)
                .with_outcome(outcome)
                .with_pool(stats.heap_size, stats.pool_bytes_left)
                .with_duration_ms(duration_ms)
                .with_details(serde_json::json!({
                    "ops_executed": ctx.ops,
                    "violations": ctx.violations,
                    "growth_events": stats.growth_events,
                    "cannibalizations": stats.cannibalizations,
                })),
        )?;
        emitter.flush()?;

        Ok(ScenarioResult {
            scenario,
            seed: self.options.seed,
            ops_executed: ctx.ops,
            peak_live_blocks: ctx.peak_live,
            passed,
            violations: ctx.violations,
            lifecycle_events: records.len(),
            duration_ms,
            stats: stats.into(),
        })
    }

    /// Runs each scenario in order; stops at the first I/O failure.
    pub fn run_all<W: Write>(
        &self,
        scenarios: &[Scenario],
        emitter: &mut LogEmitter<W>,
    ) -> Result<Vec<ScenarioResult>, HarnessError> {
        scenarios.iter().map(|&s| self.run(s, emitter)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveBlock {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

/// Bytes a block of `size` actually occupies.
fn footprint(size: usize) -> usize {
    if is_small(size) {
        round_up(size).max(ALIGN)
    } else {
        size
    }
}

struct Workload {
    pool: PoolAllocator<LimitedHeap>,
    config: PoolConfig,
    rng: XorShift64,
    live: BTreeMap<usize, LiveBlock>,
    /// Live addresses in allocation order; random picks index this so the
    /// op sequence does not depend on where the heap places blocks.
    order: Vec<usize>,
    violations: Vec<String>,
    ops: usize,
    peak_live: usize,
    last_heap_size: usize,
}

impl Workload {
    fn new(config: PoolConfig, seed: u64) -> Self {
        Self {
            pool: PoolAllocator::with_heap(LimitedHeap::with_budget(usize::MAX), config),
            config,
            rng: XorShift64::new(seed),
            live: BTreeMap::new(),
            order: Vec::new(),
            violations: Vec::new(),
            ops: 0,
            peak_live: 0,
            last_heap_size: 0,
        }
    }

    fn violation(&mut self, message: String) {
        // Keep reports bounded when an invariant breaks in a loop.
        if self.violations.len() < 64 {
            self.violations.push(message);
        }
    }

    fn next_tag(&mut self) -> u8 {
        (self.ops % 251) as u8 + 1
    }

    fn check_heap_monotonic(&mut self) {
        let heap = self.pool.heap_size();
        if heap < self.last_heap_size {
            self.violation(format!(
                "heap_size shrank from {} to {heap}",
                self.last_heap_size
            ));
        }
        self.last_heap_size = heap;
    }

    /// Registers a fresh block: overlap check, ownership check, tag fill.
    fn track(&mut self, ptr: NonNull<u8>, size: usize) {
        let addr = ptr.as_ptr() as usize;
        let end = addr + footprint(size);

        if addr % ALIGN != 0 {
            self.violation(format!("block {addr:#x} is not {ALIGN}-byte aligned"));
        }
        if let Some((&prev, block)) = self.live.range(..=addr).next_back()
            && prev + footprint(block.size) > addr
        {
            self.violation(format!(
                "block {addr:#x}+{size} overlaps live block {prev:#x}+{}",
                block.size
            ));
        }
        if let Some((&next, block)) = self.live.range(addr..).next()
            && next < end
        {
            self.violation(format!(
                "block {addr:#x}+{size} overlaps live block {next:#x}+{}",
                block.size
            ));
        }
        let owned = self.pool.owns(ptr);
        if is_small(size) != owned {
            self.violation(format!(
                "block {addr:#x} of {size} bytes: pool ownership is {owned}"
            ));
        }

        let tag = self.next_tag();
        // SAFETY: the allocator just handed out at least `size` bytes at `ptr`.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), tag, size) };
        self.live.insert(addr, LiveBlock { ptr, size, tag });
        self.order.push(addr);
        self.peak_live = self.peak_live.max(self.live.len());
    }

    fn verify(&mut self, block: &LiveBlock, bytes: usize) {
        // SAFETY: `block` is live and spans at least `bytes` bytes.
        let data = unsafe { std::slice::from_raw_parts(block.ptr.as_ptr(), bytes) };
        if let Some(offset) = data.iter().position(|&b| b != block.tag) {
            let addr = block.ptr.as_ptr() as usize;
            self.violation(format!(
                "block {addr:#x} corrupted at offset {offset} (expected tag {})",
                block.tag
            ));
        }
    }

    fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, HarnessError> {
        self.ops += 1;
        let ptr = self.pool.allocate(size)?;
        self.track(ptr, size);
        self.check_heap_monotonic();
        Ok(ptr)
    }

    fn untrack(&mut self, addr: usize) -> Option<LiveBlock> {
        let block = self.live.remove(&addr)?;
        if let Some(pos) = self.order.iter().rposition(|&a| a == addr) {
            self.order.swap_remove(pos);
        }
        Some(block)
    }

    fn free(&mut self, addr: usize) {
        let Some(block) = self.untrack(addr) else {
            return;
        };
        self.verify(&block, block.size);
        self.ops += 1;
        // SAFETY: `block` came from this pool with exactly `block.size` bytes
        // and is no longer tracked.
        unsafe { self.pool.deallocate(block.ptr, block.size) };
    }

    fn random_live(&mut self) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0, self.order.len() - 1);
        Some(self.order[idx])
    }

    fn free_random(&mut self) {
        if let Some(addr) = self.random_live() {
            self.free(addr);
        }
    }

    fn realloc(&mut self, addr: usize, new_size: usize) -> Result<(), HarnessError> {
        let Some(block) = self.untrack(addr) else {
            return Ok(());
        };
        self.verify(&block, block.size);
        self.ops += 1;
        // SAFETY: `block` came from this pool with exactly `block.size` bytes.
        let moved = match unsafe { self.pool.reallocate(block.ptr, block.size, new_size) } {
            Ok(moved) => moved,
            Err(err) => {
                // The old block is still valid on failure.
                self.live.insert(addr, block);
                self.order.push(addr);
                return Err(err.into());
            }
        };
        let kept = LiveBlock {
            ptr: moved,
            size: block.size.min(new_size),
            tag: block.tag,
        };
        self.verify(&kept, kept.size);
        if footprint(block.size) == footprint(new_size)
            && is_small(block.size)
            && is_small(new_size)
            && moved != block.ptr
        {
            self.violation(format!(
                "same-class realloc {} -> {new_size} moved {addr:#x}",
                block.size
            ));
        }
        self.track(moved, new_size);
        self.check_heap_monotonic();
        Ok(())
    }

    fn release_all(&mut self) {
        while let Some(&addr) = self.order.last() {
            self.free(addr);
        }
    }

    fn size_class_churn(&mut self, ops: usize) -> Result<(), HarnessError> {
        while self.ops < ops {
            if self.live.is_empty() || self.rng.chance(55) {
                let class = self.rng.gen_range(0, NUM_SIZE_CLASSES - 1);
                let size = self.rng.gen_range(class * ALIGN + 1, (class + 1) * ALIGN);
                self.alloc(size)?;
            } else if self.rng.chance(20) {
                // A freed block is the next one handed out for its class.
                let Some(addr) = self.random_live() else {
                    continue;
                };
                let size = self.live[&addr].size;
                self.free(addr);
                let again = self.alloc(size)?;
                if again.as_ptr() as usize != addr {
                    self.violation(format!(
                        "class {} did not reuse freed block {addr:#x}",
                        classify(size)
                    ));
                }
            } else {
                self.free_random();
            }
        }
        Ok(())
    }

    fn large_bypass(&mut self, ops: usize) -> Result<(), HarnessError> {
        let rounds = ops.clamp(1, 2_000);
        for _ in 0..rounds {
            let size = self.rng.gen_range(129, 8_192);
            self.alloc(size)?;
            if self.rng.chance(30) {
                if let Some(addr) = self.random_live() {
                    let new_size = self.rng.gen_range(129, 8_192);
                    self.realloc(addr, new_size)?;
                }
            } else if self.rng.chance(40) {
                self.free_random();
            }
            if self.pool.heap_size() != 0 {
                self.violation(format!(
                    "large-only traffic grew the pool to {} bytes",
                    self.pool.heap_size()
                ));
                break;
            }
        }

        self.alloc(8)?;
        let expected = 2 * ALIGN * self.config.refill_batch.max(1);
        if self.config.max_growth_bytes.is_none() && self.pool.heap_size() != expected {
            self.violation(format!(
                "first small request grew the pool by {} bytes, expected {expected}",
                self.pool.heap_size()
            ));
        }
        if self.pool.stats().large_forwards != rounds as u64 {
            self.violation(format!(
                "{} large forwards recorded for {rounds} large allocations",
                self.pool.stats().large_forwards
            ));
        }
        Ok(())
    }

    fn remainder_growth(&mut self, ops: usize) -> Result<(), HarnessError> {
        const SIZES: [usize; 6] = [8, 24, 40, 72, 120, 128];
        let rounds = ops.clamp(3, 4_000);
        let batch = self.config.refill_batch.max(1);

        for i in 0..rounds {
            let size = match i {
                0 => 8,
                1 | 2 => 128,
                _ => SIZES[self.rng.gen_range(0, SIZES.len() - 1)],
            };
            let block = round_up(size);
            let heap_before = self.pool.heap_size();
            let left_before = self.pool.pool_bytes_left();
            let donated_class = (left_before > 0).then(|| classify(left_before));
            let donated_before = donated_class.map_or(0, |c| self.pool.free_count(c));
            let donations_before = self.pool.stats().donations;

            self.alloc(size)?;

            let grown = self.pool.heap_size() - heap_before;
            if grown == 0 {
                continue;
            }
            if self.config.max_growth_bytes.is_none() {
                let expected = 2 * block * batch + round_up(heap_before >> 4);
                if grown != expected {
                    self.violation(format!(
                        "pool grew by {grown} bytes for {size}-byte request, expected {expected}"
                    ));
                }
            }
            if let Some(class) = donated_class {
                let stats = self.pool.stats();
                if stats.donations != donations_before + 1
                    || self.pool.free_count(class) != donated_before + 1
                {
                    self.violation(format!(
                        "{left_before}-byte remainder was not donated to class {class} before growth"
                    ));
                }
            }
        }

        let stats = self.pool.stats();
        if stats.growth_events > 1 && stats.donations == 0 {
            self.violation("pool grew repeatedly without donating a remainder".to_string());
        }
        Ok(())
    }

    fn cannibalize(&mut self) -> Result<(), HarnessError> {
        let batch = self.config.refill_batch.max(1);

        // Park a batch of idle 128-byte blocks on the last list.
        let mut parked = Vec::with_capacity(batch);
        for _ in 0..batch {
            parked.push(self.alloc(128)?.as_ptr() as usize);
        }
        for addr in parked {
            self.free(addr);
        }
        let idle_large = self.pool.free_count(NUM_SIZE_CLASSES - 1);
        let heap_at_exhaustion = self.pool.heap_size();
        self.pool.heap_mut().exhaust();

        // Drain with 64-byte requests until the pool gives up.
        let limit = 64 * (idle_large + batch) + 1_024;
        let mut exhausted = false;
        for _ in 0..limit {
            self.ops += 1;
            match self.pool.allocate(64) {
                Ok(ptr) => {
                    self.track(ptr, 64);
                    self.check_heap_monotonic();
                }
                Err(err) if err.is_out_of_memory() => {
                    exhausted = true;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let stats = self.pool.stats();
        if !exhausted {
            self.violation(format!("exhausted heap never reported OOM within {limit} requests"));
        }
        if idle_large > 0 && stats.cannibalizations == 0 {
            self.violation(format!(
                "{idle_large} idle 128-byte blocks were never cannibalized"
            ));
        }
        if stats.heap_size != heap_at_exhaustion {
            self.violation(format!(
                "pool grew from {heap_at_exhaustion} to {} on an exhausted heap",
                stats.heap_size
            ));
        }
        if stats.fatal_fallbacks == 0 {
            self.violation("fatal path was never reached".to_string());
        }

        // The pool keeps working once the heap recovers.
        self.pool.heap_mut().restore();
        self.alloc(64)?;
        if self.pool.heap_size() <= heap_at_exhaustion {
            self.violation("pool did not grow after the heap recovered".to_string());
        }
        Ok(())
    }

    fn random_churn(&mut self, ops: usize) -> Result<(), HarnessError> {
        while self.ops < ops {
            let roll = self.rng.gen_range(0, 99);
            if roll < 50 || self.live.is_empty() {
                let size = if self.rng.chance(85) {
                    self.rng.gen_range(0, 128)
                } else {
                    self.rng.gen_range(129, 1_024)
                };
                self.alloc(size)?;
            } else if roll < 85 {
                self.free_random();
            } else if let Some(addr) = self.random_live() {
                let new_size = self.rng.gen_range(1, 512);
                self.realloc(addr, new_size)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured_log::validate_log_line;

    fn runner(ops: usize) -> ScenarioRunner {
        ScenarioRunner::with_config(
            ScenarioOptions { seed: 0xC0FFEE, ops },
            PoolConfig::default(),
        )
    }

    #[test]
    fn every_scenario_passes_with_reference_config() {
        let mut emitter = LogEmitter::to_buffer("unit");
        let results = runner(3_000).run_all(&Scenario::all(), &mut emitter).unwrap();
        for result in &results {
            assert!(result.passed, "{}: {:?}", result.scenario.as_str(), result.violations);
        }
    }

    #[test]
    fn runner_forces_report_policy_and_logging() {
        let r = ScenarioRunner::with_config(ScenarioOptions::default(), PoolConfig::default());
        assert_eq!(r.config().oom_policy, OomPolicy::Report);
        assert!(r.config().lifecycle_logging);
    }

    #[test]
    fn cannibalize_scenario_reports_its_slow_paths() {
        let mut emitter = LogEmitter::to_buffer("unit");
        let result = runner(100).run(Scenario::Cannibalize, &mut emitter).unwrap();
        assert!(result.passed, "{:?}", result.violations);
        assert!(result.stats.cannibalizations > 0);
        assert!(result.stats.fatal_fallbacks > 0);

        let text = String::from_utf8(emitter.into_inner()).unwrap();
        let events: Vec<String> = text
            .lines()
            .enumerate()
            .map(|(i, line)| validate_log_line(line, i + 1).unwrap().event)
            .collect();
        assert_eq!(events.first().map(String::as_str), Some("scenario_start"));
        assert_eq!(events.last().map(String::as_str), Some("scenario_end"));
        assert!(events.iter().any(|e| e == "cannibalize"));
        assert!(events.iter().any(|e| e == "fatal_oom"));
        assert_eq!(result.lifecycle_events, events.len() - 2);
    }

    #[test]
    fn footprint_rounds_only_small_sizes() {
        assert_eq!(footprint(0), 8);
        assert_eq!(footprint(13), 16);
        assert_eq!(footprint(128), 128);
        assert_eq!(footprint(129), 129);
    }
}
