//! Read metrics
//!
//! Caller-owned accumulator threaded through lookups. Nothing here is
//! global: a batch aggregates its per-key collectors with
//! [`ReadMetrics::merge_from`].

use std::time::{Duration, Instant};

/// Counters and phase latencies for one or more lookups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadMetrics {
    /// Logical lookups recorded
    pub lookups: u64,
    /// Segments consulted
    pub segments_searched: u64,
    /// Lookups answered by a memory segment
    pub memtable_hits: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Disk entry reads issued
    pub block_reads: u64,
    pub block_read_bytes: u64,
    /// Time spent searching memory segments
    pub memtable_latency: Duration,
    /// Time spent searching disk segments
    pub sstable_latency: Duration,
}

impl ReadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add another collector's counts into this one
    pub fn merge_from(&mut self, other: &ReadMetrics) {
        self.lookups += other.lookups;
        self.segments_searched += other.segments_searched;
        self.memtable_hits += other.memtable_hits;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.block_reads += other.block_reads;
        self.block_read_bytes += other.block_read_bytes;
        self.memtable_latency += other.memtable_latency;
        self.sstable_latency += other.sstable_latency;
    }
}

/// Stage of a lookup for latency accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    Memtable,
    Sstable,
}

/// Tracks time spent per phase of one lookup
#[derive(Debug)]
pub struct PhaseTimer {
    phase: ReadPhase,
    started: Instant,
    memtable: Duration,
    sstable: Duration,
}

impl PhaseTimer {
    pub fn start() -> Self {
        Self {
            phase: ReadPhase::Memtable,
            started: Instant::now(),
            memtable: Duration::ZERO,
            sstable: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> ReadPhase {
        self.phase
    }

    /// Close the memtable stage and start timing disk segments
    pub fn enter_sstable(&mut self) {
        if self.phase == ReadPhase::Memtable {
            self.memtable += self.started.elapsed();
            self.started = Instant::now();
            self.phase = ReadPhase::Sstable;
        }
    }

    /// Stop timing and record into `metrics`
    pub fn finish(mut self, metrics: &mut ReadMetrics) {
        match self.phase {
            ReadPhase::Memtable => self.memtable += self.started.elapsed(),
            ReadPhase::Sstable => self.sstable += self.started.elapsed(),
        }
        metrics.memtable_latency += self.memtable;
        metrics.sstable_latency += self.sstable;
    }
}
