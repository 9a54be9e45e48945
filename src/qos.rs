// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two single-producer/single-consumer priority rings sitting between
//! `submit()` and the client state machine's dispatch loop. High always
//! drains before Normal, so a non-empty High queue is never starved
//! (invariant #5).

use crate::error::Error;
use crate::transaction::Priority;

/// How a transaction's priority is derived at enqueue time (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityPolicy {
    /// Write-single-coil/register and the diagnostics read function are
    /// High; everything else is Normal.
    FunctionCode,
    /// High if `deadline_ms - now_ms < threshold_ms`.
    Deadline { threshold_ms: u32 },
    /// Honor whatever the caller attached to the submission.
    Application,
    /// `FunctionCode` OR `Deadline`.
    Hybrid { threshold_ms: u32 },
}

fn function_code_priority(function: u8) -> Priority {
    match function {
        0x05 | 0x06 | 0x08 => Priority::High,
        _ => Priority::Normal,
    }
}

fn deadline_priority(deadline_ms: u64, now_ms: u64, threshold_ms: u32) -> Priority {
    if deadline_ms.saturating_sub(now_ms) < u64::from(threshold_ms) {
        Priority::High
    } else {
        Priority::Normal
    }
}

impl PriorityPolicy {
    /// Classifies a submission per this policy.
    #[must_use]
    pub fn classify(self, function: u8, deadline_ms: u64, now_ms: u64, requested: Priority) -> Priority {
        match self {
            Self::FunctionCode => function_code_priority(function),
            Self::Deadline { threshold_ms } => deadline_priority(deadline_ms, now_ms, threshold_ms),
            Self::Application => requested,
            Self::Hybrid { threshold_ms } => {
                if function_code_priority(function) == Priority::High
                    || deadline_priority(deadline_ms, now_ms, threshold_ms) == Priority::High
                {
                    Priority::High
                } else {
                    Priority::Normal
                }
            }
        }
    }
}

/// Running counters for the queue pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct QosStats {
    pub enqueued: u64,
    pub completed: u64,
    pub rejected_no_resources: u64,
    pub rejected_busy: u64,
    pub deadline_misses: u64,
    pub high_water_high: usize,
    pub high_water_normal: usize,
    min_latency_ms: Option<u64>,
    max_latency_ms: Option<u64>,
    total_latency_ms: u64,
}

impl QosStats {
    #[must_use]
    pub fn min_latency_ms(&self) -> Option<u64> {
        self.min_latency_ms
    }

    #[must_use]
    pub fn max_latency_ms(&self) -> Option<u64> {
        self.max_latency_ms
    }

    #[must_use]
    pub fn avg_latency_ms(&self) -> Option<u64> {
        (self.completed > 0).then_some(self.total_latency_ms / self.completed)
    }

    fn record_completion(&mut self, latency_ms: u64, missed_deadline: bool) {
        self.completed += 1;
        self.total_latency_ms += latency_ms;
        self.min_latency_ms = Some(self.min_latency_ms.map_or(latency_ms, |m| m.min(latency_ms)));
        self.max_latency_ms = Some(self.max_latency_ms.map_or(latency_ms, |m| m.max(latency_ms)));
        if missed_deadline {
            self.deadline_misses += 1;
        }
    }
}

/// The High/Normal ring pair a client submits transaction ids into.
pub struct QosQueues<const HIGH: usize, const NORMAL: usize> {
    high: heapless::spsc::Queue<u16, HIGH>,
    normal: heapless::spsc::Queue<u16, NORMAL>,
    policy: PriorityPolicy,
    stats: QosStats,
}

impl<const HIGH: usize, const NORMAL: usize> QosQueues<HIGH, NORMAL> {
    #[must_use]
    pub fn new(policy: PriorityPolicy) -> Self {
        Self {
            high: heapless::spsc::Queue::new(),
            normal: heapless::spsc::Queue::new(),
            policy,
            stats: QosStats::default(),
        }
    }

    /// Classifies and enqueues a transaction id. Fails with `NoResources`
    /// if routed High and that ring is full, or `Busy` if routed Normal
    /// and that ring is full (§4.6 backpressure contract).
    pub fn enqueue(&mut self, id: u16, function: u8, deadline_ms: u64, now_ms: u64, requested: Priority) -> Result<Priority, Error> {
        let priority = self.policy.classify(function, deadline_ms, now_ms, requested);
        match priority {
            Priority::High => {
                self.high.enqueue(id).map_err(|_| {
                    self.stats.rejected_no_resources += 1;
                    Error::NoResources
                })?;
                self.stats.high_water_high = self.stats.high_water_high.max(self.high.len());
            }
            Priority::Normal => {
                self.normal.enqueue(id).map_err(|_| {
                    self.stats.rejected_busy += 1;
                    Error::Busy
                })?;
                self.stats.high_water_normal = self.stats.high_water_normal.max(self.normal.len());
            }
        }
        self.stats.enqueued += 1;
        Ok(priority)
    }

    /// Pops the next transaction id to dispatch: High first, Normal only
    /// when High is empty.
    pub fn dequeue(&mut self) -> Option<u16> {
        self.high.dequeue().or_else(|| self.normal.dequeue())
    }

    /// `true` when neither ring has a pending id.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high.len() == 0 && self.normal.len() == 0
    }

    /// Records a completion's latency for the running statistics.
    pub fn record_completion(&mut self, latency_ms: u64, missed_deadline: bool) {
        self.stats.record_completion(latency_ms, missed_deadline);
    }

    #[must_use]
    pub fn stats(&self) -> &QosStats {
        &self.stats
    }
}
