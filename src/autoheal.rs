// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The auto-heal supervisor: a circuit breaker wrapped around one
//! outstanding request stream. Trips Open after too many consecutive
//! failures and sheds load deterministically until its cooldown elapses.

/// Whether the breaker is letting attempts through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// What the supervisor decided after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoHealOutcome {
    /// Retry after `backoff_ms`.
    Scheduled { backoff_ms: u32 },
    /// Retries exhausted; the circuit is now Open.
    CircuitOpen,
}

/// Events emitted for the diagnostics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoHealEvent {
    Attempt,
    RetryScheduled { backoff_ms: u32 },
    ResponseOk,
    GiveUp,
    CircuitOpen,
    CircuitClosed,
}

/// Tunables for the breaker (§3.1 `AutoHealConfig`).
#[derive(Debug, Clone, Copy)]
pub struct AutoHealConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u32,
    pub max_backoff_ms: u32,
    pub cooldown_ms: u32,
}

impl Default for AutoHealConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
            cooldown_ms: 10_000,
        }
    }
}

/// The circuit breaker itself.
pub struct AutoHeal<'a> {
    config: AutoHealConfig,
    state: CircuitState,
    consecutive_failures: u32,
    open_until_ms: u64,
    sink: Option<&'a mut dyn FnMut(AutoHealEvent)>,
}

impl<'a> AutoHeal<'a> {
    #[must_use]
    pub fn new(config: AutoHealConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_until_ms: 0,
            sink: None,
        }
    }

    pub fn set_sink(&mut self, sink: &'a mut dyn FnMut(AutoHealEvent)) {
        self.sink = Some(sink);
    }

    fn emit(&mut self, event: AutoHealEvent) {
        if let Some(sink) = self.sink.as_mut() {
            sink(event);
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Closes the circuit if its cooldown has elapsed, then reports
    /// whether an attempt may proceed right now.
    pub fn is_open(&mut self, now_ms: u64) -> bool {
        if self.state == CircuitState::Open {
            if now_ms >= self.open_until_ms {
                self.state = CircuitState::Closed;
                self.emit(AutoHealEvent::CircuitClosed);
                false
            } else {
                true
            }
        } else {
            false
        }
    }

    /// Call before issuing a request. Returns `false` (and emits
    /// `CircuitOpen`) if the breaker is currently tripped.
    pub fn begin_attempt(&mut self, now_ms: u64) -> bool {
        if self.is_open(now_ms) {
            self.emit(AutoHealEvent::CircuitOpen);
            return false;
        }
        self.emit(AutoHealEvent::Attempt);
        true
    }

    /// Call on a successful response: resets the failure streak and, if
    /// the breaker had been tripped, closes it.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.emit(AutoHealEvent::ResponseOk);
    }

    /// Call on a failed attempt. Schedules a retry, or trips the circuit
    /// Open once `max_retries` is exceeded.
    pub fn on_failure(&mut self, now_ms: u64) -> AutoHealOutcome {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.config.max_retries {
            self.state = CircuitState::Open;
            self.open_until_ms = now_ms + u64::from(self.config.cooldown_ms);
            self.emit(AutoHealEvent::GiveUp);
            self.emit(AutoHealEvent::CircuitOpen);
            return AutoHealOutcome::CircuitOpen;
        }
        let shifted = self
            .config
            .initial_backoff_ms
            .checked_shl(self.consecutive_failures)
            .unwrap_or(u32::MAX);
        let backoff_ms = shifted.min(self.config.max_backoff_ms);
        self.emit(AutoHealEvent::RetryScheduled { backoff_ms });
        AutoHealOutcome::Scheduled { backoff_ms }
    }
}
