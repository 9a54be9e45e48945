// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plain-data configuration, built once at startup via `Default` plus
//! `with_*` builders and never mutated from the hot path (§3.1).

use crate::qos::PriorityPolicy;

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial stop-bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// RTU transport tunables.
#[derive(Debug, Clone, Copy)]
pub struct RtuConfig {
    pub baud: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Explicit T3.5 override in microseconds; wins over the
    /// baud-derived value when set (see [`crate::frame::rtu::t35_micros`]).
    pub silence_us_override: Option<u32>,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            baud: 19_200,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            silence_us_override: None,
        }
    }
}

/// TCP transport tunables.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    pub connect_timeout_ms: u32,
    pub recv_timeout_ms: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: heapless::String::new(),
            port: 502,
            connect_timeout_ms: 3_000,
            recv_timeout_ms: 1_000,
        }
    }
}

/// Client-side tunables.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub pool_size: u16,
    pub watchdog_ms: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            watchdog_ms: 5_000,
        }
    }
}

/// QoS queue tunables.
#[derive(Debug, Clone, Copy)]
pub struct QosConfig {
    pub high_capacity: u16,
    pub normal_capacity: u16,
    pub policy: PriorityPolicy,
    pub deadline_threshold_ms: u32,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            high_capacity: 8,
            normal_capacity: 32,
            policy: PriorityPolicy::FunctionCode,
            deadline_threshold_ms: 100,
        }
    }
}

/// Auto-heal supervisor tunables.
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
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            cooldown_ms: 10_000,
        }
    }
}

impl From<AutoHealConfig> for crate::autoheal::AutoHealConfig {
    fn from(c: AutoHealConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            initial_backoff_ms: c.initial_backoff_ms,
            max_backoff_ms: c.max_backoff_ms,
            cooldown_ms: c.cooldown_ms,
        }
    }
}

/// Per-function-code timeout overrides the server applies to its own
/// dispatch (§4.8): a callback region backing a long-running write can
/// blow past the normal request/response turnaround, and an operator may
/// want that surfaced as `ServerDeviceFailure` rather than left unbounded.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// `(function_code, timeout_ms)` overrides, checked before falling
    /// back to `default_timeout_ms`.
    pub function_timeouts_ms: heapless::Vec<(u8, u32), 8>,
    /// Applied to every function code with no explicit override. `None`
    /// means dispatch is never treated as having timed out.
    pub default_timeout_ms: Option<u32>,
}

impl ServerConfig {
    /// The deadline, in milliseconds, dispatching `function` must respect,
    /// if any.
    #[must_use]
    pub fn timeout_for(&self, function: u8) -> Option<u32> {
        self.function_timeouts_ms
            .iter()
            .find(|(fc, _)| *fc == function)
            .map(|(_, timeout_ms)| *timeout_ms)
            .or(self.default_timeout_ms)
    }

    /// Adds or replaces the override for one function code.
    #[must_use]
    pub fn with_timeout(mut self, function: u8, timeout_ms: u32) -> Self {
        if let Some(slot) = self.function_timeouts_ms.iter_mut().find(|(fc, _)| *fc == function) {
            slot.1 = timeout_ms;
        } else {
            let _ = self.function_timeouts_ms.push((function, timeout_ms));
        }
        self
    }

    /// Sets the fallback timeout applied to function codes with no
    /// explicit override.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout_ms: u32) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }
}

/// Diagnostics tunables.
#[derive(Debug, Clone, Copy)]
pub struct DiagConfig {
    pub counters_enabled: bool,
    pub trace_depth: u16,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            counters_enabled: true,
            trace_depth: 32,
        }
    }
}

/// The complete, process-local configuration tree.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub unit_id: u8,
    pub client: ClientConfig,
    pub rtu: RtuConfig,
    pub tcp: TcpConfig,
    pub qos: QosConfig,
    pub autoheal: AutoHealConfig,
    pub diag: DiagConfig,
    pub server: ServerConfig,
}

impl Config {
    #[must_use]
    pub fn new(unit_id: u8) -> Self {
        Self {
            unit_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_rtu(mut self, rtu: RtuConfig) -> Self {
        self.rtu = rtu;
        self
    }

    #[must_use]
    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QosConfig) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_autoheal(mut self, autoheal: AutoHealConfig) -> Self {
        self.autoheal = autoheal;
        self
    }

    #[must_use]
    pub fn with_diag(mut self, diag: DiagConfig) -> Self {
        self.diag = diag;
        self
    }

    #[must_use]
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.client.pool_size, 8);
        assert_eq!(config.rtu.baud, 19_200);
        assert_eq!(config.tcp.port, 502);
        assert_eq!(config.qos.high_capacity, 8);
        assert_eq!(config.autoheal.max_retries, 3);
        assert!(config.diag.counters_enabled);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = Config::new(17).with_client(ClientConfig { pool_size: 16, watchdog_ms: 1_000 });
        assert_eq!(config.unit_id, 17);
        assert_eq!(config.client.pool_size, 16);
    }

    #[test]
    fn server_config_timeout_falls_back_to_default() {
        let server = ServerConfig::default().with_timeout(0x10, 50).with_default_timeout(200);
        assert_eq!(server.timeout_for(0x10), Some(50));
        assert_eq!(server.timeout_for(0x03), Some(200));

        let no_default = ServerConfig::default().with_timeout(0x10, 50);
        assert_eq!(no_default.timeout_for(0x03), None);
    }
}
