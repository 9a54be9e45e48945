// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observability: per-function-code and per-error-slot counters, a
//! fixed-depth overwrite-oldest trace ring, and a single synchronous event
//! sink. Every recording call is O(1) array indexing plus, at most, one
//! ring push — cheap enough to sit on the hot path unconditionally.

/// The diagnostic bucket an outcome is filed under. `Ok` covers every
/// successful completion; the rest mirror [`crate::error::Error`]'s
/// variants one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorSlot {
    Ok = 0,
    InvalidArgument,
    Timeout,
    Transport,
    Crc,
    Cancelled,
    NoResources,
    ExceptionIllegalFunction,
    ExceptionIllegalDataAddress,
    ExceptionIllegalDataValue,
    ExceptionServerDeviceFailure,
    Other,
}

const ERROR_SLOT_COUNT: usize = ErrorSlot::Other as usize + 1;

/// Which subsystem produced a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSource {
    Client,
    Server,
    Isr,
}

/// The kind of event a trace entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Submit,
    Complete,
    Dispatch,
    FrameRejected,
}

/// One entry in the trace ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub timestamp_ms: u64,
    pub source: TraceSource,
    pub event: TraceEvent,
    pub function: u8,
    pub slot: ErrorSlot,
}

/// Per-instance diagnostics state: counters, a trace ring, and an optional
/// synchronous event sink.
///
/// `TRACE_DEPTH` is a compile-time capacity (typical 16-64 entries, §4.10).
pub struct Diagnostics<'a, const TRACE_DEPTH: usize> {
    function_counters: [u64; 256],
    error_counters: [u64; ERROR_SLOT_COUNT],
    trace: heapless::Deque<TraceEntry, TRACE_DEPTH>,
    sink: Option<&'a mut dyn FnMut(&TraceEntry)>,
    counters_enabled: bool,
}

impl<const TRACE_DEPTH: usize> Default for Diagnostics<'_, TRACE_DEPTH> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<'a, const TRACE_DEPTH: usize> Diagnostics<'a, TRACE_DEPTH> {
    /// Creates an empty diagnostics block. When `counters_enabled` is
    /// `false`, [`Self::record`] still updates the trace ring and sink but
    /// skips the counter increments (a deeply embedded profile may disable
    /// them to save the array entirely via a zero-sized const, though the
    /// array here is always allocated inline).
    #[must_use]
    pub fn new(counters_enabled: bool) -> Self {
        Self {
            function_counters: [0; 256],
            error_counters: [0; ERROR_SLOT_COUNT],
            trace: heapless::Deque::new(),
            sink: None,
            counters_enabled,
        }
    }

    /// Installs a synchronous event sink. The callback must not re-enter
    /// the owning state machine.
    pub fn set_sink(&mut self, sink: &'a mut dyn FnMut(&TraceEntry)) {
        self.sink = Some(sink);
    }

    /// Records one event: increments the per-function and per-slot
    /// counters (unless disabled), pushes a trace entry (overwriting the
    /// oldest on overflow), and invokes the event sink if installed.
    pub fn record(&mut self, source: TraceSource, event: TraceEvent, function: u8, slot: ErrorSlot, now_ms: u64) {
        if self.counters_enabled {
            self.function_counters[function as usize] += 1;
            self.error_counters[slot as usize] += 1;
        }
        let entry = TraceEntry {
            timestamp_ms: now_ms,
            source,
            event,
            function,
            slot,
        };
        if self.trace.len() == TRACE_DEPTH {
            self.trace.pop_front();
        }
        // Capacity was just ensured above; this cannot fail.
        let _ = self.trace.push_back(entry);
        if let Some(sink) = self.sink.as_mut() {
            sink(&entry);
        }
    }

    /// Reads the counter for one function code.
    #[must_use]
    pub fn function_count(&self, function: u8) -> u64 {
        self.function_counters[function as usize]
    }

    /// Reads the counter for one error slot.
    #[must_use]
    pub fn error_count(&self, slot: ErrorSlot) -> u64 {
        self.error_counters[slot as usize]
    }

    /// Iterates the trace ring, oldest first.
    pub fn trace_entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter()
    }

    /// Zeroes every counter and empties the trace ring. In-flight
    /// transactions are untouched — this only clears observability state
    /// (invariant #8: idempotent reset).
    pub fn reset(&mut self) {
        self.function_counters = [0; 256];
        self.error_counters = [0; ERROR_SLOT_COUNT];
        self.trace.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_increment_both_counters() {
        let mut diag: Diagnostics<'_, 4> = Diagnostics::new(true);
        diag.record(TraceSource::Client, TraceEvent::Complete, 0x03, ErrorSlot::Ok, 100);
        diag.record(TraceSource::Client, TraceEvent::Complete, 0x03, ErrorSlot::Timeout, 200);
        assert_eq!(diag.function_count(0x03), 2);
        assert_eq!(diag.error_count(ErrorSlot::Ok), 1);
        assert_eq!(diag.error_count(ErrorSlot::Timeout), 1);
    }

    #[test]
    fn trace_ring_overwrites_oldest() {
        let mut diag: Diagnostics<'_, 2> = Diagnostics::new(true);
        for i in 0..5u64 {
            diag.record(TraceSource::Server, TraceEvent::Dispatch, 0x03, ErrorSlot::Ok, i);
        }
        let timestamps: heapless::Vec<u64, 2> = diag.trace_entries().map(|e| e.timestamp_ms).collect();
        assert_eq!(timestamps.as_slice(), &[3, 4]);
    }

    #[test]
    fn reset_clears_counters_and_trace() {
        let mut diag: Diagnostics<'_, 4> = Diagnostics::new(true);
        diag.record(TraceSource::Client, TraceEvent::Submit, 0x03, ErrorSlot::Ok, 0);
        diag.reset();
        assert_eq!(diag.function_count(0x03), 0);
        assert_eq!(diag.trace_entries().count(), 0);
    }

    #[test]
    fn sink_is_invoked_synchronously() {
        let mut observed = 0u32;
        {
            let mut sink = |entry: &TraceEntry| {
                observed += u32::from(entry.function);
            };
            let mut diag: Diagnostics<'_, 4> = Diagnostics::new(true);
            diag.set_sink(&mut sink);
            diag.record(TraceSource::Client, TraceEvent::Submit, 0x06, ErrorSlot::Ok, 0);
        }
        assert_eq!(observed, 0x06);
    }
}
