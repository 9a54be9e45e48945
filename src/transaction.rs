// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The transaction pool: a fixed array of slots the client state machine
//! allocates from on `submit()` and frees once a transaction's completion
//! callback has returned. No allocation occurs after construction.

use crate::error::Error;

/// Which QoS queue a transaction was routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

/// Where a transaction sits in its lifecycle (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    InFlight,
    Done,
    TimedOut,
    Cancelled,
    Failed,
}

impl TransactionStatus {
    /// `true` once the transaction has reached one of its four terminal
    /// states and its callback has fired.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::TimedOut | Self::Cancelled | Self::Failed)
    }
}

/// The single argument passed to a transaction's completion callback.
#[derive(Debug)]
pub struct Completion<'a> {
    pub status: TransactionStatus,
    /// The decoded response payload, present only when `status == Done`.
    pub response: Option<&'a [u8]>,
    /// The failure reason, present for every non-`Done` terminal status.
    pub error: Option<Error>,
}

/// A completion callback. Takes the transaction id (matching the handle
/// returned by `submit`) and the outcome; must not retain `response`
/// beyond the call.
pub type CompletionCallback<'a> = dyn FnMut(u16, &Completion<'_>) + 'a;

/// One pooled transaction slot.
pub struct Transaction<'a, const REQ_CAP: usize> {
    id: u16,
    unit: u8,
    function: u8,
    request: heapless::Vec<u8, REQ_CAP>,
    response: heapless::Vec<u8, REQ_CAP>,
    deadline_ms: u64,
    enqueue_ts_ms: u64,
    max_retries: u8,
    attempts: u8,
    backoff_ms: u32,
    priority: Priority,
    status: TransactionStatus,
    callback: Option<&'a mut CompletionCallback<'a>>,
    fired: bool,
}

impl<'a, const REQ_CAP: usize> Transaction<'a, REQ_CAP> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: u16,
        unit: u8,
        request_pdu: &[u8],
        deadline_ms: u64,
        enqueue_ts_ms: u64,
        max_retries: u8,
        priority: Priority,
        callback: Option<&'a mut CompletionCallback<'a>>,
    ) -> Result<Self, Error> {
        let mut request = heapless::Vec::new();
        request
            .extend_from_slice(request_pdu)
            .map_err(|()| Error::InvalidArgument("request PDU exceeds transaction scratch capacity"))?;
        let function = request_pdu.first().copied().unwrap_or(0);
        Ok(Self {
            id,
            unit,
            function,
            request,
            response: heapless::Vec::new(),
            deadline_ms,
            enqueue_ts_ms,
            max_retries,
            attempts: 0,
            backoff_ms: 0,
            priority,
            status: TransactionStatus::Pending,
            callback,
            fired: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[must_use]
    pub fn unit(&self) -> u8 {
        self.unit
    }

    #[must_use]
    pub fn function(&self) -> u8 {
        self.function
    }

    #[must_use]
    pub fn request_pdu(&self) -> &[u8] {
        &self.request
    }

    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    #[must_use]
    pub fn enqueue_ts_ms(&self) -> u64 {
        self.enqueue_ts_ms
    }

    #[must_use]
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    #[must_use]
    pub fn backoff_ms(&self) -> u32 {
        self.backoff_ms
    }

    pub(crate) fn mark_in_flight(&mut self) {
        self.status = TransactionStatus::InFlight;
    }

    /// Records a retry: bumps the attempt count and doubles the backoff up
    /// to `max_backoff_ms`. Returns `false` once retries are exhausted.
    pub(crate) fn record_retry(&mut self, initial_backoff_ms: u32, max_backoff_ms: u32) -> bool {
        if self.attempts >= self.max_retries {
            return false;
        }
        self.attempts += 1;
        let shifted = initial_backoff_ms.checked_shl(u32::from(self.attempts)).unwrap_or(u32::MAX);
        self.backoff_ms = shifted.min(max_backoff_ms);
        true
    }

    pub(crate) fn store_response(&mut self, pdu: &[u8]) -> Result<(), Error> {
        self.response.clear();
        self.response
            .extend_from_slice(pdu)
            .map_err(|()| Error::InvalidArgument("response PDU exceeds transaction scratch capacity"))
    }

    /// Drives the transaction to a terminal status and fires its callback
    /// exactly once (invariant #4); subsequent calls are no-ops.
    pub(crate) fn complete(&mut self, status: TransactionStatus, error: Option<Error>) {
        debug_assert!(status.is_terminal());
        if self.fired {
            return;
        }
        self.fired = true;
        self.status = status;
        let response = (status == TransactionStatus::Done).then_some(self.response.as_slice());
        let completion = Completion { status, response, error };
        if let Some(cb) = self.callback.as_mut() {
            cb(self.id, &completion);
        }
    }

    #[must_use]
    pub(crate) fn is_freeable(&self) -> bool {
        self.fired
    }
}

/// A fixed-size array of transaction slots. `submit` performs a linear
/// scan for the first free slot (§4.5); ids are monotonically assigned and
/// never reused while `0` remains reserved for "unassigned".
pub struct TransactionPool<'a, const N: usize, const REQ_CAP: usize> {
    slots: heapless::Vec<Option<Transaction<'a, REQ_CAP>>, N>,
    next_id: u16,
}

impl<'a, const N: usize, const REQ_CAP: usize> Default for TransactionPool<'a, N, REQ_CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize, const REQ_CAP: usize> TransactionPool<'a, N, REQ_CAP> {
    #[must_use]
    pub fn new() -> Self {
        let mut slots = heapless::Vec::new();
        for _ in 0..N {
            let _ = slots.push(None);
        }
        Self { slots, next_id: 1 }
    }

    fn next_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = if self.next_id == u16::MAX { 1 } else { self.next_id + 1 };
        id
    }

    /// Allocates a free slot and returns the new transaction's id, or
    /// `Err(NoResources)` if the pool is exhausted.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        unit: u8,
        request_pdu: &[u8],
        deadline_ms: u64,
        enqueue_ts_ms: u64,
        max_retries: u8,
        priority: Priority,
        callback: Option<&'a mut CompletionCallback<'a>>,
    ) -> Result<u16, Error> {
        let slot_idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::NoResources)?;
        let id = self.next_id();
        let txn = Transaction::new(id, unit, request_pdu, deadline_ms, enqueue_ts_ms, max_retries, priority, callback)?;
        self.slots[slot_idx] = Some(txn);
        Ok(id)
    }

    /// Looks up a transaction by id, mutably.
    pub fn get_mut(&mut self, id: u16) -> Option<&mut Transaction<'a, REQ_CAP>> {
        self.slots
            .iter_mut()
            .filter_map(Option::as_mut)
            .find(|t| t.id == id)
    }

    /// Looks up a transaction by id.
    #[must_use]
    pub fn get(&self, id: u16) -> Option<&Transaction<'a, REQ_CAP>> {
        self.slots.iter().filter_map(Option::as_ref).find(|t| t.id == id)
    }

    /// Iterates all occupied slots, mutably — used by `poll()` to advance
    /// every pending/in-flight transaction in one pass.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Transaction<'a, REQ_CAP>> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Frees every slot whose transaction has fired its callback.
    pub fn reap_completed(&mut self) {
        for slot in &mut self.slots {
            if slot.as_ref().map_or(false, Transaction::is_freeable) {
                *slot = None;
            }
        }
    }

    /// Number of slots currently occupied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
