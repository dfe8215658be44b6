use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::protocol::error::ErrorKind;

/// Single-flight fetch gate with a waiter list.
///
/// Exactly one caller per vacant gate is elected to fetch (it receives a
/// [`FetchPermit`]); everyone else waits for that fetch. The last fetched
/// value is retained across invalidation so a refresh can still be
/// version-compared against it.
#[derive(Debug)]
pub struct FetchGate<T> {
    state: Mutex<GateState<T>>,
}

#[derive(Debug)]
struct GateState<T> {
    value: Option<T>,
    /// False after `invalidate`: the retained value no longer satisfies
    /// reads but still participates in version comparison.
    valid: bool,
    fetching: bool,
    waiters: Vec<oneshot::Sender<Result<T, ErrorKind>>>,
}

/// Outcome of [`FetchGate::begin_try_get`].
#[derive(Debug)]
pub enum TryGet<'a, T> {
    /// This caller was elected to fetch; it must complete or fail the
    /// permit. Dropping the permit cancels all waiters.
    First(FetchPermit<'a, T>),
    Ready(T),
}

impl<T> TryGet<'_, T> {
    pub fn is_first_waiter(&self) -> bool {
        matches!(self, Self::First(_))
    }
}

impl<T: Clone> FetchGate<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                value: None,
                valid: false,
                fetching: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Get the value, electing this caller as the fetcher when the gate is
    /// vacant. Waiting fails with [`ErrorKind::Timeout`] on expiry and with
    /// the fetcher's error when the fetch fails.
    pub async fn begin_try_get(&self, timeout: Duration) -> Result<TryGet<'_, T>, ErrorKind> {
        let rx = {
            let mut state = self.state.lock();
            if state.valid {
                if let Some(value) = &state.value {
                    return Ok(TryGet::Ready(value.clone()));
                }
            }
            if !state.fetching {
                state.fetching = true;
                return Ok(TryGet::First(FetchPermit { gate: self, armed: true }));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => Err(ErrorKind::Timeout),
            // fetcher dropped without completing
            Ok(Err(_)) => Err(ErrorKind::OperationCanceled),
            Ok(Ok(result)) => result.map(TryGet::Ready),
        }
    }

    /// Current value regardless of validity (for version comparison).
    pub fn peek(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    /// Valid, readable value.
    pub fn get(&self) -> Option<T> {
        let state = self.state.lock();
        state.valid.then(|| state.value.clone()).flatten()
    }

    /// Install a fetched or pushed value. `newer(existing, incoming)`
    /// decides whether the incoming value replaces a retained one; the
    /// resident value after the decision is returned and handed to every
    /// waiter.
    pub fn complete(&self, incoming: T, newer: impl FnOnce(&T, &T) -> bool) -> T {
        let (resident, waiters) = {
            let mut state = self.state.lock();
            let replace = match &state.value {
                Some(existing) => newer(existing, &incoming),
                None => true,
            };
            if replace {
                state.value = Some(incoming);
            }
            state.valid = true;
            state.fetching = false;
            let resident = state.value.clone().expect("value was just installed");
            (resident, std::mem::take(&mut state.waiters))
        };

        for waiter in waiters {
            let _ = waiter.send(Ok(resident.clone()));
        }
        resident
    }

    /// Fail every waiter with `kind` and leave the gate vacant so the next
    /// caller re-fetches. The retained value is kept for comparison.
    pub fn fail(&self, kind: ErrorKind) {
        let waiters = {
            let mut state = self.state.lock();
            state.fetching = false;
            state.valid = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(kind));
        }
    }

    /// Mark the value stale: the next `begin_try_get` re-fetches, but the
    /// retained value still participates in version comparison.
    pub fn invalidate(&self) {
        self.state.lock().valid = false;
    }
}

impl<T: Clone> Default for FetchGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Election token of the single in-flight fetch.
#[derive(Debug)]
pub struct FetchPermit<'a, T> {
    gate: &'a FetchGate<T>,
    armed: bool,
}

impl<T: Clone> FetchPermit<'_, T> {
    /// Complete the fetch; see [`FetchGate::complete`].
    pub fn complete(mut self, incoming: T, newer: impl FnOnce(&T, &T) -> bool) -> T {
        self.armed = false;
        self.gate.complete(incoming, newer)
    }

    /// Fail the fetch; see [`FetchGate::fail`].
    pub fn fail(mut self, kind: ErrorKind) {
        self.armed = false;
        self.gate.fail(kind);
    }
}

impl<T> Drop for FetchPermit<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = {
            let mut state = self.gate.state.lock();
            state.fetching = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(ErrorKind::OperationCanceled));
        }
    }
}
