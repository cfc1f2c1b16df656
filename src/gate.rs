use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gate entry cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resumption {
    Proceed,
    Cancelled,
}

struct State {
    is_open: bool,
    next_id: u64,
    waiters: HashMap<u64, oneshot::Sender<Resumption>>,
}

// A waiter entry is only ever completed by whoever removes it from the map.
pub struct Gate {
    state: Mutex<State>,
}

impl Gate {
    pub fn new(initially_open: bool) -> Self {
        Self {
            state: Mutex::new(State {
                is_open: initially_open,
                next_id: 0,
                waiters: HashMap::new(),
            }),
        }
    }

    /// Passes straight through when the gate is open, otherwise waits until
    /// [`Gate::open`] is called or `cancel` fires.
    ///
    /// A caller whose token is already cancelled gets [`Cancelled`] without
    /// the gate state being looked at. Dropping the returned future while it
    /// waits removes the waiter from the gate.
    pub async fn enter(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let (id, resume) = {
            let mut state = self.state();
            if state.is_open {
                return Ok(());
            }

            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.insert(id, tx);
            (id, rx)
        };
        log::debug!("waiter {id} parked at closed gate");

        let mut waiter = Waiter {
            gate: self,
            id,
            resume,
            settled: false,
        };
        waiter.wait(cancel).await
    }

    /// Opens the gate and releases everything currently waiting.
    pub fn open(&self) {
        let released = {
            let mut state = self.state();
            state.is_open = true;
            std::mem::take(&mut state.waiters)
        };

        if !released.is_empty() {
            log::debug!("gate opened, releasing {} waiters", released.len());
        }
        for (_, handle) in released {
            // the receiver is gone if its future was dropped after the swap
            let _ = handle.send(Resumption::Proceed);
        }
    }

    pub fn close(&self) {
        self.state().is_open = false;
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open
    }

    pub fn waiter_count(&self) -> usize {
        self.state().waiters.len()
    }

    // no-op when `open` already claimed the waiter
    fn cancel_waiter(&self, id: u64) {
        let handle = self.state().waiters.remove(&id);
        if let Some(handle) = handle {
            log::debug!("waiter {id} cancelled");
            let _ = handle.send(Resumption::Cancelled);
        }
    }

    fn forget_waiter(&self, id: u64) {
        if self.state().waiters.remove(&id).is_some() {
            log::debug!("waiter {id} dropped while parked");
        }
    }

    // Nothing panics while the lock is held, so a poisoned lock still guards
    // a consistent state.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Gate")
            .field("is_open", &state.is_open)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

struct Waiter<'a> {
    gate: &'a Gate,
    id: u64,
    resume: oneshot::Receiver<Resumption>,
    settled: bool,
}

impl Waiter<'_> {
    async fn wait(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let resumed = tokio::select! {
            biased;
            resumption = &mut self.resume => Some(resumption),
            _ = cancel.cancelled() => None,
        };
        let resumption = match resumed {
            Some(resumption) => resumption,
            None => {
                self.gate.cancel_waiter(self.id);
                // completed either by us just now or by an `open` that won the race
                (&mut self.resume).await
            }
        };
        self.settled = true;

        match resumption {
            Ok(Resumption::Proceed) => Ok(()),
            Ok(Resumption::Cancelled) | Err(_) => Err(Cancelled),
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.forget_waiter(self.id);
        }
    }
}
