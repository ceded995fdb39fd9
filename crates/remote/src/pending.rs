//! Table of calls waiting for a response.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Completion slot of one outstanding call.
pub type ResponseSender = oneshot::Sender<Result<Envelope>>;

#[derive(Default)]
struct Table {
    calls: HashMap<u64, ResponseSender>,
    next_id: u64,
    closed: bool,
}

/// Outstanding calls keyed by correlation id.
///
/// Every operation takes the same lock, so an id is never handed out while
/// another call still holds it.
#[derive(Default)]
pub struct PendingCalls {
    table: Mutex<Table>,
}

impl PendingCalls {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh correlation id and register its completion slot.
    ///
    /// The returned guard removes the entry when dropped, so an abandoned
    /// call never leaks its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] once [`PendingCalls::fail_all`] has run.
    pub fn register(&self) -> Result<PendingCall<'_>> {
        let (tx, rx) = oneshot::channel();

        let mut table = self.table.lock();
        if table.closed {
            return Err(Error::Disconnected);
        }

        let mut id = table.next_id;
        while table.calls.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        table.next_id = id.wrapping_add(1);
        table.calls.insert(id, tx);

        Ok(PendingCall {
            calls: self,
            id,
            rx: Some(rx),
        })
    }

    /// Resolve the call registered under `id`.
    ///
    /// Returns `false` if no such call is outstanding (already timed out,
    /// failed or never issued); `result` is dropped in that case.
    pub fn complete(&self, id: u64, result: Result<Envelope>) -> bool {
        let Some(tx) = self.table.lock().calls.remove(&id) else {
            return false;
        };
        // The caller may have given up between removal and send.
        let _ = tx.send(result);
        true
    }

    /// Remove the call registered under `id` without resolving it.
    pub fn remove(&self, id: u64) -> bool {
        self.table.lock().calls.remove(&id).is_some()
    }

    /// Resolve every outstanding call with [`Error::Disconnected`] and refuse
    /// new registrations. Returns the number of calls failed.
    pub fn fail_all(&self) -> usize {
        let calls = {
            let mut table = self.table.lock();
            table.closed = true;
            std::mem::take(&mut table.calls)
        };

        let count = calls.len();
        for (_, tx) in calls {
            let _ = tx.send(Err(Error::Disconnected));
        }
        count
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().calls.len()
    }

    /// Whether no call is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered call. Removes its table entry when dropped.
pub struct PendingCall<'a> {
    calls: &'a PendingCalls,
    id: u64,
    rx: Option<oneshot::Receiver<Result<Envelope>>>,
}

impl PendingCall<'_> {
    /// Correlation id of this call.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the call to be resolved.
    ///
    /// Resolves to [`Error::Disconnected`] if the slot is dropped without a
    /// result.
    pub async fn wait(&mut self) -> Result<Envelope> {
        match self.rx.as_mut() {
            Some(rx) => {
                let result = rx.await.unwrap_or(Err(Error::Disconnected));
                self.rx = None;
                result
            }
            None => Err(Error::Disconnected),
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.calls.remove(self.id);
        }
    }
}
