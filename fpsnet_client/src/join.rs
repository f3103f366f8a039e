//! Join handshake bookkeeping.
//!
//! A join request opens a ticketed pending window. The window closes when a
//! matching reply arrives, when its timeout fires, or when the connection
//! drops. Tickets stop an old timeout from failing a newer attempt.

use parking_lot::Mutex;

use crate::event::JoinFailure;

/// Where the join handshake stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStatus {
    /// No join requested yet.
    Idle,
    /// Request sent, reply outstanding.
    Pending,
    /// Reply accepted.
    Joined,
    Failed(JoinFailure),
}

/// Identifies one join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTicket(u64);

#[derive(Debug)]
pub struct JoinTracker {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    status: JoinStatus,
    ticket: u64,
}

impl Default for JoinTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: JoinStatus::Idle,
                ticket: 0,
            }),
        }
    }

    pub fn status(&self) -> JoinStatus {
        self.inner.lock().status.clone()
    }

    /// Opens a new pending window, superseding any previous one.
    pub fn begin(&self) -> JoinTicket {
        let mut inner = self.inner.lock();
        inner.ticket += 1;
        inner.status = JoinStatus::Pending;
        JoinTicket(inner.ticket)
    }

    /// Marks the join as accepted. Returns true if a request was pending.
    pub fn complete(&self) -> bool {
        let mut inner = self.inner.lock();
        let was_pending = inner.status == JoinStatus::Pending;
        inner.status = JoinStatus::Joined;
        was_pending
    }

    /// Fails the join with a timeout if `ticket` is still the pending one.
    pub fn expire(&self, ticket: JoinTicket) -> bool {
        let mut inner = self.inner.lock();
        if inner.status == JoinStatus::Pending && inner.ticket == ticket.0 {
            inner.status = JoinStatus::Failed(JoinFailure::Timeout);
            true
        } else {
            false
        }
    }

    /// Fails any pending join because the connection went away.
    pub fn abandon(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.status == JoinStatus::Pending {
            inner.status = JoinStatus::Failed(JoinFailure::Disconnected);
            true
        } else {
            false
        }
    }
}
