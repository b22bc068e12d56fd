//! Waiter Registry
//!
//! Ticket-addressed wakeups. Each blocking operation gets a ticket and a
//! pooled [`Condition`], so the owner of a queue can wake exactly the
//! waiters whose turn has come instead of broadcasting to everyone.
//!
//! The registry lives inside the state protected by the owner's
//! [`Lock`](crate::Lock); every method requires that lock to be held.

use std::collections::HashMap;
use std::sync::Arc;

use crate::sync::{Condition, LockGuard};

/// Identifies one logical waiting operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    /// Raw ticket number
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Waiter {
    condition: Arc<Condition>,
    /// Threads currently parked on this ticket
    parked: usize,
    signaled: bool,
}

/// Ticket to condition mapping with a free pool
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    next_ticket: u64,
    waiters: HashMap<Ticket, Waiter>,
    free: Vec<Arc<Condition>>,
}

impl WaiterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh ticket without registering a waiter
    pub fn next_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    /// Allocate a ticket and register one waiter on it
    pub fn register(&mut self) -> Ticket {
        let ticket = self.next_ticket();
        self.enter(ticket);
        ticket
    }

    /// Register one more waiter on `ticket`
    pub fn enter(&mut self, ticket: Ticket) {
        let free = &mut self.free;
        let waiter = self.waiters.entry(ticket).or_insert_with(|| Waiter {
            condition: free.pop().unwrap_or_default(),
            parked: 0,
            signaled: false,
        });
        waiter.parked += 1;
    }

    /// Mark `ticket` ready and wake one of its waiters
    pub fn signal(&mut self, ticket: Ticket) -> bool {
        match self.waiters.get_mut(&ticket) {
            Some(waiter) => {
                waiter.signaled = true;
                waiter.condition.signal();
                true
            }
            None => false,
        }
    }

    /// Mark `ticket` ready and wake all of its waiters
    pub fn broadcast(&mut self, ticket: Ticket) -> bool {
        match self.waiters.get_mut(&ticket) {
            Some(waiter) => {
                waiter.signaled = true;
                waiter.condition.broadcast();
                true
            }
            None => false,
        }
    }

    /// Check whether `ticket` has been signalled
    pub fn is_signaled(&self, ticket: Ticket) -> bool {
        self.waiters.get(&ticket).is_some_and(|w| w.signaled)
    }

    /// Unregister one waiter; the condition returns to the pool with the last one
    pub fn leave(&mut self, ticket: Ticket) {
        let Some(waiter) = self.waiters.get_mut(&ticket) else {
            return;
        };
        waiter.parked = waiter.parked.saturating_sub(1);
        if waiter.parked == 0 {
            if let Some(waiter) = self.waiters.remove(&ticket) {
                self.free.push(waiter.condition);
            }
        }
    }

    /// Number of tickets with registered waiters
    pub fn active(&self) -> usize {
        self.waiters.len()
    }

    /// Number of pooled conditions ready for reuse
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Block until `ticket` is signalled
    ///
    /// `registry` projects the registry out of the locked state. Returns
    /// immediately if the ticket is already signalled or not registered.
    pub fn wait<S>(
        guard: &mut LockGuard<'_, S>,
        ticket: Ticket,
        registry: impl Fn(&mut S) -> &mut WaiterRegistry,
    ) {
        loop {
            let condition = match registry(&mut **guard).waiters.get(&ticket) {
                Some(waiter) if !waiter.signaled => Arc::clone(&waiter.condition),
                _ => return,
            };
            condition.wait(guard);
        }
    }
}
