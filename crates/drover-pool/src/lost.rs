//! Lost-slave registry.
//!
//! A host marked lost refuses offers. The grace window starts at the first
//! refused offer, not at the loss itself; once it has elapsed the next offer
//! is admitted and the host is forgotten.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
enum LostState {
    /// Marked lost; no offer refused yet.
    Marked,
    RefusingSince(Instant),
}

#[derive(Debug)]
pub(crate) struct LostSlaves {
    hosts: HashMap<String, LostState>,
    grace: Duration,
}

impl LostSlaves {
    pub fn new(grace: Duration) -> Self {
        Self {
            hosts: HashMap::new(),
            grace,
        }
    }

    pub fn mark(&mut self, hostname: &str) {
        self.hosts.insert(hostname.to_string(), LostState::Marked);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether an offer from `hostname` may enter the pool at `now`.
    pub fn admit(&mut self, hostname: &str, now: Instant) -> bool {
        let Some(state) = self.hosts.get_mut(hostname) else {
            return true;
        };
        match *state {
            LostState::Marked => {
                *state = LostState::RefusingSince(now);
                false
            }
            LostState::RefusingSince(since) => {
                if now.duration_since(since) > self.grace {
                    self.hosts.remove(hostname);
                    true
                } else {
                    false
                }
            }
        }
    }
}
