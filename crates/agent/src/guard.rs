//! Per-conversation turn exclusion.
//!
//! A context token may have at most one turn in flight. A second request
//! for the same token is rejected with [`Error::ContextConflict`] rather
//! than queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chatrelay_core::{ContextToken, Error};

#[derive(Clone, Default)]
pub struct TurnGuards {
    in_flight: Arc<Mutex<HashSet<ContextToken>>>,
}

impl TurnGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `token` until the returned guard is dropped.
    pub fn acquire(&self, token: &ContextToken) -> Result<TurnGuard, Error> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| Error::Internal("turn guard table poisoned".into()))?;
        if !in_flight.insert(token.clone()) {
            return Err(Error::ContextConflict {
                token: token.to_string(),
            });
        }
        Ok(TurnGuard {
            guards: self.clone(),
            token: token.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }
}

pub struct TurnGuard {
    guards: TurnGuards,
    token: ContextToken,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.guards.in_flight.lock() {
            in_flight.remove(&self.token);
        }
    }
}
