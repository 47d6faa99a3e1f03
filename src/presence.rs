use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::core::errors::DomainError;
use crate::core::store::DocumentStore;
use crate::models::models::User;
use crate::users::UserDirectory;

/// Write-behind buffer for `last_seen`.
///
/// Requests queue touches; `flush` writes at most one update per user.
pub struct LastSeenBuffer {
    interval: Duration,
    tx: Sender<(String, DateTime<Utc>)>,
    rx: Mutex<Receiver<(String, DateTime<Utc>)>>,
}

impl LastSeenBuffer {
    pub fn new(interval_secs: i64) -> Self {
        let (tx, rx) = channel();
        Self {
            interval: Duration::seconds(interval_secs.max(0)),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Queue a touch unless the stored `last_seen` is still fresh. Returns whether it was queued.
    pub fn touch(&self, user: &User, now: DateTime<Utc>) -> bool {
        if user.last_seen.is_some_and(|seen| now - seen < self.interval) {
            return false;
        }
        // receiver lives as long as self
        self.tx.send((user.id.clone(), now)).is_ok()
    }

    /// Drain queued touches, newest per user, and write them. Returns the number of users written.
    pub fn flush<S: DocumentStore + ?Sized>(&self, store: &S) -> Result<usize, DomainError> {
        let pending: HashMap<String, DateTime<Utc>> = {
            let rx = self
                .rx
                .lock()
                .map_err(|_| anyhow::anyhow!("last_seen buffer lock poisoned"))?;
            let mut pending = HashMap::new();
            for (id, at) in rx.try_iter() {
                pending
                    .entry(id)
                    .and_modify(|seen: &mut DateTime<Utc>| *seen = (*seen).max(at))
                    .or_insert(at);
            }
            pending
        };

        let users = UserDirectory::new(store);
        let mut written = 0;
        for (id, at) in pending {
            match users.touch_last_seen(&id, at) {
                Ok(()) => written += 1,
                Err(DomainError::NotFound { .. }) => log::debug!("dropping last_seen for vanished user {}", id),
                Err(e) => return Err(e),
            }
        }
        if written > 0 {
            log::debug!("flushed last_seen for {} users", written);
        }
        Ok(written)
    }
}
