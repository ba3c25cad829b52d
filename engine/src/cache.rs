//! Session-local memory of granted levels.
//!
//! Only ever a display hint: the resolver never grants access from the cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use timetoken_types::{AccessLevel, Subject};

pub struct SessionCache {
    ttl: Duration,
    entries: Mutex<HashMap<Subject, (AccessLevel, Instant)>>,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `level` for `subject`, dropping every entry that has expired.
    pub fn remember(&self, subject: &Subject, level: AccessLevel) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, (_, at)| at.elapsed() < self.ttl);
        entries.insert(subject.clone(), (level, Instant::now()));
    }

    /// The cached level, if it has not expired.
    pub fn level(&self, subject: &Subject) -> Option<AccessLevel> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(subject) {
            Some((level, at)) if at.elapsed() < self.ttl => Some(*level),
            Some(_) => {
                entries.remove(subject);
                None
            }
            None => None,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
