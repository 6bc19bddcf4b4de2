//! Execution context threaded through every engine call.
//!
//! A [`Context`] carries read-only block metadata, a handle to the module
//! store, and a write-only event sink. Nothing in the core reads ambient
//! state: height, time and storage all arrive through the context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CacheStore, KvStore, Result};

/// Read-only metadata of the block being executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: u64,
    pub time: DateTime<Utc>,
}

impl BlockHeader {
    #[must_use]
    pub fn new(chain_id: impl Into<String>, height: u64, time: DateTime<Utc>) -> Self {
        Self {
            chain_id: chain_id.into(),
            height,
            time,
        }
    }
}

/// A typed module event, forwarded by the host to indexers and clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<(String, String)>,
}

impl Event {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style attribute append.
    #[must_use]
    pub fn attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.push((key.into(), value.to_string()));
        self
    }

    /// First value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Per-call execution context.
pub struct Context<'a> {
    header: BlockHeader,
    store: &'a mut dyn KvStore,
    events: Vec<Event>,
}

impl<'a> Context<'a> {
    pub fn new(header: BlockHeader, store: &'a mut dyn KvStore) -> Self {
        Self {
            header,
            store,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.header.height
    }

    #[must_use]
    pub fn block_time(&self) -> DateTime<Utc> {
        self.header.time
    }

    #[must_use]
    pub fn store(&self) -> &dyn KvStore {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut dyn KvStore {
        &mut *self.store
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Run `f` on a cached branch of the store.
    ///
    /// On `Ok` the branch's writes and events are committed into this
    /// context; on `Err` both are discarded and the store is untouched.
    pub fn branch<T>(&mut self, f: impl FnOnce(&mut Context<'_>) -> Result<T>) -> Result<T> {
        let header = self.header.clone();
        let mut cache = CacheStore::new(&mut *self.store);
        let (result, events) = {
            let mut inner = Context::new(header, &mut cache);
            let result = f(&mut inner);
            (result, inner.events)
        };
        if result.is_ok() {
            cache.commit();
            self.events.extend(events);
        }
        result
    }
}
