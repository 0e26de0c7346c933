//! In-memory event storage.
//!
//! Events are kept in a `BTreeMap` keyed by id behind a `tokio::sync::RwLock`.
//! Ids are assigned sequentially starting at 1 and are never reused.
//! Updates use optimistic concurrency: the caller passes back the version it
//! read, and the write fails with [`StoreError::EditConflict`] if the stored
//! record has moved on.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{Event, EventFilter, Metadata, NewEvent};

/// Errors returned by [`EventStore`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("edit conflict")]
    EditConflict,
}

/// Thread-safe event store; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    events: BTreeMap<i64, Event>,
    last_id: i64,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new event and returns it with its id, timestamps and
    /// version 1.
    pub async fn insert(&self, new: NewEvent) -> Event {
        let mut inner = self.inner.write().await;
        inner.last_id += 1;

        let now = Utc::now();
        let event = Event {
            id: inner.last_id,
            title: new.title,
            description: new.description,
            tags: new.tags,
            all_day: new.all_day,
            start: new.start,
            end: new.end,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        inner.events.insert(event.id, event.clone());
        event
    }

    /// Fetches the event with `id`.
    pub async fn get(&self, id: i64) -> Result<Event, StoreError> {
        self.inner
            .read()
            .await
            .events
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Replaces the stored event with `event`.
    ///
    /// `event.version` must match the stored version; on success the version
    /// is incremented and `updated_at` refreshed.
    pub async fn update(&self, mut event: Event) -> Result<Event, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.events.get_mut(&event.id).ok_or(StoreError::NotFound)?;

        if stored.version != event.version {
            return Err(StoreError::EditConflict);
        }

        event.version += 1;
        event.updated_at = Utc::now();
        event.created_at = stored.created_at;
        *stored = event.clone();

        Ok(event)
    }

    /// Removes the event with `id`.
    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .events
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    /// Returns one page of events matching `filter` plus pagination metadata.
    pub async fn list(&self, filter: &EventFilter) -> (Vec<Event>, Metadata) {
        let inner = self.inner.read().await;
        let title = filter.title.as_ref().map(|t| t.to_lowercase());

        let mut matching: Vec<&Event> = inner
            .events
            .values()
            .filter(|event| {
                title
                    .as_ref()
                    .map_or(true, |t| event.title.to_lowercase().contains(t.as_str()))
            })
            .filter(|event| filter.tags.iter().all(|tag| event.tags.contains(tag)))
            .collect();

        matching.sort_by(|a, b| {
            let ordering = compare(a, b, filter.sort_column()).then_with(|| a.id.cmp(&b.id));
            if filter.is_descending() {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let metadata = Metadata::new(matching.len(), filter.page, filter.page_size);
        let page = matching
            .into_iter()
            .skip(filter.offset())
            .take(filter.page_size as usize)
            .cloned()
            .collect();

        (page, metadata)
    }
}

fn compare(a: &Event, b: &Event, column: &str) -> Ordering {
    match column {
        "title" => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        "start" => a.start.cmp(&b.start),
        _ => a.id.cmp(&b.id),
    }
}
