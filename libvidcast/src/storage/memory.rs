//! In-memory storage for tests
//!
//! Records every delete call so tests can check how often cleanup ran.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{validate_object_name, ListPage, ObjectStorage};
use crate::error::StorageError;

const BASE_URL: &str = "memory://media";

pub struct MemoryObjectStorage {
    state: Mutex<State>,
    page_size: usize,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Bytes>,
    delete_calls: HashMap<String, usize>,
    delete_error: Option<String>,
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::with_page_size(100)
    }
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every following delete fail with a backend error
    pub fn fail_deletes(&self, message: &str) {
        self.lock().delete_error = Some(message.to_string());
    }

    /// Number of delete calls made for `url`, successful or not
    pub fn delete_calls(&self, url: &str) -> usize {
        self.lock().delete_calls.get(url).copied().unwrap_or(0)
    }

    pub fn contains(&self, url: &str) -> bool {
        url.strip_prefix(BASE_URL)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|name| self.lock().objects.contains_key(name))
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, name: &str, data: Bytes) -> Result<String, StorageError> {
        validate_object_name(name)?;
        self.lock().objects.insert(name.to_string(), data);
        Ok(format!("{}/{}", BASE_URL, name))
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        *state.delete_calls.entry(url.to_string()).or_insert(0) += 1;

        if let Some(message) = &state.delete_error {
            return Err(StorageError::Backend(message.clone()));
        }

        let name = url
            .strip_prefix(BASE_URL)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorageError::InvalidReference(url.to_string()))?;

        match state.objects.remove(name) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(url.to_string())),
        }
    }

    async fn list(&self, cursor: Option<&str>) -> Result<ListPage, StorageError> {
        let state = self.lock();
        let mut names: Vec<&String> = state
            .objects
            .keys()
            .filter(|name| cursor.map_or(true, |c| name.as_str() > c))
            .collect();

        let has_more = names.len() > self.page_size;
        names.truncate(self.page_size);

        Ok(ListPage {
            urls: names.iter().map(|n| format!("{}/{}", BASE_URL, n)).collect(),
            next_cursor: if has_more {
                names.last().map(|n| n.to_string())
            } else {
                None
            },
        })
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
