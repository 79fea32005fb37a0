//! Scripted in-memory Remote API Client for reconciler tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::ResourceKind;
use crate::azure::{ApiError, RemoteApi};

/// Replays queued responses. An exhausted queue repeats its last response;
/// an empty `get` queue answers NotFound and an empty `delete` queue answers
/// success.
pub struct ScriptedApi<K: ResourceKind> {
    gets: Mutex<VecDeque<Result<K::Model, ApiError>>>,
    last_get: Mutex<Option<Result<K::Model, ApiError>>>,
    deletes: Mutex<VecDeque<Result<(), ApiError>>>,
    writes: Mutex<Vec<K::Model>>,
    get_calls: Mutex<usize>,
    delete_calls: Mutex<usize>,
}

impl<K: ResourceKind> ScriptedApi<K> {
    pub fn new() -> Self {
        Self {
            gets: Mutex::new(VecDeque::new()),
            last_get: Mutex::new(None),
            deletes: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            get_calls: Mutex::new(0),
            delete_calls: Mutex::new(0),
        }
    }

    pub fn push_get(&self, response: Result<K::Model, ApiError>) {
        self.gets.lock().unwrap().push_back(response);
    }

    pub fn push_delete(&self, response: Result<(), ApiError>) {
        self.deletes.lock().unwrap().push_back(response);
    }

    pub fn writes(&self) -> Vec<K::Model> {
        self.writes.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> usize {
        *self.get_calls.lock().unwrap()
    }

    pub fn delete_calls(&self) -> usize {
        *self.delete_calls.lock().unwrap()
    }
}

#[async_trait]
impl<K: ResourceKind> RemoteApi<K> for ScriptedApi<K> {
    async fn get(&self, _id: &K::Id) -> Result<K::Model, ApiError> {
        *self.get_calls.lock().unwrap() += 1;
        let next = self.gets.lock().unwrap().pop_front();
        let mut last = self.last_get.lock().unwrap();
        if let Some(response) = next {
            *last = Some(response);
        }
        last.clone()
            .unwrap_or(Err(ApiError::NotFound { request_id: None }))
    }

    async fn create_or_update(&self, _id: &K::Id, model: &K::Model) -> Result<K::Model, ApiError> {
        self.writes.lock().unwrap().push(model.clone());
        Ok(model.clone())
    }

    async fn delete(&self, _id: &K::Id) -> Result<(), ApiError> {
        *self.delete_calls.lock().unwrap() += 1;
        self.deletes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
