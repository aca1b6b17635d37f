//! Shared state and the fencing-token protocol for background pipeline runs.
//!
//! A background run stamps the record it reports into with a fresh request id. When
//! it finishes, it only writes its outcome if the record still carries that id; a
//! newer dispatch for the same key has otherwise taken over and the outcome is dropped.
//! Reads and writes are not transactional, the fencing check is the only guard.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::NodeValue;
use crate::core::error::PipelineError;
use crate::core::pipeline::Pipeline;
use crate::core::reducer::{PipelineRunner, RunFrame};

/// Asynchronous key-value store, namespaced by mod component.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<NodeValue>, PipelineError>;
    async fn set(&self, namespace: &str, key: &str, value: NodeValue) -> Result<(), PipelineError>;
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    namespaces: RwLock<HashMap<String, HashMap<String, NodeValue>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key stored under `namespace`.
    pub async fn snapshot(&self, namespace: &str) -> HashMap<String, NodeValue> {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<NodeValue>, PipelineError> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: NodeValue) -> Result<(), PipelineError> {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// The persisted status of a background pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncTaskState {
    /// No run has finished yet for this key.
    pub is_loading: bool,
    /// A run is in flight.
    pub is_fetching: bool,
    pub is_success: bool,
    pub is_error: bool,
    /// The result of the current request only; cleared when a new request starts.
    pub current_data: Option<NodeValue>,
    /// The last successful result, kept across requests.
    pub data: Option<NodeValue>,
    /// The fencing token: the request allowed to write the outcome.
    pub request_id: Option<Uuid>,
    /// The serialized error of the last failed run.
    pub error: Option<NodeValue>,
}

impl AsyncTaskState {
    /// The record for the first request on a key.
    pub fn loading(request_id: Uuid) -> Self {
        Self {
            is_loading: true,
            is_fetching: true,
            request_id: Some(request_id),
            ..Self::default()
        }
    }

    /// A new request on a key that already has a record. `data` and `error` survive.
    pub fn refetching(self, request_id: Uuid) -> Self {
        Self {
            is_fetching: true,
            current_data: None,
            request_id: Some(request_id),
            ..self
        }
    }

    pub fn succeeded(self, data: NodeValue) -> Self {
        Self {
            is_loading: false,
            is_fetching: false,
            is_success: true,
            is_error: false,
            current_data: Some(data.clone()),
            data: Some(data),
            error: None,
            ..self
        }
    }

    pub fn failed(self, error: &PipelineError) -> Self {
        Self {
            is_loading: false,
            is_fetching: false,
            is_success: false,
            is_error: true,
            current_data: None,
            error: Some(error.to_value()),
            ..self
        }
    }

    /// Whether `request_id` still holds the fencing token.
    pub fn is_current(&self, request_id: Uuid) -> bool {
        self.request_id == Some(request_id)
    }
}

/// What happened to a finished background run's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncCompletion {
    /// The outcome was written to the record.
    Applied,
    /// A newer request owned the record; the outcome was dropped.
    Superseded,
}

/// Handle to a dispatched background run.
#[derive(Debug)]
pub struct AsyncDispatch {
    pub request_id: Uuid,
    completion: JoinHandle<Result<AsyncCompletion, PipelineError>>,
}

impl AsyncDispatch {
    /// Waits for the background run and its state write. Callers never need to.
    pub async fn completed(self) -> Result<AsyncCompletion, PipelineError> {
        self.completion.await.map_err(|e| {
            PipelineError::platform(format!("async task {} did not finish: {}", self.request_id, e))
        })?
    }
}

/// Runs pipelines in the background and mirrors their status into a [`StateStore`].
#[derive(Clone)]
pub struct AsyncStateSync {
    store: Arc<dyn StateStore>,
    namespace: String,
}

impl AsyncStateSync {
    pub fn new(store: Arc<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Reads the record for `key`. A value that is not a task record counts as absent.
    pub async fn read(&self, key: &str) -> Result<Option<AsyncTaskState>, PipelineError> {
        let Some(value) = self.store.get(&self.namespace, key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                log::warn!(
                    "Ignoring malformed async state at {}/{}: {}",
                    self.namespace,
                    key,
                    e
                );
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, state: &AsyncTaskState) -> Result<(), PipelineError> {
        let value = serde_json::to_value(state)
            .map_err(|e| PipelineError::platform(format!("failed to serialize async state: {}", e)))?;
        self.store.set(&self.namespace, key, value).await
    }

    /// Stamps a new request on `key` and starts `body` without waiting for it.
    pub async fn dispatch(
        &self,
        runner: Arc<dyn PipelineRunner>,
        body: Pipeline,
        frame: RunFrame,
        key: &str,
    ) -> Result<AsyncDispatch, PipelineError> {
        let request_id = Uuid::new_v4();
        let pending = match self.read(key).await? {
            Some(previous) => previous.refetching(request_id),
            None => AsyncTaskState::loading(request_id),
        };
        self.write(key, &pending).await?;
        log::debug!(
            "Dispatched request {} for {}/{}",
            request_id,
            self.namespace,
            key
        );

        let sync = self.clone();
        let key = key.to_string();
        let completion = tokio::spawn(async move {
            let outcome = runner.run_pipeline(body, frame).await;
            if let Err(e) = &outcome {
                log::warn!("Background request {} for {} failed: {}", request_id, key, e);
            }
            let result = sync.complete(&key, request_id, outcome).await;
            if let Err(e) = &result {
                log::error!(
                    "Could not record outcome of request {} for {}: {}",
                    request_id,
                    key,
                    e
                );
            }
            result
        });

        Ok(AsyncDispatch {
            request_id,
            completion,
        })
    }

    async fn complete(
        &self,
        key: &str,
        request_id: Uuid,
        outcome: Result<NodeValue, PipelineError>,
    ) -> Result<AsyncCompletion, PipelineError> {
        let current = self.read(key).await?;
        let Some(current) = current.filter(|state| state.is_current(request_id)) else {
            log::warn!(
                "Discarding stale result of request {} for {}/{}",
                request_id,
                self.namespace,
                key
            );
            return Ok(AsyncCompletion::Superseded);
        };

        let terminal = match outcome {
            Ok(data) => current.succeeded(data),
            Err(e) => current.failed(&e),
        };
        self.write(key, &terminal).await?;
        Ok(AsyncCompletion::Applied)
    }
}
