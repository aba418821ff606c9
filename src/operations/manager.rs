//! Operation Manager
//!
//! Concurrent operation registry with DashMap.
//! Handles operation lifecycle, progress tracking, cancellation and retries.

use anyhow::anyhow;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::context::OperationContext;
use super::error::{OperationError, OperationResult};
use super::events::OperationEvent;
use super::ticket::OperationTicket;
use super::types::{ManagerStats, OperationInfo, OperationRecord, OperationStatus};
use crate::config::CoreConfig;
use crate::retry::{RetryConfiguration, RetryExecutor};

/// Shared registry state, reachable from the manager, supervisors and contexts
pub(crate) struct Registry {
    /// Tracked operations (operation_id -> OperationRecord)
    operations: DashMap<String, OperationRecord>,
    /// Event broadcaster
    event_tx: broadcast::Sender<OperationEvent>,
    /// Serial for the next registration
    next_serial: AtomicU64,
    /// Maximum terminal operations kept
    history_limit: usize,
}

impl Registry {
    fn new(history_limit: usize, event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));

        Self {
            operations: DashMap::new(),
            event_tx,
            next_serial: AtomicU64::new(1),
            history_limit,
        }
    }

    fn emit(&self, event: OperationEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Insert a Running record, rejecting ids that are still running
    fn register(&self, operation_id: &str) -> OperationResult<(u64, CancellationToken)> {
        let token = CancellationToken::new();
        let (serial, _) = self.insert_running(operation_id, token.clone())?;

        info!("Started operation: {}", operation_id);
        self.emit(OperationEvent::Registered {
            operation_id: operation_id.to_string(),
        });

        Ok((serial, token))
    }

    /// Register several operations at once, or none of them
    ///
    /// On a clash every record inserted so far is removed and any finished
    /// record it replaced is put back. `Registered` events are only emitted
    /// once the whole group is in.
    pub(crate) fn register_group(
        &self,
        entries: &[(&str, CancellationToken)],
    ) -> OperationResult<Vec<u64>> {
        let mut inserted: Vec<(&str, u64, Option<OperationRecord>)> = Vec::with_capacity(entries.len());

        for (operation_id, token) in entries {
            match self.insert_running(operation_id, token.clone()) {
                Ok((serial, replaced)) => inserted.push((*operation_id, serial, replaced)),
                Err(err) => {
                    for (operation_id, serial, replaced) in inserted.into_iter().rev() {
                        self.operations
                            .remove_if(operation_id, |_, record| record.serial == serial);
                        if let Some(previous) = replaced {
                            self.operations
                                .entry(operation_id.to_string())
                                .or_insert(previous);
                        }
                    }
                    return Err(err);
                }
            }
        }

        for (operation_id, _, _) in &inserted {
            info!("Started operation: {}", operation_id);
            self.emit(OperationEvent::Registered {
                operation_id: operation_id.to_string(),
            });
        }

        Ok(inserted.into_iter().map(|(_, serial, _)| serial).collect())
    }

    /// Insert without announcing, returning the finished record it replaced
    fn insert_running(
        &self,
        operation_id: &str,
        token: CancellationToken,
    ) -> OperationResult<(u64, Option<OperationRecord>)> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let record = OperationRecord::new(operation_id, serial, token);

        match self.operations.entry(operation_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_running() {
                    warn!("Rejected duplicate operation: {}", operation_id);
                    return Err(OperationError::DuplicateOperation(operation_id.to_string()));
                }
                debug!("Replacing finished operation: {}", operation_id);
                Ok((serial, Some(entry.insert(record))))
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok((serial, None))
            }
        }
    }

    pub(crate) fn report_progress(&self, operation_id: &str, serial: u64, progress: f64) {
        let stored = match self.operations.get_mut(operation_id) {
            Some(mut record) if record.serial == serial => record.set_progress(progress),
            _ => None,
        };

        if let Some(progress) = stored {
            debug!("Operation {} progress: {:.3}", operation_id, progress);
            self.emit(OperationEvent::Progress {
                operation_id: operation_id.to_string(),
                progress,
            });
        }
    }

    /// Move a record to its terminal state and reconcile the delivered outcome
    ///
    /// An operation whose token tripped before it finished always reports
    /// `Cancelled`, whichever path tripped it.
    pub(crate) fn finalize<T>(
        &self,
        operation_id: &str,
        serial: u64,
        outcome: OperationResult<T>,
    ) -> OperationResult<T> {
        let mut event = None;
        let mut cancelled = false;

        if let Some(mut record) = self.operations.get_mut(operation_id) {
            if record.serial == serial {
                let transitioned = match &outcome {
                    _ if record.cancel_token.is_cancelled() => record.cancel(),
                    Ok(_) => record.complete(),
                    Err(OperationError::Cancelled) => record.cancel(),
                    Err(e) => record.fail(e.to_string()),
                };
                if transitioned {
                    event = Some(terminal_event(&record));
                }
                cancelled = record.status == OperationStatus::Cancelled;
            }
        }

        if let Some(event) = event {
            match &event {
                OperationEvent::Completed { duration_ms, .. } => {
                    info!("Completed operation: {} ({}ms)", operation_id, duration_ms)
                }
                OperationEvent::Failed { error, .. } => {
                    warn!("Operation failed: {} ({})", operation_id, error)
                }
                _ => info!("Cancelled operation: {}", operation_id),
            }
            self.emit(event);
        }

        match outcome {
            Err(OperationError::Cancelled) => Err(OperationError::Cancelled),
            _ if cancelled => Err(OperationError::Cancelled),
            other => other,
        }
    }

    /// Flip a running operation to Cancelled and trip its token
    pub(crate) fn cancel(&self, operation_id: &str) -> bool {
        let event = self
            .operations
            .get_mut(operation_id)
            .and_then(|mut record| record.cancel().then(|| terminal_event(&record)));

        match event {
            Some(event) => {
                info!("Cancelled operation: {}", operation_id);
                self.emit(event);
                true
            }
            None => {
                debug!("Cancel ignored for inactive operation: {}", operation_id);
                false
            }
        }
    }

    fn running_ids(&self) -> Vec<String> {
        self.operations
            .iter()
            .filter(|r| r.is_running())
            .map(|r| r.id.clone())
            .collect()
    }

    /// Drop the oldest terminal records beyond the history limit
    pub(crate) fn cleanup_history(&self) {
        let mut finished: Vec<(String, u64, std::time::Instant)> = self
            .operations
            .iter()
            .filter_map(|r| r.finished_at().map(|at| (r.id.clone(), r.serial, at)))
            .collect();

        let excess = finished.len().saturating_sub(self.history_limit);
        if excess == 0 {
            return;
        }

        // Sort by completion time (oldest first)
        finished.sort_by_key(|(_, _, at)| *at);

        for (operation_id, serial, _) in finished.into_iter().take(excess) {
            self.operations.remove_if(&operation_id, |_, record| {
                record.serial == serial && !record.is_running()
            });
        }
    }
}

fn terminal_event(record: &OperationRecord) -> OperationEvent {
    let operation_id = record.id.clone();
    let duration_ms = record.duration().as_millis() as u64;

    match record.status {
        OperationStatus::Failed => OperationEvent::Failed {
            operation_id,
            error: record.error.clone().unwrap_or_default(),
            duration_ms,
        },
        OperationStatus::Cancelled => OperationEvent::Cancelled {
            operation_id,
            duration_ms,
        },
        OperationStatus::Completed | OperationStatus::Running => OperationEvent::Completed {
            operation_id,
            duration_ms,
        },
    }
}

/// Operation manager for tracking concurrent units of work
///
/// Each manager is an independent registry; clones share the same registry.
/// Starting operations requires a running Tokio runtime.
#[derive(Clone)]
pub struct OperationManager {
    pub(crate) registry: Arc<Registry>,
    default_retry: RetryConfiguration,
}

impl OperationManager {
    /// Create a new operation manager
    pub fn new() -> Self {
        Self::with_config(&CoreConfig::default())
    }

    /// Create with custom limits
    pub fn with_limits(history_limit: usize, event_capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry::new(history_limit, event_capacity)),
            default_retry: RetryConfiguration::default(),
        }
    }

    /// Create from loaded settings
    ///
    /// An invalid retry section falls back to the default preset.
    pub fn with_config(config: &CoreConfig) -> Self {
        let default_retry = config.retry.to_configuration().unwrap_or_else(|e| {
            warn!("Invalid retry settings, using defaults: {}", e);
            RetryConfiguration::default()
        });

        Self {
            registry: Arc::new(Registry::new(config.history_limit, config.event_capacity)),
            default_retry,
        }
    }

    /// Generate a fresh operation ID
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Subscribe to operation events
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.registry.event_tx.subscribe()
    }

    /// Retry policy used by `execute_with_default_retry`
    pub fn default_retry(&self) -> &RetryConfiguration {
        &self.default_retry
    }

    /// Run `work` in the background under `operation_id`
    pub fn execute<T, F, Fut>(
        &self,
        operation_id: &str,
        work: F,
    ) -> OperationResult<OperationTicket<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.launch(operation_id, move |_| async move {
            work().await.map_err(OperationError::WorkFailure)
        })
    }

    /// Run `work` with a progress reporter and cancellation query
    pub fn execute_with_progress<T, F, Fut>(
        &self,
        operation_id: &str,
        work: F,
    ) -> OperationResult<OperationTicket<T>>
    where
        T: Send + 'static,
        F: FnOnce(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.launch(operation_id, move |ctx| async move {
            work(ctx).await.map_err(OperationError::WorkFailure)
        })
    }

    /// Run `work` under `config`, retrying every failure
    ///
    /// The operation only finishes once the final attempt has settled.
    pub fn execute_with_retry<T, F, Fut>(
        &self,
        operation_id: &str,
        config: RetryConfiguration,
        work: F,
    ) -> OperationResult<OperationTicket<T>>
    where
        T: Send + 'static,
        F: FnMut(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.execute_with_retry_if(operation_id, config, |_| true, work)
    }

    /// Run `work` under the manager's default retry policy
    pub fn execute_with_default_retry<T, F, Fut>(
        &self,
        operation_id: &str,
        work: F,
    ) -> OperationResult<OperationTicket<T>>
    where
        T: Send + 'static,
        F: FnMut(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.execute_with_retry(operation_id, self.default_retry.clone(), work)
    }

    /// Run `work` under `config`, retrying only failures accepted by `should_retry`
    pub fn execute_with_retry_if<T, F, Fut, P>(
        &self,
        operation_id: &str,
        config: RetryConfiguration,
        should_retry: P,
        mut work: F,
    ) -> OperationResult<OperationTicket<T>>
    where
        T: Send + 'static,
        F: FnMut(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        P: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.launch(operation_id, move |ctx| async move {
            let executor = RetryExecutor::new(config)
                .with_predicate(should_retry)
                .with_cancellation(ctx.cancellation_token().clone());

            executor
                .run_detailed(|| work(ctx.clone()))
                .await
                .map_err(|failure| {
                    if failure.exhausted {
                        OperationError::RetryExhausted {
                            attempts: failure.attempts,
                            source: failure.error,
                        }
                    } else {
                        OperationError::WorkFailure(failure.error)
                    }
                })
        })
    }

    fn launch<T, F, Fut>(&self, operation_id: &str, make: F) -> OperationResult<OperationTicket<T>>
    where
        T: Send + 'static,
        F: FnOnce(OperationContext) -> Fut,
        Fut: Future<Output = OperationResult<T>> + Send + 'static,
    {
        let (serial, token) = self.registry.register(operation_id)?;
        Ok(self.spawn_registered(operation_id, serial, token, make))
    }

    /// Start the work for an already-registered record under a supervisor
    pub(crate) fn spawn_registered<T, F, Fut>(
        &self,
        operation_id: &str,
        serial: u64,
        token: CancellationToken,
        make: F,
    ) -> OperationTicket<T>
    where
        T: Send + 'static,
        F: FnOnce(OperationContext) -> Fut,
        Fut: Future<Output = OperationResult<T>> + Send + 'static,
    {
        let ctx = OperationContext::new(operation_id, serial, self.registry.clone(), token.clone());
        let (tx, rx) = oneshot::channel();
        let registry = self.registry.clone();
        let supervisor_token = token.clone();
        let id = operation_id.to_string();

        let mut work = tokio::spawn(make(ctx));

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                joined = &mut work => match joined {
                    Ok(result) => result,
                    Err(e) => Err(OperationError::WorkFailure(anyhow!(
                        "Operation task aborted: {}",
                        e
                    ))),
                },
                // The work is left running; it is expected to observe the token and exit
                _ = supervisor_token.cancelled() => Err(OperationError::Cancelled),
            };

            // A value produced after the token tripped is discarded
            let outcome = if supervisor_token.is_cancelled() {
                Err(OperationError::Cancelled)
            } else {
                outcome
            };

            let outcome = registry.finalize(&id, serial, outcome);
            let _ = tx.send(outcome);
            registry.cleanup_history();
        });

        OperationTicket::new(operation_id, token, rx)
    }

    /// Request cancellation of a running operation; no-op otherwise
    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        self.registry.cancel(operation_id)
    }

    /// Cancel every running operation, returning how many were cancelled
    pub fn cancel_all_operations(&self) -> usize {
        let cancelled = self
            .registry
            .running_ids()
            .into_iter()
            .filter(|id| self.registry.cancel(id))
            .count();

        if cancelled > 0 {
            info!("Cancelled {} running operations", cancelled);
        }
        cancelled
    }

    /// Get an operation snapshot by ID
    pub fn get_operation(&self, operation_id: &str) -> Option<OperationInfo> {
        self.registry
            .operations
            .get(operation_id)
            .map(|r| r.snapshot())
    }

    /// Snapshot of every tracked operation, oldest first
    pub fn get_all_operations(&self) -> Vec<OperationInfo> {
        let mut records: Vec<(u64, OperationInfo)> = self
            .registry
            .operations
            .iter()
            .map(|r| (r.serial, r.snapshot()))
            .collect();
        records.sort_by_key(|(serial, _)| *serial);
        records.into_iter().map(|(_, info)| info).collect()
    }

    /// Snapshot of running operations, oldest first
    pub fn list_active_operations(&self) -> Vec<OperationInfo> {
        self.get_all_operations()
            .into_iter()
            .filter(|op| op.is_running())
            .collect()
    }

    /// Count running operations
    pub fn active_operation_count(&self) -> usize {
        self.registry
            .operations
            .iter()
            .filter(|r| r.is_running())
            .count()
    }

    /// Check whether any operation is still running
    pub fn is_any_operation_running(&self) -> bool {
        self.registry.operations.iter().any(|r| r.is_running())
    }

    /// Total tracked operations, running or not
    pub fn operation_count(&self) -> usize {
        self.registry.operations.len()
    }

    /// Check whether an operation is tracked, in any state
    pub fn contains(&self, operation_id: &str) -> bool {
        self.registry.operations.contains_key(operation_id)
    }

    /// Count tracked operations by status
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for record in self.registry.operations.iter() {
            stats.total += 1;
            match record.status {
                OperationStatus::Running => stats.running += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Forget a finished operation; running operations are kept
    pub fn remove_operation(&self, operation_id: &str) -> Option<OperationInfo> {
        self.registry
            .operations
            .remove_if(operation_id, |_, record| !record.is_running())
            .map(|(_, record)| record.snapshot())
    }

    /// Clear all finished operations
    pub fn clear_completed(&self) {
        self.registry.operations.retain(|_, record| record.is_running());
    }

    /// Apply the history limit now
    pub fn cleanup_history(&self) {
        self.registry.cleanup_history();
    }
}

impl Default for OperationManager {
    fn default() -> Self {
        Self::new()
    }
}
