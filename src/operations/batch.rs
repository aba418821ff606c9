//! Batch Execution
//!
//! Runs a group of units of work concurrently and collects their values in
//! input order. The first failing item fails the whole batch and cancels the
//! items still in flight.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use log::{info, warn};
use std::collections::HashSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::context::OperationContext;
use super::error::{OperationError, OperationResult};
use super::manager::OperationManager;
use super::ticket::OperationTicket;

type BatchWork<T> = Box<dyn FnOnce(OperationContext) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// One named unit of work in a batch
pub struct BatchItem<T> {
    id: String,
    work: BatchWork<T>,
}

impl<T: Send + 'static> BatchItem<T> {
    /// Item whose work ignores progress and cancellation
    pub fn new<F, Fut>(id: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_progress(id, move |_| work())
    }

    /// Item whose work receives its own operation context
    pub fn with_progress<F, Fut>(id: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            work: Box::new(move |ctx| work(ctx).boxed()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> std::fmt::Debug for BatchItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchItem").field("id", &self.id).finish()
    }
}

impl OperationManager {
    /// Run `items` concurrently under `batch_id`
    ///
    /// Each item is also tracked as its own operation. The batch resolves to
    /// the item values in input order, or to `BatchItemFailed` for the first
    /// item that fails; remaining items are then cancelled. Cancelling the
    /// batch cancels every item.
    ///
    /// Fails synchronously with `DuplicateOperation` if the batch id or any
    /// item id is already running or repeated within the batch; nothing is
    /// started in that case.
    pub fn execute_batch<T>(
        &self,
        batch_id: &str,
        items: Vec<BatchItem<T>>,
    ) -> OperationResult<OperationTicket<Vec<T>>>
    where
        T: Send + 'static,
    {
        let mut seen = HashSet::new();
        seen.insert(batch_id);
        for item in &items {
            if !seen.insert(item.id.as_str()) {
                warn!("Rejected batch {}: repeated id {}", batch_id, item.id);
                return Err(OperationError::DuplicateOperation(item.id.clone()));
            }
        }

        let batch_token = CancellationToken::new();
        // Items hang off their own token so fail-fast cancellation leaves the batch record alone
        let items_token = batch_token.child_token();

        let mut entries = Vec::with_capacity(items.len() + 1);
        entries.push((batch_id, batch_token.clone()));
        entries.extend(items.iter().map(|item| (item.id.as_str(), items_token.child_token())));

        let mut serials = self.registry.register_group(&entries)?.into_iter();
        let tokens: Vec<CancellationToken> = entries.into_iter().skip(1).map(|(_, token)| token).collect();
        let batch_serial = serials.next().unwrap_or_default();
        let registered: Vec<(u64, CancellationToken)> = serials.zip(tokens).collect();

        let tickets: Vec<OperationTicket<T>> = items
            .into_iter()
            .zip(registered)
            .map(|(item, (serial, token))| {
                let work = item.work;
                self.spawn_registered(&item.id, serial, token, move |ctx| async move {
                    work(ctx).await.map_err(OperationError::WorkFailure)
                })
            })
            .collect();

        info!("Started batch {} with {} items", batch_id, tickets.len());

        Ok(self.spawn_registered(batch_id, batch_serial, batch_token, move |ctx| {
            collect_in_order(ctx, tickets, items_token)
        }))
    }
}

async fn collect_in_order<T>(
    ctx: OperationContext,
    tickets: Vec<OperationTicket<T>>,
    items_token: CancellationToken,
) -> OperationResult<Vec<T>> {
    let total = tickets.len();
    let mut slots: Vec<Option<T>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    let mut pending: FuturesUnordered<_> = tickets
        .into_iter()
        .enumerate()
        .map(|(index, ticket)| {
            let id = ticket.id().to_string();
            ticket.map(move |outcome| (index, id, outcome))
        })
        .collect();

    let mut finished = 0;
    while let Some((index, id, outcome)) = pending.next().await {
        match outcome {
            Ok(value) => {
                slots[index] = Some(value);
                finished += 1;
                ctx.report(finished as f64 / total as f64);
            }
            Err(err) => {
                warn!("Batch {} failed on item {}: {}", ctx.id(), id, err);
                items_token.cancel();
                return Err(OperationError::BatchItemFailed {
                    id,
                    source: Box::new(err),
                });
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::types::OperationStatus;
    use anyhow::anyhow;
    use std::time::Duration;

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let manager = OperationManager::new();
        let n = 5u64;
        let items = (1..=n)
            .map(|k| {
                BatchItem::new(format!("item-{}", k), move || async move {
                    tokio::time::sleep(Duration::from_millis((n - k) * 10)).await;
                    Ok::<_, anyhow::Error>(k)
                })
            })
            .collect();

        let ticket = manager.execute_batch("batch", items).unwrap();
        assert_eq!(ticket.await.unwrap(), vec![1, 2, 3, 4, 5]);

        let batch = manager.get_operation("batch").unwrap();
        assert_eq!(batch.status, OperationStatus::Completed);
        assert_eq!(batch.progress, 1.0);
        assert_eq!(manager.get_operation("item-3").unwrap().status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let manager = OperationManager::new();
        let ticket = manager.execute_batch::<u8>("nothing", Vec::new()).unwrap();
        assert!(ticket.await.unwrap().is_empty());
    }

    async fn settle(manager: &OperationManager) {
        for _ in 0..200 {
            if !manager.is_any_operation_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("operations still running");
    }

    #[tokio::test]
    async fn test_batch_fails_fast_and_cancels_rest() {
        let manager = OperationManager::new();
        for round in 0..20 {
            let items = vec![
                BatchItem::with_progress(format!("slow-{}", round), |ctx: OperationContext| async move {
                    ctx.cancelled().await;
                    Ok::<_, anyhow::Error>("slow")
                }),
                BatchItem::new(format!("broken-{}", round), || async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Err(anyhow!("corrupt image"))
                }),
            ];

            let batch_id = format!("thumbs-{}", round);
            let err = manager.execute_batch(&batch_id, items).unwrap().await.unwrap_err();
            match err {
                OperationError::BatchItemFailed { id, source } => {
                    assert_eq!(id, format!("broken-{}", round));
                    assert_eq!(source.to_string(), "corrupt image");
                }
                other => panic!("unexpected error: {:?}", other),
            }

            settle(&manager).await;
            assert!(manager.get_operation(&batch_id).unwrap().is_failed());
            assert!(manager.get_operation(&format!("broken-{}", round)).unwrap().is_failed());
            let slow = manager.get_operation(&format!("slow-{}", round)).unwrap();
            assert_eq!(slow.status, OperationStatus::Cancelled);
        }
        assert_eq!(manager.stats().completed, 0);
    }

    #[tokio::test]
    async fn test_cancelling_batch_cancels_items() {
        let manager = OperationManager::new();
        for round in 0..20 {
            let items = (0..3)
                .map(|i| {
                    BatchItem::with_progress(format!("part-{}-{}", round, i), move |ctx: OperationContext| async move {
                        ctx.cancelled().await;
                        Ok::<_, anyhow::Error>(i)
                    })
                })
                .collect();

            let batch_id = format!("download-{}", round);
            let ticket = manager.execute_batch(&batch_id, items).unwrap();
            assert_eq!(manager.active_operation_count(), 4);

            assert!(manager.cancel_operation(&batch_id));
            assert!(ticket.await.unwrap_err().is_cancelled());
            settle(&manager).await;
        }

        let stats = manager.stats();
        assert_eq!(stats.cancelled, 80);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_start_nothing() {
        let manager = OperationManager::new();
        let items = vec![
            BatchItem::new("same", || async { Ok::<_, anyhow::Error>(1) }),
            BatchItem::new("same", || async { Ok::<_, anyhow::Error>(2) }),
        ];
        let result = manager.execute_batch("pair", items);
        assert!(matches!(result, Err(OperationError::DuplicateOperation(id)) if id == "same"));
        assert_eq!(manager.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_batch_keeps_finished_records() {
        let manager = OperationManager::new();
        manager
            .execute("fresh", || async { Ok::<_, anyhow::Error>(()) })
            .unwrap()
            .await
            .unwrap();
        let blocker = manager
            .execute_with_progress("busy", |ctx| async move {
                ctx.cancelled().await;
                Ok::<_, anyhow::Error>(())
            })
            .unwrap();

        let mut events = manager.subscribe();
        let items = vec![
            BatchItem::new("fresh", || async { Ok::<_, anyhow::Error>(()) }),
            BatchItem::new("busy", || async { Ok::<_, anyhow::Error>(()) }),
        ];
        let result = manager.execute_batch("clash", items);
        assert!(matches!(result, Err(OperationError::DuplicateOperation(id)) if id == "busy"));

        assert_eq!(
            manager.get_operation("fresh").unwrap().status,
            OperationStatus::Completed
        );
        assert!(!manager.contains("clash"));
        assert!(events.try_recv().is_err());

        blocker.cancel();
        let _ = blocker.await;
    }

    #[tokio::test]
    async fn test_item_clashing_with_running_operation_rolls_back() {
        let manager = OperationManager::new();
        let blocker = manager
            .execute_with_progress("busy", |ctx| async move {
                ctx.cancelled().await;
                Ok::<_, anyhow::Error>(())
            })
            .unwrap();

        let items = vec![
            BatchItem::new("fresh", || async { Ok::<_, anyhow::Error>(()) }),
            BatchItem::new("busy", || async { Ok::<_, anyhow::Error>(()) }),
        ];
        let result = manager.execute_batch("clash", items);
        assert!(matches!(result, Err(OperationError::DuplicateOperation(id)) if id == "busy"));
        assert!(!manager.contains("fresh"));
        assert!(!manager.contains("clash"));
        assert!(manager.get_operation("busy").unwrap().is_running());

        blocker.cancel();
        let _ = blocker.await;
    }
}
