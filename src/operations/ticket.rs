//! Operation Ticket
//!
//! Completion channel for one started operation. The ticket resolves exactly
//! once with the operation's discriminated result.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::error::{OperationError, OperationResult};

/// Handle returned by the `execute*` family
///
/// Await the ticket (or call `wait`) for the outcome, or hand it a callback
/// with `on_completion`. Dropping the ticket does not cancel the operation.
#[derive(Debug)]
pub struct OperationTicket<T> {
    id: String,
    cancel_token: CancellationToken,
    receiver: oneshot::Receiver<OperationResult<T>>,
}

impl<T> OperationTicket<T> {
    pub(crate) fn new(
        id: impl Into<String>,
        cancel_token: CancellationToken,
        receiver: oneshot::Receiver<OperationResult<T>>,
    ) -> Self {
        Self {
            id: id.into(),
            cancel_token,
            receiver,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cooperative cancellation of this operation
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Wait for the outcome
    pub async fn wait(self) -> OperationResult<T> {
        self.await
    }
}

impl<T: Send + 'static> OperationTicket<T> {
    /// Invoke `callback` exactly once with the outcome, on the runtime
    pub fn on_completion<F>(self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(OperationResult<T>) + Send + 'static,
    {
        tokio::spawn(async move {
            let outcome = self.await;
            callback(outcome);
        })
    }
}

impl<T> Future for OperationTicket<T> {
    type Output = OperationResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Supervisor dropped without reporting, e.g. during runtime shutdown
            Poll::Ready(Err(_)) => Poll::Ready(Err(OperationError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
