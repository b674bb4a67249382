//! Bounded pull loop that hands each message to a handler task.
//!
//! Pulls are strictly sequential. Every pulled message is moved into its own
//! task, which runs the handler and settles the message exactly once through a
//! [`DispositionGuard`]:
//!
//! | handler outcome | nackable | disposition |
//! |-----------------|----------|-------------|
//! | `Ok`            | any      | acked       |
//! | `Err` / panic   | yes      | nacked      |
//! | `Err` / panic   | no       | pending     |
//!
//! A task dropped before it settles (runtime shutdown) nacks from the guard's
//! `Drop` when the message is nackable.

use crate::error::{HandlerError, ReceiveError};
use crate::message::{Disposition, Message, MessageHandler, MessageSource};
use crate::metrics::WorkerMetrics;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pulls messages from one [`MessageSource`] and dispatches them.
pub struct SubscriptionReceiver<S: ?Sized> {
    source: Arc<S>,
    metrics: WorkerMetrics,
}

impl<S> SubscriptionReceiver<S>
where
    S: MessageSource + ?Sized + 'static,
{
    pub fn new(source: Arc<S>, project_id: impl Into<String>) -> Self {
        Self {
            source,
            metrics: WorkerMetrics::new(project_id),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Pull `limit` messages one after another and spawn a handler task for
    /// each. Returns once every pull has been issued; handler tasks keep
    /// running and can be awaited through [`Dispatched::settled`].
    ///
    /// A `limit` of zero or less pulls nothing.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::Pull`] on the first failed pull. Later pulls are not
    ///   attempted; messages already dispatched still settle.
    /// - [`ReceiveError::Cancelled`] when `cancel` fires while waiting.
    pub async fn receive<H>(
        &self,
        cancel: &CancellationToken,
        limit: i64,
        handler: Arc<H>,
    ) -> Result<Dispatched, ReceiveError>
    where
        H: MessageHandler + ?Sized + 'static,
    {
        let subscription = self.source.name().to_string();
        let count = usize::try_from(limit).unwrap_or(0);
        let mut dispatched = Dispatched::default();

        if count == 0 {
            debug!(subscription = %subscription, limit, "Nothing to receive");
            return Ok(dispatched);
        }

        info!(
            subscription = %subscription,
            limit,
            handler = handler.name(),
            "Receiving messages"
        );

        for seq in 0..count {
            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(subscription = %subscription, received = seq, "Receive cancelled");
                    return Err(ReceiveError::Cancelled);
                }
                res = self.source.pull() => res,
            };

            let message = match pulled {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        subscription = %subscription,
                        received = seq,
                        error = %e,
                        "Error receiving message"
                    );
                    return Err(ReceiveError::Pull(e));
                }
            };

            self.metrics.message_pulled(&subscription);
            debug!(
                subscription = %subscription,
                message_id = %message.message_id,
                delivery_attempt = ?message.delivery_attempt,
                "Dispatching message"
            );

            dispatched.handles.push(tokio::spawn(dispatch(
                Arc::clone(&self.source),
                Arc::clone(&handler),
                message,
                self.metrics.clone(),
            )));
        }

        Ok(dispatched)
    }
}

/// Handler tasks spawned by one `receive` call. Dropping this detaches them.
#[derive(Debug, Default)]
pub struct Dispatched {
    handles: Vec<JoinHandle<Disposition>>,
}

impl Dispatched {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every handler task and return the dispositions in dispatch
    /// order. A task that did not run to completion counts as pending.
    pub async fn settled(self) -> Vec<Disposition> {
        let mut dispositions = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            let disposition = match handle.await {
                Ok(disposition) => disposition,
                Err(e) => {
                    warn!(error = %e, "Dispatch task did not complete");
                    Disposition::Pending
                }
            };
            dispositions.push(disposition);
        }
        dispositions
    }
}

async fn dispatch<S, H>(
    source: Arc<S>,
    handler: Arc<H>,
    message: Message,
    metrics: WorkerMetrics,
) -> Disposition
where
    S: MessageSource + ?Sized + 'static,
    H: MessageHandler + ?Sized,
{
    let guard = DispositionGuard::new(source, &message);
    let subscription = guard.subscription().to_string();

    let started = Instant::now();
    let outcome = match AssertUnwindSafe(handler.handle(&message))
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    };
    metrics.handler_duration(&subscription, started.elapsed());

    if let Err(e) = &outcome {
        warn!(
            subscription = %subscription,
            message_id = %message.message_id,
            nackable = message.nackable,
            error = %e,
            "Handler failed"
        );
    }

    let disposition = guard.settle(outcome.is_ok()).await;
    metrics.message_settled(&subscription, disposition.as_str());
    debug!(
        subscription = %subscription,
        message_id = %message.message_id,
        disposition = %disposition,
        "Message settled"
    );
    disposition
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Owns the right to settle one message. Settling consumes the source, so a
/// message can be acked or nacked at most once.
struct DispositionGuard<S: MessageSource + ?Sized + 'static> {
    source: Option<Arc<S>>,
    ack_id: String,
    nackable: bool,
}

impl<S: MessageSource + ?Sized + 'static> DispositionGuard<S> {
    fn new(source: Arc<S>, message: &Message) -> Self {
        Self {
            source: Some(source),
            ack_id: message.ack_id.clone(),
            nackable: message.nackable,
        }
    }

    fn subscription(&self) -> &str {
        self.source.as_deref().map_or("", |s| s.name())
    }

    async fn settle(mut self, succeeded: bool) -> Disposition {
        let Some(source) = self.source.take() else {
            return Disposition::Pending;
        };

        if succeeded {
            match source.ack(&self.ack_id).await {
                Ok(()) => Disposition::Acked,
                Err(e) => {
                    warn!(subscription = %source.name(), error = %e, "Failed to ack message");
                    Disposition::Pending
                }
            }
        } else if self.nackable {
            match source.nack(&self.ack_id).await {
                Ok(()) => Disposition::Nacked,
                Err(e) => {
                    warn!(subscription = %source.name(), error = %e, "Failed to nack message");
                    Disposition::Pending
                }
            }
        } else {
            Disposition::Pending
        }
    }
}

impl<S: MessageSource + ?Sized + 'static> Drop for DispositionGuard<S> {
    fn drop(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        if !self.nackable {
            return;
        }
        // Only reachable when the dispatch task was dropped mid-handler.
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let ack_id = std::mem::take(&mut self.ack_id);
        runtime.spawn(async move {
            if let Err(e) = source.nack(&ack_id).await {
                warn!(subscription = %source.name(), error = %e, "Failed to nack abandoned message");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSource {
        acks: Mutex<Vec<String>>,
        nacks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageSource for RecordingSource {
        async fn pull(&self) -> Result<Message, GatewayError> {
            Err(GatewayError::other("not used"))
        }

        async fn ack(&self, ack_id: &str) -> Result<(), GatewayError> {
            self.acks.lock().unwrap().push(ack_id.to_string());
            Ok(())
        }

        async fn nack(&self, ack_id: &str) -> Result<(), GatewayError> {
            self.nacks.lock().unwrap().push(ack_id.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "orders.push.dlq.pull"
        }
    }

    #[tokio::test]
    async fn test_guard_settles_once() {
        let source = Arc::new(RecordingSource::default());
        let guard = DispositionGuard::new(Arc::clone(&source), &Message::new("m-1", "x"));

        assert_eq!(guard.settle(true).await, Disposition::Acked);
        tokio::task::yield_now().await;

        assert_eq!(*source.acks.lock().unwrap(), ["m-1"]);
        assert!(source.nacks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsettled_guard_nacks_on_drop() {
        let source = Arc::new(RecordingSource::default());
        drop(DispositionGuard::new(
            Arc::clone(&source),
            &Message::new("m-2", "x"),
        ));

        for _ in 0..10 {
            if !source.nacks.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*source.nacks.lock().unwrap(), ["m-2"]);
        assert!(source.acks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsettled_non_nackable_guard_does_nothing() {
        let source = Arc::new(RecordingSource::default());
        drop(DispositionGuard::new(
            Arc::clone(&source),
            &Message::new("m-3", "x").with_nackable(false),
        ));
        tokio::task::yield_now().await;

        assert!(source.acks.lock().unwrap().is_empty());
        assert!(source.nacks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
