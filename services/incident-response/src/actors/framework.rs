//! Core serialized-actor types.
//!
//! Provides the building blocks every stateful capability is built on:
//! - `Actor` trait for defining the state owner and its message handling
//! - `ActorHandle` for submitting messages and awaiting replies
//! - `spawn` to start the single worker that owns the actor
//!
//! Shutdown travels through the same mailbox as every other request, so it
//! is processed only after everything submitted before it.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines behavior for a serialized state owner.
///
/// Actors:
/// - Process messages one at a time (no internal concurrency)
/// - Own mutable state not shared with anything else
/// - Answer requests through a reply channel carried in the message
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message.
    ///
    /// A `Permanent` error stops the worker; any other error is logged and
    /// the next message is handled.
    async fn handle(
        &mut self,
        msg: Self::Message,
        ctx: &mut ActorContext,
    ) -> Result<(), ActorError>;

    /// Called once before the first message is handled.
    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called after the last message, before shutdown is acknowledged.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Context provided to actors during message handling.
#[derive(Debug)]
pub struct ActorContext {
    /// Actor's unique ID.
    pub actor_id: String,

    /// Message counter.
    pub messages_processed: u64,

    /// Current actor state (for introspection).
    pub state: ActorState,
}

impl ActorContext {
    /// Create a new actor context.
    pub fn new(actor_id: String) -> Self {
        Self {
            actor_id,
            messages_processed: 0,
            state: ActorState::Starting,
        }
    }
}

/// Actor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Actor is starting up.
    Starting,
    /// Actor is running and processing messages.
    Running,
    /// Actor is stopping.
    Stopping,
    /// Actor has stopped.
    Stopped,
    /// Actor has failed.
    Failed,
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur talking to an actor.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Actor has stopped or is shutting down; the request was not processed.
    #[error("actor stopped")]
    Stopped,

    /// Handler failure that stops the worker.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// =============================================================================
// Mailbox
// =============================================================================

/// What actually travels through the mailbox.
#[derive(Debug)]
enum Envelope<M> {
    Request(M),
    Shutdown,
}

// =============================================================================
// Actor Handle
// =============================================================================

/// Handle for sending messages to an actor.
///
/// Cheap to clone; every clone feeds the same mailbox.
pub struct ActorHandle<M: Message> {
    /// Sender for the actor's mailbox.
    tx: mpsc::Sender<Envelope<M>>,

    /// Set once shutdown has been requested through any clone.
    closing: Arc<AtomicBool>,

    /// Flips to `true` after `on_stop` has run and the mailbox is gone.
    stopped: watch::Receiver<bool>,

    /// Actor ID for logging.
    actor_id: Arc<str>,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closing: Arc::clone(&self.closing),
            stopped: self.stopped.clone(),
            actor_id: Arc::clone(&self.actor_id),
        }
    }
}

impl<M: Message> Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("actor_id", &self.actor_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M: Message> ActorHandle<M> {
    /// Send a message to the actor, waiting for mailbox capacity.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(ActorError::Stopped);
        }
        self.tx
            .send(Envelope::Request(msg))
            .await
            .map_err(|_| ActorError::Stopped)
    }

    /// Submit a request and wait for its reply.
    ///
    /// `make` receives the reply sender and builds the message around it.
    /// Once the message is in the mailbox it runs to completion even if the
    /// caller stops waiting.
    pub async fn call<T, F>(&self, make: F) -> Result<T, ActorError>
    where
        F: FnOnce(oneshot::Sender<T>) -> M,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| ActorError::Stopped)
    }

    /// Stop the actor after every previously submitted message.
    ///
    /// Returns once the worker has finished, `on_stop` included. New
    /// requests are refused from the moment this is called. Calling it
    /// again, from any clone, waits for the same worker to finish.
    pub async fn shutdown(&self) {
        if !self.closing.swap(true, Ordering::AcqRel)
            && self.tx.send(Envelope::Shutdown).await.is_err()
        {
            debug!(actor_id = %self.actor_id, "Actor already stopped");
        }
        self.stopped().await;
    }

    /// Wait until the worker has finished, however it stopped.
    pub async fn stopped(&self) {
        let mut stopped = self.stopped.clone();
        // An error means the worker is gone without publishing, e.g. it
        // panicked; either way there is nothing left to wait for.
        let _ = stopped.wait_for(|done| *done).await;
    }

    /// Returns true once shutdown was requested or the worker is gone.
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Get the actor ID.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

// =============================================================================
// Spawning
// =============================================================================

/// Spawn the worker that owns `actor` and return a handle to its mailbox.
///
/// Must be called from within a tokio runtime.
pub fn spawn<A>(actor: A, mailbox_size: usize) -> ActorHandle<A::Message>
where
    A: Actor,
{
    let actor_id = format!("{}_{}", actor.name(), generate_actor_id());
    let (tx, rx) = mpsc::channel(mailbox_size.max(1));
    let (stopped_tx, stopped_rx) = watch::channel(false);

    info!(actor_id = %actor_id, mailbox_size, "Spawned actor");

    tokio::spawn(run_actor_loop(actor, rx, stopped_tx, actor_id.clone()));

    ActorHandle {
        tx,
        closing: Arc::new(AtomicBool::new(false)),
        stopped: stopped_rx,
        actor_id: actor_id.into(),
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

/// Run the main actor loop.
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<Envelope<A::Message>>,
    stopped: watch::Sender<bool>,
    actor_id: String,
) {
    let mut ctx = ActorContext::new(actor_id.clone());

    if let Err(e) = actor.on_start(&mut ctx).await {
        error!(actor_id = %actor_id, error = %e, "Actor failed to start");
        drop(rx);
        stopped.send_replace(true);
        return;
    }

    ctx.state = ActorState::Running;
    debug!(actor_id = %actor_id, "Actor started");

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Shutdown => {
                info!(actor_id = %actor_id, "Actor received shutdown");
                break;
            }
            Envelope::Request(msg) => {
                ctx.messages_processed += 1;

                if let Err(e) = actor.handle(msg, &mut ctx).await {
                    error!(actor_id = %actor_id, error = %e, "Actor error");
                    if matches!(e, ActorError::Permanent(_)) {
                        ctx.state = ActorState::Failed;
                        break;
                    }
                }
            }
        }
    }

    // Refuse anything that raced in behind the shutdown message. Dropping a
    // request drops its reply sender, which the caller sees as `Stopped`.
    rx.close();
    let mut rejected = 0usize;
    while let Ok(envelope) = rx.try_recv() {
        if let Envelope::Request(_) = envelope {
            rejected += 1;
        }
    }
    if rejected > 0 {
        warn!(actor_id = %actor_id, rejected, "Rejected requests queued behind shutdown");
    }

    if ctx.state != ActorState::Failed {
        ctx.state = ActorState::Stopping;
    }
    actor.on_stop(&mut ctx).await;
    if ctx.state != ActorState::Failed {
        ctx.state = ActorState::Stopped;
    }

    info!(
        actor_id = %actor_id,
        messages_processed = ctx.messages_processed,
        state = ?ctx.state,
        "Actor stopped"
    );

    drop(rx);
    stopped.send_replace(true);
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    enum CounterMessage {
        Add {
            amount: u64,
            delay: Duration,
            reply_to: oneshot::Sender<u64>,
        },
        Get {
            reply_to: oneshot::Sender<u64>,
        },
        Fail,
        Crash,
    }

    struct CounterActor {
        value: u64,
        stop_delay: Duration,
        stopped: Arc<AtomicBool>,
    }

    impl CounterActor {
        fn new() -> (Self, Arc<AtomicBool>) {
            Self::with_stop_delay(Duration::ZERO)
        }

        fn with_stop_delay(stop_delay: Duration) -> (Self, Arc<AtomicBool>) {
            let stopped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    value: 0,
                    stop_delay,
                    stopped: Arc::clone(&stopped),
                },
                stopped,
            )
        }
    }

    #[async_trait]
    impl Actor for CounterActor {
        type Message = CounterMessage;

        fn name(&self) -> &str {
            "counter"
        }

        async fn handle(
            &mut self,
            msg: CounterMessage,
            _ctx: &mut ActorContext,
        ) -> Result<(), ActorError> {
            match msg {
                CounterMessage::Add {
                    amount,
                    delay,
                    reply_to,
                } => {
                    // Read-modify-write across an await point: only safe
                    // because nothing else touches `value` meanwhile.
                    let current = self.value;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    self.value = current + amount;
                    let _ = reply_to.send(self.value);
                }
                CounterMessage::Get { reply_to } => {
                    let _ = reply_to.send(self.value);
                }
                CounterMessage::Fail => {
                    return Err(ActorError::Internal(anyhow::anyhow!("transient")));
                }
                CounterMessage::Crash => {
                    return Err(ActorError::Permanent("crash requested".to_string()));
                }
            }
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &mut ActorContext) {
            if !self.stop_delay.is_zero() {
                tokio::time::sleep(self.stop_delay).await;
            }
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn add(amount: u64) -> impl FnOnce(oneshot::Sender<u64>) -> CounterMessage {
        move |reply_to| CounterMessage::Add {
            amount,
            delay: Duration::ZERO,
            reply_to,
        }
    }

    #[tokio::test]
    async fn test_call_returns_reply() {
        let (actor, _) = CounterActor::new();
        let handle = spawn(actor, 8);

        assert_eq!(handle.call(add(3)).await.unwrap(), 3);
        assert_eq!(handle.call(add(4)).await.unwrap(), 7);
        assert!(handle.actor_id().starts_with("counter_"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_linearized() {
        let (actor, _) = CounterActor::new();
        let handle = spawn(actor, 4);

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .call(|reply_to| CounterMessage::Add {
                        amount: 1,
                        delay: Duration::from_millis(1),
                        reply_to,
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut seen = Vec::new();
        for task in tasks {
            seen.push(task.await.unwrap());
        }
        seen.sort_unstable();

        // Every increment observed a distinct predecessor: no lost updates.
        assert_eq!(seen, (1..=32).collect::<Vec<_>>());
        let total = handle
            .call(|reply_to| CounterMessage::Get { reply_to })
            .await
            .unwrap();
        assert_eq!(total, 32);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_runs_after_pending_messages() {
        let (actor, stopped) = CounterActor::new();
        let handle = spawn(actor, 16);

        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        handle
            .send(CounterMessage::Add {
                amount: 5,
                delay: Duration::from_millis(20),
                reply_to: first_tx,
            })
            .await
            .unwrap();
        handle
            .send(CounterMessage::Add {
                amount: 5,
                delay: Duration::ZERO,
                reply_to: second_tx,
            })
            .await
            .unwrap();

        handle.shutdown().await;

        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(first_rx.await.unwrap(), 5);
        assert_eq!(second_rx.await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_are_refused() {
        let (actor, _) = CounterActor::new();
        let handle = spawn(actor, 8);
        let other = handle.clone();

        handle.shutdown().await;

        assert!(other.is_closed());
        assert!(matches!(other.call(add(1)).await, Err(ActorError::Stopped)));
        assert!(matches!(
            other.send(CounterMessage::Crash).await,
            Err(ActorError::Stopped)
        ));

        // Second shutdown is a no-op.
        other.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_call_still_completes() {
        let (actor, _) = CounterActor::new();
        let handle = spawn(actor, 8);

        let slow = handle.call(|reply_to| CounterMessage::Add {
            amount: 9,
            delay: Duration::from_millis(30),
            reply_to,
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(5), slow).await;
        assert!(timed_out.is_err());

        // The abandoned add still lands before this read.
        let total = handle
            .call(|reply_to| CounterMessage::Get { reply_to })
            .await
            .unwrap();
        assert_eq!(total, 9);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_permanent_error_stops_worker() {
        let (actor, stopped) = CounterActor::new();
        let handle = spawn(actor, 8);

        handle.send(CounterMessage::Crash).await.unwrap();
        handle.stopped().await;

        assert!(stopped.load(Ordering::SeqCst));
        assert!(handle.is_closed());
        assert!(matches!(handle.call(add(1)).await, Err(ActorError::Stopped)));
    }

    #[tokio::test]
    async fn test_recoverable_error_keeps_worker_running() {
        let (actor, stopped) = CounterActor::new();
        let handle = spawn(actor, 8);

        handle.send(CounterMessage::Fail).await.unwrap();
        assert_eq!(handle.call(add(2)).await.unwrap(), 2);
        assert!(!stopped.load(Ordering::SeqCst));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_every_shutdown_caller_waits_for_on_stop() {
        let (actor, stopped) = CounterActor::with_stop_delay(Duration::from_millis(100));
        let handle = spawn(actor, 8);
        let other = handle.clone();

        let first = tokio::spawn({
            let handle = handle.clone();
            let stopped = Arc::clone(&stopped);
            async move {
                handle.shutdown().await;
                stopped.load(Ordering::SeqCst)
            }
        });
        // Let the first caller claim the shutdown.
        tokio::time::sleep(Duration::from_millis(10)).await;

        other.shutdown().await;
        assert!(stopped.load(Ordering::SeqCst));
        assert!(first.await.unwrap());

        // Late callers return at once.
        handle.shutdown().await;
    }
}
