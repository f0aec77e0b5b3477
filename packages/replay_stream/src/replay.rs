//! Replayable multicast of a single upstream stream.
//!
//! A [`ReplayBroadcaster`] drives its upstream to completion exactly once,
//! starting as soon as it is constructed. Every element is appended to an
//! append-only history and forwarded to each attached consumer. A consumer
//! that attaches late first receives the history, then the live tail, so
//! every consumer observes the whole sequence exactly once and in order.
//!
//! Attaching takes the history snapshot and registers the consumer's queue
//! under the same lock the pump holds while appending and fanning out, so an
//! element is either in the snapshot or in the queue, never both.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StreamError;

/// How the upstream ended. Errors are shared because every waiter sees the
/// same one.
pub type Completion = Result<(), Arc<StreamError>>;

struct Shared<T> {
    history: Vec<T>,
    consumers: Vec<mpsc::UnboundedSender<T>>,
    finished: bool,
    disposed: bool,
}

/// Multicasts one upstream stream to any number of late-joining consumers.
pub struct ReplayBroadcaster<T> {
    shared: Arc<Mutex<Shared<T>>>,
    completion: watch::Receiver<Option<Completion>>,
    cancel: CancellationToken,
}

impl<T> ReplayBroadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Start pumping `upstream` immediately. Must be called within a Tokio
    /// runtime.
    pub fn new<S>(upstream: S) -> Self
    where
        S: Stream<Item = Result<T, StreamError>> + Send + 'static,
    {
        Self::with_cancellation(upstream, CancellationToken::new())
    }

    /// Like [`ReplayBroadcaster::new`], stopping the pump when `cancel` fires.
    /// The upstream is dropped at that point, releasing its byte source.
    pub fn with_cancellation<S>(upstream: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<T, StreamError>> + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(Shared {
            history: Vec::new(),
            consumers: Vec::new(),
            finished: false,
            disposed: false,
        }));
        let (completion_tx, completion) = watch::channel(None);

        tokio::spawn(pump(
            Box::pin(upstream),
            shared.clone(),
            completion_tx,
            cancel.clone(),
        ));

        Self {
            shared,
            completion,
            cancel,
        }
    }

    /// Attach a new consumer.
    ///
    /// The returned stream yields the full history collected so far, then
    /// every element produced afterwards, and ends when the upstream ends (or
    /// when the broadcaster is disposed).
    pub fn attach(&self) -> ReplayStream<T> {
        let mut shared = self.shared.lock();
        let snapshot: VecDeque<T> = shared.history.iter().cloned().collect();

        let live = if shared.finished || shared.disposed {
            None
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            shared.consumers.push(tx);
            Some(rx)
        };

        debug!(
            replayed = snapshot.len(),
            live = live.is_some(),
            "consumer attached"
        );
        ReplayStream { snapshot, live }
    }

    /// Number of elements produced so far.
    pub fn history_len(&self) -> usize {
        self.shared.lock().history.len()
    }

    /// Copy of the history collected so far.
    pub fn history(&self) -> Vec<T> {
        self.shared.lock().history.clone()
    }

    /// Number of consumers currently receiving live elements.
    pub fn consumer_count(&self) -> usize {
        let mut shared = self.shared.lock();
        shared.consumers.retain(|tx| !tx.is_closed());
        shared.consumers.len()
    }

    /// Whether the upstream has ended (normally, with an error, or cancelled).
    pub fn is_finished(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Wait for the upstream to end and report how it ended.
    pub fn finished(&self) -> impl Future<Output = Completion> + Send + 'static {
        wait_for_completion(self.completion.clone())
    }

    /// A receiver that observes completion independently of the broadcaster's
    /// own lifetime.
    pub fn completion(&self) -> watch::Receiver<Option<Completion>> {
        self.completion.clone()
    }

    /// Stop forwarding to consumers and cancel the pump. Idempotent.
    ///
    /// Attached consumers end after draining what they have already been
    /// sent. The history is kept until the broadcaster is dropped.
    pub fn dispose(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            shared.consumers.clear();
        }
        self.cancel.cancel();
        debug!("replay broadcaster disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }
}

/// Resolve once the watched completion is set. A pump that vanished without
/// reporting counts as cancelled.
pub async fn wait_for_completion(mut rx: watch::Receiver<Option<Completion>>) -> Completion {
    match rx.wait_for(Option::is_some).await {
        Ok(done) => (*done).clone().unwrap_or(Ok(())),
        Err(_) => Err(Arc::new(StreamError::Cancelled)),
    }
}

async fn pump<T, S>(
    mut upstream: Pin<Box<S>>,
    shared: Arc<Mutex<Shared<T>>>,
    completion: watch::Sender<Option<Completion>>,
    cancel: CancellationToken,
) where
    T: Clone + Send + 'static,
    S: Stream<Item = Result<T, StreamError>> + Send,
{
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(StreamError::Cancelled),
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(element)) => {
                let mut shared = shared.lock();
                shared.history.push(element.clone());
                if !shared.disposed {
                    shared
                        .consumers
                        .retain(|tx| tx.send(element.clone()).is_ok());
                }
            }
            Some(Err(e)) => break Err(e),
            None => break Ok(()),
        }
    };
    drop(upstream);

    let produced = {
        let mut shared = shared.lock();
        shared.finished = true;
        // Dropping the senders ends every consumer after it drains its queue
        shared.consumers.clear();
        shared.history.len()
    };

    match &outcome {
        Ok(()) => debug!(produced, "upstream finished"),
        Err(e) if e.is_cancelled() => debug!(produced, "upstream cancelled"),
        Err(e) => warn!(produced, error = %e, "upstream failed"),
    }

    completion.send_replace(Some(outcome.map_err(Arc::new)));
}

/// One consumer's view: the history snapshot taken at attach time followed by
/// the live queue. Dropping it detaches the consumer.
pub struct ReplayStream<T> {
    snapshot: VecDeque<T>,
    live: Option<mpsc::UnboundedReceiver<T>>,
}

impl<T> ReplayStream<T> {
    /// Elements still waiting in the replayed snapshot.
    pub fn replay_remaining(&self) -> usize {
        self.snapshot.len()
    }

    /// Whether this consumer will receive live elements after the snapshot.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }
}

/// An already-ended stream, for callers whose broadcaster is gone.
impl<T> Default for ReplayStream<T> {
    fn default() -> Self {
        Self {
            snapshot: VecDeque::new(),
            live: None,
        }
    }
}

// No structural pinning: the snapshot and receiver are never pinned.
impl<T> Unpin for ReplayStream<T> {}

impl<T> Stream for ReplayStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if let Some(element) = this.snapshot.pop_front() {
            return Poll::Ready(Some(element));
        }
        match this.live.as_mut() {
            Some(rx) => match rx.poll_recv(cx) {
                Poll::Ready(None) => {
                    this.live = None;
                    Poll::Ready(None)
                }
                other => other,
            },
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.live {
            Some(_) => (self.snapshot.len(), None),
            None => (self.snapshot.len(), Some(self.snapshot.len())),
        }
    }
}
