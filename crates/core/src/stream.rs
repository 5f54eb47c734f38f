// Streaming run plumbing
//
// A streaming run executes on its own task and pushes StreamEvents through a
// bounded channel. The consumer owns the task: dropping or cancelling the
// stream aborts it, which stops backend requests and emits nothing further.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use strand_schemas::StreamEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RuntimeError};
use crate::traits::EventEmitter;

/// Channel capacity between a streaming run and its consumer
pub(crate) const STREAM_BUFFER: usize = 64;

/// Emitter forwarding events into an mpsc channel
///
/// A closed channel means the consumer is gone; the run stops with `Cancelled`.
#[derive(Debug, Clone)]
pub struct ChannelEventEmitter {
    sender: mpsc::Sender<StreamEvent>,
}

impl ChannelEventEmitter {
    pub fn new(sender: mpsc::Sender<StreamEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventEmitter for ChannelEventEmitter {
    async fn emit(&self, event: StreamEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| RuntimeError::Cancelled)
    }
}

/// Ordered, finite stream of events for one run
///
/// Ends after the `done` event. Must be created inside a Tokio runtime.
pub struct AgentEventStream {
    events: ReceiverStream<StreamEvent>,
    task: JoinHandle<()>,
    cancel: CancellationToken,
    finished: bool,
}

impl AgentEventStream {
    pub(crate) fn new(
        receiver: mpsc::Receiver<StreamEvent>,
        task: JoinHandle<()>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events: ReceiverStream::new(receiver),
            task,
            cancel,
            finished: false,
        }
    }

    /// Stop the run. No further events are yielded, including buffered ones.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.task.abort();
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Stream for AgentEventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished || this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_done() {
                    this.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for AgentEventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl std::fmt::Debug for AgentEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEventStream")
            .field("finished", &self.finished)
            .finish()
    }
}
