use std::collections::HashMap;
use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type TaskEventSender<T> = mpsc::Sender<TaskEvent<T>>;

#[derive(Debug)]
pub enum TaskEvent<T> {
    /// The task ran to completion with this output.
    Finished(u64, T),
    /// The task observed its token and stopped early.
    Cancelled(u64),
}

impl<T> TaskEvent<T> {
    pub fn id(&self) -> u64 {
        match self {
            Self::Finished(id, _) | Self::Cancelled(id) => *id,
        }
    }
}

/// Tracks spawned async jobs and reports their completion on one channel.
///
/// Each task receives a child of the pool's token, so [`TaskPool::cancel_all`]
/// reaches every task while [`TaskPool::cancel`] reaches just one.
pub struct TaskPool<T> {
    tasks: HashMap<u64, CancellationToken>,
    next_id: u64,
    root: CancellationToken,
    pool_rx: mpsc::Receiver<TaskEvent<T>>,
    pool_tx: TaskEventSender<T>,
}

impl<T: Send + 'static> TaskPool<T> {
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::channel(64);
        Self {
            tasks: HashMap::new(),
            next_id: 1,
            root: CancellationToken::new(),
            pool_rx,
            pool_tx,
        }
    }

    /// Spawn `f` with its own cancellation token; returns the task id.
    ///
    /// The future is raced against the token, so `f` does not have to
    /// poll it itself, but it may pass it on to cooperative callees.
    pub fn spawn<F, Fut>(&mut self, f: F) -> u64
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        let cancel = self.root.child_token();
        let token = cancel.clone();
        let event_tx = self.pool_tx.clone();
        tokio::spawn(async move {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => TaskEvent::Cancelled(id),
                output = f(token.clone()) => TaskEvent::Finished(id, output),
            };
            let _ = event_tx.send(event).await;
        });

        debug!(task = id, "task spawned");
        self.tasks.insert(id, cancel);
        id
    }

    /// Next completion. Never returns `None` while the pool is alive.
    pub async fn recv(&mut self) -> Option<TaskEvent<T>> {
        let event = self.pool_rx.recv().await?;
        self.tasks.remove(&event.id());
        Some(event)
    }

    /// Ask one task to stop. It reports `Cancelled` once it has.
    pub fn cancel(&self, id: u64) -> bool {
        match self.tasks.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running task. Tasks spawned afterwards are unaffected.
    pub fn cancel_all(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        debug!(count = self.tasks.len(), "cancelling all tasks");
        self.root.cancel();
        self.root = CancellationToken::new();
    }

    /// Tasks spawned and not yet reported through [`TaskPool::recv`].
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T: Send + 'static> Default for TaskPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for TaskPool<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
