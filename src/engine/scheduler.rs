//! Fixed-size worker pool with FIFO dispatch
//!
//! - One control task owns the queue and the idle-worker list
//! - Workers are plain tokio tasks, one pending task each, no work stealing
//! - Saturation backs up into the queue, never into extra concurrency
//! - Shutdown stops intake, fails queued work, lets in-flight batches finish

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::executor::BatchExecutor;
use super::TaskError;
use crate::types::{Address, BatchResult};

/// Unit of work handed to one worker
struct Task {
    batch: Vec<Address>,
    now: i64,
    done: oneshot::Sender<Result<BatchResult, TaskError>>,
}

enum ControlMessage {
    Submit(Task),
    Shutdown,
}

/// Bounded pool of batch executors behind a single submission channel
pub struct WorkerPool {
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    control_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    busy: Arc<AtomicUsize>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` workers sharing one executor
    pub fn new(executor: Arc<BatchExecutor>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let busy = Arc::new(AtomicUsize::new(0));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(control_loop(
            executor,
            worker_count,
            control_rx,
            Arc::clone(&busy),
        ));

        log::info!("👷 Worker pool started with {} workers", worker_count);

        Self {
            control_tx,
            control_handle: Mutex::new(Some(handle)),
            busy,
            worker_count,
        }
    }

    /// Queue a batch; the receiver resolves when a worker finishes it
    pub fn submit(
        &self,
        batch: Vec<Address>,
        now: i64,
    ) -> oneshot::Receiver<Result<BatchResult, TaskError>> {
        let (done_tx, done_rx) = oneshot::channel();
        let task = Task {
            batch,
            now,
            done: done_tx,
        };
        if self
            .control_tx
            .send(ControlMessage::Submit(task))
            .is_err()
        {
            // Pool already shut down; the dropped sender resolves the
            // receiver with RecvError, which callers map to Shutdown
            log::warn!("⚠️  Batch submitted after pool shutdown");
        }
        done_rx
    }

    /// Fraction of workers currently running a batch
    pub fn utilization(&self) -> f64 {
        self.busy.load(Ordering::Relaxed) as f64 / self.worker_count as f64
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stop intake, fail queued tasks, wait for in-flight batches
    pub async fn shutdown(&self) {
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        let handle = self.control_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("⚠️  Worker pool teardown error: {}", e);
            }
        }
        log::info!("👷 Worker pool stopped");
    }
}

async fn control_loop(
    executor: Arc<BatchExecutor>,
    worker_count: usize,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    busy: Arc<AtomicUsize>,
) {
    let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<usize>();

    let mut worker_txs = Vec::with_capacity(worker_count);
    let mut worker_handles = Vec::with_capacity(worker_count);
    let mut idle_workers: Vec<usize> = (0..worker_count).collect();

    for id in 0..worker_count {
        let (task_tx, task_rx) = mpsc::unbounded_channel::<Task>();
        worker_txs.push(task_tx);
        worker_handles.push(tokio::spawn(worker_loop(
            id,
            Arc::clone(&executor),
            task_rx,
            idle_tx.clone(),
            Arc::clone(&busy),
        )));
    }
    drop(idle_tx);

    let mut queue: VecDeque<Task> = VecDeque::new();
    let mut shutting_down = false;

    loop {
        tokio::select! {
            message = control_rx.recv(), if !shutting_down => {
                match message {
                    Some(ControlMessage::Submit(task)) => {
                        queue.push_back(task);
                        dispatch(&mut queue, &mut idle_workers, &worker_txs);
                    }
                    Some(ControlMessage::Shutdown) | None => {
                        shutting_down = true;
                        for task in queue.drain(..) {
                            let _ = task.done.send(Err(TaskError::Shutdown));
                        }
                        if idle_workers.len() == worker_count {
                            break;
                        }
                    }
                }
            }
            returned = idle_rx.recv() => {
                match returned {
                    Some(id) => {
                        idle_workers.push(id);
                        if shutting_down {
                            if idle_workers.len() == worker_count {
                                break;
                            }
                        } else {
                            dispatch(&mut queue, &mut idle_workers, &worker_txs);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Closing the task channels lets each worker loop exit
    drop(worker_txs);
    for handle in worker_handles {
        if let Err(e) = handle.await {
            log::warn!("⚠️  Worker exited abnormally: {}", e);
        }
    }
}

fn dispatch(
    queue: &mut VecDeque<Task>,
    idle_workers: &mut Vec<usize>,
    worker_txs: &[mpsc::UnboundedSender<Task>],
) {
    while !queue.is_empty() {
        let id = match idle_workers.pop() {
            Some(id) => id,
            None => break,
        };
        let task = match queue.pop_front() {
            Some(task) => task,
            None => {
                idle_workers.push(id);
                break;
            }
        };
        if worker_txs[id].send(task).is_err() {
            log::warn!("⚠️  Worker {} channel closed, dropping from rotation", id);
        }
    }
}

async fn worker_loop(
    id: usize,
    executor: Arc<BatchExecutor>,
    mut task_rx: mpsc::UnboundedReceiver<Task>,
    idle_tx: mpsc::UnboundedSender<usize>,
    busy: Arc<AtomicUsize>,
) {
    while let Some(task) = task_rx.recv().await {
        busy.fetch_add(1, Ordering::Relaxed);
        log::debug!("👷 Worker {} picked up batch of {}", id, task.batch.len());

        let result = executor.run(&task.batch, task.now).await;
        // Receiver may have been dropped by a stopped caller; fine either way
        let _ = task.done.send(result);

        busy.fetch_sub(1, Ordering::Relaxed);
        if idle_tx.send(id).is_err() {
            break;
        }
    }
}
