//! One worker thread per device slot.
//!
//! Each slot has its own task queue and its own `ChunkWorker`, so model
//! instances never cross threads. All slots report on a single result
//! channel, in completion order.

use crate::error::{NarrateError, Result};
use crate::generation::task::{Task, TaskResult};
use crate::generation::worker::ChunkWorker;
use crate::models::ModelFactory;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current run stop as soon as possible.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    queues: Vec<Sender<Task>>,
    results: Receiver<TaskResult>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start one worker per entry in `devices`.
    pub fn spawn(
        devices: &[String],
        factory: Arc<dyn ModelFactory>,
        stop: StopHandle,
    ) -> Result<Self> {
        let (result_tx, results) = unbounded();
        let mut queues = Vec::with_capacity(devices.len());
        let mut threads = Vec::with_capacity(devices.len());

        for (slot, device) in devices.iter().enumerate() {
            let (task_tx, task_rx) = unbounded::<Task>();
            let worker = ChunkWorker::new(device.clone(), Arc::clone(&factory));
            let result_tx = result_tx.clone();
            let stop = stop.clone();
            let handle = thread::Builder::new()
                .name(format!("narrate-worker-{slot}"))
                .spawn(move || worker_loop(worker, task_rx, result_tx, stop))?;
            queues.push(task_tx);
            threads.push(handle);
        }

        Ok(Self {
            queues,
            results,
            threads,
        })
    }

    pub fn slots(&self) -> usize {
        self.queues.len()
    }

    /// Queue a task on one slot.
    pub fn submit(&self, slot: usize, task: Task) -> Result<()> {
        let queue = self.queues.get(slot).ok_or_else(|| {
            NarrateError::Other(format!("no worker slot {slot}"))
        })?;
        queue
            .send(task)
            .map_err(|_| NarrateError::Other(format!("worker slot {slot} has exited")))
    }

    /// Stop accepting tasks; workers exit once their queues drain.
    pub fn close(&mut self) {
        self.queues.clear();
    }

    /// Next completed result, or `None` once every worker has exited.
    pub fn recv(&self) -> Option<TaskResult> {
        self.results.recv().ok()
    }

    /// Close the queues and wait for every worker to finish its current task.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.close();
        for handle in self.threads.drain(..) {
            if let Err(panic_info) = handle.join() {
                let msg = panic_info
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                    .unwrap_or("unknown panic");
                log::error!("pool: worker thread panicked: {msg}");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    mut worker: ChunkWorker,
    tasks: Receiver<Task>,
    results: Sender<TaskResult>,
    stop: StopHandle,
) {
    for task in tasks {
        if stop.is_stopped() {
            log::debug!(
                "worker[{}]: stop requested, skipping chunk {}",
                worker.device(),
                task.chunk_id.short()
            );
            continue;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| worker.process(&task)))
            .unwrap_or_else(|_| {
                log::error!(
                    "worker[{}]: panicked on chunk {}",
                    worker.device(),
                    task.chunk_id.short()
                );
                TaskResult::error(&task.chunk_id, "worker panicked during generation")
            });
        if results.send(result).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::task::ResultStatus;
    use crate::models::MockModelFactory;
    use crate::session::ChunkId;
    use crate::tts::SamplingParams;
    use std::path::Path;

    fn task(dir: &Path, device: &str) -> Task {
        let chunk_id = ChunkId::generate();
        Task {
            artifact_path: dir.join(format!("audio_{chunk_id}.wav")),
            chunk_id,
            sequence: 1,
            text: "pool test".to_string(),
            device: device.to_string(),
            master_seed: 3,
            num_candidates: 1,
            max_attempts: 1,
            asr_threshold: 0.5,
            validation_enabled: true,
            voice_reference: None,
            params: SamplingParams::default(),
            temp_dir: dir.join("tmp"),
        }
    }

    #[test]
    fn results_arrive_for_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let devices = vec!["cuda:0".to_string(), "cuda:1".to_string()];
        let factory = MockModelFactory::new();
        let mut pool = WorkerPool::spawn(&devices, Arc::new(factory.clone()), StopHandle::new())
            .unwrap();

        for i in 0..6 {
            pool.submit(i % 2, task(dir.path(), &devices[i % 2])).unwrap();
        }
        pool.close();

        let mut received = 0;
        while let Some(result) = pool.recv() {
            assert_eq!(result.status, ResultStatus::Success);
            received += 1;
        }
        pool.join();

        assert_eq!(received, 6);
        // one model load per slot, reused across its tasks
        assert_eq!(factory.loads(), 2);
    }

    #[test]
    fn stopped_pool_skips_queued_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopHandle::new();
        stop.stop();
        let mut pool = WorkerPool::spawn(
            &["cpu".to_string()],
            Arc::new(MockModelFactory::new()),
            stop,
        )
        .unwrap();

        pool.submit(0, task(dir.path(), "cpu")).unwrap();
        pool.close();

        assert!(pool.recv().is_none());
    }

    #[test]
    fn submit_to_missing_slot_fails() {
        let pool = WorkerPool::spawn(
            &["cpu".to_string()],
            Arc::new(MockModelFactory::new()),
            StopHandle::new(),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(pool.submit(3, task(dir.path(), "cpu")).is_err());
    }
}
