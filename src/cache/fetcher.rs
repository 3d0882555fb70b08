//! Bounded chunk fetcher pool.
//!
//! A fixed set of worker threads turns `(object, chunk)` requests into
//! decoded chunk payloads. Workers never touch shared engine state: each
//! job carries everything it needs, and completions flow back over a
//! single-reader channel the cache drains on the orchestrator thread.
//!
//! There is no cancellation — a fetch that loses relevance still
//! completes, and the page it fills is simply evicted again once cold.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::errors::EngineError;
use crate::format::{ChunkEntry, ChunkSource, decode_chunk};
use crate::lod::{LodNode, TreeId};

/// One fetch+decode request.
pub struct FetchJob {
    /// Object whose container holds the chunk.
    pub tree: TreeId,
    /// Chunk id within the container.
    pub chunk: u32,
    /// Byte source for the container.
    pub source: Arc<ChunkSource>,
    /// The chunk's directory entry (byte range).
    pub entry: ChunkEntry,
}

/// A successfully fetched and verified chunk.
pub struct FetchedChunk {
    /// Object the chunk belongs to.
    pub tree: TreeId,
    /// Chunk id within the container.
    pub chunk: u32,
    /// Decoded tree nodes.
    pub nodes: Vec<LodNode>,
    /// Encoded splat payload, ready for page upload.
    pub payload: Vec<u8>,
}

/// Completion record for one job.
pub enum FetchOutcome {
    /// Chunk fetched and checksum-verified.
    Fetched(FetchedChunk),
    /// Fetch or decode failed; the chunk is dropped and a later traversal
    /// will re-request it.
    Failed {
        /// Object the failed chunk belongs to.
        tree: TreeId,
        /// The failed chunk id.
        chunk: u32,
    },
}

/// Fixed pool of fetch/decode worker threads.
pub struct FetcherPool {
    jobs: Option<flume::Sender<FetchJob>>,
    completed: flume::Receiver<FetchOutcome>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl FetcherPool {
    /// Spawns `num_fetchers` workers.
    #[must_use]
    pub fn new(num_fetchers: usize) -> Self {
        let (job_tx, job_rx) = flume::unbounded::<FetchJob>();
        let (done_tx, done_rx) = flume::unbounded::<FetchOutcome>();

        let workers = (0..num_fetchers)
            .map(|i| {
                let jobs = job_rx.clone();
                let done = done_tx.clone();
                std::thread::Builder::new()
                    .name(format!("veil-fetch-{i}"))
                    .spawn(move || {
                        while let Ok(job) = jobs.recv() {
                            let outcome = run_job(&job);
                            if done.send(outcome).is_err() {
                                break;
                            }
                        }
                    })
                    .expect("spawn fetcher thread")
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            completed: done_rx,
            workers,
            capacity: num_fetchers,
        }
    }

    /// Maximum number of concurrently-running fetches.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues a fetch. Returns `false` after disposal.
    pub fn dispatch(&self, job: FetchJob) -> bool {
        self.jobs
            .as_ref()
            .is_some_and(|jobs| jobs.send(job).is_ok())
    }

    /// Drains every completion currently available, without blocking.
    pub fn drain_completed(&self) -> Vec<FetchOutcome> {
        self.completed.try_iter().collect()
    }

    /// Stops the workers and waits for them to exit. In-flight jobs run to
    /// completion; their results are discarded.
    pub fn dispose(&mut self) {
        self.jobs = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for FetcherPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_job(job: &FetchJob) -> FetchOutcome {
    match fetch_and_decode(job) {
        Ok(fetched) => FetchOutcome::Fetched(fetched),
        Err(err) => {
            log::warn!(
                "chunk fetch failed (chunk {} of paged object): {err}",
                job.chunk
            );
            FetchOutcome::Failed {
                tree: job.tree,
                chunk: job.chunk,
            }
        }
    }
}

fn fetch_and_decode(job: &FetchJob) -> crate::errors::Result<FetchedChunk> {
    let bytes = job
        .source
        .read_range(job.entry.offset, job.entry.byte_len as usize)?;
    let decoded = decode_chunk(&bytes)?;
    if decoded.chunk_id != job.chunk {
        return Err(EngineError::ChunkDecodeFailed {
            chunk: job.chunk,
            reason: format!("container returned chunk {}", decoded.chunk_id),
        });
    }
    Ok(FetchedChunk {
        tree: job.tree,
        chunk: job.chunk,
        nodes: decoded.nodes,
        payload: decoded.payload,
    })
}
