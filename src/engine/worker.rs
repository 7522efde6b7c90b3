//! Debounced background regeneration worker.
//!
//! Incremental song edits are cheap to classify but expensive to render, so
//! submissions are coalesced: the worker waits for a quiet period before
//! regenerating, and enforces a minimum gap after producing a result before
//! the next run starts. Submissions arriving during the gap are merged into
//! the next run rather than dropped.

use super::{GenerationEngine, GenerationError};
use crate::midi::Phrase;
use crate::song::{RenderingContext, Voice};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Debounce timing for the regeneration worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Quiet period after the last submission before regeneration starts.
    pub quiet_period: Duration,

    /// Minimum gap after producing a result before the next run may start.
    pub min_gap: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(300),
            min_gap: Duration::from_millis(700),
        }
    }
}

/// One regeneration submission.
#[derive(Debug, Clone)]
pub struct RegenerationRequest {
    /// The context to regenerate against (the latest submitted wins).
    pub context: RenderingContext,

    /// Voices whose phrases must be recomputed.
    pub voices: Vec<Voice>,

    /// Whether the control-marker data must be rebuilt.
    pub control: bool,
}

impl RegenerationRequest {
    /// Merges a later submission into this one: latest context wins, voice
    /// sets union, control flags or together.
    fn merge(&mut self, other: RegenerationRequest) {
        self.context = other.context;
        for voice in other.voices {
            if !self.voices.contains(&voice) {
                self.voices.push(voice);
            }
        }
        self.control |= other.control;
    }
}

/// Outcome of one coalesced regeneration run.
#[derive(Debug, Clone)]
pub struct RegenerationResult {
    /// The context the phrases were generated against.
    pub context: RenderingContext,

    /// Whether the control-marker data should be rebuilt by the consumer.
    pub control: bool,

    /// Freshly generated phrases for the requested voices, or the error
    /// that stopped the run.
    pub phrases: Result<HashMap<Voice, Phrase>, GenerationError>,
}

enum Msg {
    Submit(RegenerationRequest),
    Shutdown,
}

/// Background thread performing debounced phrase regeneration.
///
/// Results are delivered on a channel ([`results`]) that the owning session
/// drains from its own thread; the worker never touches session state.
///
/// [`results`]: RegenerationWorker::results
pub struct RegenerationWorker {
    tx: Sender<Msg>,
    results_rx: Receiver<RegenerationResult>,
    handle: Option<JoinHandle<()>>,
}

impl RegenerationWorker {
    /// Spawns the worker thread.
    pub fn new(engine: Arc<dyn GenerationEngine>, config: WorkerConfig) -> Self {
        let (tx, rx) = unbounded::<Msg>();
        let (results_tx, results_rx) = unbounded();

        let handle = thread::Builder::new()
            .name("backline-regen".into())
            .spawn(move || run_loop(engine, config, rx, results_tx))
            .expect("failed to spawn regeneration worker");

        Self {
            tx,
            results_rx,
            handle: Some(handle),
        }
    }

    /// Submits a regeneration request. Returns false if the worker has
    /// already shut down.
    pub fn submit(&self, request: RegenerationRequest) -> bool {
        self.tx.send(Msg::Submit(request)).is_ok()
    }

    /// The channel on which coalesced results arrive.
    pub fn results(&self) -> &Receiver<RegenerationResult> {
        &self.results_rx
    }
}

impl Drop for RegenerationWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    engine: Arc<dyn GenerationEngine>,
    config: WorkerConfig,
    rx: Receiver<Msg>,
    results_tx: Sender<RegenerationResult>,
) {
    // A batch buffered during the post-result gap seeds the next round.
    let mut carried: Option<RegenerationRequest> = None;

    loop {
        // Block for the first submission of a batch.
        let mut pending = match carried.take() {
            Some(req) => req,
            None => match rx.recv() {
                Ok(Msg::Submit(req)) => req,
                Ok(Msg::Shutdown) | Err(_) => return,
            },
        };

        // Debounce: keep merging until a full quiet period elapses.
        loop {
            match rx.recv_timeout(config.quiet_period) {
                Ok(Msg::Submit(req)) => pending.merge(req),
                Ok(Msg::Shutdown) => return,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        tracing::debug!(
            voices = pending.voices.len(),
            control = pending.control,
            "regenerating phrases"
        );

        let phrases = regenerate(engine.as_ref(), &pending);
        let result = RegenerationResult {
            context: pending.context,
            control: pending.control,
            phrases,
        };
        if results_tx.send(result).is_err() {
            return; // consumer gone
        }

        // Enforce the minimum gap; submissions received meanwhile start the
        // next batch instead of being lost.
        let deadline = Instant::now() + config.min_gap;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(Msg::Submit(req)) => match carried.as_mut() {
                    Some(batch) => batch.merge(req),
                    None => carried = Some(req),
                },
                Ok(Msg::Shutdown) => return,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

fn regenerate(
    engine: &dyn GenerationEngine,
    request: &RegenerationRequest,
) -> Result<HashMap<Voice, Phrase>, GenerationError> {
    request
        .voices
        .par_iter()
        .map(|voice| {
            engine
                .build_phrase(&request.context, voice)
                .map(|p| (voice.clone(), p))
        })
        .collect()
}
