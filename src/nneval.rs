//! Batching neural net evaluation server.
//!
//! Any number of client threads call [`NNEvaluator::evaluate`]. A miss in the
//! result cache reserves a row in the open batch, fills it outside the lock,
//! and then waits on the caller's own [`NNResultBuf`]. Server threads take
//! turns claiming a batch: the claiming thread waits for every reserved row to
//! be written, swaps the filled buffers for its own empty ones, and computes
//! the batch without holding the lock.

use std::f64::consts::TAU;
use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};

use crate::board::{Board, Player};
use crate::config::EvaluatorConfig;
use crate::constants::{LATEST_MODEL_VERSION, NUM_SYMMETRIES};
use crate::error::{Error, Result};
use crate::hash::hash_u64;
use crate::history::BoardHistory;
use crate::neuralnet::{ComputeHandle, ComputeHandleParams, InputBuffers, LoadedModel, NeuralNet};
use crate::nncache::NNCacheTable;
use crate::nninputs::{fill_row, get_hash, inputs_version_for_model, row_len};
use crate::nnoutput::{NNOutput, postprocess};

const LOG_TARGET: &str = "nneval";

/// Completion signal for one outstanding request.
#[derive(Default)]
struct ResultSlot {
    outcome: Mutex<Option<Result<NNOutput>>>,
    ready: Condvar,
}

impl ResultSlot {
    fn reset(&self) {
        *self.outcome.lock() = None;
    }

    fn deliver(&self, outcome: Result<NNOutput>) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_one();
    }

    fn wait(&self) -> Result<NNOutput> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.take() {
                return result;
            }
            self.ready.wait(&mut outcome);
        }
    }
}

/// Per-caller result holder. Reuse one per search thread.
#[derive(Default)]
pub struct NNResultBuf {
    pub result: Option<Arc<NNOutput>>,
    pub has_result: bool,
    /// Set after the first degenerate-policy warning for this buffer.
    pub error_log_lockout: bool,
    slot: Arc<ResultSlot>,
}

impl NNResultBuf {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A reserved row and the caller waiting for it.
struct PendingRow {
    slot: Arc<ResultSlot>,
    include_owner_map: bool,
}

struct BatchState {
    input_buffers: InputBuffers,
    pending: Vec<Option<PendingRow>>,
    num_rows_started: usize,
    num_rows_finished: usize,
    is_server_claiming: bool,
    is_killed: bool,
}

/// Buffers a server thread swaps with the shared batch.
struct ServerBuf {
    input_buffers: InputBuffers,
    pending: Vec<Option<PendingRow>>,
    outputs: Vec<NNOutput>,
}

struct Shared {
    state: Mutex<BatchState>,
    client_waiting_for_row: Condvar,
    server_waiting_for_batch_start: Condvar,
    server_waiting_for_batch_finish: Condvar,

    cache: Option<NNCacheTable>,
    model: Option<Arc<dyn LoadedModel>>,
    model_version: i32,
    inputs_version: i32,
    config: EvaluatorConfig,

    num_rows_processed: AtomicU64,
    num_batches_processed: AtomicU64,
}

pub struct NNEvaluator {
    shared: Arc<Shared>,
    server_threads: Vec<JoinHandle<()>>,
}

fn symmetry_flags(symmetry: u32) -> [bool; 3] {
    [symmetry & 1 != 0, symmetry & 2 != 0, symmetry & 4 != 0]
}

fn seed_for_thread(seed: &str, thread_idx: usize) -> u64 {
    if seed.is_empty() {
        return fastrand::u64(..);
    }
    format!("{seed}:{thread_idx}")
        .bytes()
        .fold(0u64, |acc, b| hash_u64(acc ^ u64::from(b)).hash0)
}

fn gaussian(rng: &mut fastrand::Rng) -> f32 {
    let u1 = 1.0 - rng.f64();
    let u2 = rng.f64();
    ((-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()) as f32
}

impl NNEvaluator {
    /// Validate `config`, load the model and allocate the cache. Server
    /// threads are started separately with [`spawn_server_threads`].
    ///
    /// [`spawn_server_threads`]: NNEvaluator::spawn_server_threads
    pub fn new(config: EvaluatorConfig, backend: Option<&dyn NeuralNet>) -> Result<Self> {
        config.validate()?;

        let model = if config.debug_skip_neural_net {
            None
        } else {
            let backend = backend.ok_or_else(|| {
                Error::Configuration("a neural net backend is required unless in debug mode".into())
            })?;
            let path = config
                .model_file
                .as_deref()
                .ok_or_else(|| Error::Configuration("model_file is not set".into()))?;
            Some(backend.load_model_file(path)?)
        };
        let model_version = model.as_ref().map_or(LATEST_MODEL_VERSION, |m| m.model_version());
        let inputs_version = inputs_version_for_model(model_version)?;

        let cache = config.nn_cache_size_power_of_two.map(NNCacheTable::new).transpose()?;

        let make_buffers = || -> Result<InputBuffers> {
            match &model {
                Some(m) => m.create_input_buffers(config.max_batch_size, config.pos_len),
                None => Ok(InputBuffers::new(config.max_batch_size, row_len(inputs_version, config.pos_len))),
            }
        };
        let state = BatchState {
            input_buffers: make_buffers()?,
            pending: (0..config.max_batch_size).map(|_| None).collect(),
            num_rows_started: 0,
            num_rows_finished: 0,
            is_server_claiming: false,
            is_killed: false,
        };

        info!(
            target: LOG_TARGET,
            "created evaluator: model version {model_version}, batch size {}, pos_len {}, debug {}",
            config.max_batch_size, config.pos_len, config.debug_skip_neural_net
        );

        Ok(NNEvaluator {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                client_waiting_for_row: Condvar::new(),
                server_waiting_for_batch_start: Condvar::new(),
                server_waiting_for_batch_finish: Condvar::new(),
                cache,
                model,
                model_version,
                inputs_version,
                config,
                num_rows_processed: AtomicU64::new(0),
                num_batches_processed: AtomicU64::new(0),
            }),
            server_threads: Vec::new(),
        })
    }

    pub fn model_version(&self) -> i32 {
        self.shared.model_version
    }

    pub fn inputs_version(&self) -> i32 {
        self.shared.inputs_version
    }

    pub fn max_batch_size(&self) -> usize {
        self.shared.config.max_batch_size
    }

    pub fn pos_len(&self) -> usize {
        self.shared.config.pos_len
    }

    pub fn num_server_threads(&self) -> usize {
        self.server_threads.len()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn num_rows_processed(&self) -> u64 {
        self.shared.num_rows_processed.load(Ordering::Relaxed)
    }

    pub fn num_batches_processed(&self) -> u64 {
        self.shared.num_batches_processed.load(Ordering::Relaxed)
    }

    pub fn average_processed_batch_size(&self) -> f64 {
        let batches = self.num_batches_processed();
        if batches == 0 {
            return 0.0;
        }
        self.num_rows_processed() as f64 / batches as f64
    }

    pub fn clear_stats(&self) {
        self.shared.num_rows_processed.store(0, Ordering::Relaxed);
        self.shared.num_batches_processed.store(0, Ordering::Relaxed);
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.shared.cache {
            cache.clear();
        }
    }

    // =========================================================================
    // Server threads
    // =========================================================================

    /// Start the configured number of server threads. Device handles are
    /// acquired here so that failures surface to the caller.
    pub fn spawn_server_threads(&mut self) -> Result<()> {
        if !self.server_threads.is_empty() {
            return Err(Error::Configuration("server threads are already running".into()));
        }
        let config = &self.shared.config;

        let mut handles = Vec::with_capacity(config.num_server_threads);
        for idx in 0..config.num_server_threads {
            let handle = match &self.shared.model {
                Some(model) => Some(model.create_compute_handle(&ComputeHandleParams {
                    server_thread_idx: idx,
                    gpu_idx: config.gpu_idx_by_server_thread.get(idx).copied(),
                    max_batch_size: config.max_batch_size,
                    pos_len: config.pos_len,
                    inputs_use_nhwc: config.inputs_use_nhwc,
                })?),
                None => None,
            };
            handles.push(handle);
        }

        {
            let mut state = self.shared.state.lock();
            // Rows reserved before a kill must be returned before counters reset.
            while state.num_rows_finished < state.num_rows_started {
                self.shared.server_waiting_for_batch_finish.wait(&mut state);
            }
            state.num_rows_started = 0;
            state.num_rows_finished = 0;
            state.is_server_claiming = false;
            state.is_killed = false;
        }

        for (idx, handle) in handles.into_iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let seed = seed_for_thread(&shared.config.nn_rand_seed, idx);
            let spawned = thread::Builder::new()
                .name(format!("nneval-server-{idx}"))
                .spawn(move || server_loop(&shared, idx, handle, seed));
            match spawned {
                Ok(join) => self.server_threads.push(join),
                Err(e) => {
                    self.kill_server_threads();
                    return Err(Error::Configuration(format!("failed to spawn server thread: {e}")));
                }
            }
        }
        Ok(())
    }

    /// Stop and join every server thread. Requests still waiting for a batch
    /// receive [`Error::ServerKilled`].
    pub fn kill_server_threads(&mut self) {
        let drained: Vec<PendingRow> = {
            let mut state = self.shared.state.lock();
            state.is_killed = true;
            state.pending.iter_mut().filter_map(Option::take).collect()
        };
        self.shared.client_waiting_for_row.notify_all();
        self.shared.server_waiting_for_batch_start.notify_all();
        self.shared.server_waiting_for_batch_finish.notify_all();
        for row in drained {
            row.slot.deliver(Err(Error::ServerKilled));
        }

        for join in self.server_threads.drain(..) {
            if join.join().is_err() {
                error!(target: LOG_TARGET, "server thread panicked");
            }
        }
    }

    // =========================================================================
    // Client side
    // =========================================================================

    /// Evaluate a position, blocking until the result is in `buf`.
    ///
    /// With `skip_cache` the cache is not consulted but the fresh result is
    /// still stored in it. A cached result without an ownership map does not
    /// satisfy a request for one.
    pub fn evaluate(
        &self,
        board: &Board,
        hist: &BoardHistory,
        next_pla: Player,
        buf: &mut NNResultBuf,
        skip_cache: bool,
        include_owner_map: bool,
    ) -> Result<()> {
        let shared = &*self.shared;
        let pos_len = shared.config.pos_len;
        if board.x_size > pos_len || board.y_size > pos_len {
            return Err(Error::Configuration(format!(
                "board {}x{} does not fit pos_len {pos_len}",
                board.x_size, board.y_size
            )));
        }
        buf.has_result = false;
        buf.result = None;

        let nn_hash = get_hash(board, hist, next_pla, shared.inputs_version);
        if !skip_cache
            && let Some(cache) = &shared.cache
            && let Some(hit) = cache.get(nn_hash)
            && (!include_owner_map || hit.owner_map.is_some())
        {
            buf.result = Some(hit);
            buf.has_result = true;
            return Ok(());
        }

        buf.slot.reset();
        let (row_idx, mut row) = {
            let mut state = shared.state.lock();
            loop {
                if state.is_killed {
                    return Err(Error::ServerKilled);
                }
                if state.num_rows_started < shared.config.max_batch_size && !state.is_server_claiming {
                    break;
                }
                shared.client_waiting_for_row.wait(&mut state);
            }
            let idx = state.num_rows_started;
            state.num_rows_started += 1;
            state.pending[idx] = Some(PendingRow {
                slot: Arc::clone(&buf.slot),
                include_owner_map,
            });
            if idx == 0 {
                shared.server_waiting_for_batch_start.notify_one();
            }
            (idx, state.input_buffers.take_row(idx))
        };

        fill_row(
            board,
            hist,
            next_pla,
            shared.inputs_version,
            pos_len,
            shared.config.inputs_use_nhwc,
            &mut row,
        );

        {
            let mut state = shared.state.lock();
            state.input_buffers.put_row(row_idx, row);
            state.num_rows_finished += 1;
            if state.num_rows_finished == state.num_rows_started {
                shared.server_waiting_for_batch_finish.notify_all();
            }
        }

        let mut output = buf.slot.wait()?;
        output.nn_hash = nn_hash;
        postprocess(
            &mut output,
            board,
            hist,
            next_pla,
            shared.model_version,
            &mut buf.error_log_lockout,
        )?;
        let output = Arc::new(output);
        if let Some(cache) = &shared.cache {
            cache.set(Arc::clone(&output));
        }
        buf.result = Some(output);
        buf.has_result = true;
        Ok(())
    }
}

impl Drop for NNEvaluator {
    fn drop(&mut self) {
        self.kill_server_threads();
    }
}

// =============================================================================
// Server loop
// =============================================================================

/// Claim the next batch into `buf`. Returns the number of rows, or `None`
/// once the evaluator is killed.
fn grab_batch(shared: &Shared, buf: &mut ServerBuf) -> Option<usize> {
    let mut state = shared.state.lock();
    loop {
        if state.is_killed {
            return None;
        }
        if state.num_rows_started > 0 && !state.is_server_claiming {
            break;
        }
        shared.server_waiting_for_batch_start.wait(&mut state);
    }

    state.is_server_claiming = true;
    while state.num_rows_finished < state.num_rows_started && !state.is_killed {
        shared.server_waiting_for_batch_finish.wait(&mut state);
    }
    if state.is_killed {
        state.is_server_claiming = false;
        return None;
    }

    mem::swap(&mut state.input_buffers, &mut buf.input_buffers);
    mem::swap(&mut state.pending, &mut buf.pending);
    let num_rows = state.num_rows_started;
    state.num_rows_started = 0;
    state.num_rows_finished = 0;
    state.is_server_claiming = false;
    drop(state);

    shared.client_waiting_for_row.notify_all();
    // Another server thread may claim the next batch as soon as it starts.
    shared.server_waiting_for_batch_start.notify_one();
    Some(num_rows)
}

fn fabricate_outputs(shared: &Shared, rng: &mut fastrand::Rng, outputs: &mut [NNOutput]) {
    for out in outputs.iter_mut() {
        for p in out.policy_probs.iter_mut() {
            *p = gaussian(rng);
        }
        out.white_win_prob = gaussian(rng) * 0.2;
        if shared.model_version >= 3 {
            out.white_loss_prob = gaussian(rng) * 0.2;
            out.white_no_result_prob = gaussian(rng) * 0.2;
            out.white_score_value = gaussian(rng) * 0.2;
        }
        if let Some(owner) = out.owner_map.as_mut() {
            for o in owner.iter_mut() {
                *o = gaussian(rng) * 0.2;
            }
        }
    }
}

fn compute_batch(
    shared: &Shared,
    handle: Option<&mut Box<dyn ComputeHandle>>,
    rng: &mut fastrand::Rng,
    buf: &mut ServerBuf,
    num_rows: usize,
) -> Result<()> {
    let config = &shared.config;
    let symmetry = if config.nn_randomize {
        rng.u32(0..NUM_SYMMETRIES)
    } else {
        config.default_symmetry
    };
    *buf.input_buffers.symmetries_mut() = symmetry_flags(symmetry);

    buf.outputs.clear();
    for row in buf.pending[..num_rows].iter() {
        let include_owner_map = row.as_ref().is_some_and(|r| r.include_owner_map);
        buf.outputs.push(NNOutput::new(config.pos_len, include_owner_map));
    }

    match handle {
        Some(handle) => handle.get_output(&buf.input_buffers, num_rows, &mut buf.outputs),
        None => {
            fabricate_outputs(shared, rng, &mut buf.outputs);
            Ok(())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("backend panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("backend panicked: {s}")
    } else {
        "backend panicked".to_string()
    }
}

fn server_loop(shared: &Shared, thread_idx: usize, mut handle: Option<Box<dyn ComputeHandle>>, seed: u64) {
    let config = &shared.config;
    let input_buffers = match &shared.model {
        Some(model) => model.create_input_buffers(config.max_batch_size, config.pos_len),
        None => Ok(InputBuffers::new(config.max_batch_size, row_len(shared.inputs_version, config.pos_len))),
    };
    let input_buffers = match input_buffers {
        Ok(b) => b,
        Err(e) => {
            error!(target: LOG_TARGET, "[server {thread_idx}] could not allocate input buffers: {e}");
            return;
        }
    };
    let mut buf = ServerBuf {
        input_buffers,
        pending: (0..config.max_batch_size).map(|_| None).collect(),
        outputs: Vec::with_capacity(config.max_batch_size),
    };
    let mut rng = fastrand::Rng::with_seed(seed);
    info!(target: LOG_TARGET, "[server {thread_idx}] started");

    while let Some(num_rows) = grab_batch(shared, &mut buf) {
        debug!(target: LOG_TARGET, "[server {thread_idx}] computing batch of {num_rows}");
        // A panicking backend must still answer the rows it was handed.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            compute_batch(shared, handle.as_mut(), &mut rng, &mut buf, num_rows)
        }))
        .unwrap_or_else(|payload| Err(Error::BackendFailure(panic_message(payload.as_ref()))));

        match result {
            Ok(()) => {
                shared.num_rows_processed.fetch_add(num_rows as u64, Ordering::Relaxed);
                shared.num_batches_processed.fetch_add(1, Ordering::Relaxed);
                for (row, output) in buf.pending[..num_rows].iter_mut().zip(buf.outputs.drain(..)) {
                    if let Some(row) = row.take() {
                        row.slot.deliver(Ok(output));
                    }
                }
            }
            Err(e) => {
                let failure = match e {
                    Error::BackendFailure(_) => e,
                    other => Error::BackendFailure(other.to_string()),
                };
                error!(target: LOG_TARGET, "[server {thread_idx}] batch failed, exiting: {failure}");
                for row in buf.pending[..num_rows].iter_mut() {
                    if let Some(row) = row.take() {
                        row.slot.deliver(Err(failure.clone()));
                    }
                }
                return;
            }
        }
    }
    info!(target: LOG_TARGET, "[server {thread_idx}] stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rules;

    fn debug_config() -> EvaluatorConfig {
        EvaluatorConfig {
            debug_skip_neural_net: true,
            pos_len: 9,
            max_batch_size: 4,
            nn_rand_seed: "test".into(),
            ..EvaluatorConfig::default()
        }
    }

    #[test]
    fn test_symmetry_flags() {
        assert_eq!(symmetry_flags(0), [false, false, false]);
        assert_eq!(symmetry_flags(5), [true, false, true]);
        assert_eq!(symmetry_flags(7), [true, true, true]);
    }

    #[test]
    fn test_seed_is_deterministic_per_thread() {
        assert_eq!(seed_for_thread("abc", 0), seed_for_thread("abc", 0));
        assert_ne!(seed_for_thread("abc", 0), seed_for_thread("abc", 1));
    }

    #[test]
    fn test_requires_backend_outside_debug_mode() {
        let config = EvaluatorConfig {
            model_file: Some("model.bin".into()),
            ..EvaluatorConfig::default()
        };
        assert!(matches!(NNEvaluator::new(config, None), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_debug_evaluate_and_cache_hit() {
        let mut eval = NNEvaluator::new(debug_config(), None).unwrap();
        eval.spawn_server_threads().unwrap();
        let board = Board::new(9, 9).unwrap();
        let hist = BoardHistory::new(&board, Player::Black, Rules::default(), 0);

        let mut buf = NNResultBuf::new();
        eval.evaluate(&board, &hist, Player::Black, &mut buf, false, true).unwrap();
        assert!(buf.has_result);
        let first = buf.result.clone().unwrap();
        assert!(first.owner_map.is_some());
        let total = first.white_win_prob + first.white_loss_prob + first.white_no_result_prob;
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(eval.num_rows_processed(), 1);

        eval.evaluate(&board, &hist, Player::Black, &mut buf, false, true).unwrap();
        assert!(Arc::ptr_eq(&first, buf.result.as_ref().unwrap()));
        assert_eq!(eval.num_rows_processed(), 1, "cache hit never occupies a row");

        eval.clear_cache();
        eval.evaluate(&board, &hist, Player::Black, &mut buf, false, false).unwrap();
        assert_eq!(eval.num_rows_processed(), 2);
        eval.kill_server_threads();
    }

    #[test]
    fn test_debug_values_stay_near_uniform() {
        let mut eval = NNEvaluator::new(debug_config(), None).unwrap();
        eval.spawn_server_threads().unwrap();
        let board = Board::new(9, 9).unwrap();
        let hist = BoardHistory::new(&board, Player::Black, Rules::default(), 0);
        let mut buf = NNResultBuf::new();

        let mut total_deviation = 0.0;
        for _ in 0..32 {
            eval.clear_cache();
            eval.evaluate(&board, &hist, Player::Black, &mut buf, false, false).unwrap();
            let out = buf.result.as_ref().unwrap();
            total_deviation += (out.white_win_prob - 1.0 / 3.0).abs();
        }
        assert!(total_deviation / 32.0 < 0.1, "mean deviation {}", total_deviation / 32.0);
        eval.kill_server_threads();
    }

    #[test]
    fn test_evaluate_after_kill() {
        let mut eval = NNEvaluator::new(debug_config(), None).unwrap();
        eval.spawn_server_threads().unwrap();
        eval.kill_server_threads();
        assert_eq!(eval.num_server_threads(), 0);

        let board = Board::new(9, 9).unwrap();
        let hist = BoardHistory::new(&board, Player::Black, Rules::default(), 0);
        let mut buf = NNResultBuf::new();
        let err = eval.evaluate(&board, &hist, Player::Black, &mut buf, true, false).unwrap_err();
        assert_eq!(err, Error::ServerKilled);

        eval.spawn_server_threads().unwrap();
        eval.evaluate(&board, &hist, Player::Black, &mut buf, true, false).unwrap();
        assert!(buf.has_result);
    }

    #[test]
    fn test_board_larger_than_pos_len() {
        let eval = NNEvaluator::new(debug_config(), None).unwrap();
        let board = Board::new(13, 13).unwrap();
        let hist = BoardHistory::new(&board, Player::Black, Rules::default(), 0);
        let mut buf = NNResultBuf::new();
        assert!(eval.evaluate(&board, &hist, Player::Black, &mut buf, false, false).is_err());
    }
}
