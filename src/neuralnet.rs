//! Interface to the numeric backend that turns feature rows into raw outputs.
//!
//! The evaluator only needs three things from a backend: load a model, report
//! its version, and compute a batch. Device resources live in a
//! [`ComputeHandle`] owned by one server thread and released when it drops.

use std::mem;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::nninputs::{inputs_version_for_model, row_len};
use crate::nnoutput::NNOutput;

/// Feature rows for one batch plus the symmetry to evaluate them under.
#[derive(Clone, Debug)]
pub struct InputBuffers {
    rows: Vec<Vec<f32>>,
    row_len: usize,
    /// Flip y, flip x, transpose.
    symmetries: [bool; 3],
}

impl InputBuffers {
    pub fn new(max_batch_size: usize, row_len: usize) -> Self {
        InputBuffers {
            rows: vec![vec![0.0; row_len]; max_batch_size],
            row_len,
            symmetries: [false; 3],
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.rows.len()
    }

    pub fn row_len(&self) -> usize {
        self.row_len
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        &self.rows[idx]
    }

    pub fn row_mut(&mut self, idx: usize) -> &mut [f32] {
        &mut self.rows[idx]
    }

    pub fn symmetries(&self) -> [bool; 3] {
        self.symmetries
    }

    pub fn symmetries_mut(&mut self) -> &mut [bool; 3] {
        &mut self.symmetries
    }

    /// Move row `idx` out so it can be filled without holding a lock.
    pub(crate) fn take_row(&mut self, idx: usize) -> Vec<f32> {
        mem::take(&mut self.rows[idx])
    }

    pub(crate) fn put_row(&mut self, idx: usize, row: Vec<f32>) {
        debug_assert_eq!(row.len(), self.row_len);
        self.rows[idx] = row;
    }
}

/// Per-thread settings passed when acquiring device resources.
#[derive(Clone, Debug)]
pub struct ComputeHandleParams {
    pub server_thread_idx: usize,
    /// `None` lets the backend pick a device.
    pub gpu_idx: Option<i32>,
    pub max_batch_size: usize,
    pub pos_len: usize,
    pub inputs_use_nhwc: bool,
}

/// A backend capable of loading models.
pub trait NeuralNet: Send + Sync {
    fn load_model_file(&self, path: &Path) -> Result<Arc<dyn LoadedModel>>;
}

/// Weights loaded in memory, shared by every server thread.
pub trait LoadedModel: Send + Sync {
    fn model_version(&self) -> i32;

    fn create_input_buffers(&self, max_batch_size: usize, pos_len: usize) -> Result<InputBuffers> {
        let inputs_version = inputs_version_for_model(self.model_version())?;
        Ok(InputBuffers::new(max_batch_size, row_len(inputs_version, pos_len)))
    }

    fn create_compute_handle(&self, params: &ComputeHandleParams) -> Result<Box<dyn ComputeHandle>>;
}

/// Device-side state for one server thread.
pub trait ComputeHandle: Send {
    /// Compute raw outputs for the first `num_rows` rows of `inputs`.
    ///
    /// Outputs are written from the perspective of the player to move: policy
    /// logits, value logits and score, and raw ownership when an output has an
    /// owner map. `inputs` must not be modified.
    fn get_output(&mut self, inputs: &InputBuffers, num_rows: usize, outputs: &mut [NNOutput]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_put_row() {
        let mut bufs = InputBuffers::new(2, 5);
        let mut row = bufs.take_row(1);
        assert!(bufs.row(1).is_empty());
        row[3] = 2.0;
        bufs.put_row(1, row);
        assert_eq!(bufs.row(1)[3], 2.0);
        assert_eq!(bufs.max_batch_size(), 2);
        bufs.symmetries_mut()[2] = true;
        assert_eq!(bufs.symmetries(), [false, false, true]);
    }
}
