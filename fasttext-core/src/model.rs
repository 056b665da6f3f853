//! The per-update computation shared by all three training modes
//! (spec.md §4.3): average the input rows, run the loss, scatter the
//! gradient back.

use std::sync::Arc;

use rand::Rng;

use crate::error::Result;
use crate::loss::{Loss, LossState};
use crate::matrix::{DenseMatrix, MatrixOps};
use crate::vector::Vector;

/// Scratch buffers owned by a single training/inference thread.
pub struct ModelState<R: Rng> {
    pub hidden: Vector,
    pub grad: Vector,
    pub loss_sum: f64,
    pub examples: u64,
    pub rng: R,
}

impl<R: Rng> ModelState<R> {
    pub fn new(dim: usize, rng: R) -> Self {
        ModelState {
            hidden: Vector::zeros(dim),
            grad: Vector::zeros(dim),
            loss_sum: 0.0,
            examples: 0,
            rng,
        }
    }

    pub fn average_loss(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.loss_sum / self.examples as f64
        }
    }
}

/// Stateless facade over shared `wi`/`wo` and a loss function.
pub struct Model {
    pub wi: DenseMatrix,
    pub wo: DenseMatrix,
    pub loss: Arc<dyn Loss>,
    /// `true` for supervised models, scaling the input gradient by `1/|input|`.
    pub normalize_gradient: bool,
}

impl Model {
    pub fn new(wi: DenseMatrix, wo: DenseMatrix, loss: Arc<dyn Loss>, normalize_gradient: bool) -> Self {
        Model {
            wi,
            wo,
            loss,
            normalize_gradient,
        }
    }

    /// `hidden = (1/|input|) · Σ wi[input_j]`; empty input leaves hidden
    /// untouched (the caller must check emptiness before using it).
    pub fn compute_hidden(&self, input: &[i32], hidden: &mut Vector) {
        if input.is_empty() {
            return;
        }
        hidden.zero();
        for &id in input {
            self.wi.add_row_to_vector(hidden, id as usize, 1.0);
        }
        hidden.mul_scalar(1.0 / input.len() as f32);
    }

    /// One SGD step. No-op on empty input (spec.md §4.3).
    pub fn update<R: Rng>(
        &self,
        input: &[i32],
        targets: &[i32],
        target_index: i32,
        lr: f32,
        state: &mut ModelState<R>,
    ) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        self.compute_hidden(input, &mut state.hidden);
        state.grad.zero();
        let mut loss_state = LossState {
            hidden: &state.hidden,
            grad: &mut state.grad,
            rng: &mut state.rng,
        };
        let loss = self
            .loss
            .forward(&self.wo, targets, target_index, &mut loss_state, lr, true)?;
        state.loss_sum += loss as f64;
        state.examples += 1;

        if self.normalize_gradient {
            state.grad.mul_scalar(1.0 / input.len() as f32);
        }
        for &id in input {
            self.wi.add_scaled_row(id as usize, &state.grad, 1.0);
        }
        Ok(())
    }

    /// Top-k predictions over arbitrary (dense or quantized) input/output
    /// matrices — used at inference time after quantization.
    pub fn predict(
        &self,
        input: &[i32],
        k: usize,
        threshold: f32,
        wi: &dyn MatrixOps,
        wo: &dyn MatrixOps,
    ) -> Result<Vec<(f32, i32)>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let dim = wi.cols();
        let mut hidden = Vector::zeros(dim);
        for &id in input {
            wi.add_row_to_vector(&mut hidden, id as usize, 1.0);
        }
        hidden.mul_scalar(1.0 / input.len() as f32);
        self.loss.predict(wo, k, threshold, &hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::SoftmaxLoss;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn toy_model() -> Model {
        let wi = DenseMatrix::zeros(4, 2);
        let wo = DenseMatrix::zeros(2, 2);
        Model::new(wi, wo, Arc::new(SoftmaxLoss::new()), true)
    }

    #[test]
    fn compute_hidden_on_empty_input_is_noop() {
        let model = toy_model();
        let mut hidden = Vector(vec![9.0, 9.0]);
        model.compute_hidden(&[], &mut hidden);
        assert_eq!(hidden.as_slice(), &[9.0, 9.0]);
    }

    #[test]
    fn update_on_empty_input_does_not_touch_wo() {
        let model = toy_model();
        let before = model.wo.snapshot();
        let mut state = ModelState::new(2, XorShiftRng::seed_from_u64(1));
        model.update(&[], &[0], 0, 0.1, &mut state).unwrap();
        assert_eq!(model.wo.snapshot(), before);
        assert_eq!(state.examples, 0);
    }

    #[test]
    fn update_accumulates_examples_and_loss() {
        let model = toy_model();
        model.wi.init_uniform_range(0, 4, &mut XorShiftRng::seed_from_u64(3));
        let mut state = ModelState::new(2, XorShiftRng::seed_from_u64(1));
        model.update(&[0, 1], &[0], 0, 0.5, &mut state).unwrap();
        assert_eq!(state.examples, 1);
        assert!(state.loss_sum > 0.0);
    }
}
