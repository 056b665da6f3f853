//! Dense vector primitives.
//!
//! The "numeric primitives" component of spec.md §2: a dot product and an
//! add-scaled-row operation. Any SIMD implementation satisfying this
//! contract is acceptable per spec.md §1; this is the scalar reference.

use serde::{Deserialize, Serialize};

/// A dense vector of `f32`, used for hidden states, gradients and matrix rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector(pub Vec<f32>);

impl Vector {
    pub fn zeros(len: usize) -> Self {
        Vector(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn zero(&mut self) {
        self.0.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn dot(&self, other: &Vector) -> f32 {
        debug_assert_eq!(self.len(), other.len());
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    /// `self += scale * other` — the "add scaled row" primitive.
    pub fn add_scaled(&mut self, other: &Vector, scale: f32) {
        debug_assert_eq!(self.len(), other.len());
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a += scale * b;
        }
    }

    pub fn mul_scalar(&mut self, scale: f32) {
        self.0.iter_mut().for_each(|v| *v *= scale);
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    pub fn argmax(&self) -> Option<usize> {
        self.0
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_product_is_sum_of_products() {
        let a = Vector(vec![1.0, 2.0, 3.0]);
        let b = Vector(vec![4.0, 5.0, 6.0]);
        assert!((a.dot(&b) - 32.0).abs() < 1e-6);
    }

    #[test]
    fn add_scaled_updates_in_place() {
        let mut a = Vector(vec![1.0, 1.0]);
        let b = Vector(vec![2.0, 3.0]);
        a.add_scaled(&b, 0.5);
        assert_eq!(a.0, vec![2.0, 2.5]);
    }

    #[test]
    fn norm_of_unit_vector() {
        let v = Vector(vec![3.0, 4.0]);
        assert!((v.norm() - 5.0).abs() < 1e-6);
    }
}
