//! Row-oriented parameter matrices.
//!
//! `wi`/`wo` are expressed as a tagged sum type (spec.md §9 redesign flag:
//! replace the deep class hierarchy with `DenseMatrix | QuantizedMatrix`
//! behind a narrow [`MatrixOps`] capability) and support the Hogwild sharing
//! contract: concurrent pointwise writes from multiple training threads are
//! intentional and data-race-free at the byte level because every writer
//! touches only its own row range or performs single `f32` stores that are
//! allowed to tear under concurrent writes from other rows.

use std::cell::UnsafeCell;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::quant::{Norm1Quantizer, ProductQuantizer};
use crate::vector::Vector;

/// Capability every parameter matrix must expose to the loss/model layer.
pub trait MatrixOps: Send + Sync {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;

    /// `hidden . row(i)`.
    fn dot_row(&self, hidden: &Vector, i: usize) -> f32;

    /// `target += scale * row(i)`.
    fn add_row_to_vector(&self, target: &mut Vector, i: usize, scale: f32);
}

/// Shared, racily-mutable dense storage.
///
/// # Safety contract
///
/// Interior mutability here is restricted to single-element writes
/// (`add_scaled_row`, `set_row`). The reader may observe a torn update mid
/// write (two threads racing on the same row), which is the accepted
/// Hogwild trade-off described in spec.md §4.4/§9 — never a data race the
/// compiler would reject, since every write is a plain `f32` store through
/// `UnsafeCell`, not a read-modify-write across bytes wider than the type.
pub struct RacyStorage {
    data: UnsafeCell<Vec<f32>>,
    rows: usize,
    cols: usize,
}

// SAFETY: writers only ever perform independent per-element stores; readers
// tolerate torn reads. See the struct-level contract above.
unsafe impl Sync for RacyStorage {}

impl RacyStorage {
    fn zeros(rows: usize, cols: usize) -> Self {
        RacyStorage {
            data: UnsafeCell::new(vec![0.0; rows * cols]),
            rows,
            cols,
        }
    }

    fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        RacyStorage {
            data: UnsafeCell::new(data),
            rows,
            cols,
        }
    }

    #[inline]
    fn row_ptr(&self, i: usize) -> *mut f32 {
        debug_assert!(i < self.rows);
        unsafe { (*self.data.get()).as_mut_ptr().add(i * self.cols) }
    }

    fn row(&self, i: usize) -> &[f32] {
        unsafe { std::slice::from_raw_parts(self.row_ptr(i), self.cols) }
    }

    /// `row(i) += scale * v`, racy by design.
    fn add_scaled_row(&self, i: usize, v: &Vector, scale: f32) {
        let ptr = self.row_ptr(i);
        for (j, x) in v.as_slice().iter().enumerate() {
            unsafe {
                let cell = ptr.add(j);
                *cell += scale * x;
            }
        }
    }

    fn set_row(&self, i: usize, v: &[f32]) {
        let ptr = self.row_ptr(i);
        for (j, x) in v.iter().enumerate() {
            unsafe {
                *ptr.add(j) = *x;
            }
        }
    }

    fn snapshot(&self) -> Vec<f32> {
        unsafe { (*self.data.get()).clone() }
    }
}

/// A plain dense input or output matrix, sharable across Hogwild workers.
#[derive(Clone)]
pub struct DenseMatrix {
    storage: Arc<RacyStorage>,
}

impl DenseMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        DenseMatrix {
            storage: Arc::new(RacyStorage::zeros(rows, cols)),
        }
    }

    pub fn from_rows(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        DenseMatrix {
            storage: Arc::new(RacyStorage::from_vec(rows, cols, data)),
        }
    }

    /// Uniform-random init in `[-1/dim, 1/dim]` over `[row_start, row_end)`,
    /// letting each training thread seed a disjoint range deterministically
    /// (spec.md §3 "Parameter matrices").
    pub fn init_uniform_range<R: Rng>(&self, row_start: usize, row_end: usize, rng: &mut R) {
        let cols = self.cols();
        let bound = 1.0 / cols as f32;
        for i in row_start..row_end {
            let row: Vec<f32> = (0..cols).map(|_| rng.gen_range(-bound..bound)).collect();
            self.storage.set_row(i, &row);
        }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        self.storage.row(i)
    }

    pub fn add_scaled_row(&self, i: usize, v: &Vector, scale: f32) {
        self.storage.add_scaled_row(i, v, scale);
    }

    pub fn set_row(&self, i: usize, v: &[f32]) {
        self.storage.set_row(i, v);
    }

    pub fn row_norm(&self, i: usize) -> f32 {
        self.row(i).iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// A full copy of the backing storage, row-major. Used by save/quantize.
    pub fn snapshot(&self) -> Vec<f32> {
        self.storage.snapshot()
    }
}

impl MatrixOps for DenseMatrix {
    fn rows(&self) -> usize {
        self.storage.rows
    }

    fn cols(&self) -> usize {
        self.storage.cols
    }

    fn dot_row(&self, hidden: &Vector, i: usize) -> f32 {
        let row = self.row(i);
        row.iter().zip(hidden.as_slice()).map(|(a, b)| a * b).sum()
    }

    fn add_row_to_vector(&self, target: &mut Vector, i: usize, scale: f32) {
        let row = self.row(i).to_vec();
        target.add_scaled(&Vector(row), scale);
    }
}

/// A product-quantized matrix, built post-training from a [`DenseMatrix`]
/// snapshot (spec.md §4.6).
pub struct QuantizedMatrix {
    pq: ProductQuantizer,
    codes: Vec<u8>,
    rows: usize,
    cols: usize,
    norms: Option<(Norm1Quantizer, Vec<u8>)>,
}

impl QuantizedMatrix {
    pub fn train(dense_rows: &[f32], rows: usize, cols: usize, dsub: usize, qnorm: bool) -> Self {
        let (norms, codes_input) = if qnorm {
            let mut row_norms = vec![0.0f32; rows];
            let mut normalized = dense_rows.to_vec();
            for r in 0..rows {
                let slice = &dense_rows[r * cols..(r + 1) * cols];
                let n = slice.iter().map(|v| v * v).sum::<f32>().sqrt();
                row_norms[r] = if n > 0.0 { n } else { 1.0 };
                for c in 0..cols {
                    normalized[r * cols + c] = dense_rows[r * cols + c] / row_norms[r];
                }
            }
            let nq = Norm1Quantizer::train(&row_norms);
            let norm_codes = row_norms.iter().map(|n| nq.encode(*n)).collect();
            (Some((nq, norm_codes)), normalized)
        } else {
            (None, dense_rows.to_vec())
        };

        let pq = ProductQuantizer::train(&codes_input, rows, cols, dsub);
        let codes = pq.encode_all(&codes_input, rows, cols);

        QuantizedMatrix {
            pq,
            codes,
            rows,
            cols,
            norms,
        }
    }

    pub fn pq(&self) -> &ProductQuantizer {
        &self.pq
    }

    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    pub fn norms(&self) -> Option<(&Norm1Quantizer, &[u8])> {
        self.norms.as_ref().map(|(nq, codes)| (nq, codes.as_slice()))
    }

    /// Reconstructs a quantized matrix from its persisted parts (spec.md §4.7).
    pub fn from_parts(
        pq: ProductQuantizer,
        codes: Vec<u8>,
        rows: usize,
        cols: usize,
        norms: Option<(Norm1Quantizer, Vec<u8>)>,
    ) -> Self {
        QuantizedMatrix { pq, codes, rows, cols, norms }
    }

    fn decoded_row(&self, i: usize) -> Vec<f32> {
        let code_row = &self.codes[i * self.pq.num_subvectors()..(i + 1) * self.pq.num_subvectors()];
        let mut row = self.pq.decode(code_row);
        if let Some((nq, norm_codes)) = &self.norms {
            let scale = nq.decode(norm_codes[i]);
            row.iter_mut().for_each(|v| *v *= scale);
        }
        row
    }
}

impl MatrixOps for QuantizedMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn dot_row(&self, hidden: &Vector, i: usize) -> f32 {
        let code_row = &self.codes[i * self.pq.num_subvectors()..(i + 1) * self.pq.num_subvectors()];
        let mut dot = self.pq.dot_row(hidden.as_slice(), code_row);
        if let Some((nq, norm_codes)) = &self.norms {
            dot *= nq.decode(norm_codes[i]);
        }
        dot
    }

    fn add_row_to_vector(&self, target: &mut Vector, i: usize, scale: f32) {
        let row = self.decoded_row(i);
        target.add_scaled(&Vector(row), scale);
    }
}

/// Either backing for `wi`/`wo`, chosen at load/quantize time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixKind {
    Dense,
    Quantized,
}

/// A dense-or-quantized matrix behind one value, so [`crate::io`] and
/// [`crate::facade`] can hold `wi`/`wo` without matching on the flag at
/// every call site.
pub enum AnyMatrix {
    Dense(DenseMatrix),
    Quantized(QuantizedMatrix),
}

impl AnyMatrix {
    pub fn kind(&self) -> MatrixKind {
        match self {
            AnyMatrix::Dense(_) => MatrixKind::Dense,
            AnyMatrix::Quantized(_) => MatrixKind::Quantized,
        }
    }

    pub fn as_dense(&self) -> Option<&DenseMatrix> {
        match self {
            AnyMatrix::Dense(m) => Some(m),
            AnyMatrix::Quantized(_) => None,
        }
    }
}

impl MatrixOps for AnyMatrix {
    fn rows(&self) -> usize {
        match self {
            AnyMatrix::Dense(m) => m.rows(),
            AnyMatrix::Quantized(m) => m.rows(),
        }
    }

    fn cols(&self) -> usize {
        match self {
            AnyMatrix::Dense(m) => m.cols(),
            AnyMatrix::Quantized(m) => m.cols(),
        }
    }

    fn dot_row(&self, hidden: &Vector, i: usize) -> f32 {
        match self {
            AnyMatrix::Dense(m) => m.dot_row(hidden, i),
            AnyMatrix::Quantized(m) => m.dot_row(hidden, i),
        }
    }

    fn add_row_to_vector(&self, target: &mut Vector, i: usize, scale: f32) {
        match self {
            AnyMatrix::Dense(m) => m.add_row_to_vector(target, i, scale),
            AnyMatrix::Quantized(m) => m.add_row_to_vector(target, i, scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    #[test]
    fn dot_row_matches_manual_sum() {
        let m = DenseMatrix::from_rows(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let hidden = Vector(vec![1.0, 0.0, 1.0]);
        assert!((m.dot_row(&hidden, 0) - 4.0).abs() < 1e-6);
        assert!((m.dot_row(&hidden, 1) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn concurrent_row_writes_land_on_distinct_rows() {
        use std::thread;
        let m = DenseMatrix::zeros(4, 2);
        thread::scope(|s| {
            for t in 0..4 {
                let m = &m;
                s.spawn(move || {
                    m.add_scaled_row(t, &Vector(vec![1.0, 1.0]), 1.0);
                });
            }
        });
        for r in 0..4 {
            assert_eq!(m.row(r), &[1.0, 1.0]);
        }
    }

    #[test]
    fn init_uniform_range_stays_bounded() {
        let m = DenseMatrix::zeros(4, 5);
        let mut rng = XorShiftRng::seed_from_u64(7);
        m.init_uniform_range(0, 4, &mut rng);
        let bound = 1.0 / 5.0;
        for r in 0..4 {
            for v in m.row(r) {
                assert!(v.abs() <= bound);
            }
        }
    }
}
