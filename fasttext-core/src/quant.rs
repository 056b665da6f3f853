//! Product quantization for compressing trained matrices (spec.md §4.6).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KCENTROIDS: usize = 256;
const KITERS: usize = 25;
const KSEED: u64 = 1234;

/// Per-subvector widths: `dsub` for every subvector, plus a final ragged
/// subvector of width `cols % dsub` when `cols` isn't a multiple of `dsub`
/// (spec.md §4.6 — the tail is kept, not truncated away).
pub fn subvector_widths(cols: usize, dsub: usize) -> Vec<usize> {
    if cols == 0 {
        return Vec::new();
    }
    let mut widths = vec![dsub; cols / dsub];
    let rem = cols % dsub;
    if rem > 0 {
        widths.push(rem);
    }
    widths
}

/// Per-subvector `(centroid-block flat offset, data column start)`, derived
/// once from `widths` so `centroid`/`encode_all`/`dot_row` don't recompute a
/// running sum on every row.
fn layout(widths: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let mut offsets = Vec::with_capacity(widths.len());
    let mut col_starts = Vec::with_capacity(widths.len());
    let mut offset = 0usize;
    let mut col = 0usize;
    for &w in widths {
        offsets.push(offset);
        col_starts.push(col);
        offset += KCENTROIDS * w;
        col += w;
    }
    (offsets, col_starts)
}

/// One codebook of `KCENTROIDS` centroids per sub-vector; every subvector has
/// width `dsub` except possibly the last, which is ragged (see
/// [`subvector_widths`]).
pub struct ProductQuantizer {
    dsub: usize,
    widths: Vec<usize>,
    offsets: Vec<usize>,
    col_starts: Vec<usize>,
    /// Flattened `[subvector][KCENTROIDS][width(subvector)]`.
    centroids: Vec<f32>,
}

impl ProductQuantizer {
    pub fn num_subvectors(&self) -> usize {
        self.widths.len()
    }

    pub fn dsub(&self) -> usize {
        self.dsub
    }

    /// The raw `[subvector][KCENTROIDS][width(subvector)]` codebook, for
    /// persisting a trained quantizer (spec.md §4.7 leaves the on-disk PQ
    /// layout implementation-defined as long as save/load agree).
    pub fn centroids_flat(&self) -> &[f32] {
        &self.centroids
    }

    pub fn from_parts(dsub: usize, widths: Vec<usize>, centroids: Vec<f32>) -> Self {
        let (offsets, col_starts) = layout(&widths);
        debug_assert_eq!(centroids.len(), widths.iter().map(|w| KCENTROIDS * w).sum::<usize>());
        ProductQuantizer {
            dsub,
            widths,
            offsets,
            col_starts,
            centroids,
        }
    }

    /// Runs Lloyd's k-means independently per sub-vector column.
    ///
    /// `data` is row-major `[rows][cols]`. When `cols` isn't a multiple of
    /// `dsub`, the final sub-vector is ragged rather than dropped.
    pub fn train(data: &[f32], rows: usize, cols: usize, dsub: usize) -> Self {
        let widths = subvector_widths(cols, dsub);
        let (offsets, col_starts) = layout(&widths);
        let total: usize = widths.iter().map(|w| KCENTROIDS * w).sum();
        let mut centroids = vec![0.0f32; total];
        let mut rng = StdRng::seed_from_u64(KSEED);

        for (m, &w) in widths.iter().enumerate() {
            let sub = extract_subvectors(data, rows, cols, col_starts[m], w);
            let learned = kmeans(&sub, rows, w, &mut rng);
            let base = offsets[m];
            centroids[base..base + KCENTROIDS * w].copy_from_slice(&learned);
        }

        ProductQuantizer {
            dsub,
            widths,
            offsets,
            col_starts,
            centroids,
        }
    }

    fn centroid(&self, m: usize, c: usize) -> &[f32] {
        let w = self.widths[m];
        let base = self.offsets[m] + c * w;
        &self.centroids[base..base + w]
    }

    fn encode_one(&self, m: usize, sub: &[f32]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for c in 0..KCENTROIDS {
            let d = squared_dist(sub, self.centroid(m, c));
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        best as u8
    }

    pub fn encode_all(&self, data: &[f32], rows: usize, cols: usize) -> Vec<u8> {
        let num_subvectors = self.num_subvectors();
        let mut out = vec![0u8; rows * num_subvectors];
        for r in 0..rows {
            for m in 0..num_subvectors {
                let w = self.widths[m];
                let start = r * cols + self.col_starts[m];
                let sub = &data[start..start + w];
                out[r * num_subvectors + m] = self.encode_one(m, sub);
            }
        }
        out
    }

    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let total_dim: usize = self.widths.iter().sum();
        let mut out = Vec::with_capacity(total_dim);
        for (m, &code) in codes.iter().enumerate() {
            out.extend_from_slice(self.centroid(m, code as usize));
        }
        out
    }

    /// `hidden . decode(codes)` without materializing the decoded row.
    pub fn dot_row(&self, hidden: &[f32], codes: &[u8]) -> f32 {
        let mut acc = 0.0;
        for (m, &code) in codes.iter().enumerate() {
            let w = self.widths[m];
            let centroid = self.centroid(m, code as usize);
            let h = &hidden[self.col_starts[m]..self.col_starts[m] + w];
            acc += h.iter().zip(centroid).map(|(a, b)| a * b).sum::<f32>();
        }
        acc
    }
}

/// The `qnorm` special case: one scalar quantized as a degenerate 1-dim PQ.
pub struct Norm1Quantizer {
    centroids: [f32; KCENTROIDS],
}

impl Norm1Quantizer {
    pub fn train(norms: &[f32]) -> Self {
        let rows = norms.len();
        let data: Vec<f32> = norms.to_vec();
        let mut rng = StdRng::seed_from_u64(KSEED);
        let learned = kmeans(&data, rows, 1, &mut rng);
        let mut centroids = [0.0f32; KCENTROIDS];
        centroids.copy_from_slice(&learned);
        Norm1Quantizer { centroids }
    }

    pub fn encode(&self, norm: f32) -> u8 {
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for (c, centroid) in self.centroids.iter().enumerate() {
            let d = (centroid - norm).powi(2);
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        best as u8
    }

    pub fn decode(&self, code: u8) -> f32 {
        self.centroids[code as usize]
    }

    pub fn centroids_flat(&self) -> &[f32] {
        &self.centroids
    }

    pub fn from_parts(centroids: Vec<f32>) -> Self {
        let mut arr = [0.0f32; KCENTROIDS];
        arr.copy_from_slice(&centroids);
        Norm1Quantizer { centroids: arr }
    }
}

fn extract_subvectors(data: &[f32], rows: usize, cols: usize, col_start: usize, width: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(rows * width);
    for r in 0..rows {
        let start = r * cols + col_start;
        out.extend_from_slice(&data[start..start + width]);
    }
    out
}

fn squared_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Lloyd's k-means over `rows` points of width `dim`, `KCENTROIDS` clusters,
/// `KITERS` iterations. Empty clusters are repaired by splitting the
/// heaviest centroid and perturbing the copy slightly (spec.md §4.6).
fn kmeans(data: &[f32], rows: usize, dim: usize, rng: &mut StdRng) -> Vec<f32> {
    let k = KCENTROIDS.min(rows.max(1));
    let mut centroids = vec![0.0f32; KCENTROIDS * dim];

    for c in 0..k {
        let src = rng.gen_range(0..rows.max(1)) * dim;
        if rows > 0 {
            centroids[c * dim..(c + 1) * dim].copy_from_slice(&data[src..src + dim]);
        }
    }
    // Degenerate fewer-points-than-centroids case: remaining centroids copy
    // cluster 0 with a small perturbation so every slot is well-defined.
    for c in k..KCENTROIDS {
        for d in 0..dim {
            centroids[c * dim + d] = centroids[d] + rng.gen_range(-1e-4..1e-4);
        }
    }

    if rows == 0 {
        return centroids;
    }

    let mut assign = vec![0usize; rows];
    for _ in 0..KITERS {
        for r in 0..rows {
            let point = &data[r * dim..(r + 1) * dim];
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for c in 0..KCENTROIDS {
                let d = squared_dist(point, &centroids[c * dim..(c + 1) * dim]);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            assign[r] = best;
        }

        let mut sums = vec![0.0f32; KCENTROIDS * dim];
        let mut counts = vec![0u32; KCENTROIDS];
        for r in 0..rows {
            let c = assign[r];
            counts[c] += 1;
            for d in 0..dim {
                sums[c * dim + d] += data[r * dim + d];
            }
        }

        let heaviest = (0..KCENTROIDS).max_by_key(|&c| counts[c]).unwrap_or(0);
        for c in 0..KCENTROIDS {
            if counts[c] == 0 {
                let src = heaviest * dim;
                for d in 0..dim {
                    centroids[c * dim + d] = centroids[src + d] + rng.gen_range(-1e-4..1e-4);
                }
            } else {
                let n = counts[c] as f32;
                for d in 0..dim {
                    centroids[c * dim + d] = sums[c * dim + d] / n;
                }
            }
        }
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_is_close() {
        let rows = 64;
        let cols = 4;
        let mut data = Vec::with_capacity(rows * cols);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..rows * cols {
            data.push(rng.gen_range(-1.0f32..1.0));
        }
        let pq = ProductQuantizer::train(&data, rows, cols, 2);
        let codes = pq.encode_all(&data, rows, cols);
        assert_eq!(codes.len(), rows * pq.num_subvectors());

        for r in 0..rows {
            let original = &data[r * cols..(r + 1) * cols];
            let decoded = pq.decode(&codes[r * pq.num_subvectors()..(r + 1) * pq.num_subvectors()]);
            let err: f32 = original
                .iter()
                .zip(decoded.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            assert!(err < 2.0, "quantization error too large: {err}");
        }
    }

    #[test]
    fn ragged_last_subvector_is_kept_not_truncated() {
        // cols=5, dsub=2 leaves a trailing width-1 subvector.
        let rows = 8;
        let cols = 5;
        let mut data = Vec::with_capacity(rows * cols);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..rows * cols {
            data.push(rng.gen_range(-1.0f32..1.0));
        }
        let pq = ProductQuantizer::train(&data, rows, cols, 2);
        assert_eq!(pq.num_subvectors(), 3);
        let codes = pq.encode_all(&data, rows, cols);
        assert_eq!(codes.len(), rows * 3);
        for r in 0..rows {
            let decoded = pq.decode(&codes[r * 3..(r + 1) * 3]);
            assert_eq!(decoded.len(), cols);
        }
    }

    #[test]
    fn empty_clusters_get_repaired_not_left_nan() {
        // Fewer distinct points than centroids forces empty-cluster repair.
        let data = vec![1.0f32, 1.0, -1.0, -1.0];
        let pq = ProductQuantizer::train(&data, 2, 2, 2);
        for v in &pq.centroids {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn norm1_quantizer_roundtrips_within_tolerance() {
        let norms: Vec<f32> = (0..100).map(|i| i as f32 * 0.1).collect();
        let nq = Norm1Quantizer::train(&norms);
        for &n in &norms {
            let code = nq.encode(n);
            let decoded = nq.decode(code);
            assert!((decoded - n).abs() < 5.0);
        }
    }
}
