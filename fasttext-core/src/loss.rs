//! Loss family: negative sampling, hierarchical softmax, full softmax, and
//! one-vs-all (spec.md §4.2).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::{Rng, RngCore};

use crate::error::{FastTextError, Result};
use crate::matrix::{DenseMatrix, MatrixOps};
use crate::vector::Vector;

const SIGMOID_TABLE_SIZE: usize = 512;
const MAX_SIGMOID: f32 = 8.0;
const LOG_TABLE_SIZE: usize = 512;
const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// Shared, immutable `σ`/`log` lookup tables (spec.md §4.2).
pub struct Tables {
    sigmoid: Vec<f32>,
    log: Vec<f32>,
}

impl Tables {
    pub fn new() -> Self {
        let sigmoid = (0..SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as f32 * 2.0 * MAX_SIGMOID) / SIGMOID_TABLE_SIZE as f32 - MAX_SIGMOID;
                1.0 / (1.0 + (-x).exp())
            })
            .collect();
        let log = (0..LOG_TABLE_SIZE)
            .map(|i| {
                let x = (i as f32 + 1e-5) / LOG_TABLE_SIZE as f32;
                x.ln()
            })
            .collect();
        Tables { sigmoid, log }
    }

    pub fn sigmoid(&self, x: f32) -> f32 {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = (((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as f32) / (2.0 * MAX_SIGMOID)) as usize;
            self.sigmoid[i.min(SIGMOID_TABLE_SIZE - 1)]
        }
    }

    pub fn log(&self, x: f32) -> f32 {
        if x > 1.0 {
            0.0
        } else {
            let i = (x * LOG_TABLE_SIZE as f32) as usize;
            self.log[i.min(LOG_TABLE_SIZE - 1)]
        }
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

/// One scored candidate in a bounded top-k heap, insertion order broken ties.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    score: f32,
    label: i32,
    seq: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.label == other.label
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) behaves as a min-heap on
        // score, letting us pop-and-discard the worst entry past capacity k.
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then(self.seq.cmp(&other.seq))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded max-heap over `(score, label)`, stable on ties, capacity `k`.
pub struct PredictionHeap {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u32,
}

impl PredictionHeap {
    pub fn new(k: usize) -> Self {
        PredictionHeap {
            k,
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, score: f32, label: i32) {
        let entry = HeapEntry {
            score,
            label,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry.score > worst.score {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Final sort: score descending, stable on ties by insertion order.
    pub fn into_sorted(self) -> Vec<(f32, i32)> {
        let mut v: Vec<HeapEntry> = self.heap.into_vec();
        v.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        v.into_iter().map(|e| (e.score, e.label)).collect()
    }
}

/// Per-thread scratch state threaded through a forward/backward pass.
/// `rng` is the calling thread's own generator (spec.md §4.4/§9: "per-thread
/// RNG objects passed by mutable reference, never thread-local globals") —
/// negative sampling draws from it instead of reaching for a global.
pub struct LossState<'a> {
    pub hidden: &'a Vector,
    pub grad: &'a mut Vector,
    pub rng: &'a mut dyn RngCore,
}

/// Common capability of every loss: forward/backward and top-k predict.
/// Training always writes through a shared [`DenseMatrix`] (Hogwild rows);
/// quantization happens after training, so `predict` works over either
/// backing via the narrower [`MatrixOps`] capability.
pub trait Loss: Send + Sync {
    fn forward(
        &self,
        wo: &DenseMatrix,
        targets: &[i32],
        target_index: i32,
        state: &mut LossState,
        lr: f32,
        backprop: bool,
    ) -> Result<f32>;

    fn predict(&self, wo: &dyn MatrixOps, k: usize, threshold: f32, hidden: &Vector) -> Result<Vec<(f32, i32)>>;
}

/// `score = σ(wo[target]·hidden)`; shared by NS, HS and OVA.
/// `grad += α·wo[target]`, `wo[target] += α·hidden` (spec.md §4.2).
fn binary_logistic(
    tables: &Tables,
    wo: &DenseMatrix,
    target: i32,
    label_positive: bool,
    hidden: &Vector,
    grad: &mut Vector,
    lr: f32,
    backprop: bool,
) -> Result<f32> {
    let dot: f32 = wo.row(target as usize).iter().zip(hidden.as_slice()).map(|(a, b)| a * b).sum();
    if dot.is_nan() {
        return Err(FastTextError::NaNEncountered);
    }
    let score = tables.sigmoid(dot);
    if backprop {
        let alpha = lr * (if label_positive { 1.0 } else { 0.0 } - score);
        grad.add_scaled(&Vector(wo.row(target as usize).to_vec()), alpha);
        wo.add_scaled_row(target as usize, hidden, alpha);
    }
    Ok(if label_positive {
        -tables.log(score)
    } else {
        -tables.log(1.0 - score)
    })
}

/// Uniform-power-½ negative sampler over a precomputed 10M-slot table.
pub struct NegativeTable {
    table: Vec<i32>,
}

impl NegativeTable {
    pub fn build(counts: &[i64]) -> Self {
        let z: f64 = counts.iter().map(|&c| (c as f64).powf(0.5)).sum();
        let mut table = Vec::with_capacity(NEGATIVE_TABLE_SIZE);
        for (id, &c) in counts.iter().enumerate() {
            let share = (c as f64).powf(0.5) / z;
            let n = (share * NEGATIVE_TABLE_SIZE as f64) as usize;
            table.extend(std::iter::repeat(id as i32).take(n));
        }
        while table.len() < NEGATIVE_TABLE_SIZE {
            table.push((table.len() % counts.len().max(1)) as i32);
        }
        table.truncate(NEGATIVE_TABLE_SIZE);
        NegativeTable { table }
    }

    pub fn sample(&self, rng: &mut dyn RngCore, avoid: i32) -> i32 {
        loop {
            let candidate = self.table[rng.gen_range(0..self.table.len())];
            if candidate != avoid {
                return candidate;
            }
        }
    }
}

pub struct NegativeSamplingLoss {
    tables: Tables,
    negatives: NegativeTable,
    neg: usize,
}

impl NegativeSamplingLoss {
    pub fn new(counts: &[i64], neg: usize) -> Self {
        NegativeSamplingLoss {
            tables: Tables::new(),
            negatives: NegativeTable::build(counts),
            neg,
        }
    }

    pub fn sample_negative(&self, rng: &mut dyn RngCore, avoid: i32) -> i32 {
        self.negatives.sample(rng, avoid)
    }
}

impl Loss for NegativeSamplingLoss {
    fn forward(
        &self,
        wo: &DenseMatrix,
        targets: &[i32],
        target_index: i32,
        state: &mut LossState,
        lr: f32,
        backprop: bool,
    ) -> Result<f32> {
        let target = targets[target_index as usize];
        let mut loss = binary_logistic(&self.tables, wo, target, true, state.hidden, state.grad, lr, backprop)?;
        for _ in 0..self.neg {
            let negative = self.negatives.sample(&mut *state.rng, target);
            loss += binary_logistic(&self.tables, wo, negative, false, state.hidden, state.grad, lr, backprop)?;
        }
        Ok(loss)
    }

    fn predict(&self, wo: &dyn MatrixOps, k: usize, threshold: f32, hidden: &Vector) -> Result<Vec<(f32, i32)>> {
        full_output_predict(&self.tables, wo, k, threshold, hidden)
    }
}

/// `2·osz - 1` nodes built bottom-up with two monotone pointers (spec.md §3).
///
/// Nodes `0..osz` are leaf slots (sorted by descending count, not label ids);
/// nodes `osz..2*osz-1` are internal nodes, addressed in `wo` at row
/// `node - osz` — the same rebasing [`HuffmanTree::path`]'s entries already
/// use, so `forward` and `predict` walk consistent row ids. `children` and
/// `slot_to_label` are kept (not just `paths`/`codes`) so `predict` can walk
/// the tree top-down from the real root instead of reconstructing a
/// complete-binary-tree shape that wouldn't match this Huffman structure.
pub struct HuffmanTree {
    paths: Vec<Vec<i32>>,
    codes: Vec<Vec<bool>>,
    children: Vec<[i32; 2]>,
    slot_to_label: Vec<i32>,
    osz: usize,
}

impl HuffmanTree {
    pub fn build(counts: &[i64]) -> Self {
        let osz = counts.len();
        let mut count = vec![0i64; 2 * osz - 1];
        let mut parent = vec![0i32; 2 * osz - 1];
        let mut binary = vec![false; 2 * osz - 1];
        let mut children = vec![[-1i32; 2]; 2 * osz - 1];

        let mut order: Vec<usize> = (0..osz).collect();
        order.sort_by(|&a, &b| counts[b].cmp(&counts[a]));
        for (slot, &id) in order.iter().enumerate() {
            count[slot] = counts[id];
        }
        for c in count.iter_mut().skip(osz) {
            *c = i64::MAX;
        }

        let mut leaf = osz as isize - 1;
        let mut node = osz as isize;
        for i in 0..osz - 1 {
            let mut mini = [0isize; 2];
            for m in mini.iter_mut() {
                if leaf >= 0 && count[leaf as usize] < count[node as usize] {
                    *m = leaf;
                    leaf -= 1;
                } else {
                    *m = node;
                    node += 1;
                }
            }
            let target = osz + i;
            count[target] = count[mini[0] as usize] + count[mini[1] as usize];
            parent[mini[0] as usize] = target as i32;
            parent[mini[1] as usize] = target as i32;
            binary[mini[1] as usize] = true;
            children[target] = [mini[0] as i32, mini[1] as i32];
        }

        let mut paths = vec![Vec::new(); osz];
        let mut codes = vec![Vec::new(); osz];
        for (slot, &id) in order.iter().enumerate() {
            let mut path = Vec::new();
            let mut code = Vec::new();
            let mut j = slot as i32;
            while parent[j as usize] != -1 && (j as usize) != 2 * osz - 2 {
                path.push(parent[j as usize] - osz as i32);
                code.push(binary[j as usize]);
                j = parent[j as usize];
                if j == 0 && parent[0] == 0 {
                    break;
                }
            }
            paths[id] = path;
            codes[id] = code;
        }

        let mut slot_to_label = vec![-1i32; osz];
        for (slot, &id) in order.iter().enumerate() {
            slot_to_label[slot] = id as i32;
        }

        HuffmanTree {
            paths,
            codes,
            children,
            slot_to_label,
            osz,
        }
    }

    pub fn path(&self, label: i32) -> &[i32] {
        &self.paths[label as usize]
    }

    pub fn code(&self, label: i32) -> &[bool] {
        &self.codes[label as usize]
    }

    pub fn num_labels(&self) -> usize {
        self.paths.len()
    }

    /// Top internal node, in full-tree numbering (`osz..2*osz-1`); a
    /// single-label dictionary has no internal nodes and its sole leaf slot
    /// is its own root.
    pub fn root(&self) -> i32 {
        if self.osz <= 1 {
            0
        } else {
            (2 * self.osz - 2) as i32
        }
    }

    /// Leaf slots (`0..osz`) hold the sorted-by-count leaves; everything
    /// `>= osz` is an internal node.
    pub fn is_leaf(&self, node: i32) -> bool {
        (node as usize) < self.osz
    }

    /// `(left, right)` children of an internal node, in full-tree numbering.
    pub fn children(&self, node: i32) -> (i32, i32) {
        let c = self.children[node as usize];
        (c[0], c[1])
    }

    /// The original label id a leaf slot was built from.
    pub fn leaf_label(&self, node: i32) -> i32 {
        self.slot_to_label[node as usize]
    }
}

pub struct HierarchicalSoftmaxLoss {
    tables: Tables,
    tree: HuffmanTree,
}

impl HierarchicalSoftmaxLoss {
    pub fn new(counts: &[i64]) -> Self {
        HierarchicalSoftmaxLoss {
            tables: Tables::new(),
            tree: HuffmanTree::build(counts),
        }
    }
}

impl Loss for HierarchicalSoftmaxLoss {
    fn forward(
        &self,
        wo: &DenseMatrix,
        targets: &[i32],
        target_index: i32,
        state: &mut LossState,
        lr: f32,
        backprop: bool,
    ) -> Result<f32> {
        let target = targets[target_index as usize];
        let path = self.tree.path(target);
        let code = self.tree.code(target);
        let mut loss = 0.0;
        for (i, &node) in path.iter().enumerate() {
            loss += binary_logistic(&self.tables, wo, node, code[i], state.hidden, state.grad, lr, backprop)?;
        }
        Ok(loss)
    }

    fn predict(&self, wo: &dyn MatrixOps, k: usize, threshold: f32, hidden: &Vector) -> Result<Vec<(f32, i32)>> {
        let mut heap = PredictionHeap::new(k);
        let log_threshold = threshold.ln();
        let root = self.tree.root();
        self.dfs(wo, hidden, root, 0.0, log_threshold, &mut heap)?;
        Ok(heap.into_sorted())
    }
}

impl HierarchicalSoftmaxLoss {
    /// Walks the real Huffman tree top-down from `root()`, addressing `wo`
    /// the same way `forward` does: internal node `n` is row `n - osz`.
    fn dfs(
        &self,
        wo: &dyn MatrixOps,
        hidden: &Vector,
        node: i32,
        score: f32,
        log_threshold: f32,
        heap: &mut PredictionHeap,
    ) -> Result<()> {
        if score < log_threshold {
            return Ok(());
        }
        if self.tree.is_leaf(node) {
            heap.push(score, self.tree.leaf_label(node));
            return Ok(());
        }
        let osz = self.tree.num_labels() as i32;
        let dot = wo.dot_row(hidden, (node - osz) as usize);
        if dot.is_nan() {
            return Err(FastTextError::NaNEncountered);
        }
        let f = self.tables.sigmoid(dot);
        let (left, right) = self.tree.children(node);
        self.dfs(wo, hidden, left, score + (1.0 - f).ln(), log_threshold, heap)?;
        self.dfs(wo, hidden, right, score + f.ln(), log_threshold, heap)?;
        Ok(())
    }
}

fn stable_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|x| x / sum).collect()
}

pub struct SoftmaxLoss {
    tables: Tables,
}

impl SoftmaxLoss {
    pub fn new() -> Self {
        SoftmaxLoss { tables: Tables::new() }
    }
}

impl Default for SoftmaxLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl Loss for SoftmaxLoss {
    fn forward(
        &self,
        wo: &DenseMatrix,
        targets: &[i32],
        target_index: i32,
        state: &mut LossState,
        lr: f32,
        backprop: bool,
    ) -> Result<f32> {
        let target = targets[target_index as usize];
        let osz = wo.rows();
        let logits: Vec<f32> = (0..osz)
            .map(|i| wo.row(i).iter().zip(state.hidden.as_slice()).map(|(a, b)| a * b).sum())
            .collect();
        if logits.iter().any(|v: &f32| v.is_nan()) {
            return Err(FastTextError::NaNEncountered);
        }
        let output = stable_softmax(&logits);
        if backprop {
            for i in 0..osz {
                let label_positive = i as i32 == target;
                let alpha = lr * (if label_positive { 1.0 } else { 0.0 } - output[i]);
                state.grad.add_scaled(&Vector(wo.row(i).to_vec()), alpha);
                wo.add_scaled_row(i, state.hidden, alpha);
            }
        }
        Ok(-self.tables.log(output[target as usize]))
    }

    fn predict(&self, wo: &dyn MatrixOps, k: usize, threshold: f32, hidden: &Vector) -> Result<Vec<(f32, i32)>> {
        let osz = wo.rows();
        let logits: Vec<f32> = (0..osz).map(|i| wo.dot_row(hidden, i)).collect();
        if logits.iter().any(|v| v.is_nan()) {
            return Err(FastTextError::NaNEncountered);
        }
        let output = stable_softmax(&logits);
        let mut heap = PredictionHeap::new(k);
        let log_threshold = threshold.ln();
        for (i, &p) in output.iter().enumerate() {
            let lp = self.tables.log(p);
            if lp >= log_threshold {
                heap.push(lp, i as i32);
            }
        }
        Ok(heap.into_sorted())
    }
}

pub struct OneVsAllLoss {
    tables: Tables,
}

impl OneVsAllLoss {
    pub fn new() -> Self {
        OneVsAllLoss { tables: Tables::new() }
    }
}

impl Default for OneVsAllLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl Loss for OneVsAllLoss {
    fn forward(
        &self,
        wo: &DenseMatrix,
        targets: &[i32],
        _target_index: i32,
        state: &mut LossState,
        lr: f32,
        backprop: bool,
    ) -> Result<f32> {
        let osz = wo.rows();
        let mut loss = 0.0;
        for i in 0..osz {
            let positive = targets.contains(&(i as i32));
            loss += binary_logistic(&self.tables, wo, i as i32, positive, state.hidden, state.grad, lr, backprop)?;
        }
        Ok(loss)
    }

    fn predict(&self, wo: &dyn MatrixOps, k: usize, threshold: f32, hidden: &Vector) -> Result<Vec<(f32, i32)>> {
        full_output_predict(&self.tables, wo, k, threshold, hidden)
    }
}

/// Shared predict path for NS and OVA: a full per-row sigmoid scan.
fn full_output_predict(
    tables: &Tables,
    wo: &dyn MatrixOps,
    k: usize,
    threshold: f32,
    hidden: &Vector,
) -> Result<Vec<(f32, i32)>> {
    let osz = wo.rows();
    let mut heap = PredictionHeap::new(k);
    let log_threshold = threshold.ln();
    for i in 0..osz {
        let dot = wo.dot_row(hidden, i);
        if dot.is_nan() {
            return Err(FastTextError::NaNEncountered);
        }
        let score = tables.sigmoid(dot);
        let lp = tables.log(score);
        if lp >= log_threshold {
            heap.push(lp, i as i32);
        }
    }
    Ok(heap.into_sorted())
}

/// Builds the configured loss, rebuilding whatever per-label statistics it
/// needs (negative table, Huffman tree) from the dictionary rather than
/// persisting them — `save`/`load` only need `args.loss` (spec.md §4.7).
pub fn build(args: &crate::args::Args, dict: &crate::dictionary::Dictionary) -> std::sync::Arc<dyn Loss> {
    use crate::args::{LossKind, ModelKind};
    use crate::dictionary::EntryType;

    let output_counts = if args.model == ModelKind::Supervised {
        dict.get_counts(EntryType::Label)
    } else {
        dict.get_counts(EntryType::Word)
    };

    match args.loss {
        LossKind::NegativeSampling => std::sync::Arc::new(NegativeSamplingLoss::new(&output_counts, args.neg as usize)),
        LossKind::HierarchicalSoftmax => std::sync::Arc::new(HierarchicalSoftmaxLoss::new(&output_counts)),
        LossKind::Softmax => std::sync::Arc::new(SoftmaxLoss::new()),
        LossKind::OneVsAll => std::sync::Arc::new(OneVsAllLoss::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DenseMatrix;
    use rand::SeedableRng;

    #[test]
    fn sigmoid_table_matches_exact_at_zero() {
        let t = Tables::new();
        assert!((t.sigmoid(0.0) - 0.5).abs() < 0.05);
    }

    #[test]
    fn sigmoid_saturates_outside_range() {
        let t = Tables::new();
        assert_eq!(t.sigmoid(100.0), 1.0);
        assert_eq!(t.sigmoid(-100.0), 0.0);
    }

    #[test]
    fn prediction_heap_keeps_top_k_sorted_desc() {
        let mut heap = PredictionHeap::new(2);
        heap.push(0.1, 0);
        heap.push(0.9, 1);
        heap.push(0.5, 2);
        let sorted = heap.into_sorted();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].1, 1);
        assert_eq!(sorted[1].1, 2);
    }

    #[test]
    fn prediction_heap_breaks_ties_by_insertion_order() {
        let mut heap = PredictionHeap::new(2);
        heap.push(0.5, 10);
        heap.push(0.5, 20);
        let sorted = heap.into_sorted();
        assert_eq!(sorted[0].1, 10);
        assert_eq!(sorted[1].1, 20);
    }

    #[test]
    fn huffman_tree_heavy_label_gets_short_path() {
        let counts = vec![1, 1, 1, 1, 1, 1, 1, 1, 1, 100];
        let tree = HuffmanTree::build(&counts);
        assert!(tree.path(9).len() <= 2);
    }

    #[test]
    fn softmax_forward_matches_manual_negative_log_prob() {
        let wo = DenseMatrix::from_rows(2, 2, vec![1.0, 0.0, 0.0, 1.0]);
        let hidden = Vector(vec![1.0, 0.0]);
        let mut grad = Vector::zeros(2);
        let loss = SoftmaxLoss::new();
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(1);
        let mut state = LossState { hidden: &hidden, grad: &mut grad, rng: &mut rng };
        let l = loss.forward(&wo, &[0], 0, &mut state, 0.1, false).unwrap();
        let logits = [1.0f32, 0.0f32];
        let expected = -stable_softmax(&logits)[0].ln();
        assert!((l - expected).abs() < 1e-3);
    }

    #[test]
    fn negative_table_never_returns_avoided_id() {
        let counts = vec![5, 1, 1];
        let table = NegativeTable::build(&counts);
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(1);
        for _ in 0..1000 {
            assert_ne!(table.sample(&mut rng, 0), 0);
        }
    }
}
