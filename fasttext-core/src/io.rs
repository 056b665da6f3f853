//! Versioned binary model format (spec.md §4.7) and the `.vec`/pretrained
//! vectors text formats (spec.md §6).
//!
//! Little-endian throughout via `byteorder`, matching [`crate::dictionary`]'s
//! own save/load. The loss itself is never persisted: `load_model`
//! reconstructs it from `args.loss` and the freshly-loaded dictionary
//! (see [`crate::loss::build`]), the same way the negative table and
//! Huffman tree are rebuilt rather than serialized.

use std::io::{BufRead, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::args::{Args, LossKind, ModelKind};
use crate::dictionary::Dictionary;
use crate::error::{FastTextError, Result};
use crate::loss::Loss;
use crate::matrix::{AnyMatrix, DenseMatrix, MatrixOps, QuantizedMatrix};
use crate::quant::{Norm1Quantizer, ProductQuantizer};

pub const MAGIC: i32 = 793_712_314;
pub const VERSION: i32 = 12;

fn loss_to_i32(loss: LossKind) -> i32 {
    match loss {
        LossKind::HierarchicalSoftmax => 1,
        LossKind::NegativeSampling => 2,
        LossKind::Softmax => 3,
        LossKind::OneVsAll => 4,
    }
}

fn loss_from_i32(v: i32) -> Result<LossKind> {
    match v {
        1 => Ok(LossKind::HierarchicalSoftmax),
        2 => Ok(LossKind::NegativeSampling),
        3 => Ok(LossKind::Softmax),
        4 => Ok(LossKind::OneVsAll),
        _ => Err(FastTextError::InvalidArgument(format!("unknown loss tag {v}"))),
    }
}

fn model_to_i32(model: ModelKind) -> i32 {
    match model {
        ModelKind::Cbow => 1,
        ModelKind::SkipGram => 2,
        ModelKind::Supervised => 3,
    }
}

fn model_from_i32(v: i32) -> Result<ModelKind> {
    match v {
        1 => Ok(ModelKind::Cbow),
        2 => Ok(ModelKind::SkipGram),
        3 => Ok(ModelKind::Supervised),
        _ => Err(FastTextError::InvalidArgument(format!("unknown model tag {v}"))),
    }
}

fn write_args<W: Write>(w: &mut W, args: &Args) -> Result<()> {
    w.write_i32::<LittleEndian>(args.dim)?;
    w.write_i32::<LittleEndian>(args.ws)?;
    w.write_i32::<LittleEndian>(args.epoch)?;
    w.write_i32::<LittleEndian>(args.min_count)?;
    w.write_i32::<LittleEndian>(args.neg)?;
    w.write_i32::<LittleEndian>(args.word_ngrams)?;
    w.write_i32::<LittleEndian>(loss_to_i32(args.loss))?;
    w.write_i32::<LittleEndian>(model_to_i32(args.model))?;
    w.write_i32::<LittleEndian>(args.bucket)?;
    w.write_i32::<LittleEndian>(args.minn)?;
    w.write_i32::<LittleEndian>(args.maxn)?;
    w.write_i32::<LittleEndian>(args.lr_update_rate)?;
    w.write_f64::<LittleEndian>(args.t)?;
    Ok(())
}

fn read_args<R: Read>(r: &mut R, version: i32) -> Result<Args> {
    let mut args = Args::default();
    args.dim = r.read_i32::<LittleEndian>()?;
    args.ws = r.read_i32::<LittleEndian>()?;
    args.epoch = r.read_i32::<LittleEndian>()?;
    args.min_count = r.read_i32::<LittleEndian>()?;
    args.neg = r.read_i32::<LittleEndian>()?;
    args.word_ngrams = r.read_i32::<LittleEndian>()?;
    args.loss = loss_from_i32(r.read_i32::<LittleEndian>()?)?;
    args.model = model_from_i32(r.read_i32::<LittleEndian>()?)?;
    args.bucket = r.read_i32::<LittleEndian>()?;
    args.minn = r.read_i32::<LittleEndian>()?;
    args.maxn = r.read_i32::<LittleEndian>()?;
    args.lr_update_rate = r.read_i32::<LittleEndian>()?;
    args.t = r.read_f64::<LittleEndian>()?;

    // Old supervised models predate subwords entirely (spec.md §4.7).
    if version <= 11 && args.model == ModelKind::Supervised {
        args.maxn = 0;
    }
    Ok(args)
}

fn write_dense<W: Write>(w: &mut W, m: &DenseMatrix) -> Result<()> {
    let rows = m.rows() as i64;
    let cols = m.cols() as i64;
    w.write_i64::<LittleEndian>(rows)?;
    w.write_i64::<LittleEndian>(cols)?;
    for v in m.snapshot() {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

fn read_dense<R: Read>(r: &mut R) -> Result<DenseMatrix> {
    let rows = r.read_i64::<LittleEndian>()? as usize;
    let cols = r.read_i64::<LittleEndian>()? as usize;
    let mut data = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        data.push(r.read_f32::<LittleEndian>()?);
    }
    Ok(DenseMatrix::from_rows(rows, cols, data))
}

fn write_quantized<W: Write>(w: &mut W, m: &QuantizedMatrix) -> Result<()> {
    w.write_i64::<LittleEndian>(m.rows() as i64)?;
    w.write_i64::<LittleEndian>(m.cols() as i64)?;
    w.write_i64::<LittleEndian>(m.pq().dsub() as i64)?;
    w.write_i64::<LittleEndian>(m.pq().num_subvectors() as i64)?;
    for v in m.pq().centroids_flat() {
        w.write_f32::<LittleEndian>(*v)?;
    }
    w.write_all(m.codes())?;
    match m.norms() {
        Some((nq, codes)) => {
            w.write_u8(1)?;
            for v in nq.centroids_flat() {
                w.write_f32::<LittleEndian>(*v)?;
            }
            w.write_all(codes)?;
        }
        None => w.write_u8(0)?,
    }
    Ok(())
}

fn read_quantized<R: Read>(r: &mut R) -> Result<QuantizedMatrix> {
    let rows = r.read_i64::<LittleEndian>()? as usize;
    let cols = r.read_i64::<LittleEndian>()? as usize;
    let dsub = r.read_i64::<LittleEndian>()? as usize;
    let num_subvectors = r.read_i64::<LittleEndian>()? as usize;
    let widths = crate::quant::subvector_widths(cols, dsub);
    debug_assert_eq!(widths.len(), num_subvectors);
    let total: usize = widths.iter().map(|w| 256 * w).sum();
    let mut centroids = Vec::with_capacity(total);
    for _ in 0..total {
        centroids.push(r.read_f32::<LittleEndian>()?);
    }
    let pq = ProductQuantizer::from_parts(dsub, widths, centroids);
    let mut codes = vec![0u8; rows * num_subvectors];
    r.read_exact(&mut codes)?;

    let has_norms = r.read_u8()? != 0;
    let norms = if has_norms {
        let mut norm_centroids = vec![0.0f32; 256];
        for slot in norm_centroids.iter_mut() {
            *slot = r.read_f32::<LittleEndian>()?;
        }
        let mut norm_codes = vec![0u8; rows];
        r.read_exact(&mut norm_codes)?;
        Some((Norm1Quantizer::from_parts(norm_centroids), norm_codes))
    } else {
        None
    };

    Ok(QuantizedMatrix::from_parts(pq, codes, rows, cols, norms))
}

fn write_any<W: Write>(w: &mut W, m: &AnyMatrix) -> Result<()> {
    match m {
        AnyMatrix::Dense(dense) => {
            w.write_u8(0)?;
            write_dense(w, dense)
        }
        AnyMatrix::Quantized(q) => {
            w.write_u8(1)?;
            write_quantized(w, q)
        }
    }
}

fn read_any<R: Read>(r: &mut R) -> Result<AnyMatrix> {
    match r.read_u8()? {
        0 => Ok(AnyMatrix::Dense(read_dense(r)?)),
        1 => Ok(AnyMatrix::Quantized(read_quantized(r)?)),
        tag => Err(FastTextError::InvalidArgument(format!("unknown matrix tag {tag}"))),
    }
}

/// A fully materialized model, as read from or about to be written to disk.
pub struct ModelFile {
    pub args: Args,
    pub dict: Dictionary,
    pub wi: AnyMatrix,
    pub wo: AnyMatrix,
    pub loss: std::sync::Arc<dyn Loss>,
}

impl std::fmt::Debug for ModelFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelFile")
            .field("args", &self.args)
            .field("dict", &self.dict)
            .field("wi", &self.wi.kind())
            .field("wo", &self.wo.kind())
            .finish()
    }
}

pub fn save_model<W: Write>(w: &mut W, args: &Args, dict: &Dictionary, wi: &AnyMatrix, wo: &AnyMatrix) -> Result<()> {
    w.write_i32::<LittleEndian>(MAGIC)?;
    w.write_i32::<LittleEndian>(VERSION)?;
    write_args(w, args)?;
    dict.save(w)?;
    write_any(w, wi)?;
    write_any(w, wo)?;
    Ok(())
}

pub fn load_model<R: BufRead>(r: &mut R) -> Result<ModelFile> {
    let magic = r.read_i32::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(FastTextError::InvalidArgument(format!("bad magic {magic}, expected {MAGIC}")));
    }
    let version = r.read_i32::<LittleEndian>()?;
    if version > VERSION {
        return Err(FastTextError::InvalidArgument(format!(
            "model version {version} is newer than supported version {VERSION}"
        )));
    }
    let args = read_args(r, version)?;
    let dict = Dictionary::load(r, &args)?;

    let quant_tag = r.fill_buf()?.first().copied();
    if dict.is_pruned() && quant_tag != Some(1) {
        return Err(FastTextError::InvalidArgument(
            "pruned dictionary requires a quantized input matrix".into(),
        ));
    }
    let wi = read_any(r)?;
    let wo = read_any(r)?;

    let loss = crate::loss::build(&args, &dict);
    Ok(ModelFile { args, dict, wi, wo, loss })
}

/// `<output>.vec`: first line `nwords dim`, then `word v1 … vdim` with
/// 5-digit precision (spec.md §6).
pub fn write_word_vectors<W: Write>(w: &mut W, dict: &Dictionary, wi: &dyn MatrixOps) -> Result<()> {
    writeln!(w, "{} {}", dict.nwords(), wi.cols())?;
    for id in 0..dict.nwords() {
        write!(w, "{}", dict.get_word(id))?;
        let subwords = dict.get_subwords(id);
        let mut row = vec![0.0f32; wi.cols()];
        for &sw in subwords {
            let mut tmp = crate::vector::Vector::zeros(wi.cols());
            wi.add_row_to_vector(&mut tmp, sw as usize, 1.0);
            for (a, b) in row.iter_mut().zip(tmp.as_slice()) {
                *a += b;
            }
        }
        let scale = 1.0 / subwords.len().max(1) as f32;
        for v in &row {
            write!(w, " {:.5}", v * scale)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Overwrites `matrix`'s word rows from a pretrained vectors file, extending
/// the vocabulary for unknown words (spec.md §6). `matrix` is expected to
/// already exist at its final `(nwords + bucket, dim)` shape with the bucket
/// rows randomly initialized — only word rows are touched here, so subword
/// buckets keep their random init. Mismatched `dim` is fatal.
pub fn load_pretrained_vectors<R: BufRead>(r: &mut R, dict: &mut Dictionary, matrix: &DenseMatrix) -> Result<()> {
    let mut header = String::new();
    r.read_line(&mut header)?;
    let mut parts = header.split_whitespace();
    let n: usize = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FastTextError::InvalidArgument("malformed pretrained vectors header".into()))?;
    let dim: i32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FastTextError::InvalidArgument("malformed pretrained vectors header".into()))?;
    if dim as usize != matrix.cols() {
        return Err(FastTextError::InvalidArgument(format!(
            "pretrained vectors dim {dim} does not match model dim {}",
            matrix.cols()
        )));
    }

    let mut line = String::new();
    for _ in 0..n {
        line.clear();
        if r.read_line(&mut line)? == 0 {
            break;
        }
        let mut fields = line.split_whitespace();
        let word = match fields.next() {
            Some(w) => w,
            None => continue,
        };
        let values: Vec<f32> = fields.filter_map(|s| s.parse().ok()).collect();
        if values.len() != dim as usize {
            return Err(FastTextError::InvalidArgument(format!(
                "pretrained vector for {word} has {} values, expected {dim}",
                values.len()
            )));
        }
        let mut id = dict.get_id(word);
        if id < 0 {
            // Vocabulary augmentation: the word becomes known even though
            // its row may land past the matrix sized before this call —
            // such rows are silently not written (Open Question in
            // spec.md §9 — no error on overflow).
            dict.add(word)?;
            id = dict.get_id(word);
        }
        if id >= 0 && (id as usize) < matrix.rows() {
            matrix.set_row(id as usize, &values);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{LossKind, ModelKind};
    use std::io::Cursor;

    fn toy_dict() -> Dictionary {
        let mut args = Args::default();
        args.min_count = 1;
        args.model = ModelKind::SkipGram;
        args.bucket = 10;
        args.minn = 2;
        args.maxn = 3;
        let mut dict = Dictionary::new(&args);
        let mut reader = std::io::BufReader::new(Cursor::new(b"the quick fox the dog\n".to_vec()));
        dict.read_from_file(&mut reader).unwrap();
        dict
    }

    #[test]
    fn magic_and_version_round_trip() {
        let dict = toy_dict();
        let mut args = Args::default();
        args.dim = 4;
        args.model = ModelKind::SkipGram;
        args.loss = LossKind::NegativeSampling;
        args.bucket = 10;
        args.minn = 2;
        args.maxn = 3;

        let wi = AnyMatrix::Dense(DenseMatrix::zeros((dict.nwords() + args.bucket) as usize, 4));
        let wo = AnyMatrix::Dense(DenseMatrix::zeros(dict.nwords() as usize, 4));

        let mut buf = Vec::new();
        save_model(&mut buf, &args, &dict, &wi, &wo).unwrap();

        let mut cursor = Cursor::new(buf);
        let loaded = load_model(&mut cursor).unwrap();
        assert_eq!(loaded.args.dim, 4);
        assert_eq!(loaded.args.loss, LossKind::NegativeSampling);
        assert_eq!(loaded.dict.nwords(), dict.nwords());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(1).unwrap();
        let mut cursor = Cursor::new(buf);
        let err = load_model(&mut cursor).unwrap_err();
        assert!(matches!(err, FastTextError::InvalidArgument(_)));
    }

    #[test]
    fn version_11_supervised_forces_maxn_zero() {
        let mut cursor = Cursor::new(Vec::new());
        let mut args = Args::default().for_supervised();
        args.maxn = 7;
        write_args(&mut cursor, &args).unwrap();
        cursor.set_position(0);
        let reloaded = read_args(&mut cursor, 11).unwrap();
        assert_eq!(reloaded.maxn, 0);
    }

    #[test]
    fn quantized_round_trip_preserves_dims() {
        let rows = 8;
        let cols = 4;
        let data: Vec<f32> = (0..rows * cols).map(|i| i as f32 * 0.1).collect();
        let qm = QuantizedMatrix::train(&data, rows, cols, 2, true);
        let mut buf = Vec::new();
        write_quantized(&mut buf, &qm).unwrap();
        let mut cursor = Cursor::new(buf);
        let reloaded = read_quantized(&mut cursor).unwrap();
        assert_eq!(reloaded.rows(), rows);
        assert_eq!(reloaded.cols(), cols);
    }

    #[test]
    fn pretrained_vectors_reject_mismatched_dim() {
        let mut dict = toy_dict();
        let matrix = DenseMatrix::zeros((dict.nwords() + dict.bucket()) as usize, 4);
        let mut cursor = Cursor::new(b"2 3\nthe 0.1 0.2 0.3\nfox 0.4 0.5 0.6\n".to_vec());
        let err = load_pretrained_vectors(&mut cursor, &mut dict, &matrix).unwrap_err();
        assert!(matches!(err, FastTextError::InvalidArgument(_)));
    }

    #[test]
    fn pretrained_vectors_overwrite_known_word_rows() {
        let mut dict = toy_dict();
        let the_id = dict.get_id("the");
        let matrix = DenseMatrix::zeros((dict.nwords() + dict.bucket()) as usize, 3);
        let mut cursor = Cursor::new(b"1 3\nthe 0.5 0.5 0.5\n".to_vec());
        load_pretrained_vectors(&mut cursor, &mut dict, &matrix).unwrap();
        assert_eq!(matrix.row(the_id as usize), &[0.5, 0.5, 0.5]);
    }
}
