//! Exhaustive cosine-similarity index over one protocol's chunk embeddings.

use std::cmp::Ordering;

use protoquery_core::error::{Error, Result};
use protoquery_core::types::Chunk;

#[derive(Debug, Clone, PartialEq)]
struct Row {
    ordinal: u32,
    norm: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dim: usize,
    rows: Vec<Row>,
    /// Row-major copy of the embeddings, `rows.len() * dim` long.
    data: Vec<f32>,
}

pub fn l2_norm(v: &[f32]) -> f32 { v.iter().map(|x| x * x).sum::<f32>().sqrt() }

/// Cosine similarity clamped to `[-1, 1]`; zero vectors score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 { cosine_with_norms(a, l2_norm(a), b, l2_norm(b)) }

fn cosine_with_norms(a: &[f32], na: f32, b: &[f32], nb: f32) -> f32 {
    if na == 0.0 || nb == 0.0 { return 0.0; }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

impl VectorIndex {
    /// Fails with `DimensionMismatch` when any chunk's embedding is not `dim` long.
    pub fn build(dim: usize, chunks: &[Chunk]) -> Result<Self> {
        let mut rows = Vec::with_capacity(chunks.len());
        let mut data = Vec::with_capacity(chunks.len() * dim);
        for c in chunks {
            if c.embedding.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: c.embedding.len(), context: format!("chunk {}", c.chunk_ref()) });
            }
            rows.push(Row { ordinal: c.ordinal, norm: l2_norm(&c.embedding) });
            data.extend_from_slice(&c.embedding);
        }
        Ok(Self { dim, rows, data })
    }

    pub fn dim(&self) -> usize { self.dim }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn embedding(&self, ordinal: u32) -> Option<&[f32]> {
        let pos = self.position(ordinal)?;
        Some(&self.data[pos * self.dim..(pos + 1) * self.dim])
    }

    fn position(&self, ordinal: u32) -> Option<usize> {
        match self.rows.get(ordinal as usize) {
            Some(r) if r.ordinal == ordinal => Some(ordinal as usize),
            _ => self.rows.iter().position(|r| r.ordinal == ordinal),
        }
    }

    /// Similarity of `query` to every row, by score desc then ordinal asc.
    pub fn search(&self, query: &[f32]) -> Result<Vec<(u32, f32)>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len(), context: "query embedding".to_string() });
        }
        let qn = l2_norm(query);
        let mut out: Vec<(u32, f32)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.ordinal, cosine_with_norms(query, qn, &self.data[i * self.dim..(i + 1) * self.dim], r.norm)))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        Ok(out)
    }
}
