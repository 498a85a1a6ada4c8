//! Vector similarity over corpus items.

use crate::corpus::CorpusItem;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 || !denom.is_finite() {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Map cosine similarity from [-1, 1] onto [0, 1].
pub fn similarity_to_unit(cosine: f32) -> f32 {
    if cosine.is_nan() {
        return 0.0;
    }
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Rank items by similarity to a query embedding.
///
/// Returns `(index, unit_score)` pairs sorted by descending score, ties by
/// item id. Items without embeddings or below `min_score` are skipped.
pub fn vector_search(items: &[CorpusItem], query_embedding: &[f32], limit: usize, min_score: f32) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let emb = item.embedding.as_ref()?;
            if emb.len() != query_embedding.len() {
                return None;
            }
            let score = similarity_to_unit(cosine_similarity(emb, query_embedding));
            (score >= min_score).then_some((i, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| items[a.0].id.cmp(&items[b.0].id)));
    scored.truncate(limit);
    scored
}
