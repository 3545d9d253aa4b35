//! Greedy clustering of retrieved items.
//!
//! Near-duplicate retrieval hits would pad the synthesis prompt with the
//! same evidence several times. A single greedy pass collapses them: each
//! item joins the first cluster whose representative it is similar enough
//! to, otherwise it starts a new cluster.

/// Cosine similarity with a guard for zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b + 1e-10)
}

/// Return the representative index of each cluster, preserving input order.
///
/// Items arrive ranked by ascending distance, so the first member of a
/// cluster is its best exemplar and becomes the representative.
pub fn cluster_representatives(embeddings: &[Vec<f32>], similarity_threshold: f32) -> Vec<usize> {
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for (idx, embedding) in embeddings.iter().enumerate() {
        let mut placed = false;
        for cluster in &mut clusters {
            let rep = cluster[0];
            if cosine_similarity(&embeddings[rep], embedding) >= similarity_threshold {
                cluster.push(idx);
                placed = true;
                break;
            }
        }
        if !placed {
            clusters.push(vec![idx]);
        }
    }

    clusters.into_iter().map(|c| c[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.6, 0.8, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_vector_does_not_divide_by_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.is_finite());
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn near_duplicates_collapse_to_one_representative() {
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.999, 0.01, 0.0], // same cluster as index 0
            vec![0.0, 1.0, 0.0],    // new cluster
        ];
        let reps = cluster_representatives(&embeddings, 0.90);
        assert_eq!(reps, vec![0, 2]);
    }

    #[test]
    fn representatives_preserve_input_order() {
        let embeddings = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 0.99], // joins cluster of index 0
            vec![0.7, 0.7],  // below threshold against both reps
        ];
        let reps = cluster_representatives(&embeddings, 0.95);
        assert_eq!(reps, vec![0, 1, 3]);
    }

    #[test]
    fn empty_input_yields_no_clusters() {
        let reps = cluster_representatives(&[], 0.9);
        assert!(reps.is_empty());
    }
}
