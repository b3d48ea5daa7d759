//! Semantic clustering of market questions.
//!
//! K-means over embedding vectors groups markets that talk about the same
//! thing, so pair evaluation only compares plausible neighbors. When the
//! embedding provider is down, a rule-based topic table stands in: coarser
//! clusters, same downstream contract.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use regex::Regex;

/// Closed taxonomy used for cluster labels.
pub const TAXONOMY: &[&str] = &[
    "politics",
    "finance",
    "geopolitics",
    "economy",
    "tech",
    "ai",
    "culture",
    "elections",
    "other",
];

/// Static topic table for the no-embeddings fallback.
const TOPIC_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\b(election|ballot|primar(y|ies)|electoral|candidate)\b", "elections"),
    (r"(?i)\b(president|senate|congress|parliament|minister|governor|impeach|veto|cabinet)\b", "politics"),
    (r"(?i)\b(war|ceasefire|invasion|treaty|nato|sanction|missile|border)\b", "geopolitics"),
    (r"(?i)\b(fed|fomc|rate (cut|hike)|inflation|gdp|recession|treasury|cpi|jobs report)\b", "economy"),
    (r"(?i)\b(etf|stock|ipo|earnings|bitcoin|crypto|stablecoin|merger)\b", "finance"),
    (r"(?i)\b(ai|artificial intelligence|model|agi|openai|chatbot)\b", "ai"),
    (r"(?i)\b(launch|rocket|satellite|chip|semiconductor|software|iphone)\b", "tech"),
    (r"(?i)\b(movie|album|celebrity|award|tour|festival)\b", "culture"),
];

/// K-means configuration. `k` is derived from the population when `None`.
#[derive(Debug, Clone)]
pub struct KmeansConfig {
    /// Fixed cluster count; default derives max(5, n/10).
    pub k: Option<usize>,
    /// Iteration cap.
    pub max_iterations: usize,
    /// RNG seed for centroid initialization.
    pub seed: u64,
}

impl Default for KmeansConfig {
    fn default() -> Self {
        Self {
            k: None,
            max_iterations: 10,
            seed: 0,
        }
    }
}

/// Cluster assignment per input vector, values in `0..k`.
pub fn kmeans(vectors: &[Vec<f32>], config: &KmeansConfig) -> Vec<usize> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }

    let k = config.k.unwrap_or_else(|| (n / 10).max(5)).clamp(1, n);
    let dim = vectors[0].len();
    let mut rng = StdRng::seed_from_u64(config.seed);

    // Initial centroids: k distinct input vectors.
    let mut centroids: Vec<Vec<f32>> = sample(&mut rng, n, k)
        .into_iter()
        .map(|i| vectors[i].clone())
        .collect();

    let mut assignments = vec![0usize; n];

    for _ in 0..config.max_iterations {
        let mut changed = false;

        for (i, vector) in vectors.iter().enumerate() {
            let nearest = nearest_centroid(vector, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        // Recompute centroids; an emptied cluster is reseeded from a random
        // member so k stays stable.
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, vector) in vectors.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(vector) {
                *s += v;
            }
        }

        for (c, centroid) in centroids.iter_mut().enumerate() {
            if counts[c] == 0 {
                *centroid = vectors[rng.gen_range(0..n)].clone();
                continue;
            }
            for (dst, s) in centroid.iter_mut().zip(&sums[c]) {
                *dst = s / counts[c] as f32;
            }
        }
    }

    assignments
}

fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(vector, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Rule-based topic extraction: the embedding-free fallback. Each question
/// gets the first matching topic, or "other".
pub struct TopicExtractor {
    patterns: Vec<(Regex, &'static str)>,
}

impl TopicExtractor {
    pub fn new() -> Self {
        let patterns = TOPIC_PATTERNS
            .iter()
            .map(|(pattern, topic)| {
                (
                    Regex::new(pattern).expect("topic patterns are static and must compile"),
                    *topic,
                )
            })
            .collect();
        Self { patterns }
    }

    pub fn topic(&self, question: &str) -> &'static str {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(question))
            .map(|(_, topic)| *topic)
            .unwrap_or("other")
    }

    /// Group question indices by extracted topic, mirroring the k-means
    /// output shape: assignment index per question.
    pub fn assign(&self, questions: &[String]) -> Vec<usize> {
        let mut topic_ids: Vec<&'static str> = Vec::new();
        questions
            .iter()
            .map(|q| {
                let topic = self.topic(q);
                match topic_ids.iter().position(|t| *t == topic) {
                    Some(idx) => idx,
                    None => {
                        topic_ids.push(topic);
                        topic_ids.len() - 1
                    }
                }
            })
            .collect()
    }
}

impl Default for TopicExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well-separated blobs on the x axis.
    fn blobs() -> Vec<Vec<f32>> {
        let mut vectors = Vec::new();
        for i in 0..10 {
            vectors.push(vec![0.0 + i as f32 * 0.01, 0.0]);
        }
        for i in 0..10 {
            vectors.push(vec![10.0 + i as f32 * 0.01, 0.0]);
        }
        vectors
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let config = KmeansConfig {
            k: Some(2),
            max_iterations: 10,
            seed: 7,
        };
        let assignments = kmeans(&blobs(), &config);

        // Partition equivalence: each blob lands in one cluster, and the
        // clusters differ. Cluster ids themselves are opaque.
        let first = &assignments[..10];
        let second = &assignments[10..];
        assert!(first.iter().all(|c| *c == first[0]));
        assert!(second.iter().all(|c| *c == second[0]));
        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn test_kmeans_deterministic_with_seed() {
        let config = KmeansConfig {
            k: Some(3),
            max_iterations: 10,
            seed: 42,
        };
        let a = kmeans(&blobs(), &config);
        let b = kmeans(&blobs(), &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_kmeans_k_derivation_and_bounds() {
        let vectors: Vec<Vec<f32>> = (0..3).map(|i| vec![i as f32]).collect();
        // Derived k = max(5, 0) but clamped to n = 3.
        let assignments = kmeans(&vectors, &KmeansConfig::default());
        assert_eq!(assignments.len(), 3);
        assert!(assignments.iter().all(|c| *c < 3));

        assert!(kmeans(&[], &KmeansConfig::default()).is_empty());
    }

    #[test]
    fn test_topic_extractor() {
        let extractor = TopicExtractor::new();
        assert_eq!(extractor.topic("Will the senate confirm the nominee?"), "politics");
        assert_eq!(extractor.topic("Fed rate cut in December?"), "economy");
        assert_eq!(extractor.topic("Ceasefire agreement by March?"), "geopolitics");
        assert_eq!(extractor.topic("Will the new album drop?"), "culture");
        assert_eq!(extractor.topic("Something unclassifiable"), "other");
    }

    #[test]
    fn test_topic_assign_groups() {
        let extractor = TopicExtractor::new();
        let questions = vec![
            "Fed rate cut in December?".to_string(),
            "Will congress pass the budget?".to_string(),
            "Fed rate hike in March?".to_string(),
        ];
        let assignments = extractor.assign(&questions);
        assert_eq!(assignments[0], assignments[2]);
        assert_ne!(assignments[0], assignments[1]);
    }
}
