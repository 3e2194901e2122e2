use std::collections::BTreeMap;

/// Result of identity clustering across one video's segments.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityClusteringResult<K: Ord> {
    /// Cluster id for every key that had an embedding.
    pub assignments: BTreeMap<K, u32>,
    /// Number of clusters created, i.e. distinct people.
    pub num_people: u32,
}

impl<K: Ord> IdentityClusteringResult<K> {
    pub fn identity_of(&self, key: &K) -> Option<u32> {
        self.assignments.get(key).copied()
    }
}

/// Group face embeddings into identities.
///
/// The clustering is online and greedy, in input order:
/// 1. The first embedding seeds cluster 0
/// 2. Each following embedding takes the median Euclidean distance to the
///    members of every existing cluster
/// 3. It joins the closest cluster if that median is below `threshold`,
///    otherwise it seeds a new cluster
///
/// Assignments are never revisited, so the result depends on input order and
/// is deterministic for a fixed order.
pub fn cluster_identities<K: Ord + Clone>(
    embeddings: &[(K, Vec<f32>)],
    threshold: f32,
) -> IdentityClusteringResult<K> {
    let mut clusters: Vec<Vec<&[f32]>> = Vec::new();
    let mut assignments = BTreeMap::new();

    for (key, embedding) in embeddings {
        let closest = clusters
            .iter()
            .enumerate()
            .map(|(id, members)| {
                let distances: Vec<f32> = members
                    .iter()
                    .map(|member| euclidean_distance(embedding, member))
                    .collect();
                (id, median(distances))
            })
            .fold(None, |best: Option<(usize, f32)>, (id, dist)| match best {
                Some((_, best_dist)) if best_dist <= dist => best,
                _ => Some((id, dist)),
            });

        let cluster_id = match closest {
            Some((id, dist)) if dist < threshold => {
                clusters[id].push(embedding.as_slice());
                id
            }
            _ => {
                clusters.push(vec![embedding.as_slice()]);
                clusters.len() - 1
            }
        };

        assignments.insert(key.clone(), cluster_id as u32);
    }

    IdentityClusteringResult {
        assignments,
        num_people: clusters.len() as u32,
    }
}

/// Euclidean distance; vectors of different length are infinitely far apart.
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Median, averaging the middle pair for even lengths.
fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return f32::INFINITY;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
