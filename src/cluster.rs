/// Label reserved for records judged dissimilar to every other record.
pub const NOISE: i32 = -1;

/// Partitions a set of vectors into integer labels, one per vector, in input
/// order. -1 marks noise; other values carry no meaning beyond grouping and
/// are not guaranteed contiguous across implementations.
pub trait Clusterer: Send + Sync {
    fn cluster(&self, vectors: &[Vec<f32>]) -> Vec<i32>;
}

/// Density-based clustering over Euclidean distance.
///
/// A point with at least `min_samples` neighbors (itself included) within
/// `eps` seeds a cluster; the cluster then absorbs every density-reachable
/// point. Points reachable from no core point are labeled noise.
pub struct DbscanClusterer {
    eps: f64,
    min_samples: usize,
}

impl DbscanClusterer {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    fn neighbors(&self, vectors: &[Vec<f32>], index: usize) -> Vec<usize> {
        (0..vectors.len())
            .filter(|&other| distance(&vectors[index], &vectors[other]) <= self.eps)
            .collect()
    }
}

fn distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

impl Clusterer for DbscanClusterer {
    fn cluster(&self, vectors: &[Vec<f32>]) -> Vec<i32> {
        let mut labels: Vec<Option<i32>> = vec![None; vectors.len()];
        let mut next_label = 0;

        for index in 0..vectors.len() {
            if labels[index].is_some() {
                continue;
            }

            let seed_neighbors = self.neighbors(vectors, index);
            if seed_neighbors.len() < self.min_samples {
                labels[index] = Some(NOISE);
                continue;
            }

            let label = next_label;
            next_label += 1;
            labels[index] = Some(label);

            // Expand the cluster over density-reachable points.
            let mut frontier = seed_neighbors;
            while let Some(point) = frontier.pop() {
                match labels[point] {
                    // Border point previously dismissed as noise joins the
                    // cluster but does not expand it further.
                    Some(NOISE) => labels[point] = Some(label),
                    Some(_) => continue,
                    None => {
                        labels[point] = Some(label);
                        let reach = self.neighbors(vectors, point);
                        if reach.len() >= self.min_samples {
                            frontier.extend(reach);
                        }
                    }
                }
            }
        }

        labels.into_iter().map(|l| l.unwrap_or(NOISE)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(coords: &[(f32, f32)]) -> Vec<Vec<f32>> {
        coords.iter().map(|&(x, y)| vec![x, y]).collect()
    }

    #[test]
    fn two_tight_groups_and_one_outlier() {
        let vectors = points(&[
            (0.0, 0.0),
            (0.1, 0.0),
            (0.0, 0.1),
            (5.0, 5.0),
            (5.1, 5.0),
            (5.0, 5.1),
            (20.0, 20.0),
        ]);

        let labels = DbscanClusterer::new(0.5, 2).cluster(&vectors);

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[6], NOISE);
    }

    #[test]
    fn identical_vectors_share_a_cluster() {
        let vectors = points(&[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]);
        let labels = DbscanClusterer::new(0.001, 2).cluster(&vectors);
        assert_eq!(labels, vec![0, 0, 0]);
    }

    #[test]
    fn min_samples_too_high_makes_everything_noise() {
        let vectors = points(&[(0.0, 0.0), (10.0, 10.0)]);
        let labels = DbscanClusterer::new(0.5, 2).cluster(&vectors);
        assert_eq!(labels, vec![NOISE, NOISE]);
    }

    #[test]
    fn empty_input_yields_empty_labels() {
        let labels = DbscanClusterer::new(0.5, 2).cluster(&[]);
        assert!(labels.is_empty());
    }

    #[test]
    fn one_label_per_vector_in_order() {
        let vectors = points(&[(0.0, 0.0), (0.1, 0.1), (9.0, 9.0)]);
        let labels = DbscanClusterer::new(0.5, 2).cluster(&vectors);
        assert_eq!(labels.len(), vectors.len());
    }
}
