//! Searchable vector structure behind the tool index.
//!
//! IVF-flat: vectors are partitioned into `nlist` clusters by k-means and a query
//! scans only the members of its `nprobe` nearest clusters, computing exact
//! distances there. `IndexKind::Flat` skips clustering and scans everything.
//!
//! Clusters live in the space the metric ranks in: under `Cosine`, training,
//! assignment and list selection all use unit-normalized vectors.

use super::metric::{squared_l2, DistanceMetric};
use super::record::ToolRecord;
use crate::error::AppError;
use ndarray::{Array1, Array2, ArrayView1};
use std::str::FromStr;

/// Upper bound on Lloyd iterations during training.
const MAX_KMEANS_ITERATIONS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Exact scan over every vector.
    Flat,
    /// Inverted file over k-means clusters.
    #[default]
    Ivf,
}

impl FromStr for IndexKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" | "exact" => Ok(Self::Flat),
            "ivf" | "ivf_flat" | "ivf-flat" => Ok(Self::Ivf),
            other => Err(AppError::ValidationError(format!(
                "Unknown index kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    pub kind: IndexKind,
    pub metric: DistanceMetric,
    pub nlist: usize,
    pub nprobe: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            kind: IndexKind::Ivf,
            metric: DistanceMetric::L2,
            nlist: 128,
            nprobe: 10,
        }
    }
}

/// Immutable snapshot of committed records, ready for nearest-neighbour queries.
/// Rebuilt wholesale on every flush.
pub(crate) struct SearchableIndex {
    records: Vec<ToolRecord>,
    vectors: Array2<f32>,
    centroids: Array2<f32>,
    lists: Vec<Vec<usize>>,
    metric: DistanceMetric,
    nprobe: usize,
}

impl SearchableIndex {
    /// Build from records that all carry `dim`-length embeddings.
    pub fn build(records: Vec<ToolRecord>, dim: usize, params: &IndexParams) -> Self {
        let n = records.len();
        let mut vectors = Array2::<f32>::zeros((n, dim));
        for (i, record) in records.iter().enumerate() {
            vectors
                .row_mut(i)
                .assign(&ArrayView1::from(record.embedding.as_slice()));
        }

        let (centroids, lists) = match params.kind {
            IndexKind::Ivf if n > 0 && params.nlist > 0 => {
                let space = match params.metric {
                    DistanceMetric::L2 => vectors.clone(),
                    DistanceMetric::Cosine => unit_rows(&vectors),
                };
                let centroids = train_centroids(&space, params.nlist);
                let mut lists = vec![Vec::new(); centroids.nrows()];
                for i in 0..n {
                    lists[nearest_centroid(&centroids, space.row(i))].push(i);
                }
                (centroids, lists)
            }
            _ => (Array2::zeros((0, dim)), Vec::new()),
        };

        tracing::debug!(
            records = n,
            lists = lists.len(),
            metric = %params.metric,
            "Searchable index built"
        );

        Self {
            records,
            vectors,
            centroids,
            lists,
            metric: params.metric,
            nprobe: params.nprobe.max(1),
        }
    }

    /// Up to `k` nearest records, closest first. Ties break on insertion order,
    /// which is id order since records arrive sorted.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(ToolRecord, f32)> {
        let n = self.records.len();
        if k == 0 || n == 0 {
            return Vec::new();
        }

        let query = ArrayView1::from(query);

        // With no more records than requested, the answer is all of them.
        let candidates: Vec<usize> = if self.lists.is_empty() || n <= k {
            (0..n).collect()
        } else {
            self.nearest_lists(query)
        };

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|i| (i, self.metric.distance(query, self.vectors.row(i))))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, distance)| (self.records[i].clone(), distance))
            .collect()
    }

    /// Members of the `nprobe` clusters nearest to `query`.
    fn nearest_lists(&self, query: ArrayView1<f32>) -> Vec<usize> {
        let query = match self.metric {
            DistanceMetric::L2 => query.to_owned(),
            DistanceMetric::Cosine => unit(query),
        };
        let mut order: Vec<(usize, f32)> = self
            .centroids
            .outer_iter()
            .enumerate()
            .map(|(c, centroid)| (c, squared_l2(query.view(), centroid)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        order
            .into_iter()
            .take(self.nprobe)
            .flat_map(|(c, _)| self.lists[c].iter().copied())
            .collect()
    }
}

/// `v` scaled to unit length; a zero vector stays zero.
fn unit(v: ArrayView1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt();
    if norm > 0.0 {
        &v / norm
    } else {
        v.to_owned()
    }
}

fn unit_rows(vectors: &Array2<f32>) -> Array2<f32> {
    let mut out = vectors.clone();
    for mut row in out.outer_iter_mut() {
        let normalized = unit(row.view());
        row.assign(&normalized);
    }
    out
}

fn nearest_centroid(centroids: &Array2<f32>, vector: ArrayView1<f32>) -> usize {
    centroids
        .outer_iter()
        .enumerate()
        .map(|(c, centroid)| (c, squared_l2(vector, centroid)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(c, _)| c)
        .unwrap_or(0)
}

/// Deterministic k-means: farthest-first seeding from row 0, then Lloyd
/// iterations until assignments stop changing. Empty clusters keep their seed.
fn train_centroids(vectors: &Array2<f32>, nlist: usize) -> Array2<f32> {
    let n = vectors.nrows();
    let dim = vectors.ncols();
    let nlist = nlist.min(n).max(1);

    let mut centroids = Array2::<f32>::zeros((nlist, dim));
    centroids.row_mut(0).assign(&vectors.row(0));

    let mut nearest: Vec<f32> = (0..n)
        .map(|i| squared_l2(vectors.row(i), centroids.row(0)))
        .collect();

    for c in 1..nlist {
        let farthest = nearest
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &d)| if d > best.1 { (i, d) } else { best })
            .0;
        centroids.row_mut(c).assign(&vectors.row(farthest));

        for (i, slot) in nearest.iter_mut().enumerate() {
            let d = squared_l2(vectors.row(i), centroids.row(c));
            if d < *slot {
                *slot = d;
            }
        }
    }

    let mut assignments = vec![usize::MAX; n];
    for _ in 0..MAX_KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, assignment) in assignments.iter_mut().enumerate() {
            let c = nearest_centroid(&centroids, vectors.row(i));
            if *assignment != c {
                *assignment = c;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = Array2::<f32>::zeros((nlist, dim));
        let mut counts = vec![0usize; nlist];
        for (i, &c) in assignments.iter().enumerate() {
            let mut row = sums.row_mut(c);
            row += &vectors.row(i);
            counts[c] += 1;
        }
        for (c, &count) in counts.iter().enumerate() {
            if count > 0 {
                let mean = &sums.row(c) / count as f32;
                centroids.row_mut(c).assign(&mean);
            }
        }
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, embedding: Vec<f32>) -> ToolRecord {
        ToolRecord::new(name, "test", "").with_embedding(embedding)
    }

    fn grid_records() -> Vec<ToolRecord> {
        // Two well separated groups in 2-D.
        let mut records = Vec::new();
        for i in 0..10 {
            let offset = i as f32 * 0.01;
            records.push(record(&format!("left_{:02}", i), vec![-10.0 + offset, 0.0]));
            records.push(record(&format!("right_{:02}", i), vec![10.0 + offset, 0.0]));
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = SearchableIndex::build(Vec::new(), 2, &IndexParams::default());
        assert!(index.search(&[0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_fewer_records_than_k_returns_all() {
        let records = vec![record("a", vec![0.0, 1.0]), record("b", vec![1.0, 0.0])];
        let index = SearchableIndex::build(records, 2, &IndexParams::default());
        assert_eq!(index.search(&[5.0, 5.0], 10).len(), 2);
    }

    #[test]
    fn test_results_sorted_by_distance() {
        let records = vec![
            record("far", vec![5.0, 0.0]),
            record("near", vec![1.0, 0.0]),
            record("mid", vec![3.0, 0.0]),
        ];
        let params = IndexParams {
            kind: IndexKind::Flat,
            ..IndexParams::default()
        };
        let index = SearchableIndex::build(records, 2, &params);
        let hits = index.search(&[0.0, 0.0], 2);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.tool_name, "near");
        assert_eq!(hits[0].1, 1.0);
        assert_eq!(hits[1].0.tool_name, "mid");
    }

    #[test]
    fn test_ivf_scanning_every_list_matches_flat() {
        let ivf = SearchableIndex::build(
            grid_records(),
            2,
            &IndexParams {
                kind: IndexKind::Ivf,
                metric: DistanceMetric::L2,
                nlist: 4,
                nprobe: 4,
            },
        );
        let flat = SearchableIndex::build(
            grid_records(),
            2,
            &IndexParams {
                kind: IndexKind::Flat,
                ..IndexParams::default()
            },
        );

        let names = |hits: Vec<(ToolRecord, f32)>| {
            hits.into_iter().map(|(r, _)| r.tool_name).collect::<Vec<_>>()
        };
        assert_eq!(
            names(ivf.search(&[9.0, 0.0], 5)),
            names(flat.search(&[9.0, 0.0], 5))
        );
    }

    #[test]
    fn test_ivf_single_list_stays_in_cluster() {
        let index = SearchableIndex::build(
            grid_records(),
            2,
            &IndexParams {
                kind: IndexKind::Ivf,
                metric: DistanceMetric::L2,
                nlist: 2,
                nprobe: 1,
            },
        );
        let hits = index.search(&[-9.0, 0.0], 5);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|(r, _)| r.tool_name.starts_with("left_")));
    }

    #[test]
    fn test_kmeans_separates_groups() {
        let records = grid_records();
        let mut vectors = Array2::<f32>::zeros((records.len(), 2));
        for (i, r) in records.iter().enumerate() {
            vectors
                .row_mut(i)
                .assign(&ArrayView1::from(r.embedding.as_slice()));
        }
        let centroids = train_centroids(&vectors, 2);
        let mut xs: Vec<f32> = centroids.outer_iter().map(|c| c[0]).collect();
        xs.sort_by(f32::total_cmp);
        assert!(xs[0] < -9.0 && xs[1] > 9.0);
    }

    #[test]
    fn test_nlist_larger_than_records_is_clamped() {
        let records = vec![record("a", vec![0.0, 1.0]), record("b", vec![1.0, 0.0])];
        let index = SearchableIndex::build(
            records,
            2,
            &IndexParams {
                nlist: 128,
                ..IndexParams::default()
            },
        );
        assert_eq!(index.lists.len(), 2);
        assert_eq!(index.records.len(), 2);
    }

    #[test]
    fn test_cosine_clusters_by_direction() {
        // A long vector along x sits far from a short one in L2 but shares its
        // direction; under cosine both must land in the list the query picks.
        let records = vec![
            record("e_far", vec![100.0, 0.0]),
            record("e_near", vec![1.0, 0.2]),
            record("north", vec![0.0, 1.0]),
            record("north2", vec![0.1, 1.0]),
        ];
        let index = SearchableIndex::build(
            records,
            2,
            &IndexParams {
                kind: IndexKind::Ivf,
                metric: DistanceMetric::Cosine,
                nlist: 2,
                nprobe: 1,
            },
        );

        let mut members: Vec<Vec<&str>> = index
            .lists
            .iter()
            .map(|list| {
                let mut names: Vec<&str> = list
                    .iter()
                    .map(|&i| index.records[i].tool_name.as_str())
                    .collect();
                names.sort();
                names
            })
            .collect();
        members.sort();
        assert_eq!(members, vec![vec!["e_far", "e_near"], vec!["north", "north2"]]);

        let hits = index.search(&[1.0, 0.0], 1);
        assert_eq!(hits[0].0.tool_name, "e_far");
        assert!(hits[0].1 < 1e-6);
    }

    #[test]
    fn test_unit_keeps_zero_vector() {
        let zero = Array1::<f32>::zeros(3);
        assert_eq!(unit(zero.view()), zero);
        let v = Array1::from(vec![3.0f32, 4.0]);
        assert_eq!(unit(v.view()), Array1::from(vec![0.6f32, 0.8]));
    }
}
