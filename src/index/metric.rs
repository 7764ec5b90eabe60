//! Distance metrics and the distance-to-similarity mapping.

use crate::error::AppError;
use ndarray::ArrayView1;
use std::fmt;
use std::str::FromStr;

/// Distance used for nearest-neighbour search. Smaller is closer for every
/// variant, and every variant is non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - cos(a, b)`. A zero vector is at distance 1 from everything.
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
        match self {
            DistanceMetric::L2 => squared_l2(a, b),
            DistanceMetric::Cosine => {
                let norm_a = a.dot(&a).sqrt();
                let norm_b = b.dot(&b).sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                (1.0 - a.dot(&b) / (norm_a * norm_b)).max(0.0)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "cosine" | "cos" => Ok(Self::Cosine),
            other => Err(AppError::ValidationError(format!(
                "Unknown distance metric '{}'",
                other
            ))),
        }
    }
}

pub(crate) fn squared_l2(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Monotonically decreasing map from distance to similarity: `1 / (1 + d)`.
///
/// Scores lie in `(0, 1]`; non-finite distances score 0 so they never clear a
/// threshold.
pub fn similarity_from_distance(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_squared_l2() {
        let a = arr1(&[1.0, 2.0]);
        let b = arr1(&[4.0, 6.0]);
        assert_eq!(DistanceMetric::L2.distance(a.view(), b.view()), 25.0);
    }

    #[test]
    fn test_cosine_orthogonal_and_identical() {
        let a = arr1(&[1.0, 0.0]);
        let b = arr1(&[0.0, 2.0]);
        assert!((DistanceMetric::Cosine.distance(a.view(), b.view()) - 1.0).abs() < 1e-6);
        assert!(DistanceMetric::Cosine.distance(a.view(), a.view()).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = arr1(&[0.0, 0.0]);
        let b = arr1(&[1.0, 1.0]);
        assert_eq!(DistanceMetric::Cosine.distance(a.view(), b.view()), 1.0);
    }

    #[test]
    fn test_similarity_is_monotone_decreasing() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(1.0), 0.5);
        assert!(similarity_from_distance(0.5) > similarity_from_distance(2.0));
    }

    #[test]
    fn test_similarity_of_nan_is_zero() {
        assert_eq!(similarity_from_distance(f32::NAN), 0.0);
        assert_eq!(similarity_from_distance(f32::INFINITY), 0.0);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2);
        assert_eq!(
            "cosine".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Cosine
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
