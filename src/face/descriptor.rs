use serde::{Deserialize, Serialize};

use super::error::FaceError;

/// Number of values produced by the face-embedding model.
pub const DESCRIPTOR_LEN: usize = 128;

/// Metric used to compare descriptors. Changing the embedding model usually
/// means revisiting both this and [`DEFAULT_MATCH_THRESHOLD`].
pub const DISTANCE_METRIC: DistanceMetric = DistanceMetric::Euclidean;

/// Maximum Euclidean distance at which two 128-value descriptors are
/// considered the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
}

impl DistanceMetric {
    /// Distance between two equally sized slices. Lower = more similar.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

/// Validated face embedding of exactly [`DESCRIPTOR_LEN`] finite values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Result<Self, FaceError> {
        if values.len() != DESCRIPTOR_LEN {
            return Err(FaceError::InvalidLength {
                expected: DESCRIPTOR_LEN,
                got: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(FaceError::NonFinite { index });
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn distance(&self, other: &FaceDescriptor, metric: DistanceMetric) -> f32 {
        metric.distance(&self.0, &other.0)
    }
}

impl TryFrom<Vec<f32>> for FaceDescriptor {
    type Error = FaceError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

#[cfg(test)]
pub(crate) fn filled(value: f32) -> FaceDescriptor {
    FaceDescriptor::new(vec![value; DESCRIPTOR_LEN]).expect("valid descriptor")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        let err = FaceDescriptor::new(vec![0.1; DESCRIPTOR_LEN - 1]).unwrap_err();
        assert!(matches!(
            err,
            FaceError::InvalidLength { expected: DESCRIPTOR_LEN, got } if got == DESCRIPTOR_LEN - 1
        ));
        assert!(FaceDescriptor::new(Vec::new()).is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut values = vec![0.0; DESCRIPTOR_LEN];
        values[17] = f32::NAN;
        let err = FaceDescriptor::new(values).unwrap_err();
        assert!(matches!(err, FaceError::NonFinite { index: 17 }));
    }

    #[test]
    fn euclidean_distance_of_identical_is_zero() {
        let a = filled(0.25);
        assert_eq!(a.distance(&a.clone(), DISTANCE_METRIC), 0.0);
    }

    #[test]
    fn euclidean_distance_matches_hand_computation() {
        assert!((DistanceMetric::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);

        // 128 components each differing by 0.1 => sqrt(128 * 0.01)
        let d = filled(0.0).distance(&filled(0.1), DISTANCE_METRIC);
        assert!((d - (DESCRIPTOR_LEN as f32 * 0.01).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn serializes_as_plain_array() {
        let json = serde_json::to_value(filled(0.5)).unwrap();
        assert_eq!(json.as_array().map(|a| a.len()), Some(DESCRIPTOR_LEN));
    }
}
