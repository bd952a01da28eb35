use time::OffsetDateTime;
use uuid::Uuid;

use super::descriptor::{FaceDescriptor, DISTANCE_METRIC};

/// A stored descriptor together with the account that owns it.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub user_id: Uuid,
    pub email: String,
    pub descriptor: FaceDescriptor,
    pub enrolled_at: OffsetDateTime,
}

/// Outcome of comparing one probe against the gallery. Never persisted.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    /// Nearest record, present only when it lies within the threshold.
    pub matched: Option<&'a FaceRecord>,
    /// Distance to the nearest record, `None` for an empty gallery.
    pub distance: Option<f32>,
    pub threshold: f32,
}

impl<'a> MatchResult<'a> {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.matched.map(|r| r.user_id)
    }
}

/// Nearest-neighbour search over every enrolled descriptor.
///
/// Every record is compared, there is no early exit on a good candidate.
/// Equidistant candidates resolve to the first one in gallery order.
pub fn find_best_match<'a>(
    probe: &FaceDescriptor,
    gallery: &'a [FaceRecord],
    threshold: f32,
) -> MatchResult<'a> {
    let mut best: Option<(usize, f32)> = None;

    for (i, record) in gallery.iter().enumerate() {
        let d = probe.distance(&record.descriptor, DISTANCE_METRIC);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }

    match best {
        Some((idx, d)) if d <= threshold => MatchResult {
            matched: Some(&gallery[idx]),
            distance: Some(d),
            threshold,
        },
        _ => MatchResult {
            matched: None,
            distance: best.map(|(_, d)| d),
            threshold,
        },
    }
}
