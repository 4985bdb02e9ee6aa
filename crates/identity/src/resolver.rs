// Copyright 2025-2026 CEMAXECUTER LLC

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::index::NearestNeighborIndex;

/// First label handed out; labels grow from here and are never reused.
pub const FIRST_LABEL: i32 = 101;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("similarity index unavailable: {0}")]
    IndexUnavailable(String),
}

/// Outcome of resolving one embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IdentityDecision {
    pub label: i32,
    pub is_new_device: bool,
    /// Cosine distance to the nearest enrolled device; infinite when
    /// the index was empty.
    pub distance: f64,
}

/// Bookkeeping for one enrolled device. Mutated only on enrollment or
/// match, always from the single pipeline thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceRecord {
    pub first_enrolled_at: f64,
    pub last_matched_at: f64,
    pub match_count: u64,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Enroll-or-match classifier over the nearest-neighbor index.
pub struct IdentityResolver {
    index: Box<dyn NearestNeighborIndex>,
    next_label: i32,
    devices: HashMap<i32, DeviceRecord>,
}

impl IdentityResolver {
    pub fn new(index: Box<dyn NearestNeighborIndex>) -> Self {
        Self {
            index,
            next_label: FIRST_LABEL,
            devices: HashMap::new(),
        }
    }

    /// Resolve an embedding to a device label.
    ///
    /// A nearest neighbor within `threshold` cosine distance is a match;
    /// anything else (including an empty index) enrolls a new device.
    /// An index failure resolves nothing and enrolls nothing, so a
    /// retried frame can never double-enroll.
    pub fn resolve(
        &mut self,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<IdentityDecision, ResolverError> {
        let best = self
            .index
            .query(embedding)
            .map_err(|e| ResolverError::IndexUnavailable(e.to_string()))?;

        match best {
            None => self.enroll(embedding, f64::INFINITY),
            Some(hit) if hit.distance > threshold => self.enroll(embedding, hit.distance),
            Some(hit) => {
                let now = unix_now();
                let record = self.devices.entry(hit.id).or_insert(DeviceRecord {
                    first_enrolled_at: now,
                    last_matched_at: now,
                    match_count: 0,
                });
                record.last_matched_at = now;
                record.match_count += 1;
                Ok(IdentityDecision {
                    label: hit.id,
                    is_new_device: false,
                    distance: hit.distance,
                })
            }
        }
    }

    fn enroll(
        &mut self,
        embedding: &[f32],
        distance: f64,
    ) -> Result<IdentityDecision, ResolverError> {
        let label = self.next_label;
        // Insert before consuming the label: a failed insert must leave
        // the counter untouched.
        self.index
            .insert(label, embedding)
            .map_err(|e| ResolverError::IndexUnavailable(e.to_string()))?;
        self.next_label += 1;

        let now = unix_now();
        self.devices.insert(
            label,
            DeviceRecord {
                first_enrolled_at: now,
                last_matched_at: now,
                match_count: 1,
            },
        );
        log::info!("enrolled new device: label {}", label);
        Ok(IdentityDecision {
            label,
            is_new_device: true,
            distance,
        })
    }

    pub fn device(&self, label: i32) -> Option<&DeviceRecord> {
        self.devices.get(&label)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn next_label(&self) -> i32 {
        self.next_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexError, LinearCosineIndex, Neighbor};

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(Box::new(LinearCosineIndex::new(8)))
    }

    #[test]
    fn test_first_embedding_enrolls_101() {
        let mut r = resolver();
        let d = r.resolve(&unit(8, 0), 0.3).unwrap();
        assert_eq!(d.label, FIRST_LABEL);
        assert!(d.is_new_device);
        assert!(d.distance.is_infinite());
        assert_eq!(r.device_count(), 1);
        assert_eq!(r.device(FIRST_LABEL).unwrap().match_count, 1);
    }

    #[test]
    fn test_near_embedding_matches() {
        let mut r = resolver();
        r.resolve(&unit(8, 0), 0.3).unwrap();

        let mut near = unit(8, 0);
        near[1] = 0.05;
        let d = r.resolve(&near, 0.3).unwrap();
        assert_eq!(d.label, 101);
        assert!(!d.is_new_device);
        assert!(d.distance < 0.3);
        assert_eq!(r.device(101).unwrap().match_count, 2);
    }

    #[test]
    fn test_far_embedding_enrolls_next_label() {
        let mut r = resolver();
        r.resolve(&unit(8, 0), 0.3).unwrap();
        let d = r.resolve(&unit(8, 1), 0.3).unwrap();
        assert_eq!(d.label, 102);
        assert!(d.is_new_device);
        assert!((d.distance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_labels_monotone_never_reused() {
        let mut r = resolver();
        let mut labels = Vec::new();
        for hot in 0..5 {
            labels.push(r.resolve(&unit(8, hot), 0.3).unwrap().label);
            // Interleave matches; they must not mint labels.
            r.resolve(&unit(8, hot), 0.3).unwrap();
        }
        assert_eq!(labels, vec![101, 102, 103, 104, 105]);
        assert_eq!(r.next_label(), 106);
    }

    /// Index stub that fails queries or inserts on demand.
    struct FlakyIndex {
        inner: LinearCosineIndex,
        fail_query: bool,
        fail_insert: bool,
    }

    impl NearestNeighborIndex for FlakyIndex {
        fn query(&self, embedding: &[f32]) -> Result<Option<Neighbor>, IndexError> {
            if self.fail_query {
                return Err(IndexError::Unavailable("connection refused".into()));
            }
            self.inner.query(embedding)
        }
        fn insert(&mut self, id: i32, embedding: &[f32]) -> Result<(), IndexError> {
            if self.fail_insert {
                return Err(IndexError::Unavailable("connection refused".into()));
            }
            self.inner.insert(id, embedding)
        }
        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_query_failure_does_not_enroll() {
        let mut r = IdentityResolver::new(Box::new(FlakyIndex {
            inner: LinearCosineIndex::new(8),
            fail_query: true,
            fail_insert: false,
        }));
        assert!(matches!(
            r.resolve(&unit(8, 0), 0.3),
            Err(ResolverError::IndexUnavailable(_))
        ));
        assert_eq!(r.device_count(), 0);
        assert_eq!(r.next_label(), FIRST_LABEL);
    }

    #[test]
    fn test_insert_failure_leaves_label_unconsumed() {
        let mut r = IdentityResolver::new(Box::new(FlakyIndex {
            inner: LinearCosineIndex::new(8),
            fail_query: false,
            fail_insert: true,
        }));
        assert!(r.resolve(&unit(8, 0), 0.3).is_err());
        assert_eq!(r.next_label(), FIRST_LABEL);
        assert_eq!(r.device_count(), 0);
    }
}
