// Copyright 2025-2026 CEMAXECUTER LLC

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use rf_dsp::spectrogram::Spectrogram;

/// Fingerprint embeddings shorter than this carry too little
/// information to separate transmitters.
pub const MIN_EMBEDDING_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("embedding length mismatch: got {got}, expected {expected}")]
    LengthMismatch { got: usize, expected: usize },
}

/// Capability interface over the embedding-inference collaborator.
/// Implementations must be deterministic and produce the same-length
/// output on every call; partial output is never returned.
pub trait EmbeddingModel: Send {
    fn embedding_len(&self) -> usize;

    fn infer(&self, spectrogram: &Spectrogram) -> Result<Vec<f32>, ModelError>;
}

/// Seeded random-projection embedding backend.
///
/// Projects the flattened spectrogram through a fixed pseudo-random
/// matrix and L2-normalizes the result. Stands in for an external
/// trained fingerprint model behind the same trait; distances between
/// projections still preserve relative spectrogram similarity.
pub struct RandomProjectionModel {
    dim: usize,
    seed: u64,
}

impl RandomProjectionModel {
    pub fn new(dim: usize, seed: u64) -> Result<Self, String> {
        if dim < MIN_EMBEDDING_LEN {
            return Err(format!(
                "embedding length {} below minimum {}",
                dim, MIN_EMBEDDING_LEN
            ));
        }
        Ok(Self { dim, seed })
    }
}

impl EmbeddingModel for RandomProjectionModel {
    fn embedding_len(&self) -> usize {
        self.dim
    }

    fn infer(&self, spectrogram: &Spectrogram) -> Result<Vec<f32>, ModelError> {
        if spectrogram.data.is_empty() {
            return Err(ModelError::Inference("empty spectrogram".into()));
        }

        let mut out = Vec::with_capacity(self.dim);
        for row in 0..self.dim {
            // One reproducible projection row per output element.
            let row_seed = self.seed ^ (row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let mut rng = StdRng::seed_from_u64(row_seed);
            let mut acc = 0.0f64;
            for &v in &spectrogram.data {
                acc += v as f64 * rng.gen_range(-1.0..1.0);
            }
            out.push(acc as f32);
        }

        let norm = out.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in out.iter_mut() {
                *v = (*v as f64 / norm) as f32;
            }
        }
        Ok(out)
    }
}
