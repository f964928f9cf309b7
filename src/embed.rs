use crate::cleaner::MessageCleaner;
use sha2::{Digest, Sha256};

/// Maps each message to a fixed-length numeric vector. Implementations must
/// return one vector per input message, same order, all the same length.
pub trait Embedder: Send + Sync {
    fn embed(&self, messages: &[String]) -> Vec<Vec<f32>>;
}

/// Deterministic embedding without a trained model: every word gets a
/// pseudo-random unit-range vector derived from its SHA-256 digest, and a
/// message embeds as the element-wise mean of its word vectors. Messages that
/// share most words land close together, which is all the clustering step
/// needs. A message with no alphabetic words embeds as the zero vector.
pub struct HashEmbedder {
    cleaner: MessageCleaner,
    vector_length: usize,
}

impl HashEmbedder {
    pub fn new(cleaner: MessageCleaner, vector_length: usize) -> Self {
        Self {
            cleaner,
            vector_length,
        }
    }

    fn word_vector(&self, word: &str) -> Vec<f32> {
        let mut components = Vec::with_capacity(self.vector_length);
        let mut block: u32 = 0;

        while components.len() < self.vector_length {
            let mut hasher = Sha256::new();
            hasher.update(word.as_bytes());
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();

            for byte in digest.iter() {
                if components.len() == self.vector_length {
                    break;
                }
                // Map 0..=255 onto [-1.0, 1.0].
                components.push(f32::from(*byte) / 127.5 - 1.0);
            }
            block += 1;
        }

        components
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, messages: &[String]) -> Vec<Vec<f32>> {
        messages
            .iter()
            .map(|message| {
                let words = self.cleaner.clean(message);
                let mut mean = vec![0.0f32; self.vector_length];
                if words.is_empty() {
                    return mean;
                }

                for word in &words {
                    for (slot, component) in mean.iter_mut().zip(self.word_vector(word)) {
                        *slot += component;
                    }
                }
                for slot in mean.iter_mut() {
                    *slot /= words.len() as f32;
                }
                mean
            })
            .collect()
    }
}
