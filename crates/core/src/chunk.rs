use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MatrixError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
const CHUNK_ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(MatrixError::config("chunk size must be greater than zero"));
        }
        if self.overlap >= self.size {
            return Err(MatrixError::config(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap, self.size
            )));
        }
        Ok(())
    }

    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }
}

/// Character window over a source text. Positions count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub source_id: String,
    pub index: usize,
    pub chunk_id: String,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

pub struct TextChunker {
    config: ChunkConfig,
}

impl TextChunker {
    /// Rejects an invalid window up front instead of correcting it.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    pub fn split(&self, source_id: &str, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let stride = self.config.stride();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + self.config.size).min(chars.len());
            let body: String = chars[start..end].iter().collect();
            let index = chunks.len();
            chunks.push(TextChunk {
                source_id: source_id.to_string(),
                index,
                chunk_id: chunk_id(source_id, index, &body),
                text: body,
                char_start: start,
                char_end: end,
            });
            if end == chars.len() {
                break;
            }
            start += stride;
        }
        chunks
    }
}

/// Convenience over [`TextChunker`] for a single text.
pub fn split_text(
    source_id: &str,
    text: &str,
    size: usize,
    overlap: usize,
) -> Result<Vec<TextChunk>> {
    Ok(TextChunker::new(ChunkConfig { size, overlap })?.split(source_id, text))
}

fn chunk_id(source_id: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(CHUNK_ID_LEN);
    id
}
