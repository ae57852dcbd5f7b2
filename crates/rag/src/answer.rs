use rayon::prelude::*;
use tracing::debug;

use sopmatrix_core::{
    EmbeddingProvider, MatrixError, Result, ScoredChunk, TextChunker, VectorIndex,
};

use crate::{LlmClient, LlmRequest};

pub const DEFAULT_TOP_K: usize = 4;

const INSTRUCTION: &str = "Answer the question using only the context below. Be concise.";

/// `complete(prompt) -> text` boundary of a generative model.
pub trait CompletionProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

impl CompletionProvider for LlmClient {
    fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self.chat_blocking(&LlmRequest {
            system: None,
            user: prompt.to_string(),
        })?;
        Ok(response.content)
    }
}

#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub used_chunks: Vec<ScoredChunk>,
    pub prompt: String,
}

/// Retrieves the top chunks for a question and asks the completion provider to
/// answer from them. The query must be embedded by the same provider that built
/// the index; that is not checked here.
pub struct RetrievalAnswerer<E, C> {
    embeddings: E,
    completion: C,
    top_k: usize,
}

impl<E: EmbeddingProvider, C: CompletionProvider> RetrievalAnswerer<E, C> {
    pub fn new(embeddings: E, completion: C) -> Self {
        Self {
            embeddings,
            completion,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(MatrixError::config("top_k must be at least 1"));
        }
        self.top_k = top_k;
        Ok(self)
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn embeddings(&self) -> &E {
        &self.embeddings
    }

    pub fn answer(&self, query: &str, index: &VectorIndex) -> Result<RagAnswer> {
        let query_embedding = self.embeddings.embed(query)?;
        let used_chunks = index.search(&query_embedding, self.top_k)?;
        if used_chunks.is_empty() {
            return Err(MatrixError::NoContext);
        }
        let prompt = build_prompt(query, &used_chunks);
        debug!(chunks = used_chunks.len(), prompt_chars = prompt.len(), "requesting completion");
        let answer = self
            .completion
            .complete(&prompt)
            .map_err(MatrixError::from)?;
        Ok(RagAnswer {
            answer,
            used_chunks,
            prompt,
        })
    }

    /// The provider's text, unmodified.
    pub fn answer_text(&self, query: &str, index: &VectorIndex) -> Result<String> {
        Ok(self.answer(query, index)?.answer)
    }

    pub fn answer_merged(&self, query: &str, indices: &[VectorIndex]) -> Result<RagAnswer> {
        let merged = VectorIndex::merge(indices)?;
        self.answer(query, &merged)
    }
}

/// Context is the chunk texts in rank order separated by blank lines.
pub fn build_prompt(query: &str, chunks: &[ScoredChunk]) -> String {
    let context = chunks
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{INSTRUCTION}\n\nContext:\n{context}\n\nQuestion: {}\nAnswer:",
        query.trim()
    )
}

/// Builds one index per `(source_id, text)` partition in parallel. Builds share
/// nothing but the provider; the first failure is returned.
pub fn build_partition_indices<E: EmbeddingProvider>(
    partitions: &[(String, String)],
    chunker: &TextChunker,
    embeddings: &E,
) -> Result<Vec<VectorIndex>> {
    partitions
        .par_iter()
        .map(|(source_id, text)| VectorIndex::build(chunker.split(source_id, text), embeddings))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sopmatrix_core::{split_text, ChunkConfig, HashEmbedder};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCompletion {
        prompts: Mutex<Vec<String>>,
    }

    impl CompletionProvider for &RecordingCompletion {
        fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  raw answer \n".to_string())
        }
    }

    struct FailingCompletion;

    impl CompletionProvider for FailingCompletion {
        fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("status 401 Unauthorized: invalid api key")
                .context("openai returned error"))
        }
    }

    fn index(text: &str) -> VectorIndex {
        VectorIndex::build(split_text("doc", text, 500, 50).unwrap(), &HashEmbedder::default())
            .unwrap()
    }

    #[test]
    fn returns_raw_provider_text_and_uses_template() {
        let recorder = RecordingCompletion::default();
        let answerer = RetrievalAnswerer::new(HashEmbedder::default(), &recorder);
        let answer = answerer
            .answer("who approves leave?", &index("Managers approve leave."))
            .unwrap();
        assert_eq!(answer.answer, "  raw answer \n");
        let prompts = recorder.prompts.lock().unwrap();
        assert_eq!(
            prompts[0],
            "Answer the question using only the context below. Be concise.\n\n\
             Context:\nManagers approve leave.\n\nQuestion: who approves leave?\nAnswer:"
        );
    }

    #[test]
    fn provider_failure_keeps_detail() {
        let answerer = RetrievalAnswerer::new(HashEmbedder::default(), FailingCompletion);
        let err = answerer.answer("q", &index("some context")).unwrap_err();
        match err {
            MatrixError::Provider(message) => {
                assert!(message.contains("openai returned error"));
                assert!(message.contains("401"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_index_has_no_context() {
        let recorder = RecordingCompletion::default();
        let answerer = RetrievalAnswerer::new(HashEmbedder::default(), &recorder);
        let err = answerer.answer("q", &VectorIndex::default()).unwrap_err();
        assert!(matches!(err, MatrixError::NoContext));
        assert!(recorder.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_top_k_is_config_error() {
        let recorder = RecordingCompletion::default();
        let result = RetrievalAnswerer::new(HashEmbedder::default(), &recorder).with_top_k(0);
        assert!(matches!(result, Err(MatrixError::Config(_))));
        let answerer = RetrievalAnswerer::new(HashEmbedder::default(), &recorder)
            .with_top_k(1)
            .unwrap();
        assert_eq!(answerer.top_k(), 1);
    }

    #[test]
    fn merged_answer_sees_every_partition() {
        let recorder = RecordingCompletion::default();
        let answerer = RetrievalAnswerer::new(HashEmbedder::default(), &recorder)
            .with_top_k(2)
            .unwrap();
        let chunker = TextChunker::new(ChunkConfig::default()).unwrap();
        let partitions = vec![
            ("hr".to_string(), "leave requests go to managers".to_string()),
            ("qa".to_string(), "deviations go to quality".to_string()),
        ];
        let indices =
            build_partition_indices(&partitions, &chunker, answerer.embeddings()).unwrap();
        assert_eq!(indices.len(), 2);
        let answer = answerer.answer_merged("deviations go to quality", &indices).unwrap();
        assert_eq!(answer.used_chunks.len(), 2);
        assert_eq!(answer.used_chunks[0].chunk.source_id, "qa");
    }
}
