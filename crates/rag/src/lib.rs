pub mod answer;
pub mod embedding;

pub use answer::{
    build_partition_indices, build_prompt, CompletionProvider, RagAnswer, RetrievalAnswerer,
    DEFAULT_TOP_K,
};
pub use embedding::{decode_embeddings, EmbeddingBackend, EmbeddingClient, OpenAiEmbeddingClient};
pub use sopmatrix_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse};
