mod audience;
mod chunk;
mod columns;
mod context;
mod embedding;
mod error;
mod export;
mod facts;
mod filter;
mod grid;
mod index;
mod layout;
mod parser;

pub use audience::{build_learning_items, Audience, LearningItem, LearningItemKind};
pub use chunk::{
    split_text, ChunkConfig, TextChunk, TextChunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use columns::{ColumnResolver, Field, ResolvedColumns};
pub use context::{role_documents, sanitize_file_name, unique_file_names, RoleDocument};
pub use embedding::{
    cosine_similarity, Embedding, EmbeddingProvider, HashEmbedder, HashEmbedderConfig,
};
pub use error::{MatrixError, Result};
pub use export::{facts_to_csv_string, write_facts_csv, write_facts_delimited, EXPORT_HEADERS};
pub use facts::{
    coerce_level, normalize_workbook, ApplicabilityLevel, FactBuilder, RegionVocabulary,
    SopRoleFact, WorkbookFacts, DEFAULT_REGIONS,
};
pub use filter::{Dimension, Faceted, FilterEngine, FilterSpec};
pub use grid::{CellValue, RawGrid, Sheet, Workbook};
pub use index::{ScoredChunk, VectorIndex, VectorIndexEntry, DEFAULT_EMBED_BATCH};
pub use layout::{FixedLayout, HeaderLayout, LayoutStrategy, TokenScanLayout};
pub use parser::{
    forward_fill_groups, MatrixParser, ParsedMatrix, RoleColumn, ROLE_COLUMN_OFFSET, UNGROUPED,
};
