use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use sopmatrix_core::{
    ChunkConfig, ColumnResolver, FactBuilder, Field, FixedLayout, HeaderLayout, LayoutStrategy,
    MatrixError, MatrixParser, RegionVocabulary, TokenScanLayout, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE, DEFAULT_REGIONS, ROLE_COLUMN_OFFSET,
};
use sopmatrix_llm::DEFAULT_TIMEOUT_SECS;
use sopmatrix_rag::DEFAULT_TOP_K;

pub const DEFAULT_CONFIG: &str = "sopmatrix.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub layout: LayoutSection,
    #[serde(default)]
    pub columns: BTreeMap<Field, Vec<String>>,
    #[serde(default)]
    pub regions: RegionsSection,
    #[serde(default)]
    pub chunking: ChunkingSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    #[default]
    Fixed,
    Scan,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LayoutSection {
    pub strategy: LayoutKind,
    pub group_row: usize,
    pub header_row: usize,
    pub data_start_row: usize,
    pub role_column_offset: usize,
    pub scan_rows: usize,
}

impl Default for LayoutSection {
    fn default() -> Self {
        let layout = HeaderLayout::default();
        Self {
            strategy: LayoutKind::Fixed,
            group_row: layout.group_row_index,
            header_row: layout.header_row_index,
            data_start_row: layout.data_start_row_index,
            role_column_offset: ROLE_COLUMN_OFFSET,
            scan_rows: TokenScanLayout::default().scan_rows,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RegionsSection {
    pub vocabulary: Vec<String>,
}

impl Default for RegionsSection {
    fn default() -> Self {
        Self {
            vocabulary: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            provider: None,
            model: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl RetrievalSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl AppConfig {
    pub fn parser(&self) -> Result<MatrixParser, MatrixError> {
        let section = &self.layout;
        let strategy: Box<dyn LayoutStrategy> = match section.strategy {
            LayoutKind::Fixed => {
                let layout = HeaderLayout::new(
                    section.group_row,
                    section.header_row,
                    section.data_start_row,
                );
                if !layout.is_ordered() {
                    return Err(MatrixError::config(format!(
                        "layout rows must satisfy group_row < header_row < data_start_row, \
                         got {} / {} / {}",
                        section.group_row, section.header_row, section.data_start_row
                    )));
                }
                Box::new(FixedLayout { layout })
            }
            LayoutKind::Scan => Box::new(TokenScanLayout {
                scan_rows: section.scan_rows,
                descriptive_columns: section.role_column_offset,
                ..TokenScanLayout::default()
            }),
        };
        Ok(MatrixParser::new(strategy).with_role_column_offset(section.role_column_offset))
    }

    pub fn fact_builder(&self) -> FactBuilder {
        let resolver = self
            .columns
            .iter()
            .fold(ColumnResolver::default(), |resolver, (field, aliases)| {
                resolver.with_aliases(*field, aliases.clone())
            });
        FactBuilder::new(resolver, RegionVocabulary::new(self.regions.vocabulary.clone()))
    }

    /// Explicit flags win over the file.
    pub fn chunk_config(&self, size: Option<usize>, overlap: Option<usize>) -> ChunkConfig {
        ChunkConfig {
            size: size.unwrap_or(self.chunking.size),
            overlap: overlap.unwrap_or(self.chunking.overlap),
        }
    }
}

/// A missing file means defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config {}: {e}", path.display()))
}
