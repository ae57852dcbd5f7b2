use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

const FUZZY_THRESHOLD: f64 = 0.85;

/// Descriptive fields looked up by header alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    BusinessUnit,
    SopType,
    Number,
    Title,
    Notes,
    Practice,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::BusinessUnit,
        Field::SopType,
        Field::Number,
        Field::Title,
        Field::Notes,
        Field::Practice,
    ];

    pub fn default_aliases(&self) -> &'static [&'static str] {
        match self {
            Field::BusinessUnit => &["Business Unit", "BusinessUnit", "Business_unit"],
            Field::SopType => &["SOP Type", "SOPType", "Type"],
            Field::Number => &["Number", "SOP Number", "No", "ID"],
            Field::Title => &["Title", "SOP Title", "Name"],
            Field::Notes => &["Notes", "Note", "Remarks", "Region Notes", "Comments"],
            Field::Practice => &["Practice", "Department", "Function"],
        }
    }
}

/// Case-insensitive header lookup of canonical fields by alias lists.
#[derive(Debug, Clone)]
pub struct ColumnResolver {
    aliases: BTreeMap<Field, Vec<String>>,
}

impl Default for ColumnResolver {
    fn default() -> Self {
        let aliases = Field::ALL
            .iter()
            .map(|field| {
                let list = field
                    .default_aliases()
                    .iter()
                    .map(|a| a.to_string())
                    .collect();
                (*field, list)
            })
            .collect();
        Self { aliases }
    }
}

impl ColumnResolver {
    pub fn with_aliases(mut self, field: Field, aliases: Vec<String>) -> Self {
        self.aliases.insert(field, aliases);
        self
    }

    pub fn aliases(&self, field: Field) -> &[String] {
        self.aliases.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of the first header matching one of the field's aliases.
    ///
    /// Aliases are tried in priority order, first case-insensitively, then with
    /// punctuation and spacing ignored. Only when no alias matches that way is a
    /// near-spelling accepted. Unmatched fields are `None`, never an error.
    pub fn resolve(&self, field: Field, headers: &[String]) -> Option<usize> {
        let aliases = self.aliases(field);
        for alias in aliases {
            let wanted = alias.trim().to_lowercase();
            if let Some(idx) = headers
                .iter()
                .position(|h| h.trim().to_lowercase() == wanted)
            {
                return Some(idx);
            }
        }
        let compact_headers: Vec<String> = headers.iter().map(|h| compact(h)).collect();
        for alias in aliases {
            let wanted = compact(alias);
            if let Some(idx) = compact_headers.iter().position(|h| *h == wanted) {
                return Some(idx);
            }
        }
        let mut best: Option<(usize, f64)> = None;
        for alias in aliases {
            let wanted = compact(alias);
            for (idx, header) in compact_headers.iter().enumerate() {
                if header.is_empty() {
                    continue;
                }
                let score = normalized_levenshtein(&wanted, header);
                if score >= FUZZY_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
                    best = Some((idx, score));
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub fn resolve_all(&self, headers: &[String]) -> ResolvedColumns {
        let mut resolved = ResolvedColumns::default();
        for field in Field::ALL {
            if let Some(idx) = self.resolve(field, headers) {
                resolved.columns.insert(field, idx);
            }
        }
        resolved
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedColumns {
    columns: BTreeMap<Field, usize>,
}

impl ResolvedColumns {
    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }
}

fn compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
