use std::borrow::Cow;
use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MatrixError, Result};
use crate::filter::{Dimension, Faceted};
use crate::grid::RawGrid;

static ROLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Role\s*:\s*Any of\s*:\s*\(([^)]*)\)").expect("valid regex")
});
static ORG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Organisation\s*:\s*Any of\s*:\s*\(((?:[^()]|\([^()]*\))*)\)")
        .expect("valid regex")
});
static ITEM_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*").expect("valid regex"));
static GROUP_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*\(\s*Group\s*\)\s*$").expect("valid regex"));
static PRACTICE_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*\(\s*Practice\s*\)\s*$").expect("valid regex"));

const HEADER_TOKENS: [&str; 6] = [
    "prescriptive",
    "prescriptive rule",
    "member selection",
    "course id",
    "course title",
    "curriculum",
];
const HEADER_SCAN_ROWS: usize = 6;
const EXPORT_COLUMNS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningItemKind {
    Curriculum,
    Course,
}

/// Parsed audience of one member-criteria cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience {
    pub roles: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub practices: BTreeSet<String>,
}

impl Audience {
    pub fn parse(cell: &str) -> Self {
        let mut audience = Audience::default();
        for caps in ROLE_RE.captures_iter(cell) {
            for item in split_items(&caps[1]) {
                let role = item.trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace());
                if !role.is_empty() {
                    audience.roles.insert(role.to_string());
                }
            }
        }
        for caps in ORG_RE.captures_iter(cell) {
            for item in split_items(&caps[1]) {
                if let Some(m) = GROUP_SUFFIX_RE.captures(item) {
                    insert_trimmed(&mut audience.groups, &m[1]);
                } else if let Some(m) = PRACTICE_SUFFIX_RE.captures(item) {
                    insert_trimmed(&mut audience.practices, &m[1]);
                } else {
                    // unlabeled organisation entries are read as groups
                    insert_trimmed(&mut audience.groups, item);
                }
            }
        }
        audience
    }

    fn extend(&mut self, other: &Audience) {
        self.roles.extend(other.roles.iter().cloned());
        self.groups.extend(other.groups.iter().cloned());
        self.practices.extend(other.practices.iter().cloned());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningItem {
    pub title: String,
    pub id: String,
    pub kind: LearningItemKind,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub practices: Vec<String>,
    pub source_rows: Vec<usize>,
}

impl LearningItem {
    fn new(
        title: String,
        id: String,
        kind: LearningItemKind,
        audience: &Audience,
        rows: Vec<usize>,
    ) -> Self {
        Self {
            title,
            id,
            kind,
            roles: audience.roles.iter().cloned().collect(),
            groups: audience.groups.iter().cloned().collect(),
            practices: audience.practices.iter().cloned().collect(),
            source_rows: rows,
        }
    }
}

impl Faceted for LearningItem {
    fn facet_values(&self, dimension: Dimension) -> Vec<Cow<'_, str>> {
        let values = match dimension {
            Dimension::Role => &self.roles,
            Dimension::Group => &self.groups,
            Dimension::Practice => &self.practices,
            _ => return Vec::new(),
        };
        values.iter().map(|v| Cow::Borrowed(v.as_str())).collect()
    }
}

struct ExportRow {
    rule: String,
    criteria: String,
    course_id: String,
    course_title: String,
    curriculum_title: String,
}

/// Reads a prescriptive-rule export: rule, member criteria, course id, course
/// title, curriculum title.
///
/// A rule listed on several rows yields a curriculum aggregating the audience
/// of its rows, followed by one course per row. Rows with a unique (or blank)
/// rule are single courses.
pub fn build_learning_items(grid: &RawGrid) -> Result<Vec<LearningItem>> {
    if grid.width() < EXPORT_COLUMNS {
        return Err(MatrixError::layout(format!(
            "audience export needs {EXPORT_COLUMNS} columns, found {}",
            grid.width()
        )));
    }
    let rows: Vec<ExportRow> = (0..grid.height())
        .filter(|&idx| !is_header_row(grid, idx))
        .map(|idx| ExportRow {
            rule: grid.cell(idx, 0).as_text(),
            criteria: grid.cell(idx, 1).as_text(),
            course_id: grid.cell(idx, 2).as_text(),
            course_title: grid.cell(idx, 3).as_text(),
            curriculum_title: grid.cell(idx, 4).as_text(),
        })
        .collect();

    let mut rules: Vec<(&str, Vec<usize>)> = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let key = row.rule.as_str();
        match rules.iter_mut().find(|(rule, _)| !key.is_empty() && *rule == key) {
            Some((_, indices)) => indices.push(idx),
            None => rules.push((key, vec![idx])),
        }
    }

    let audiences: Vec<Audience> = rows.iter().map(|row| Audience::parse(&row.criteria)).collect();
    let mut items = Vec::new();
    for (rule, indices) in rules {
        if indices.len() > 1 {
            let title = indices
                .iter()
                .map(|&i| rows[i].curriculum_title.as_str())
                .find(|t| !t.is_empty())
                .unwrap_or(rule)
                .to_string();
            let mut merged = Audience::default();
            for &i in &indices {
                merged.extend(&audiences[i]);
            }
            items.push(LearningItem::new(
                title,
                String::new(),
                LearningItemKind::Curriculum,
                &merged,
                indices.clone(),
            ));
            for &i in &indices {
                let row = &rows[i];
                let title = if row.course_title.is_empty() {
                    rule.to_string()
                } else {
                    row.course_title.clone()
                };
                items.push(LearningItem::new(
                    title,
                    row.course_id.clone(),
                    LearningItemKind::Course,
                    &audiences[i],
                    vec![i],
                ));
            }
        } else {
            let i = indices[0];
            let row = &rows[i];
            let title = [&row.course_title, &row.curriculum_title, &row.rule]
                .into_iter()
                .find(|t| !t.is_empty())
                .cloned()
                .unwrap_or_default();
            items.push(LearningItem::new(
                title,
                row.course_id.clone(),
                LearningItemKind::Course,
                &audiences[i],
                vec![i],
            ));
        }
    }
    debug!(rows = rows.len(), items = items.len(), "built learning items");
    Ok(items)
}

fn is_header_row(grid: &RawGrid, idx: usize) -> bool {
    if idx >= HEADER_SCAN_ROWS {
        return false;
    }
    let joined = (0..EXPORT_COLUMNS)
        .map(|col| grid.cell(idx, col).as_text().to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    HEADER_TOKENS.iter().any(|token| joined.contains(token))
}

fn split_items(list: &str) -> Vec<&str> {
    ITEM_SPLIT_RE
        .split(list)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

fn insert_trimmed(set: &mut BTreeSet<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        set.insert(value.to_string());
    }
}
