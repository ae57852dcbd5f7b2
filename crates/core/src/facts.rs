use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::columns::{ColumnResolver, Field, ResolvedColumns};
use crate::error::{MatrixError, Result};
use crate::grid::{CellValue, Workbook, BLANK};
use crate::parser::{MatrixParser, ParsedMatrix};

pub const DEFAULT_REGIONS: &[&str] =
    &["china", "korea", "taiwan", "hong kong", "india", "us", "uk"];

const NUMBER_COLUMN: usize = 2;
const TITLE_COLUMN: usize = 3;

/// Urgency category of a procedure for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ApplicabilityLevel {
    WithinTwoWeeks = 1,
    WithinNinetyDays = 2,
    BeforeTask = 3,
}

impl ApplicabilityLevel {
    pub const ALL: [ApplicabilityLevel; 3] = [
        ApplicabilityLevel::WithinTwoWeeks,
        ApplicabilityLevel::WithinNinetyDays,
        ApplicabilityLevel::BeforeTask,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::WithinTwoWeeks),
            2 => Some(Self::WithinNinetyDays),
            3 => Some(Self::BeforeTask),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::WithinTwoWeeks => "Within 2 weeks",
            Self::WithinNinetyDays => "Within 90 days",
            Self::BeforeTask => "Before task",
        }
    }

    /// Accepts a code ("2") or a label ("within 90 days").
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(code) = value.parse::<i64>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|level| level.label().eq_ignore_ascii_case(value))
    }
}

impl From<ApplicabilityLevel> for u8 {
    fn from(value: ApplicabilityLevel) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for ApplicabilityLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_code(value as i64).ok_or_else(|| format!("invalid applicability level {value}"))
    }
}

/// Integer reading of an applicability cell. Never fails: anything that does not
/// read as a finite number is `None`.
pub fn coerce_level(value: &CellValue) -> Option<i64> {
    let number = match value {
        CellValue::Empty => return None,
        CellValue::Bool(b) => return Some(*b as i64),
        CellValue::Number(n) => *n,
        CellValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
    };
    if !number.is_finite() {
        return None;
    }
    Some(number.trunc() as i64)
}

/// Region keywords detected in notes by literal substring match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionVocabulary {
    terms: Vec<String>,
}

impl Default for RegionVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect())
    }
}

impl RegionVocabulary {
    pub fn new(terms: Vec<String>) -> Self {
        Self {
            terms: terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Terms found in `notes`, in vocabulary order. "us" also matches inside
    /// words such as "business".
    pub fn detect(&self, notes: &str) -> Vec<String> {
        let lowered = notes.to_lowercase();
        self.terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .cloned()
            .collect()
    }
}

/// One normalized (procedure, role) relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SopRoleFact {
    pub sheet: String,
    pub sop_id: String,
    pub sop_title: String,
    pub business_unit: String,
    pub sop_type: String,
    pub practice: String,
    pub role_name: String,
    pub group_name: String,
    pub column_index: usize,
    pub applicability_level: ApplicabilityLevel,
    pub notes: String,
    pub region_tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FactBuilder {
    resolver: ColumnResolver,
    regions: RegionVocabulary,
}

impl FactBuilder {
    pub fn new(resolver: ColumnResolver, regions: RegionVocabulary) -> Self {
        Self { resolver, regions }
    }

    pub fn regions(&self) -> &RegionVocabulary {
        &self.regions
    }

    pub fn build(&self, sheet: &str, parsed: &ParsedMatrix<'_>) -> Vec<SopRoleFact> {
        let columns = self.resolver.resolve_all(&parsed.headers);
        let mut facts = Vec::new();
        let mut dropped = 0usize;
        for row in parsed.data_rows {
            let descriptor = RowDescriptor::read(row, &columns, &self.regions);
            for role in &parsed.role_columns {
                let cell = row.get(role.column_index).unwrap_or(&BLANK);
                if cell.is_blank() {
                    continue;
                }
                let Some(level) = coerce_level(cell).and_then(ApplicabilityLevel::from_code) else {
                    dropped += 1;
                    continue;
                };
                facts.push(SopRoleFact {
                    sheet: sheet.to_string(),
                    sop_id: descriptor.sop_id.clone(),
                    sop_title: descriptor.title.clone(),
                    business_unit: descriptor.business_unit.clone(),
                    sop_type: descriptor.sop_type.clone(),
                    practice: descriptor.practice.clone(),
                    role_name: role.role_name.clone(),
                    group_name: role.group_name.clone(),
                    column_index: role.column_index,
                    applicability_level: level,
                    notes: descriptor.notes.clone(),
                    region_tags: descriptor.region_tags.clone(),
                });
            }
        }
        debug!(sheet, facts = facts.len(), dropped, "built facts");
        facts
    }
}

struct RowDescriptor {
    sop_id: String,
    title: String,
    business_unit: String,
    sop_type: String,
    practice: String,
    notes: String,
    region_tags: Vec<String>,
}

impl RowDescriptor {
    fn read(row: &[CellValue], columns: &ResolvedColumns, regions: &RegionVocabulary) -> Self {
        let text_at = |idx: usize| row.get(idx).map(CellValue::as_text).unwrap_or_default();
        let field = |f: Field| columns.get(f).map(text_at).unwrap_or_default();

        let sop_id = columns
            .get(Field::Number)
            .map(text_at)
            .unwrap_or_else(|| text_at(NUMBER_COLUMN));
        let mut title = field(Field::Title);
        if title.is_empty() {
            title = row
                .get(TITLE_COLUMN)
                .map(|c| if c.is_blank() { String::new() } else { c.to_string() })
                .unwrap_or_default();
        }
        if title.is_empty() {
            title = sop_id.clone();
        }
        let notes = field(Field::Notes);
        let region_tags = regions.detect(&notes);
        Self {
            sop_id,
            title,
            business_unit: field(Field::BusinessUnit),
            sop_type: field(Field::SopType),
            practice: field(Field::Practice),
            notes,
            region_tags,
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkbookFacts {
    pub facts: Vec<SopRoleFact>,
    pub skipped: Vec<(String, MatrixError)>,
}

/// Parses every sheet; a sheet with an unusable layout is skipped and reported
/// without affecting the others.
pub fn normalize_workbook(
    workbook: &Workbook,
    parser: &MatrixParser,
    builder: &FactBuilder,
) -> Result<WorkbookFacts> {
    let mut out = WorkbookFacts::default();
    for sheet in &workbook.sheets {
        match parser.parse(&sheet.grid) {
            Ok(parsed) => out.facts.extend(builder.build(&sheet.name, &parsed)),
            Err(err) if err.is_layout() => {
                warn!(sheet = %sheet.name, error = %err, "skipping sheet");
                out.skipped.push((sheet.name.clone(), err));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::RawGrid;

    fn row(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::from(*v)).collect()
    }

    fn grid(data: Vec<Vec<CellValue>>) -> RawGrid {
        let mut rows = vec![
            row(&["", "", "", "", "", "G1", "", "G2"]),
            row(&[""]),
            row(&[
                "Business Unit",
                "SOP Type",
                "Number",
                "Title",
                "Notes",
                "Manager",
                "Staff",
                "Auditor",
            ]),
        ];
        rows.extend(data);
        RawGrid::new(rows)
    }

    fn build(grid: &RawGrid) -> Vec<SopRoleFact> {
        let parser = MatrixParser::default().with_role_column_offset(5);
        let parsed = parser.parse(grid).unwrap();
        FactBuilder::default().build("Sheet1", &parsed)
    }

    #[test]
    fn coercion_is_total() {
        assert_eq!(coerce_level(&CellValue::Number(2.9)), Some(2));
        assert_eq!(coerce_level(&CellValue::Text(" 3 ".into())), Some(3));
        assert_eq!(coerce_level(&CellValue::Text("1.0".into())), Some(1));
        assert_eq!(coerce_level(&CellValue::Text("   ".into())), None);
        assert_eq!(coerce_level(&CellValue::Text("x".into())), None);
        assert_eq!(coerce_level(&CellValue::Text("inf".into())), None);
        assert_eq!(coerce_level(&CellValue::Number(f64::NAN)), None);
        assert_eq!(coerce_level(&CellValue::Bool(true)), Some(1));
        assert_eq!(coerce_level(&CellValue::Empty), None);
    }

    #[test]
    fn levels_parse_from_code_or_label() {
        assert_eq!(ApplicabilityLevel::parse("2"), Some(ApplicabilityLevel::WithinNinetyDays));
        assert_eq!(ApplicabilityLevel::parse("before TASK"), Some(ApplicabilityLevel::BeforeTask));
        assert_eq!(ApplicabilityLevel::parse("4"), None);
    }

    #[test]
    fn one_fact_per_valid_cell() {
        let g = grid(vec![
            vec![
                "HR".into(),
                "Policy".into(),
                "001".into(),
                "Leave".into(),
                CellValue::Empty,
                1.0.into(),
                "2".into(),
                "x".into(),
            ],
            vec![
                "QA".into(),
                "SOP".into(),
                "002".into(),
                "Audit".into(),
                "China only".into(),
                CellValue::Empty,
                4.0.into(),
                "3".into(),
            ],
        ]);
        let facts = build(&g);
        let pairs: Vec<(&str, &str, u8)> = facts
            .iter()
            .map(|f| (f.sop_id.as_str(), f.role_name.as_str(), f.applicability_level.code()))
            .collect();
        assert_eq!(pairs, vec![("001", "Manager", 1), ("001", "Staff", 2), ("002", "Auditor", 3)]);
        assert_eq!(facts[2].group_name, "G2");
        assert_eq!(facts[2].region_tags, vec!["china".to_string()]);
        assert_eq!(facts[0].group_name, "G1");
    }

    #[test]
    fn title_falls_back_to_identifier() {
        let g = grid(vec![row(&["HR", "Policy", "007", "", "", "1", "", ""])]);
        let facts = build(&g);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].sop_title, "007");
    }

    #[test]
    fn title_falls_back_to_fourth_column_when_header_unmatched() {
        let mut rows = vec![
            row(&["", "", "", "", "G1"]),
            row(&[""]),
            row(&["Business Unit", "SOP Type", "Number", "Procedure", "Manager"]),
        ];
        rows.push(row(&["HR", "Policy", "008", "Expenses", "2"]));
        let g = RawGrid::new(rows);
        let parsed = MatrixParser::default().parse(&g).unwrap();
        let facts = FactBuilder::default().build("s", &parsed);
        assert_eq!(facts[0].sop_title, "Expenses");
    }

    #[test]
    fn region_tags_follow_vocabulary_order() {
        let vocab = RegionVocabulary::default();
        assert_eq!(
            vocab.detect("UK and Hong Kong, also India"),
            vec!["hong kong".to_string(), "india".to_string(), "uk".to_string()]
        );
        assert!(vocab.detect("").is_empty());
    }

    #[test]
    fn layout_errors_skip_only_that_sheet() {
        let good = grid(vec![row(&["HR", "Policy", "001", "Leave", "", "1", "", ""])]);
        let bad = RawGrid::new(vec![row(&["only one row"])]);
        let workbook = Workbook {
            sheets: vec![
                crate::grid::Sheet { name: "bad".into(), grid: bad },
                crate::grid::Sheet { name: "good".into(), grid: good },
            ],
        };
        let parser = MatrixParser::default().with_role_column_offset(5);
        let out = normalize_workbook(&workbook, &parser, &FactBuilder::default()).unwrap();
        assert_eq!(out.facts.len(), 1);
        assert_eq!(out.facts[0].sheet, "good");
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].0, "bad");
    }
}
