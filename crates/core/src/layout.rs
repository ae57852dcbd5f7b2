use serde::{Deserialize, Serialize};

use crate::grid::RawGrid;

pub const DEFAULT_GROUP_ROW: usize = 0;
pub const DEFAULT_HEADER_ROW: usize = 2;
pub const DEFAULT_DATA_START_ROW: usize = 3;
pub const DEFAULT_SCAN_ROWS: usize = 6;

/// Header vocabulary expected in the leading descriptive columns.
pub const HEADER_TOKENS: &[&str] = &[
    "business unit",
    "sop type",
    "number",
    "title",
    "sop number",
    "sop title",
];

/// Positions of the structural rows of a matrix sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderLayout {
    pub group_row_index: usize,
    pub header_row_index: usize,
    pub data_start_row_index: usize,
}

impl HeaderLayout {
    pub fn new(
        group_row_index: usize,
        header_row_index: usize,
        data_start_row_index: usize,
    ) -> Self {
        Self {
            group_row_index,
            header_row_index,
            data_start_row_index,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.group_row_index < self.header_row_index
            && self.header_row_index < self.data_start_row_index
    }
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self::new(
            DEFAULT_GROUP_ROW,
            DEFAULT_HEADER_ROW,
            DEFAULT_DATA_START_ROW,
        )
    }
}

/// Locates the structural rows of a grid. `None` means the convention this
/// strategy knows about is not present.
pub trait LayoutStrategy: Send + Sync {
    fn detect(&self, grid: &RawGrid) -> Option<HeaderLayout>;

    fn name(&self) -> &str;
}

/// The known convention: fixed row positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLayout {
    pub layout: HeaderLayout,
}

impl LayoutStrategy for FixedLayout {
    fn detect(&self, grid: &RawGrid) -> Option<HeaderLayout> {
        if !self.layout.is_ordered() || grid.height() < self.layout.header_row_index + 1 {
            return None;
        }
        Some(self.layout)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Finds the header row by looking for header vocabulary in the first rows.
/// The group row is assumed to be row 0 and data to follow the header row.
#[derive(Debug, Clone)]
pub struct TokenScanLayout {
    pub scan_rows: usize,
    pub descriptive_columns: usize,
    pub min_hits: usize,
}

impl Default for TokenScanLayout {
    fn default() -> Self {
        Self {
            scan_rows: DEFAULT_SCAN_ROWS,
            descriptive_columns: crate::parser::ROLE_COLUMN_OFFSET,
            min_hits: 2,
        }
    }
}

impl TokenScanLayout {
    fn header_hits(&self, grid: &RawGrid, row: usize) -> usize {
        (0..self.descriptive_columns)
            .map(|col| grid.cell(row, col).as_text().to_lowercase())
            .filter(|text| HEADER_TOKENS.iter().any(|token| text == token))
            .count()
    }
}

impl LayoutStrategy for TokenScanLayout {
    fn detect(&self, grid: &RawGrid) -> Option<HeaderLayout> {
        let limit = self.scan_rows.min(grid.height());
        // row 0 holds group labels, so a header can start at row 1 at the earliest
        let header_row = (1..limit).find(|&row| self.header_hits(grid, row) >= self.min_hits)?;
        Some(HeaderLayout::new(0, header_row, header_row + 1))
    }

    fn name(&self) -> &str {
        "scan"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellValue;

    fn grid(rows: &[&[&str]]) -> RawGrid {
        RawGrid::new(
            rows.iter()
                .map(|row| row.iter().map(|c| CellValue::from(*c)).collect())
                .collect(),
        )
    }

    #[test]
    fn fixed_layout_requires_header_row() {
        let short = grid(&[&["G"], &[""]]);
        assert_eq!(FixedLayout::default().detect(&short), None);
        let ok = grid(&[&["G"], &[""], &["Business Unit"]]);
        assert_eq!(FixedLayout::default().detect(&ok), Some(HeaderLayout::default()));
    }

    #[test]
    fn fixed_layout_rejects_unordered_rows() {
        let strategy = FixedLayout {
            layout: HeaderLayout::new(2, 1, 3),
        };
        let g = grid(&[&["a"], &["b"], &["c"], &["d"]]);
        assert_eq!(strategy.detect(&g), None);
    }

    #[test]
    fn scan_finds_shifted_header_row() {
        let g = grid(&[
            &["", "", "", "", "Clinical"],
            &["", "", "", "", ""],
            &["", "", "", "", ""],
            &["Business Unit", "SOP Type", "Number", "Title", "Manager"],
            &["HR", "Policy", "001", "Leave", "1"],
        ]);
        let layout = TokenScanLayout::default().detect(&g).unwrap();
        assert_eq!(layout, HeaderLayout::new(0, 3, 4));
    }

    #[test]
    fn scan_reports_not_found() {
        let g = grid(&[&["x", "y"], &["a", "b"], &["c", "d"]]);
        assert_eq!(TokenScanLayout::default().detect(&g), None);
    }
}
