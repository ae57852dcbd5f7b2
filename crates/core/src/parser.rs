use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MatrixError, Result};
use crate::grid::{CellValue, RawGrid, BLANK};
use crate::layout::{FixedLayout, HeaderLayout, LayoutStrategy};

/// Leading descriptive columns: business unit, sop type, number, title.
pub const ROLE_COLUMN_OFFSET: usize = 4;
pub const UNGROUPED: &str = "Ungrouped";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleColumn {
    pub column_index: usize,
    pub role_name: String,
    pub group_name: String,
}

/// Structural view over one sheet; borrows the data rows from the grid.
#[derive(Debug, Clone)]
pub struct ParsedMatrix<'a> {
    pub layout: HeaderLayout,
    pub headers: Vec<String>,
    pub role_columns: Vec<RoleColumn>,
    pub data_rows: &'a [Vec<CellValue>],
}

pub struct MatrixParser {
    strategy: Box<dyn LayoutStrategy>,
    role_column_offset: usize,
}

impl Default for MatrixParser {
    fn default() -> Self {
        Self::new(Box::new(FixedLayout::default()))
    }
}

impl MatrixParser {
    pub fn new(strategy: Box<dyn LayoutStrategy>) -> Self {
        Self {
            strategy,
            role_column_offset: ROLE_COLUMN_OFFSET,
        }
    }

    pub fn with_role_column_offset(mut self, offset: usize) -> Self {
        self.role_column_offset = offset;
        self
    }

    pub fn role_column_offset(&self) -> usize {
        self.role_column_offset
    }

    pub fn parse<'a>(&self, grid: &'a RawGrid) -> Result<ParsedMatrix<'a>> {
        let layout = self.strategy.detect(grid).ok_or_else(|| {
            MatrixError::layout(format!(
                "{} layout not found in grid with {} rows",
                self.strategy.name(),
                grid.height()
            ))
        })?;
        if grid.height() < layout.header_row_index + 1 {
            return Err(MatrixError::layout(format!(
                "grid has {} rows, header row {} is missing",
                grid.height(),
                layout.header_row_index
            )));
        }
        let width = grid.width();
        if width < self.role_column_offset + 1 {
            return Err(MatrixError::layout(format!(
                "grid has {width} columns, no role columns past column {}",
                self.role_column_offset
            )));
        }

        let groups = forward_fill_groups(
            grid.row(layout.group_row_index).unwrap_or(&[]),
            width,
        );
        let headers: Vec<String> = (0..width)
            .map(|col| grid.cell(layout.header_row_index, col).to_string())
            .collect();

        let role_columns: Vec<RoleColumn> = (self.role_column_offset..width)
            .map(|col| RoleColumn {
                column_index: col,
                role_name: headers[col].clone(),
                group_name: groups[col].clone(),
            })
            .collect();
        let blank_roles = role_columns
            .iter()
            .filter(|rc| rc.role_name.trim().is_empty())
            .count();
        if blank_roles > 0 {
            warn!(blank_roles, "role header row has blank cells");
        }

        let start = layout.data_start_row_index.min(grid.height());
        debug!(
            strategy = self.strategy.name(),
            header_row = layout.header_row_index,
            roles = role_columns.len(),
            data_rows = grid.height() - start,
            "parsed matrix layout"
        );
        Ok(ParsedMatrix {
            layout,
            headers,
            role_columns,
            data_rows: &grid.rows()[start..],
        })
    }
}

/// Merged-cell semantics for the group row: a blank cell takes the last
/// non-blank value to its left, or [`UNGROUPED`] when there is none.
pub fn forward_fill_groups(group_row: &[CellValue], width: usize) -> Vec<String> {
    let mut last = UNGROUPED.to_string();
    (0..width)
        .map(|col| {
            let cell = group_row.get(col).unwrap_or(&BLANK);
            if !cell.is_blank() {
                last = cell.as_text();
            }
            last.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TokenScanLayout;

    fn row(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::from(*v)).collect()
    }

    fn sample() -> RawGrid {
        RawGrid::new(vec![
            row(&["", "", "", "", "G1", "", "G2"]),
            row(&["", "", "", "", "", "", ""]),
            row(&["Business Unit", "SOP Type", "Number", "Title", "Manager", "Staff", "Manager"]),
            row(&["HR", "Policy", "001", "Leave Policy", "1", "2", "3"]),
        ])
    }

    #[test]
    fn forward_fill_starts_ungrouped() {
        let groups = forward_fill_groups(&row(&["", "A", "", "B"]), 5);
        assert_eq!(groups, vec!["Ungrouped", "A", "A", "B", "B"]);
    }

    #[test]
    fn role_columns_carry_filled_groups() {
        let grid = sample();
        let parsed = MatrixParser::default().parse(&grid).unwrap();
        let roles: Vec<(&str, &str)> = parsed
            .role_columns
            .iter()
            .map(|rc| (rc.role_name.as_str(), rc.group_name.as_str()))
            .collect();
        assert_eq!(roles, vec![("Manager", "G1"), ("Staff", "G1"), ("Manager", "G2")]);
        assert_eq!(parsed.data_rows.len(), 1);
    }

    #[test]
    fn duplicate_role_names_stay_distinct_by_column() {
        let grid = sample();
        let parsed = MatrixParser::default().parse(&grid).unwrap();
        let managers: Vec<usize> = parsed
            .role_columns
            .iter()
            .filter(|rc| rc.role_name == "Manager")
            .map(|rc| rc.column_index)
            .collect();
        assert_eq!(managers, vec![4, 6]);
    }

    #[test]
    fn too_few_rows_is_layout_error() {
        let grid = RawGrid::new(vec![row(&["G1"]), row(&[""])]);
        let err = MatrixParser::default().parse(&grid).unwrap_err();
        assert!(err.is_layout());
    }

    #[test]
    fn missing_role_columns_is_layout_error() {
        let grid = RawGrid::new(vec![
            row(&["", "", "", ""]),
            row(&["", "", "", ""]),
            row(&["Business Unit", "SOP Type", "Number", "Title"]),
        ]);
        let err = MatrixParser::default().parse(&grid).unwrap_err();
        assert!(matches!(err, MatrixError::Layout(_)));
    }

    #[test]
    fn header_only_grid_has_no_data_rows() {
        let mut rows = sample().rows().to_vec();
        rows.truncate(3);
        let grid = RawGrid::new(rows);
        let parsed = MatrixParser::default().parse(&grid).unwrap();
        assert!(parsed.data_rows.is_empty());
    }

    #[test]
    fn scan_strategy_plugs_in() {
        let mut rows = sample().rows().to_vec();
        rows.insert(1, row(&["", "", "", "", "", "", ""]));
        let grid = RawGrid::new(rows);
        let parser = MatrixParser::new(Box::new(TokenScanLayout::default()));
        let parsed = parser.parse(&grid).unwrap();
        assert_eq!(parsed.layout.header_row_index, 3);
        assert_eq!(parsed.role_columns.len(), 3);
    }
}
