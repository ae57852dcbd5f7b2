use sopmatrix_core::{
    facts_to_csv_string, normalize_workbook, role_documents, ApplicabilityLevel, CellValue,
    Dimension, FactBuilder, FilterEngine, FilterSpec, MatrixParser, RawGrid, Sheet, SopRoleFact,
    Workbook,
};

fn text_row(values: &[&str]) -> Vec<CellValue> {
    values.iter().map(|v| CellValue::from(*v)).collect()
}

fn leave_policy_grid() -> RawGrid {
    RawGrid::new(vec![
        text_row(&["", "", "", "", "G1", ""]),
        text_row(&["", "", "", "", "", ""]),
        text_row(&["Business Unit", "SOP Type", "Number", "Title", "Manager", "Staff"]),
        vec![
            "HR".into(),
            "Policy".into(),
            "001".into(),
            "Leave Policy".into(),
            CellValue::Number(1.0),
            CellValue::Number(2.0),
        ],
    ])
}

fn facts_for(grid: RawGrid) -> Vec<SopRoleFact> {
    let workbook = Workbook {
        sheets: vec![Sheet {
            name: "Matrix".into(),
            grid,
        }],
    };
    normalize_workbook(&workbook, &MatrixParser::default(), &FactBuilder::default())
        .expect("normalize")
        .facts
}

#[test]
fn leave_policy_scenario() {
    let facts = facts_for(leave_policy_grid());
    let summary: Vec<(&str, &str, &str, ApplicabilityLevel)> = facts
        .iter()
        .map(|f| {
            (
                f.sop_id.as_str(),
                f.role_name.as_str(),
                f.group_name.as_str(),
                f.applicability_level,
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("001", "Manager", "G1", ApplicabilityLevel::WithinTwoWeeks),
            ("001", "Staff", "G1", ApplicabilityLevel::WithinNinetyDays),
        ]
    );
    assert!(facts.iter().all(|f| f.sop_title == "Leave Policy"));

    let staff = FilterEngine::evaluate(&facts, &FilterSpec::new().with(Dimension::Role, ["Staff"]));
    assert_eq!(staff, vec![facts[1].clone()]);
}

#[test]
fn every_valid_cell_yields_exactly_one_fact() {
    let mut rows = vec![
        text_row(&["", "", "", "", "A", "", "B"]),
        text_row(&[""]),
        text_row(&["Business Unit", "SOP Type", "Number", "Title", "R1", "R2", "R3"]),
    ];
    let codes = [
        ["1", "", "3"],
        ["", "2", "9"],
        ["abc", "3.0", " 1 "],
        ["", "", ""],
    ];
    for (i, row) in codes.iter().enumerate() {
        let id = format!("{i:03}");
        let mut cells = text_row(&["QA", "SOP", id.as_str(), "Doc"]);
        cells.extend(row.iter().map(|v| CellValue::from(*v)));
        rows.push(cells);
    }
    let facts = facts_for(RawGrid::new(rows));
    let cells: Vec<(String, String, u8)> = facts
        .iter()
        .map(|f| (f.sop_id.clone(), f.role_name.clone(), f.applicability_level.code()))
        .collect();
    let expected: Vec<(String, String, u8)> = [
        ("000", "R1", 1),
        ("000", "R3", 3),
        ("001", "R2", 2),
        ("002", "R2", 3),
        ("002", "R3", 1),
    ]
    .into_iter()
    .map(|(id, role, level)| (id.to_string(), role.to_string(), level))
    .collect();
    assert_eq!(cells, expected);
    assert_eq!(facts[1].group_name, "B");
}

#[test]
fn filtered_view_exports_and_builds_role_contexts() {
    let facts = facts_for(leave_policy_grid());
    let csv = facts_to_csv_string(&facts).expect("csv");
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.starts_with("Number,Title,Business Unit,SOP Type,Notes,Region tags"));

    let docs = role_documents(&facts);
    let names: Vec<&str> = docs.iter().map(|d| d.role_name.as_str()).collect();
    assert_eq!(names, vec!["Manager", "Staff"]);
    assert!(docs[1]
        .text
        .contains("Number: 001 | Title: Leave Policy | Group: G1"));
}
