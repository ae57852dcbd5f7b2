use std::io::Write;

use csv::WriterBuilder;

use crate::error::Result;
use crate::facts::SopRoleFact;

pub const EXPORT_HEADERS: [&str; 6] = [
    "Number",
    "Title",
    "Business Unit",
    "SOP Type",
    "Notes",
    "Region tags",
];

/// Writes the filtered view as delimited text. The output is derived from the
/// facts every time; nothing is cached.
pub fn write_facts_csv<W: Write>(writer: W, facts: &[SopRoleFact]) -> Result<()> {
    write_facts_delimited(writer, facts, b',')
}

pub fn write_facts_delimited<W: Write>(
    writer: W,
    facts: &[SopRoleFact],
    delimiter: u8,
) -> Result<()> {
    let mut csv = WriterBuilder::new().delimiter(delimiter).from_writer(writer);
    csv.write_record(EXPORT_HEADERS)?;
    for fact in facts {
        let regions = fact.region_tags.join(", ");
        csv.write_record([
            fact.sop_id.as_str(),
            fact.sop_title.as_str(),
            fact.business_unit.as_str(),
            fact.sop_type.as_str(),
            fact.notes.as_str(),
            regions.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn facts_to_csv_string(facts: &[SopRoleFact]) -> Result<String> {
    let mut buffer = Vec::new();
    write_facts_csv(&mut buffer, facts)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::ApplicabilityLevel;

    #[test]
    fn writes_header_and_joined_regions() {
        let fact = SopRoleFact {
            sheet: "Sheet1".into(),
            sop_id: "001".into(),
            sop_title: "Leave, annual".into(),
            business_unit: "HR".into(),
            sop_type: "Policy".into(),
            practice: String::new(),
            role_name: "Staff".into(),
            group_name: "G1".into(),
            column_index: 5,
            applicability_level: ApplicabilityLevel::WithinNinetyDays,
            notes: "UK and India".into(),
            region_tags: vec!["india".into(), "uk".into()],
        };
        let out = facts_to_csv_string(&[fact]).unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("Number,Title,Business Unit,SOP Type,Notes,Region tags"));
        assert_eq!(
            lines.next(),
            Some("001,\"Leave, annual\",HR,Policy,UK and India,\"india, uk\"")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_view_still_has_header() {
        let out = facts_to_csv_string(&[]).unwrap();
        assert_eq!(out.trim_end(), EXPORT_HEADERS.join(","));
    }
}
