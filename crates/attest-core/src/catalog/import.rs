//! Tabular criteria import.
//!
//! Required columns: `external_id`, `requirement`. Optional: `description`,
//! `category`, `weight`. Headers are matched case-insensitively with
//! punctuation and spaces folded to `_`, so "External ID" and "external-id"
//! both work. The import is all-or-nothing.

use lazy_static::lazy_static;
use regex::Regex;
use std::io::Read;
use thiserror::Error;

use super::NewCriterionItem;

lazy_static! {
    static ref HEADER_SEPARATORS: Regex = Regex::new(r"[^a-z0-9]+").expect("Invalid regex");
}

/// Errors from tabular import.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Missing required columns: {}", columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    /// Row numbers are spreadsheet rows: the header is row 1.
    #[error("Rows with missing or invalid required fields: {rows:?}")]
    InvalidRows { rows: Vec<usize> },

    #[error("Import file contains no criteria")]
    Empty,

    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    ExternalId,
    Requirement,
    Description,
    Category,
    Weight,
}

fn classify(header: &str) -> Option<Column> {
    let lowered = header.trim().to_ascii_lowercase();
    let normalized = HEADER_SEPARATORS.replace_all(&lowered, "_");
    match normalized.trim_matches('_') {
        "external_id" | "id" | "criterion_id" | "control_id" => Some(Column::ExternalId),
        "requirement" | "requirement_text" | "criterion" => Some(Column::Requirement),
        "description" | "guidance" => Some(Column::Description),
        "category" | "domain" => Some(Column::Category),
        "weight" => Some(Column::Weight),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct ColumnMap {
    external_id: Option<usize>,
    requirement: Option<usize>,
    description: Option<usize>,
    category: Option<usize>,
    weight: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ImportError> {
        let mut map = ColumnMap::default();
        for (index, header) in headers.iter().enumerate() {
            let slot = match classify(header) {
                Some(Column::ExternalId) => &mut map.external_id,
                Some(Column::Requirement) => &mut map.requirement,
                Some(Column::Description) => &mut map.description,
                Some(Column::Category) => &mut map.category,
                Some(Column::Weight) => &mut map.weight,
                None => continue,
            };
            // First matching column wins
            slot.get_or_insert(index);
        }

        let mut missing = Vec::new();
        if map.external_id.is_none() {
            missing.push("external_id".to_string());
        }
        if map.requirement.is_none() {
            missing.push("requirement".to_string());
        }
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns { columns: missing });
        }
        Ok(map)
    }
}

fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parse criteria items from CSV. Every offending row is reported; no
/// partial result is returned.
pub fn parse_criteria_csv<R: Read>(reader: R) -> Result<Vec<NewCriterionItem>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let columns = ColumnMap::from_headers(csv_reader.headers()?)?;
    let mut items = Vec::new();
    let mut invalid_rows = Vec::new();

    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row_number = index + 2;

        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }

        let external_id = cell(&record, columns.external_id);
        let requirement = cell(&record, columns.requirement);
        let weight = match cell(&record, columns.weight) {
            None => Ok(None),
            Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| ()),
        };

        match (external_id, requirement, weight) {
            (Some(external_id), Some(requirement), Ok(weight)) => items.push(NewCriterionItem {
                external_id,
                requirement,
                description: cell(&record, columns.description),
                category: cell(&record, columns.category),
                weight,
            }),
            _ => invalid_rows.push(row_number),
        }
    }

    if !invalid_rows.is_empty() {
        tracing::warn!(rows = ?invalid_rows, "Criteria import rejected");
        return Err(ImportError::InvalidRows { rows: invalid_rows });
    }
    if items.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_with_optional_columns() {
        let csv = "\
External ID,Requirement,Category,Weight,Notes
AC-1,Access control policy is documented,Access Control,3,ignored
AC-2,Accounts are reviewed quarterly,Access Control,1,
IR-1,Incident response plan exists,,,
";
        let items = parse_criteria_csv(csv.as_bytes()).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].external_id, "AC-1");
        assert_eq!(items[0].category.as_deref(), Some("Access Control"));
        assert_eq!(items[0].weight, Some(3.0));
        assert_eq!(items[2].category, None);
        assert_eq!(items[2].weight, None);
    }

    #[test]
    fn test_missing_required_column() {
        let csv = "id,description\nA,Something\n";
        match parse_criteria_csv(csv.as_bytes()) {
            Err(ImportError::MissingColumns { columns }) => {
                assert_eq!(columns, vec!["requirement".to_string()])
            }
            other => panic!("Expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_rows_missing_required_fields_reject_whole_import() {
        let csv = "\
external_id,requirement,weight
A-1,First requirement,1
,Second requirement,1
A-3,,1
A-4,Fourth requirement,heavy
A-5,Fifth requirement,2
";
        match parse_criteria_csv(csv.as_bytes()) {
            Err(ImportError::InvalidRows { rows }) => assert_eq!(rows, vec![3, 4, 5]),
            other => panic!("Expected InvalidRows, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_lines_are_skipped_and_empty_file_rejected() {
        let csv = "external_id,requirement\n,\n";
        assert!(matches!(parse_criteria_csv(csv.as_bytes()), Err(ImportError::Empty)));
    }

    #[test]
    fn test_header_normalization() {
        assert_eq!(classify("External-ID"), Some(Column::ExternalId));
        assert_eq!(classify(" Requirement Text "), Some(Column::Requirement));
        assert_eq!(classify("WEIGHT"), Some(Column::Weight));
        assert_eq!(classify("owner"), None);
    }
}
