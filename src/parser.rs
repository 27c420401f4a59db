use std::fs::File;
use std::io::{BufRead, BufReader};

use calamine::{Data, Range, Reader, open_workbook_auto};
use camino::Utf8Path;
use tracing::{info, warn};

use crate::domain::{CellValue, ProfileTable};
use crate::error::ProfileError;

/// Reads an arbitrary tabular file into a [`ProfileTable`]. Ordered fallback,
/// first success wins: the workbook sheet named "data", then the first
/// workbook sheet, then delimited text with a sniffed separator. The first
/// column is always the row labels.
pub fn parse_profile_table(path: &Utf8Path) -> Result<ProfileTable, ProfileError> {
    info!("start parsing file content: {}", file_name(path));

    if let Some(table) = try_workbook(path)? {
        return Ok(table);
    }
    if let Some(table) = try_delimited(path)? {
        return Ok(table);
    }
    Err(ProfileError::Parse(path.to_string()))
}

fn file_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}

/// Returns `Ok(None)` when the file is not readable as a workbook at all so
/// the caller can fall through to delimited parsing.
fn try_workbook(path: &Utf8Path) -> Result<Option<ProfileTable>, ProfileError> {
    let Ok(mut workbook) = open_workbook_auto(path.as_std_path()) else {
        return Ok(None);
    };

    let range = match workbook.worksheet_range("data") {
        Ok(range) => range,
        Err(_) => {
            warn!(
                "a sheet named \"data\" was not found in the attached file, \
                 proceeding with the first sheet as the data sheet"
            );
            let names = workbook.sheet_names();
            let Some(first) = names.first() else {
                return Ok(None);
            };
            match workbook.worksheet_range(first) {
                Ok(range) => range,
                Err(_) => return Ok(None),
            }
        }
    };

    range_to_table(&range).map(Some)
}

fn range_to_table(range: &Range<Data>) -> Result<ProfileTable, ProfileError> {
    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| ProfileError::MalformedTable("empty data sheet".to_string()))?;
    if header.len() < 2 {
        return Err(ProfileError::MalformedTable(
            "data sheet has no value columns".to_string(),
        ));
    }

    let col_ids: Vec<String> = header[1..].iter().map(cell_label).collect();

    let mut row_ids = Vec::new();
    let mut values = Vec::new();
    for row in rows {
        row_ids.push(cell_label(&row[0]));
        let mut cells: Vec<CellValue> = row[1..].iter().map(sheet_cell).collect();
        // calamine trims trailing empties per row
        cells.resize(col_ids.len(), CellValue::Null);
        values.push(cells);
    }

    ProfileTable::new(row_ids, col_ids, values)
}

fn cell_label(cell: &Data) -> String {
    match cell {
        Data::String(value) => value.trim().to_string(),
        Data::Empty => String::new(),
        other => format!("{other}"),
    }
}

fn sheet_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed == "NA" {
                CellValue::Null
            } else {
                CellValue::Text(trimmed.to_string())
            }
        }
        Data::Int(value) => CellValue::Int(*value),
        Data::Float(value) => {
            if value.is_nan() {
                CellValue::Null
            } else {
                CellValue::Float(*value)
            }
        }
        Data::Bool(value) => CellValue::Bool(*value),
        Data::DateTime(value) => CellValue::Float(value.as_f64()),
        Data::DateTimeIso(value) | Data::DurationIso(value) => CellValue::Text(value.clone()),
        Data::Error(_) => CellValue::Null,
    }
}

const DELIMITER_CANDIDATES: [u8; 3] = [b',', b'\t', b';'];

/// Returns `Ok(None)` when no candidate delimiter appears in the first line
/// or the file cannot be read as delimited text.
fn try_delimited(path: &Utf8Path) -> Result<Option<ProfileTable>, ProfileError> {
    let Some(delimiter) = sniff_delimiter(path) else {
        return Ok(None);
    };

    let mut reader = match csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_path(path.as_std_path())
    {
        Ok(reader) => reader,
        Err(_) => return Ok(None),
    };

    let mut records = reader.records();
    let header = match records.next() {
        Some(Ok(record)) => record,
        _ => return Ok(None),
    };
    if header.len() < 2 {
        return Ok(None);
    }
    let col_ids: Vec<String> = header.iter().skip(1).map(|f| f.trim().to_string()).collect();

    let mut row_ids = Vec::new();
    let mut values = Vec::new();
    for record in records {
        let Ok(record) = record else {
            return Ok(None);
        };
        let mut fields = record.iter();
        let Some(label) = fields.next() else {
            return Ok(None);
        };
        row_ids.push(label.trim().to_string());
        values.push(fields.map(CellValue::from_field).collect());
    }

    ProfileTable::new(row_ids, col_ids, values).map(Some)
}

/// Samples the first line and picks the candidate separator that occurs most
/// often, in comma/tab/semicolon precedence order.
fn sniff_delimiter(path: &Utf8Path) -> Option<u8> {
    let file = File::open(path.as_std_path()).ok()?;
    let mut first_line = String::new();
    BufReader::new(file).read_line(&mut first_line).ok()?;

    DELIMITER_CANDIDATES
        .iter()
        .copied()
        .map(|candidate| {
            (
                candidate,
                first_line.bytes().filter(|b| *b == candidate).count(),
            )
        })
        .filter(|(_, count)| *count > 0)
        .reduce(|best, next| if next.1 > best.1 { next } else { best })
        .map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_most_frequent_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.tsv");
        std::fs::write(&path, "id\ts1\ts2,note\nr1\t1\t2\n").unwrap();
        let path = Utf8Path::from_path(&path).unwrap().to_owned();
        assert_eq!(sniff_delimiter(&path), Some(b'\t'));
    }

    #[test]
    fn sniffer_ties_resolve_in_candidate_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tied.csv");
        std::fs::write(&path, "id,s1;x\nr1,1;2\n").unwrap();
        let path = Utf8Path::from_path(&path).unwrap().to_owned();
        // one comma and one semicolon on the first line; comma wins
        assert_eq!(sniff_delimiter(&path), Some(b','));
    }

    #[test]
    fn range_conversion_nulls_and_order() {
        let mut range = Range::new((0, 0), (2, 2));
        range.set_value((0, 0), Data::String("id".to_string()));
        range.set_value((0, 1), Data::String("s1".to_string()));
        range.set_value((0, 2), Data::String("s2".to_string()));
        range.set_value((1, 0), Data::String("path1".to_string()));
        range.set_value((1, 1), Data::Float(1.5));
        range.set_value((2, 0), Data::String("path2".to_string()));
        range.set_value((2, 1), Data::Int(2));
        range.set_value((2, 2), Data::String("NaN".to_string()));

        let table = range_to_table(&range).unwrap();
        assert_eq!(table.col_ids, vec!["s1", "s2"]);
        assert_eq!(table.row_ids, vec!["path1", "path2"]);
        assert_eq!(table.values[0][0], CellValue::Float(1.5));
        assert_eq!(table.values[0][1], CellValue::Null);
        assert_eq!(table.values[1][0], CellValue::Int(2));
        assert_eq!(table.values[1][1], CellValue::Null);
    }

    #[test]
    fn empty_sheet_rejected() {
        let range: Range<Data> = Range::empty();
        assert!(range_to_table(&range).is_err());
    }
}
