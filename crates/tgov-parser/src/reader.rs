//! Table readers for delimited text and XLSX workbooks.

use std::fs;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::debug;

use crate::encoding::detect_encoding_of;
use crate::error::ParseError;
use crate::table::Table;

/// Tried in order; the Brazilian government norm is semicolon.
const DELIMITER_CANDIDATES: [u8; 3] = [b';', b',', b'\t'];
const DELIMITER_SAMPLE_ROWS: usize = 10;

/// Read a raw file into a [`Table`], honoring the detected encoding for
/// delimited text. Zero data rows fail with [`ParseError::EmptyFile`].
pub fn read_table(path: &Path) -> Result<Table, ParseError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("xlsx") => read_xlsx(path),
        Some("csv") => read_delimited(path),
        _ => Err(ParseError::UnsupportedExtension {
            path: path.to_path_buf(),
        }),
    }
}

fn read_delimited(path: &Path) -> Result<Table, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(ParseError::EmptyFile {
            path: path.to_path_buf(),
        });
    }

    let encoding = detect_encoding_of(&bytes);
    debug!(path = %path.display(), encoding = encoding.label(), "decoding delimited file");
    let (text, _, _) = encoding.encoding().decode(&bytes);

    let delimiter = detect_delimiter(&text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let header_record = match records.next() {
        Some(record) => record.map_err(|source| ParseError::Csv {
            path: path.to_path_buf(),
            source,
        })?,
        None => {
            return Err(ParseError::EmptyFile {
                path: path.to_path_buf(),
            })
        }
    };

    let headers: Vec<String> = header_record
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            if i == 0 {
                strip_bom(cell).to_string()
            } else {
                cell.to_string()
            }
        })
        .collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record.map_err(|source| ParseError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(headers.len(), String::new());
        if row.iter().any(|cell| !cell.trim().is_empty()) {
            rows.push(row);
        }
    }

    if rows.is_empty() {
        return Err(ParseError::EmptyFile {
            path: path.to_path_buf(),
        });
    }

    Ok(Table::new(headers, rows))
}

/// Pick the first candidate delimiter that splits every sampled line into
/// at least two columns. Falls back to semicolon.
fn detect_delimiter(text: &str) -> u8 {
    let sample = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(DELIMITER_SAMPLE_ROWS)
        .collect::<Vec<_>>()
        .join("\n");

    for delimiter in DELIMITER_CANDIDATES {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(sample.as_bytes());

        let mut saw_record = false;
        let mut all_wide = true;
        for record in reader.records() {
            match record {
                Ok(record) => {
                    saw_record = true;
                    if record.len() < 2 {
                        all_wide = false;
                        break;
                    }
                }
                Err(_) => {
                    all_wide = false;
                    break;
                }
            }
        }

        if saw_record && all_wide {
            return delimiter;
        }
    }

    b';'
}

fn read_xlsx(path: &Path) -> Result<Table, ParseError> {
    let mut workbook = open_workbook_auto(path).map_err(|source| ParseError::Xlsx {
        path: path.to_path_buf(),
        source,
    })?;

    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|source| ParseError::Xlsx {
            path: path.to_path_buf(),
            source,
        })?,
        None => {
            return Err(ParseError::EmptyFile {
                path: path.to_path_buf(),
            })
        }
    };

    let mut row_iter = range.rows();
    let Some(header_row) = row_iter.next() else {
        return Err(ParseError::EmptyFile {
            path: path.to_path_buf(),
        });
    };

    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let text = cell_to_string(cell);
            if i == 0 {
                strip_bom(&text).to_string()
            } else {
                text
            }
        })
        .collect();

    let mut rows = Vec::new();
    for source_row in row_iter {
        let mut row: Vec<String> = source_row.iter().map(cell_to_string).collect();
        row.resize(headers.len(), String::new());
        if row.iter().any(|cell| !cell.trim().is_empty()) {
            rows.push(row);
        }
    }

    if rows.is_empty() {
        return Err(ParseError::EmptyFile {
            path: path.to_path_buf(),
        });
    }

    Ok(Table::new(headers, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Bool(b) => b.to_string(),
        Data::Int(i) => i.to_string(),
        // Integral floats render without the trailing `.0` so numeric ids
        // survive the spreadsheet round trip.
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) if naive.time() == chrono::NaiveTime::MIN => {
                naive.date().format("%Y-%m-%d").to_string()
            }
            Some(naive) => naive.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

fn strip_bom(cell: &str) -> &str {
    cell.trim_start_matches('\u{feff}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn semicolon_csv_parses_with_headers() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "propostas.csv",
            b"id_proposta;titulo;valor_global\nPROP-1;Obra;1000\nPROP-2;Escola;2000\n",
        );
        let table = read_table(&path).unwrap();
        assert_eq!(table.headers(), &["id_proposta", "titulo", "valor_global"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(1, 1), Some("Escola"));
    }

    #[test]
    fn comma_delimiter_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.csv", b"id,nome\n1,ana\n2,bia\n");
        let table = read_table(&path).unwrap();
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.cell(0, 1), Some("ana"));
    }

    #[test]
    fn utf8_bom_is_stripped_from_first_header() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.csv", b"\xef\xbb\xbfid;nome\n1;ana\n");
        let table = read_table(&path).unwrap();
        assert_eq!(table.headers()[0], "id");
    }

    #[test]
    fn windows_1252_content_is_transcoded_to_utf8() {
        let dir = TempDir::new().unwrap();
        let content = "id_proposta;municipio\nPROP-1;S\u{00c3}O MATEUS\nPROP-2;MARA\u{00c7}\u{00c3}O\n";
        let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(content);
        let path = write_file(&dir, "propostas.csv", &encoded);

        let table = read_table(&path).unwrap();
        assert_eq!(table.cell(0, 1), Some("S\u{00c3}O MATEUS"));
        assert_eq!(table.cell(1, 1), Some("MARA\u{00c7}\u{00c3}O"));
        for row in 0..table.row_count() {
            for col in 0..table.column_count() {
                if let Some(text) = table.cell(row, col) {
                    assert!(!text.contains('\u{fffd}'), "replacement char in {text}");
                }
            }
        }
    }

    #[test]
    fn empty_file_is_a_distinct_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "vazio.csv", b"");
        assert!(matches!(
            read_table(&path),
            Err(ParseError::EmptyFile { .. })
        ));

        let header_only = write_file(&dir, "so_header.csv", b"id;nome\n");
        assert!(matches!(
            read_table(&header_only),
            Err(ParseError::EmptyFile { .. })
        ));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.parquet", b"whatever");
        assert!(matches!(
            read_table(&path),
            Err(ParseError::UnsupportedExtension { .. })
        ));
    }

    #[test]
    fn ragged_rows_are_padded_to_header_width() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.csv", b"id;nome;valor\n1;ana\n");
        let table = read_table(&path).unwrap();
        assert_eq!(table.cell(0, 2), None);
    }
}
