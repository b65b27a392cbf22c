//! Format-tolerant readers for the Transfer Gov raw files: encoding
//! detection, delimited/XLSX parsing, and header-to-canonical mapping.

pub mod encoding;
pub mod error;
pub mod reader;
pub mod schema;
pub mod table;

pub const CRATE_NAME: &str = "tgov-parser";

pub use encoding::{detect_encoding, SourceEncoding};
pub use error::ParseError;
pub use reader::read_table;
pub use schema::{infer_file_kind, map_columns, normalize_header, ColumnMap, FileKind};
pub use table::Table;

/// Read a raw file and resolve its columns against the expected schema for
/// `kind`. The returned [`ColumnMap`] is the only way downstream code
/// addresses columns; raw header spellings never leak past this point.
pub fn parse_file(
    path: &std::path::Path,
    kind: FileKind,
) -> Result<(Table, ColumnMap), ParseError> {
    let table = read_table(path)?;
    let columns = map_columns(&table, kind)?;
    tracing::info!(
        path = %path.display(),
        kind = kind.as_str(),
        rows = table.row_count(),
        columns = table.column_count(),
        "parsed raw file"
    );
    Ok((table, columns))
}
