//! In-memory tabular representation shared by the CSV and XLSX readers.

/// A parsed table: one header row plus string-typed data rows. Cell typing
/// happens later, during row validation, so both readers can stay dumb.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Trimmed cell text, `None` when the cell is blank or the row is
    /// ragged and the column does not exist.
    pub fn cell<'a>(&'a self, row: usize, column: usize) -> Option<&'a str> {
        let text = self.rows.get(row)?.get(column)?.trim();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_missing_cells_read_as_none() {
        let table = Table::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec!["1".into(), "  ".into()]],
        );
        assert_eq!(table.cell(0, 0), Some("1"));
        assert_eq!(table.cell(0, 1), None);
        assert_eq!(table.cell(0, 2), None);
        assert_eq!(table.cell(1, 0), None);
    }

    #[test]
    fn cell_text_is_trimmed() {
        let table = Table::new(vec!["a".into()], vec![vec!["  PROP-1  ".into()]]);
        assert_eq!(table.cell(0, 0), Some("PROP-1"));
    }
}
