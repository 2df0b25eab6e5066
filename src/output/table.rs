#![forbid(unsafe_code)]

use std::io;

/// Column-aligned plain-text table for `list`, `status` and `history`.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cols: impl IntoIterator<Item = impl Into<String>>) {
        self.rows.push(cols.into_iter().map(Into::into).collect());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn print(&self) -> io::Result<()> {
        self.write_to(io::stdout().lock())
    }

    pub fn print_csv(&self) -> io::Result<()> {
        self.write_csv(io::stdout().lock())
    }

    pub fn write_csv(&self, out: impl io::Write) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_to(&self, mut out: impl io::Write) -> io::Result<()> {
        let widths = self.column_widths();
        writeln!(out, "{}", format_row(&self.headers, &widths))?;
        for row in &self.rows {
            writeln!(out, "{}", format_row(row, &widths))?;
        }
        Ok(())
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| width(h)).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i >= widths.len() {
                    widths.push(0);
                }
                widths[i] = widths[i].max(width(cell));
            }
        }
        widths
    }
}

fn width(s: &str) -> usize {
    s.chars().count()
}

fn format_row(row: &[String], widths: &[usize]) -> String {
    let mut out = String::new();
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        let w = widths.get(i).copied().unwrap_or_default();
        out.extend(std::iter::repeat_n(' ', w.saturating_sub(width(cell))));
    }
    out.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(["ID", "STATUS"]);
        t.row(["fix-login", "done"]);
        t.row(["a", "failed, retry"]);
        t
    }

    #[test]
    fn aligns_columns_without_trailing_spaces() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "ID         STATUS\nfix-login  done\na          failed, retry\n"
        );
    }

    #[test]
    fn csv_quotes_fields_with_commas() {
        let mut buf = Vec::new();
        sample().write_csv(&mut buf).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.starts_with("ID,STATUS\n"));
        assert!(out.contains("a,\"failed, retry\"\n"));
    }
}
