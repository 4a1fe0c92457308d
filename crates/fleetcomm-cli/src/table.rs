//! Box-drawing table renderer for list output.

use colored::Colorize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

pub struct Table {
    headers: Vec<String>,
    alignments: Vec<Align>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// All columns default to left alignment.
    pub fn new(headers: &[&str]) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let alignments = vec![Align::Left; headers.len()];
        Self {
            headers,
            alignments,
            rows: Vec::new(),
        }
    }

    pub fn align(mut self, col: usize, alignment: Align) -> Self {
        if let Some(a) = self.alignments.get_mut(col) {
            *a = alignment;
        }
        self
    }

    /// Missing cells render empty; extra cells are dropped.
    pub fn add_row(&mut self, cells: &[&str]) {
        let row = (0..self.headers.len())
            .map(|i| cells.get(i).copied().unwrap_or("").to_string())
            .collect();
        self.rows.push(row);
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }
        widths
    }

    fn pad(text: &str, width: usize, alignment: Align) -> String {
        match alignment {
            Align::Left => format!("{text:<width$}"),
            Align::Right => format!("{text:>width$}"),
        }
    }

    fn border(widths: &[usize], left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn line(&self, cells: &[String], widths: &[usize], bold: bool) -> String {
        let cells: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let padded = Self::pad(c, widths[i], self.alignments[i]);
                if bold {
                    format!(" {} ", padded.bold())
                } else {
                    format!(" {padded} ")
                }
            })
            .collect();
        format!("\u{2502}{}\u{2502}", cells.join("\u{2502}"))
    }

    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut lines = vec![
            Self::border(&widths, '\u{250c}', '\u{252c}', '\u{2510}'),
            self.line(&self.headers, &widths, true),
            Self::border(&widths, '\u{251c}', '\u{253c}', '\u{2524}'),
        ];
        for row in &self.rows {
            lines.push(self.line(row, &widths, false));
        }
        lines.push(Self::border(&widths, '\u{2514}', '\u{2534}', '\u{2518}'));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_limits_table() {
        let mut t = Table::new(&["Limit", "Permits"]).align(1, Align::Right);
        t.add_row(&["global", "50"]);
        t.add_row(&["inventory-report", "unlimited"]);

        let rendered = t.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with('\u{250c}'));
        assert!(lines[5].ends_with('\u{2518}'));
        assert!(lines[1].contains("Permits"));

        let global = lines.iter().find(|l| l.contains("global")).unwrap();
        assert!(global.contains("        50 "));
    }

    #[test]
    fn test_short_rows_are_padded() {
        let mut t = Table::new(&["A", "B"]);
        t.add_row(&["only"]);
        assert_eq!(t.rows[0], vec!["only".to_string(), String::new()]);
    }
}
