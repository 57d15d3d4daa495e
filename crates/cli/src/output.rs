// Output formatting for CLI

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            "yaml" => OutputFormat::Yaml,
            _ => OutputFormat::Text,
        }
    }

    /// Print a report in a structured format
    ///
    /// Text output is rendered by each command; this is a no-op for it.
    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        match self {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
                println!("{}", json);
            }
            OutputFormat::Yaml => {
                let yaml = serde_yaml::to_string(value).context("Failed to render YAML")?;
                println!("{}", yaml);
            }
            OutputFormat::Text => {}
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<18} {}", format!("{}:", label), value);
}

/// Fixed-width text table; column widths are set once by the header
pub struct Table {
    widths: Vec<usize>,
}

impl Table {
    /// Print the header row and keep its widths for the body
    pub fn print_header(columns: &[(&str, usize)]) -> Self {
        let table = Self {
            widths: columns.iter().map(|(_, width)| *width).collect(),
        };
        println!("{}", table.render(columns.iter().map(|(name, _)| *name)));
        table
    }

    pub fn print_row<'a>(&self, cells: impl IntoIterator<Item = &'a str>) {
        println!("{}", self.render(cells));
    }

    fn render<'a>(&self, cells: impl IntoIterator<Item = &'a str>) -> String {
        let line = self
            .widths
            .iter()
            .zip(cells)
            .map(|(width, cell)| format!("{:<width$}", clip(cell, *width), width = width))
            .collect::<Vec<_>>()
            .join("  ");
        line.trim_end().to_string()
    }
}

/// Cut `cell` to `width` characters, marking the cut with `~`
fn clip(cell: &str, width: usize) -> String {
    if cell.chars().count() <= width {
        return cell.to_string();
    }
    let mut clipped: String = cell.chars().take(width.saturating_sub(1)).collect();
    clipped.push('~');
    clipped
}

/// Milliseconds as a short human string
pub fn millis(duration: std::time::Duration) -> String {
    format!("{:.1}ms", duration.as_secs_f64() * 1000.0)
}
