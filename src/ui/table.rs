use tabled::{settings::Style, Table, Tabled};

use crate::service::TableStatus;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
struct RelationalRow {
    #[tabled(rename = "Catalog")]
    catalog: String,
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Rows")]
    rows: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

/// Two-column table for snapshot file facts
pub fn snapshot_table(facts: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in facts {
        builder.add_row(label, value);
    }
    builder.build()
}

/// Row counts per relational table; missing tables show as "missing"
pub fn tables_table(status: &[TableStatus]) -> String {
    let rows: Vec<RelationalRow> = status
        .iter()
        .map(|s| RelationalRow {
            catalog: s.catalog.clone(),
            table: s.table.clone(),
            rows: s.rows.map_or_else(|| "missing".to_string(), |n| n.to_string()),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_table_marks_missing() {
        let rendered = tables_table(&[
            TableStatus {
                catalog: "podcast".to_string(),
                table: "podcast_channels".to_string(),
                rows: Some(12),
            },
            TableStatus {
                catalog: "session".to_string(),
                table: "session_speakers".to_string(),
                rows: None,
            },
        ]);
        assert!(rendered.contains("podcast_channels"));
        assert!(rendered.contains("12"));
        assert!(rendered.contains("missing"));
    }

    #[test]
    fn test_empty_builder_renders_nothing() {
        assert_eq!(TableBuilder::new().build(), "");
    }
}
