//! In-memory table of records flowing from enrichment to quality analysis.
//!
//! Rows are JSON objects keyed by column name. A cell is missing when its key
//! is absent or holds `null`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::EnrichedAddress;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

/// Column layout of an enriched address table.
const ENRICHED_SCHEMA: [(&str, ColumnKind); 9] = [
    ("address", ColumnKind::Text),
    ("latitude", ColumnKind::Numeric),
    ("longitude", ColumnKind::Numeric),
    ("score", ColumnKind::Numeric),
    ("city", ColumnKind::Text),
    ("postcode", ColumnKind::Text),
    ("citycode", ColumnKind::Text),
    ("commune_name", ColumnKind::Text),
    ("population", ColumnKind::Numeric),
];

pub fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

impl Dataset {
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Table of enriched addresses with the fixed enriched schema.
    pub fn from_enriched(records: Vec<EnrichedAddress>) -> Self {
        let columns = ENRICHED_SCHEMA
            .iter()
            .map(|(name, kind)| Column {
                name: name.to_string(),
                kind: *kind,
            })
            .collect();

        let rows = records
            .into_iter()
            .filter_map(|record| match serde_json::to_value(record) {
                Ok(Value::Object(row)) => Some(row),
                _ => None,
            })
            .collect();

        Self { columns, rows }
    }

    /// Table built from arbitrary records, inferring column kinds.
    ///
    /// A column is numeric when it has at least one value and all its values
    /// are numbers. Columns keep the order in which keys are first seen.
    pub fn from_records(rows: Vec<Row>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let mut present = rows
                    .iter()
                    .filter_map(|row| row.get(&name))
                    .filter(|v| !v.is_null())
                    .peekable();
                let numeric = present.peek().is_some() && present.all(Value::is_number);
                Column {
                    kind: if numeric {
                        ColumnKind::Numeric
                    } else {
                        ColumnKind::Text
                    },
                    name,
                }
            })
            .collect();

        Self { columns, rows }
    }

    /// Overrides the kind of one column, adding the column if it is unknown.
    pub fn with_column_kind(mut self, name: &str, kind: ColumnKind) -> Self {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.kind = kind,
            None => self.columns.push(Column {
                name: name.to_string(),
                kind,
            }),
        }
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of one column, `None` where missing.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.rows
            .iter()
            .map(move |row| row.get(name).filter(|v| !v.is_null()))
    }

    /// Number of missing cells in one column.
    pub fn missing_count(&self, name: &str) -> usize {
        self.values(name).filter(Option::is_none).count()
    }

    pub fn into_parts(self) -> (Vec<Column>, Vec<Row>) {
        (self.columns, self.rows)
    }
}
