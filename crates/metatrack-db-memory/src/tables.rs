//! Table storage used by the in-memory backend.

use std::collections::{BTreeMap, HashMap};

use metatrack_storage::Row;

/// Named tables of rows keyed by primary key.
///
/// Rows within a table iterate in primary-key order, which keeps handler
/// output deterministic across runs.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    tables: HashMap<String, BTreeMap<String, Row>>,
}

impl Tables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a row.
    pub fn upsert(&mut self, table: &str, pk: impl Into<String>, row: Row) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(pk.into(), row);
    }

    #[must_use]
    pub fn get(&self, table: &str, pk: &str) -> Option<&Row> {
        self.tables.get(table).and_then(|rows| rows.get(pk))
    }

    pub fn get_mut(&mut self, table: &str, pk: &str) -> Option<&mut Row> {
        self.tables.get_mut(table).and_then(|rows| rows.get_mut(pk))
    }

    /// Iterates `(pk, row)` pairs of a table; empty if the table does not exist.
    pub fn rows<'a>(&'a self, table: &str) -> impl Iterator<Item = (&'a str, &'a Row)> + 'a {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|rows| rows.iter().map(|(pk, row)| (pk.as_str(), row)))
    }

    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get() {
        let mut tables = Tables::new();
        tables.upsert("experiment", "b", Row::new().with("id", "b"));
        tables.upsert("experiment", "a", Row::new().with("id", "a"));

        assert_eq!(tables.len("experiment"), 2);
        assert_eq!(tables.len("project"), 0);

        let ids: Vec<&str> = tables.rows("experiment").map(|(pk, _)| pk).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut tables = Tables::new();
        tables.upsert("experiment", "a", Row::new().with("version_number", 1_i64));

        if let Some(row) = tables.get_mut("experiment", "a") {
            row.set("version_number", 2_i64);
        }

        let row = tables.get("experiment", "a").unwrap();
        assert_eq!(row.get_i64("version_number").unwrap(), 2);
    }
}
