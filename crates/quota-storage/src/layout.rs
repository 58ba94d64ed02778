use std::path::Path;

use anyhow::Context;
use quota_core::Dimension;
use serde::{Deserialize, Serialize};

/// Table and column names on both sides of the migration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLayout {
    pub source: SourceLayout,
    pub dictionaries: DictionaryLayouts,
    pub facts: FactLayout,
}

impl TableLayout {
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parsing table layout yaml")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLayout {
    pub table: String,
    pub category1: String,
    pub category2: String,
    pub model: String,
    pub process: String,
    pub unit_price: String,
    pub effective_date: String,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            table: "quota".to_string(),
            category1: "类别1".to_string(),
            category2: "类别2".to_string(),
            model: "型号".to_string(),
            process: "加工工序".to_string(),
            unit_price: "定额".to_string(),
            effective_date: "effected_from".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryTable {
    pub table: String,
    pub code_column: String,
    pub name_column: String,
}

impl DictionaryTable {
    fn new(table: &str, code_column: &str) -> Self {
        Self {
            table: table.to_string(),
            code_column: code_column.to_string(),
            name_column: "name".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryLayouts {
    pub category1: DictionaryTable,
    pub category2: DictionaryTable,
    pub model: DictionaryTable,
    pub process: DictionaryTable,
}

impl Default for DictionaryLayouts {
    fn default() -> Self {
        Self {
            category1: DictionaryTable::new("process_cat1", "cat1_code"),
            category2: DictionaryTable::new("process_cat2", "cat2_code"),
            model: DictionaryTable::new("motor_models", "model_code"),
            process: DictionaryTable::new("processes", "process_code"),
        }
    }
}

impl DictionaryLayouts {
    pub fn table_for(&self, dimension: Dimension) -> &DictionaryTable {
        match dimension {
            Dimension::Category1 => &self.category1,
            Dimension::Category2 => &self.category2,
            Dimension::Model => &self.model,
            Dimension::Process => &self.process,
        }
    }
}

/// Fact table name; its columns are fixed by `QuotaFact`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactLayout {
    pub table: String,
}

impl Default for FactLayout {
    fn default() -> Self {
        Self {
            table: "quotas".to_string(),
        }
    }
}

pub(crate) fn quote_sqlite_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn quote_mysql_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_payroll_schema() {
        let layout = TableLayout::default();
        assert_eq!(layout.source.table, "quota");
        assert_eq!(layout.source.effective_date, "effected_from");
        assert_eq!(layout.dictionaries.table_for(Dimension::Model).table, "motor_models");
        assert_eq!(
            layout.dictionaries.table_for(Dimension::Process).code_column,
            "process_code"
        );
        assert_eq!(layout.facts.table, "quotas");
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let layout = TableLayout::from_yaml_str(
            r#"
source:
  table: quota_history
dictionaries:
  model:
    table: models_v2
    code_column: code
    name_column: label
facts:
  table: quotas_staging
"#,
        )
        .expect("layout parses");

        assert_eq!(layout.source.table, "quota_history");
        assert_eq!(layout.source.category1, "类别1");
        assert_eq!(layout.dictionaries.model.name_column, "label");
        assert_eq!(layout.dictionaries.category1.table, "process_cat1");
        assert_eq!(layout.facts.table, "quotas_staging");
    }

    #[test]
    fn layout_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "facts:\n  table: quotas_copy").expect("write yaml");
        let layout = TableLayout::from_yaml_file(file.path()).expect("layout file");
        assert_eq!(layout.facts.table, "quotas_copy");
        assert_eq!(layout.source, SourceLayout::default());
    }

    #[test]
    fn identifiers_are_quoted_per_dialect() {
        assert_eq!(quote_sqlite_ident("类别1"), "\"类别1\"");
        assert_eq!(quote_sqlite_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_mysql_ident("quotas"), "`quotas`");
        assert_eq!(quote_mysql_ident("a`b"), "`a``b`");
    }
}
