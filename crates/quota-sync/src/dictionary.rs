//! Name→code dictionaries for the four reference dimensions.

use std::collections::{BTreeMap, HashMap};

use quota_core::{DictionaryEntry, Dimension};
use quota_storage::{retry_with_backoff, BackoffPolicy, DestinationStore};
use tracing::info;

use crate::error::MigrationError;

/// Immutable snapshot of one dimension's code table.
#[derive(Debug, Clone)]
pub struct CodeDictionary {
    dimension: Dimension,
    codes: HashMap<String, String>,
}

impl CodeDictionary {
    /// Build a dictionary, rejecting empty tables and names that map to more than one row.
    pub fn from_entries(
        dimension: Dimension,
        table: &str,
        entries: Vec<DictionaryEntry>,
    ) -> Result<Self, MigrationError> {
        if entries.is_empty() {
            return Err(MigrationError::EmptyDictionary {
                dimension,
                table: table.to_string(),
            });
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &entries {
            *counts.entry(entry.name.as_str()).or_default() += 1;
        }
        let duplicates: Vec<String> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_string())
            .collect();
        if let Some(first) = duplicates.first() {
            return Err(MigrationError::DuplicateDictionaryName {
                dimension,
                table: table.to_string(),
                name: first.clone(),
                duplicates,
            });
        }

        let codes = entries
            .into_iter()
            .map(|entry| (entry.name, entry.code))
            .collect();
        Ok(Self { dimension, codes })
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.codes.get(name).map(String::as_str)
    }

    pub(crate) fn len(&self) -> usize {
        self.codes.len()
    }
}

/// The four dictionaries of a run, loaded once and only read afterwards.
#[derive(Debug, Clone)]
pub struct CodeDictionaries {
    category1: CodeDictionary,
    category2: CodeDictionary,
    model: CodeDictionary,
    process: CodeDictionary,
}

impl CodeDictionaries {
    pub fn new(
        category1: CodeDictionary,
        category2: CodeDictionary,
        model: CodeDictionary,
        process: CodeDictionary,
    ) -> Self {
        Self {
            category1,
            category2,
            model,
            process,
        }
    }

    pub fn get(&self, dimension: Dimension) -> &CodeDictionary {
        match dimension {
            Dimension::Category1 => &self.category1,
            Dimension::Category2 => &self.category2,
            Dimension::Model => &self.model,
            Dimension::Process => &self.process,
        }
    }
}

/// Query each dimension's code table once and validate it.
pub async fn resolve_dictionaries(
    store: &dyn DestinationStore,
    backoff: &BackoffPolicy,
) -> Result<CodeDictionaries, MigrationError> {
    let category1 = load_dictionary(store, backoff, Dimension::Category1).await?;
    let category2 = load_dictionary(store, backoff, Dimension::Category2).await?;
    let model = load_dictionary(store, backoff, Dimension::Model).await?;
    let process = load_dictionary(store, backoff, Dimension::Process).await?;
    Ok(CodeDictionaries::new(category1, category2, model, process))
}

async fn load_dictionary(
    store: &dyn DestinationStore,
    backoff: &BackoffPolicy,
    dimension: Dimension,
) -> Result<CodeDictionary, MigrationError> {
    let operation = format!("load {dimension} dictionary");
    let entries = retry_with_backoff(backoff, &operation, || store.fetch_dictionary(dimension))
        .await
        .map_err(|source| MigrationError::DictionaryLoad { dimension, source })?;
    let dictionary =
        CodeDictionary::from_entries(dimension, &store.dictionary_source(dimension), entries)?;
    info!(%dimension, codes = dictionary.len(), "dictionary ready");
    Ok(dictionary)
}
