//! Competition catalog filtering by category and dataset size.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_CATEGORIES: &[&str] = &["Forecasting", "Tabular", "Signal Processing"];
pub const DEFAULT_SIZE_CEILING_GB: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub competition_id: String,
    pub category: String,
    /// Blank or unparsable cells load as `None` and never pass the size filter.
    #[serde(rename = "dataset_size_GB", deserialize_with = "csv::invalid_option")]
    pub dataset_size_gb: Option<f64>,
}

pub fn load_catalog<R: Read>(reader: R) -> Result<Vec<CatalogEntry>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let entries = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<CatalogEntry>, _>>()?;
    Ok(entries)
}

pub fn load_catalog_path(path: &Path) -> Result<Vec<CatalogEntry>> {
    let file = std::fs::File::open(path)?;
    load_catalog(file)
}

/// Ids whose trimmed category is allowed and whose size is strictly below
/// `ceiling_gb`, in catalog order with duplicates dropped.
pub fn filter_competitions<S: AsRef<str>>(
    entries: &[CatalogEntry],
    allow: &[S],
    ceiling_gb: f64,
) -> Vec<String> {
    let allow: HashSet<&str> = allow.iter().map(|s| s.as_ref().trim()).collect();
    let mut seen = HashSet::new();

    entries
        .iter()
        .filter(|e| allow.contains(e.category.trim()))
        .filter(|e| e.dataset_size_gb.is_some_and(|size| size < ceiling_gb))
        .filter(|e| seen.insert(e.competition_id.clone()))
        .map(|e| e.competition_id.clone())
        .collect()
}

pub fn distinct_categories(entries: &[CatalogEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|e| e.category.trim().to_string())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
