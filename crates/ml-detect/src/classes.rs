//! Class-name table resolving detector class ids to display names.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Names of the ten VisDrone object categories, in model output order.
const VISDRONE_NAMES: [&str; 10] = [
    "pedestrian",
    "people",
    "bicycle",
    "car",
    "van",
    "truck",
    "tricycle",
    "awning-tricycle",
    "bus",
    "motor",
];

#[derive(Clone, Debug)]
pub struct ClassTable {
    names: Vec<String>,
}

/// Subset of an ultralytics-style `data.yaml` we care about.
#[derive(Deserialize)]
struct DataFile {
    names: Vec<String>,
}

impl ClassTable {
    pub fn visdrone() -> Self {
        Self::from_names(VISDRONE_NAMES.iter().map(|s| s.to_string()).collect())
    }

    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Parse a dataset description with a `names:` list.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let data: DataFile =
            serde_yaml::from_str(text).context("dataset yaml is missing a `names` list")?;
        Ok(Self::from_names(data.names))
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read class names from {}", path.display()))?;
        Self::from_yaml(&text)
    }

    /// Resolve a class id; ids outside the table render as `object <id>`.
    pub fn name(&self, id: i64) -> String {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.names.get(idx))
            .cloned()
            .unwrap_or_else(|| format!("object {id}"))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visdrone_table_resolves_known_ids() {
        let table = ClassTable::visdrone();
        assert_eq!(table.len(), 10);
        assert_eq!(table.name(0), "pedestrian");
        assert_eq!(table.name(3), "car");
        assert_eq!(table.name(9), "motor");
    }

    #[test]
    fn unknown_ids_fall_back_to_generic_name() {
        let table = ClassTable::visdrone();
        assert_eq!(table.name(10), "object 10");
        assert_eq!(table.name(-1), "object -1");
    }

    #[test]
    fn parses_names_from_dataset_yaml() {
        let yaml = "path: ../datasets/visdrone\nnames:\n  - pedestrian\n  - people\n  - bicycle\n";
        let table = ClassTable::from_yaml(yaml).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.name(2), "bicycle");
    }

    #[test]
    fn rejects_yaml_without_names() {
        assert!(ClassTable::from_yaml("path: ../datasets/visdrone\n").is_err());
    }
}
