use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::step::{features_from_json, features_to_json, Feature};

/// How imported features combine with the ones already in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Replace,
    Append,
}

/// An ordered list of features, persisted as a JSON array.
///
/// Grouped catalog files are read as well and flattened on load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCatalog {
    features: Vec<Feature>,
}

impl FeatureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_features(features: Vec<Feature>) -> Self {
        Self { features }
    }

    /// Read a catalog file; a file that does not exist is an empty catalog
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(?path, "Catalog file not found, starting empty");
            return Ok(Self::default());
        }
        let features = read_features(path)?;
        info!(?path, count = features.len(), "Loaded feature catalog");
        Ok(Self { features })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, features_to_json(&self.features)?)?;
        debug!(?path, count = self.features.len(), "Saved feature catalog");
        Ok(())
    }

    /// Merge the features of another file; returns how many were imported
    pub fn import<P: AsRef<Path>>(&mut self, path: P, mode: ImportMode) -> Result<usize> {
        let path = path.as_ref();
        let imported = read_features(path)?;
        let count = imported.len();
        match mode {
            ImportMode::Replace => self.features = imported,
            ImportMode::Append => self.features.extend(imported),
        }
        info!(?path, count, ?mode, "Imported features");
        Ok(count)
    }

    /// Write every feature to `path`; returns how many were written
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        if self.features.is_empty() {
            warn!("Exporting an empty feature catalog");
        }
        self.save(path)?;
        Ok(self.features.len())
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Feature> {
        self.features.get(index)
    }

    /// First feature with exactly this name
    pub fn find(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.name == name)
    }

    /// Look a feature up by name, falling back to a 0-based index
    pub fn resolve(&self, key: &str) -> Option<&Feature> {
        self.find(key)
            .or_else(|| key.parse::<usize>().ok().and_then(|index| self.get(index)))
    }

    pub fn add(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Replace the feature at `index`; out-of-range indices are ignored
    pub fn update(&mut self, index: usize, feature: Feature) -> bool {
        match self.features.get_mut(index) {
            Some(slot) => {
                *slot = feature;
                true
            }
            None => {
                debug!(index, len = self.features.len(), "Update index out of range");
                false
            }
        }
    }

    /// Remove the feature at `index`; out-of-range indices are ignored
    pub fn remove(&mut self, index: usize) -> Option<Feature> {
        if index < self.features.len() {
            Some(self.features.remove(index))
        } else {
            debug!(index, len = self.features.len(), "Remove index out of range");
            None
        }
    }
}

fn read_features(path: &Path) -> Result<Vec<Feature>> {
    let text = fs::read_to_string(path)?;
    Ok(features_from_json(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Step, StepKind};

    fn feature(name: &str) -> Feature {
        Feature::new(name, vec![Step::new(StepKind::LeftClick, 0.5, 0.5)])
    }

    #[test]
    fn test_update_and_remove_ignore_bad_indices() {
        let mut catalog = FeatureCatalog::from_features(vec![feature("a"), feature("b")]);

        assert!(!catalog.update(5, feature("x")));
        assert!(catalog.remove(2).is_none());
        assert_eq!(catalog.len(), 2);

        assert!(catalog.update(1, feature("c")));
        assert_eq!(catalog.remove(0).map(|f| f.name), Some("a".to_string()));
        assert_eq!(catalog.features()[0].name, "c");
    }

    #[test]
    fn test_resolve_prefers_names_over_indices() {
        let catalog = FeatureCatalog::from_features(vec![feature("1"), feature("login")]);
        assert_eq!(catalog.resolve("login").map(|f| f.name.as_str()), Some("login"));
        // "1" is a name here, not index 1
        assert_eq!(catalog.resolve("1").map(|f| f.name.as_str()), Some("1"));
        assert_eq!(catalog.resolve("0").map(|f| f.name.as_str()), Some("1"));
        assert!(catalog.resolve("7").is_none());
        assert!(catalog.resolve("missing").is_none());
    }
}
