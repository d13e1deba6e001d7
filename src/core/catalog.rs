//! Exercise catalog
//!
//! Ordered, read-only list of exercise definitions. Loaded once before serving
//! requests, either from the embedded `files/exercises.toml` or from a file.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::CatalogError;

/// One exercise of the curriculum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseDefinition {
    pub id: u32,
    pub title: String,
    /// Task statement shown to the learner
    pub prompt: String,
    /// Short explanation of the concept being practised
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub starter_code: String,
    /// Exact output a correct solution prints
    pub expected_output: String,
    #[serde(default)]
    pub hints: Vec<String>,
}

/// Raw TOML layout: a list of `[[exercise]]` tables
#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default, rename = "exercise")]
    exercises: Vec<ExerciseDefinition>,
}

/// Immutable exercise catalog, cheap to share between learners
#[derive(Debug, Clone)]
pub struct Catalog {
    exercises: Vec<Arc<ExerciseDefinition>>,
}

impl Catalog {
    /// Catalog bundled with the binary
    pub fn embedded() -> Result<Self, CatalogError> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/exercises.toml"));
        Self::from_toml_str(content)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = toml::from_str(content)?;
        Self::from_definitions(raw.exercises)
    }

    /// Build a catalog, checking that ids are unique and run 1..=n.
    pub fn from_definitions(
        mut exercises: Vec<ExerciseDefinition>,
    ) -> Result<Self, CatalogError> {
        if exercises.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for exercise in &exercises {
            if !seen.insert(exercise.id) {
                return Err(CatalogError::DuplicateId(exercise.id));
            }
        }

        exercises.sort_by_key(|e| e.id);
        for (idx, exercise) in exercises.iter().enumerate() {
            let expected = idx as u32 + 1;
            if exercise.id != expected {
                return Err(CatalogError::NonContiguous {
                    expected,
                    found: exercise.id,
                });
            }
        }

        Ok(Self {
            exercises: exercises.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn get(&self, id: u32) -> Option<&Arc<ExerciseDefinition>> {
        let idx = id.checked_sub(1)? as usize;
        self.exercises.get(idx)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExerciseDefinition>> {
        self.exercises.iter()
    }
}

#[cfg(test)]
pub(crate) fn test_catalog(n: u32) -> Catalog {
    let exercises = (1..=n)
        .map(|id| ExerciseDefinition {
            id,
            title: format!("Exercise {}", id),
            prompt: format!("Print {}", id),
            context: String::new(),
            starter_code: String::new(),
            expected_output: format!("{}\n", id),
            hints: vec![],
        })
        .collect();
    Catalog::from_definitions(exercises).unwrap()
}
