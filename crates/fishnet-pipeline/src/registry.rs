//! Named artifacts shared between nodes.
//!
//! The [`OutputRegistry`] lives for one pipeline run. Each name has a
//! single producer; consumers borrow and clone before mutating.
//! [`ArtifactStore`] is the persistence boundary used for outputs and
//! for substitute requirements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::quantify::{DotCountPack, MeanIntensityTable};
use crate::types::{CellMaskPack, PipelineError};

/// Anything a node can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    /// Stitched nucleus/cytoplasm masks.
    CellMasks(CellMaskPack),
    /// Per-cell mean intensities.
    MeanIntensity(MeanIntensityTable),
    /// Per-cell particle counts.
    DotCounts(DotCountPack),
}

impl Artifact {
    /// Short kind name for messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CellMasks(_) => "cell_masks",
            Self::MeanIntensity(_) => "mean_intensity",
            Self::DotCounts(_) => "dot_counts",
        }
    }

    /// One-line description shown to the operator.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::CellMasks(pack) => format!("{} cells", pack.cell_count()),
            Self::MeanIntensity(table) => format!("{} measurements", table.records.len()),
            Self::DotCounts(pack) => format!(
                "{} particles in {} cells",
                pack.total(),
                pack.records().len()
            ),
        }
    }
}

/// Artifacts produced so far in this run.
#[derive(Debug, Clone, Default)]
pub struct OutputRegistry {
    entries: BTreeMap<String, Artifact>,
}

impl OutputRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an artifact.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateOutput`] if the name is taken.
    pub fn insert(&mut self, name: &str, artifact: Artifact) -> Result<(), PipelineError> {
        if self.entries.contains_key(name) {
            return Err(PipelineError::DuplicateOutput(name.to_string()));
        }
        self.entries.insert(name.to_string(), artifact);
        Ok(())
    }

    /// Look up an artifact.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.entries.get(name)
    }

    /// Whether `name` has been published.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Published names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow a [`CellMaskPack`].
    ///
    /// # Errors
    ///
    /// [`PipelineError::MissingArtifact`] if absent,
    /// [`PipelineError::UnexpectedArtifact`] if it is another kind.
    pub fn cell_masks(&self, name: &str) -> Result<&CellMaskPack, PipelineError> {
        match self.get(name) {
            Some(Artifact::CellMasks(pack)) => Ok(pack),
            Some(other) => Err(PipelineError::UnexpectedArtifact {
                name: name.to_string(),
                expected: "cell_masks",
                found: other.kind(),
            }),
            None => Err(PipelineError::MissingArtifact(name.to_string())),
        }
    }
}

/// Persistence for artifacts.
pub trait ArtifactStore {
    /// Persist an artifact under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] on I/O or encoding failure.
    fn save(&mut self, name: &str, artifact: &Artifact) -> Result<(), PipelineError>;

    /// Load a previously saved artifact.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingArtifact`] if nothing is stored
    /// under `name`, or [`PipelineError::Store`] if it cannot be read.
    fn load(&mut self, name: &str) -> Result<Artifact, PipelineError>;
}

/// Store that keeps artifacts in a map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    saved: BTreeMap<String, Artifact>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact, e.g. a substitute from an earlier run.
    #[must_use]
    pub fn with(mut self, name: &str, artifact: Artifact) -> Self {
        self.saved.insert(name.to_string(), artifact);
        self
    }

    /// Look at a saved artifact.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.saved.get(name)
    }

    /// Saved names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.saved.keys().map(String::as_str)
    }
}

impl ArtifactStore for MemoryStore {
    fn save(&mut self, name: &str, artifact: &Artifact) -> Result<(), PipelineError> {
        self.saved.insert(name.to_string(), artifact.clone());
        Ok(())
    }

    fn load(&mut self, name: &str) -> Result<Artifact, PipelineError> {
        self.saved
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::MissingArtifact(name.to_string()))
    }
}
