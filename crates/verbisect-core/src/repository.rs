//! Version-repository seam: which versions of a component exist.
//!
//! The diff model asks a [`VersionRepository`] for the versions lying between
//! a component's good and bad values. Resolving that against a real package
//! index is someone else's job; this crate ships an in-memory index and an
//! endpoints-only fallback.

use crate::version::Version;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from a version repository lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("component {0:?} is not known to the repository")]
    UnknownComponent(String),

    #[error("version {version} of {component:?} is not listed")]
    UnknownVersion { component: String, version: Version },

    #[error("repository lookup failed: {0}")]
    Lookup(String),
}

/// Enumerates the known versions of a component.
pub trait VersionRepository {
    /// All known versions `v` of `component` with
    /// `lower_exclusive < v <= upper_inclusive`, in ascending order.
    ///
    /// `lower_exclusive = None` means "from the oldest known version".
    fn list_versions(
        &self,
        component: &str,
        lower_exclusive: Option<&Version>,
        upper_inclusive: &Version,
    ) -> Result<Vec<Version>, RepositoryError>;
}

impl<R: VersionRepository + ?Sized> VersionRepository for &R {
    fn list_versions(
        &self,
        component: &str,
        lower_exclusive: Option<&Version>,
        upper_inclusive: &Version,
    ) -> Result<Vec<Version>, RepositoryError> {
        (**self).list_versions(component, lower_exclusive, upper_inclusive)
    }
}

/// A repository that only knows the two endpoints of every axis.
///
/// Every changed component becomes a two-point axis: good, then bad.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointsOnly;

impl VersionRepository for EndpointsOnly {
    fn list_versions(
        &self,
        _component: &str,
        _lower_exclusive: Option<&Version>,
        upper_inclusive: &Version,
    ) -> Result<Vec<Version>, RepositoryError> {
        Ok(vec![upper_inclusive.clone()])
    }
}

/// In-memory version index: component name → every known version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StaticRepository {
    index: BTreeMap<String, Vec<Version>>,
}

impl StaticRepository {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the known versions of a component. Order and duplicates in
    /// `versions` do not matter.
    pub fn insert(
        &mut self,
        component: impl Into<String>,
        versions: impl IntoIterator<Item = Version>,
    ) {
        let mut versions: Vec<Version> = versions.into_iter().collect();
        versions.sort();
        versions.dedup();
        self.index.insert(component.into(), versions);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(
        mut self,
        component: impl Into<String>,
        versions: impl IntoIterator<Item = Version>,
    ) -> Self {
        self.insert(component, versions);
        self
    }

    /// Number of indexed components.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no component is indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Parse an index from JSON (`{"component": ["1.0", "1.1"]}`).
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, Vec<Version>> = serde_json::from_str(json)?;
        let mut repo = Self::new();
        for (component, versions) in raw {
            repo.insert(component, versions);
        }
        Ok(repo)
    }
}

impl VersionRepository for StaticRepository {
    fn list_versions(
        &self,
        component: &str,
        lower_exclusive: Option<&Version>,
        upper_inclusive: &Version,
    ) -> Result<Vec<Version>, RepositoryError> {
        let known = self
            .index
            .get(component)
            .ok_or_else(|| RepositoryError::UnknownComponent(component.to_string()))?;

        if !known.contains(upper_inclusive) {
            return Err(RepositoryError::UnknownVersion {
                component: component.to_string(),
                version: upper_inclusive.clone(),
            });
        }

        Ok(known
            .iter()
            .filter(|v| lower_exclusive.map_or(true, |lower| *v > lower))
            .filter(|v| *v <= upper_inclusive)
            .cloned()
            .collect())
    }
}
