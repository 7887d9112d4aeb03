//! Environment snapshots and the per-component diff between two of them.
//!
//! An [`Environment`] maps component names to versions. A known-good and a
//! known-bad environment are compared by [`diff`], which yields one
//! [`DiffEntry`] (an *axis*) per component whose version differs. Each axis
//! lists the candidate values the search may move that component through,
//! ending at its bad value.
//!
//! Axis values are `Option<Version>`: `None` means the component is absent
//! from the environment, so added and removed components are axes too.

use crate::repository::{RepositoryError, VersionRepository};
use crate::version::{display_pin, Version, VersionError};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from building or parsing an environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("line {line}: expected `name==version`, got {text:?}")]
    Malformed { line: usize, text: String },

    #[error("line {line}: component {name:?} listed twice")]
    Duplicate { line: usize, name: String },

    #[error("line {line}: {source}")]
    Version {
        line: usize,
        #[source]
        source: VersionError,
    },

    #[error("invalid component name {0:?}")]
    InvalidName(String),
}

/// A version could not be enumerated for one axis of a diff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot enumerate versions of {component:?}: {reason}")]
pub struct EnumerationError {
    /// The component whose axis cannot be searched.
    pub component: String,
    /// Why enumeration failed.
    pub reason: EnumerationFailure,
}

/// Why a component's candidate versions could not be enumerated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnumerationFailure {
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    #[error("repository returned no versions up to {0}")]
    Empty(Version),

    #[error("repository listing is not strictly ascending at {0}")]
    Unordered(Version),

    #[error("repository returned {version}, outside ({lower}, {upper}]")]
    OutOfRange {
        version: Version,
        lower: String,
        upper: Version,
    },

    #[error("repository listing does not end at {expected}")]
    MissingEndpoint { expected: Version },
}

/// An immutable assignment of versions to components.
///
/// Serialized as a flat JSON object. A component listed twice is rejected,
/// as it is in requirement lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Environment {
    components: BTreeMap<String, Version>,
}

/// One environment handed to the oracle as a unit.
pub type Snapshot = Environment;

impl Environment {
    /// An environment with no components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, version)` pairs. Later pairs win on duplicate names.
    pub fn from_pairs<I, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, Version)>,
        N: Into<String>,
    {
        Self {
            components: pairs
                .into_iter()
                .map(|(name, version)| (name.into(), version))
                .collect(),
        }
    }

    /// Parse requirement lines (`name==version`), ignoring blank lines and
    /// `#` comments.
    pub fn parse_requirements(text: &str) -> Result<Self, EnvironmentError> {
        let mut components = BTreeMap::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            let content = raw_line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }

            let (name, version) =
                content
                    .split_once("==")
                    .ok_or_else(|| EnvironmentError::Malformed {
                        line,
                        text: raw_line.to_string(),
                    })?;
            let name = name.trim();
            if !is_valid_name(name) {
                return Err(EnvironmentError::Malformed {
                    line,
                    text: raw_line.to_string(),
                });
            }
            let version = Version::parse(version.trim())
                .map_err(|source| EnvironmentError::Version { line, source })?;

            if components.insert(name.to_string(), version).is_some() {
                return Err(EnvironmentError::Duplicate {
                    line,
                    name: name.to_string(),
                });
            }
        }

        Ok(Self { components })
    }

    /// Render as requirement lines, one component per line in name order.
    pub fn to_requirements(&self) -> String {
        self.components
            .iter()
            .map(|(name, version)| format!("{}=={}\n", name, version))
            .collect()
    }

    /// The version of `component`, if present.
    pub fn get(&self, component: &str) -> Option<&Version> {
        self.components.get(component)
    }

    /// A copy of this environment with `component` pinned to `pin`
    /// (`None` removes it).
    pub fn with_pin(
        &self,
        component: &str,
        pin: Option<&Version>,
    ) -> Result<Self, EnvironmentError> {
        if !is_valid_name(component) {
            return Err(EnvironmentError::InvalidName(component.to_string()));
        }
        let mut components = self.components.clone();
        match pin {
            Some(version) => {
                components.insert(component.to_string(), version.clone());
            }
            None => {
                components.remove(component);
            }
        }
        Ok(Self { components })
    }

    /// Iterate components in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Version)> {
        self.components.iter().map(|(name, version)| (name.as_str(), version))
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the environment has no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl FromStr for Environment {
    type Err = EnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_requirements(s)
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ComponentsVisitor;

        impl<'de> Visitor<'de> for ComponentsVisitor {
            type Value = Environment;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of component names to versions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Environment, A::Error> {
                let mut components = BTreeMap::new();
                while let Some((name, version)) = map.next_entry::<String, Version>()? {
                    if components.contains_key(&name) {
                        return Err(de::Error::custom(format_args!(
                            "component {:?} listed twice",
                            name
                        )));
                    }
                    components.insert(name, version);
                }
                Ok(Environment { components })
            }
        }

        deserializer.deserialize_map(ComponentsVisitor)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, version) in &self.components {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}=={}", name, version)?;
            first = false;
        }
        Ok(())
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '@' | ':'))
}

/// One axis of a diff: a component that changed between good and bad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Component name.
    pub component: String,
    /// Value in the good environment (`None` = absent).
    pub good: Option<Version>,
    /// Values to move through, nearest-to-good first, ending at the bad
    /// value. Never empty.
    pub candidates: Vec<Option<Version>>,
}

impl DiffEntry {
    /// The value in the bad environment.
    pub fn bad(&self) -> Option<&Version> {
        self.candidates.last().and_then(Option::as_ref)
    }

    /// Number of candidate values.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Always false for entries produced by [`diff`].
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} ({} candidate{})",
            self.component,
            display_pin(self.good.as_ref()),
            display_pin(self.bad()),
            self.candidates.len(),
            if self.candidates.len() == 1 { "" } else { "s" }
        )
    }
}

/// Every changed component between two environments, in component order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff {
    entries: Vec<DiffEntry>,
}

impl Diff {
    /// Axes in deterministic (component name) order.
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    /// Number of changed components (k).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the axis for a component.
    pub fn get(&self, component: &str) -> Option<&DiffEntry> {
        self.entries.iter().find(|e| e.component == component)
    }
}

/// Compute the per-component diff between `good` and `bad`.
///
/// Candidate versions of upgraded and downgraded components come from
/// `repository`; added and removed components are single-candidate axes. Any
/// component whose versions cannot be enumerated fails the whole diff.
pub fn diff<R: VersionRepository + ?Sized>(
    good: &Environment,
    bad: &Environment,
    repository: &R,
) -> Result<Diff, EnumerationError> {
    let mut names: Vec<&String> = good
        .components
        .keys()
        .chain(bad.components.keys())
        .collect();
    names.sort();
    names.dedup();

    let mut entries = Vec::new();
    for name in names {
        let before = good.components.get(name);
        let after = bad.components.get(name);

        let candidates = match (before, after) {
            (Some(g), Some(b)) if g == b => continue,
            (Some(g), Some(b)) if g < b => upgrade_candidates(name, g, b, repository)?,
            (Some(g), Some(b)) => downgrade_candidates(name, g, b, repository)?,
            (None, Some(b)) => vec![Some(b.clone())],
            (Some(_), None) => vec![None],
            (None, None) => continue,
        };

        log::debug!(
            "axis {}: {} -> {} ({} candidates)",
            name,
            display_pin(before),
            display_pin(after),
            candidates.len()
        );

        entries.push(DiffEntry {
            component: name.clone(),
            good: before.cloned(),
            candidates,
        });
    }

    Ok(Diff { entries })
}

/// Versions in `(good, bad]`, ascending.
fn upgrade_candidates<R: VersionRepository + ?Sized>(
    component: &str,
    good: &Version,
    bad: &Version,
    repository: &R,
) -> Result<Vec<Option<Version>>, EnumerationError> {
    let listed = checked_listing(component, good, bad, repository)?;
    Ok(listed.into_iter().map(Some).collect())
}

/// Versions in `[bad, good)`, descending: the interior of `(bad, good]` walked
/// from good toward bad, then bad itself.
fn downgrade_candidates<R: VersionRepository + ?Sized>(
    component: &str,
    good: &Version,
    bad: &Version,
    repository: &R,
) -> Result<Vec<Option<Version>>, EnumerationError> {
    let mut listed = checked_listing(component, bad, good, repository)?;
    listed.pop();
    listed.reverse();
    listed.push(bad.clone());
    Ok(listed.into_iter().map(Some).collect())
}

/// Ask the repository for `(lower, upper]` and validate the answer.
fn checked_listing<R: VersionRepository + ?Sized>(
    component: &str,
    lower: &Version,
    upper: &Version,
    repository: &R,
) -> Result<Vec<Version>, EnumerationError> {
    let fail = |reason: EnumerationFailure| EnumerationError {
        component: component.to_string(),
        reason,
    };

    let listed = repository
        .list_versions(component, Some(lower), upper)
        .map_err(|e| fail(e.into()))?;

    if listed.is_empty() {
        return Err(fail(EnumerationFailure::Empty(upper.clone())));
    }
    for pair in listed.windows(2) {
        if pair[0] >= pair[1] {
            return Err(fail(EnumerationFailure::Unordered(pair[1].clone())));
        }
    }
    if let Some(outside) = listed.iter().find(|v| *v <= lower || *v > upper) {
        return Err(fail(EnumerationFailure::OutOfRange {
            version: outside.clone(),
            lower: lower.to_string(),
            upper: upper.clone(),
        }));
    }
    if listed.last() != Some(upper) {
        return Err(fail(EnumerationFailure::MissingEndpoint {
            expected: upper.clone(),
        }));
    }

    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{EndpointsOnly, StaticRepository};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> Environment {
        Environment::from_pairs(pairs.iter().map(|(n, s)| (*n, v(s))))
    }

    /// Repository that returns whatever it was told to, unvalidated.
    struct Canned(Vec<Version>);

    impl VersionRepository for Canned {
        fn list_versions(
            &self,
            _component: &str,
            _lower_exclusive: Option<&Version>,
            _upper_inclusive: &Version,
        ) -> Result<Vec<Version>, RepositoryError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_parse_requirements() {
        let parsed = Environment::parse_requirements(
            "# pinned\nnumpy==1.26.0\n\npandas == 2.1.0  # trailing\n",
        )
        .unwrap();
        assert_eq!(parsed, env(&[("numpy", "1.26.0"), ("pandas", "2.1.0")]));
    }

    #[test]
    fn test_parse_requirements_errors() {
        assert!(matches!(
            Environment::parse_requirements("numpy>=1.0"),
            Err(EnvironmentError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            Environment::parse_requirements("a==1\na==2"),
            Err(EnvironmentError::Duplicate { line: 2, .. })
        ));
        assert!(matches!(
            Environment::parse_requirements("a=="),
            Err(EnvironmentError::Version { line: 1, .. })
        ));
    }

    #[test]
    fn test_requirements_roundtrip() {
        let e = env(&[("b", "2.0"), ("a", "1.0")]);
        assert_eq!(e.to_requirements(), "a==1.0\nb==2.0\n");
        assert_eq!(e.to_requirements().parse::<Environment>().unwrap(), e);
    }

    #[test]
    fn test_with_pin_leaves_original_untouched() {
        let base = env(&[("a", "1")]);
        let bumped = base.with_pin("a", Some(&v("2"))).unwrap();
        let removed = base.with_pin("a", None).unwrap();
        assert_eq!(base.get("a"), Some(&v("1")));
        assert_eq!(bumped.get("a"), Some(&v("2")));
        assert!(removed.is_empty());
        assert!(base.with_pin("", None).is_err());
    }

    #[test]
    fn test_diff_of_identical_is_empty() {
        let good = env(&[("a", "1"), ("b", "2")]);
        let d = diff(&good, &good, &EndpointsOnly).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn test_diff_upgrade_enumerates_interval() {
        let repo = StaticRepository::new().with("a", ["1", "2", "3", "4"].map(v));
        let d = diff(&env(&[("a", "1")]), &env(&[("a", "3")]), &repo).unwrap();
        assert_eq!(d.len(), 1);
        let axis = &d.entries()[0];
        assert_eq!(axis.good, Some(v("1")));
        assert_eq!(axis.candidates, vec![Some(v("2")), Some(v("3"))]);
        assert_eq!(axis.bad(), Some(&v("3")));
    }

    #[test]
    fn test_diff_downgrade_walks_toward_bad() {
        let repo = StaticRepository::new().with("a", ["1", "2", "3", "4", "5"].map(v));
        let d = diff(&env(&[("a", "5")]), &env(&[("a", "2")]), &repo).unwrap();
        assert_eq!(
            d.entries()[0].candidates,
            vec![Some(v("4")), Some(v("3")), Some(v("2"))]
        );
    }

    #[test]
    fn test_diff_added_and_removed_components() {
        let good = env(&[("gone", "1.0"), ("same", "1")]);
        let bad = env(&[("new", "0.1"), ("same", "1")]);
        let d = diff(&good, &bad, &EndpointsOnly).unwrap();

        let names: Vec<&str> = d.entries().iter().map(|e| e.component.as_str()).collect();
        assert_eq!(names, vec!["gone", "new"]);

        let gone = d.get("gone").unwrap();
        assert_eq!(gone.good, Some(v("1.0")));
        assert_eq!(gone.candidates, vec![None]);

        let new = d.get("new").unwrap();
        assert_eq!(new.good, None);
        assert_eq!(new.candidates, vec![Some(v("0.1"))]);
    }

    #[test]
    fn test_diff_unknown_component_is_enumeration_error() {
        let err = diff(
            &env(&[("a", "1")]),
            &env(&[("a", "2")]),
            &StaticRepository::new(),
        )
        .unwrap_err();
        assert_eq!(err.component, "a");
        assert!(matches!(err.reason, EnumerationFailure::Repository(_)));
    }

    #[test]
    fn test_diff_rejects_bad_listings() {
        let good = env(&[("a", "1")]);
        let bad = env(&[("a", "3")]);

        let err = diff(&good, &bad, &Canned(vec![])).unwrap_err();
        assert!(matches!(err.reason, EnumerationFailure::Empty(_)));

        let err = diff(&good, &bad, &Canned(vec![v("3"), v("2")])).unwrap_err();
        assert!(matches!(err.reason, EnumerationFailure::Unordered(_)));

        let err = diff(&good, &bad, &Canned(vec![v("0"), v("3")])).unwrap_err();
        assert!(matches!(err.reason, EnumerationFailure::OutOfRange { .. }));

        let err = diff(&good, &bad, &Canned(vec![v("2")])).unwrap_err();
        assert!(matches!(err.reason, EnumerationFailure::MissingEndpoint { .. }));
    }

    #[test]
    fn test_environment_serde_is_flat_map() {
        let e = env(&[("a", "1.0")]);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, r#"{"a":"1.0"}"#);
        let back: Environment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_json_duplicate_component_is_rejected() {
        let err = serde_json::from_str::<Environment>(r#"{"a": "1.0", "a": "2.0"}"#).unwrap_err();
        assert!(err.to_string().contains(r#"component "a" listed twice"#));
        assert!(serde_json::from_str::<Environment>(r#"["a"]"#).is_err());
    }
}
