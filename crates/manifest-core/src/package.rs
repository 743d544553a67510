//! Package declarations and dependency resolution
//!
//! A manifest may declare packages in its `$package` block:
//!
//! ```yaml
//! $package:
//!   seaf.core:
//!     version: 1.2.0
//!     dependencies:
//!       dochub.metamodel: ^1.0.0
//! ```
//!
//! The [`PackageRegistry`] accepts at most one version per package id and
//! holds "captive" layers whose dependencies are not satisfied yet. Captives
//! are kept in an explicit queue keyed by the package they wait for, and
//! are handed back whenever that package gets declared.

use std::collections::BTreeMap;
use std::fmt;

use semver::{Version, VersionReq};
use serde_json::Value;

use crate::layer::LayerId;
use crate::{Error, Result};

/// A dependency range such as `^1.0.0`, `>=1.2 <2` or `1.x || 2.x`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    alternatives: Vec<VersionReq>,
    raw: String,
}

impl Requirement {
    /// Parse a requirement string.
    ///
    /// Alternatives are separated by `||`; comparators inside one
    /// alternative may be separated by commas or whitespace.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let mut alternatives = Vec::new();
        for part in raw.split("||") {
            let normalized = normalize_comparators(part);
            if normalized.is_empty() {
                return Err("empty requirement".to_string());
            }
            let req = VersionReq::parse(&normalized).map_err(|e| e.to_string())?;
            alternatives.push(req);
        }
        Ok(Self {
            alternatives,
            raw: raw.trim().to_string(),
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Join whitespace-separated comparators with commas, keeping a bare
/// operator glued to the version that follows it.
fn normalize_comparators(part: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in part.split([' ', '\t', ',']).filter(|t| !t.is_empty()) {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~')) {
            pending_op.push_str(token);
            continue;
        }
        comparators.push(format!("{pending_op}{token}"));
        pending_op.clear();
    }
    comparators.join(", ")
}

/// Parse a package version, padding `major` and `major.minor` with zeros
pub fn parse_version(raw: &str) -> std::result::Result<Version, String> {
    let raw = raw.trim();
    let mut candidate = raw.to_string();
    for _ in 0..2 {
        if let Ok(version) = Version::parse(&candidate) {
            return Ok(version);
        }
        candidate.push_str(".0");
    }
    Version::parse(&candidate).map_err(|e| format!("invalid version '{raw}': {e}"))
}

/// A dependency of a declared package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub package: String,
    pub requirement: Requirement,
}

/// A package declared by one manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDecl {
    pub id: String,
    pub version: Version,
    pub dependencies: Vec<Dependency>,
}

/// Everything a single manifest says about packages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageManifest {
    pub declarations: Vec<PackageDecl>,
}

impl PackageManifest {
    /// Read the `$package` block of a manifest.
    ///
    /// Malformed entries are skipped and returned as errors; the rest of the
    /// block still applies.
    pub fn from_block(block: Option<&Value>, uri: &str) -> (Self, Vec<Error>) {
        let mut manifest = PackageManifest::default();
        let mut errors = Vec::new();

        let Some(block) = block else {
            return (manifest, errors);
        };
        let Some(entries) = block.as_object() else {
            errors.push(Error::syntax(uri, "package block must be a mapping"));
            return (manifest, errors);
        };

        for (id, entry) in entries {
            let raw_version = entry.get("version").map(value_text).unwrap_or_default();
            let version = match parse_version(&raw_version) {
                Ok(version) => version,
                Err(reason) => {
                    errors.push(Error::InvalidVersion {
                        package: id.clone(),
                        version: raw_version,
                        uri: uri.to_string(),
                        reason,
                    });
                    continue;
                }
            };

            let mut dependencies = Vec::new();
            let mut valid = true;
            if let Some(deps) = entry.get("dependencies").and_then(Value::as_object) {
                for (package, raw) in deps {
                    let raw = value_text(raw);
                    match Requirement::parse(&raw) {
                        Ok(requirement) => dependencies.push(Dependency {
                            package: package.clone(),
                            requirement,
                        }),
                        Err(reason) => {
                            valid = false;
                            errors.push(Error::InvalidRequirement {
                                package: package.clone(),
                                requirement: raw,
                                uri: uri.to_string(),
                                reason,
                            });
                        }
                    }
                }
            }
            if valid {
                manifest.declarations.push(PackageDecl {
                    id: id.clone(),
                    version,
                    dependencies,
                });
            }
        }

        (manifest, errors)
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// All dependencies of all packages declared by the manifest
    pub fn requirements(&self) -> impl Iterator<Item = &Dependency> {
        self.declarations.iter().flat_map(|decl| decl.dependencies.iter())
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A layer waiting for a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captive {
    pub requirement: Requirement,
    pub layer: LayerId,
}

/// The version accepted for a package in the current generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPackage {
    pub version: Version,
    pub layer: LayerId,
    pub uri: String,
}

/// Accepted package versions plus the captives waiting on them
#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    packages: BTreeMap<String, AcceptedPackage>,
    captives: BTreeMap<String, Vec<Captive>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a declaration against the accepted versions without recording it
    pub fn check_declaration(&self, id: &str, version: &Version, uri: &str) -> Result<()> {
        match self.packages.get(id) {
            Some(accepted) if accepted.version != *version => Err(Error::VersionConflict {
                package: id.to_string(),
                uri: uri.to_string(),
                found: version.to_string(),
                expected: format!("{} (declared in {})", accepted.version, accepted.uri),
            }),
            _ => Ok(()),
        }
    }

    /// Record that `layer` declares `id` at `version`.
    ///
    /// Returns the captives that were waiting for this package; the caller
    /// re-evaluates them. Declaring a different version of an already
    /// accepted package is a conflict.
    pub fn declare(
        &mut self,
        id: &str,
        version: Version,
        layer: LayerId,
        uri: &str,
    ) -> Result<Vec<Captive>> {
        self.check_declaration(id, &version, uri)?;
        if !self.packages.contains_key(id) {
            tracing::debug!(package = %id, %version, %uri, "Package declared");
            self.packages.insert(
                id.to_string(),
                AcceptedPackage {
                    version,
                    layer,
                    uri: uri.to_string(),
                },
            );
        }
        Ok(self.captives.remove(id).unwrap_or_default())
    }

    /// Whether `id` is accepted at a version satisfying `requirement`.
    ///
    /// When it is not, `layer` becomes a captive queued under `id`.
    pub fn require(&mut self, id: &str, requirement: &Requirement, layer: LayerId) -> bool {
        if self
            .packages
            .get(id)
            .is_some_and(|accepted| requirement.matches(&accepted.version))
        {
            return true;
        }
        let queue = self.captives.entry(id.to_string()).or_default();
        if !queue.iter().any(|c| c.layer == layer) {
            queue.push(Captive {
                requirement: requirement.clone(),
                layer,
            });
        }
        false
    }

    pub fn version_of(&self, id: &str) -> Option<&Version> {
        self.packages.get(id).map(|accepted| &accepted.version)
    }

    pub fn packages(&self) -> impl Iterator<Item = (&str, &AcceptedPackage)> {
        self.packages.iter().map(|(id, p)| (id.as_str(), p))
    }

    /// Captives grouped by the package they wait for
    pub fn captives(&self) -> impl Iterator<Item = (&str, &Captive)> {
        self.captives
            .iter()
            .flat_map(|(id, queue)| queue.iter().map(move |c| (id.as_str(), c)))
    }

    pub fn is_captive(&self, layer: LayerId) -> bool {
        self.captives().any(|(_, c)| c.layer == layer)
    }

    /// Drop every captive entry of a freed layer
    pub fn release(&mut self, layer: LayerId) {
        for queue in self.captives.values_mut() {
            queue.retain(|c| c.layer != layer);
        }
        self.captives.retain(|_, queue| !queue.is_empty());
    }

    /// Remove and return all captives still waiting
    pub fn take_captives(&mut self) -> Vec<(String, Captive)> {
        std::mem::take(&mut self.captives)
            .into_iter()
            .flat_map(|(id, queue)| queue.into_iter().map(move |c| (id.clone(), c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn layer(n: u64) -> LayerId {
        LayerId::from_raw(n)
    }

    #[rstest]
    #[case("^1.0.0", "1.2.0", true)]
    #[case("^1.0.0", "2.0.0", false)]
    #[case(">=1.2 <2", "1.9.9", true)]
    #[case(">= 1.2, < 2", "2.0.0", false)]
    #[case("1.x || 3.x", "3.1.0", true)]
    #[case("1.x || 3.x", "2.1.0", false)]
    #[case("*", "0.0.1", true)]
    fn requirement_matching(#[case] raw: &str, #[case] version: &str, #[case] expected: bool) {
        let req = Requirement::parse(raw).unwrap();
        let version = Version::parse(version).unwrap();
        assert_eq!(req.matches(&version), expected, "{raw} vs {version}");
    }

    #[test]
    fn requirement_rejects_garbage() {
        assert!(Requirement::parse("not a range").is_err());
        assert!(Requirement::parse("").is_err());
    }

    #[test]
    fn version_accepts_two_components() {
        assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_version(" 1.2.3 ").unwrap(), Version::new(1, 2, 3));
        assert!(parse_version("one").is_err());
    }

    #[test]
    fn package_block_is_parsed() {
        let block = json!({
            "seaf.core": {
                "version": "1.2.0",
                "dependencies": {"dochub": "^1.0.0"}
            },
            "seaf.extra": {"version": 2}
        });
        let (manifest, errors) = PackageManifest::from_block(Some(&block), "a.yaml");
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(manifest.declarations.len(), 2);
        assert_eq!(manifest.declarations[0].version, Version::new(1, 2, 0));
        assert_eq!(manifest.declarations[1].version, Version::new(2, 0, 0));

        let deps: Vec<_> = manifest.requirements().map(|d| d.package.as_str()).collect();
        assert_eq!(deps, vec!["dochub"]);
    }

    #[test]
    fn bad_entries_are_reported_and_skipped() {
        let block = json!({
            "broken": {"version": "abc"},
            "bad-range": {"version": "1.0.0", "dependencies": {"x": "??"}},
            "fine": {"version": "1.0.0"}
        });
        let (manifest, errors) = PackageManifest::from_block(Some(&block), "a.yaml");
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], Error::InvalidVersion { .. }));
        assert!(matches!(errors[1], Error::InvalidRequirement { .. }));
        assert_eq!(manifest.declarations.len(), 1);
        assert_eq!(manifest.declarations[0].id, "fine");
    }

    #[test]
    fn missing_block_is_empty() {
        let (manifest, errors) = PackageManifest::from_block(None, "a.yaml");
        assert!(manifest.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn require_before_declare_queues_captive() {
        let mut registry = PackageRegistry::new();
        let req = Requirement::parse("^1.0.0").unwrap();

        assert!(!registry.require("p", &req, layer(1)));
        assert!(registry.is_captive(layer(1)));

        let released = registry
            .declare("p", Version::new(1, 2, 0), layer(2), "b.yaml")
            .unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].layer, layer(1));
        assert!(!registry.is_captive(layer(1)));
        assert!(registry.require("p", &req, layer(1)));
    }

    #[test]
    fn second_version_of_same_package_conflicts() {
        let mut registry = PackageRegistry::new();
        registry
            .declare("p", Version::new(1, 0, 0), layer(1), "a.yaml")
            .unwrap();
        // Same version again is accepted
        registry
            .declare("p", Version::new(1, 0, 0), layer(2), "b.yaml")
            .unwrap();

        let err = registry
            .declare("p", Version::new(2, 0, 0), layer(3), "c.yaml")
            .unwrap_err();
        match err {
            Error::VersionConflict { package, uri, .. } => {
                assert_eq!(package, "p");
                assert_eq!(uri, "c.yaml");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.version_of("p"), Some(&Version::new(1, 0, 0)));
    }

    #[test]
    fn unsatisfying_known_version_still_queues() {
        let mut registry = PackageRegistry::new();
        registry
            .declare("p", Version::new(2, 0, 0), layer(1), "a.yaml")
            .unwrap();
        let req = Requirement::parse("^1.0.0").unwrap();
        assert!(!registry.require("p", &req, layer(2)));
        assert!(!registry.require("p", &req, layer(2)));
        assert_eq!(registry.captives().count(), 1);
    }

    #[test]
    fn release_and_take_captives() {
        let mut registry = PackageRegistry::new();
        let req = Requirement::parse("^1").unwrap();
        registry.require("p", &req, layer(1));
        registry.require("q", &req, layer(2));
        registry.release(layer(1));

        let remaining = registry.take_captives();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "q");
        assert_eq!(registry.captives().count(), 0);
    }
}
