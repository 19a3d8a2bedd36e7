//! Load-time registry of record kinds and the capabilities they implement.
//!
//! Built once at startup (from code or a JSON file) and shared read-only
//! afterwards, typically behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StorageError};
use crate::record::RecordKind;

/// Capability tag a record kind can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Managed by the node repository (sync, export).
    Node,
    /// Searchable; eligible for reindexing.
    Indexed,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Node => f.write_str("node"),
            Capability::Indexed => f.write_str("indexed"),
        }
    }
}

/// One registered kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindDescriptor {
    pub kind: RecordKind,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub description: Option<String>,
}

impl KindDescriptor {
    pub fn implements(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Which kinds a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKindSelector {
    /// A single named kind.
    Kind(RecordKind),
    /// Every registered kind implementing the capability.
    All(Capability),
}

impl RecordKindSelector {
    /// `Kind` when a kind was given, otherwise every kind with `capability`.
    pub fn from_option(kind: Option<RecordKind>, capability: Capability) -> Self {
        match kind {
            Some(kind) => RecordKindSelector::Kind(kind),
            None => RecordKindSelector::All(capability),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RecordKindSelector::All(_))
    }
}

impl fmt::Display for RecordKindSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKindSelector::Kind(kind) => write!(f, "{kind}"),
            RecordKindSelector::All(_) => f.write_str("ALL"),
        }
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    kinds: Vec<KindDescriptor>,
}

/// Capability → kinds mapping, ordered by kind name.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<RecordKind, KindDescriptor>,
}

impl KindRegistry {
    pub fn builder() -> KindRegistryBuilder {
        KindRegistryBuilder::default()
    }

    /// Load `{"kinds": [{"kind": "acme:article", "capabilities": ["node", "indexed"]}]}`.
    pub fn from_json_str(text: &str) -> Result<Self, StateError> {
        let file: RegistryFile =
            serde_json::from_str(text).map_err(|e| StateError::Registry(e.to_string()))?;
        let mut builder = KindRegistry::builder();
        for descriptor in file.kinds {
            builder = builder.descriptor(descriptor);
        }
        Ok(builder.build())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, StateError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StateError::Registry(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn get(&self, kind: &RecordKind) -> Option<&KindDescriptor> {
        self.kinds.get(kind)
    }

    /// All kinds implementing `capability`, in kind order.
    pub fn kinds_with(&self, capability: Capability) -> Vec<RecordKind> {
        self.kinds
            .values()
            .filter(|d| d.implements(capability))
            .map(|d| d.kind.clone())
            .collect()
    }

    /// Fails unless `kind` is registered and implements `capability`.
    pub fn require(&self, kind: &RecordKind, capability: Capability) -> Result<(), StorageError> {
        let descriptor = self.kinds.get(kind).ok_or_else(|| StorageError::UnknownKind {
            kind: kind.to_string(),
        })?;
        if !descriptor.implements(capability) {
            return Err(StorageError::MissingCapability {
                kind: kind.to_string(),
                capability: capability.to_string(),
            });
        }
        Ok(())
    }

    /// Resolve a selector into the concrete kinds a run visits.
    pub fn resolve(
        &self,
        selector: &RecordKindSelector,
        capability: Capability,
    ) -> Result<Vec<RecordKind>, StorageError> {
        match selector {
            RecordKindSelector::Kind(kind) => {
                self.require(kind, capability)?;
                Ok(vec![kind.clone()])
            }
            RecordKindSelector::All(selected) => Ok(self.kinds_with(*selected)),
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct KindRegistryBuilder {
    kinds: BTreeMap<RecordKind, KindDescriptor>,
}

impl KindRegistryBuilder {
    /// Register `kind`; registering the same kind twice merges capabilities.
    pub fn kind(self, kind: RecordKind, capabilities: &[Capability]) -> Self {
        self.descriptor(KindDescriptor {
            kind,
            capabilities: capabilities.to_vec(),
            description: None,
        })
    }

    pub fn descriptor(mut self, descriptor: KindDescriptor) -> Self {
        let entry = self
            .kinds
            .entry(descriptor.kind.clone())
            .or_insert_with(|| KindDescriptor {
                kind: descriptor.kind.clone(),
                capabilities: Vec::new(),
                description: None,
            });
        for cap in descriptor.capabilities {
            if !entry.capabilities.contains(&cap) {
                entry.capabilities.push(cap);
            }
        }
        entry.capabilities.sort();
        if descriptor.description.is_some() {
            entry.description = descriptor.description;
        }
        self
    }

    pub fn build(self) -> KindRegistry {
        KindRegistry { kinds: self.kinds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(s: &str) -> RecordKind {
        s.parse().unwrap()
    }

    fn registry() -> KindRegistry {
        KindRegistry::builder()
            .kind(kind("acme:video"), &[Capability::Node, Capability::Indexed])
            .kind(kind("acme:article"), &[Capability::Node, Capability::Indexed])
            .kind(kind("acme:redirect"), &[Capability::Node])
            .build()
    }

    #[test]
    fn all_selector_returns_capable_kinds_in_order() {
        let reg = registry();
        let kinds = reg
            .resolve(&RecordKindSelector::All(Capability::Indexed), Capability::Indexed)
            .unwrap();
        assert_eq!(kinds, vec![kind("acme:article"), kind("acme:video")]);

        let nodes = reg.kinds_with(Capability::Node);
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn single_kind_must_implement_capability() {
        let reg = registry();
        let err = reg
            .resolve(
                &RecordKindSelector::Kind(kind("acme:redirect")),
                Capability::Indexed,
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingCapability { .. }));

        let err = reg
            .resolve(&RecordKindSelector::Kind(kind("acme:poll")), Capability::Node)
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownKind { .. }));
    }

    #[test]
    fn duplicate_registration_merges_capabilities() {
        let reg = KindRegistry::builder()
            .kind(kind("acme:article"), &[Capability::Indexed])
            .kind(kind("acme:article"), &[Capability::Node])
            .build();
        let d = reg.get(&kind("acme:article")).unwrap();
        assert_eq!(d.capabilities, vec![Capability::Node, Capability::Indexed]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn loads_from_json() {
        let reg = KindRegistry::from_json_str(
            r#"{"kinds": [
                {"kind": "acme:article", "capabilities": ["node", "indexed"], "description": "News"},
                {"kind": "acme:redirect", "capabilities": ["node"]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(reg.kinds_with(Capability::Indexed), vec![kind("acme:article")]);
        assert_eq!(
            reg.get(&kind("acme:article")).unwrap().description.as_deref(),
            Some("News")
        );
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(KindRegistry::from_json_str(r#"{"kinds": [{"kind": "bad"}]}"#).is_err());
    }

    #[test]
    fn selector_display() {
        assert_eq!(RecordKindSelector::All(Capability::Node).to_string(), "ALL");
        assert_eq!(
            RecordKindSelector::Kind(kind("acme:article")).to_string(),
            "acme:article"
        );
    }
}
