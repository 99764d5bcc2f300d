//! Classification diagnostics and the serializable report snapshot
//!
//! Every phase records why it decided what it decided; the snapshot joins
//! those records with class names into a stable, sorted structure that
//! downstream report writers serialize as-is.

use dashmap::DashMap;
use serde::Serialize;

use crate::classfile::TypeRef;
use crate::error::{Error, Result};
use crate::host::HostRuntime;
use crate::policy::InitKind;

/// Where a class's computed kind came from
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize)]
pub enum KindOrigin {
    /// Primitives and arrays initialize trivially
    Trivial,
    /// A registered policy directive decided
    Policy,
    /// Superclass or default-method interface demands pushed the kind up
    HierarchyBound,
    /// The early proof granted build time
    ProvenEarly,
    /// Synthetic type treated as a transparent proxy of its interfaces
    SyntheticProxy,
    /// Nothing demanded anything; the run-time default applies
    Default,
    /// Late safety propagation forced build time under full reachability
    LateForced,
}

/// Simulation outcome summarized for reports
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize)]
pub enum SimStatus {
    NotSimulated,
    Simulated,
    HostedInitialized,
    Failed,
}

#[derive(Debug, Clone)]
struct ClassRecord {
    kind: Option<InitKind>,
    origin: Option<KindOrigin>,
    reasons: Vec<String>,
    simulation: SimStatus,
}

impl ClassRecord {
    fn new() -> Self {
        Self {
            kind: None,
            origin: None,
            reasons: Vec::new(),
            simulation: SimStatus::NotSimulated,
        }
    }
}

/// Concurrent collector the analysis phases write into
pub struct DiagnosticsSink {
    records: DashMap<TypeRef, ClassRecord>,
}

impl Default for DiagnosticsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSink {
    pub fn new() -> Self {
        Self { records: DashMap::new() }
    }

    pub fn record_kind(&self, class: TypeRef, kind: InitKind, origin: KindOrigin) {
        let mut record = self.records.entry(class).or_insert_with(ClassRecord::new);
        record.kind = Some(kind);
        record.origin = Some(origin);
    }

    pub fn push_reason(&self, class: TypeRef, reason: impl Into<String>) {
        let reason = reason.into();
        let mut record = self.records.entry(class).or_insert_with(ClassRecord::new);
        if !record.reasons.contains(&reason) {
            record.reasons.push(reason);
        }
    }

    pub fn record_simulation(&self, class: TypeRef, status: SimStatus) {
        let mut record = self.records.entry(class).or_insert_with(ClassRecord::new);
        record.simulation = status;
    }

    /// Join records with class names into a sorted snapshot
    pub fn snapshot(&self, host: &dyn HostRuntime) -> DiagnosticsSnapshot {
        let mut classes: Vec<ClassDiagnostics> = self
            .records
            .iter()
            .map(|entry| ClassDiagnostics {
                name: host.class_name(*entry.key()).to_string(),
                kind: entry.value().kind,
                origin: entry.value().origin,
                reasons: entry.value().reasons.clone(),
                simulation: entry.value().simulation,
            })
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        DiagnosticsSnapshot { classes }
    }
}

/// One class's classification story
#[derive(Debug, Clone, Serialize)]
pub struct ClassDiagnostics {
    pub name: String,
    pub kind: Option<InitKind>,
    pub origin: Option<KindOrigin>,
    pub reasons: Vec<String>,
    pub simulation: SimStatus,
}

/// Stable, serializable dump of every classified class
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub classes: Vec<ClassDiagnostics>,
}

impl DiagnosticsSnapshot {
    pub fn class(&self, name: &str) -> Option<&ClassDiagnostics> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("diagnostics serialization failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::ClassUniverse;

    #[test]
    fn test_snapshot_is_sorted_and_serializable() {
        let mut u = ClassUniverse::new();
        let b = u.define_class("pkg.Beta");
        let a = u.define_class("pkg.Alpha");
        let sink = DiagnosticsSink::new();
        sink.record_kind(b, InitKind::RunTime, KindOrigin::Default);
        sink.record_kind(a, InitKind::BuildTime, KindOrigin::Policy);
        sink.push_reason(a, "configured by test");
        sink.push_reason(a, "configured by test");
        let snapshot = sink.snapshot(&u);
        assert_eq!(snapshot.classes[0].name, "pkg.Alpha");
        assert_eq!(snapshot.classes[0].reasons.len(), 1);
        assert_eq!(snapshot.classes[1].kind, Some(InitKind::RunTime));
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("pkg.Alpha"));
        assert!(json.contains("BuildTime"));
    }
}
