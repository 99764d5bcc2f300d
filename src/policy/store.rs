//! Prefix trie of initialization directives keyed by qualified names
//!
//! Directives arrive ordered from the configuration surface and may name a
//! single class (`com.example.Registry`) or a whole package prefix
//! (`com.example`). Lookups return the most specific registered kind along
//! the path. Mutation is only legal inside an unsealed window; once the
//! store is sealed, inserts fail fast so late configuration cannot sneak in
//! behind the resolver's back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use rustc_hash::FxHashMap;

use super::kind::InitKind;
use crate::consts::{POLICY_MAX_REASONS, POLICY_MAX_SEGMENTS};
use crate::error::{Error, Result};

/// One ordered configuration directive
#[derive(Debug, Clone)]
pub struct PolicyDirective {
    pub qualifier: String,
    pub kind: InitKind,
    pub reason: String,
    pub strict: bool,
}

impl PolicyDirective {
    pub fn new(
        qualifier: impl Into<String>,
        kind: InitKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            qualifier: qualifier.into(),
            kind,
            reason: reason.into(),
            strict: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Result of a policy lookup
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// Registered kind, if any node along the path carries one
    pub kind: Option<InitKind>,
    /// Strictness of the node that supplied `kind`
    pub strict: bool,
    /// True when `kind` came from a node matching the full qualifier rather
    /// than a package prefix
    pub exact: bool,
    /// Reasons recorded on the supplying node
    pub reasons: Vec<Arc<str>>,
}

impl PolicyDecision {
    fn absent() -> Self {
        Self { kind: None, strict: false, exact: false, reasons: Vec::new() }
    }

    /// Registered kind, defaulting to run time when nothing matched
    pub fn kind_or_default(&self) -> InitKind {
        self.kind.unwrap_or(InitKind::RunTime)
    }

    /// True when the policy demands exactly `kind` and marked it strict
    pub fn is_strictly(&self, kind: InitKind) -> bool {
        self.strict && self.kind == Some(kind)
    }
}

#[derive(Debug)]
struct PolicyEntry {
    kind: InitKind,
    strict: bool,
    reasons: Vec<Arc<str>>,
    collapsed: bool,
}

impl PolicyEntry {
    fn append_reason(&mut self, reason: &str) {
        if self.collapsed {
            return;
        }
        if self.reasons.iter().any(|r| r.as_ref() == reason) {
            return;
        }
        if self.reasons.len() < POLICY_MAX_REASONS {
            self.reasons.push(Arc::from(reason));
        } else {
            self.reasons.push(Arc::from("others"));
            self.collapsed = true;
        }
    }

    fn joined_reasons(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.as_ref())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

#[derive(Debug)]
struct PolicyNode {
    /// Back-reference for lookup's ascent; the arena owns all nodes
    parent: Option<usize>,
    children: FxHashMap<String, usize>,
    entry: Option<PolicyEntry>,
}

impl PolicyNode {
    fn new(parent: Option<usize>) -> Self {
        Self { parent, children: FxHashMap::default(), entry: None }
    }
}

#[derive(Debug)]
struct Trie {
    nodes: Vec<PolicyNode>,
}

impl Trie {
    fn new() -> Self {
        Self { nodes: vec![PolicyNode::new(None)] }
    }
}

/// Concurrent policy trie with a sealable mutation window
pub struct PolicyStore {
    trie: RwLock<Trie>,
    sealed: AtomicBool,
    window: ReentrantMutex<()>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    /// A fresh store starts unsealed for the initial population phase
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(Trie::new()),
            sealed: AtomicBool::new(false),
            window: ReentrantMutex::new(()),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Close the store for mutation. Later inserts must go through
    /// [`PolicyStore::unsealed`].
    pub fn seal(&self) {
        let _window = self.window.lock();
        self.sealed.store(true, Ordering::Release);
    }

    /// Run `f` inside an unsealed window. The window is a process-wide
    /// blocking critical section, reentrant for the owning thread; the
    /// previous seal state is restored when the window closes.
    pub fn unsealed<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let _window = self.window.lock();
        let was_sealed = self.sealed.swap(false, Ordering::AcqRel);
        let result = f(self);
        self.sealed.store(was_sealed, Ordering::Release);
        result
    }

    /// Apply ordered directives inside one unsealed window
    pub fn apply(&self, directives: &[PolicyDirective]) -> Result<()> {
        self.unsealed(|store| {
            for d in directives {
                store.insert(&d.qualifier, d.kind, &d.reason, d.strict)?;
            }
            Ok(())
        })
    }

    /// Register `kind` for a class or package qualifier.
    ///
    /// Re-registering the same kind appends the reason. A conflicting kind
    /// widens via `max` when neither side is strict; when either side is
    /// strict the conflict is fatal, because a strict demand must never be
    /// silently overridden.
    pub fn insert(
        &self,
        qualifier: &str,
        kind: InitKind,
        reason: &str,
        strict: bool,
    ) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::policy(format!(
                "policy store is sealed; cannot register {} as {}",
                qualifier, kind
            )));
        }
        let segments = split_qualifier(qualifier)?;
        let mut trie = self.trie.write();
        let mut node = 0usize;
        for segment in segments {
            let existing = trie.nodes[node].children.get(segment).copied();
            node = match existing {
                Some(child) => child,
                None => {
                    let child = trie.nodes.len();
                    trie.nodes.push(PolicyNode::new(Some(node)));
                    trie.nodes[node].children.insert(segment.to_string(), child);
                    child
                }
            };
        }
        match &mut trie.nodes[node].entry {
            slot @ None => {
                *slot = Some(PolicyEntry {
                    kind,
                    strict,
                    reasons: vec![Arc::from(reason)],
                    collapsed: false,
                });
            }
            Some(entry) if entry.kind == kind => {
                entry.strict |= strict;
                entry.append_reason(reason);
            }
            Some(entry) => {
                if entry.strict || strict {
                    return Err(Error::config_conflict(format!(
                        "{} was requested {} ({}) but was already registered {} ({})",
                        qualifier,
                        kind,
                        reason,
                        entry.kind,
                        entry.joined_reasons()
                    )));
                }
                entry.kind = entry.kind.max(kind);
                entry.append_reason(reason);
            }
        }
        log::debug!(
            "POLICY: registered {} as {} (strict: {}, reason: {})",
            qualifier,
            kind,
            strict,
            reason
        );
        Ok(())
    }

    /// Find the most specific registered kind along the qualifier's path
    pub fn lookup(&self, qualifier: &str) -> PolicyDecision {
        let segments = match split_qualifier(qualifier) {
            Ok(segments) => segments,
            Err(_) => return PolicyDecision::absent(),
        };
        let trie = self.trie.read();
        let mut node = 0usize;
        let mut depth = 0usize;
        for segment in &segments {
            match trie.nodes[node].children.get(*segment) {
                Some(&child) => {
                    node = child;
                    depth += 1;
                }
                None => break,
            }
        }
        // Ascend from the deepest matched node to the nearest node carrying
        // an entry; only an entry on the full-path node itself is exact
        let full_match = depth == segments.len();
        let mut at_matched_node = true;
        let mut cursor = Some(node);
        while let Some(index) = cursor {
            if let Some(entry) = trie.nodes[index].entry.as_ref() {
                return PolicyDecision {
                    kind: Some(entry.kind),
                    strict: entry.strict,
                    exact: at_matched_node && full_match,
                    reasons: entry.reasons.clone(),
                };
            }
            at_matched_node = false;
            cursor = trie.nodes[index].parent;
        }
        PolicyDecision::absent()
    }
}

fn split_qualifier(qualifier: &str) -> Result<Vec<&str>> {
    if qualifier.is_empty() {
        return Err(Error::policy("empty qualifier"));
    }
    let segments: Vec<&str> = qualifier.split('.').collect();
    if segments.len() > POLICY_MAX_SEGMENTS {
        return Err(Error::policy(format!(
            "qualifier {} exceeds {} segments",
            qualifier, POLICY_MAX_SEGMENTS
        )));
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::policy(format!(
            "qualifier {} contains an empty segment",
            qualifier
        )));
    }
    Ok(segments)
}
