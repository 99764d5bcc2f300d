//! Scratch state for one top-level simulation attempt.
//!
//! Classes that become entangled through cyclic initializer dependencies are
//! collected into one cluster and decided together: either every member
//! publishes its simulated values or every member publishes a failure.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::classfile::{FieldRef, TypeRef};
use crate::consts::SIM_MAX_REASONS;

use super::heap::SimHeap;
use super::value::SimValue;

#[derive(Eq, PartialEq, Hash, Copy, Clone, Debug)]
pub struct MemberId(u32);

impl MemberId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum MemberStatus {
    /// Interpretation has not finished; dependency edges are still appearing
    CollectingDependencies,
    /// Interpretation finished, waiting for the rest of its cycle
    InitCandidate,
    PublishedSimulated,
    PublishedFailed,
}

impl MemberStatus {
    pub fn is_published(&self) -> bool {
        matches!(
            self,
            MemberStatus::PublishedSimulated | MemberStatus::PublishedFailed
        )
    }
}

pub struct ClusterMember {
    pub class: TypeRef,
    pub status: MemberStatus,
    pub dependencies: FxHashSet<MemberId>,
    /// Why this member cannot be simulated; empty means clean so far
    pub reasons: Vec<String>,
    /// Shadow copy of the class's static fields as interpretation sees them
    pub static_values: FxHashMap<FieldRef, SimValue>,
}

pub struct Cluster {
    members: Vec<ClusterMember>,
    by_class: FxHashMap<TypeRef, MemberId>,
    pub heap: SimHeap,
}

impl Cluster {
    pub fn new() -> Self {
        Cluster {
            members: Vec::new(),
            by_class: FxHashMap::default(),
            heap: SimHeap::new(),
        }
    }

    pub fn member_of(&self, class: TypeRef) -> Option<MemberId> {
        self.by_class.get(&class).copied()
    }

    pub fn add_member(&mut self, class: TypeRef) -> MemberId {
        let id = MemberId(self.members.len() as u32);
        self.members.push(ClusterMember {
            class,
            status: MemberStatus::CollectingDependencies,
            dependencies: FxHashSet::default(),
            reasons: Vec::new(),
            static_values: FxHashMap::default(),
        });
        self.by_class.insert(class, id);
        id
    }

    pub fn member(&self, id: MemberId) -> &ClusterMember {
        &self.members[id.index()]
    }

    pub fn member_mut(&mut self, id: MemberId) -> &mut ClusterMember {
        &mut self.members[id.index()]
    }

    pub fn add_dependency(&mut self, from: MemberId, to: MemberId) {
        if from != to {
            self.member_mut(from).dependencies.insert(to);
        }
    }

    /// Record a reason the member cannot be simulated. Duplicates are
    /// dropped and the list is capped. Returns false once the cap is hit.
    pub fn push_reason(&mut self, id: MemberId, reason: String) -> bool {
        let member = self.member_mut(id);
        if member.reasons.iter().any(|r| *r == reason) {
            return member.reasons.len() < SIM_MAX_REASONS;
        }
        if member.reasons.len() >= SIM_MAX_REASONS {
            return false;
        }
        member.reasons.push(reason);
        member.reasons.len() < SIM_MAX_REASONS
    }

    pub fn reasons_full(&self, id: MemberId) -> bool {
        self.member(id).reasons.len() >= SIM_MAX_REASONS
    }

    /// Members reachable from `start` over dependency edges, `start` included
    pub fn closure(&self, start: MemberId) -> Vec<MemberId> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            for dep in &self.member(id).dependencies {
                stack.push(*dep);
            }
        }
        out
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_follows_dependency_cycle() {
        let mut cluster = Cluster::new();
        let a = cluster.add_member(TypeRef::new(1));
        let b = cluster.add_member(TypeRef::new(2));
        let c = cluster.add_member(TypeRef::new(3));
        cluster.add_dependency(a, b);
        cluster.add_dependency(b, a);
        cluster.add_dependency(b, c);
        let mut closure = cluster.closure(a);
        closure.sort_by_key(|m| m.index());
        assert_eq!(closure, vec![a, b, c]);
        assert!(cluster.closure(c).len() == 1);
    }

    #[test]
    fn test_reason_cap_and_dedup() {
        let mut cluster = Cluster::new();
        let m = cluster.add_member(TypeRef::new(1));
        for i in 0..SIM_MAX_REASONS + 4 {
            cluster.push_reason(m, format!("reason {}", i % 2));
        }
        assert_eq!(cluster.member(m).reasons.len(), 2);
        assert!(!cluster.reasons_full(m));
    }
}
