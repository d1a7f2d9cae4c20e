//! Dispatch policies: nine variants factored as three independent axes
//! (spec §4.3).

use crate::ids::{IdSet, NodeId};
use crate::member::MemberSnapshot;

/// Topology: how targets are sequenced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Topology {
    Unicast,
    Ring,
}

/// Success rule applied per key once `synced`/`failed` are known.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuccessRule {
    Plain,
    Quorum,
    /// Unicast-only; success iff any one peer accepts (`|failed| == 0`
    /// is NOT the rule — see [`SuccessRule::evaluate`]).
    OneOf,
}

/// One of the nine dispatch policy variants (spec §4.3's 3x3 table, minus
/// the combinations the spec explicitly excludes: `ONE_OF` never combines
/// with quorum or ring, and `BALANCE` is a filter layered on unicast or
/// ring rather than a topology of its own).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchPolicy {
    UnicastPlain,
    UnicastQuorum,
    UnicastOneOf,
    RingPlain,
    RingQuorum,
    UnicastBalance,
    UnicastBalanceQuorum,
    RingBalance,
    RingBalanceQuorum,
}

impl DispatchPolicy {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => DispatchPolicy::UnicastPlain,
            1 => DispatchPolicy::UnicastQuorum,
            2 => DispatchPolicy::UnicastOneOf,
            3 => DispatchPolicy::RingPlain,
            4 => DispatchPolicy::RingQuorum,
            5 => DispatchPolicy::UnicastBalance,
            6 => DispatchPolicy::UnicastBalanceQuorum,
            7 => DispatchPolicy::RingBalance,
            8 => DispatchPolicy::RingBalanceQuorum,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DispatchPolicy::UnicastPlain => 0,
            DispatchPolicy::UnicastQuorum => 1,
            DispatchPolicy::UnicastOneOf => 2,
            DispatchPolicy::RingPlain => 3,
            DispatchPolicy::RingQuorum => 4,
            DispatchPolicy::UnicastBalance => 5,
            DispatchPolicy::UnicastBalanceQuorum => 6,
            DispatchPolicy::RingBalance => 7,
            DispatchPolicy::RingBalanceQuorum => 8,
        }
    }

    pub fn topology(self) -> Topology {
        match self {
            DispatchPolicy::UnicastPlain
            | DispatchPolicy::UnicastQuorum
            | DispatchPolicy::UnicastOneOf
            | DispatchPolicy::UnicastBalance
            | DispatchPolicy::UnicastBalanceQuorum => Topology::Unicast,
            DispatchPolicy::RingPlain
            | DispatchPolicy::RingQuorum
            | DispatchPolicy::RingBalance
            | DispatchPolicy::RingBalanceQuorum => Topology::Ring,
        }
    }

    pub fn success_rule(self) -> SuccessRule {
        match self {
            DispatchPolicy::UnicastPlain
            | DispatchPolicy::RingPlain
            | DispatchPolicy::UnicastBalance
            | DispatchPolicy::RingBalance => SuccessRule::Plain,
            DispatchPolicy::UnicastQuorum
            | DispatchPolicy::RingQuorum
            | DispatchPolicy::UnicastBalanceQuorum
            | DispatchPolicy::RingBalanceQuorum => SuccessRule::Quorum,
            DispatchPolicy::UnicastOneOf => SuccessRule::OneOf,
        }
    }

    pub fn is_balance(self) -> bool {
        matches!(
            self,
            DispatchPolicy::UnicastBalance
                | DispatchPolicy::UnicastBalanceQuorum
                | DispatchPolicy::RingBalance
                | DispatchPolicy::RingBalanceQuorum
        )
    }

    /// The plain (non-balance) variant with the same topology and success
    /// rule; used when a balance variant spawns a plain sub-orchestrator
    /// per unaware-set group (spec §4.7.1).
    pub fn underlying_plain(self) -> DispatchPolicy {
        match self {
            DispatchPolicy::UnicastBalance => DispatchPolicy::UnicastPlain,
            DispatchPolicy::UnicastBalanceQuorum => DispatchPolicy::UnicastQuorum,
            DispatchPolicy::RingBalance => DispatchPolicy::RingPlain,
            DispatchPolicy::RingBalanceQuorum => DispatchPolicy::RingQuorum,
            other => other,
        }
    }
}

impl SuccessRule {
    /// Evaluates the success predicate for one key given its target count
    /// and the observed `synced`/`failed` sets (spec §4.3).
    pub fn evaluate(self, targets: usize, synced: usize, failed: usize) -> bool {
        match self {
            SuccessRule::Plain => synced > failed,
            SuccessRule::OneOf => failed == 0 && synced > 0,
            SuccessRule::Quorum => {
                if 2 * failed < targets {
                    true
                } else {
                    2 * synced > targets
                }
            }
        }
    }
}

/// Target selection inputs, mirroring spec §4.3's "inclusive list / exclusion
/// list / full snapshot" rules.
#[derive(Clone, Debug, Default)]
pub struct TargetSelector {
    pub include: Option<IdSet>,
    pub exclude: Option<IdSet>,
}

impl TargetSelector {
    pub fn include(ids: IdSet) -> Self {
        Self {
            include: Some(ids),
            exclude: None,
        }
    }

    pub fn exclude(ids: IdSet) -> Self {
        Self {
            include: None,
            exclude: Some(ids),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Resolves targets against the current alive snapshot.
    pub fn resolve(&self, alive: &MemberSnapshot) -> IdSet {
        let alive_ids = alive.alive_ids();
        match (&self.include, &self.exclude) {
            (Some(include), _) => alive_ids.intersection(include),
            (None, Some(exclude)) => alive_ids.difference(exclude),
            (None, None) => alive_ids,
        }
    }
}

/// Filters `targets` down to peers whose aware-set does not yet contain
/// `version` for `key` (the BALANCE filter, spec §4.3).
pub fn balance_filter(targets: &IdSet, publication_aware: &IdSet) -> IdSet {
    targets.difference(publication_aware)
}

pub fn resolve_targets(
    policy: DispatchPolicy,
    selector: &TargetSelector,
    alive: &MemberSnapshot,
    publication_aware: Option<&IdSet>,
) -> IdSet {
    let base = selector.resolve(alive);
    if policy.is_balance() {
        if let Some(aware) = publication_aware {
            return balance_filter(&base, aware);
        }
    }
    base
}

/// Ring ordering: deterministic successor lookup among alive ids, used by
/// the ring-forwarding logic (spec §4.3/§4.5 step 8).
pub fn ring_successor(alive_ids: &IdSet, exclude: &IdSet, after: NodeId) -> Option<NodeId> {
    let mut candidates: Vec<NodeId> = alive_ids
        .iter()
        .filter(|id| !exclude.contains(*id))
        .collect();
    candidates.sort_unstable();
    candidates
        .iter()
        .find(|id| **id > after)
        .or_else(|| candidates.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_success_rule() {
        assert!(SuccessRule::Plain.evaluate(3, 2, 1));
        assert!(!SuccessRule::Plain.evaluate(3, 1, 1));
    }

    #[test]
    fn one_of_success_rule() {
        assert!(SuccessRule::OneOf.evaluate(3, 1, 0));
        assert!(!SuccessRule::OneOf.evaluate(3, 1, 1));
    }

    #[test]
    fn quorum_success_rule_s5() {
        // targets=4, failed=1: 2*1=2 < 4 -> success
        assert!(SuccessRule::Quorum.evaluate(4, 0, 1));
    }

    #[test]
    fn quorum_failure_when_half_failed_and_not_half_synced() {
        // targets=4, failed=2: 2*2=4 !< 4; synced=1: 2*1=2 !> 4 -> failure
        assert!(!SuccessRule::Quorum.evaluate(4, 1, 2));
    }

    #[test]
    fn ring_successor_wraps_around() {
        let alive = IdSet::from_iter([1, 2, 3, 4]);
        assert_eq!(ring_successor(&alive, &IdSet::new(), 2), Some(3));
        assert_eq!(ring_successor(&alive, &IdSet::new(), 4), Some(1));
    }

    #[test]
    fn ring_successor_skips_excluded() {
        let alive = IdSet::from_iter([1, 2, 3, 4]);
        let exclude = IdSet::from_iter([3]);
        assert_eq!(ring_successor(&alive, &exclude, 2), Some(4));
    }
}
