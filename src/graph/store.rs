//! Account-relationship store.
//!
//! Every edge between two accounts lives in one [`Relationship`] document keyed
//! by the unordered pair, so each transition is a single write. The record keeps
//! one [`SideFlags`] per account, mirroring that account's `followers`,
//! `following` and `followRequests` sets; the two halves of an edge are stored
//! separately and read separately.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ordered_pair, relationship_key, relationship_pair, RELATIONSHIP_PREFIX};
use crate::core::errors::ApiError;
use crate::core::helpers::now_iso;
use crate::core::kv::{KvStore, KvStoreExt};
use crate::users::require_account;

/// One account's view of its relation to the other member of a pair.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SideFlags {
    /// The other account is in this account's `followers`.
    pub follower: bool,
    /// The other account is in this account's `following`.
    pub following: bool,
    /// The other account is in this account's `followRequests`.
    pub requested: bool,
}

impl SideFlags {
    fn is_empty(&self) -> bool {
        !self.follower && !self.following && !self.requested
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub low: String,
    pub high: String,
    pub low_side: SideFlags,
    pub high_side: SideFlags,
    pub updated_at: Option<String>,
}

impl Relationship {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = ordered_pair(a, b);
        Self {
            low: low.to_string(),
            high: high.to_string(),
            low_side: SideFlags::default(),
            high_side: SideFlags::default(),
            updated_at: None,
        }
    }

    /// Flags stored on `account`'s side of the pair.
    pub fn side(&self, account: &str) -> &SideFlags {
        if account == self.low {
            &self.low_side
        } else {
            &self.high_side
        }
    }

    fn side_mut(&mut self, account: &str) -> &mut SideFlags {
        if account == self.low {
            &mut self.low_side
        } else {
            &mut self.high_side
        }
    }

    fn set_follows(&mut self, subject: &str, object: &str, on: bool) {
        self.side_mut(subject).following = on;
        self.side_mut(object).follower = on;
    }

    fn is_empty(&self) -> bool {
        self.low_side.is_empty() && self.high_side.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FollowDecision {
    Accept,
    Reject,
}

/// Relation between two accounts as seen by the first one.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationState {
    None,
    Requested,
    OneWay,
    Mutual,
}

/// The three per-account sets, materialized.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountEdges {
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub follow_requests: Vec<String>,
}

pub struct RelationshipStore<'a> {
    store: &'a dyn KvStore,
}

impl<'a> RelationshipStore<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    pub fn load(&self, a: &str, b: &str) -> anyhow::Result<Relationship> {
        Ok(self
            .store
            .get_json(&relationship_key(a, b))?
            .unwrap_or_else(|| Relationship::new(a, b)))
    }

    fn save(&self, rel: &mut Relationship) -> anyhow::Result<()> {
        let key = relationship_key(&rel.low, &rel.high);
        if rel.is_empty() {
            return self.store.delete(&key);
        }
        rel.updated_at = Some(now_iso());
        self.store.set_json(&key, rel)
    }

    /// Load the pair record, apply `change`, and write it back once.
    fn transition<R>(
        &self,
        target: &str,
        actor: &str,
        change: impl FnOnce(&mut Relationship) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        if target == actor {
            return Err(ApiError::bad_request("Cannot target your own account"));
        }
        require_account(self.store, target)?;
        require_account(self.store, actor)?;

        let mut rel = self.load(target, actor)?;
        let before = rel.clone();
        let out = change(&mut rel)?;
        if rel != before {
            self.save(&mut rel)?;
        }
        Ok(out)
    }

    /// `follower` starts following `target`.
    pub fn add_follower(&self, target: &str, follower: &str) -> Result<(), ApiError> {
        self.transition(target, follower, |rel| {
            rel.set_follows(follower, target, true);
            Ok(())
        })?;
        debug!(target_id = target, follower_id = follower, "follower added");
        Ok(())
    }

    pub fn remove_follower(&self, target: &str, follower: &str) -> Result<(), ApiError> {
        self.transition(target, follower, |rel| {
            rel.set_follows(follower, target, false);
            Ok(())
        })?;
        debug!(target_id = target, follower_id = follower, "follower removed");
        Ok(())
    }

    /// Returns false when the request was already pending.
    pub fn add_follow_request(&self, target: &str, requester: &str) -> Result<bool, ApiError> {
        let inserted = self.transition(target, requester, |rel| {
            let side = rel.side_mut(target);
            let inserted = !side.requested;
            side.requested = true;
            Ok(inserted)
        })?;
        debug!(target_id = target, requester_id = requester, inserted, "follow request recorded");
        Ok(inserted)
    }

    /// Withdraw a pending request. Returns false when none was pending.
    pub fn cancel_follow_request(&self, target: &str, requester: &str) -> Result<bool, ApiError> {
        self.transition(target, requester, |rel| {
            let side = rel.side_mut(target);
            let was_pending = side.requested;
            side.requested = false;
            Ok(was_pending)
        })
    }

    /// Accept moves `requester` into `target`'s followers; reject only drops the request.
    pub fn resolve_follow_request(
        &self,
        target: &str,
        requester: &str,
        decision: FollowDecision,
    ) -> Result<(), ApiError> {
        self.transition(target, requester, |rel| {
            if !rel.side(target).requested {
                return Err(ApiError::forbidden("No such follow request"));
            }
            rel.side_mut(target).requested = false;
            if decision == FollowDecision::Accept {
                rel.set_follows(requester, target, true);
            }
            Ok(())
        })?;
        debug!(target_id = target, requester_id = requester, ?decision, "follow request resolved");
        Ok(())
    }

    /// Both accounts follow each other; pending requests between them are cleared.
    pub fn follow_mutually(&self, a: &str, b: &str) -> Result<(), ApiError> {
        self.transition(b, a, |rel| {
            rel.set_follows(a, b, true);
            rel.set_follows(b, a, true);
            rel.side_mut(a).requested = false;
            rel.side_mut(b).requested = false;
            Ok(())
        })?;
        debug!(a_id = a, b_id = b, "mutual follow established");
        Ok(())
    }

    /// Remove follow edges in both directions.
    pub fn sever(&self, a: &str, b: &str) -> Result<(), ApiError> {
        self.transition(b, a, |rel| {
            rel.set_follows(a, b, false);
            rel.set_follows(b, a, false);
            Ok(())
        })?;
        debug!(a_id = a, b_id = b, "follow edges removed");
        Ok(())
    }

    /// `candidate` is in `account`'s followers.
    pub fn is_follower(&self, account: &str, candidate: &str) -> anyhow::Result<bool> {
        if account == candidate {
            return Ok(false);
        }
        Ok(self.load(account, candidate)?.side(account).follower)
    }

    /// `candidate` is in `account`'s following.
    pub fn is_following(&self, account: &str, candidate: &str) -> anyhow::Result<bool> {
        if account == candidate {
            return Ok(false);
        }
        Ok(self.load(account, candidate)?.side(account).following)
    }

    pub fn has_requested(&self, target: &str, requester: &str) -> anyhow::Result<bool> {
        if target == requester {
            return Ok(false);
        }
        Ok(self.load(target, requester)?.side(target).requested)
    }

    pub fn relation_state(&self, actor: &str, target: &str) -> anyhow::Result<RelationState> {
        if actor == target {
            return Ok(RelationState::None);
        }
        let rel = self.load(actor, target)?;
        let (a, t) = (rel.side(actor), rel.side(target));
        let state = if a.follower && a.following && t.follower && t.following {
            RelationState::Mutual
        } else if t.requested {
            RelationState::Requested
        } else if a.follower || a.following || t.follower || t.following {
            RelationState::OneWay
        } else {
            RelationState::None
        };
        Ok(state)
    }

    /// Every stored pair record, read in one key scan.
    fn records(&self) -> anyhow::Result<Vec<Relationship>> {
        let mut out = Vec::new();
        for key in self.store.scan_keys(RELATIONSHIP_PREFIX)? {
            if let Some(rel) = self.store.get_json::<Relationship>(&key)? {
                out.push(rel);
            }
        }
        Ok(out)
    }

    /// Materialize `account`'s three sets. Only records naming `account` are read.
    pub fn edges(&self, account: &str) -> anyhow::Result<AccountEdges> {
        let mut edges = AccountEdges::default();
        for key in self.store.scan_keys(RELATIONSHIP_PREFIX)? {
            let other = match relationship_pair(&key) {
                Some((low, high)) if low == account => high.to_string(),
                Some((low, high)) if high == account => low.to_string(),
                _ => continue,
            };
            let Some(rel) = self.store.get_json::<Relationship>(&key)? else {
                continue;
            };
            let side = rel.side(account);
            if side.follower {
                edges.followers.push(other.clone());
            }
            if side.following {
                edges.following.push(other.clone());
            }
            if side.requested {
                edges.follow_requests.push(other);
            }
        }
        Ok(edges)
    }

    /// Follower count per account, tallied over all records in a single pass.
    /// Accounts without followers are absent.
    pub fn follower_counts(&self) -> anyhow::Result<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        for rel in self.records()? {
            if rel.low_side.follower {
                *counts.entry(rel.low.clone()).or_insert(0) += 1;
            }
            if rel.high_side.follower {
                *counts.entry(rel.high).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
