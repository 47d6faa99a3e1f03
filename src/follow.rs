//! Follow graph.
//!
//! Edges live in one relation (`follows`, id `{follower}:{followee}`) indexed
//! from both ends, so "who do I follow" and "who follows me" are two lookups
//! over the same documents and cannot disagree. Each follow or unfollow is a
//! single document write; the deterministic id makes retries idempotent.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::*;
use crate::core::errors::DomainError;
use crate::core::store::{find_records, insert_record, DocumentStore, Filter, StoreError};
use crate::models::models::{FollowEdge, User};
use crate::users::UserDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowOutcome {
    Followed,
    AlreadyFollowing,
    Unfollowed,
    NotFollowing,
}

impl FollowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowOutcome::Followed => "followed",
            FollowOutcome::AlreadyFollowing => "already_following",
            FollowOutcome::Unfollowed => "unfollowed",
            FollowOutcome::NotFollowing => "not_following",
        }
    }
}

pub struct FollowGraph<'a, S: ?Sized> {
    store: &'a S,
    attempts: u32,
}

impl<'a, S: DocumentStore + ?Sized> FollowGraph<'a, S> {
    pub fn new(store: &'a S, attempts: u32) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
        }
    }

    /// Follow `target_username` on behalf of `actor_id`.
    pub fn follow(&self, actor_id: &str, target_username: &str, now: DateTime<Utc>) -> Result<FollowOutcome, DomainError> {
        let target = UserDirectory::new(self.store).get_by_username(target_username)?;
        self.follow_user(actor_id, &target, now)
    }

    pub fn unfollow(&self, actor_id: &str, target_username: &str) -> Result<FollowOutcome, DomainError> {
        let target = UserDirectory::new(self.store).get_by_username(target_username)?;
        self.unfollow_user(actor_id, &target)
    }

    pub fn follow_user(&self, actor_id: &str, target: &User, now: DateTime<Utc>) -> Result<FollowOutcome, DomainError> {
        if actor_id == target.id {
            return Err(DomainError::SelfReferenceRejected { action: "follow" });
        }
        let edge_id = follow_edge_id(actor_id, &target.id);
        if self.is_following(actor_id, &target.id)? {
            // relist an edge left unlisted by an earlier failure
            self.store.repair(FOLLOWS, &edge_id)?;
            return Ok(FollowOutcome::AlreadyFollowing);
        }

        let edge = FollowEdge {
            id: edge_id,
            follower_id: actor_id.to_string(),
            followee_id: target.id.clone(),
            created_at: now,
        };

        let mut first = true;
        let written = self.with_retries(&edge.id, || {
            let attempt = insert_record(self.store, FOLLOWS, &edge);
            let retried = !first;
            first = false;
            match attempt {
                // an earlier attempt landed before failing
                Err(StoreError::DuplicateKey { .. }) if retried => Ok(()),
                other => other,
            }
        });

        match written {
            Ok(()) => {
                log::info!("{} now follows {}", actor_id, target.id);
                Ok(FollowOutcome::Followed)
            }
            Err(StoreError::DuplicateKey { .. }) => Ok(FollowOutcome::AlreadyFollowing),
            Err(e) => Err(e.into()),
        }
    }

    pub fn unfollow_user(&self, actor_id: &str, target: &User) -> Result<FollowOutcome, DomainError> {
        if actor_id == target.id {
            return Err(DomainError::SelfReferenceRejected { action: "unfollow" });
        }

        let edge_id = follow_edge_id(actor_id, &target.id);
        let mut removed = false;
        self.with_retries(&edge_id, || {
            removed |= self.store.delete(FOLLOWS, &edge_id)?;
            Ok(())
        })?;

        if removed {
            log::info!("{} unfollowed {}", actor_id, target.id);
            Ok(FollowOutcome::Unfollowed)
        } else {
            Ok(FollowOutcome::NotFollowing)
        }
    }

    pub fn is_following(&self, actor_id: &str, target_id: &str) -> Result<bool, DomainError> {
        Ok(self
            .store
            .find_one(FOLLOWS, &follow_edge_id(actor_id, target_id))?
            .is_some())
    }

    /// Ids `user_id` follows, oldest edge first.
    pub fn following(&self, user_id: &str) -> Result<Vec<String>, DomainError> {
        let mut edges: Vec<FollowEdge> = find_records(self.store, FOLLOWS, &Filter::eq("follower_id", user_id))?;
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(edges.into_iter().map(|e| e.followee_id).collect())
    }

    /// Ids following `user_id`, oldest edge first.
    pub fn followers(&self, user_id: &str) -> Result<Vec<String>, DomainError> {
        let mut edges: Vec<FollowEdge> = find_records(self.store, FOLLOWS, &Filter::eq("followee_id", user_id))?;
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(edges.into_iter().map(|e| e.follower_id).collect())
    }

    pub fn following_count(&self, user_id: &str) -> Result<usize, DomainError> {
        Ok(self.store.count(FOLLOWS, &Filter::eq("follower_id", user_id))?)
    }

    pub fn follower_count(&self, user_id: &str) -> Result<usize, DomainError> {
        Ok(self.store.count(FOLLOWS, &Filter::eq("followee_id", user_id))?)
    }

    /// Run an edge write up to `attempts` times while the store reports transient failures.
    ///
    /// Giving up triggers one repair of the edge so its listings match whatever
    /// the store holds. A partial write still has its edge document in place;
    /// it is logged and treated as applied.
    fn with_retries<F>(&self, edge_id: &str, mut op: F) -> Result<(), StoreError>
    where
        F: FnMut() -> Result<(), StoreError>,
    {
        let mut attempt = 1;
        loop {
            let err = match op() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    log::debug!("edge {} write attempt {} failed: {}", edge_id, attempt, e);
                    attempt += 1;
                    continue;
                }
                Err(e) => e,
            };

            if err.is_transient() {
                if let Err(e) = self.store.repair(FOLLOWS, edge_id) {
                    log::warn!("follow edge {} repair failed: {}", edge_id, e);
                }
            }
            match err {
                StoreError::PartialWrite { collection, id, source } => {
                    log::warn!(
                        "follow edge {} diverged after {} attempts ({}/{}): {}",
                        edge_id,
                        attempt,
                        collection,
                        id,
                        source
                    );
                    return Ok(());
                }
                other => return Err(other),
            }
        }
    }
}
