//! Identity resolution
//!
//! Maps a set of provider-typed identity hints to one canonical user within
//! a tenant, creating or merging users as necessary. The merge path picks
//! the oldest user as the survivor and re-parents every dependent row in a
//! single transaction; retries are safe because binds are `ON CONFLICT DO
//! NOTHING` and re-parenting already-re-parented rows changes nothing.

use crate::error::{IngestionError, IngestionResult};
use revback_database::Repositories;
use revback_shared::IdentityHint;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Resolves identity hints to a canonical user id
#[derive(Clone)]
pub struct IdentityResolver {
    repos: Repositories,
}

impl IdentityResolver {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Resolve a non-empty hint list to one user id.
    pub async fn resolve(&self, org_id: Uuid, hints: &[IdentityHint]) -> IngestionResult<Uuid> {
        if hints.is_empty() {
            return Err(IngestionError::internal(
                "identity resolution requires at least one hint",
            ));
        }

        let mut matched_users: BTreeSet<Uuid> = BTreeSet::new();
        for hint in hints {
            if let Some(identity) = self
                .repos
                .users
                .find_identity(org_id, hint.source.as_str(), &hint.external_id)
                .await?
            {
                matched_users.insert(identity.user_id);
            }
        }

        let user_id = match matched_users.len() {
            0 => {
                let email = hints
                    .iter()
                    .find(|h| h.id_type == revback_shared::IdType::Email)
                    .map(|h| h.external_id.as_str());
                let user = self.repos.users.create(org_id, email).await?;
                debug!(org_id = %org_id, user_id = %user.id, "created user for new identities");
                user.id
            }
            1 => *matched_users.iter().next().expect("one element"),
            _ => self.merge(org_id, &matched_users).await?,
        };

        // bind any hints not yet attached; duplicates are no-ops
        for hint in hints {
            self.repos.users.bind_identity(org_id, user_id, hint).await?;
        }

        Ok(user_id)
    }

    /// Merge all matched users into the oldest one
    async fn merge(&self, org_id: Uuid, matched: &BTreeSet<Uuid>) -> IngestionResult<Uuid> {
        let mut users = Vec::with_capacity(matched.len());
        for id in matched {
            let user = self
                .repos
                .users
                .find_by_id(org_id, *id)
                .await?
                .ok_or_else(|| IngestionError::internal("matched user vanished during merge"))?;
            users.push(user);
        }
        users.sort_by_key(|u| u.created_at);

        let survivor = users.first().expect("at least two users").id;
        let losers: Vec<Uuid> = users.iter().skip(1).map(|u| u.id).collect();

        let outcome = self
            .repos
            .users
            .merge_users(org_id, survivor, &losers)
            .await?;

        self.repos
            .audit
            .append(
                org_id,
                "system",
                "identity-resolver",
                "user.merged",
                "user",
                Some(survivor.to_string()),
                json!({
                    "survivor_id": outcome.survivor_id,
                    "merged_ids": outcome.merged_ids,
                }),
            )
            .await?;

        info!(
            org_id = %org_id,
            survivor = %survivor,
            merged = losers.len(),
            "identity merge completed"
        );
        Ok(survivor)
    }
}
