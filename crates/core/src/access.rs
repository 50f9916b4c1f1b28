//! Registry token access claims and the scope-granting algorithm.
//!
//! An API key carries scopes over `(registry, optional repository)` targets.
//! At the token endpoint the requested `scope=` parameters are intersected
//! with what the key allows; the surviving `(repository, action)` pairs
//! become the bearer token's `access` claim.

use crate::apikey::Permission;
use crate::name::{registry_namespace, repo_leaf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// One entry of a token's `access` claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryAccess {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub actions: Vec<String>,
}

/// The decrypted view of one API key scope: the repository id (if any) has
/// been resolved back to its leaf name for matching.
#[derive(Clone, Debug)]
pub struct KeyScope {
    pub registry_id: Uuid,
    /// Repository leaf name (namespace prefix stripped); `None` grants
    /// registry-wide access.
    pub repository: Option<String>,
    pub permission: Permission,
}

/// Parse raw `scope=` query values of the form `type:name:action[,action…]`.
/// Malformed entries are dropped.
pub fn parse_requested_scopes(raw_scopes: &[String]) -> Vec<RepositoryAccess> {
    let mut scopes = Vec::with_capacity(raw_scopes.len());
    for raw in raw_scopes {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let mut parts = raw.splitn(3, ':');
        let (Some(type_name), Some(name), Some(actions_raw)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let actions: Vec<String> = actions_raw
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        scopes.push(RepositoryAccess {
            type_name: type_name.trim().to_string(),
            name: name.trim().to_string(),
            actions,
        });
    }
    scopes
}

/// Expand one requested action into the concrete actions it stands for.
fn expand_requested_action(action: &str) -> &'static [&'static str] {
    match action.trim() {
        "pull" => &["pull"],
        "push" => &["push"],
        "*" => &["pull", "push"],
        _ => &[],
    }
}

fn key_scope_allows_action(
    registry_id: Uuid,
    repository: &str,
    action: &str,
    key_scopes: &[KeyScope],
) -> bool {
    key_scopes.iter().any(|scope| {
        scope.registry_id == registry_id
            && scope
                .repository
                .as_deref()
                .is_none_or(|leaf| leaf == repo_leaf(repository))
            && scope.permission.allows(action)
    })
}

/// Grant the subset of the requested scopes that the caller's API key
/// allows. The result is sorted by `(type, name)` with sorted, deduplicated
/// action lists, so granted access ⊆ requested access and granting is
/// monotone in the request set.
pub fn grant_token_scopes(
    registry_id: Uuid,
    namespace: &str,
    key_scopes: &[KeyScope],
    requested: &[RepositoryAccess],
) -> Vec<RepositoryAccess> {
    let mut merged: BTreeMap<(String, String), BTreeSet<&'static str>> = BTreeMap::new();

    for req in requested {
        if req.type_name != "repository" {
            continue;
        }
        if registry_namespace(&req.name) != namespace {
            continue;
        }

        for requested_action in &req.actions {
            for candidate in expand_requested_action(requested_action) {
                if key_scope_allows_action(registry_id, &req.name, candidate, key_scopes) {
                    merged
                        .entry((req.type_name.clone(), req.name.clone()))
                        .or_default()
                        .insert(candidate);
                }
            }
        }
    }

    merged
        .into_iter()
        .filter(|(_, actions)| !actions.is_empty())
        .map(|((type_name, name), actions)| RepositoryAccess {
            type_name,
            name,
            actions: actions.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

/// Whether a token's access list permits `action` on `repository`.
/// Vacuously true when no scope is required for the request.
pub fn token_access_allows(access: &[RepositoryAccess], repository: &str, action: &str) -> bool {
    if repository.is_empty() || action.is_empty() {
        return true;
    }

    access.iter().any(|granted| {
        granted.type_name == "repository"
            && granted.name == repository
            && granted
                .actions
                .iter()
                .any(|candidate| candidate == action || candidate == "*")
    })
}
