//! Prerequisite flags and saved-group membership.
//!
//! Both are answered by external collaborators. Anything the collaborator cannot answer fails
//! closed: an unresolved prerequisite is not satisfied and an unknown group has no members.
use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::{condition::Condition, error::CollaboratorError, AttributeValue, Attributes, Error, Result};

/// Resolves the current value of another feature flag for a context.
pub trait FlagResolver {
    /// Returns `Ok(None)` if the flag cannot be resolved.
    fn flag_value(
        &self,
        flag_id: &str,
        attributes: &Attributes,
    ) -> std::result::Result<Option<AttributeValue>, CollaboratorError>;
}

/// Answers saved group membership for identifier values.
pub trait SavedGroups {
    /// Returns `Ok(None)` if nothing is known about the group.
    fn is_member(
        &self,
        group_id: &str,
        identifier: &str,
    ) -> std::result::Result<Option<bool>, CollaboratorError>;
}

/// Resolver that knows no flags. Every prerequisite fails closed.
pub(crate) struct NoopFlagResolver;
impl FlagResolver for NoopFlagResolver {
    fn flag_value(
        &self,
        _flag_id: &str,
        _attributes: &Attributes,
    ) -> std::result::Result<Option<AttributeValue>, CollaboratorError> {
        Ok(None)
    }
}

impl<T> FlagResolver for T
where
    T: Fn(&str, &Attributes) -> std::result::Result<Option<AttributeValue>, CollaboratorError>,
{
    fn flag_value(
        &self,
        flag_id: &str,
        attributes: &Attributes,
    ) -> std::result::Result<Option<AttributeValue>, CollaboratorError> {
        self(flag_id, attributes)
    }
}

/// Provider that knows no groups. Every saved group check fails closed.
pub(crate) struct NoopSavedGroups;
impl SavedGroups for NoopSavedGroups {
    fn is_member(
        &self,
        _group_id: &str,
        _identifier: &str,
    ) -> std::result::Result<Option<bool>, CollaboratorError> {
        Ok(None)
    }
}

/// Static membership lists: group id -> identifier values.
impl SavedGroups for HashMap<String, HashSet<String>> {
    fn is_member(
        &self,
        group_id: &str,
        identifier: &str,
    ) -> std::result::Result<Option<bool>, CollaboratorError> {
        Ok(self.get(group_id).map(|members| members.contains(identifier)))
    }
}

/// Dependency on another flag's resolved value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    /// Id of the flag this experiment depends on.
    pub id: String,
    /// Condition the resolved value must satisfy, evaluated against `{"value": <resolved>}`.
    #[serde(default)]
    pub condition: Condition,
}

/// How membership in the listed groups combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMatch {
    /// Identifier must be in every listed group.
    All,
    /// Identifier must be in at least one listed group.
    Any,
    /// Identifier must not be in any listed group.
    None,
}

/// Saved group targeting entry of a phase.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SavedGroupTargeting {
    #[serde(rename = "match")]
    pub match_type: GroupMatch,
    pub ids: Vec<String>,
}

/// Check that every prerequisite flag resolves to a value satisfying its condition.
pub fn prerequisites_satisfied(
    prerequisites: &[Prerequisite],
    attributes: &Attributes,
    resolver: &dyn FlagResolver,
) -> Result<bool> {
    for prerequisite in prerequisites {
        let value = resolver
            .flag_value(&prerequisite.id, attributes)
            .map_err(Error::flag_resolver)?;

        let Some(value) = value else {
            log::debug!(target: "bucketing",
                        flag_id:display = prerequisite.id;
                        "prerequisite flag is unresolved");
            return Ok(false);
        };

        let evaluated = Attributes::from([("value".to_owned(), value)]);
        if !prerequisite.condition.matches(&evaluated) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Check saved group targeting for `identifier`. Every targeting entry must pass.
pub fn in_saved_groups(
    groups: &[SavedGroupTargeting],
    identifier: &str,
    provider: &dyn SavedGroups,
) -> Result<bool> {
    for targeting in groups {
        let mut memberships = Vec::with_capacity(targeting.ids.len());
        for group_id in &targeting.ids {
            match provider
                .is_member(group_id, identifier)
                .map_err(Error::saved_groups)?
            {
                Some(is_member) => memberships.push(is_member),
                None => {
                    log::debug!(target: "bucketing",
                                group_id:display = group_id;
                                "saved group is unknown");
                    return Ok(false);
                }
            }
        }

        let passed = match targeting.match_type {
            GroupMatch::All => memberships.iter().all(|m| *m),
            GroupMatch::Any => memberships.iter().any(|m| *m),
            GroupMatch::None => !memberships.iter().any(|m| *m),
        };
        if !passed {
            return Ok(false);
        }
    }
    Ok(true)
}
