//! Managed-policy resolution through the IAM service.
//!
//! The loader is constructed by the orchestrator and passed explicitly into
//! the transform call; there is no ambient client handle.
use crate::exec::CommandRunner;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Resolves a managed-policy name to its ARN.
pub trait PolicyLoader {
    fn resolve(&self, name: &str) -> Result<Option<String>>;
}

#[derive(Deserialize)]
struct PolicyList {
    #[serde(rename = "Policies", default)]
    policies: Vec<PolicyEntry>,
}

#[derive(Deserialize)]
struct PolicyEntry {
    #[serde(rename = "PolicyName")]
    policy_name: String,
    #[serde(rename = "Arn")]
    arn: String,
}

/// Lists IAM managed policies once, lazily, and caches the name-to-ARN map
/// for the rest of the process.
pub struct IamPolicyLoader<'a, R: CommandRunner> {
    runner: &'a R,
    cache: RefCell<Option<BTreeMap<String, String>>>,
}

impl<'a, R: CommandRunner> IamPolicyLoader<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self {
            runner,
            cache: RefCell::new(None),
        }
    }

    fn list_policies(&self) -> Result<BTreeMap<String, String>> {
        let stdout = self
            .runner
            .capture(
                "iam",
                "list-policies",
                &["--output".to_string(), "json".to_string()],
            )
            .context("list IAM managed policies")?;
        let list: PolicyList =
            serde_json::from_str(&stdout).context("parse list-policies output")?;
        tracing::debug!(count = list.policies.len(), "loaded managed policies");
        Ok(list
            .policies
            .into_iter()
            .map(|entry| (entry.policy_name, entry.arn))
            .collect())
    }
}

impl<R: CommandRunner> PolicyLoader for IamPolicyLoader<'_, R> {
    fn resolve(&self, name: &str) -> Result<Option<String>> {
        let mut cache = self.cache.borrow_mut();
        if cache.is_none() {
            *cache = Some(self.list_policies()?);
        }
        Ok(cache.as_ref().and_then(|map| map.get(name).cloned()))
    }
}
