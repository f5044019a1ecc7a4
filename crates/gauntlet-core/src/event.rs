//! Trigger events and trigger matching.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pull request webhook action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Synchronize,
    Reopened,
    Edited,
    Closed,
    #[serde(other)]
    Other,
}

impl PullRequestAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullRequestAction::Opened => "opened",
            PullRequestAction::Synchronize => "synchronize",
            PullRequestAction::Reopened => "reopened",
            PullRequestAction::Edited => "edited",
            PullRequestAction::Closed => "closed",
            PullRequestAction::Other => "other",
        }
    }
}

/// The event that started a run. Immutable for the run's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub action: PullRequestAction,
    #[serde(default)]
    pub number: Option<u64>,
    /// Source ref of the pull request head.
    #[serde(default)]
    pub git_ref: Option<String>,
    /// Target branch of the pull request.
    #[serde(default)]
    pub base_ref: Option<String>,
    #[serde(default)]
    pub head_sha: Option<String>,
    /// Free-text body. GitHub sends `null` for an empty description.
    #[serde(default)]
    pub body: Option<String>,
}

impl TriggerEvent {
    /// A freshly opened pull request with no body.
    pub fn pull_request(git_ref: impl Into<String>, head_sha: impl Into<String>) -> Self {
        Self {
            action: PullRequestAction::Opened,
            number: None,
            git_ref: Some(git_ref.into()),
            base_ref: None,
            head_sha: Some(head_sha.into()),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Build an event from a GitHub `pull_request` webhook payload.
    pub fn from_github_payload(payload: &Value) -> Result<Self> {
        let pr = payload
            .get("pull_request")
            .ok_or_else(|| Error::Serialization("payload has no `pull_request` object".into()))?;

        let action = match payload.get("action") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => PullRequestAction::Opened,
        };
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            action,
            number: payload
                .get("number")
                .or_else(|| pr.get("number"))
                .and_then(Value::as_u64),
            git_ref: text(pr.pointer("/head/ref")),
            base_ref: text(pr.pointer("/base/ref")),
            head_sha: text(pr.pointer("/head/sha")),
            body: text(pr.get("body")),
        })
    }

    /// Look up a field by its expression name.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "body" => self.body.clone().map(Value::String),
            "head_sha" | "sha" => self.head_sha.clone().map(Value::String),
            "ref" | "git_ref" | "head_ref" => self.git_ref.clone().map(Value::String),
            "base_ref" => self.base_ref.clone().map(Value::String),
            "action" => Some(Value::String(self.action.as_str().to_string())),
            "number" => self.number.map(Value::from),
            _ => None,
        }
    }
}

/// `on:` block of a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub pull_request: Option<PullRequestTrigger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestTrigger {
    #[serde(default)]
    pub types: Vec<PullRequestAction>,
    #[serde(default)]
    pub branches: Vec<String>,
}

impl TriggerConfig {
    /// Check if an event should start a run of this workflow.
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        let Some(trigger) = &self.pull_request else {
            return false;
        };

        let action_ok = if trigger.types.is_empty() {
            matches!(
                event.action,
                PullRequestAction::Opened
                    | PullRequestAction::Synchronize
                    | PullRequestAction::Reopened
            )
        } else {
            trigger.types.contains(&event.action)
        };

        let branch_ok = trigger.branches.is_empty()
            || event
                .base_ref
                .as_deref()
                .is_some_and(|base| trigger.branches.iter().any(|p| glob_match(p, base)));

        action_ok && branch_ok
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text.starts_with(prefix);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if let Some(rest) = text.strip_prefix(&prefix_slash) {
            return !rest.contains('/');
        }
        return false;
    }
    if let Some((head, tail)) = pattern.split_once('*') {
        return text.starts_with(head) && text.ends_with(tail);
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_github_payload() {
        let payload = json!({
            "action": "synchronize",
            "number": 42,
            "pull_request": {
                "body": "Bump kube /build-new-image",
                "head": { "ref": "feature/images", "sha": "deadbeef" },
                "base": { "ref": "main" }
            }
        });

        let event = TriggerEvent::from_github_payload(&payload).unwrap();
        assert_eq!(event.action, PullRequestAction::Synchronize);
        assert_eq!(event.number, Some(42));
        assert_eq!(event.head_sha.as_deref(), Some("deadbeef"));
        assert_eq!(event.git_ref.as_deref(), Some("feature/images"));
        assert_eq!(event.base_ref.as_deref(), Some("main"));
        assert_eq!(event.body.as_deref(), Some("Bump kube /build-new-image"));
    }

    #[test]
    fn test_null_body_payload() {
        let payload = json!({
            "action": "opened",
            "pull_request": { "body": null, "head": { "sha": "abc" } }
        });
        let event = TriggerEvent::from_github_payload(&payload).unwrap();
        assert!(event.body.is_none());
        assert!(event.field("body").is_none());
    }

    #[test]
    fn test_payload_without_pull_request_is_rejected() {
        assert!(TriggerEvent::from_github_payload(&json!({"ref": "main"})).is_err());
    }

    #[test]
    fn test_unknown_action_maps_to_other() {
        let payload = json!({ "action": "labeled", "pull_request": {} });
        let event = TriggerEvent::from_github_payload(&payload).unwrap();
        assert_eq!(event.action, PullRequestAction::Other);
    }

    #[test]
    fn test_trigger_default_types() {
        let config = TriggerConfig {
            pull_request: Some(PullRequestTrigger::default()),
        };
        let mut event = TriggerEvent::pull_request("feature", "abc");
        assert!(config.matches(&event));
        event.action = PullRequestAction::Closed;
        assert!(!config.matches(&event));
    }

    #[test]
    fn test_trigger_branch_filter() {
        let config = TriggerConfig {
            pull_request: Some(PullRequestTrigger {
                types: vec![],
                branches: vec!["main".to_string(), "stable/*".to_string()],
            }),
        };
        let mut event = TriggerEvent::pull_request("feature", "abc");
        assert!(!config.matches(&event));
        event.base_ref = Some("stable/2024.1".to_string());
        assert!(config.matches(&event));
        event.base_ref = Some("develop".to_string());
        assert!(!config.matches(&event));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("release/**", "release/v1/hotfix"));
        assert!(glob_match("feature/*", "feature/foo"));
        assert!(!glob_match("feature/*", "feature/foo/bar"));
        assert!(glob_match("v*-rc", "v1.2-rc"));
    }
}
