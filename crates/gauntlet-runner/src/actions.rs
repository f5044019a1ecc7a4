//! Resolution of `uses` steps to local commands.

use gauntlet_core::condition;
use gauntlet_core::interpolation::InterpolationContext;
use indexmap::IndexMap;
use serde_json::Value;

/// Maps action references such as `actions/checkout` to shell commands.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, String>,
}

impl ActionRegistry {
    pub fn new(actions: IndexMap<String, String>) -> Self {
        Self { actions }
    }

    pub fn register(&mut self, action: impl Into<String>, command: impl Into<String>) {
        self.actions.insert(action.into(), command.into());
    }

    /// Command for a `uses` reference. The `@version` suffix is ignored.
    pub fn resolve(&self, uses: &str) -> Option<&str> {
        let action = uses.split_once('@').map_or(uses, |(name, _)| name).trim();
        self.actions.get(action).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Environment variable name for a `with` input, e.g. `fetch-depth` becomes
/// `INPUT_FETCH_DEPTH`.
pub fn input_env_name(key: &str) -> String {
    let normalized: String = key
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("INPUT_{}", normalized)
}

/// `with` inputs as `INPUT_*` variables, values interpolated.
pub fn input_env(with: &IndexMap<String, Value>, ctx: &InterpolationContext) -> IndexMap<String, String> {
    with.iter()
        .map(|(key, value)| {
            let value = ctx.interpolate_value(value);
            (input_env_name(key), condition::render(&value))
        })
        .collect()
}
