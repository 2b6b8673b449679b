//! Template variable interpolation
//!
//! The dashboard host owns template variables and exposes them through a
//! template service. [`VariableInterpolator`] is a standalone implementation
//! for use outside the host, understanding `$var`, `${var}` and `[[var]]`.

use std::collections::BTreeMap;

use eyre::{Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

const VARIABLE_PATTERN: &str = r"\$(\w+)|\[\[(\w+?)(?::\w+)?\]\]|\$\{(\w+)(?::[^}]+)?\}";

/// Current value of a template variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Single(String),
    Multi(Vec<String>),
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        VariableValue::Single(value.to_string())
    }
}

impl From<Vec<&str>> for VariableValue {
    fn from(values: Vec<&str>) -> Self {
        VariableValue::Multi(values.into_iter().map(str::to_string).collect())
    }
}

/// Variables scoped to one request; they shadow dashboard variables
pub type ScopedVars = BTreeMap<String, VariableValue>;

/// Formats a variable value for insertion into query text
pub type ValueFormatter<'a> = &'a dyn Fn(&VariableValue) -> String;

/// The host's template service
pub trait TemplateSrv: Send + Sync {
    /// Replace every known variable in `target`, formatting values with `format`
    fn replace(&self, target: &str, scoped_vars: &ScopedVars, format: ValueFormatter<'_>) -> String;
}

/// Template service backed by a fixed set of dashboard variables
pub struct VariableInterpolator {
    variables: ScopedVars,
    pattern: Regex,
}

impl VariableInterpolator {
    pub fn new(variables: ScopedVars) -> Result<Self> {
        debug!(count = variables.len(), "VariableInterpolator::new: called");
        let pattern = Regex::new(VARIABLE_PATTERN).context("Failed to compile variable pattern")?;
        Ok(Self { variables, pattern })
    }

    /// Parse `name=value` pairs; `a,b,c` values become multi-value variables
    pub fn parse_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<ScopedVars> {
        let mut vars = ScopedVars::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (name, value) = assignment
                .split_once('=')
                .ok_or_else(|| eyre::eyre!("Invalid variable '{}', expected name=value", assignment))?;
            let value = if value.contains(',') {
                VariableValue::Multi(value.split(',').map(|v| v.trim().to_string()).collect())
            } else {
                VariableValue::Single(value.to_string())
            };
            vars.insert(name.trim().to_string(), value);
        }
        Ok(vars)
    }
}

impl TemplateSrv for VariableInterpolator {
    fn replace(&self, target: &str, scoped_vars: &ScopedVars, format: ValueFormatter<'_>) -> String {
        debug!(target_len = target.len(), scoped = scoped_vars.len(), "VariableInterpolator::replace: called");
        self.pattern
            .replace_all(target, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();

                match scoped_vars.get(name).or_else(|| self.variables.get(name)) {
                    Some(value) => format(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}
