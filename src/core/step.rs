//! Step domain model and the `Type.Name` plugin spec grammar.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind half of a plugin spec. Every kind shares the same execute
/// signature; differentiation between them is by naming convention only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PluginKind {
    Input,
    Output,
    Process,
    Transform,
    #[serde(rename = "AI")]
    AI,
    Storage,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Input => "Input",
            PluginKind::Output => "Output",
            PluginKind::Process => "Process",
            PluginKind::Transform => "Transform",
            PluginKind::AI => "AI",
            PluginKind::Storage => "Storage",
        }
    }
}

impl std::str::FromStr for PluginKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "Input" => Ok(PluginKind::Input),
            "Output" => Ok(PluginKind::Output),
            "Process" => Ok(PluginKind::Process),
            "Transform" => Ok(PluginKind::Transform),
            "AI" => Ok(PluginKind::AI),
            "Storage" => Ok(PluginKind::Storage),
            other => Err(CoreError::validation(format!(
                "unknown plugin type '{other}', expected one of Input, Output, Process, Transform, AI, Storage"
            ))),
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed `Type.Name` plugin spec string, e.g. `Input.csv`.
///
/// Parsing is strict: no whitespace, exactly one dot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginSpec {
    pub kind: PluginKind,
    pub name: String,
}

impl PluginSpec {
    pub fn new(kind: PluginKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }

    pub fn parse(raw: &str) -> CoreResult<Self> {
        if raw.chars().any(char::is_whitespace) {
            return Err(CoreError::validation(format!(
                "plugin spec '{raw}' must not contain whitespace"
            )));
        }
        let mut parts = raw.split('.');
        let kind_part = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::validation(format!("plugin spec '{raw}' is missing a type")))?;
        let name_part = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::validation(format!("plugin spec '{raw}' is missing a name")))?;
        if parts.next().is_some() {
            return Err(CoreError::validation(format!(
                "plugin spec '{raw}' must contain exactly one dot"
            )));
        }
        Ok(PluginSpec {
            kind: kind_part.parse()?,
            name: name_part.to_string(),
        })
    }
}

impl std::fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl TryFrom<String> for PluginSpec {
    type Error = CoreError;
    fn try_from(s: String) -> CoreResult<Self> {
        PluginSpec::parse(&s)
    }
}

impl From<PluginSpec> for String {
    fn from(spec: PluginSpec) -> String {
        spec.to_string()
    }
}

/// A single step in a pipeline's declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the pipeline.
    pub name: String,
    /// `Type.Name` reference resolved by the Plugin Registry.
    pub plugin: PluginSpec,
    /// Opaque config mapping passed to the plugin verbatim.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Named reference to an earlier step's `output`, if any.
    #[serde(default)]
    pub input: Option<String>,
    /// Name under which this step's primary result is written into the
    /// running context.
    #[serde(default)]
    pub output: Option<String>,
    /// Per-step timeout override; falls back to the engine's configured
    /// default (60s) when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// When true, a failed step is logged but does not abort the pipeline.
    #[serde(default)]
    pub continue_on_error: bool,
}
