use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutableKind {
    Unknown,
    Script,
    StaticBinary,
    DynamicBinary,
}

impl fmt::Display for ExecutableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutableKind::Unknown => "unknown",
            ExecutableKind::Script => "script",
            ExecutableKind::StaticBinary => "static-binary",
            ExecutableKind::DynamicBinary => "dynamic-binary",
        };
        write!(f, "{}", name)
    }
}

/// One node of the nested report.
///
/// Executables carry a `kind`; shared libraries listed by the inspector are
/// leaves without one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedEntry {
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ExecutableKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set when the path was reached again while it was still being resolved.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cyclic: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ResolvedEntry>,
}

impl ResolvedEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Keeps the first error seen; later ones are already in the flat report.
    pub fn set_error(&mut self, error: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    /// True when neither this node nor anything beneath it carries an error.
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.dependencies.iter().all(ResolvedEntry::is_clean)
    }
}

/// The nested form of a run: one tree per declared entry point.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeReport {
    pub deploy_bins: Vec<String>,
    pub deploy_paths: Vec<String>,
    pub executables: BTreeMap<String, ResolvedEntry>,
}
