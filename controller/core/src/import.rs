use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Declares that a local name resolves to one or more remote exports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub name: String,
    pub namespace: String,
    /// The port at which local consumers reach the import.
    pub port: u16,
    /// Declared sources. Order is significant for `static` selection.
    pub sources: Vec<ImportSource>,
    #[serde(default)]
    pub lb_scheme: LbScheme,
}

/// A declared source of an import: an export published by a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportSource {
    pub peer: String,
    pub export_name: String,
    /// Defaults to the import's namespace when unset.
    pub export_namespace: Option<String>,
}

/// How connections are spread over an import's live bindings.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LbScheme {
    /// `Static` for a single binding, `Ecmp` otherwise.
    #[default]
    Default,
    /// The first live binding in declared order.
    Static,
    /// Round-robin over all live bindings.
    Ecmp,
    /// A uniformly random live binding.
    Random,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown load-balancing scheme: {0}")]
pub struct UnknownScheme(String);

// === impl Import ===

impl Import {
    pub fn new(
        namespace: impl ToString,
        name: impl ToString,
        port: u16,
        sources: impl IntoIterator<Item = ImportSource>,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            port,
            sources: sources.into_iter().collect(),
            lb_scheme: LbScheme::Default,
        }
    }

    pub fn with_scheme(mut self, lb_scheme: LbScheme) -> Self {
        self.lb_scheme = lb_scheme;
        self
    }
}

// === impl ImportSource ===

impl ImportSource {
    pub fn new(peer: impl ToString, export_name: impl ToString) -> Self {
        Self {
            peer: peer.to_string(),
            export_name: export_name.to_string(),
            export_namespace: None,
        }
    }

    pub fn in_namespace(mut self, ns: impl ToString) -> Self {
        self.export_namespace = Some(ns.to_string());
        self
    }

    /// The `(namespace, name)` of the export this source names.
    pub fn export_ref<'a>(&'a self, import_ns: &'a str) -> (&'a str, &'a str) {
        let ns = match self.export_namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => import_ns,
        };
        (ns, &self.export_name)
    }
}

// === impl LbScheme ===

impl LbScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Static => "static",
            Self::Ecmp => "ecmp",
            Self::Random => "random",
        }
    }

    /// Resolves the default scheme for a number of live bindings.
    pub fn effective(self, bindings: usize) -> Self {
        match self {
            Self::Default if bindings <= 1 => Self::Static,
            Self::Default => Self::Ecmp,
            scheme => scheme,
        }
    }
}

impl FromStr for LbScheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Default);
        }
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "ecmp" | "round-robin" | "roundrobin" => Ok(Self::Ecmp),
            "random" => Ok(Self::Random),
            _ => Err(UnknownScheme(s.to_string())),
        }
    }
}

impl fmt::Display for LbScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            scheme => f.write_str(scheme.as_str()),
        }
    }
}
