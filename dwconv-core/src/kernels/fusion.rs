//! Elementwise post-ops that a kernel can absorb at its output-write sites.
//!
//! A [`FusionFragment`] fills the three insertion points a linkable shader
//! template exposes: module-level declarations, extra entry-point arguments,
//! and a code snippet run before every store. The snippet is produced by an
//! emitter so it can refer to whatever names the host kernel uses for the
//! value being stored, its linear index, and its 3D grid coordinate.

use std::{fmt, sync::Arc};

use serde::Serialize;

/// Names of the variables in scope at an output-write site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSite<'a> {
    /// `FLT4` value about to be stored; the snippet may reassign it.
    pub value: &'a str,
    /// `int` offset of the store in the destination buffer.
    pub linear_index: &'a str,
    /// `uint3` output coordinate (x, y, slice).
    pub gid: &'a str,
}

impl LinkSite<'static> {
    /// The names the depthwise templates declare at each store.
    pub const DEFAULT: LinkSite<'static> = LinkSite {
        value: "value",
        linear_index: "linear_index",
        gid: "gid",
    };
}

type CodeEmitter = Arc<dyn Fn(&LinkSite<'_>) -> String + Send + Sync>;

/// Structured replacement for the template's three substitution slots.
#[derive(Clone)]
pub struct FusionFragment {
    declarations: String,
    arguments: Vec<String>,
    emitter: Option<CodeEmitter>,
}

impl fmt::Debug for FusionFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusionFragment")
            .field("declarations", &self.declarations)
            .field("arguments", &self.arguments)
            .field("has_code", &self.emitter.is_some())
            .finish()
    }
}

impl Default for FusionFragment {
    fn default() -> Self {
        Self::none()
    }
}

impl FusionFragment {
    /// Fragment that leaves every slot empty.
    pub fn none() -> Self {
        Self {
            declarations: String::new(),
            arguments: Vec::new(),
            emitter: None,
        }
    }

    /// Fragment emitting `code` for every write site.
    pub fn new<F>(code: F) -> Self
    where
        F: Fn(&LinkSite<'_>) -> String + Send + Sync + 'static,
    {
        Self {
            emitter: Some(Arc::new(code)),
            ..Self::none()
        }
    }

    /// Add module-level declarations (structs, constants, helper functions).
    pub fn with_declarations(mut self, declarations: impl Into<String>) -> Self {
        self.declarations = declarations.into();
        self
    }

    /// Add one extra entry-point argument, e.g. `device FLT4* const bias [[buffer(5)]]`.
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Fragment applying an activation in place.
    pub fn activation(kind: ActivationKind) -> Self {
        Self::new(move |site| kind.emit(site.value))
    }

    pub fn declarations(&self) -> &str {
        &self.declarations
    }

    /// Arguments rendered for the entry signature, each terminated by a comma
    /// because the template keeps its own `ugid` parameter last.
    pub fn arguments_source(&self) -> String {
        self.arguments
            .iter()
            .map(|arg| format!("{arg},\n"))
            .collect()
    }

    /// Snippet for one write site; empty when the fragment carries no code.
    pub fn code(&self, site: &LinkSite<'_>) -> String {
        self.emitter
            .as_ref()
            .map(|emit| emit(site))
            .unwrap_or_default()
    }
}

/// Elementwise activations that can be fused into a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    /// `max(x, 0)`.
    Relu,
    /// `clamp(x, 0, 6)`.
    Relu6,
    /// `1 / (1 + exp(-x))`.
    Sigmoid,
}

impl ActivationKind {
    /// Apply the activation on the host, matching the emitted shader code.
    pub fn apply(self, x: f32) -> f32 {
        match self {
            ActivationKind::Relu => x.max(0.0),
            ActivationKind::Relu6 => x.clamp(0.0, 6.0),
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    fn emit(self, value: &str) -> String {
        match self {
            ActivationKind::Relu => format!("{value} = max({value}, FLT4(0.0f));"),
            ActivationKind::Relu6 => {
                format!("{value} = clamp({value}, FLT4(0.0f), FLT4(6.0f));")
            }
            ActivationKind::Sigmoid => {
                format!("{value} = FLT4(1.0f) / (FLT4(1.0f) + exp(-{value}));")
            }
        }
    }
}

impl std::str::FromStr for ActivationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relu" => Ok(ActivationKind::Relu),
            "relu6" => Ok(ActivationKind::Relu6),
            "sigmoid" => Ok(ActivationKind::Sigmoid),
            other => Err(format!("unknown activation '{other}'")),
        }
    }
}
