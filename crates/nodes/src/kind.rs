//! The closed set of node kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which executor runs a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A call to a language model.
    Llm,
    /// A plain function over the step input.
    #[default]
    Function,
    /// An external tool invocation.
    Tool,
}

impl NodeKind {
    pub const ALL: [NodeKind; 3] = [NodeKind::Llm, NodeKind::Function, NodeKind::Tool];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Function => "function",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
