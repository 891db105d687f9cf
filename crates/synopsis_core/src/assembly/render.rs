//! Rendering seam for compiled content trees.
//!
//! Page layout and document formats live outside the core; the core only
//! ships the canonical JSON renderer.

use crate::assembly::ContentTree;
use crate::error::CoreResult;

pub trait Renderer: Send + Sync {
    /// Short format name used in logs, e.g. `json`.
    fn format(&self) -> &'static str;

    fn render(&self, tree: &ContentTree) -> CoreResult<Vec<u8>>;
}

/// Renders the tree as JSON; compact output is the canonical form.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer {
    pub pretty: bool,
}

impl JsonRenderer {
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Renderer for JsonRenderer {
    fn format(&self) -> &'static str {
        "json"
    }

    fn render(&self, tree: &ContentTree) -> CoreResult<Vec<u8>> {
        if self.pretty {
            return Ok(serde_json::to_vec_pretty(tree)?);
        }
        Ok(tree.to_canonical_json()?.into_bytes())
    }
}
