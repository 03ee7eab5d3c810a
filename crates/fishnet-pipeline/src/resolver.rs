//! Requirement resolution.
//!
//! Before a node initializes, each declared requirement must be in the
//! registry. A missing one may be replaced by a stored artifact if the
//! operator says a substitute exists. Resolution follows the fixed node
//! order; there is no dependency graph.

use tracing::{info, warn};

use crate::context::PipelineContext;
use crate::types::PipelineError;

/// Make `requirements` available, returning the names that stay missing.
///
/// The operator is only asked about names absent from the registry.
/// Once one requirement is unmet the remaining absent names are
/// reported without further prompts.
///
/// # Errors
///
/// Only registry insertion errors propagate. Store failures while
/// loading a substitute leave the requirement unmet.
pub fn resolve_requirements(
    requirements: &[String],
    ctx: &mut PipelineContext<'_>,
) -> Result<Vec<String>, PipelineError> {
    for (index, name) in requirements.iter().enumerate() {
        if ctx.registry.contains(name) {
            continue;
        }
        if ctx.operator.has_substitute(name) {
            match ctx.store.load(name) {
                Ok(artifact) => {
                    info!(requirement = %name, kind = artifact.kind(), "loaded substitute");
                    ctx.registry.insert(name, artifact)?;
                    continue;
                }
                Err(err) => warn!(requirement = %name, %err, "failed to load substitute"),
            }
        }
        return Ok(requirements[index..]
            .iter()
            .filter(|n| !ctx.registry.contains(n))
            .cloned()
            .collect());
    }
    Ok(Vec::new())
}
