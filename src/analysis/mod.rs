//! Control-flow analyses.
//!
//! The analyses the transformation consumes, recomputed on demand per
//! lazification attempt and discarded afterwards:
//!
//! - [`dominators`] - dominator and post-dominator trees (Lengauer-Tarjan)
//! - [`loops`] - natural-loop detection and per-block loop depth
//! - [`verifier`] - SSA well-formedness checking for generated functions
//!
//! Nothing here caches across module mutations; a tree computed before a
//! rewrite must not be consulted after it.

mod dominators;
mod loops;
mod verifier;

pub use dominators::{Cfg, DominatorTree, PostDominatorTree};
pub use loops::{Loop, LoopForest};
pub use verifier::{render_issues, verify_function, VerifyIssue};
