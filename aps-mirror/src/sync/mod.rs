pub mod engine;
pub mod report;
pub mod tree;
pub mod viewable;
pub mod walker;

#[cfg(test)]
mod test_support;

pub use engine::{EngineError, MirrorSync};
pub use report::{SyncFailure, SyncOutcome, SyncReport};
pub use tree::{TreeNode, build_tree, orphans, render_tree};
pub use viewable::{EnsureOutcome, OutputFormat, View, ViewableError};
pub use walker::{Depth, HierarchyWalker, Walk, WalkError};
