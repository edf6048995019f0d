mod builder;
mod fields;
mod forest;
mod node;

pub use builder::TreeBuilder;
pub use forest::{Forest, ForestMetadata, ForestStats, RejectedRecord};
pub use node::{RenderNode, TreeNode};
