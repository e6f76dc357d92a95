pub mod error;
pub mod node;
pub mod serialization;
pub mod latch;
pub mod index;

pub use error::BTreeError;
pub use node::{BTreeNode, NodeType};
pub use index::{BPlusTree, BPlusTreeIter};
pub use serialization::{serialize_node, deserialize_node, suggested_order};
