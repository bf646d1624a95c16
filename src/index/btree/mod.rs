pub mod error;
pub mod node;
pub mod index;
pub mod iterator;
pub mod serialization;

pub use error::BTreeError;
pub use index::BPlusTree;
pub use iterator::BTreeIterator;
pub use node::BTreeNode;
pub use serialization::{serialize_node, deserialize_node};
