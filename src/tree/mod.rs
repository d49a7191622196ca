pub mod error;
pub mod node;
pub mod store;

pub use error::TreeError;
pub use node::{GroupInfo, Node, NodeId, TabId, TabRef, TreeState, View, ViewId, WindowContext, WindowId};
pub use store::TreeStore;
