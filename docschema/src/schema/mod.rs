//! The schema tree model and the sampling merger.
//!
//! A collection's schema is a [`SchemaTree`]: an arena of [`Node`]s rooted at
//! an object node. Sampled documents are folded in with [`scan_document`];
//! validator definitions build the same shape through `crate::validator`.

mod merge;
mod tree;
mod value;

pub use merge::scan_document;
pub use tree::{
    FieldView, Node, NodeId, NodeKind, ReferenceTarget, SchemaTree, ARRAY_TYPE, DBREF_TYPE,
    ENUM_TYPE, INDEXED_ARRAY_TYPE, MAX_ID_SAMPLES, OBJECT_TYPE,
};
pub use value::{ScalarType, ValueShape};
