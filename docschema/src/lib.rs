pub mod catalog;
pub mod config;
pub mod error;
pub mod index;
pub mod reference;
pub mod registry;
pub mod sampler;
pub mod schema;
pub mod source;
pub mod validator;

pub use catalog::{ColumnRow, MetaCatalog, SessionState};
pub use config::{DiscoveryConfig, ScanStrategy};
pub use error::{DiscoveryError, Result};
pub use index::{Index, IndexColumn, IndexDirection};
pub use reference::{IdCandidate, Reference};
pub use registry::{CollectionSchema, DiscoveryState, MetaDatabase, SchemaOrigin};
pub use schema::{Node, NodeId, NodeKind, SchemaTree};
pub use source::{CollectionSource, DatabaseSource, DocumentClient, DocumentCursor, MemoryClient};
