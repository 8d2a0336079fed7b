use crate::error::{DiscoveryError, Result};
use crate::schema::{NodeId, SchemaTree};
use bson::{Bson, Document};
use serde::Serialize;

/// Native name of the primary key index.
pub const PRIMARY_INDEX_NAME: &str = "_id_";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexDirection {
    Ascending,
    Descending,
    /// Special index kinds kept verbatim: `text`, `hashed`, `2dsphere`, ...
    Other(String),
}

impl IndexDirection {
    fn from_bson(value: &Bson) -> Option<Self> {
        let numeric = match value {
            Bson::Int32(n) => *n as f64,
            Bson::Int64(n) => *n as f64,
            Bson::Double(n) => *n,
            Bson::String(kind) => return Some(IndexDirection::Other(kind.clone())),
            _ => return None,
        };
        if numeric < 0.0 {
            Some(IndexDirection::Descending)
        } else {
            Some(IndexDirection::Ascending)
        }
    }
}

/// One entry of a collection's native index list.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub name: String,
    pub key: Vec<(String, IndexDirection)>,
    pub unique: bool,
}

impl IndexDescriptor {
    /// Parse a `listIndexes` entry: `{name, key: {path: direction, ..}, unique?}`.
    pub fn from_document(document: &Document) -> Result<Self> {
        let name = document
            .get_str("name")
            .map_err(|_| DiscoveryError::IndexDescriptor(format!("index without a name: {document}")))?;
        let key = document
            .get_document("key")
            .map_err(|_| DiscoveryError::IndexDescriptor(format!("index '{name}' has no key document")))?;

        let mut columns = Vec::with_capacity(key.len());
        for (path, direction) in key {
            let direction = IndexDirection::from_bson(direction).ok_or_else(|| {
                DiscoveryError::IndexDescriptor(format!(
                    "index '{name}' has an unsupported direction for '{path}'"
                ))
            })?;
            columns.push((path.clone(), direction));
        }

        Ok(IndexDescriptor {
            name: name.to_string(),
            key: columns,
            unique: document.get_bool("unique").unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexColumn {
    #[serde(skip)]
    pub node: NodeId,
    /// Path of the node the key resolved to.
    pub path: String,
    /// Key path as declared by the index.
    pub key_path: String,
    pub direction: IndexDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub pk: bool,
    pub unique: bool,
}

/// Mirror native index descriptors onto `tree`.
///
/// Key paths that match no node are dropped from their index; the index
/// itself is always kept. Descriptors that cannot be parsed are skipped.
pub fn build_indexes(collection: &str, tree: &SchemaTree, descriptors: &[Document]) -> Vec<Index> {
    let mut indexes = Vec::with_capacity(descriptors.len());

    for raw in descriptors {
        let descriptor = match IndexDescriptor::from_document(raw) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::warn!("Skipping index on {collection}: {e}");
                continue;
            }
        };

        let mut columns = Vec::with_capacity(descriptor.key.len());
        for (key_path, direction) in descriptor.key {
            match resolve_path(tree, &key_path) {
                Some(node) => columns.push(IndexColumn {
                    node,
                    path: tree.node(node).path.clone(),
                    key_path,
                    direction,
                }),
                None => log::warn!(
                    "Index '{}' on {collection}: no field matches '{key_path}', column omitted",
                    descriptor.name
                ),
            }
        }

        indexes.push(Index {
            pk: descriptor.name == PRIMARY_INDEX_NAME,
            name: descriptor.name,
            columns,
            unique: descriptor.unique,
        });
    }

    indexes
}

/// Longest node path that is `path` itself or a dot-bounded prefix of it.
fn resolve_path(tree: &SchemaTree, path: &str) -> Option<NodeId> {
    let mut candidate = path;
    loop {
        if candidate.is_empty() {
            return None;
        }
        if let Some(node) = tree.find_by_path(candidate) {
            return Some(node);
        }
        candidate = match candidate.rfind('.') {
            Some(dot) => &candidate[..dot],
            None => return None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::scan_document;
    use bson::doc;

    fn tree() -> SchemaTree {
        let mut tree = SchemaTree::new();
        let root = tree.root();
        scan_document(
            &mut tree,
            root,
            &doc! { "_id": 1, "email": "a@b.c", "address": { "city": "Oslo" }, "tags": ["x"] },
            false,
        );
        tree
    }

    #[test]
    fn test_primary_index_is_pk() {
        let indexes = build_indexes(
            "users",
            &tree(),
            &[doc! { "name": "_id_", "key": { "_id": 1 }, "unique": true }],
        );

        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].pk);
        assert!(indexes[0].unique);
        assert_eq!(indexes[0].columns[0].path, "_id");
        assert_eq!(indexes[0].columns[0].direction, IndexDirection::Ascending);
    }

    #[test]
    fn test_secondary_index_is_not_pk() {
        let indexes = build_indexes(
            "users",
            &tree(),
            &[doc! { "name": "email_-1", "key": { "email": -1 }, "unique": true }],
        );

        assert!(!indexes[0].pk);
        assert_eq!(indexes[0].columns[0].direction, IndexDirection::Descending);
    }

    #[test]
    fn test_unknown_field_keeps_index() {
        let indexes = build_indexes(
            "users",
            &tree(),
            &[doc! { "name": "ix1", "key": { "missingField": 1 } }],
        );

        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "ix1");
        assert!(indexes[0].columns.is_empty());
        assert!(!indexes[0].pk);
    }

    #[test]
    fn test_partial_resolution_keeps_resolved_columns() {
        let indexes = build_indexes(
            "users",
            &tree(),
            &[doc! { "name": "mixed", "key": { "email": 1, "ghost": 1, "address.city": "text" } }],
        );
        let paths: Vec<&str> = indexes[0].columns.iter().map(|c| c.path.as_str()).collect();

        assert_eq!(paths, vec!["email", "address.city"]);
        assert_eq!(indexes[0].columns[1].direction, IndexDirection::Other("text".into()));
    }

    #[test]
    fn test_longest_prefix_match() {
        let indexes = build_indexes(
            "users",
            &tree(),
            &[doc! { "name": "deep", "key": { "address.city.district": 1, "tags.label": 1 } }],
        );
        let columns = &indexes[0].columns;

        assert_eq!(columns[0].path, "address.city");
        assert_eq!(columns[0].key_path, "address.city.district");
        assert_eq!(columns[1].path, "tags");
    }

    #[test]
    fn test_malformed_descriptor_skipped() {
        let indexes = build_indexes(
            "users",
            &tree(),
            &[doc! { "key": { "email": 1 } }, doc! { "name": "ok", "key": { "email": 1 } }],
        );

        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "ok");
    }

    #[test]
    fn test_descriptor_parsing() {
        let descriptor =
            IndexDescriptor::from_document(&doc! { "name": "geo", "key": { "loc": "2dsphere", "ts": -1i64 } })
                .unwrap();

        assert!(!descriptor.unique);
        assert_eq!(
            descriptor.key,
            vec![
                ("loc".to_string(), IndexDirection::Other("2dsphere".into())),
                ("ts".to_string(), IndexDirection::Descending),
            ]
        );
        assert!(IndexDescriptor::from_document(&doc! { "name": "x", "key": { "a": true } }).is_err());
    }
}
