// Inferred cross-collection references

use crate::registry::{CollectionSchema, MetaDatabase};
use crate::schema::{NodeId, SchemaTree};
use bson::oid::ObjectId;
use serde::Serialize;

/// An inferred edge from a field to the collection its values point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    #[serde(skip)]
    pub source: NodeId,
    pub source_collection: String,
    pub source_path: String,
    pub target_collection: String,
}

/// Resolve every typed reference field of `schema` against `db`.
///
/// Target collections not yet discovered are discovered now. Targets in
/// another database, or that do not exist, produce no edge.
pub fn resolve_references(db: &MetaDatabase, schema: &CollectionSchema) -> Vec<Reference> {
    let tree = &schema.tree;
    let mut references = Vec::new();

    for id in tree.walk() {
        let node = tree.node(id);
        let Some(target) = &node.reference else {
            continue;
        };

        if let Some(database) = &target.database {
            if database != db.name() {
                log::debug!(
                    "Reference {}.{} points to database {database}, skipped",
                    schema.name,
                    node.path
                );
                continue;
            }
        }

        if db.get_or_discover(&target.collection).is_none() {
            log::debug!(
                "Reference {}.{} targets unknown collection {}, skipped",
                schema.name,
                node.path,
                target.collection
            );
            continue;
        }

        references.push(Reference {
            source: id,
            source_collection: schema.name.clone(),
            source_path: node.path.clone(),
            target_collection: target.collection.clone(),
        });
    }

    log::debug!(
        "Resolved {} references for {}.{}",
        references.len(),
        db.name(),
        schema.name
    );
    references
}

/// A field whose values include object identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdCandidate {
    pub path: String,
    pub samples: Vec<ObjectId>,
}

/// Fields that captured object-identifier samples.
///
/// These are observations only: nothing matches them to a target collection.
pub fn object_id_candidates(tree: &SchemaTree) -> Vec<IdCandidate> {
    tree.walk()
        .into_iter()
        .map(|id| tree.node(id))
        .filter(|node| !node.id_samples.is_empty())
        .map(|node| IdCandidate {
            path: node.path.clone(),
            samples: node.id_samples.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::registry::DiscoveryState;
    use crate::source::{MemoryCollection, MemoryDatabase};
    use bson::doc;
    use std::sync::Arc;

    fn shop() -> MetaDatabase {
        let user = ObjectId::new();
        let db = MemoryDatabase::new("shop")
            .with_collection(MemoryCollection::new("users").with_documents([doc! { "_id": user, "name": "Ann" }]))
            .with_collection(MemoryCollection::new("orders").with_documents([doc! {
                "_id": ObjectId::new(),
                "buyer": { "$ref": "users", "$id": user },
                "coupon": { "$ref": "coupons", "$id": 7 },
                "archive": { "$ref": "users", "$id": user, "$db": "legacy" },
                "seller": user,
                "lines": [{ "product": { "$ref": "orders", "$id": 1 } }],
            }]));
        MetaDatabase::open(Arc::new(db), DiscoveryConfig::default()).unwrap()
    }

    #[test]
    fn test_references_resolve_lazily() {
        let db = shop();
        let orders = db.get_or_discover("orders").unwrap();

        assert!(!orders.references_discovered());
        assert_eq!(db.state("users"), DiscoveryState::NotDiscovered);

        let references = db.references("orders");
        let edges: Vec<(&str, &str)> = references
            .iter()
            .map(|r| (r.source_path.as_str(), r.target_collection.as_str()))
            .collect();

        assert_eq!(edges, vec![("buyer", "users"), ("lines.product", "orders")]);
        assert!(orders.references_discovered());
        assert_eq!(orders.references().len(), 2);
        assert_eq!(db.state("users"), DiscoveryState::Discovered);
    }

    #[test]
    fn test_collection_without_references() {
        let db = shop();
        assert!(db.references("users").is_empty());
        assert!(db.get_or_discover("users").unwrap().references_discovered());
    }

    #[test]
    fn test_object_id_candidates_are_observed_only() {
        let db = shop();
        let orders = db.get_or_discover("orders").unwrap();
        let candidates = object_id_candidates(&orders.tree);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, "seller");
        assert_eq!(candidates[0].samples.len(), 1);
        assert!(db.references("orders").iter().all(|r| r.source_path != "seller"));
    }
}
