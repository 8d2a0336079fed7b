use super::tree::{
    NodeId, NodeKind, SchemaTree, ARRAY_TYPE, DBREF_TYPE, INDEXED_ARRAY_TYPE, OBJECT_TYPE,
};
use super::value::{ScalarType, ValueShape};
use bson::{Bson, Document};
use std::collections::HashSet;

const PRIMARY_ID_FIELD: &str = "_id";

/// Fold one document into the container `target`, mutating the tree in place.
///
/// Fields created while `target` sees its first document start mandatory;
/// fields created later take `mandatory_hint`. Every known field absent from
/// `document` loses its mandatory flag for good.
pub fn scan_document(tree: &mut SchemaTree, target: NodeId, document: &Document, mandatory_hint: bool) {
    let first_document = tree.node(target).first_document;
    let mandatory = first_document || mandatory_hint;
    let mut seen: HashSet<&str> = HashSet::with_capacity(document.len());

    for (key, value) in document {
        seen.insert(key.as_str());
        scan_value(tree, target, key, value, mandatory, mandatory_hint);
    }

    let absent: Vec<NodeId> = tree
        .children(target)
        .filter(|(_, node)| node.mandatory && !seen.contains(node.name.as_str()))
        .map(|(id, _)| id)
        .collect();
    for id in absent {
        tree.node_mut(id).mandatory = false;
    }

    tree.node_mut(target).first_document = false;
}

fn scan_value(
    tree: &mut SchemaTree,
    parent: NodeId,
    key: &str,
    value: &Bson,
    mandatory: bool,
    mandatory_hint: bool,
) {
    match ValueShape::classify(value) {
        ValueShape::Object(nested) => {
            let (id, _) = tree.get_or_create_child(parent, key, NodeKind::Object, OBJECT_TYPE, mandatory);
            if tree.node(id).kind.is_container() {
                scan_document(tree, id, nested, mandatory_hint);
            }
        }
        ValueShape::PseudoArray(nested) => {
            let (id, _) =
                tree.get_or_create_child(parent, key, NodeKind::Array, INDEXED_ARRAY_TYPE, mandatory);
            if tree.node(id).kind.is_container() {
                for element in nested.values() {
                    scan_element(tree, id, element, mandatory_hint);
                }
            }
        }
        ValueShape::ObjectArray(elements) => {
            let (id, _) = tree.get_or_create_child(parent, key, NodeKind::Array, ARRAY_TYPE, mandatory);
            if tree.node(id).kind.is_container() {
                for element in elements {
                    scan_element(tree, id, element, mandatory_hint);
                }
            }
        }
        ValueShape::OpaqueArray => {
            tree.get_or_create_child(parent, key, NodeKind::Field, ARRAY_TYPE, mandatory);
        }
        ValueShape::Reference(target) => {
            let (id, _) = tree.get_or_create_child(parent, key, NodeKind::Field, DBREF_TYPE, mandatory);
            let node = tree.node_mut(id);
            if node.kind == NodeKind::Field && node.reference.is_none() {
                node.reference = Some(target);
            }
        }
        ValueShape::ObjectId(oid) => {
            let (id, _) =
                tree.get_or_create_child(parent, key, NodeKind::Field, ScalarType::String.as_str(), mandatory);
            let is_primary_id = parent == tree.root() && key == PRIMARY_ID_FIELD;
            if !is_primary_id && tree.node(id).kind == NodeKind::Field {
                tree.node_mut(id).push_id_sample(*oid);
            }
        }
        ValueShape::Scalar(scalar) => {
            tree.get_or_create_child(parent, key, NodeKind::Field, scalar.as_str(), mandatory);
        }
    }
}

/// Fold one array element into the array's shared schema. Numeric-keyed
/// elements contribute their values, never their keys.
fn scan_element(tree: &mut SchemaTree, array: NodeId, element: &Bson, mandatory_hint: bool) {
    let Bson::Document(document) = element else {
        return;
    };
    match ValueShape::classify(element) {
        ValueShape::PseudoArray(_) => {
            for value in document.values() {
                scan_element(tree, array, value, mandatory_hint);
            }
        }
        _ => scan_document(tree, array, document, mandatory_hint),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn sample(documents: &[Document]) -> SchemaTree {
        let mut tree = SchemaTree::new();
        let root = tree.root();
        for document in documents {
            scan_document(&mut tree, root, document, false);
        }
        tree
    }

    fn field<'a>(tree: &'a SchemaTree, path: &str) -> &'a crate::schema::Node {
        let id = tree
            .find_by_path(path)
            .unwrap_or_else(|| panic!("no field at {path}"));
        tree.node(id)
    }

    fn paths(tree: &SchemaTree) -> Vec<String> {
        let mut paths: Vec<String> = tree.walk().into_iter().map(|id| tree.node(id).path.clone()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_field_missing_later_becomes_optional() {
        let tree = sample(&[doc! { "a": 1 }, doc! { "a": 1, "b": 2 }, doc! { "a": 1 }]);

        assert!(field(&tree, "a").mandatory);
        assert!(!field(&tree, "b").mandatory);
        assert_eq!(field(&tree, "a").type_name, "integer");
        assert_eq!(tree.field_count(), 2);
    }

    #[test]
    fn test_optional_never_reverts() {
        let mut docs = vec![doc! { "a": 1, "b": 1 }, doc! { "a": 1 }];
        docs.extend((0..10).map(|_| doc! { "a": 1, "b": 1 }));
        let tree = sample(&docs);

        assert!(field(&tree, "a").mandatory);
        assert!(!field(&tree, "b").mandatory);
    }

    #[test]
    fn test_array_of_scalars_is_opaque_leaf() {
        let tree = sample(&[doc! { "tags": ["x", "y"] }]);
        let tags = field(&tree, "tags");

        assert_eq!(tags.kind, NodeKind::Field);
        assert_eq!(tags.type_name, "array");
        assert!(tags.children.is_empty());
    }

    #[test]
    fn test_array_of_objects_shares_one_schema() {
        let tree = sample(&[doc! { "tags": [{ "k": 1 }, { "k": 2 }] }]);
        let tags = field(&tree, "tags");

        assert_eq!(tags.kind, NodeKind::Array);
        assert_eq!(tags.children.len(), 1);
        assert!(field(&tree, "tags.k").mandatory);
    }

    #[test]
    fn test_heterogeneous_array_elements_merge() {
        let tree = sample(&[doc! { "items": [{ "sku": "a", "qty": 1 }, { "sku": "b", "note": "x" }] }]);

        assert_eq!(paths(&tree), vec!["items", "items.note", "items.qty", "items.sku"]);
        assert!(field(&tree, "items.sku").mandatory);
        assert!(!field(&tree, "items.qty").mandatory);
        assert!(!field(&tree, "items.note").mandatory);
    }

    #[test]
    fn test_numeric_keys_fold_into_array() {
        let tree = sample(&[doc! { "scores": { "0": { "v": 1 }, "1": { "v": 2, "w": 3 } } }]);
        let scores = field(&tree, "scores");

        assert_eq!(scores.kind, NodeKind::Array);
        assert_eq!(scores.type_name, "array of integer");
        assert!(tree.find_by_path("scores.0").is_none());
        assert!(tree.find_by_path("scores.1").is_none());
        assert_eq!(paths(&tree), vec!["scores", "scores.v", "scores.w"]);
    }

    #[test]
    fn test_numeric_keyed_array_elements_never_become_fields() {
        let tree = sample(&[doc! { "tags": [{ "0": 1, "1": 2 }] }]);

        assert_eq!(paths(&tree), vec!["tags"]);
        assert_eq!(field(&tree, "tags").kind, NodeKind::Array);

        let tree = sample(&[doc! { "rows": [{ "0": { "v": 1 } }, { "w": 2 }] }]);
        assert_eq!(paths(&tree), vec!["rows", "rows.v", "rows.w"]);
    }

    #[test]
    fn test_nested_pseudo_arrays_fold_into_one_schema() {
        let tree = sample(&[doc! {
            "grid": { "0": { "0": { "v": 1 }, "1": { "v": 2 } }, "1": { "w": 3 } }
        }]);

        assert_eq!(paths(&tree), vec!["grid", "grid.v", "grid.w"]);
        assert_eq!(field(&tree, "grid").type_name, "array of integer");
        assert!(tree.find_by_path("grid.0").is_none());
    }

    #[test]
    fn test_nested_objects_recurse() {
        let tree = sample(&[
            doc! { "address": { "city": "Oslo", "zip": "0150" } },
            doc! { "address": { "city": "Bergen" } },
        ]);

        assert_eq!(field(&tree, "address").kind, NodeKind::Object);
        assert!(field(&tree, "address.city").mandatory);
        assert!(!field(&tree, "address.zip").mandatory);
    }

    #[test]
    fn test_late_fields_take_hint() {
        let tree = sample(&[doc! { "a": 1 }, doc! { "a": 1, "b": { "c": 1 } }]);

        assert!(!field(&tree, "b").mandatory);
        // first document seen by `b` itself
        assert!(field(&tree, "b.c").mandatory);
    }

    #[test]
    fn test_first_type_wins() {
        let tree = sample(&[doc! { "a": 1 }, doc! { "a": { "nested": true } }, doc! { "a": "text" }]);
        let a = field(&tree, "a");

        assert_eq!(a.kind, NodeKind::Field);
        assert_eq!(a.type_name, "integer");
        assert!(a.children.is_empty());
        assert_eq!(tree.field_count(), 1);
    }

    #[test]
    fn test_paths_independent_of_order() {
        let docs = vec![
            doc! { "a": 1, "nested": { "x": 1 } },
            doc! { "b": "s", "list": [{ "k": 1 }] },
            doc! { "nested": { "y": 2 }, "list": [{ "j": 2 }] },
        ];
        let forward = sample(&docs);
        let reversed: Vec<Document> = docs.iter().rev().cloned().collect();
        let backward = sample(&reversed);

        assert_eq!(paths(&forward), paths(&backward));
    }

    #[test]
    fn test_object_id_samples_skip_primary_id() {
        let owner = ObjectId::new();
        let tree = sample(&[doc! { "_id": ObjectId::new(), "owner": owner }]);

        assert!(field(&tree, "_id").id_samples.is_empty());
        assert_eq!(field(&tree, "owner").id_samples, vec![owner]);
        assert_eq!(field(&tree, "owner").type_name, "string");
    }

    #[test]
    fn test_nested_id_fields_are_sampled() {
        let id = ObjectId::new();
        let tree = sample(&[doc! { "lines": [{ "_id": id }] }]);

        assert_eq!(field(&tree, "lines._id").id_samples, vec![id]);
    }

    #[test]
    fn test_dbref_records_target() {
        let tree = sample(&[doc! { "author": { "$ref": "users", "$id": ObjectId::new() } }]);
        let author = field(&tree, "author");

        assert_eq!(author.type_name, "dbref");
        assert_eq!(author.reference.as_ref().map(|r| r.collection.as_str()), Some("users"));
        assert!(author.children.is_empty());
    }
}
