//! Builds a schema tree from a collection's `$jsonSchema` validator instead
//! of from sampled documents.
//!
//! Mandatory flags come only from each level's `required` list. Constraints
//! such as `pattern`, `minimum` and `maximum` are kept as descriptive option
//! text and never enforced.

use crate::error::{DiscoveryError, Result};
use crate::schema::{NodeId, NodeKind, SchemaTree, ARRAY_TYPE, ENUM_TYPE, OBJECT_TYPE};
use bson::{Bson, Document};

const JSON_SCHEMA_KEY: &str = "$jsonSchema";
const DESCRIBED_CONSTRAINTS: [&str; 3] = ["pattern", "minimum", "maximum"];

/// The `$jsonSchema` part of a validator, if it has one.
///
/// Validators written as plain query expressions carry no schema.
pub fn json_schema(validator: &Document) -> Option<&Bson> {
    validator.get(JSON_SCHEMA_KEY)
}

/// Build a fresh tree for `collection` from its validator document.
///
/// Any malformed definition fails the whole import; no partial tree is returned.
pub fn import_validator(collection: &str, validator: &Document) -> Result<SchemaTree> {
    let schema = json_schema(validator)
        .ok_or_else(|| DiscoveryError::validator(collection, "validator has no $jsonSchema"))?;
    let schema = as_definition(collection, JSON_SCHEMA_KEY, schema)?;

    let mut importer = ValidatorImporter {
        collection,
        tree: SchemaTree::new(),
    };

    if let Some(type_name) = importer.bson_type(JSON_SCHEMA_KEY, schema)? {
        if type_name != OBJECT_TYPE {
            return Err(DiscoveryError::validator(
                collection,
                format!("top-level bsonType must be 'object', found '{type_name}'"),
            ));
        }
    }

    let root = importer.tree.root();
    if let Some(description) = schema.get("description").and_then(Bson::as_str) {
        importer.tree.node_mut(root).description = Some(description.to_string());
    }
    importer.visit_properties(root, JSON_SCHEMA_KEY, schema)?;
    Ok(importer.tree)
}

struct ValidatorImporter<'a> {
    collection: &'a str,
    tree: SchemaTree,
}

impl ValidatorImporter<'_> {
    /// Add every entry of `definition.properties` under `parent`.
    fn visit_properties(&mut self, parent: NodeId, context: &str, definition: &Document) -> Result<()> {
        let required = self.required(context, definition)?;

        let properties = match definition.get("properties") {
            None => return Ok(()),
            Some(Bson::Document(properties)) => properties,
            Some(_) => {
                return Err(self.error(format!("'{context}.properties' must be a document")));
            }
        };

        for (name, child) in properties {
            let child = as_definition(self.collection, name, child)?;
            let mandatory = required.iter().any(|r| r == name);
            self.visit_validator_node(parent, name, child, mandatory)?;
        }
        Ok(())
    }

    fn visit_validator_node(
        &mut self,
        parent: NodeId,
        name: &str,
        definition: &Document,
        mandatory: bool,
    ) -> Result<()> {
        let type_name = self.bson_type(name, definition)?;

        let id = if let Some(values) = definition.get("enum") {
            let Bson::Array(values) = values else {
                return Err(self.error(format!("'{name}.enum' must be an array")));
            };
            let (id, _) = self
                .tree
                .get_or_create_child(parent, name, NodeKind::Field, ENUM_TYPE, mandatory);
            self.tree.node_mut(id).options = Some(enum_options(values)?);
            id
        } else {
            match type_name.as_deref() {
                Some(OBJECT_TYPE) => {
                    let (id, _) = self
                        .tree
                        .get_or_create_child(parent, name, NodeKind::Object, OBJECT_TYPE, mandatory);
                    self.visit_properties(id, name, definition)?;
                    id
                }
                Some(ARRAY_TYPE) => self.visit_array(parent, name, definition, mandatory)?,
                other => {
                    let type_name = other.unwrap_or("string");
                    let (id, _) = self
                        .tree
                        .get_or_create_child(parent, name, NodeKind::Field, type_name, mandatory);
                    self.tree.node_mut(id).options = constraint_options(definition);
                    id
                }
            }
        };

        if let Some(description) = definition.get("description") {
            let Some(description) = description.as_str() else {
                return Err(self.error(format!("'{name}.description' must be a string")));
            };
            self.tree.node_mut(id).description = Some(description.to_string());
        }
        Ok(())
    }

    fn visit_array(
        &mut self,
        parent: NodeId,
        name: &str,
        definition: &Document,
        mandatory: bool,
    ) -> Result<NodeId> {
        let element = match definition.get("items") {
            Some(Bson::Document(items)) if items.contains_key("properties") => Some(items),
            Some(Bson::Document(_)) | Some(Bson::Array(_)) | None => None,
            Some(_) => return Err(self.error(format!("'{name}.items' must be a document or an array"))),
        };

        let schema = match element {
            Some(items) => Some(items),
            None if definition.contains_key("properties") => Some(definition),
            None => None,
        };

        match schema {
            Some(schema) => {
                let (id, _) = self
                    .tree
                    .get_or_create_child(parent, name, NodeKind::Array, ARRAY_TYPE, mandatory);
                self.visit_properties(id, name, schema)?;
                Ok(id)
            }
            None => {
                let (id, _) = self
                    .tree
                    .get_or_create_child(parent, name, NodeKind::Field, ARRAY_TYPE, mandatory);
                Ok(id)
            }
        }
    }

    /// `bsonType` (or plain JSON-schema `type`). A list of types resolves to
    /// its first non-null entry.
    fn bson_type(&self, context: &str, definition: &Document) -> Result<Option<String>> {
        let declared = definition.get("bsonType").or_else(|| definition.get("type"));
        match declared {
            None => Ok(None),
            Some(Bson::String(type_name)) => Ok(Some(type_name.clone())),
            Some(Bson::Array(types)) => {
                let mut names = Vec::with_capacity(types.len());
                for entry in types {
                    let Some(type_name) = entry.as_str() else {
                        return Err(self.error(format!("'{context}.bsonType' entries must be strings")));
                    };
                    names.push(type_name);
                }
                Ok(names
                    .iter()
                    .find(|name| **name != "null")
                    .or(names.first())
                    .map(|name| name.to_string()))
            }
            Some(_) => Err(self.error(format!("'{context}.bsonType' must be a string or an array"))),
        }
    }

    fn required(&self, context: &str, definition: &Document) -> Result<Vec<String>> {
        match definition.get("required") {
            None => Ok(Vec::new()),
            Some(Bson::Array(names)) => names
                .iter()
                .map(|name| {
                    name.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.error(format!("'{context}.required' entries must be strings")))
                })
                .collect(),
            Some(_) => Err(self.error(format!("'{context}.required' must be an array"))),
        }
    }

    fn error(&self, message: String) -> DiscoveryError {
        DiscoveryError::validator(self.collection, message)
    }
}

fn as_definition<'a>(collection: &str, name: &str, value: &'a Bson) -> Result<&'a Document> {
    value
        .as_document()
        .ok_or_else(|| DiscoveryError::validator(collection, format!("definition of '{name}' must be a document")))
}

/// Serialized literal list, e.g. `["draft","published"]`.
fn enum_options(values: &[Bson]) -> Result<String> {
    let literals: Vec<serde_json::Value> = values
        .iter()
        .cloned()
        .map(Bson::into_relaxed_extjson)
        .collect();
    Ok(serde_json::to_string(&literals)?)
}

fn constraint_options(definition: &Document) -> Option<String> {
    let parts: Vec<String> = DESCRIBED_CONSTRAINTS
        .iter()
        .filter_map(|key| {
            definition
                .get(*key)
                .map(|value| format!("{key}: {}", value.clone().into_relaxed_extjson()))
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
