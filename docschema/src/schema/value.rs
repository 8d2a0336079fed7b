// Value classification: one decision per value, made before any merging

use super::tree::ReferenceTarget;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde::Serialize;

/// The fixed set of scalar types discovery reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Integer,
    Long,
    Double,
    Timestamp,
    Date,
    /// Everything else: strings, booleans, regexes, nulls, decimals, ...
    String,
}

impl ScalarType {
    pub fn of(value: &Bson) -> Self {
        match value {
            Bson::Int32(_) => ScalarType::Integer,
            Bson::Int64(_) => ScalarType::Long,
            Bson::Double(_) => ScalarType::Double,
            Bson::Timestamp(_) => ScalarType::Timestamp,
            Bson::DateTime(_) => ScalarType::Date,
            _ => ScalarType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Integer => "integer",
            ScalarType::Long => "long",
            ScalarType::Double => "double",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Date => "date",
            ScalarType::String => "string",
        }
    }
}

/// Runtime shape of one value.
#[derive(Debug)]
pub enum ValueShape<'a> {
    Scalar(ScalarType),
    ObjectId(&'a ObjectId),
    /// `{ "$ref": .., "$id": .., "$db"?: .. }`
    Reference(ReferenceTarget),
    Object(&'a Document),
    /// A document whose keys are all integers: merged like an array.
    PseudoArray(&'a Document),
    /// Empty array, or every element a document.
    ObjectArray(&'a [Bson]),
    /// Array of scalars or of mixed content.
    OpaqueArray,
}

impl<'a> ValueShape<'a> {
    pub fn classify(value: &'a Bson) -> Self {
        match value {
            Bson::ObjectId(id) => ValueShape::ObjectId(id),
            Bson::Document(document) => {
                if let Some(target) = reference_target(document) {
                    ValueShape::Reference(target)
                } else if has_numeric_keys(document) {
                    ValueShape::PseudoArray(document)
                } else {
                    ValueShape::Object(document)
                }
            }
            Bson::Array(items) => {
                if items.iter().all(|item| matches!(item, Bson::Document(_))) {
                    ValueShape::ObjectArray(items)
                } else {
                    ValueShape::OpaqueArray
                }
            }
            other => ValueShape::Scalar(ScalarType::of(other)),
        }
    }
}

fn reference_target(document: &Document) -> Option<ReferenceTarget> {
    let collection = document.get_str("$ref").ok()?;
    if !document.contains_key("$id") {
        return None;
    }
    Some(ReferenceTarget {
        collection: collection.to_string(),
        database: document.get_str("$db").ok().map(str::to_string),
    })
}

fn has_numeric_keys(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| is_numeric_key(key))
}

fn is_numeric_key(key: &str) -> bool {
    let digits = key.strip_prefix('-').unwrap_or(key);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
