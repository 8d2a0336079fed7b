//! Per-database schema registry.
//!
//! Holds one schema per collection for the life of a connection. Validator
//! collections are imported when the database is opened; every other
//! collection is sampled on first request. Each collection is discovered at
//! most once, even when several threads ask for it concurrently.

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::index::{build_indexes, Index};
use crate::reference::{resolve_references, Reference};
use crate::sampler::{DocumentSampler, SampleReport, StopReason};
use crate::schema::{scan_document, FieldView, SchemaTree};
use crate::source::{CollectionSource, DatabaseSource};
use crate::validator::{import_validator, json_schema};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

/// Where a collection's schema came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum SchemaOrigin {
    Sampled(SampleReport),
    Validator,
}

/// Discovery lifecycle of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    NotDiscovered,
    Discovering,
    Discovered,
    /// Validator import failed; the collection is not offered again.
    Unavailable,
}

/// The discovered metadata of one collection.
#[derive(Debug)]
pub struct CollectionSchema {
    pub name: String,
    pub tree: SchemaTree,
    pub indexes: Vec<Index>,
    pub origin: SchemaOrigin,
    pub discovered_at: DateTime<Utc>,
    references: OnceLock<Vec<Reference>>,
}

impl CollectionSchema {
    pub fn references_discovered(&self) -> bool {
        self.references.get().is_some()
    }

    /// References resolved so far; empty until a reference pass has run.
    pub fn references(&self) -> &[Reference] {
        self.references.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn describe(&self) -> CollectionDescription {
        let root = self.tree.root();
        CollectionDescription {
            name: self.name.clone(),
            origin: self.origin.clone(),
            discovered_at: self.discovered_at,
            description: self.tree.node(root).description.clone(),
            fields: self.tree.view(root).fields,
            indexes: self.indexes.clone(),
        }
    }
}

/// Serializable snapshot of a collection schema.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionDescription {
    pub name: String,
    pub origin: SchemaOrigin,
    pub discovered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldView>,
    pub indexes: Vec<Index>,
}

/// `schema` holds `None` once a validator import for the collection failed.
#[derive(Default)]
struct Slot {
    discovering: AtomicBool,
    schema: OnceLock<Option<Arc<CollectionSchema>>>,
}

enum ValidatorOutcome {
    Imported(CollectionSchema),
    /// No validator, or one without `$jsonSchema`: sample instead.
    Absent,
    Failed,
}

#[derive(Default)]
struct Entries {
    slots: HashMap<String, Arc<Slot>>,
    unavailable: HashSet<String>,
}

/// Schema registry for one database.
pub struct MetaDatabase {
    name: String,
    source: Arc<dyn DatabaseSource>,
    config: DiscoveryConfig,
    entries: Mutex<Entries>,
}

impl MetaDatabase {
    /// Open a database: list its collections and eagerly import every
    /// `$jsonSchema` validator. A failed import drops that collection.
    pub fn open(source: Arc<dyn DatabaseSource>, config: DiscoveryConfig) -> Result<Self> {
        let names = source.list_collection_names()?;
        let db = MetaDatabase {
            name: source.name().to_string(),
            source,
            config,
            entries: Mutex::new(Entries::default()),
        };

        for name in &names {
            db.register(name);
        }
        for name in &names {
            db.import_validator_for(name);
        }

        log::debug!("Opened database {} ({} collections)", db.name, names.len());
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Names of the collections the registry offers, sorted.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().slots.keys().cloned().collect();
        names.sort();
        names
    }

    /// The cached schema, discovering it first if needed.
    ///
    /// Returns `None` for unknown or unavailable collections.
    pub fn get_or_discover(&self, name: &str) -> Option<Arc<CollectionSchema>> {
        if self.lock().unavailable.contains(name) {
            return None;
        }
        if let Some(schema) = self.get_if_loaded(name) {
            return Some(schema);
        }

        let collection = self.collection_source(name)?;
        let slot = self.register(name)?;
        let schema = slot
            .schema
            .get_or_init(|| {
                slot.discovering.store(true, Ordering::SeqCst);
                let schema = match self.load_validator(collection.as_ref()) {
                    ValidatorOutcome::Imported(schema) => Some(schema),
                    ValidatorOutcome::Absent => Some(self.discover(collection.as_ref())),
                    ValidatorOutcome::Failed => None,
                };
                slot.discovering.store(false, Ordering::SeqCst);
                schema.map(Arc::new)
            })
            .clone();

        if schema.is_none() {
            self.mark_unavailable(name);
        }
        schema
    }

    /// The cached schema, without triggering discovery.
    pub fn get_if_loaded(&self, name: &str) -> Option<Arc<CollectionSchema>> {
        let slot = self.lock().slots.get(name).cloned()?;
        slot.schema.get().cloned().flatten()
    }

    pub fn state(&self, name: &str) -> DiscoveryState {
        let entries = self.lock();
        if entries.unavailable.contains(name) {
            return DiscoveryState::Unavailable;
        }
        match entries.slots.get(name) {
            Some(slot) if matches!(slot.schema.get(), Some(Some(_))) => DiscoveryState::Discovered,
            Some(slot) if slot.discovering.load(Ordering::SeqCst) => DiscoveryState::Discovering,
            _ => DiscoveryState::NotDiscovered,
        }
    }

    pub fn tree(&self, name: &str) -> Option<Arc<CollectionSchema>> {
        self.get_or_discover(name)
    }

    pub fn indexes(&self, name: &str) -> Vec<Index> {
        self.get_or_discover(name)
            .map(|schema| schema.indexes.clone())
            .unwrap_or_default()
    }

    /// Resolve the collection's typed references, once.
    ///
    /// Target collections are discovered on demand; targets that cannot be
    /// found are dropped.
    pub fn references(&self, name: &str) -> Vec<Reference> {
        let Some(schema) = self.get_or_discover(name) else {
            return Vec::new();
        };
        schema
            .references
            .get_or_init(|| resolve_references(self, &schema))
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // Entries stay consistent even if a holder panicked.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, name: &str) -> Option<Arc<Slot>> {
        let mut entries = self.lock();
        if entries.unavailable.contains(name) {
            return None;
        }
        Some(entries.slots.entry(name.to_string()).or_default().clone())
    }

    fn mark_unavailable(&self, name: &str) {
        let mut entries = self.lock();
        entries.slots.remove(name);
        entries.unavailable.insert(name.to_string());
    }

    fn collection_source(&self, name: &str) -> Option<Arc<dyn CollectionSource>> {
        match self.source.collection(name) {
            Ok(collection) => collection,
            Err(e) => {
                log::warn!("Cannot open collection {}.{name}: {e}", self.name);
                None
            }
        }
    }

    fn import_validator_for(&self, name: &str) {
        let Some(collection) = self.collection_source(name) else {
            return;
        };

        match self.load_validator(collection.as_ref()) {
            ValidatorOutcome::Imported(schema) => {
                if let Some(slot) = self.register(name) {
                    let _ = slot.schema.set(Some(Arc::new(schema)));
                }
            }
            ValidatorOutcome::Absent => {}
            ValidatorOutcome::Failed => self.mark_unavailable(name),
        }
    }

    /// Build the collection's schema from its `$jsonSchema` validator, if it has one.
    fn load_validator(&self, collection: &dyn CollectionSource) -> ValidatorOutcome {
        let name = collection.name();
        let validator = match collection.validator() {
            Ok(Some(validator)) => validator,
            Ok(None) => return ValidatorOutcome::Absent,
            Err(e) => {
                log::warn!("Cannot read validator of {}.{name}, dropping collection: {e}", self.name);
                return ValidatorOutcome::Failed;
            }
        };

        if json_schema(&validator).is_none() {
            log::debug!(
                "Validator of {}.{name} has no $jsonSchema, collection will be sampled",
                self.name
            );
            return ValidatorOutcome::Absent;
        }

        match import_validator(name, &validator) {
            Ok(tree) => {
                let schema = self.assemble(collection, tree, SchemaOrigin::Validator);
                log::info!(
                    "Imported validator schema for {}.{name} ({} fields)",
                    self.name,
                    schema.tree.field_count()
                );
                ValidatorOutcome::Imported(schema)
            }
            Err(e) => {
                log::warn!("Validator import failed, dropping {}.{name}: {e}", self.name);
                ValidatorOutcome::Failed
            }
        }
    }

    fn discover(&self, collection: &dyn CollectionSource) -> CollectionSchema {
        let name = collection.name();
        log::debug!(
            "Sampling {}.{name} with {} strategy",
            self.name,
            self.config.strategy.as_str()
        );

        let total = match collection.count_documents() {
            Ok(total) => Some(total),
            Err(e) => {
                log::warn!("Cannot count documents of {}.{name}: {e}", self.name);
                None
            }
        };

        let mut tree = SchemaTree::new();
        let root = tree.root();
        let report = match collection.find() {
            Ok(mut cursor) => DocumentSampler::new(&self.config).run(cursor.as_mut(), total, |document| {
                scan_document(&mut tree, root, &document, false);
                tree.field_count()
            }),
            Err(e) => {
                log::warn!("Cannot open cursor on {}.{name}: {e}", self.name);
                SampleReport {
                    sampled: 0,
                    skipped: 0,
                    stop_reason: StopReason::Aborted(e.to_string()),
                    elapsed: Duration::ZERO,
                }
            }
        };

        log::info!(
            "Discovered {}.{name}: {} fields from {} documents ({:?})",
            self.name,
            tree.field_count(),
            report.sampled,
            report.stop_reason
        );
        self.assemble(collection, tree, SchemaOrigin::Sampled(report))
    }

    fn assemble(&self, collection: &dyn CollectionSource, tree: SchemaTree, origin: SchemaOrigin) -> CollectionSchema {
        let name = collection.name();
        let indexes = match collection.list_indexes() {
            Ok(descriptors) => build_indexes(name, &tree, &descriptors),
            Err(e) => {
                log::warn!("Cannot list indexes of {}.{name}: {e}", self.name);
                Vec::new()
            }
        };

        CollectionSchema {
            name: name.to_string(),
            tree,
            indexes,
            origin,
            discovered_at: Utc::now(),
            references: OnceLock::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use crate::schema::NodeKind;
    use crate::source::{DocumentCursor, MemoryCollection, MemoryDatabase};
    use bson::{doc, Document};
    use std::sync::atomic::AtomicUsize;

    fn open(db: MemoryDatabase) -> MetaDatabase {
        MetaDatabase::open(Arc::new(db), DiscoveryConfig::default()).unwrap()
    }

    fn field<'a>(schema: &'a CollectionSchema, path: &str) -> &'a crate::schema::Node {
        let id = schema
            .tree
            .find_by_path(path)
            .unwrap_or_else(|| panic!("no field at {path}"));
        schema.tree.node(id)
    }

    #[test]
    fn test_scenario_a_mandatory_flags() {
        let db = open(MemoryDatabase::new("test").with_collection(
            MemoryCollection::new("c").with_documents([doc! { "a": 1 }, doc! { "a": 1, "b": 2 }, doc! { "a": 1 }]),
        ));
        let schema = db.get_or_discover("c").unwrap();

        assert!(field(&schema, "a").mandatory);
        assert!(!field(&schema, "b").mandatory);
        assert!(matches!(schema.origin, SchemaOrigin::Sampled(ref r) if r.sampled == 3));
    }

    #[test]
    fn test_scenario_b_scalar_array() {
        let db = open(
            MemoryDatabase::new("test")
                .with_collection(MemoryCollection::new("c").with_documents([doc! { "tags": ["x", "y"] }])),
        );
        let schema = db.get_or_discover("c").unwrap();
        let tags = field(&schema, "tags");

        assert_eq!(tags.type_name, "array");
        assert!(tags.children.is_empty());
    }

    #[test]
    fn test_scenario_c_object_array() {
        let db = open(MemoryDatabase::new("test").with_collection(
            MemoryCollection::new("c").with_documents([doc! { "tags": [{ "k": 1 }, { "k": 2 }] }]),
        ));
        let schema = db.get_or_discover("c").unwrap();
        let tags = field(&schema, "tags");

        assert_eq!(tags.kind, NodeKind::Array);
        assert_eq!(tags.children.len(), 1);
        assert_eq!(schema.tree.node(tags.children[0]).name, "k");
    }

    #[test]
    fn test_scenario_d_indexes() {
        let db = open(
            MemoryDatabase::new("test").with_collection(
                MemoryCollection::new("c")
                    .with_documents([doc! { "_id": 1, "name": "x" }])
                    .with_index(doc! { "name": "_id_", "key": { "_id": 1 }, "unique": true })
                    .with_index(doc! { "name": "ix1", "key": { "missingField": 1 } }),
            ),
        );
        let indexes = db.indexes("c");

        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].pk);
        assert_eq!(indexes[0].columns.len(), 1);
        assert!(!indexes[1].pk);
        assert_eq!(indexes[1].name, "ix1");
        assert!(indexes[1].columns.is_empty());
    }

    #[test]
    fn test_discovery_is_lazy_and_cached() {
        let db = open(
            MemoryDatabase::new("test")
                .with_collection(MemoryCollection::new("c").with_documents([doc! { "a": 1 }])),
        );

        assert_eq!(db.state("c"), DiscoveryState::NotDiscovered);
        assert!(db.get_if_loaded("c").is_none());

        let first = db.get_or_discover("c").unwrap();
        assert_eq!(db.state("c"), DiscoveryState::Discovered);
        let second = db.get_or_discover("c").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &db.get_if_loaded("c").unwrap()));
    }

    #[test]
    fn test_unknown_collection() {
        let db = open(MemoryDatabase::new("test"));
        assert!(db.get_or_discover("nope").is_none());
        assert!(db.indexes("nope").is_empty());
        assert!(db.references("nope").is_empty());
    }

    #[test]
    fn test_validator_imported_eagerly() {
        let db = open(
            MemoryDatabase::new("test").with_collection(
                MemoryCollection::new("people")
                    .with_documents([doc! { "unrelated": true }])
                    .with_validator(doc! {
                        "$jsonSchema": {
                            "bsonType": "object",
                            "required": ["name"],
                            "properties": {
                                "name": { "bsonType": "string" },
                                "age": { "bsonType": "int" }
                            }
                        }
                    })
                    .with_id_index(),
            ),
        );

        assert_eq!(db.state("people"), DiscoveryState::Discovered);
        let schema = db.get_if_loaded("people").unwrap();
        assert_eq!(schema.origin, SchemaOrigin::Validator);
        assert!(field(&schema, "name").mandatory);
        assert!(!field(&schema, "age").mandatory);
        assert!(schema.tree.find_by_path("unrelated").is_none());
        // `_id` is not declared, so the primary index has no columns
        assert_eq!(schema.indexes.len(), 1);
        assert!(schema.indexes[0].pk);
        assert!(schema.indexes[0].columns.is_empty());
    }

    #[test]
    fn test_malformed_validator_drops_collection() {
        let db = open(
            MemoryDatabase::new("test")
                .with_collection(
                    MemoryCollection::new("broken")
                        .with_documents([doc! { "a": 1 }])
                        .with_validator(doc! { "$jsonSchema": { "properties": { "a": 5 } } }),
                )
                .with_collection(MemoryCollection::new("fine").with_documents([doc! { "a": 1 }])),
        );

        assert_eq!(db.state("broken"), DiscoveryState::Unavailable);
        assert!(db.get_or_discover("broken").is_none());
        assert_eq!(db.collections(), vec!["fine".to_string()]);
    }

    #[test]
    fn test_query_validator_falls_back_to_sampling() {
        let db = open(
            MemoryDatabase::new("test").with_collection(
                MemoryCollection::new("c")
                    .with_documents([doc! { "status": "active" }])
                    .with_validator(doc! { "status": { "$in": ["active", "closed"] } }),
            ),
        );

        let schema = db.get_or_discover("c").unwrap();
        assert!(matches!(schema.origin, SchemaOrigin::Sampled(_)));
        assert!(schema.tree.find_by_path("status").is_some());
    }

    #[test]
    fn test_describe_serializes() {
        let db = open(
            MemoryDatabase::new("test").with_collection(
                MemoryCollection::new("c")
                    .with_documents([doc! { "a": { "b": 1 } }])
                    .with_id_index(),
            ),
        );
        let description = db.get_or_discover("c").unwrap().describe();
        let json = serde_json::to_value(&description).unwrap();

        assert_eq!(json["name"], "c");
        assert_eq!(json["origin"]["source"], "sampled");
        assert_eq!(json["fields"][0]["path"], "a");
        assert_eq!(json["fields"][0]["fields"][0]["type"], "integer");
    }

    /// A collection that counts how often it is scanned.
    struct CountingCollection {
        inner: MemoryCollection,
        scans: AtomicUsize,
    }

    impl CollectionSource for CountingCollection {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn count_documents(&self) -> Result<u64> {
            self.inner.count_documents()
        }

        fn find(&self) -> Result<Box<dyn DocumentCursor + '_>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.inner.find()
        }

        fn list_indexes(&self) -> Result<Vec<Document>> {
            self.inner.list_indexes()
        }

        fn validator(&self) -> Result<Option<Document>> {
            Ok(None)
        }
    }

    struct SingleCollectionDb {
        collection: Arc<CountingCollection>,
    }

    impl DatabaseSource for SingleCollectionDb {
        fn name(&self) -> &str {
            "test"
        }

        fn list_collection_names(&self) -> Result<Vec<String>> {
            Ok(vec![self.collection.name().to_string()])
        }

        fn collection(&self, name: &str) -> Result<Option<Arc<dyn CollectionSource>>> {
            if name == self.collection.name() {
                Ok(Some(self.collection.clone() as Arc<dyn CollectionSource>))
            } else {
                Err(DiscoveryError::Source(format!("no such collection {name}")))
            }
        }
    }

    #[test]
    fn test_concurrent_first_access_discovers_once() {
        let collection = Arc::new(CountingCollection {
            inner: MemoryCollection::new("c").with_documents([doc! { "a": 1 }]),
            scans: AtomicUsize::new(0),
        });
        let db = Arc::new(
            MetaDatabase::open(
                Arc::new(SingleCollectionDb {
                    collection: collection.clone(),
                }),
                DiscoveryConfig::default(),
            )
            .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.get_or_discover("c").unwrap())
            })
            .collect();
        let schemas: Vec<Arc<CollectionSchema>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(collection.scans.load(Ordering::SeqCst), 1);
        assert!(schemas.iter().all(|s| Arc::ptr_eq(s, &schemas[0])));
        // lookup errors degrade to "not found"
        assert!(db.get_or_discover("other").is_none());
    }

    /// Lists nothing at open time but still hands out its collections.
    struct UnlistedDb {
        collections: Vec<Arc<MemoryCollection>>,
    }

    impl DatabaseSource for UnlistedDb {
        fn name(&self) -> &str {
            "test"
        }

        fn list_collection_names(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn collection(&self, name: &str) -> Result<Option<Arc<dyn CollectionSource>>> {
            Ok(self
                .collections
                .iter()
                .find(|c| c.name() == name)
                .map(|c| c.clone() as Arc<dyn CollectionSource>))
        }
    }

    #[test]
    fn test_unlisted_collection_uses_its_validator() {
        let late = MemoryCollection::new("late")
            .with_documents([doc! { "unrelated": 1 }])
            .with_validator(doc! {
                "$jsonSchema": {
                    "bsonType": "object",
                    "required": ["name"],
                    "properties": { "name": { "bsonType": "string" } }
                }
            });
        let broken = MemoryCollection::new("broken")
            .with_documents([doc! { "a": 1 }])
            .with_validator(doc! { "$jsonSchema": { "properties": { "a": 5 } } });
        let db = MetaDatabase::open(
            Arc::new(UnlistedDb {
                collections: vec![Arc::new(late), Arc::new(broken)],
            }),
            DiscoveryConfig::default(),
        )
        .unwrap();

        assert_eq!(db.state("late"), DiscoveryState::NotDiscovered);
        let schema = db.get_or_discover("late").unwrap();
        assert_eq!(schema.origin, SchemaOrigin::Validator);
        assert!(field(&schema, "name").mandatory);
        assert!(schema.tree.find_by_path("unrelated").is_none());

        assert!(db.get_or_discover("broken").is_none());
        assert_eq!(db.state("broken"), DiscoveryState::Unavailable);
        assert!(db.get_or_discover("broken").is_none());
        assert!(!db.collections().contains(&"broken".to_string()));
    }
}
