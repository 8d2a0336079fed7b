// In-memory document store: fixtures for tests and dataset directories for the CLI

use super::{CollectionSource, DatabaseSource, DocumentClient, DocumentCursor};
use crate::error::{DiscoveryError, Result};
use bson::{doc, Bson, Document};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const INDEXES_SUFFIX: &str = ".indexes.json";
const VALIDATOR_SUFFIX: &str = ".validator.json";

/// A collection whose documents live in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    name: String,
    documents: Vec<Document>,
    indexes: Vec<Document>,
    validator: Option<Document>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryCollection {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_documents(mut self, documents: impl IntoIterator<Item = Document>) -> Self {
        self.documents.extend(documents);
        self
    }

    pub fn with_index(mut self, descriptor: Document) -> Self {
        self.indexes.push(descriptor);
        self
    }

    /// Adds the `_id_` index every collection carries natively.
    pub fn with_id_index(self) -> Self {
        self.with_index(doc! { "name": "_id_", "key": { "_id": 1 } })
    }

    pub fn with_validator(mut self, validator: Document) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }
}

impl CollectionSource for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn count_documents(&self) -> Result<u64> {
        Ok(self.documents.len() as u64)
    }

    fn find(&self) -> Result<Box<dyn DocumentCursor + '_>> {
        Ok(Box::new(MemoryCursor::new(&self.documents)))
    }

    fn list_indexes(&self) -> Result<Vec<Document>> {
        Ok(self.indexes.clone())
    }

    fn validator(&self) -> Result<Option<Document>> {
        Ok(self.validator.clone())
    }
}

/// Cursor over a borrowed slice of documents.
#[derive(Debug)]
pub struct MemoryCursor<'a> {
    documents: &'a [Document],
    position: usize,
    closed: bool,
}

impl<'a> MemoryCursor<'a> {
    pub fn new(documents: &'a [Document]) -> Self {
        MemoryCursor {
            documents,
            position: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl DocumentCursor for MemoryCursor<'_> {
    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && self.position < self.documents.len())
    }

    fn next(&mut self) -> Result<Option<Document>> {
        if !self.has_next()? {
            return Ok(None);
        }
        let document = self.documents[self.position].clone();
        self.position += 1;
        Ok(Some(document))
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        if self.closed {
            return Ok(0);
        }
        let remaining = (self.documents.len() - self.position) as u64;
        let skipped = n.min(remaining);
        self.position += skipped as usize;
        Ok(skipped)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// A database of in-memory collections.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    name: String,
    collections: BTreeMap<String, Arc<MemoryCollection>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryDatabase {
            name: name.into(),
            collections: BTreeMap::new(),
        }
    }

    pub fn with_collection(mut self, collection: MemoryCollection) -> Self {
        self.collections
            .insert(collection.name.clone(), Arc::new(collection));
        self
    }

    /// Load every collection file found directly under `dir`.
    ///
    /// `<name>.json` holds a JSON array of extended-JSON documents and
    /// `<name>.jsonl` one document per line. Optional `<name>.indexes.json`
    /// and `<name>.validator.json` sit next to it. Collections without an
    /// indexes file get the native `_id_` index.
    pub fn load_dir(name: &str, dir: &Path) -> Result<Self> {
        let mut db = MemoryDatabase::new(name);

        for file_path in glob_files(dir, "*.json")?
            .into_iter()
            .chain(glob_files(dir, "*.jsonl")?)
        {
            let file_name = file_name_of(&file_path);
            if file_name.ends_with(INDEXES_SUFFIX) || file_name.ends_with(VALIDATOR_SUFFIX) {
                continue;
            }

            let (stem, documents) = if let Some(stem) = file_name.strip_suffix(".jsonl") {
                (stem, read_json_lines(&file_path)?)
            } else {
                let stem = file_name.trim_end_matches(".json");
                (stem, read_json_array(&file_path)?)
            };

            let mut collection = MemoryCollection::new(stem).with_documents(documents);

            let indexes_path = dir.join(format!("{stem}{INDEXES_SUFFIX}"));
            if indexes_path.exists() {
                for descriptor in read_json_array(&indexes_path)? {
                    collection = collection.with_index(descriptor);
                }
            } else {
                collection = collection.with_id_index();
            }

            let validator_path = dir.join(format!("{stem}{VALIDATOR_SUFFIX}"));
            if validator_path.exists() {
                collection = collection.with_validator(read_json_document(&validator_path)?);
            }

            log::debug!(
                "Loaded collection {}.{} ({} documents)",
                name,
                stem,
                collection.documents.len()
            );
            db = db.with_collection(collection);
        }

        Ok(db)
    }
}

impl DatabaseSource for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_collection_names(&self) -> Result<Vec<String>> {
        Ok(self.collections.keys().cloned().collect())
    }

    fn collection(&self, name: &str) -> Result<Option<Arc<dyn CollectionSource>>> {
        Ok(self
            .collections
            .get(name)
            .map(|c| c.clone() as Arc<dyn CollectionSource>))
    }
}

/// A client over a set of in-memory databases.
#[derive(Debug, Default)]
pub struct MemoryClient {
    databases: RwLock<BTreeMap<String, Arc<MemoryDatabase>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(self, database: MemoryDatabase) -> Self {
        if let Ok(mut databases) = self.databases.write() {
            databases.insert(database.name.clone(), Arc::new(database));
        }
        self
    }

    /// Load a dataset directory: every subdirectory of `root` is a database.
    pub fn load_dir(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(DiscoveryError::Dataset(format!(
                "Data directory does not exist: {}",
                root.display()
            )));
        }

        let mut client = MemoryClient::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let name = file_name_of(&path);
            client = client.with_database(MemoryDatabase::load_dir(&name, &path)?);
        }
        Ok(client)
    }
}

impl DocumentClient for MemoryClient {
    fn list_database_names(&self) -> Result<Vec<String>> {
        let databases = self
            .databases
            .read()
            .map_err(|_| DiscoveryError::Source("database list lock poisoned".into()))?;
        Ok(databases
            .iter()
            .filter(|(_, db)| !db.collections.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn database(&self, name: &str) -> Result<Arc<dyn DatabaseSource>> {
        let databases = self
            .databases
            .read()
            .map_err(|_| DiscoveryError::Source("database list lock poisoned".into()))?;
        let db = databases
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(MemoryDatabase::new(name)));
        Ok(db)
    }
}

fn glob_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/{}", dir.display(), pattern);
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| DiscoveryError::Dataset(format!("Glob error: {e}")))?
        .filter_map(|r| r.ok())
        .collect();
    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

fn to_document(value: serde_json::Value, path: &Path) -> Result<Document> {
    match Bson::try_from(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(DiscoveryError::Dataset(format!(
            "{}: expected a document, got {:?}",
            path.display(),
            other.element_type()
        ))),
    }
}

fn read_json_array(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| to_document(item, path))
            .collect(),
        _ => Err(DiscoveryError::Dataset(format!(
            "{}: expected a JSON array of documents",
            path.display()
        ))),
    }
}

fn read_json_lines(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| to_document(serde_json::from_str(line)?, path))
        .collect()
}

fn read_json_document(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path)?;
    to_document(serde_json::from_str(&content)?, path)
}
