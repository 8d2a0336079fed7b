use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::index::Index;
use crate::reference::Reference;
use crate::registry::{CollectionSchema, MetaDatabase};
use crate::schema::{FieldView, NodeKind, SchemaTree};
use crate::source::DocumentClient;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// State that lives as long as one session, shared by whoever holds it.
#[derive(Debug, Default)]
pub struct SessionState {
    created_databases: Mutex<BTreeSet<String>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a database created during this session. The store only
    /// lists databases once they hold data.
    pub fn record_database(&self, name: &str) {
        self.created().insert(name.to_string());
    }

    pub fn created_databases(&self) -> Vec<String> {
        self.created().iter().cloned().collect()
    }

    fn created(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.created_databases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One column as a relational metadata layer reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnRow {
    pub collection: String,
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
    pub depth: usize,
    pub nested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

/// Flatten a tree into column rows, depth-first in child order.
pub fn flatten_columns(collection: &str, tree: &SchemaTree) -> Vec<ColumnRow> {
    tree.walk()
        .into_iter()
        .map(|id| {
            let node = tree.node(id);
            ColumnRow {
                collection: collection.to_string(),
                path: node.path.clone(),
                name: node.name.clone(),
                type_name: node.type_name.clone(),
                nullable: !node.mandatory,
                depth: node.path.matches('.').count(),
                nested: node.kind != NodeKind::Field,
                description: node.description.clone(),
                options: node.options.clone(),
            }
        })
        .collect()
}

/// One database's registry; empty until opened successfully.
type RegistrySlot = Arc<Mutex<Option<Arc<MetaDatabase>>>>;

/// Entry point for metadata over every database a client can reach.
pub struct MetaCatalog {
    client: Arc<dyn DocumentClient>,
    config: DiscoveryConfig,
    session: Arc<SessionState>,
    registries: Mutex<HashMap<String, RegistrySlot>>,
}

impl MetaCatalog {
    pub fn new(client: Arc<dyn DocumentClient>, config: DiscoveryConfig, session: Arc<SessionState>) -> Self {
        MetaCatalog {
            client,
            config,
            session,
            registries: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Databases the store reports plus those created in this session.
    pub fn databases(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.client.list_database_names()?.into_iter().collect();
        names.extend(self.session.created_databases());
        Ok(names.into_iter().collect())
    }

    pub fn create_database(&self, name: &str) {
        log::debug!("Session database created: {name}");
        self.session.record_database(name);
    }

    /// Registry for `name`, opened on first use.
    ///
    /// Only the slot of `name` is held while the registry opens, so other
    /// databases stay reachable meanwhile.
    pub fn database(&self, name: &str) -> Result<Arc<MetaDatabase>> {
        let existing = self.registries().get(name).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                if !self.databases()?.iter().any(|known| known == name) {
                    return Err(DiscoveryError::UnknownDatabase(name.to_string()));
                }
                self.registries().entry(name.to_string()).or_default().clone()
            }
        };

        let mut registry = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(db) = registry.as_ref() {
            return Ok(db.clone());
        }

        let db = Arc::new(MetaDatabase::open(self.client.database(name)?, self.config.clone())?);
        *registry = Some(db.clone());
        Ok(db)
    }

    fn registries(&self) -> MutexGuard<'_, HashMap<String, RegistrySlot>> {
        self.registries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn collections(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.database(database)?.collections())
    }

    pub fn collection(&self, database: &str, collection: &str) -> Result<Arc<CollectionSchema>> {
        self.database(database)?
            .get_or_discover(collection)
            .ok_or_else(|| DiscoveryError::UnknownCollection {
                database: database.to_string(),
                collection: collection.to_string(),
            })
    }

    /// Nested view of the collection's tree, starting at its root object.
    pub fn tree(&self, database: &str, collection: &str) -> Result<FieldView> {
        let schema = self.collection(database, collection)?;
        Ok(schema.tree.view(schema.tree.root()))
    }

    pub fn indexes(&self, database: &str, collection: &str) -> Result<Vec<Index>> {
        Ok(self.collection(database, collection)?.indexes.clone())
    }

    pub fn references(&self, database: &str, collection: &str) -> Result<Vec<Reference>> {
        // surfaces unknown collections as errors before the lazy pass
        self.collection(database, collection)?;
        Ok(self.database(database)?.references(collection))
    }

    pub fn columns(&self, database: &str, collection: &str) -> Result<Vec<ColumnRow>> {
        let schema = self.collection(database, collection)?;
        Ok(flatten_columns(collection, &schema.tree))
    }
}
