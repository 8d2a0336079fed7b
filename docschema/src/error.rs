use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Validator error in {collection}: {message}")]
    Validator { collection: String, message: String },

    #[error("Index descriptor error: {0}")]
    IndexDescriptor(String),

    #[error("Database not found: {0}")]
    UnknownDatabase(String),

    #[error("Collection not found: {database}.{collection}")]
    UnknownCollection { database: String, collection: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Extended JSON error: {0}")]
    ExtendedJson(#[from] bson::extjson::de::Error),
}

impl DiscoveryError {
    pub(crate) fn validator(collection: &str, message: impl Into<String>) -> Self {
        DiscoveryError::Validator {
            collection: collection.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
