use std::fmt::Debug;

use serde_json::Value;
use thiserror::Error;

use crate::{Item, NamespacedName};

/// Errors returned when reading object metadata.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MetadataError {
    /// The object representation is not a JSON object.
    #[error("object is not a JSON object")]
    NotAnObject,

    /// A metadata field is present but is not a string.
    #[error("metadata.{0} is not a string")]
    InvalidField(&'static str),

    /// The object has no name.
    #[error("object has no metadata.name")]
    MissingName,
}

/// Reads identifying metadata out of an opaque object representation.
pub trait MetadataAccessor: Debug + Send + Sync + 'static {
    /// The object's namespace, empty for cluster-scoped objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace field is malformed.
    fn namespace(&self, item: &Item) -> Result<String, MetadataError>;

    /// The object's name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is missing or malformed.
    fn name(&self, item: &Item) -> Result<String, MetadataError>;

    /// The object's optimistic-concurrency token, if it carries one.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is malformed.
    fn resource_version(&self, item: &Item) -> Result<Option<String>, MetadataError>;

    /// The object's namespace and name.
    ///
    /// # Errors
    ///
    /// Returns an error if either field cannot be read.
    fn namespaced_name(&self, item: &Item) -> Result<NamespacedName, MetadataError> {
        Ok(NamespacedName {
            namespace: self.namespace(item)?,
            name: self.name(item)?,
        })
    }
}

/// Accessor for Kubernetes-style `metadata` blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonMetadataAccessor;

impl JsonMetadataAccessor {
    fn field<'a>(item: &'a Item, field: &'static str) -> Result<Option<&'a str>, MetadataError> {
        let object = item.as_value().as_object().ok_or(MetadataError::NotAnObject)?;

        let Some(metadata) = object.get("metadata") else {
            return Ok(None);
        };

        match metadata.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(MetadataError::InvalidField(field)),
        }
    }
}

impl MetadataAccessor for JsonMetadataAccessor {
    fn namespace(&self, item: &Item) -> Result<String, MetadataError> {
        Ok(Self::field(item, "namespace")?.unwrap_or_default().to_string())
    }

    fn name(&self, item: &Item) -> Result<String, MetadataError> {
        match Self::field(item, "name")? {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(MetadataError::MissingName),
        }
    }

    fn resource_version(&self, item: &Item) -> Result<Option<String>, MetadataError> {
        Ok(Self::field(item, "resourceVersion")?.map(ToString::to_string))
    }
}
