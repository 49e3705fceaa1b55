use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SchemaError;

/// The injected validation capability.
///
/// Each of the params/body/response slots of a client is either unset
/// (accept anything), a concrete `Schema`, or a factory producing one.
/// `parse` validates the input and returns the — possibly transformed —
/// output value; the engine forwards that output exactly as produced and
/// performs no serialization of its own.
#[async_trait]
pub trait Schema: Send + Sync {
    /// Validate `value`, returning the output value or a structured error.
    async fn parse(&self, value: Value) -> Result<Value, SchemaError>;
}

/// Accept-anything schema; the default for unset schema slots.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnySchema;

#[async_trait]
impl Schema for AnySchema {
    async fn parse(&self, value: Value) -> Result<Value, SchemaError> {
        Ok(value)
    }
}

/// Serde round-trip validation: the value must deserialize as `T`.
///
/// The output is `T` re-serialized, so defaults and field renames applied
/// by the serde derives show up in the validated value.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    /// Create a typed schema for `T`
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedSchema<{}>", std::any::type_name::<T>())
    }
}

#[async_trait]
impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Send + Sync,
{
    async fn parse(&self, value: Value) -> Result<Value, SchemaError> {
        let typed: T =
            serde_json::from_value(value).map_err(|e| SchemaError::new(e.to_string()))?;
        serde_json::to_value(&typed).map_err(|e| SchemaError::new(e.to_string()))
    }
}

/// Closure-backed schema for ad-hoc checks.
pub struct FnSchema<F> {
    check: F,
}

/// Wrap a synchronous check into a [`Schema`].
pub fn schema_fn<F>(check: F) -> FnSchema<F>
where
    F: Fn(Value) -> Result<Value, SchemaError> + Send + Sync,
{
    FnSchema { check }
}

impl<F> fmt::Debug for FnSchema<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSchema")
    }
}

#[async_trait]
impl<F> Schema for FnSchema<F>
where
    F: Fn(Value) -> Result<Value, SchemaError> + Send + Sync,
{
    async fn parse(&self, value: Value) -> Result<Value, SchemaError> {
        (self.check)(value)
    }
}

/// Handle passed to schema factories during config resolution.
///
/// Factories receive this instead of constructing schemas directly so the
/// construction site stays decoupled from the concrete schema types:
///
/// ```ignore
/// let client = Client::builder()
///     .url("https://api.example.com/users")
///     .response_schema_with(|s| s.of::<User>())
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaCatalog;

impl SchemaCatalog {
    /// The accept-anything schema
    #[must_use]
    pub fn any(&self) -> Arc<dyn Schema> {
        Arc::new(AnySchema)
    }

    /// Serde round-trip schema for `T`
    #[must_use]
    pub fn of<T>(&self) -> Arc<dyn Schema>
    where
        T: DeserializeOwned + Serialize + Send + Sync + 'static,
    {
        Arc::new(TypedSchema::<T>::new())
    }

    /// Closure-backed schema
    pub fn check<F>(&self, check: F) -> Arc<dyn Schema>
    where
        F: Fn(Value) -> Result<Value, SchemaError> + Send + Sync + 'static,
    {
        Arc::new(FnSchema { check })
    }
}

/// Factory signature for lazily constructed schemas.
pub type SchemaFactory = dyn Fn(&SchemaCatalog) -> Arc<dyn Schema> + Send + Sync;

/// A schema slot as stored in configuration: either a ready schema or a
/// factory invoked once per resolution.
#[derive(Clone)]
pub enum SchemaSource {
    /// A concrete schema object
    Concrete(Arc<dyn Schema>),
    /// A factory invoked with the [`SchemaCatalog`] handle
    Factory(Arc<SchemaFactory>),
}

impl SchemaSource {
    /// Produce the concrete schema for this slot.
    ///
    /// Factories run exactly once per resolution; a malformed factory only
    /// fails later, when the schema it returned is exercised.
    pub(crate) fn materialize(&self, catalog: &SchemaCatalog) -> Arc<dyn Schema> {
        match self {
            SchemaSource::Concrete(schema) => Arc::clone(schema),
            SchemaSource::Factory(factory) => factory(catalog),
        }
    }
}

impl fmt::Debug for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSource::Concrete(_) => f.write_str("SchemaSource::Concrete"),
            SchemaSource::Factory(_) => f.write_str("SchemaSource::Factory"),
        }
    }
}

impl From<Arc<dyn Schema>> for SchemaSource {
    fn from(schema: Arc<dyn Schema>) -> Self {
        SchemaSource::Concrete(schema)
    }
}
