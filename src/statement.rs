//! One query or mutation as seen by the coherence engine.
//!
//! The host fills a [`Statement`] with the executable text, bound parameters,
//! model identity and a destination buffer, then hands it to the engine hooks.
//! The engine reads the statement, may fill `dest` and `rows_affected` from the
//! cache, and never touches `error`.

use crate::context::CallContext;
use serde_json::Value;
use std::fmt;

/// Failure produced by the source of truth. Passed through untouched.
pub type UpstreamError = Box<dyn std::error::Error + Send + Sync>;

type SqlBuilder = Box<dyn FnOnce() -> String + Send>;

/// Stable identity of the model a statement targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelInfo {
    /// Identity matched against the configured model allow-list
    pub name: String,
    /// Table name used in cache keys and invalidation patterns
    pub table: String,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
        }
    }

    /// Identity derived from the Rust type `M`.
    pub fn of<M: ?Sized + 'static>(table: impl Into<String>) -> Self {
        Self::new(std::any::type_name::<M>(), table)
    }
}

/// Statically known shape of a destination buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Single,
    Collection(usize),
    Opaque,
}

impl ResultShape {
    pub fn row_count(self) -> u64 {
        match self {
            ResultShape::Single => 1,
            ResultShape::Collection(n) => n as u64,
            ResultShape::Opaque => 0,
        }
    }
}

/// Destination types the engine can count rows for after a cache hit.
pub trait QueryResult {
    fn shape(&self) -> ResultShape;
}

impl<T> QueryResult for Vec<T> {
    fn shape(&self) -> ResultShape {
        ResultShape::Collection(self.len())
    }
}

impl<T> QueryResult for Option<T> {
    fn shape(&self) -> ResultShape {
        match self {
            Some(_) => ResultShape::Single,
            None => ResultShape::Opaque,
        }
    }
}

impl QueryResult for Value {
    fn shape(&self) -> ResultShape {
        match self {
            Value::Array(items) => ResultShape::Collection(items.len()),
            Value::Object(_) => ResultShape::Single,
            _ => ResultShape::Opaque,
        }
    }
}

/// Read-only view handed to skip predicates and key generators.
#[derive(Debug, Clone, Copy)]
pub struct QueryInfo<'a> {
    /// Executable text; empty while a deferred builder has not run yet
    pub sql: &'a str,
    pub params: &'a [Value],
    pub model: Option<&'a ModelInfo>,
    pub context: &'a CallContext,
}

impl QueryInfo<'_> {
    pub fn table(&self) -> Option<&str> {
        self.model.map(|m| m.table.as_str())
    }
}

pub struct Statement<T> {
    sql: String,
    builder: Option<SqlBuilder>,
    params: Vec<Value>,
    model: Option<ModelInfo>,
    scope_override: Option<bool>,
    cache_key: Option<String>,
    /// Destination buffer, filled by the source or by a cache hit
    pub dest: T,
    /// Failure reported by the source of truth
    pub error: Option<UpstreamError>,
    pub rows_affected: u64,
    pub context: CallContext,
}

impl<T> Statement<T> {
    pub fn new(dest: T) -> Self {
        Self {
            sql: String::new(),
            builder: None,
            params: Vec::new(),
            model: None,
            scope_override: None,
            cache_key: None,
            dest,
            error: None,
            rows_affected: 0,
            context: CallContext::default(),
        }
    }

    pub fn query(sql: impl Into<String>, dest: T) -> Self {
        Self::new(dest).with_sql(sql)
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self.builder = None;
        self
    }

    /// Defer building the executable text until it is first needed.
    pub fn with_builder<F>(mut self, build: F) -> Self
    where
        F: FnOnce() -> String + Send + 'static,
    {
        self.sql.clear();
        self.builder = Some(Box::new(build));
        self
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_model(mut self, model: ModelInfo) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    /// Bypass the cache for this statement only.
    pub fn skip_cache(mut self) -> Self {
        self.scope_override = Some(true);
        self
    }

    /// Cancel an earlier [`skip_cache`](Self::skip_cache).
    pub fn enable_cache(mut self) -> Self {
        self.scope_override = Some(false);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn model(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    pub fn scope_override(&self) -> Option<bool> {
        self.scope_override
    }

    pub fn set_error(&mut self, err: impl Into<UpstreamError>) {
        self.error = Some(err.into());
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn info(&self) -> QueryInfo<'_> {
        QueryInfo {
            sql: &self.sql,
            params: &self.params,
            model: self.model.as_ref(),
            context: &self.context,
        }
    }

    /// Run the deferred builder if there is one and return the text.
    pub fn build_sql(&mut self) -> &str {
        if let Some(build) = self.builder.take() {
            self.sql = build();
        }
        &self.sql
    }

    pub(crate) fn remember_key(&mut self, key: String) {
        self.cache_key = Some(key);
    }

    pub(crate) fn take_key(&mut self) -> Option<String> {
        self.cache_key.take()
    }
}

impl<T: fmt::Debug> fmt::Debug for Statement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("deferred", &self.builder.is_some())
            .field("params", &self.params)
            .field("model", &self.model)
            .field("dest", &self.dest)
            .field("error", &self.error)
            .field("rows_affected", &self.rows_affected)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct User;

    #[test]
    fn test_shapes() {
        assert_eq!(vec![1, 2, 3].shape().row_count(), 3);
        assert_eq!(Vec::<u8>::new().shape().row_count(), 0);
        assert_eq!(Some(5).shape().row_count(), 1);
        assert_eq!(None::<u8>.shape().row_count(), 0);
        assert_eq!(json!([1, 2]).shape(), ResultShape::Collection(2));
        assert_eq!(json!({"id": 1}).shape(), ResultShape::Single);
        assert_eq!(json!(7).shape(), ResultShape::Opaque);
    }

    #[test]
    fn test_builder_runs_once() {
        let mut stmt = Statement::new(Vec::<u8>::new())
            .with_builder(|| "SELECT * FROM users".to_string());
        assert_eq!(stmt.sql(), "");
        assert_eq!(stmt.build_sql(), "SELECT * FROM users");
        assert_eq!(stmt.build_sql(), "SELECT * FROM users");
    }

    #[test]
    fn test_model_identity() {
        let m = ModelInfo::of::<User>("users");
        assert!(m.name.ends_with("User"));
        assert_eq!(m.table, "users");

        let stmt = Statement::query("SELECT 1", ()).with_model(m).bind(1).bind("a");
        let info = stmt.info();
        assert_eq!(info.table(), Some("users"));
        assert_eq!(info.params, &[json!(1), json!("a")]);
    }

    #[test]
    fn test_scope_override_and_error() {
        let mut stmt = Statement::query("SELECT 1", ()).skip_cache();
        assert_eq!(stmt.scope_override(), Some(true));
        stmt = stmt.enable_cache();
        assert_eq!(stmt.scope_override(), Some(false));

        assert!(!stmt.has_error());
        stmt.set_error("connection reset");
        assert!(stmt.has_error());
    }
}
