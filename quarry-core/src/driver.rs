use crate::{ParameterCustomizer, QueryResult, Result, Value};
use futures::Stream;
use std::{
    fmt::{self, Display},
    future::Future,
    sync::Arc,
};

/// Entry point of a database backend.
///
/// A driver owns whatever pooling or connection configuration it needs and
/// hands out one [`Connection`] per logical unit of work.
pub trait Driver: Send + Sync + 'static {
    type Connection: Connection;

    /// Human readable backend name, used in log messages.
    const NAME: &'static str;

    /// Placeholder strategy for this backend's SQL dialect.
    fn parameter_customizer(&self) -> Arc<dyn ParameterCustomizer>;

    /// Acquire a connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// One live connection.
pub trait Connection: Send + Sync + 'static {
    type Statement: Statement;

    /// Prepare a statement from already rewritten SQL.
    fn create_statement(&self, sql: &str) -> Result<Self::Statement>;

    /// Isolation level used when a transaction does not request one.
    fn transaction_isolation_level(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> impl Future<Output = Result<()>> + Send;

    fn commit_transaction(&self) -> impl Future<Output = Result<()>> + Send;

    fn rollback_transaction(&self) -> impl Future<Output = Result<()>> + Send;

    /// Release the connection.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// A prepared statement with zero or more rows of bindings.
///
/// Binding methods return `&mut Self` for chaining:
/// ```rust,ignore
/// statement.bind("$1", 42.into())?.add()?.bind("$1", 43.into())?;
/// ```
pub trait Statement: Send + 'static {
    /// Bind a value to the parameter identified by `key` in the current row.
    fn bind(&mut self, key: &str, value: Value) -> Result<&mut Self>;
    /// Bind a null, `ty` is the typed empty value describing the column type.
    fn bind_null(&mut self, key: &str, ty: Value) -> Result<&mut Self>;
    /// Close the current row of bindings and start a new one.
    fn add(&mut self) -> Result<&mut Self>;
    /// Run the statement. Batched statements emit one result per bound row.
    fn execute(self) -> impl Stream<Item = Result<QueryResult>> + Send + 'static;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        })
    }
}
