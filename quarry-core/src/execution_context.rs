use crate::{
    ColumnMapper, Connection, Database, Driver, IsolationLevel, Mappers, Result, RowMapper,
    RowMapperFactory, SqlTemplate, StatementContext, TypeInfo, truncate_long,
};
use async_stream::stream;
use futures::{
    StreamExt,
    stream::{BoxStream, Stream},
};
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::{runtime::Handle, task::JoinHandle};

/// One live logical connection, the scope statements are created in.
///
/// At most one transaction is open per context: nested transaction requests
/// join the open one instead of beginning another.
pub struct ExecutionContext<D: Driver> {
    connection: Arc<D::Connection>,
    database: Database<D>,
    in_transaction: Arc<AtomicBool>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Driver> ExecutionContext<D> {
    pub(crate) fn new(connection: D::Connection, database: Database<D>) -> Self {
        Self {
            connection: Arc::new(connection),
            database,
            in_transaction: Default::default(),
            cleanup: Default::default(),
        }
    }

    pub fn connection(&self) -> &D::Connection {
        &self.connection
    }

    pub fn database(&self) -> &Database<D> {
        &self.database
    }

    pub fn mappers(&self) -> &Mappers {
        self.database.mappers()
    }

    /// Parsed template for `sql`, parsed once per distinct text.
    pub fn template(&self, sql: &str) -> Arc<SqlTemplate> {
        self.database.template(sql)
    }

    pub fn create_statement(&self, sql: &str) -> Result<StatementContext<D>> {
        self.create_statement_from(self.template(sql))
    }

    pub fn create_statement_from(&self, template: Arc<SqlTemplate>) -> Result<StatementContext<D>> {
        log::debug!("Preparing {}", truncate_long!(template.sql()));
        let statement = self.connection.create_statement(template.sql())?;
        Ok(StatementContext::new(template, statement))
    }

    pub fn find_row_mapper(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn RowMapper>>> {
        self.mappers().find_row_mapper(ty)
    }

    pub fn resolve_row_mapper(
        &self,
        ty: &TypeInfo,
        factory: &Arc<dyn RowMapperFactory>,
    ) -> Result<Option<Arc<dyn RowMapper>>> {
        self.mappers().resolve_row_mapper(ty, factory)
    }

    pub fn find_column_mapper(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn ColumnMapper>>> {
        self.mappers().find_column_mapper(ty)
    }

    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    /// Transactional scope over this context.
    pub fn in_transaction(
        self: &Arc<Self>,
        isolation_level: Option<IsolationLevel>,
    ) -> TransactionScope<D> {
        TransactionScope {
            context: self.clone(),
            isolation_level,
        }
    }

    /// Release the connection.
    ///
    /// A rollback still pending from a dropped transaction scope completes
    /// before the connection closes.
    pub async fn close(&self) -> Result<()> {
        if let Some(rollback) = self.pending_rollback() {
            let _ = rollback.await;
        }
        log::debug!("Closing {} connection", D::NAME);
        self.connection.close().await
    }

    fn pending_rollback(&self) -> Option<JoinHandle<()>> {
        self.cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Closes the connection from a task on the ambient runtime, used when
    /// the owning stream is dropped before completion.
    pub(crate) fn close_detached(&self) {
        let connection = self.connection.clone();
        let pending = self.pending_rollback();
        spawn_or_warn("close the connection", async move {
            if let Some(rollback) = pending {
                let _ = rollback.await;
            }
            if let Err(e) = connection.close().await {
                log::error!("Failed to close the {} connection: {e:#}", D::NAME);
            }
        });
    }
}

fn spawn_or_warn(
    what: &str,
    task: impl Future<Output = ()> + Send + 'static,
) -> Option<JoinHandle<()>> {
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(task)),
        Err(..) => {
            log::warn!("No tokio runtime available to {what}");
            None
        }
    }
}

/// Begins, joins, commits or rolls back the transaction of one context.
pub struct TransactionScope<D: Driver> {
    context: Arc<ExecutionContext<D>>,
    isolation_level: Option<IsolationLevel>,
}

/// Releases the transaction flag of an owning scope dropped before completion,
/// rolling back first when the transaction was begun.
struct TransactionGuard<D: Driver> {
    context: Arc<ExecutionContext<D>>,
    owner: bool,
    begun: bool,
}

impl<D: Driver> TransactionGuard<D> {
    fn release(&mut self) {
        self.owner = false;
        self.begun = false;
        self.context.in_transaction.store(false, Ordering::Release);
    }
}

impl<D: Driver> Drop for TransactionGuard<D> {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        let flag = self.context.in_transaction.clone();
        if !self.begun {
            log::debug!("Transaction scope dropped before the transaction began");
            flag.store(false, Ordering::Release);
            return;
        }
        log::warn!("Transaction scope dropped before completion, rolling back");
        let connection = self.context.connection.clone();
        let task = spawn_or_warn("roll back the cancelled transaction", async move {
            if let Err(e) = connection.rollback_transaction().await {
                log::error!("Failed to roll back the cancelled transaction: {e:#}");
            }
            flag.store(false, Ordering::Release);
        });
        match task {
            Some(task) => {
                *self
                    .context
                    .cleanup
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(task);
            }
            None => self.context.in_transaction.store(false, Ordering::Release),
        }
    }
}

impl<D: Driver> TransactionScope<D> {
    /// Runs `f` inside the transaction.
    ///
    /// The first scope to start on a context owns the transaction: it begins
    /// it, then commits on success or rolls back on error or cancellation.
    /// Scopes starting while a transaction is open only join it.
    pub fn run<T, S, F>(self, f: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        F: FnOnce(Arc<ExecutionContext<D>>) -> Result<S> + Send + 'static,
    {
        let TransactionScope {
            context,
            isolation_level,
        } = self;
        stream! {
            let owner = context
                .in_transaction
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            let mut guard = TransactionGuard {
                context: context.clone(),
                owner,
                begun: false,
            };
            if owner {
                let level = isolation_level
                    .unwrap_or_else(|| context.connection.transaction_isolation_level());
                log::debug!("Begin transaction ({level})");
                if let Err(e) = context.connection.begin_transaction(level).await {
                    guard.release();
                    yield Err(e);
                    return;
                }
                guard.begun = true;
            } else {
                log::debug!("Joining the open transaction");
            }
            let mut failure = None;
            match f(context.clone()) {
                Ok(inner) => {
                    futures::pin_mut!(inner);
                    while let Some(item) = inner.next().await {
                        match item {
                            Ok(v) => yield Ok(v),
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => failure = Some(e),
            }
            if owner {
                let result = match failure {
                    None => {
                        log::debug!("Commit transaction");
                        context.connection.commit_transaction().await
                    }
                    Some(error) => {
                        log::debug!("Rollback transaction: {error:#}");
                        match context.connection.rollback_transaction().await {
                            Ok(()) => Err(error),
                            Err(rollback) => {
                                log::error!("Failed to roll back the transaction: {rollback:#}");
                                Err(error.context(format!("Rollback failed as well: {rollback:#}")))
                            }
                        }
                    }
                };
                guard.release();
                if let Err(e) = result {
                    yield Err(e);
                }
            } else if let Some(e) = failure {
                yield Err(e);
            }
        }
        .boxed()
    }
}

/// Closes an on demand context whose stream was dropped before completion.
pub(crate) struct CloseGuard<D: Driver> {
    pub(crate) context: Arc<ExecutionContext<D>>,
    pub(crate) armed: bool,
}

impl<D: Driver> Drop for CloseGuard<D> {
    fn drop(&mut self) {
        if self.armed {
            self.context.close_detached();
        }
    }
}
