use crate::{
    CloseGuard, ColumnMapperFactory, Driver, ExecutionContext, Fluent, HandlerTable, Mapped,
    Mappers, Result, RowMapper, RowMapperFactory, ScopedExecutor, SqlInterface, SqlInterfaceDef,
    SqlTemplate, SqlTemplates, TypeInfo, WeakInterface,
};
use async_stream::stream;
use futures::{
    StreamExt,
    stream::{BoxStream, Stream},
};
use once_cell::sync::OnceCell;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

/// Top level facade: owns the driver, the mapper registries, the template
/// cache and the interface handler tables.
///
/// Cloning is cheap, clones share every registry.
pub struct Database<D: Driver>(Arc<DatabaseInner<D>>);

struct DatabaseInner<D: Driver> {
    driver: D,
    mappers: Mappers,
    templates: SqlTemplates,
    tables: Mutex<HashMap<String, Arc<OnceCell<Arc<HandlerTable<D>>>>>>,
    interfaces: Mutex<HashMap<String, WeakInterface<D>>>,
}

impl<D: Driver> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<D: Driver> Database<D> {
    /// Database over `driver` with the default mapper factories registered.
    pub fn new(driver: D) -> Self {
        let templates = SqlTemplates::new(driver.parameter_customizer());
        Self(Arc::new(DatabaseInner {
            driver,
            mappers: Mappers::with_defaults(),
            templates,
            tables: Default::default(),
            interfaces: Default::default(),
        }))
    }

    pub fn driver(&self) -> &D {
        &self.0.driver
    }

    pub fn mappers(&self) -> &Mappers {
        &self.0.mappers
    }

    /// Appended after the defaults, which keep precedence.
    pub fn register_column_mapper_factory(&self, factory: impl ColumnMapperFactory) -> &Self {
        self.0.mappers.columns.register_factory(factory);
        self
    }

    pub fn register_row_mapper_factory(&self, factory: impl RowMapperFactory) -> &Self {
        self.0.mappers.rows.register_factory(factory);
        self
    }

    /// Uses `mapper` for every row mapped into `T`.
    pub fn register_row_mapper<T: Mapped>(&self, mapper: impl RowMapper + 'static) -> &Self {
        let ty: TypeInfo = T::type_info();
        self.0.mappers.rows.register_mapper(&ty, Arc::new(mapper));
        self
    }

    pub fn template(&self, sql: &str) -> Arc<SqlTemplate> {
        self.0.templates.get(sql)
    }

    /// Runs `f` in a new execution context.
    ///
    /// The connection is acquired when the stream is first polled and closed
    /// once the stream produced by `f` ends, fails or is dropped.
    pub fn execute<T, S, F>(&self, f: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        F: FnOnce(Arc<ExecutionContext<D>>) -> Result<S> + Send + 'static,
    {
        let database = self.clone();
        stream! {
            let connection = match database.driver().connect().await {
                Ok(v) => v,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            log::debug!("Connected to {}", D::NAME);
            let context = Arc::new(ExecutionContext::new(connection, database));
            let mut guard = CloseGuard {
                context: context.clone(),
                armed: true,
            };
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
            guard.armed = false;
            let closed = context.close().await;
            match (failure, closed) {
                (None, Ok(())) => {}
                (None, Err(e)) => yield Err(e),
                (Some(e), Ok(())) => yield Err(e),
                (Some(e), Err(close)) => {
                    log::error!("Failed to close the {} connection: {close:#}", D::NAME);
                    yield Err(e.context(format!("Closing the connection failed as well: {close:#}")));
                }
            }
        }
        .boxed()
    }

    /// Executor opening a new context for every use.
    pub fn scoped_executor(&self) -> ScopedExecutor<D> {
        ScopedExecutor::OnDemand(self.clone())
    }

    /// Handler table of `def`, built once per interface name.
    pub fn handler_table(&self, def: &SqlInterfaceDef<D>) -> Result<Arc<HandlerTable<D>>> {
        let cell = {
            let mut tables = self.0.tables.lock().unwrap_or_else(PoisonError::into_inner);
            tables.entry(def.name().to_string()).or_default().clone()
        };
        cell.get_or_try_init(|| {
            log::debug!("Building the handler table of {}", def.name());
            HandlerTable::build(def).map(Arc::new)
        })
        .cloned()
    }

    /// Interface whose every call runs in a new execution context.
    ///
    /// The same instance is returned for the same interface name while any
    /// caller still holds it.
    pub fn on_demand(&self, def: &SqlInterfaceDef<D>) -> Result<SqlInterface<D>> {
        let table = self.handler_table(def)?;
        let mut interfaces = self.0.interfaces.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(interface) = interfaces.get(def.name()).and_then(SqlInterface::upgrade) {
            return Ok(interface);
        }
        let interface = SqlInterface::new(table, self.scoped_executor());
        interfaces.insert(def.name().to_string(), interface.downgrade());
        Ok(interface)
    }

    /// New interface instance running every call through `executor`.
    pub fn attach_to(
        &self,
        def: &SqlInterfaceDef<D>,
        executor: ScopedExecutor<D>,
    ) -> Result<SqlInterface<D>> {
        Ok(SqlInterface::new(self.handler_table(def)?, executor))
    }

    /// Programmatic statements, see [`Fluent`].
    pub fn open(&self) -> Fluent<D> {
        Fluent::new(self.clone())
    }
}
