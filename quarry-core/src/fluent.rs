use crate::{
    Argument, ArgumentBinder, BindObject, Bindable, Database, Driver, Error, ExecutionContext,
    Mapped, QuarryError, Result, StatementContext, Value,
};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use std::{any::type_name, sync::Arc};
use tokio::task::JoinHandle;

type Step<D> = Box<dyn FnOnce(&mut StatementContext<D>) -> Result<()> + Send>;

/// Programmatic entry point, statements built from literal SQL.
///
/// ```rust,ignore
/// let one = database
///     .open()
///     .sql("select 1")
///     .execute()
///     .map_to_not_null::<i32>()
///     .try_collect::<Vec<_>>()
///     .await?;
/// ```
pub struct Fluent<D: Driver> {
    database: Database<D>,
}

impl<D: Driver> Fluent<D> {
    pub(crate) fn new(database: Database<D>) -> Self {
        Self { database }
    }

    pub fn sql(&self, sql: impl Into<String>) -> SqlStatement<D> {
        SqlStatement {
            database: self.database.clone(),
            sql: sql.into(),
            steps: Vec::new(),
        }
    }
}

/// Statement under construction, bindings are applied once it runs.
pub struct SqlStatement<D: Driver> {
    database: Database<D>,
    sql: String,
    steps: Vec<Step<D>>,
}

impl<D: Driver> SqlStatement<D> {
    pub fn bind_name(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        self.steps.push(Box::new(move |statement: &mut StatementContext<D>| {
            statement.bind(&name, value)?;
            Ok(())
        }));
        self
    }

    /// Binds every template parameter from the object field of the same name.
    pub fn bind_object(mut self, object: impl Bindable) -> Self {
        let object = Argument::Object(Arc::new(object));
        self.steps.push(Box::new(move |statement: &mut StatementContext<D>| {
            BindObject.bind(statement, &object)
        }));
        self
    }

    pub fn execute(self) -> ResultBearing<D> {
        ResultBearing { statement: self }
    }
}

/// Results of a fluent statement.
///
/// Every consumer opens its own execution context when first polled and
/// closes it after the last result.
pub struct ResultBearing<D: Driver> {
    statement: SqlStatement<D>,
}

impl<D: Driver> ResultBearing<D> {
    fn prepare(
        sql: &str,
        steps: Vec<Step<D>>,
        context: &ExecutionContext<D>,
    ) -> Result<StatementContext<D>> {
        let mut statement = context.create_statement(sql)?;
        for step in steps {
            step(&mut statement)?;
        }
        Ok(statement)
    }

    pub fn rows_updated(self) -> BoxStream<'static, Result<u64>> {
        let SqlStatement {
            database,
            sql,
            steps,
        } = self.statement;
        database.execute(move |context| {
            Ok(Self::prepare(&sql, steps, &context)?.execute_update())
        })
    }

    /// Rows mapped into `T`, `None` for rows mapping to null.
    pub fn map_rows<T: Mapped>(self) -> BoxStream<'static, Result<Option<T>>> {
        let SqlStatement {
            database,
            sql,
            steps,
        } = self.statement;
        database.execute(move |context| {
            let ty = T::type_info();
            let mapper = context.find_row_mapper(&ty)?.ok_or_else(|| {
                QuarryError::configuration(format!("No row mapper found for {}", ty.name))
            })?;
            let mappers = context.mappers().clone();
            let statement = Self::prepare(&sql, steps, &context)?;
            Ok(statement.execute_query_and_map(move |row| {
                mapper
                    .map(&row, &mappers)?
                    .map(|v| {
                        v.downcast::<T>().map(|v| *v).map_err(|_| {
                            Error::msg(format!("Mapped value is not a {}", type_name::<T>()))
                        })
                    })
                    .transpose()
            }))
        })
    }

    /// Rows mapped into `T`, rows mapping to null are skipped.
    pub fn map_to_not_null<T: Mapped>(self) -> BoxStream<'static, Result<T>> {
        self.map_rows::<T>()
            .try_filter_map(|v| async move { Ok(v) })
            .boxed()
    }

    /// Calls `callback` with every count from a spawned task.
    /// Must be called within a tokio runtime.
    pub fn subscribe_rows_updated<F>(self, callback: F) -> JoinHandle<Result<()>>
    where
        F: FnMut(u64) + Send + 'static,
    {
        subscribe(self.rows_updated(), callback)
    }

    /// Calls `callback` with every non null row from a spawned task.
    /// Must be called within a tokio runtime.
    pub fn subscribe_not_null<T, F>(self, callback: F) -> JoinHandle<Result<()>>
    where
        T: Mapped,
        F: FnMut(T) + Send + 'static,
    {
        subscribe(self.map_to_not_null::<T>(), callback)
    }

    /// Calls `callback` with every row from a spawned task.
    /// Must be called within a tokio runtime.
    pub fn subscribe_rows<T, F>(self, callback: F) -> JoinHandle<Result<()>>
    where
        T: Mapped,
        F: FnMut(Option<T>) + Send + 'static,
    {
        subscribe(self.map_rows::<T>(), callback)
    }
}

fn subscribe<T, F>(stream: BoxStream<'static, Result<T>>, mut callback: F) -> JoinHandle<Result<()>>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(value) = stream.next().await {
            callback(value?);
        }
        Ok(())
    })
}
