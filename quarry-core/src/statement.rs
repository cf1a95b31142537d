use crate::{
    Connection, Driver, QuarryError, QueryResult, Result, RowLabeled, SqlParameter, SqlTemplate,
    Statement, Value, truncate_long,
};
use async_stream::try_stream;
use futures::{
    StreamExt, TryStreamExt,
    stream::{BoxStream, Stream},
};
use std::sync::Arc;

pub type StatementOf<D> = <<D as Driver>::Connection as Connection>::Statement;

/// Binding surface used by argument binders, independent of the driver.
pub trait Bindings {
    fn template(&self) -> &SqlTemplate;
    /// Bind `value` to the template parameter `name`.
    fn bind_value(&mut self, name: &str, value: Value) -> Result<()>;
    /// Bind a null to `name`, `ty` being the typed empty value.
    fn bind_null_value(&mut self, name: &str, ty: Value) -> Result<()>;
    /// Start a new row of bindings.
    fn add_new_bindings(&mut self) -> Result<()>;
}

/// One prepared statement bound against a parsed template.
pub struct StatementContext<D: Driver> {
    template: Arc<SqlTemplate>,
    statement: StatementOf<D>,
}

impl<D: Driver> StatementContext<D> {
    pub fn new(template: Arc<SqlTemplate>, statement: StatementOf<D>) -> Self {
        Self {
            template,
            statement,
        }
    }

    pub fn template(&self) -> &Arc<SqlTemplate> {
        &self.template
    }

    fn argument_name(&self, name: &str) -> Result<String> {
        self.template
            .argument_name(name)
            .map(ToString::to_string)
            .ok_or_else(|| QuarryError::configuration(format!("No bind-parameter found for {name}")))
    }

    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let key = self.argument_name(name)?;
        self.statement.bind(&key, value.into())?;
        Ok(self)
    }

    pub fn bind_null(&mut self, name: &str, ty: Value) -> Result<&mut Self> {
        let key = self.argument_name(name)?;
        self.statement.bind_null(&key, ty)?;
        Ok(self)
    }

    /// Calls `binder` once for every distinct template parameter, in ordinal order.
    pub fn bind_parameters(
        &mut self,
        mut binder: impl FnMut(&mut Self, &SqlParameter) -> Result<()>,
    ) -> Result<&mut Self> {
        let template = self.template.clone();
        for parameter in template.parameters() {
            binder(self, parameter)?;
        }
        Ok(self)
    }

    pub fn add_new_bindings(&mut self) -> Result<&mut Self> {
        self.statement.add()?;
        Ok(self)
    }

    /// Raw results as produced by the driver.
    pub fn execute(self) -> impl Stream<Item = Result<QueryResult>> + Send + 'static {
        log::debug!("Executing {}", truncate_long!(self.template.sql()));
        self.statement.execute()
    }

    /// Affected row counts, one per result (batched statements emit one per row).
    pub fn execute_update(self) -> BoxStream<'static, Result<u64>> {
        self.execute()
            .try_filter_map(|v| async move {
                Ok(match v {
                    QueryResult::Affected(v) => Some(v.rows_affected),
                    QueryResult::Row(..) => None,
                })
            })
            .boxed()
    }

    /// Rows passed through `mapper`, the first error ends the stream.
    pub fn execute_query_and_map<T, F>(self, mut mapper: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        F: FnMut(RowLabeled) -> Result<T> + Send + 'static,
    {
        let results = self.execute();
        try_stream! {
            futures::pin_mut!(results);
            while let Some(result) = results.next().await {
                if let QueryResult::Row(row) = result? {
                    yield mapper(row)?;
                }
            }
        }
        .boxed()
    }
}

impl<D: Driver> Bindings for StatementContext<D> {
    fn template(&self) -> &SqlTemplate {
        &self.template
    }
    fn bind_value(&mut self, name: &str, value: Value) -> Result<()> {
        self.bind(name, value).map(|_| ())
    }
    fn bind_null_value(&mut self, name: &str, ty: Value) -> Result<()> {
        self.bind_null(name, ty).map(|_| ())
    }
    fn add_new_bindings(&mut self) -> Result<()> {
        StatementContext::add_new_bindings(self).map(|_| ())
    }
}
