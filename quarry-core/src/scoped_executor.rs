use crate::{Database, Driver, ExecutionContext, IsolationLevel, Result};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream, Stream},
};
use std::sync::Arc;

/// Unit of work run against an execution context.
pub type ScopedCallback<D, T> = Box<
    dyn FnOnce(Arc<ExecutionContext<D>>) -> Result<BoxStream<'static, Result<T>>> + Send,
>;

/// Strategy supplying the execution context a unit of work runs in.
pub enum ScopedExecutor<D: Driver> {
    /// A new context per use, closed when the work completes on any path.
    OnDemand(Database<D>),
    /// A context owned by the caller, never closed here.
    Attached(Arc<ExecutionContext<D>>),
    /// The outer executor's context, inside a transaction.
    Transaction {
        outer: Box<ScopedExecutor<D>>,
        isolation_level: Option<IsolationLevel>,
    },
}

impl<D: Driver> Clone for ScopedExecutor<D> {
    fn clone(&self) -> Self {
        match self {
            ScopedExecutor::OnDemand(database) => ScopedExecutor::OnDemand(database.clone()),
            ScopedExecutor::Attached(context) => ScopedExecutor::Attached(context.clone()),
            ScopedExecutor::Transaction {
                outer,
                isolation_level,
            } => ScopedExecutor::Transaction {
                outer: outer.clone(),
                isolation_level: *isolation_level,
            },
        }
    }
}

impl<D: Driver> ScopedExecutor<D> {
    /// Short description of where the context comes from.
    pub fn label(&self) -> &'static str {
        match self {
            ScopedExecutor::OnDemand(..) => "on demand",
            ScopedExecutor::Attached(..) => "attached",
            ScopedExecutor::Transaction { .. } => "transactional",
        }
    }

    /// Composes a transactional scope over this executor. When the context is
    /// already inside a transaction the existing one is joined.
    pub fn in_transaction(&self, isolation_level: Option<IsolationLevel>) -> Self {
        ScopedExecutor::Transaction {
            outer: Box::new(self.clone()),
            isolation_level,
        }
    }

    /// Runs `f` in the supplied context. Nothing happens until the returned
    /// stream is polled.
    pub fn run<T, S, F>(&self, f: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        F: FnOnce(Arc<ExecutionContext<D>>) -> Result<S> + Send + 'static,
    {
        self.run_boxed(Box::new(move |context: Arc<ExecutionContext<D>>| {
            f(context).map(|inner| inner.boxed())
        }))
    }

    fn run_boxed<T: Send + 'static>(&self, f: ScopedCallback<D, T>) -> BoxStream<'static, Result<T>> {
        match self {
            ScopedExecutor::OnDemand(database) => database.execute(f),
            ScopedExecutor::Attached(context) => {
                let context = context.clone();
                stream::once(async move { f(context) })
                    .try_flatten()
                    .boxed()
            }
            ScopedExecutor::Transaction {
                outer,
                isolation_level,
            } => {
                let isolation_level = *isolation_level;
                outer.run_boxed(Box::new(
                    move |context: Arc<ExecutionContext<D>>| -> Result<BoxStream<'static, Result<T>>> {
                        Ok(context.in_transaction(isolation_level).run(f))
                    },
                ))
            }
        }
    }
}
