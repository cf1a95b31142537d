use crate::{
    Argument, Driver, Dynamic, Error, IsolationLevel, MethodOutput, QuarryError, Result,
    ReturnShape, RowMapperFactory, ScopedExecutor, SqlMethod, SqlMethodHandler, TypeInfo,
    arc_address,
};
use futures::{StreamExt, stream::BoxStream};
use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    sync::{Arc, Weak},
};

/// Runs one interface method.
pub trait InvocationHandler<D: Driver>: Send + Sync {
    fn invoke(
        &self,
        executor: ScopedExecutor<D>,
        args: Arc<[Argument]>,
    ) -> BoxStream<'static, Result<Dynamic>>;
}

/// Wraps a handler, for example to run it inside a transaction.
pub trait InvocationDecorator<D: Driver>: Send + Sync + 'static {
    fn decorate(&self, handler: Arc<dyn InvocationHandler<D>>) -> Arc<dyn InvocationHandler<D>>;
}

/// Runs the method inside a transaction, joining the open one if any.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transactional {
    pub isolation_level: Option<IsolationLevel>,
}

impl Transactional {
    pub fn new(isolation_level: Option<IsolationLevel>) -> Self {
        Self { isolation_level }
    }
}

struct TransactionalHandler<D: Driver> {
    isolation_level: Option<IsolationLevel>,
    inner: Arc<dyn InvocationHandler<D>>,
}

impl<D: Driver> InvocationHandler<D> for TransactionalHandler<D> {
    fn invoke(
        &self,
        executor: ScopedExecutor<D>,
        args: Arc<[Argument]>,
    ) -> BoxStream<'static, Result<Dynamic>> {
        self.inner
            .invoke(executor.in_transaction(self.isolation_level), args)
    }
}

impl<D: Driver> InvocationDecorator<D> for Transactional {
    fn decorate(&self, handler: Arc<dyn InvocationHandler<D>>) -> Arc<dyn InvocationHandler<D>> {
        Arc::new(TransactionalHandler {
            isolation_level: self.isolation_level,
            inner: handler,
        })
    }
}

/// Declaration of a SQL interface: its name, methods and the row mapper
/// factories shared by its methods.
pub struct SqlInterfaceDef<D: Driver> {
    name: String,
    methods: Vec<SqlMethod<D>>,
    row_mapper_factories: Vec<Arc<dyn RowMapperFactory>>,
}

impl<D: Driver> SqlInterfaceDef<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            row_mapper_factories: Vec::new(),
        }
    }

    pub fn method(mut self, method: SqlMethod<D>) -> Self {
        self.methods.push(method);
        self
    }

    /// Tried in order after the method level factory.
    pub fn row_mapper_factory(mut self, factory: impl RowMapperFactory) -> Self {
        self.row_mapper_factories.push(Arc::new(factory));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[SqlMethod<D>] {
        &self.methods
    }
}

struct HandlerEntry<D: Driver> {
    handler: Arc<dyn InvocationHandler<D>>,
    element: TypeInfo,
    shape: ReturnShape,
}

/// Decorated handlers of one interface, keyed by method name.
pub struct HandlerTable<D: Driver> {
    interface: String,
    entries: HashMap<String, HandlerEntry<D>>,
}

impl<D: Driver> HandlerTable<D> {
    pub fn build(def: &SqlInterfaceDef<D>) -> Result<Self> {
        let mut entries = HashMap::new();
        for method in &def.methods {
            let mut handler: Arc<dyn InvocationHandler<D>> = Arc::new(SqlMethodHandler::new(
                def.name.clone(),
                def.row_mapper_factories.clone(),
                method.clone(),
            ));
            for decorator in &method.decorators {
                handler = decorator.decorate(handler);
            }
            let entry = HandlerEntry {
                handler,
                element: method.element,
                shape: method.shape,
            };
            if entries.insert(method.name.clone(), entry).is_some() {
                return Err(QuarryError::configuration(format!(
                    "Method {} is declared more than once in interface {}",
                    method.name, def.name
                )));
            }
        }
        Ok(Self {
            interface: def.name.clone(),
            entries,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn contains(&self, method: &str) -> bool {
        self.entries.contains_key(method)
    }

    fn entry(&self, method: &str) -> Result<&HandlerEntry<D>> {
        self.entries.get(method).ok_or_else(|| {
            QuarryError::configuration(format!(
                "No method {method} found in interface {}",
                self.interface
            ))
        })
    }
}

pub(crate) struct InterfaceInner<D: Driver> {
    table: Arc<HandlerTable<D>>,
    executor: ScopedExecutor<D>,
}

pub(crate) type WeakInterface<D> = Weak<InterfaceInner<D>>;

/// Implementation of a [`SqlInterfaceDef`], every call is dispatched to the
/// handler of the method.
///
/// Equality, hashing and formatting are identity based.
pub struct SqlInterface<D: Driver>(Arc<InterfaceInner<D>>);

impl<D: Driver> SqlInterface<D> {
    pub(crate) fn new(table: Arc<HandlerTable<D>>, executor: ScopedExecutor<D>) -> Self {
        Self(Arc::new(InterfaceInner { table, executor }))
    }

    pub(crate) fn downgrade(&self) -> WeakInterface<D> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &WeakInterface<D>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    pub fn name(&self) -> &str {
        self.0.table.interface()
    }

    pub fn executor(&self) -> &ScopedExecutor<D> {
        &self.0.executor
    }

    /// Invokes `method`, its results typed as `T`.
    ///
    /// `T` must be the element type the method was declared with, `u64` for
    /// counts. A mismatch or an unknown method fails the returned stream.
    pub fn call<T: Send + 'static>(
        &self,
        method: &str,
        args: impl IntoIterator<Item = Argument>,
    ) -> MethodOutput<T> {
        let entry = match self.0.table.entry(method) {
            Ok(v) => v,
            Err(e) => return MethodOutput::failed(e),
        };
        if entry.element.id != TypeId::of::<T>() {
            return MethodOutput::failed(QuarryError::configuration(format!(
                "Method {method} of {} returns {}, requested {}",
                self.name(),
                entry.element.name,
                type_name::<T>()
            )));
        }
        let stream = entry
            .handler
            .invoke(self.0.executor.clone(), args.into_iter().collect())
            .map(|item| {
                item.and_then(|v| {
                    v.downcast::<T>().map(|v| *v).map_err(|_| {
                        Error::msg(format!("Mapped value is not a {}", type_name::<T>()))
                    })
                })
            })
            .boxed();
        MethodOutput::adapt(stream, entry.shape)
    }

    /// Invokes `method` without typing its results.
    pub fn call_dynamic(
        &self,
        method: &str,
        args: impl IntoIterator<Item = Argument>,
    ) -> Result<BoxStream<'static, Result<Dynamic>>> {
        let entry = self.0.table.entry(method)?;
        Ok(entry
            .handler
            .invoke(self.0.executor.clone(), args.into_iter().collect()))
    }
}

impl<D: Driver> Clone for SqlInterface<D> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<D: Driver> PartialEq for SqlInterface<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<D: Driver> Eq for SqlInterface<D> {}

impl<D: Driver> Hash for SqlInterface<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        arc_address(&self.0).hash(state);
    }
}

impl<D: Driver> Display for SqlInterface<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quarry {} proxy for {}@{:x}",
            self.executor().label(),
            self.name(),
            arc_address(&self.0)
        )
    }
}

impl<D: Driver> Debug for SqlInterface<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl<D: Driver> Debug for SqlInterfaceDef<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlInterfaceDef")
            .field("name", &self.name)
            .field(
                "methods",
                &self.methods.iter().map(SqlMethod::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
