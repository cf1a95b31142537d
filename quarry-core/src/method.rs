use crate::{
    Argument, ArgumentBinder, ArgumentBinderFactory, ArgumentBinders, Bindings,
    BoundArgumentBinder, Driver, Dynamic, ExecutionContext, InvocationDecorator,
    InvocationHandler, Mapped, Mappers, ParameterDef, QuarryError, Result, ReturnShape, RowLabeled,
    RowMapper, RowMapperFactory, ScopedExecutor, SqlTemplate, TypeInfo, TypeKind,
};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use once_cell::sync::OnceCell;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Rows mapped into the element type.
    Query,
    /// Affected row counts.
    Update,
    /// Sequence argument bound as one row per element.
    Batch { return_updated_rows: bool },
}

/// Declaration of one interface method: its SQL, parameters, result
/// element type and decorators.
///
/// ```rust,ignore
/// SqlMethod::query::<User>("find_by_name", "select * from users where name = :name")
///     .param(Bind::new("name"))
///     .decorate(Transactional::new(None))
/// ```
pub struct SqlMethod<D: Driver> {
    pub(crate) name: String,
    pub(crate) sql: String,
    pub(crate) kind: MethodKind,
    pub(crate) element: TypeInfo,
    pub(crate) params: Vec<ParameterDef>,
    pub(crate) shape: ReturnShape,
    pub(crate) decorators: Vec<Arc<dyn InvocationDecorator<D>>>,
    pub(crate) row_mapper_factory: Option<Arc<dyn RowMapperFactory>>,
}

impl<D: Driver> Clone for SqlMethod<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sql: self.sql.clone(),
            kind: self.kind,
            element: self.element,
            params: self.params.clone(),
            shape: self.shape,
            decorators: self.decorators.clone(),
            row_mapper_factory: self.row_mapper_factory.clone(),
        }
    }
}

impl<D: Driver> SqlMethod<D> {
    fn new(name: impl Into<String>, sql: impl Into<String>, kind: MethodKind, element: TypeInfo) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            kind,
            element,
            params: Vec::new(),
            shape: ReturnShape::default(),
            decorators: Vec::new(),
            row_mapper_factory: None,
        }
    }

    pub fn query<T: Mapped>(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, sql, MethodKind::Query, T::type_info())
    }

    /// Emits one `u64` count per result.
    pub fn update(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, sql, MethodKind::Update, u64::type_info())
    }

    /// Maps the rows returned by the batch into `T`, unless
    /// [`SqlMethod::returning_updated_rows`] is set.
    pub fn batch<T: Mapped>(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(
            name,
            sql,
            MethodKind::Batch {
                return_updated_rows: false,
            },
            T::type_info(),
        )
    }

    /// Emit the `u64` count of every batched row instead of mapped rows.
    pub fn returning_updated_rows(mut self) -> Self {
        if let MethodKind::Batch { .. } = self.kind {
            self.kind = MethodKind::Batch {
                return_updated_rows: true,
            };
            self.element = u64::type_info();
        }
        self
    }

    pub fn param(mut self, binder: impl ArgumentBinderFactory) -> Self {
        self.params.push(ParameterDef {
            factory: Arc::new(binder),
            sequence: false,
        });
        self
    }

    /// Sequence typed parameter, expects an [`Argument::List`].
    pub fn sequence(mut self, binder: impl ArgumentBinderFactory) -> Self {
        self.params.push(ParameterDef {
            factory: Arc::new(binder),
            sequence: true,
        });
        self
    }

    pub fn returns(mut self, shape: ReturnShape) -> Self {
        self.shape = shape;
        self
    }

    /// Decorators wrap the handler in declaration order, the last one outermost.
    pub fn decorate(mut self, decorator: impl InvocationDecorator<D>) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Factory tried first when resolving the row mapper of this method.
    pub fn row_mapper_factory(mut self, factory: impl RowMapperFactory) -> Self {
        self.row_mapper_factory = Some(Arc::new(factory));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn element_type(&self) -> &TypeInfo {
        &self.element
    }

    pub fn shape(&self) -> ReturnShape {
        self.shape
    }

    fn returns_counts(&self) -> bool {
        matches!(
            self.kind,
            MethodKind::Update
                | MethodKind::Batch {
                    return_updated_rows: true
                }
        )
    }
}

struct MethodBinding {
    binders: Vec<BoundArgumentBinder>,
    sequence: Option<usize>,
}

struct HandlerState<D: Driver> {
    interface: String,
    interface_factories: Vec<Arc<dyn RowMapperFactory>>,
    method: SqlMethod<D>,
    binding: OnceCell<MethodBinding>,
    template: OnceCell<Arc<SqlTemplate>>,
    row_mapper: OnceCell<Arc<dyn RowMapper>>,
}

/// Base handler of a method: prepares, binds, executes and maps.
///
/// Everything derived from the declaration (binders, template, row mapper)
/// is computed on first use and shared by every later call.
pub struct SqlMethodHandler<D: Driver>(Arc<HandlerState<D>>);

impl<D: Driver> SqlMethodHandler<D> {
    pub fn new(
        interface: impl Into<String>,
        interface_factories: Vec<Arc<dyn RowMapperFactory>>,
        method: SqlMethod<D>,
    ) -> Self {
        Self(Arc::new(HandlerState {
            interface: interface.into(),
            interface_factories,
            method,
            binding: OnceCell::new(),
            template: OnceCell::new(),
            row_mapper: OnceCell::new(),
        }))
    }
}

impl<D: Driver> InvocationHandler<D> for SqlMethodHandler<D> {
    fn invoke(
        &self,
        executor: ScopedExecutor<D>,
        args: Arc<[Argument]>,
    ) -> BoxStream<'static, Result<Dynamic>> {
        let state = self.0.clone();
        executor.run(move |context| state.execute(&context, &args))
    }
}

impl<D: Driver> HandlerState<D> {
    fn binding(&self) -> Result<&MethodBinding> {
        self.binding.get_or_try_init(|| {
            let method = &self.method;
            let binders = ArgumentBinders::binders_for(&self.interface, &method.name, &method.params)?;
            let sequences: Vec<usize> = binders
                .iter()
                .filter(|v| v.is_sequence())
                .map(BoundArgumentBinder::index)
                .collect();
            let sequence = match (method.kind, sequences.as_slice()) {
                (_, []) => None,
                (MethodKind::Batch { .. }, [index]) => Some(*index),
                (MethodKind::Batch { .. }, _) => {
                    return Err(QuarryError::configuration(format!(
                        "Only 1 list element is allowed, has more than 1 {sequences:?}"
                    )));
                }
                _ => {
                    return Err(QuarryError::configuration(format!(
                        "Sequence parameters are only supported by batch methods, interface: {}, method: {}",
                        self.interface, method.name
                    )));
                }
            };
            Ok(MethodBinding { binders, sequence })
        })
    }

    fn mapped_type(&self) -> TypeInfo {
        match self.method.element.kind {
            TypeKind::Nullable(nullable) => (nullable.inner)(),
            _ => self.method.element,
        }
    }

    fn row_mapper(&self, context: &ExecutionContext<D>) -> Result<&Arc<dyn RowMapper>> {
        self.row_mapper.get_or_try_init(|| {
            let ty = self.mapped_type();
            let explicit = self.method.row_mapper_factory.iter().chain(&self.interface_factories);
            for factory in explicit {
                if let Some(mapper) = context.resolve_row_mapper(&ty, factory)? {
                    return Ok(mapper);
                }
            }
            context.find_row_mapper(&ty)?.ok_or_else(|| {
                QuarryError::configuration(format!(
                    "No rowMapper found for type: {}, in interface: {}, method: {}",
                    ty.name, self.interface, self.method.name
                ))
            })
        })
    }

    fn binder_at<'a>(&self, binding: &'a MethodBinding, index: usize) -> Result<&'a BoundArgumentBinder> {
        binding.binders.get(index).ok_or_else(|| {
            QuarryError::configuration(format!(
                "No method arg found at index {index}, sqlInterface: {}, method: {}",
                self.interface, self.method.name
            ))
        })
    }

    /// Binds the call arguments, `false` when there is nothing to execute.
    fn bind_arguments(
        &self,
        binding: &MethodBinding,
        statement: &mut dyn Bindings,
        args: &[Argument],
    ) -> Result<bool> {
        if args.len() < binding.binders.len() {
            return Err(QuarryError::configuration(format!(
                "Method {} of {} expects {} arguments, got {}",
                self.method.name,
                self.interface,
                binding.binders.len(),
                args.len()
            )));
        }
        let elements = binding.sequence.and_then(|index| match &args[index] {
            Argument::List(elements) => Some((index, elements)),
            _ => None,
        });
        let Some((sequence, elements)) = elements else {
            for (index, value) in args.iter().enumerate() {
                self.binder_at(binding, index)?.bind(statement, value)?;
            }
            return Ok(true);
        };
        if elements.is_empty() {
            log::debug!(
                "Empty batch for {}::{}, nothing to execute",
                self.interface,
                self.method.name
            );
            return Ok(false);
        }
        for (i, element) in elements.iter().enumerate() {
            for (index, value) in args.iter().enumerate() {
                let value = if index == sequence { element } else { value };
                self.binder_at(binding, index)?.bind(statement, value)?;
            }
            if i + 1 < elements.len() {
                statement.add_new_bindings()?;
            }
        }
        Ok(true)
    }

    fn map_row(&self, mapper: &dyn RowMapper, row: &RowLabeled, mappers: &Mappers) -> Result<Dynamic> {
        let value = mapper.map(row, mappers)?;
        match self.method.element.kind {
            TypeKind::Nullable(nullable) => (nullable.wrap)(value),
            _ => value.ok_or_else(|| {
                QuarryError::data(format!(
                    "Null value found for returnType: {} when mapping result in method: {} in interface: {}",
                    self.method.element.name, self.method.name, self.interface
                ))
            }),
        }
    }

    fn execute(
        self: &Arc<Self>,
        context: &Arc<ExecutionContext<D>>,
        args: &[Argument],
    ) -> Result<BoxStream<'static, Result<Dynamic>>> {
        let binding = self.binding()?;
        let template = self
            .template
            .get_or_init(|| context.template(&self.method.sql))
            .clone();
        let mut statement = context.create_statement_from(template)?;
        if !self.bind_arguments(binding, &mut statement, args)? {
            return Ok(stream::empty().boxed());
        }
        if self.method.returns_counts() {
            return Ok(statement
                .execute_update()
                .map_ok(|v| Box::new(v) as Dynamic)
                .boxed());
        }
        let mapper = self.row_mapper(context)?.clone();
        let mappers = context.mappers().clone();
        let state = self.clone();
        Ok(statement.execute_query_and_map(move |row| state.map_row(mapper.as_ref(), &row, &mappers)))
    }
}
