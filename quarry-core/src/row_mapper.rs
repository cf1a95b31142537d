use crate::{
    Column, ColumnMapper, ColumnMappers, Dynamic, Mapped, ObjectMapperFactory, Result, RowLabeled,
    TypeInfo,
    column_mapper::{MapperKey, MapperRegistry},
};
use anyhow::Context;
use std::{any::TypeId, sync::Arc};

/// Converts a whole row into a mapped value, `None` when the row does not
/// represent the type.
pub trait RowMapper: Send + Sync {
    fn map(&self, row: &RowLabeled, mappers: &Mappers) -> Result<Option<Dynamic>>;
}

/// Produces a [`RowMapper`] for the types it supports.
pub trait RowMapperFactory: Send + Sync + 'static {
    /// `Ok(None)` when this factory does not handle `ty`.
    fn build(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn RowMapper>>>;
    /// Identity used to register each factory type once.
    fn factory_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

/// Registry of row mapper factories, probed in registration order.
#[derive(Default)]
pub struct RowMappers {
    registry: MapperRegistry<dyn RowMapperFactory, dyn RowMapper>,
}

impl RowMappers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the object mapper factory.
    pub fn with_defaults() -> Self {
        let result = Self::new();
        result.register_factory(ObjectMapperFactory);
        result
    }

    pub fn register_factory(&self, factory: impl RowMapperFactory) -> &Self {
        self.registry.register(factory.factory_id(), Arc::new(factory));
        self
    }

    /// Caches `mapper` for `ty` unless a mapper is already known for it.
    pub fn register_mapper(&self, ty: &TypeInfo, mapper: Arc<dyn RowMapper>) -> &Self {
        self.registry.insert(
            MapperKey {
                ty: ty.id,
                factory: None,
            },
            mapper,
        );
        self
    }

    /// First mapper produced by the factories for `ty`, cached including misses.
    pub fn get(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn RowMapper>>> {
        let key = MapperKey {
            ty: ty.id,
            factory: None,
        };
        self.registry.resolve(key, || {
            for factory in self.registry.factories() {
                if let Some(mapper) = factory
                    .build(ty)
                    .with_context(|| format!("While building a row mapper for {}", ty.name))?
                {
                    return Ok(Some(mapper));
                }
            }
            Ok(None)
        })
    }

    /// Mapper for `ty` built by `factory` alone, cached under the pair.
    ///
    /// The factory is registered first, an already registered factory of the
    /// same type takes its place.
    pub fn get_with(
        &self,
        ty: &TypeInfo,
        factory: &Arc<dyn RowMapperFactory>,
    ) -> Result<Option<Arc<dyn RowMapper>>> {
        let id = factory.factory_id();
        let factory = self.registry.register(id, factory.clone());
        let key = MapperKey {
            ty: ty.id,
            factory: Some(id),
        };
        self.registry.resolve(key, || {
            factory
                .build(ty)
                .with_context(|| format!("While building a row mapper for {}", ty.name))
        })
    }
}

/// Both registries, handed to every mapper so nested mappers can resolve
/// their own dependencies.
#[derive(Clone)]
pub struct Mappers {
    pub columns: Arc<ColumnMappers>,
    pub rows: Arc<RowMappers>,
}

impl Mappers {
    /// Empty registries.
    pub fn new() -> Self {
        Self {
            columns: Arc::new(ColumnMappers::new()),
            rows: Arc::new(RowMappers::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self {
            columns: Arc::new(ColumnMappers::with_defaults()),
            rows: Arc::new(RowMappers::with_defaults()),
        }
    }

    pub fn find_column_mapper(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn ColumnMapper>>> {
        self.columns.get(ty)
    }

    /// Row mapper for `ty`, falling back to a mapper of the first column.
    /// The fallback is registered so later lookups find it directly.
    pub fn find_row_mapper(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn RowMapper>>> {
        if let Some(mapper) = self.rows.get(ty)? {
            return Ok(Some(mapper));
        }
        let Some(column) = self.columns.get(ty)? else {
            return Ok(None);
        };
        let mapper: Arc<dyn RowMapper> = Arc::new(SingleColumnMapper::by_index(0, column));
        self.rows.register_mapper(ty, mapper.clone());
        Ok(Some(mapper))
    }

    pub fn resolve_row_mapper(
        &self,
        ty: &TypeInfo,
        factory: &Arc<dyn RowMapperFactory>,
    ) -> Result<Option<Arc<dyn RowMapper>>> {
        self.rows.get_with(ty, factory)
    }
}

impl Default for Mappers {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnRef {
    Index(usize),
    Name(String),
}

/// Row mapper reading a single column through a [`ColumnMapper`].
pub struct SingleColumnMapper {
    column: ColumnRef,
    delegate: Arc<dyn ColumnMapper>,
}

impl SingleColumnMapper {
    pub fn by_index(index: usize, delegate: Arc<dyn ColumnMapper>) -> Self {
        Self {
            column: ColumnRef::Index(index),
            delegate,
        }
    }
    pub fn by_name(name: impl Into<String>, delegate: Arc<dyn ColumnMapper>) -> Self {
        Self {
            column: ColumnRef::Name(name.into()),
            delegate,
        }
    }
}

impl RowMapper for SingleColumnMapper {
    fn map(&self, row: &RowLabeled, mappers: &Mappers) -> Result<Option<Dynamic>> {
        let column = match &self.column {
            ColumnRef::Index(index) => Column::Index(*index),
            ColumnRef::Name(name) => Column::Name(name),
        };
        self.delegate.map(row, column, mappers)
    }
}

/// Row mapper backed by a closure returning a concrete type.
///
/// ```rust,ignore
/// database.register_row_mapper::<Point>(FnRowMapper::new(|row| {
///     Ok(Some(Point { x: i32::try_from_value(row.values[0].clone())?, y: 0 }))
/// }));
/// ```
pub struct FnRowMapper<T, F> {
    function: F,
    _type: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> FnRowMapper<T, F>
where
    T: Mapped,
    F: Fn(&RowLabeled) -> Result<Option<T>> + Send + Sync + 'static,
{
    pub fn new(function: F) -> Self {
        Self {
            function,
            _type: Default::default(),
        }
    }
}

impl<T, F> RowMapper for FnRowMapper<T, F>
where
    T: Mapped,
    F: Fn(&RowLabeled) -> Result<Option<T>> + Send + Sync + 'static,
{
    fn map(&self, row: &RowLabeled, _mappers: &Mappers) -> Result<Option<Dynamic>> {
        Ok((self.function)(row)?.map(|v| Box::new(v) as Dynamic))
    }
}
