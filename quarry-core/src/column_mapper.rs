use crate::{
    AsValue, Dynamic, EnumType, Mappers, NativeType, QuarryError, Result, RowLabeled, TypeInfo,
    TypeKind, Value,
};
use anyhow::Context;
use once_cell::sync::OnceCell;
use std::{
    any::TypeId,
    collections::HashMap,
    fmt::{self, Display},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

/// Location of a column inside a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column<'a> {
    Index(usize),
    /// Matched case-insensitively.
    Name(&'a str),
}

impl<'a> Column<'a> {
    pub fn read<'r>(&self, row: &'r RowLabeled) -> Result<&'r Value> {
        match *self {
            Column::Index(index) => row.get(index),
            Column::Name(name) => row.get_column(name),
        }
        .ok_or_else(|| {
            QuarryError::data(format!(
                "Column {self} not found, available columns: {}",
                row.names().join(", ")
            ))
        })
    }
}

impl<'a> Display for Column<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Index(index) => write!(f, "#{index}"),
            Column::Name(name) => write!(f, "`{name}`"),
        }
    }
}

/// Converts one column of a row into a mapped value, `None` for SQL null.
pub trait ColumnMapper: Send + Sync {
    fn map(&self, row: &RowLabeled, column: Column<'_>, mappers: &Mappers)
    -> Result<Option<Dynamic>>;
}

/// Produces a [`ColumnMapper`] for the types it supports.
pub trait ColumnMapperFactory: Send + Sync + 'static {
    /// `Ok(None)` when this factory does not handle `ty`.
    fn build(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn ColumnMapper>>>;
    /// Identity used to register each factory type once.
    fn factory_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MapperKey {
    pub(crate) ty: TypeId,
    pub(crate) factory: Option<TypeId>,
}

type Slot<M> = Arc<OnceCell<Option<Arc<M>>>>;

/// Ordered factory list plus a per key compute-once cache, shared by the
/// column and row registries.
pub(crate) struct MapperRegistry<F: ?Sized, M: ?Sized> {
    factories: RwLock<Vec<(TypeId, Arc<F>)>>,
    cache: Mutex<HashMap<MapperKey, Slot<M>>>,
}

impl<F: ?Sized, M: ?Sized> Default for MapperRegistry<F, M> {
    fn default() -> Self {
        Self {
            factories: Default::default(),
            cache: Default::default(),
        }
    }
}

impl<F: ?Sized, M: ?Sized> MapperRegistry<F, M> {
    /// Appends the factory unless one of the same type is already present,
    /// returns the registered instance.
    pub(crate) fn register(&self, id: TypeId, factory: Arc<F>) -> Arc<F> {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, existing)) = factories.iter().find(|(v, _)| *v == id) {
            return existing.clone();
        }
        factories.push((id, factory.clone()));
        factory
    }

    pub(crate) fn factories(&self) -> Vec<Arc<F>> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn slot(&self, key: MapperKey) -> Slot<M> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entry(key).or_default().clone()
    }

    /// Cached lookup, `build` runs at most once per key unless it fails.
    pub(crate) fn resolve(
        &self,
        key: MapperKey,
        build: impl FnOnce() -> Result<Option<Arc<M>>>,
    ) -> Result<Option<Arc<M>>> {
        self.slot(key).get_or_try_init(build).cloned()
    }

    /// Stores `mapper` unless a mapper is already cached for `key`.
    pub(crate) fn insert(&self, key: MapperKey, mapper: Arc<M>) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = cache.entry(key).or_default();
        match slot.get().map(Option::is_some) {
            Some(true) => {}
            Some(false) => *slot = Arc::new(OnceCell::with_value(Some(mapper))),
            None => {
                let _ = slot.set(Some(mapper));
            }
        }
    }
}

/// Registry of column mapper factories, probed in registration order.
#[derive(Default)]
pub struct ColumnMappers {
    registry: MapperRegistry<dyn ColumnMapperFactory, dyn ColumnMapper>,
}

impl ColumnMappers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the native and enum factories.
    pub fn with_defaults() -> Self {
        let result = Self::new();
        result
            .register_factory(NativeTypeMapperFactory)
            .register_factory(EnumMapperFactory);
        result
    }

    pub fn register_factory(&self, factory: impl ColumnMapperFactory) -> &Self {
        self.registry.register(factory.factory_id(), Arc::new(factory));
        self
    }

    /// First mapper produced by the factories for `ty`, cached including misses.
    pub fn get(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn ColumnMapper>>> {
        let key = MapperKey {
            ty: ty.id,
            factory: None,
        };
        self.registry.resolve(key, || {
            for factory in self.registry.factories() {
                if let Some(mapper) = factory
                    .build(ty)
                    .with_context(|| format!("While building a column mapper for {}", ty.name))?
                {
                    return Ok(Some(mapper));
                }
            }
            Ok(None)
        })
    }
}

/// Maps native scalar types, converting between numeric widths.
#[derive(Default, Debug, Clone, Copy)]
pub struct NativeTypeMapperFactory;

impl ColumnMapperFactory for NativeTypeMapperFactory {
    fn build(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn ColumnMapper>>> {
        Ok(match ty.kind {
            TypeKind::Native(native) => Some(Arc::new(NativeTypeMapper {
                name: ty.name,
                native,
            })),
            _ => None,
        })
    }
}

pub struct NativeTypeMapper {
    name: &'static str,
    native: NativeType,
}

impl ColumnMapper for NativeTypeMapper {
    fn map(
        &self,
        row: &RowLabeled,
        column: Column<'_>,
        _mappers: &Mappers,
    ) -> Result<Option<Dynamic>> {
        let value = column.read(row)?;
        if value.is_null() {
            return Ok(None);
        }
        (self.native.convert)(value.clone())
            .map(Some)
            .with_context(|| format!("Cannot map column {column} to {}", self.name))
    }
}

/// Maps unit enums from a text column holding the constant name.
#[derive(Default, Debug, Clone, Copy)]
pub struct EnumMapperFactory;

impl ColumnMapperFactory for EnumMapperFactory {
    fn build(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn ColumnMapper>>> {
        Ok(match ty.kind {
            TypeKind::Enum(enumeration) => Some(Arc::new(EnumMapper {
                name: ty.name,
                enumeration,
                constants: Default::default(),
            })),
            _ => None,
        })
    }
}

pub struct EnumMapper {
    name: &'static str,
    enumeration: EnumType,
    constants: Mutex<HashMap<String, Option<usize>>>,
}

impl EnumMapper {
    fn lookup(&self, constant: &str) -> Option<usize> {
        let mut constants = self.constants.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = constants.get(constant) {
            return *index;
        }
        let index = self
            .enumeration
            .variants
            .iter()
            .position(|v| *v == constant);
        constants.insert(constant.to_string(), index);
        index
    }
}

impl ColumnMapper for EnumMapper {
    fn map(
        &self,
        row: &RowLabeled,
        column: Column<'_>,
        _mappers: &Mappers,
    ) -> Result<Option<Dynamic>> {
        let value = column.read(row)?;
        let Some(constant) = Option::<String>::try_from_value(value.clone())
            .with_context(|| format!("Cannot map column {column} to {}", self.name))?
        else {
            return Ok(None);
        };
        let Some(index) = self.lookup(&constant) else {
            log::warn!("`{constant}` is not a constant of {}, mapped as null", self.name);
            return Ok(None);
        };
        Ok((self.enumeration.make)(index))
    }
}
