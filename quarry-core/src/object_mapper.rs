use crate::{
    Dynamic, Error, Mapped, Mappers, QuarryError, Result, RowLabeled, RowMapper,
    RowMapperFactory, SingleColumnMapper, TypeInfo, TypeKind,
};
use once_cell::sync::OnceCell;
use std::{any::type_name, sync::Arc};

/// How one constructor parameter or settable field is read from a row.
#[derive(Debug, Clone)]
pub struct ColumnProperty {
    /// Field name.
    pub name: &'static str,
    /// Column holding the value, the field name unless overridden.
    pub column: String,
    pub ty: TypeInfo,
    /// Absent column or SQL null map to `None`.
    pub nullable: bool,
    /// Has a default, an absent column leaves it unset.
    pub optional: bool,
    /// Built by a row mapper from the same row instead of one column.
    pub nested: bool,
}

impl ColumnProperty {
    pub fn new<T: Mapped>(name: &'static str) -> Self {
        Self {
            name,
            column: name.to_string(),
            ty: T::type_info(),
            nullable: false,
            optional: false,
            nested: false,
        }
    }
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }
}

type Build = Box<dyn Fn(&mut Arguments) -> Result<Dynamic> + Send + Sync>;
type Set = Box<dyn Fn(&mut Dynamic, Option<Dynamic>) -> Result<()> + Send + Sync>;

struct ConstructorDef {
    params: Vec<ColumnProperty>,
    build: Build,
}

struct FieldDef {
    property: ColumnProperty,
    set: Set,
}

/// Structural description of an object type: how to construct it from
/// resolved values and which fields can be assigned afterwards.
///
/// Usually generated by `#[derive(Mapped)]`:
/// ```rust,ignore
/// ObjectDef::new("Config")
///     .constructor(
///         vec![ColumnProperty::new::<String>("name")],
///         |args| Ok(Config { name: args.take(0)?, value: String::new() }),
///     )
///     .field(ColumnProperty::new::<String>("value").optional(), |o: &mut Config, v| {
///         if let Some(v) = v {
///             o.value = v;
///         }
///     })
/// ```
pub struct ObjectDef {
    name: &'static str,
    constructors: Vec<ConstructorDef>,
    fields: Vec<FieldDef>,
}

impl ObjectDef {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            constructors: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn constructor<O, F>(mut self, params: Vec<ColumnProperty>, build: F) -> Self
    where
        O: Send + 'static,
        F: Fn(&mut Arguments) -> Result<O> + Send + Sync + 'static,
    {
        self.constructors.push(ConstructorDef {
            params,
            build: Box::new(move |args: &mut Arguments| Ok(Box::new(build(args)?) as Dynamic)),
        });
        self
    }

    pub fn field<O, T, F>(mut self, property: ColumnProperty, set: F) -> Self
    where
        O: Send + 'static,
        T: Send + 'static,
        F: Fn(&mut O, Option<T>) + Send + Sync + 'static,
    {
        let name = property.name;
        self.fields.push(FieldDef {
            property,
            set: Box::new(move |target: &mut Dynamic, value: Option<Dynamic>| {
                let target = target.downcast_mut::<O>().ok_or_else(|| {
                    Error::msg(format!("Cannot set `{name}`, target is not a {}", type_name::<O>()))
                })?;
                let value = match value {
                    Some(v) => Some(*v.downcast::<T>().map_err(|_| {
                        Error::msg(format!(
                            "Cannot set `{name}`, value is not a {}",
                            type_name::<T>()
                        ))
                    })?),
                    None => None,
                };
                set(target, value);
                Ok(())
            }),
        });
        self
    }
}

/// Values resolved for the constructor parameters of one row.
///
/// Each slot is `None` when the column was absent and the parameter keeps its
/// default, `Some(None)` for a null.
pub struct Arguments {
    type_name: &'static str,
    names: Vec<String>,
    values: Vec<Option<Option<Dynamic>>>,
}

impl Arguments {
    fn slot(&mut self, index: usize) -> Result<Option<Option<Dynamic>>> {
        let len = self.values.len();
        self.values.get_mut(index).map(Option::take).ok_or_else(|| {
            Error::msg(format!(
                "Argument index {index} is out of range for {} ({len} parameters)",
                self.type_name
            ))
        })
    }

    fn downcast<T: 'static>(&self, index: usize, value: Dynamic) -> Result<T> {
        value.downcast::<T>().map(|v| *v).map_err(|_| {
            Error::msg(format!(
                "Parameter `{}` of {} is not a {}",
                self.names[index],
                self.type_name,
                type_name::<T>()
            ))
        })
    }

    /// Whether a value (possibly null) was resolved for the parameter.
    pub fn is_supplied(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(Some(..)))
    }

    /// Mandatory non nullable parameter.
    pub fn take<T: 'static>(&mut self, index: usize) -> Result<T> {
        match self.slot(index)? {
            Some(Some(v)) => self.downcast(index, v),
            Some(None) => Err(QuarryError::data(format!(
                "Null value found for non-nullable param: {} in mappedType: {}",
                self.names[index], self.type_name
            ))),
            None => Err(QuarryError::data(format!(
                "No value found for mandatory param: {} in mappedType: {}",
                self.names[index], self.type_name
            ))),
        }
    }

    /// Nullable parameter, absent and null both give `None`.
    pub fn take_nullable<T: 'static>(&mut self, index: usize) -> Result<Option<T>> {
        match self.slot(index)? {
            Some(Some(v)) => self.downcast(index, v).map(Some),
            _ => Ok(None),
        }
    }

    /// Parameter with a default, used when the column is absent.
    pub fn take_or_else<T: 'static>(
        &mut self,
        index: usize,
        default: impl FnOnce() -> T,
    ) -> Result<T> {
        if !self.is_supplied(index) {
            return Ok(default());
        }
        self.take(index)
    }
}

/// Fails when a non nullable property resolves to null.
struct NullCheckingRowMapper {
    mapped_type: &'static str,
    column: String,
    nullable: bool,
    delegate: Arc<dyn RowMapper>,
}

impl RowMapper for NullCheckingRowMapper {
    fn map(&self, row: &RowLabeled, mappers: &Mappers) -> Result<Option<Dynamic>> {
        let value = self.delegate.map(row, mappers)?;
        if value.is_none() && !self.nullable {
            return Err(QuarryError::data(format!(
                "Null value found for non-nullable param: {} in mappedType: {}",
                self.column, self.mapped_type
            )));
        }
        Ok(value)
    }
}

struct BoundProperty {
    property: ColumnProperty,
    mapper: OnceCell<Arc<dyn RowMapper>>,
}

impl BoundProperty {
    fn new(property: ColumnProperty) -> Self {
        Self {
            property,
            mapper: OnceCell::new(),
        }
    }

    fn mapper(&self, mapped_type: &'static str, mappers: &Mappers) -> Result<&Arc<dyn RowMapper>> {
        self.mapper.get_or_try_init(|| {
            let property = &self.property;
            let delegate: Arc<dyn RowMapper> = if property.nested {
                mappers.find_row_mapper(&property.ty)?.ok_or_else(|| {
                    QuarryError::configuration(format!(
                        "No row mapper found for param: {}, type: {}, mappedType: {}",
                        property.column, property.ty.name, mapped_type
                    ))
                })?
            } else {
                let column = mappers.find_column_mapper(&property.ty)?.ok_or_else(|| {
                    QuarryError::configuration(format!(
                        "No column mapper found for param: {}, type: {}, mappedType: {}",
                        property.column, property.ty.name, mapped_type
                    ))
                })?;
                Arc::new(SingleColumnMapper::by_name(property.column.clone(), column))
            };
            Ok(Arc::new(NullCheckingRowMapper {
                mapped_type,
                column: property.column.clone(),
                nullable: property.nullable,
                delegate,
            }) as Arc<dyn RowMapper>)
        })
    }
}

struct Resolved {
    values: Vec<Option<Option<Dynamic>>>,
    missing: Vec<String>,
}

/// Builds objects from rows following an [`ObjectDef`].
///
/// Column presence is checked on every row, so one mapper serves queries
/// projecting different column sets.
pub struct ObjectMapper {
    name: &'static str,
    params: Vec<BoundProperty>,
    build: Build,
    fields: Vec<(BoundProperty, Set)>,
}

impl ObjectMapper {
    pub fn new(def: ObjectDef) -> Result<Self> {
        let ObjectDef {
            name,
            mut constructors,
            fields,
        } = def;
        if constructors.len() != 1 {
            return Err(QuarryError::configuration(format!(
                "Expected exactly one constructor for {name}, found {}",
                constructors.len()
            )));
        }
        let Some(ConstructorDef { params, build }) = constructors.pop() else {
            return Err(QuarryError::configuration(format!(
                "No constructor found for {name}"
            )));
        };
        let fields = fields
            .into_iter()
            .filter(|f| !params.iter().any(|p| p.name == f.property.name))
            .map(|f| (BoundProperty::new(f.property), f.set))
            .collect();
        Ok(Self {
            name,
            params: params.into_iter().map(BoundProperty::new).collect(),
            build,
            fields,
        })
    }

    fn resolve<'a>(
        &self,
        properties: impl Iterator<Item = &'a BoundProperty>,
        row: &RowLabeled,
        mappers: &Mappers,
    ) -> Result<Resolved> {
        let mut resolved = Resolved {
            values: Vec::new(),
            missing: Vec::new(),
        };
        for bound in properties {
            let property = &bound.property;
            let value = if property.nested || row.contains_column(&property.column) {
                Some(bound.mapper(self.name, mappers)?.map(row, mappers)?)
            } else if property.nullable {
                Some(None)
            } else {
                if !property.optional {
                    resolved.missing.push(property.column.clone());
                }
                None
            };
            resolved.values.push(value);
        }
        Ok(resolved)
    }
}

impl RowMapper for ObjectMapper {
    fn map(&self, row: &RowLabeled, mappers: &Mappers) -> Result<Option<Dynamic>> {
        let Resolved { values, missing } = self.resolve(self.params.iter(), row, mappers)?;
        if !missing.is_empty() {
            if values.iter().any(Option::is_some) {
                return Err(QuarryError::data(format!(
                    "No value found for mandatory param: {} in mappedType: {}",
                    missing.join(", "),
                    self.name
                )));
            }
            return Ok(None);
        }
        let mut arguments = Arguments {
            type_name: self.name,
            names: self.params.iter().map(|p| p.property.name.to_string()).collect(),
            values,
        };
        let mut object = (self.build)(&mut arguments)?;
        let fields = self.resolve(self.fields.iter().map(|(p, _)| p), row, mappers)?;
        for ((_, set), value) in self.fields.iter().zip(fields.values) {
            if let Some(value) = value {
                set(&mut object, value)?;
            }
        }
        Ok(Some(object))
    }
}

/// Builds an [`ObjectMapper`] for every object type.
#[derive(Default, Debug, Clone, Copy)]
pub struct ObjectMapperFactory;

impl RowMapperFactory for ObjectMapperFactory {
    fn build(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn RowMapper>>> {
        Ok(match ty.kind {
            TypeKind::Object(def) => Some(Arc::new(ObjectMapper::new(def())?)),
            _ => None,
        })
    }
}
