use crate::{AsValue, Error, ObjectDef, Result, Value};
use rust_decimal::Decimal;
use std::{
    any::{Any, TypeId, type_name},
    borrow::Cow,
    fmt::{self, Debug},
};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Type erased mapped value, downcast by the caller that requested the type.
pub type Dynamic = Box<dyn Any + Send>;

/// A type that rows or columns can be mapped into.
///
/// Implemented for the native scalar types, and by `#[derive(Mapped)]` for
/// structs (object mapping) and unit enums (mapped by constant name).
pub trait Mapped: Send + 'static {
    fn type_info() -> TypeInfo;
}

/// Stable description of a mapped type, the key of every mapper cache.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: &'static str,
    pub kind: TypeKind,
}

#[derive(Clone, Copy, Debug)]
pub enum TypeKind {
    /// Scalar converted straight from a column value.
    Native(NativeType),
    /// Unit enum, read from a text column holding the constant name.
    Enum(EnumType),
    /// Composite type built from several columns.
    Object(fn() -> ObjectDef),
    /// `Option<T>`, only meaningful as a top level result type.
    Nullable(NullableType),
    /// No built-in mapping, requires a user registered mapper.
    Opaque,
}

#[derive(Clone, Copy, Debug)]
pub struct NativeType {
    pub empty: fn() -> Value,
    pub convert: fn(Value) -> Result<Dynamic>,
}

#[derive(Clone, Copy, Debug)]
pub struct EnumType {
    pub variants: &'static [&'static str],
    pub make: fn(usize) -> Option<Dynamic>,
}

#[derive(Clone, Copy, Debug)]
pub struct NullableType {
    pub inner: fn() -> TypeInfo,
    pub wrap: fn(Option<Dynamic>) -> Result<Dynamic>,
}

impl TypeInfo {
    pub fn of<T: Mapped>() -> Self {
        T::type_info()
    }
    pub fn native<T: AsValue + Send + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            kind: TypeKind::Native(NativeType {
                empty: T::as_empty_value,
                convert: convert_native::<T>,
            }),
        }
    }
    pub fn enumeration<T: Send + 'static>(
        name: &'static str,
        variants: &'static [&'static str],
        make: fn(usize) -> Option<Dynamic>,
    ) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name,
            kind: TypeKind::Enum(EnumType { variants, make }),
        }
    }
    pub fn object<T: Send + 'static>(name: &'static str, def: fn() -> ObjectDef) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name,
            kind: TypeKind::Object(def),
        }
    }
    pub fn opaque<T: Send + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            kind: TypeKind::Opaque,
        }
    }
    /// Typed null used when a value of this type must be bound as null.
    pub fn empty_value(&self) -> Value {
        match self.kind {
            TypeKind::Native(native) => (native.empty)(),
            TypeKind::Enum(..) => Value::Varchar(None),
            TypeKind::Nullable(nullable) => (nullable.inner)().empty_value(),
            _ => Value::Null,
        }
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for TypeInfo {}

impl Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

fn convert_native<T: AsValue + Send + 'static>(value: Value) -> Result<Dynamic> {
    Ok(Box::new(T::try_from_value(value)?))
}

fn wrap_option<T: Send + 'static>(value: Option<Dynamic>) -> Result<Dynamic> {
    let value = match value {
        Some(v) => Some(*v.downcast::<T>().map_err(|_| {
            Error::msg(format!("Mapped value is not a {}", type_name::<T>()))
        })?),
        None => None,
    };
    Ok(Box::new(value))
}

macro_rules! impl_mapped_native {
    ($($source:ty),+ $(,)?) => {
        $(
            impl Mapped for $source {
                fn type_info() -> TypeInfo {
                    TypeInfo::native::<Self>()
                }
            }
        )+
    };
}
impl_mapped_native!(
    bool,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    Decimal,
    String,
    Vec<u8>,
    Date,
    Time,
    PrimitiveDateTime,
    OffsetDateTime,
    Uuid,
);

impl Mapped for Cow<'static, str> {
    fn type_info() -> TypeInfo {
        TypeInfo::native::<Self>()
    }
}

impl<T: Mapped> Mapped for Option<T> {
    fn type_info() -> TypeInfo {
        TypeInfo {
            id: TypeId::of::<Self>(),
            name: type_name::<Self>(),
            kind: TypeKind::Nullable(NullableType {
                inner: T::type_info,
                wrap: wrap_option::<T>,
            }),
        }
    }
}
