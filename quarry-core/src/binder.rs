use crate::{AsValue, Bindings, QuarryError, Result, Value};
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

/// A weakly typed call argument.
#[derive(Clone)]
pub enum Argument {
    Null,
    Value(Value),
    Object(Arc<dyn Bindable>),
    List(Vec<Argument>),
}

impl Argument {
    pub fn null() -> Self {
        Argument::Null
    }
    pub fn value(value: impl Into<Value>) -> Self {
        Argument::Value(value.into())
    }
    pub fn object(object: impl Bindable) -> Self {
        Argument::Object(Arc::new(object))
    }
    pub fn list<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Argument>,
    {
        Argument::List(values.into_iter().map(Into::into).collect())
    }
    pub fn is_null(&self) -> bool {
        match self {
            Argument::Null => true,
            Argument::Value(v) => v.is_null(),
            _ => false,
        }
    }
    fn kind(&self) -> &'static str {
        match self {
            Argument::Null => "null",
            Argument::Value(..) => "value",
            Argument::Object(..) => "object",
            Argument::List(..) => "list",
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

impl Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Null => f.write_str("Null"),
            Argument::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Argument::Object(..) => f.write_str("Object(..)"),
            Argument::List(v) => f.debug_tuple("List").field(v).finish(),
        }
    }
}

/// An object whose fields can be bound by name, see [`BindObject`].
///
/// Derived with `#[derive(Bindable)]`.
pub trait Bindable: Send + Sync + 'static {
    /// Value of the field called `name`, `None` when there is no such field.
    /// A field holding no value returns its typed null.
    fn field(&self, name: &str) -> Option<Value>;
}

/// Writes one call argument into a statement.
pub trait ArgumentBinder: Send + Sync {
    fn bind(&self, statement: &mut dyn Bindings, value: &Argument) -> Result<()>;
}

/// Position and shape of a method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodArg {
    pub name: String,
    pub index: usize,
    /// Sequence typed, iterated as batch rows.
    pub sequence: bool,
}

/// Parameter marker producing the [`ArgumentBinder`] of a method parameter.
pub trait ArgumentBinderFactory: Send + Sync + 'static {
    fn build_for_parameter(
        &self,
        interface: &str,
        method: &str,
        arg: &MethodArg,
    ) -> Result<Arc<dyn ArgumentBinder>>;
}

/// Binds the argument to the template parameter `name`.
///
/// Nulls are bound with the typed null of the argument when it has one,
/// otherwise with the type given to [`Bind::typed`].
#[derive(Debug, Clone)]
pub struct Bind {
    name: String,
    null_type: Value,
}

impl Bind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            null_type: Value::Null,
        }
    }
    pub fn typed<T: AsValue>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            null_type: T::as_empty_value(),
        }
    }
}

impl ArgumentBinderFactory for Bind {
    fn build_for_parameter(
        &self,
        _interface: &str,
        _method: &str,
        _arg: &MethodArg,
    ) -> Result<Arc<dyn ArgumentBinder>> {
        Ok(Arc::new(self.clone()))
    }
}

impl ArgumentBinder for Bind {
    fn bind(&self, statement: &mut dyn Bindings, value: &Argument) -> Result<()> {
        match value {
            Argument::Null => statement.bind_null_value(&self.name, self.null_type.clone()),
            Argument::Value(Value::Null) => {
                statement.bind_null_value(&self.name, self.null_type.clone())
            }
            Argument::Value(v) if v.is_null() => statement.bind_null_value(&self.name, v.clone()),
            Argument::Value(v) => statement.bind_value(&self.name, v.clone()),
            other => Err(QuarryError::configuration(format!(
                "Cannot bind a {} argument to `{}`, Bind supports single values only",
                other.kind(),
                self.name
            ))),
        }
    }
}

/// Binds every template parameter from the object field of the same name.
///
/// Parameters without a matching field are left unbound.
#[derive(Default, Debug, Clone, Copy)]
pub struct BindObject;

impl ArgumentBinderFactory for BindObject {
    fn build_for_parameter(
        &self,
        _interface: &str,
        _method: &str,
        _arg: &MethodArg,
    ) -> Result<Arc<dyn ArgumentBinder>> {
        Ok(Arc::new(BindObject))
    }
}

impl ArgumentBinder for BindObject {
    fn bind(&self, statement: &mut dyn Bindings, value: &Argument) -> Result<()> {
        let object = match value {
            Argument::Object(object) => object,
            Argument::Null => {
                return Err(QuarryError::configuration(
                    "value cannot be null for BindObject",
                ));
            }
            Argument::Value(v) if v.is_null() => {
                return Err(QuarryError::configuration(
                    "value cannot be null for BindObject",
                ));
            }
            other => {
                return Err(QuarryError::configuration(format!(
                    "Cannot bind a {} argument, BindObject expects an object",
                    other.kind()
                )));
            }
        };
        let names: Vec<String> = statement
            .template()
            .parameters()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        for name in names {
            let Some(value) = object.field(&name) else {
                continue;
            };
            if value.is_null() {
                statement.bind_null_value(&name, value)?;
            } else {
                statement.bind_value(&name, value)?;
            }
        }
        Ok(())
    }
}

/// A binder together with the parameter it was built for.
#[derive(Clone)]
pub struct BoundArgumentBinder {
    pub arg: MethodArg,
    binder: Arc<dyn ArgumentBinder>,
}

impl BoundArgumentBinder {
    pub fn index(&self) -> usize {
        self.arg.index
    }
    pub fn is_sequence(&self) -> bool {
        self.arg.sequence
    }
}

impl ArgumentBinder for BoundArgumentBinder {
    fn bind(&self, statement: &mut dyn Bindings, value: &Argument) -> Result<()> {
        self.binder.bind(statement, value)
    }
}

/// Declared method parameter: its marker and whether it is a sequence.
#[derive(Clone)]
pub struct ParameterDef {
    pub factory: Arc<dyn ArgumentBinderFactory>,
    pub sequence: bool,
}

/// Derives the ordered argument binders of a method.
pub struct ArgumentBinders;

impl ArgumentBinders {
    pub fn binders_for(
        interface: &str,
        method: &str,
        params: &[ParameterDef],
    ) -> Result<Vec<BoundArgumentBinder>> {
        params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                let arg = MethodArg {
                    name: format!("arg{index}"),
                    index,
                    sequence: param.sequence,
                };
                let binder = param
                    .factory
                    .build_for_parameter(interface, method, &arg)?;
                Ok(BoundArgumentBinder { arg, binder })
            })
            .collect()
    }
}
