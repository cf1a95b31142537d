use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::{Expr, Field, GenericArgument, Ident, LitStr, PathArguments, Type, parse::ParseBuffer};

/// Mapping attributes of one struct field.
pub(crate) struct FieldMetadata {
    pub(crate) ident: Ident,
    /// Field name without the raw identifier prefix.
    pub(crate) name: String,
    pub(crate) column: String,
    pub(crate) ty: Type,
    /// `T` for `Option<T>` fields, the field type otherwise.
    pub(crate) inner: Type,
    pub(crate) nullable: bool,
    pub(crate) nested: bool,
    pub(crate) setter: bool,
    pub(crate) skip: bool,
    pub(crate) default: Option<TokenStream>,
}

impl FieldMetadata {
    /// Expression building the `ColumnProperty` of this field.
    pub(crate) fn property(&self) -> TokenStream {
        let name = &self.name;
        let inner = &self.inner;
        let mut result = quote!(::quarry::ColumnProperty::new::<#inner>(#name));
        if self.column != self.name {
            let column = &self.column;
            result = quote!(#result.column(#column));
        }
        if self.nullable {
            result = quote!(#result.nullable());
        }
        if !self.nullable && (self.setter || self.default.is_some()) {
            result = quote!(#result.optional());
        }
        if self.nested {
            result = quote!(#result.nested());
        }
        result
    }
}

/// `T` when `ty` is `Option<T>`.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };
    match arguments.args.first()? {
        GenericArgument::Type(inner) if arguments.args.len() == 1 => Some(inner),
        _ => None,
    }
}

pub(crate) fn decode_field(field: &Field) -> FieldMetadata {
    let ident = field
        .ident
        .clone()
        .expect("Field is expected to have a name");
    let mut name = ident.to_string();
    if let Some(v) = name.strip_prefix("r#") {
        name = v.to_string();
    }
    let (inner, nullable) = match option_inner(&field.ty) {
        Some(inner) => (inner.clone(), true),
        None => (field.ty.clone(), false),
    };
    let mut metadata = FieldMetadata {
        ident,
        column: name.clone(),
        name,
        ty: field.ty.clone(),
        inner,
        nullable,
        nested: false,
        setter: false,
        skip: false,
        default: None,
    };
    for attr in &field.attrs {
        let meta = &attr.meta;
        if !meta.path().is_ident("quarry") {
            continue;
        }
        let Ok(list) = meta.require_list() else {
            panic!("Error while parsing `quarry`, use it like: `#[quarry(attribute = value, ...)]`");
        };
        let _ = list.parse_nested_meta(|arg| {
            if arg.path.is_ident("column") {
                let Ok(v) = arg.value().and_then(ParseBuffer::parse::<LitStr>) else {
                    panic!("Error while parsing `column`, use it like: `#[quarry(column = \"my_column\")]`");
                };
                metadata.column = v.value();
            } else if arg.path.is_ident("default") {
                let Ok(v) = arg.value().and_then(ParseBuffer::parse::<Expr>) else {
                    panic!("Error while parsing `default`, use it like: `#[quarry(default = some_expression)]`");
                };
                metadata.default = Some(v.to_token_stream());
            } else if arg.path.is_ident("nested") {
                let Err(..) = arg.value() else {
                    panic!("Error while parsing `nested`, use it like: `#[quarry(nested)]`");
                };
                metadata.nested = true;
            } else if arg.path.is_ident("setter") {
                let Err(..) = arg.value() else {
                    panic!("Error while parsing `setter`, use it like: `#[quarry(setter)]`");
                };
                metadata.setter = true;
            } else if arg.path.is_ident("skip") {
                let Err(..) = arg.value() else {
                    panic!("Error while parsing `skip`, use it like: `#[quarry(skip)]`");
                };
                metadata.skip = true;
            } else {
                panic!(
                    "Unknown attribute `{}` inside quarry macro",
                    arg.path.to_token_stream()
                );
            }
            Ok(())
        });
    }
    metadata
}
