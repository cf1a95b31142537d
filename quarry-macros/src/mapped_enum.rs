use proc_macro2::TokenStream;
use quote::quote;
use syn::{Fields, ItemEnum, LitInt};

/// Unit enums map from and bind as the constant name.
pub(crate) fn mapped_enum(item: &ItemEnum) -> TokenStream {
    let name = &item.ident;
    let type_name = name.to_string();
    if !item.generics.params.is_empty() {
        return quote! {
            compile_error!("Mapped cannot be derived for generic enums");
        };
    }
    if item.variants.iter().any(|v| !matches!(v.fields, Fields::Unit)) {
        return quote! {
            compile_error!("Mapped can only be derived for enums whose variants are all unit variants");
        };
    }
    let idents: Vec<_> = item.variants.iter().map(|v| &v.ident).collect();
    let constants: Vec<_> = idents.iter().map(|v| v.to_string()).collect();
    let indexes = idents
        .iter()
        .enumerate()
        .map(|(i, v)| LitInt::new(&i.to_string(), v.span()));
    quote! {
        impl ::quarry::Mapped for #name {
            fn type_info() -> ::quarry::TypeInfo {
                ::quarry::TypeInfo::enumeration::<Self>(
                    #type_name,
                    &[#(#constants),*],
                    |index| match index {
                        #(#indexes => Some(Box::new(#name::#idents) as ::quarry::Dynamic),)*
                        _ => None,
                    },
                )
            }
        }
        impl ::quarry::AsValue for #name {
            fn as_empty_value() -> ::quarry::Value {
                ::quarry::Value::Varchar(None)
            }
            fn as_value(self) -> ::quarry::Value {
                ::quarry::Value::Varchar(Some(
                    match self {
                        #(#name::#idents => #constants,)*
                    }
                    .to_string(),
                ))
            }
            fn try_from_value(value: ::quarry::Value) -> ::quarry::Result<Self> {
                let constant = <String as ::quarry::AsValue>::try_from_value(value)?;
                match constant.as_str() {
                    #(#constants => Ok(#name::#idents),)*
                    _ => Err(::quarry::Error::msg(format!(
                        "`{}` is not a constant of {}",
                        constant, #type_name
                    ))),
                }
            }
        }
    }
}
