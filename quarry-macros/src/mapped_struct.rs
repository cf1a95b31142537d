use crate::decode_field::{FieldMetadata, decode_field};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Fields, ItemStruct, LitInt};

pub(crate) fn mapped_struct(item: &ItemStruct) -> TokenStream {
    let name = &item.ident;
    let type_name = name.to_string();
    if !item.generics.params.is_empty() {
        return quote! {
            compile_error!("Mapped cannot be derived for generic structs");
        };
    }
    let Fields::Named(..) = &item.fields else {
        return quote! {
            compile_error!("Mapped can only be derived for structs with named fields");
        };
    };
    let fields: Vec<FieldMetadata> = item.fields.iter().map(decode_field).collect();
    let (params, rest): (Vec<_>, Vec<_>) = fields
        .iter()
        .filter(|f| !f.skip)
        .partition(|f| !f.setter);
    let properties = params.iter().map(|f| f.property());
    let arguments = params.iter().enumerate().map(|(i, f)| {
        let ident = &f.ident;
        let inner = &f.inner;
        let index = LitInt::new(&i.to_string(), ident.span());
        let value = if f.nullable {
            quote!(args.take_nullable::<#inner>(#index)?)
        } else if let Some(default) = &f.default {
            quote!(args.take_or_else::<#inner>(#index, || #default)?)
        } else {
            quote!(args.take::<#inner>(#index)?)
        };
        quote!(#ident: #value)
    });
    let unmapped = fields.iter().filter(|f| f.skip || f.setter).map(|f| {
        let ident = &f.ident;
        match &f.default {
            Some(default) if !f.nullable => quote!(#ident: #default),
            _ => quote!(#ident: ::std::default::Default::default()),
        }
    });
    let setters = rest.iter().map(|f| {
        let ident = &f.ident;
        let inner = &f.inner;
        let property = f.property();
        let assign = if f.nullable {
            quote!(target.#ident = value;)
        } else {
            quote! {
                if let Some(value) = value {
                    target.#ident = value;
                }
            }
        };
        quote! {
            .field(#property, |target: &mut #name, value: Option<#inner>| {
                #assign
            })
        }
    });
    quote! {
        impl ::quarry::Mapped for #name {
            fn type_info() -> ::quarry::TypeInfo {
                ::quarry::TypeInfo::object::<Self>(#type_name, || {
                    ::quarry::ObjectDef::new(#type_name)
                        .constructor(
                            vec![#(#properties),*],
                            |args: &mut ::quarry::Arguments| {
                                Ok(#name {
                                    #(#arguments,)*
                                    #(#unmapped,)*
                                })
                            },
                        )
                        #(#setters)*
                })
            }
        }
    }
}
