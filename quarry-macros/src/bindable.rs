use crate::decode_field::decode_field;
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Fields, ItemStruct};

pub(crate) fn bindable(item: &ItemStruct) -> TokenStream {
    let name = &item.ident;
    let Fields::Named(..) = &item.fields else {
        return quote! {
            compile_error!("Bindable can only be derived for structs with named fields");
        };
    };
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();
    let arms = item
        .fields
        .iter()
        .map(decode_field)
        .filter(|f| !f.skip && !f.nested)
        .map(|f| {
            let ident = &f.ident;
            let key = &f.name;
            let ty = &f.ty;
            quote! {
                #key => Some(<#ty as ::quarry::AsValue>::as_value(
                    ::std::clone::Clone::clone(&self.#ident),
                ))
            }
        });
    quote! {
        impl #impl_generics ::quarry::Bindable for #name #ty_generics #where_clause {
            fn field(&self, name: &str) -> Option<::quarry::Value> {
                match name {
                    #(#arms,)*
                    _ => None,
                }
            }
        }
    }
}
