mod bindable;
mod decode_field;
mod mapped_enum;
mod mapped_struct;

use bindable::bindable;
use mapped_enum::mapped_enum;
use mapped_struct::mapped_struct;
use proc_macro::TokenStream;
use quote::quote;
use syn::{Item, ItemStruct, parse_macro_input};

/// Implements `Mapped` so rows can be mapped into the type.
///
/// Structs are built through their fields: each field reads the column of the
/// same name unless renamed with `#[quarry(column = "..")]`. `Option` fields
/// are nullable, `#[quarry(default = expr)]` fields keep the default when the
/// column is absent, `#[quarry(nested)]` fields are mapped from the same row,
/// `#[quarry(setter)]` fields are assigned after construction and
/// `#[quarry(skip)]` fields are never mapped.
///
/// Unit enums map from a text column holding the constant name, and bind as
/// that name.
#[proc_macro_derive(Mapped, attributes(quarry))]
pub fn derive_mapped(input: TokenStream) -> TokenStream {
    let item = parse_macro_input!(input as Item);
    match &item {
        Item::Struct(item) => mapped_struct(item),
        Item::Enum(item) => mapped_enum(item),
        _ => quote! {
            compile_error!("Mapped can only be derived for structs and enums");
        },
    }
    .into()
}

/// Implements `Bindable` so the struct can be bound with `BindObject`: every
/// template parameter is bound from the field of the same name.
#[proc_macro_derive(Bindable, attributes(quarry))]
pub fn derive_bindable(input: TokenStream) -> TokenStream {
    let item = parse_macro_input!(input as ItemStruct);
    bindable(&item).into()
}
