//! Procedural macros for the `txorm` entity framework.
//!
//! `#[derive(Entity)]` inspects a struct with named fields and generates:
//! - `Fetchable` (table name and selected columns),
//! - `Identifiable` (the store-assigned identity),
//! - `Entity` (a `'static` schema constant plus row mapping in both directions).
//!
//! Supported attributes:
//! - `#[entity(table = "...")]` on the struct overrides the pluralized snake_case name.
//! - `#[column(id)]` marks the identity field (exactly one).
//! - `#[column(name = "...")]` overrides the column name.
//! - `#[column(required)]` makes an `Option` field mandatory at persist time.
//! - `#[column(unique)]` asks the store to reject duplicate non-null values.
//! - `#[column(skip)]` excludes a field from persistence (it must implement `Default`).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, spanned::Spanned, Data, DeriveInput, Fields, Ident, LitStr, Type,
};

use inflections::Inflect;

/// Helper to get the inner type of an `Option<T>`.
fn get_option_inner(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        let path = &type_path.path;
        if let Some(segment) = path.segments.last() {
            if segment.ident == "Option" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner_ty)) = args.args.first() {
                        return Some(inner_ty);
                    }
                }
            }
        }
    }
    None
}

/// Whether `ty` names one of the integer types an identity column can hold.
fn is_integer_key(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) if type_path.qself.is_none() => type_path
            .path
            .segments
            .last()
            .is_some_and(|seg| seg.arguments.is_empty() && (seg.ident == "i64" || seg.ident == "i32")),
        _ => false,
    }
}

/// Holds parsed metadata about a single struct field.
struct FieldMetadata {
    ident: Ident,
    ty: Type,
    column_name: String,
    is_id: bool,
    is_required: bool,
    is_unique: bool,
    is_skipped: bool,
}

/// Parses all named fields from a `DeriveInput` struct.
fn parse_field_metadata(input: &DeriveInput) -> syn::Result<Vec<FieldMetadata>> {
    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "#[derive(Entity)] only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "#[derive(Entity)] can only be used on structs",
            ))
        }
    };

    let mut out = Vec::with_capacity(fields.named.len());
    for field in &fields.named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let mut meta = FieldMetadata {
            column_name: ident.to_string(),
            ident,
            ty: field.ty.clone(),
            is_id: false,
            is_required: false,
            is_unique: false,
            is_skipped: false,
        };

        for attr in field.attrs.iter().filter(|a| a.path().is_ident("column")) {
            attr.parse_nested_meta(|nested| {
                if nested.path.is_ident("name") {
                    let s: LitStr = nested.value()?.parse()?;
                    meta.column_name = s.value();
                } else if nested.path.is_ident("id") {
                    meta.is_id = true;
                } else if nested.path.is_ident("required") {
                    meta.is_required = true;
                } else if nested.path.is_ident("unique") {
                    meta.is_unique = true;
                } else if nested.path.is_ident("skip") {
                    meta.is_skipped = true;
                } else {
                    return Err(nested.error(
                        "unknown #[column] option; expected id, name, required, unique or skip",
                    ));
                }
                Ok(())
            })?;
        }
        out.push(meta);
    }
    Ok(out)
}

/// Reads `#[entity(table = "...")]` when present.
fn parse_table_override(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut table = None;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|nested| {
            if nested.path.is_ident("table") {
                let s: LitStr = nested.value()?.parse()?;
                table = Some(s.value());
                Ok(())
            } else {
                Err(nested.error("unknown #[entity] option; expected table"))
            }
        })?;
    }
    Ok(table)
}

/// English-ish plural of a snake_case name: `category` -> `categories`, `post` -> `posts`.
fn pluralize(name: &str) -> String {
    let consonant_y = name.ends_with('y')
        && !name.ends_with("ay")
        && !name.ends_with("ey")
        && !name.ends_with("oy")
        && !name.ends_with("uy");
    if consonant_y {
        format!("{}ies", &name[..name.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| name.ends_with(s)) {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

/// Table and column names end up in SQL text; keep them plain identifiers.
fn is_valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

// --- `Entity` derive macro ---

#[proc_macro_derive(Entity, attributes(entity, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_entity(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_entity(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let entity_name = struct_name.to_string();
    let fields_metadata = parse_field_metadata(input)?;

    let table_name = match parse_table_override(input)? {
        Some(t) => t,
        None => pluralize(&entity_name.to_snake_case()),
    };
    if !is_valid_ident(&table_name) {
        return Err(syn::Error::new(
            struct_name.span(),
            format!(
                "invalid table name `{}`; use ASCII letters, digits, or `_`, starting with a letter or `_`",
                table_name
            ),
        ));
    }

    let persisted: Vec<&FieldMetadata> =
        fields_metadata.iter().filter(|f| !f.is_skipped).collect();
    for f in &persisted {
        if !is_valid_ident(&f.column_name) {
            return Err(syn::Error::new(
                f.ident.span(),
                format!("invalid column name `{}`", f.column_name),
            ));
        }
    }

    // Exactly one identity field.
    let ids: Vec<&&FieldMetadata> = persisted.iter().filter(|f| f.is_id).collect();
    let id_field = match ids.as_slice() {
        [one] => **one,
        [] => {
            return Err(syn::Error::new(
                struct_name.span(),
                "a field must be marked with #[column(id)]",
            ))
        }
        [_, second, ..] => {
            return Err(syn::Error::new(
                second.ident.span(),
                format!(
                    "exactly one field must be marked with #[column(id)] (found {})",
                    ids.len()
                ),
            ))
        }
    };

    let key_ty = get_option_inner(&id_field.ty).unwrap_or(&id_field.ty);
    if !is_integer_key(key_ty) {
        return Err(syn::Error::new(
            id_field.ty.span(),
            "#[column(id)] must be `i64` or `i32` (optionally wrapped in `Option`)",
        ));
    }

    // --- Fetchable ---
    let select_columns: Vec<&String> = persisted.iter().map(|f| &f.column_name).collect();
    let fetchable_impl = quote! {
        impl ::txorm_core::Fetchable for #struct_name {
            const TABLE: &'static str = #table_name;
            const SELECT_COLUMNS: &'static [&'static str] = &[#(#select_columns),*];
        }
    };

    // --- Identifiable ---
    let id_ident = &id_field.ident;
    let id_ty = &id_field.ty;
    let id_column_name = &id_field.column_name;
    let (key_ty, id_accessor, id_setter) = match get_option_inner(id_ty) {
        Some(inner) => (
            inner,
            quote! { self.#id_ident.clone() },
            quote! { self.#id_ident = ::core::option::Option::Some(id); },
        ),
        None => (
            id_ty,
            quote! { ::core::option::Option::Some(self.#id_ident.clone()) },
            quote! { self.#id_ident = id; },
        ),
    };
    let identifiable_impl = quote! {
        impl ::txorm_core::Identifiable for #struct_name {
            type Key = #key_ty;
            const ID_COLUMN: &'static str = #id_column_name;
            fn id(&self) -> ::core::option::Option<Self::Key> {
                #id_accessor
            }
            fn set_id(&mut self, id: Self::Key) {
                #id_setter
            }
        }
    };

    // --- Entity: schema + row mapping ---
    let field_defs = persisted.iter().map(|f| {
        let name = f.ident.to_string();
        let column = &f.column_name;
        let ty = &f.ty;
        let required = f.is_required;
        let unique = f.is_unique;
        let identity = f.is_id;
        quote! {
            ::txorm_core::FieldDef {
                name: #name,
                column: #column,
                kind: <#ty as ::txorm_core::ColumnValue>::KIND,
                nullable: <#ty as ::txorm_core::ColumnValue>::NULLABLE,
                required: #required,
                unique: #unique,
                identity: #identity,
            }
        }
    });

    let to_row_sets = persisted.iter().map(|f| {
        let ident = &f.ident;
        let column = &f.column_name;
        quote! {
            row.set(#column, ::txorm_core::ColumnValue::to_value(&self.#ident));
        }
    });
    let column_count = persisted.len();

    let from_row_fields = fields_metadata.iter().map(|f| {
        let ident = &f.ident;
        if f.is_skipped {
            return quote! { #ident: ::core::default::Default::default() };
        }
        let ty = &f.ty;
        let column = &f.column_name;
        quote! { #ident: ::txorm_core::decode_column::<#ty>(row, #column)? }
    });

    let entity_impl = quote! {
        impl ::txorm_core::Entity for #struct_name {
            const SCHEMA: &'static ::txorm_core::EntitySchema = &::txorm_core::EntitySchema {
                entity: #entity_name,
                table: #table_name,
                fields: &[#(#field_defs),*],
            };

            fn to_row(&self) -> ::txorm_core::Row {
                let mut row = ::txorm_core::Row::with_capacity(#column_count);
                #(#to_row_sets)*
                row
            }

            fn from_row(row: &::txorm_core::Row) -> ::txorm_core::OrmResult<Self> {
                ::core::result::Result::Ok(Self {
                    #(#from_row_fields),*
                })
            }
        }
    };

    Ok(quote! {
        #fetchable_impl
        #identifiable_impl
        #entity_impl
    })
}
