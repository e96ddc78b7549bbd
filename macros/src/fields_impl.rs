use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse2, parse_quote, Attribute, Data, DeriveInput, Ident, LitStr, Path, Result};

pub fn derive_fields(input: TokenStream) -> Result<TokenStream> {
    let input: DeriveInput = parse2(input)?;
    let c = parse_crate_path(&input.attrs)?;
    let Data::Struct(data) = &input.data else {
        bail!(
            input.ident.span(),
            "`#[derive(Fields)]` supports only structs"
        );
    };
    let syn::Fields::Named(named) = &data.fields else {
        bail!(
            input.ident.span(),
            "`#[derive(Fields)]` requires a struct with named fields"
        );
    };
    let mut entries = Vec::new();
    for field in &named.named {
        let Some(ident) = &field.ident else {
            bail!(_, "field without name");
        };
        entries.push(FieldEntry::new(ident.clone(), &field.attrs)?);
    }

    let mut names = Vec::new();
    let mut field_arms = Vec::new();
    let mut merge_arms = Vec::new();
    let mut deep_clones = Vec::new();
    for e in &entries {
        let ident = &e.ident;
        if e.skip {
            deep_clones.push(quote!(#ident: ::core::clone::Clone::clone(&self.#ident)));
            continue;
        }
        let name = &e.name;
        names.push(quote!(::std::string::String::from(#name)));
        field_arms.push(quote!(
            #name => ::core::option::Option::Some(#c::FieldValue::to_value(&self.#ident))
        ));
        merge_arms.push(quote!(
            #name => next.#ident = #c::FieldValue::from_field(key, value)?
        ));
        deep_clones.push(quote!(#ident: #c::DeepClone::deep_clone(&self.#ident)));
    }

    let ident = &input.ident;
    let (impl_g, type_g, where_c) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_g #c::Fields for #ident #type_g #where_c {
            fn field_names(&self) -> ::std::vec::Vec<::std::string::String> {
                ::std::vec![#(#names,)*]
            }
            fn field(&self, name: &str) -> ::core::option::Option<#c::Value> {
                match name {
                    #(#field_arms,)*
                    _ => ::core::option::Option::None,
                }
            }
            #[allow(unused_mut)]
            fn merge(&self, patch: &#c::Patch) -> #c::Result<Self> {
                let mut next = ::core::clone::Clone::clone(self);
                for (key, value) in patch {
                    match key.as_str() {
                        #(#merge_arms,)*
                        _ => {
                            return ::core::result::Result::Err(#c::StoreError::UnknownField {
                                field: ::core::clone::Clone::clone(key),
                            })
                        }
                    }
                }
                ::core::result::Result::Ok(next)
            }
        }
        impl #impl_g #c::DeepClone for #ident #type_g #where_c {
            fn deep_clone(&self) -> Self {
                Self {
                    #(#deep_clones,)*
                }
            }
        }
    })
}

fn parse_crate_path(attrs: &[Attribute]) -> Result<Path> {
    let mut path: Path = parse_quote!(::statemix);
    for attr in attrs {
        if !attr.path().is_ident("fields") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                let s: LitStr = meta.value()?.parse()?;
                path = s.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported `fields` attribute"))
            }
        })?;
    }
    Ok(path)
}

struct FieldEntry {
    ident: Ident,
    name: String,
    skip: bool,
}

impl FieldEntry {
    fn new(ident: Ident, attrs: &[Attribute]) -> Result<Self> {
        let mut name = ident.to_string().trim_start_matches("r#").to_string();
        let mut skip = false;
        for attr in attrs {
            if !attr.path().is_ident("fields") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    let s: LitStr = meta.value()?.parse()?;
                    name = s.value();
                    Ok(())
                } else if meta.path.is_ident("skip") {
                    skip = true;
                    Ok(())
                } else {
                    Err(meta.error("unsupported `fields` attribute"))
                }
            })?;
        }
        Ok(Self { ident, name, skip })
    }
}
