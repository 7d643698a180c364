//! Derive macros for scoped-injector
//!
//! `#[derive(Constructible)]` turns a struct's `#[dep]` fields into the
//! dependency list of a `scoped_injector::Constructible` implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use scoped_injector::{Constructible, Container, Dyn};
//! use std::sync::Arc;
//!
//! #[derive(Constructible)]
//! struct UserService {
//!     #[dep]
//!     db: Arc<Database>,
//!     #[dep(optional)]
//!     cache: Option<Arc<Cache>>,
//!     #[dep(name = "audit")]
//!     log: Dyn<dyn EventSink>,
//!     // Fields without #[dep] use Default
//!     request_count: u64,
//! }
//!
//! let container = Container::new();
//! container.singleton::<Database>().unwrap();
//! container.transient::<UserService>().unwrap();
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Type, parse_macro_input};

/// Derive macro for the `Constructible` trait.
///
/// # Field attributes
///
/// - `#[dep]` - resolve the field from the container. The field type must
///   be a dependency parameter: `Arc<T>`, `Option<Arc<T>>`, `Vec<Arc<T>>`,
///   `Dyn<I>`, `Option<Dyn<I>>` or `Vec<Dyn<I>>`.
/// - `#[dep(optional)]` - as `#[dep]`; the field must be an `Option`, which
///   receives `None` when nothing is registered.
/// - `#[dep(name = "...")]` - resolve the registration with this name.
///
/// Fields without `#[dep]` use `Default::default()`.
///
/// # Struct attributes
///
/// - `#[constructible(dispose)]` - track instances for disposal; the type
///   must implement `scoped_injector::Dispose`.
///
/// # Generated Code
///
/// ```rust,ignore
/// impl Constructible for UserService {
///     type Dependencies = (Arc<Database>, Option<Arc<Cache>>, Dyn<dyn EventSink>);
///     fn parameter_names() -> &'static [&'static str] { &["db", "cache", "log"] }
///     fn parameter_targets() -> &'static [Option<&'static str>] { &[None, None, Some("audit")] }
///     fn construct((db, cache, log): Self::Dependencies) -> Self {
///         Self { db, cache, log, request_count: Default::default() }
///     }
/// }
/// ```
#[proc_macro_derive(Constructible, attributes(dep, constructible))]
pub fn derive_constructible(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let dispose = if wants_dispose(&input.attrs)? {
        quote! {
            fn dispose_probe() -> ::std::option::Option<::scoped_injector::DisposeProbe> {
                ::std::option::Option::Some(::scoped_injector::dispose_probe::<Self>())
            }
        }
    } else {
        quote! {}
    };

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unit => {
                return Ok(quote! {
                    impl #impl_generics ::scoped_injector::Constructible for #name #ty_generics #where_clause {
                        type Dependencies = ();

                        #dispose

                        fn construct(_: ()) -> Self {
                            Self
                        }
                    }
                });
            }
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Constructible can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Constructible can only be derived for structs",
            ));
        }
    };

    let mut dep_types = Vec::new();
    let mut dep_idents = Vec::new();
    let mut dep_names = Vec::new();
    let mut dep_targets = Vec::new();
    let mut field_inits = Vec::new();

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let field_type = &field.ty;

        match find_dep_attr(&field.attrs)? {
            Some(dep) => {
                if dep.optional && !is_option(field_type) {
                    return Err(syn::Error::new_spanned(
                        field_type,
                        "Fields marked with #[dep(optional)] must have type Option<...>",
                    ));
                }
                dep_types.push(field_type.clone());
                dep_idents.push(field_name.clone());
                dep_names.push(field_name.to_string());
                dep_targets.push(match dep.name {
                    Some(target) => quote! { ::std::option::Option::Some(#target) },
                    None => quote! { ::std::option::Option::None },
                });
                field_inits.push(quote! { #field_name });
            }
            None => {
                field_inits.push(quote! {
                    #field_name: ::std::default::Default::default()
                });
            }
        }
    }

    Ok(quote! {
        impl #impl_generics ::scoped_injector::Constructible for #name #ty_generics #where_clause {
            type Dependencies = (#(#dep_types,)*);

            fn parameter_names() -> &'static [&'static str] {
                &[#(#dep_names),*]
            }

            fn parameter_targets() -> &'static [::std::option::Option<&'static str>] {
                &[#(#dep_targets),*]
            }

            #dispose

            #[allow(unused_variables)]
            fn construct((#(#dep_idents,)*): Self::Dependencies) -> Self {
                Self {
                    #(#field_inits),*
                }
            }
        }
    })
}

struct DepAttr {
    optional: bool,
    name: Option<LitStr>,
}

/// Parse `#[dep]`, `#[dep(optional)]`, `#[dep(name = "...")]`
fn find_dep_attr(attrs: &[Attribute]) -> syn::Result<Option<DepAttr>> {
    let Some(attr) = attrs.iter().find(|a| a.path().is_ident("dep")) else {
        return Ok(None);
    };

    let mut dep = DepAttr {
        optional: false,
        name: None,
    };
    if attr.meta.require_path_only().is_ok() {
        return Ok(Some(dep));
    }

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("optional") {
            dep.optional = true;
            Ok(())
        } else if meta.path.is_ident("name") {
            dep.name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `optional` or `name = \"...\"`"))
        }
    })?;
    Ok(Some(dep))
}

fn wants_dispose(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut dispose = false;
    for attr in attrs.iter().filter(|a| a.path().is_ident("constructible")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("dispose") {
                dispose = true;
                Ok(())
            } else {
                Err(meta.error("expected `dispose`"))
            }
        })?;
    }
    Ok(dispose)
}

fn is_option(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Option"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn expand_err(input: DeriveInput) -> String {
        match expand(&input) {
            Ok(tokens) => panic!("expected an error, got {tokens}"),
            Err(err) => err.to_string(),
        }
    }

    #[test]
    fn test_expands_dependencies_in_field_order() {
        let input: DeriveInput = parse_quote! {
            #[constructible(dispose)]
            struct UserService {
                #[dep]
                db: Arc<Database>,
                #[dep(optional)]
                cache: Option<Arc<Cache>>,
                #[dep(name = "audit")]
                log: Dyn<dyn EventSink>,
                request_count: u64,
            }
        };
        let tokens = expand(&input).unwrap().to_string();

        assert!(tokens.contains("type Dependencies = (Arc < Database > , Option < Arc < Cache > > , Dyn < dyn EventSink > ,)"));
        assert!(tokens.contains("& [\"db\" , \"cache\" , \"log\"]"));
        assert!(tokens.contains("Some (\"audit\")"));
        assert!(tokens.contains("dispose_probe"));
        assert!(tokens.contains("request_count : :: std :: default :: Default :: default ()"));
    }

    #[test]
    fn test_unit_struct_has_no_dependencies() {
        let input: DeriveInput = parse_quote! { struct Marker; };
        let tokens = expand(&input).unwrap().to_string();
        assert!(tokens.contains("type Dependencies = ()"));
        assert!(!tokens.contains("dispose_probe"));

        let input: DeriveInput = parse_quote! {
            #[constructible(dispose)]
            struct Flusher;
        };
        assert!(expand(&input).unwrap().to_string().contains("dispose_probe"));
    }

    #[test]
    fn test_rejects_optional_on_non_option_field() {
        let input: DeriveInput = parse_quote! {
            struct S {
                #[dep(optional)]
                db: Arc<Database>,
            }
        };
        assert!(expand_err(input).contains("must have type Option"));
    }

    #[test]
    fn test_rejects_unknown_attribute_keys() {
        let dep: DeriveInput = parse_quote! {
            struct S {
                #[dep(lazy)]
                db: Arc<Database>,
            }
        };
        assert!(expand_err(dep).contains("expected `optional`"));

        let unit: DeriveInput = parse_quote! {
            #[constructible(clone)]
            struct S;
        };
        assert!(expand_err(unit).contains("expected `dispose`"));

        let strukt: DeriveInput = parse_quote! {
            #[constructible(clone)]
            struct S {
                #[dep]
                db: Arc<Database>,
            }
        };
        assert!(expand_err(strukt).contains("expected `dispose`"));
    }

    #[test]
    fn test_rejects_tuple_structs_and_enums() {
        let tuple: DeriveInput = parse_quote! { struct S(Arc<Database>); };
        assert!(expand_err(tuple).contains("named fields"));

        let enumeration: DeriveInput = parse_quote! { enum E { A, B } };
        assert!(expand_err(enumeration).contains("only be derived for structs"));
    }

    #[test]
    fn test_is_option() {
        assert!(is_option(&parse_quote!(Option<Arc<Cache>>)));
        assert!(is_option(&parse_quote!(std::option::Option<Dyn<dyn Sink>>)));
        assert!(!is_option(&parse_quote!(Arc<Cache>)));
        assert!(!is_option(&parse_quote!(&'static str)));
    }
}
