use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use quote::quote_spanned;
use std::path::Path;

/// Implements `wirelog::TestCase` for a unit struct.
///
/// ```ignore
/// #[wirelog_test_case(
///     template = "templates/retrieve_form.xml",
///     action = "urn:ihe:iti:2007:RetrieveForm",
///     service = "FormManager",
///     bind(formId = "formID")
/// )]
/// pub struct RetrieveFormTest;
/// ```
///
/// The template path is relative to the crate's manifest directory and is
/// embedded at compile time, once per test case type.
///
/// Bound values are escaped for XML. Bindings wrapped in `raw(...)`, as in
/// `bind(formId = "formID", raw(content = "content"))`, are inserted as XML
/// fragments instead.
#[proc_macro_attribute]
pub fn wirelog_test_case(attrs: TokenStream, item: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(item as syn::ItemStruct);
    let args = syn::parse_macro_input!(attrs as syn::AttributeArgs);

    let mut template_path: Option<syn::LitStr> = None;
    let mut action: Option<syn::LitStr> = None;
    let mut service: Option<syn::LitStr> = None;
    let mut bindings: Vec<(syn::LitStr, syn::LitStr)> = Vec::new();
    let mut raw_placeholders: Vec<syn::LitStr> = Vec::new();

    for arg in &args {
        match arg {
            syn::NestedMeta::Meta(syn::Meta::NameValue(name_value)) => {
                let value = match &name_value.lit {
                    syn::Lit::Str(value) => value.clone(),
                    other => {
                        return quote_spanned! {other.span()=>
                            compile_error!("Expected a string literal!");
                        }
                        .into();
                    }
                };

                if name_value.path.is_ident("template") {
                    template_path = Some(value);
                } else if name_value.path.is_ident("action") {
                    action = Some(value);
                } else if name_value.path.is_ident("service") {
                    service = Some(value);
                } else {
                    return quote_spanned! {value.span()=>
                        compile_error!("Unknown argument, expected template, action, service or bind(...)");
                    }
                    .into();
                }
            }
            syn::NestedMeta::Meta(syn::Meta::List(list)) if list.path.is_ident("bind") => {
                for nested in &list.nested {
                    match nested {
                        syn::NestedMeta::Meta(syn::Meta::NameValue(binding)) => {
                            match parse_binding(binding) {
                                Ok((placeholder, label)) => bindings.push((placeholder, label)),
                                Err(stream) => return stream.into(),
                            }
                        }
                        syn::NestedMeta::Meta(syn::Meta::List(raw)) if raw.path.is_ident("raw") => {
                            for nested in &raw.nested {
                                let binding = match nested {
                                    syn::NestedMeta::Meta(syn::Meta::NameValue(binding)) => binding,
                                    _ => {
                                        return quote! {
                                            compile_error!("A raw binding should look like placeholder = \"label\"");
                                        }
                                        .into();
                                    }
                                };
                                match parse_binding(binding) {
                                    Ok((placeholder, label)) => {
                                        raw_placeholders.push(placeholder.clone());
                                        bindings.push((placeholder, label));
                                    }
                                    Err(stream) => return stream.into(),
                                }
                            }
                        }
                        _ => {
                            return quote! {
                                compile_error!("A binding should look like placeholder = \"label\" or raw(...)");
                            }
                            .into();
                        }
                    }
                }
            }
            _ => {
                return quote! {
                    compile_error!("Unknown argument, expected template, action, service or bind(...)");
                }
                .into();
            }
        }
    }

    let template_path = match template_path {
        Some(path) => path,
        None => {
            return quote! {
                compile_error!("A template path should be passed to the macro");
            }
            .into();
        }
    };
    if let Err(stream) = validate_template_path(template_path.value(), template_path.span()) {
        return stream.into();
    }

    let action = match action {
        Some(action) => action,
        None => {
            return quote! {
                compile_error!("A SOAP action should be passed to the macro");
            }
            .into();
        }
    };

    let struct_name = &input.ident;
    let test_case_name = struct_name.to_string();
    let template_name = Path::new(&template_path.value())
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| test_case_name.clone());
    let service_name = match service {
        Some(service) => quote! { Some(#service) },
        None => quote! { None },
    };
    let placeholders = bindings.iter().map(|(placeholder, _)| placeholder);
    let labels = bindings.iter().map(|(_, label)| label);

    let output = quote! {
        #input

        impl ::wirelog::TestCase for #struct_name {
            fn name(&self) -> &str {
                #test_case_name
            }

            fn template(&self) -> &::wirelog::RequestTemplate {
                static __WIRELOG_TEMPLATE: ::wirelog::RequestTemplate =
                    ::wirelog::RequestTemplate::from_static(
                        #template_name,
                        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/", #template_path)),
                    );
                &__WIRELOG_TEMPLATE
            }

            fn soap_action(&self) -> &str {
                #action
            }

            fn service_name(&self) -> Option<&str> {
                #service_name
            }

            fn bindings(&self) -> Vec<(&str, &str)> {
                vec![#((#placeholders, #labels)),*]
            }

            fn raw_placeholders(&self) -> Vec<&str> {
                vec![#(#raw_placeholders),*]
            }
        }
    };

    TokenStream::from(output)
}

fn parse_binding(
    binding: &syn::MetaNameValue,
) -> Result<(syn::LitStr, syn::LitStr), proc_macro2::TokenStream> {
    let placeholder = match binding.path.get_ident() {
        Some(ident) => syn::LitStr::new(&ident.to_string(), ident.span()),
        None => {
            return Err(quote! {
                compile_error!("A binding should look like placeholder = \"label\"");
            });
        }
    };

    match &binding.lit {
        syn::Lit::Str(label) => Ok((placeholder, label.clone())),
        other => Err(quote_spanned! {other.span()=>
            compile_error!("A binding label should be a string literal!");
        }),
    }
}

fn validate_template_path<P: AsRef<Path>>(
    path: P,
    span: Span,
) -> Result<(), proc_macro2::TokenStream> {
    if !path.as_ref().to_string_lossy().ends_with(".xml") {
        return Err(quote_spanned! {span=>
            compile_error!("The template path should point to a .xml file!");
        });
    }

    Ok(())
}
