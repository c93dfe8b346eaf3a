//! `#[syscall_trace]`: logs a syscall's arguments on entry and its result on
//! exit, at debug level.
//!
//! The annotated function must return a `Result` whose variants are `Debug`,
//! and the calling crate must have `alloc` and the `log` macros in scope.
//! The kernel context argument, named `kernel`, is left out of the trace.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{FnArg, ItemFn, Pat, parse_macro_input};

#[proc_macro_attribute]
pub fn syscall_trace(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut function = parse_macro_input!(item as ItemFn);
    let signature = &function.sig;
    let fn_name = &signature.ident;
    let arg_names: Vec<_> = signature
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(pat_type) => match &*pat_type.pat {
                Pat::Ident(pat_ident) if pat_ident.ident != "kernel" => Some(&pat_ident.ident),
                _ => None,
            },
            FnArg::Receiver(_) => None,
        })
        .collect();

    let arg_list_pattern = arg_names
        .iter()
        .map(|name| format!("{} = {{}}", name))
        .collect::<Vec<_>>()
        .join(", ");
    let format_pattern_in = format!("[syscall] <= {}({})", fn_name, arg_list_pattern);
    let format_pattern_out = format!("[syscall] => {}({}) = {{}}", fn_name, arg_list_pattern);

    let fn_body = &function.block;
    let block: TokenStream2 = quote! {{
        debug!(#format_pattern_in #(, #arg_names)*);

        #[allow(unreachable_code)]
        let __result = (|| {
            #fn_body
        })();

        use alloc::format;

        let __linux_result = match __result {
            Ok(ref value) => format!("{:?}", value),
            Err(ref error) => format!("{:?}", error),
        };
        debug!(#format_pattern_out #(, #arg_names)*, __linux_result);
        __result
    }};
    function.block = match syn::parse2(block) {
        Ok(block) => block,
        Err(error) => return error.to_compile_error().into(),
    };
    quote! {
        #function
    }
    .into()
}
