//! Proc macros for the kindling test harness
//!
//! Provides the `#[kindling::test]` attribute macro for tests that run
//! against the shared session cluster.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, Pat, PatType, ReturnType};

/// Attribute macro for cluster-backed integration tests.
///
/// Wraps an async fn into a `#[tokio::test]`. When the function takes a
/// parameter named `cluster`, the shared session cluster is provisioned
/// on first use and injected as `&KindCluster`; a provisioning failure
/// fails the test during setup.
///
/// # Example
///
/// ```ignore
/// use kindling::KindCluster;
///
/// #[kindling::test]
/// async fn test_nodes(cluster: &KindCluster) {
///     let out = cluster.kubectl(&["get", "nodes"]).await.unwrap();
///     assert!(out.contains("Ready"));
/// }
/// ```
///
/// # With Result Return Type
///
/// ```ignore
/// #[kindling::test]
/// async fn test_with_result(cluster: &KindCluster) -> Result<(), Box<dyn std::error::Error>> {
///     cluster.kubectl(&["get", "nodes"]).await?;
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    test_impl(&input_fn).into()
}

/// Check if a function has a parameter named "cluster"
fn has_cluster_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "cluster";
            }
        }
        false
    })
}

/// Check if a function has an explicit return type (e.g., `-> Result<...>`)
fn has_result_return(input_fn: &ItemFn) -> bool {
    matches!(&input_fn.sig.output, ReturnType::Type(..))
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(input_fn: &ItemFn) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;

    let inject_cluster = has_cluster_param(input_fn);

    let test_execution = if has_result_return(input_fn) {
        let ret_ty = match &input_fn.sig.output {
            ReturnType::Type(_, ty) => quote! { #ty },
            ReturnType::Default => quote! { () },
        };
        quote! {
            let result: #ret_ty = async { #fn_block }.await;
            if let Err(e) = result {
                panic!("test returned an error: {e:?}");
            }
        }
    } else {
        quote! {
            #fn_block
        }
    };

    if inject_cluster {
        quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                let cluster: &kindling::KindCluster = kindling::harness::session_cluster()
                    .await
                    .unwrap_or_else(|e| panic!("failed to provision session cluster: {e}"));

                #test_execution
            }
        }
    } else {
        quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                #test_execution
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{has_cluster_param, has_result_return, test_impl};
    use syn::ItemFn;

    fn parse_fn(code: &str) -> ItemFn {
        syn::parse_str(code).expect("failed to parse test function")
    }

    #[test]
    fn test_has_cluster_param_with_cluster() {
        let f = parse_fn("async fn test_it(cluster: &KindCluster) {}");
        assert!(has_cluster_param(&f));
    }

    #[test]
    fn test_has_cluster_param_without_params() {
        let f = parse_fn("async fn test_it() {}");
        assert!(!has_cluster_param(&f));
    }

    #[test]
    fn test_has_cluster_param_different_name() {
        let f = parse_fn("async fn test_it(kluster: &KindCluster) {}");
        assert!(!has_cluster_param(&f), "only the name 'cluster' matches");
    }

    #[test]
    fn test_has_result_return_with_result() {
        let f = parse_fn(
            "async fn test_it(cluster: &KindCluster) -> Result<(), Box<dyn std::error::Error>> {}",
        );
        assert!(has_result_return(&f));
    }

    #[test]
    fn test_has_result_return_without_result() {
        let f = parse_fn("async fn test_it(cluster: &KindCluster) {}");
        assert!(!has_result_return(&f));
    }

    #[test]
    fn test_impl_with_cluster_injects_session() {
        let f = parse_fn(
            "async fn test_k8s(cluster: &KindCluster) { cluster.kubectl(&[\"get\", \"nodes\"]).await.unwrap(); }",
        );
        let output = test_impl(&f).to_string();

        assert!(
            output.contains("session_cluster"),
            "should acquire the session cluster"
        );
        assert!(output.contains("tokio :: test"), "should be a tokio test");
    }

    #[test]
    fn test_impl_with_result_generates_error_handling() {
        let f = parse_fn(
            "async fn test_k8s(cluster: &KindCluster) -> Result<(), Box<dyn std::error::Error>> { Ok(()) }",
        );
        let output = test_impl(&f).to_string();

        assert!(
            output.contains("test returned an error"),
            "should panic on returned errors"
        );
    }

    #[test]
    fn test_impl_without_cluster_generates_simple_wrapper() {
        let f = parse_fn("async fn test_simple() { assert!(true); }");
        let output = test_impl(&f).to_string();

        assert!(output.contains("tokio :: test"));
        assert!(
            !output.contains("session_cluster"),
            "should not touch the session without a cluster param"
        );
    }

    #[test]
    fn test_impl_preserves_function_name_and_attrs() {
        let f = parse_fn("#[ignore] async fn my_custom_test(cluster: &KindCluster) {}");
        let output = test_impl(&f).to_string();

        assert!(output.contains("my_custom_test"));
        assert!(output.contains("ignore"));
    }
}
