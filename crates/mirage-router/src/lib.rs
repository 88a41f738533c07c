//! Path template router.
//!
//! Compiles swagger `paths` keys such as `/items/{id}` or `/files/{path+}`
//! into matchers and resolves request paths against them in declaration
//! order. The first template that matches wins: there is no
//! "most specific route" ranking, so API authors must list a greedy
//! `{proxy+}` route after the narrower routes it would otherwise shadow.

pub mod template;

pub use template::{PathParams, RouteError, RouteTemplate};

/// The result of a route lookup.
#[derive(Debug)]
pub enum RouteMatch<'a, T> {
    /// A template matched the path.
    Found {
        /// The template source (e.g. `/items/{id}`).
        resource: &'a str,
        /// The value registered for the template.
        value: &'a T,
        /// Extracted placeholder values.
        params: PathParams,
    },
    /// No template matched.
    NotFound,
}

/// Ordered list of compiled templates and their values.
#[derive(Debug)]
pub struct Router<T> {
    routes: Vec<(RouteTemplate, T)>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> Router<T> {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `template` and append it after every route inserted so far.
    pub fn insert(&mut self, template: &str, value: T) -> Result<(), RouteError> {
        let compiled = RouteTemplate::compile(template)?;
        self.routes.push((compiled, value));
        Ok(())
    }

    /// Resolve a request path (without query string).
    pub fn resolve(&self, path: &str) -> RouteMatch<'_, T> {
        for (template, value) in &self.routes {
            if let Some(params) = template.matches(path) {
                return RouteMatch::Found {
                    resource: template.source(),
                    value,
                    params,
                };
            }
        }
        RouteMatch::NotFound
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route has been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate over the registered templates in declaration order.
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(template, _)| template.source())
    }
}

/// Strip a swagger `basePath` from a request path.
///
/// Returns `None` when the path lies outside the base path. A base path of
/// `/` (or an empty one) leaves the path untouched.
pub fn strip_base_path<'a>(base_path: &str, path: &'a str) -> Option<&'a str> {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(base)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(paths: &[&str]) -> Router<usize> {
        let mut router = Router::new();
        for (index, path) in paths.iter().enumerate() {
            router.insert(path, index).unwrap();
        }
        router
    }

    fn found(router: &Router<usize>, path: &str) -> (usize, PathParams) {
        match router.resolve(path) {
            RouteMatch::Found { value, params, .. } => (*value, params),
            RouteMatch::NotFound => panic!("expected {path} to match"),
        }
    }

    #[test]
    fn resolves_static_route() {
        let router = router(&["/health", "/items"]);
        let (index, params) = found(&router, "/items");
        assert_eq!(index, 1);
        assert!(params.is_empty());
    }

    #[test]
    fn unknown_path_is_not_found() {
        let router = router(&["/items"]);
        assert!(matches!(router.resolve("/unknown"), RouteMatch::NotFound));
        assert!(matches!(router.resolve("/items/1"), RouteMatch::NotFound));
    }

    #[test]
    fn extracts_single_segment_params() {
        let router = router(&["/path/{this}/{that}"]);
        let (_, params) = found(&router, "/path/foo/bar");
        assert_eq!(params.get("this").map(String::as_str), Some("foo"));
        assert_eq!(params.get("that").map(String::as_str), Some("bar"));
    }

    #[test]
    fn different_paths_differ_only_in_placeholder_positions() {
        let router = router(&["/users/{user}/orders/{order}"]);
        let (_, a) = found(&router, "/users/alice/orders/1");
        let (_, b) = found(&router, "/users/alice/orders/2");
        assert_eq!(a.get("user"), b.get("user"));
        assert_ne!(a.get("order"), b.get("order"));
    }

    #[test]
    fn single_segment_param_never_spans_slash() {
        let router = router(&["/items/{id}"]);
        assert!(matches!(router.resolve("/items/a/b"), RouteMatch::NotFound));
    }

    #[test]
    fn greedy_param_captures_remainder() {
        let router = router(&["/foo/{proxy+}"]);
        let (_, params) = found(&router, "/foo/bar/baz");
        assert_eq!(params.get("proxy").map(String::as_str), Some("bar/baz"));
    }

    #[test]
    fn first_declared_route_wins() {
        let greedy_first = router(&["/foo/{proxy+}", "/foo/bar"]);
        let (index, _) = found(&greedy_first, "/foo/bar");
        assert_eq!(index, 0);

        let static_first = router(&["/foo/bar", "/foo/{proxy+}"]);
        let (index, _) = found(&static_first, "/foo/bar");
        assert_eq!(index, 0);
        let (index, _) = found(&static_first, "/foo/baz");
        assert_eq!(index, 1);
    }

    #[test]
    fn found_reports_resource_template() {
        let router = router(&["/items/{id}"]);
        match router.resolve("/items/42") {
            RouteMatch::Found { resource, .. } => assert_eq!(resource, "/items/{id}"),
            RouteMatch::NotFound => panic!("expected match"),
        }
    }

    #[test]
    fn insert_rejects_invalid_template() {
        let mut router = Router::new();
        assert!(router.insert("/a/{x}/{x}", 0).is_err());
        assert!(router.is_empty());
    }

    #[test]
    fn strip_base_path_variants() {
        assert_eq!(strip_base_path("/", "/items"), Some("/items"));
        assert_eq!(strip_base_path("", "/items"), Some("/items"));
        assert_eq!(strip_base_path("/v1", "/v1/items"), Some("/items"));
        assert_eq!(strip_base_path("/v1/", "/v1"), Some("/"));
        assert_eq!(strip_base_path("/v1", "/v10/items"), None);
        assert_eq!(strip_base_path("/v1", "/items"), None);
    }
}
