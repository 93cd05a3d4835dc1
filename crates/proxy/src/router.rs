use http::{HeaderMap, Method};

use wisp_config::config::{RouteRule, Routing};

/// A matched rule: target group plus the literal prefix to trim, if any.
pub struct RouteMatch<'a> {
    pub backend: &'a str,
    pub strip_prefix: Option<&'a str>,
}

/// Priority-ordered rule matcher. Rules are sorted once at construction;
/// matching is pure, so identical requests always land on the same group.
pub struct Router {
    rules: Vec<RouteRule>,
    default_backend: Option<String>,
}

impl Router {
    pub fn new(routing: &Routing) -> Self {
        let mut rules = routing.rules.clone();
        // stable sort: equal priorities keep declaration order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Self {
            rules,
            default_backend: routing.default_backend.clone(),
        }
    }

    /// First fully-matching rule wins; all declared predicates must hold.
    /// Falls back to the default backend, then `None` (rendered as 404).
    pub fn match_request(
        &self,
        method: &Method,
        path: &str,
        host: Option<&str>,
        headers: &HeaderMap,
    ) -> Option<RouteMatch<'_>> {
        for rule in &self.rules {
            if rule_matches(rule, method, path, host, headers) {
                return Some(RouteMatch {
                    backend: &rule.backend,
                    strip_prefix: if rule.strip_prefix {
                        prefix_to_strip(rule)
                    } else {
                        None
                    },
                });
            }
        }

        self.default_backend.as_deref().map(|backend| RouteMatch {
            backend,
            strip_prefix: None,
        })
    }
}

fn rule_matches(
    rule: &RouteRule,
    method: &Method,
    path: &str,
    host: Option<&str>,
    headers: &HeaderMap,
) -> bool {
    if let Some(pattern) = &rule.path {
        if !match_path(path, pattern) {
            return false;
        }
    }

    if let Some(prefix) = &rule.path_prefix {
        if !path.starts_with(prefix.as_str()) {
            return false;
        }
    }

    if let Some(want) = &rule.host {
        if host != Some(want.as_str()) {
            return false;
        }
    }

    if !rule.methods.is_empty()
        && !rule
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    {
        return false;
    }

    for (key, value) in &rule.headers {
        match headers.get(key.as_str()) {
            Some(found) if found.as_bytes() == value.as_bytes() => {}
            _ => return false,
        }
    }

    true
}

/// The literal prefix a strip_prefix rule removes: `path_prefix` if present,
/// else everything before a trailing `/*` in the path pattern.
fn prefix_to_strip(rule: &RouteRule) -> Option<&str> {
    if let Some(prefix) = &rule.path_prefix {
        return Some(prefix);
    }
    if let Some(pattern) = &rule.path {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Some(prefix);
        }
    }
    None
}

/// Pattern match after canonicalization. `P/*` matches `P` and anything
/// under `P/`; a bare `/*` matches everything; an interior `*` matches
/// exactly one segment.
pub fn match_path(request_path: &str, pattern: &str) -> bool {
    let request_path = clean_path(request_path);
    let pattern = clean_path(pattern);

    if request_path == pattern {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        if prefix.is_empty() {
            return true;
        }
        return request_path == prefix || request_path.starts_with(&format!("{prefix}/"));
    }

    if pattern.contains('*') {
        return match_segments(&request_path, &pattern);
    }

    false
}

fn match_segments(path: &str, pattern: &str) -> bool {
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();

    if path_segments.len() != pattern_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(&path_segments)
        .all(|(pat, seg)| *pat == "*" || pat == seg)
}

/// Lexical canonicalization of a rooted path: collapses empty and `.`
/// segments, resolves `..`.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut cleaned = String::with_capacity(path.len());
    cleaned.push('/');
    cleaned.push_str(&segments.join("/"));
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn rule(backend: &str, priority: i32) -> RouteRule {
        RouteRule {
            path: None,
            path_prefix: None,
            host: None,
            methods: Vec::new(),
            headers: Default::default(),
            backend: backend.to_string(),
            priority,
            strip_prefix: false,
        }
    }

    fn router(rules: Vec<RouteRule>, default: Option<&str>) -> Router {
        Router::new(&Routing {
            rules,
            default_backend: default.map(String::from),
        })
    }

    #[test]
    fn cleans_paths() {
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("/api/"), "/api");
        assert_eq!(clean_path("//api//x"), "/api/x");
        assert_eq!(clean_path("/api/./x"), "/api/x");
        assert_eq!(clean_path("/api/../admin"), "/admin");
        assert_eq!(clean_path("/api/*"), "/api/*");
    }

    #[test]
    fn wildcard_suffix_matches_subtree() {
        assert!(match_path("/api", "/api/*"));
        assert!(match_path("/api/", "/api/*"));
        assert!(match_path("/api/x", "/api/*"));
        assert!(match_path("/api/x/y", "/api/*"));
        assert!(!match_path("/apix", "/api/*"));
    }

    #[test]
    fn bare_wildcard_matches_everything() {
        assert!(match_path("/", "/*"));
        assert!(match_path("/anything/at/all", "/*"));
    }

    #[test]
    fn interior_wildcard_matches_one_segment() {
        assert!(match_path("/api/123/details", "/api/*/details"));
        assert!(!match_path("/api/123/456/details", "/api/*/details"));
        assert!(!match_path("/api/details", "/api/*/details"));
    }

    #[test]
    fn exact_path_requires_equality() {
        assert!(match_path("/users", "/users"));
        assert!(match_path("/users/", "/users"));
        assert!(!match_path("/users/1", "/users"));
    }

    #[test]
    fn priority_orders_rules() {
        let mut low = rule("low", 1);
        low.path_prefix = Some(String::from("/api"));
        let mut high = rule("high", 10);
        high.path_prefix = Some(String::from("/api"));

        let r = router(vec![low, high], None);
        let m = r
            .match_request(&Method::GET, "/api/x", None, &HeaderMap::new())
            .unwrap();
        assert_eq!(m.backend, "high");
    }

    #[test]
    fn equal_priority_keeps_declaration_order() {
        let mut first = rule("first", 5);
        first.path_prefix = Some(String::from("/api"));
        let mut second = rule("second", 5);
        second.path_prefix = Some(String::from("/api"));

        let r = router(vec![first, second], None);
        let m = r
            .match_request(&Method::GET, "/api/x", None, &HeaderMap::new())
            .unwrap();
        assert_eq!(m.backend, "first");
    }

    #[test]
    fn all_predicates_must_match() {
        let mut strict = rule("strict", 0);
        strict.path_prefix = Some(String::from("/api"));
        strict.host = Some(String::from("api.example.com"));
        strict.methods = vec![String::from("POST")];
        strict
            .headers
            .insert(String::from("x-tenant"), String::from("acme"));

        let r = router(vec![strict], None);

        let mut headers = HeaderMap::new();
        headers.insert("x-tenant", HeaderValue::from_static("acme"));

        assert!(r
            .match_request(&Method::POST, "/api/x", Some("api.example.com"), &headers)
            .is_some());

        // method is case-insensitive
        let mut post_lower = rule("strict", 0);
        post_lower.methods = vec![String::from("post")];
        let r2 = router(vec![post_lower], None);
        assert!(r2
            .match_request(&Method::POST, "/x", None, &HeaderMap::new())
            .is_some());

        // wrong host
        assert!(r
            .match_request(&Method::POST, "/api/x", Some("other.example.com"), &headers)
            .is_none());

        // wrong method
        assert!(r
            .match_request(&Method::GET, "/api/x", Some("api.example.com"), &headers)
            .is_none());

        // missing header
        assert!(r
            .match_request(
                &Method::POST,
                "/api/x",
                Some("api.example.com"),
                &HeaderMap::new()
            )
            .is_none());
    }

    #[test]
    fn falls_back_to_default_backend() {
        let mut api = rule("api", 0);
        api.path_prefix = Some(String::from("/api"));

        let r = router(vec![api], Some("web"));
        let m = r
            .match_request(&Method::GET, "/other", None, &HeaderMap::new())
            .unwrap();
        assert_eq!(m.backend, "web");
        assert!(m.strip_prefix.is_none());
    }

    #[test]
    fn no_rule_and_no_default_is_not_found() {
        let mut api = rule("api", 0);
        api.path = Some(String::from("/api/*"));

        let r = router(vec![api], None);
        assert!(r
            .match_request(&Method::GET, "/other", None, &HeaderMap::new())
            .is_none());
    }

    #[test]
    fn strip_prefix_uses_path_prefix() {
        let mut api = rule("api", 0);
        api.path_prefix = Some(String::from("/api/v1"));
        api.strip_prefix = true;

        let r = router(vec![api], None);
        let m = r
            .match_request(&Method::GET, "/api/v1/users", None, &HeaderMap::new())
            .unwrap();
        assert_eq!(m.strip_prefix, Some("/api/v1"));
    }

    #[test]
    fn strip_prefix_uses_wildcard_literal() {
        let mut api = rule("api", 0);
        api.path = Some(String::from("/api/*"));
        api.strip_prefix = true;

        let r = router(vec![api], None);
        let m = r
            .match_request(&Method::GET, "/api/users", None, &HeaderMap::new())
            .unwrap();
        assert_eq!(m.strip_prefix, Some("/api"));
    }

    #[test]
    fn match_is_deterministic() {
        let mut api = rule("api", 3);
        api.path = Some(String::from("/api/*"));
        let mut web = rule("web", 1);
        web.path = Some(String::from("/*"));

        let r = router(vec![api, web], None);
        for _ in 0..10 {
            let m = r
                .match_request(&Method::GET, "/api/x", None, &HeaderMap::new())
                .unwrap();
            assert_eq!(m.backend, "api");
        }
    }
}
