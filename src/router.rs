//! Regex-based path dispatch table.
//!
//! Each [`Route`] owns a compiled pattern and the user's dispatch callback;
//! a [`Router`] holds an ordered list of them and walks it in insertion
//! order on every dispatch.

use crate::error::{Error, Result};
use regex::Regex;

/// A single compiled route: pattern plus the callback invoked on match.
pub struct Route {
    /// Pattern as compiled: `^…$`-wrapped unless the caller's pattern
    /// already starts with `(`.
    wrapped_pattern: String,
    /// Pattern as the caller supplied it (without the `^…$` wrapper).
    raw_pattern: String,
    regex: Regex,
    cb: Box<dyn Fn(&RouteMatch) + Send + Sync>,
}

impl Route {
    fn compile(pattern: &str, cb: Box<dyn Fn(&RouteMatch) + Send + Sync>) -> Result<Self> {
        if pattern.contains("\\K") {
            return Err(Error::InvalidArgument);
        }
        let wrapped_pattern = if pattern.starts_with('(') {
            pattern.to_owned()
        } else {
            format!("^{pattern}$")
        };
        let regex = Regex::new(&format!("(?i){wrapped_pattern}")).map_err(|_| Error::InvalidArgument)?;
        Ok(Self {
            wrapped_pattern,
            raw_pattern: pattern.to_owned(),
            regex,
            cb,
        })
    }

    pub fn raw_pattern(&self) -> &str {
        &self.raw_pattern
    }

    pub fn wrapped_pattern(&self) -> &str {
        &self.wrapped_pattern
    }
}

/// State handed to `dispatch_cb`/`match_cb`/the route callback for one
/// dispatch attempt: the path being matched and, once a match is found,
/// capture access.
pub struct RouteMatch<'a> {
    path: &'a str,
    captures: Option<regex::Captures<'a>>,
    regex: &'a Regex,
}

impl<'a> RouteMatch<'a> {
    pub fn path(&self) -> &str {
        self.path
    }

    /// Visits each positional (unnamed) capture group in order. Stops and
    /// propagates as soon as `cb` returns non-zero.
    pub fn segments_iter<F>(&self, mut cb: F) -> i32
    where
        F: FnMut(&str) -> i32,
    {
        let Some(caps) = &self.captures else {
            return 0;
        };
        for name in self.regex.capture_names().enumerate().skip(1) {
            let (i, name) = name;
            if name.is_some() {
                continue;
            }
            if let Some(m) = caps.get(i) {
                let rc = cb(m.as_str());
                if rc != 0 {
                    return rc;
                }
            }
        }
        0
    }

    /// Visits each named capture group.
    pub fn vars_iter<F>(&self, mut cb: F) -> i32
    where
        F: FnMut(&str, &str) -> i32,
    {
        let Some(caps) = &self.captures else {
            return 0;
        };
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                let rc = cb(name, m.as_str());
                if rc != 0 {
                    return rc;
                }
            }
        }
        0
    }
}

/// Ordered collection of routes, matched in insertion order — first match
/// wins.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. Rejects patterns already registered, by raw
    /// pattern text.
    pub fn add<F>(&mut self, pattern: &str, cb: F) -> Result<()>
    where
        F: Fn(&RouteMatch) + Send + Sync + 'static,
    {
        if self.routes.iter().any(|r| r.raw_pattern == pattern) {
            return Err(Error::Already);
        }
        let route = Route::compile(pattern, Box::new(cb))?;
        self.routes.push(route);
        Ok(())
    }

    pub fn rm(&mut self, pattern: &str) -> Result<()> {
        let pos = self
            .routes
            .iter()
            .position(|r| r.raw_pattern == pattern)
            .ok_or(Error::NotFound)?;
        self.routes.remove(pos);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.routes.len()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn cleanup(&mut self) {
        self.routes.clear();
    }

    /// Walks routes in order, invoking `dispatch_cb` (if any) before each
    /// match attempt and `match_cb` (if any) once a match is found, then
    /// the route's own callback. Returns `Ok(())` on the first match,
    /// `Err(DispatchError::NotFound)` if nothing matches, or
    /// `Err(DispatchError::Aborted(rc))` carrying the exact nonzero code a
    /// hook returned — the hook's own short-circuit code is the caller's
    /// to interpret, not something this router collapses into one of its
    /// own error variants.
    pub fn dispatch2<D, M>(
        &self,
        path: &str,
        mut dispatch_cb: Option<D>,
        mut match_cb: Option<M>,
    ) -> std::result::Result<(), DispatchError>
    where
        D: FnMut(&str, &Route) -> i32,
        M: FnMut(&RouteMatch) -> i32,
    {
        for route in &self.routes {
            if let Some(dispatch_cb) = dispatch_cb.as_mut() {
                let rc = dispatch_cb(path, route);
                if rc != 0 {
                    return Err(DispatchError::Aborted(rc));
                }
            }
            if let Some(caps) = route.regex.captures(path) {
                let route_match = RouteMatch {
                    path,
                    captures: Some(caps),
                    regex: &route.regex,
                };
                if let Some(match_cb) = match_cb.as_mut() {
                    let rc = match_cb(&route_match);
                    if rc != 0 {
                        return Err(DispatchError::Aborted(rc));
                    }
                }
                (route.cb)(&route_match);
                return Ok(());
            }
        }
        Err(DispatchError::NotFound)
    }

    /// Convenience wrapper over [`Self::dispatch2`] with no dispatch/match
    /// hooks, so the only possible failure is `Error::NotFound`.
    pub fn dispatch(&self, path: &str) -> Result<()> {
        self.dispatch2::<fn(&str, &Route) -> i32, fn(&RouteMatch) -> i32>(path, None, None)
            .map_err(|e| match e {
                DispatchError::NotFound => Error::NotFound,
                DispatchError::Aborted(_) => unreachable!("no hooks were passed, so none can abort"),
            })
    }
}

/// Why [`Router::dispatch2`] returned before a route handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// No route's compiled pattern matched the path.
    NotFound,
    /// `dispatch_cb`/`match_cb` returned this nonzero code, stopping
    /// dispatch before any route handler ran.
    Aborted(i32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_matches_first_route_in_order() {
        let mut router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = hits.clone();
        router.add("/foo", move |_| { h1.fetch_add(1, Ordering::SeqCst); }).unwrap();
        let h2 = hits.clone();
        router.add("/.*", move |_| { h2.fetch_add(10, Ordering::SeqCst); }).unwrap();
        router.dispatch("/foo").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_is_case_insensitive() {
        let mut router = Router::new();
        let hit = Arc::new(AtomicUsize::new(0));
        let h = hit.clone();
        router.add("/Foo", move |_| { h.fetch_add(1, Ordering::SeqCst); }).unwrap();
        router.dispatch("/FOO").unwrap();
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_returns_not_found_when_no_route_matches() {
        let mut router = Router::new();
        router.add("/foo", |_| {}).unwrap();
        assert!(matches!(router.dispatch("/bar"), Err(Error::NotFound)));
    }

    #[test]
    fn add_rejects_duplicate_pattern() {
        let mut router = Router::new();
        router.add("/foo", |_| {}).unwrap();
        assert!(matches!(router.add("/foo", |_| {}), Err(Error::Already)));
    }

    #[test]
    fn add_rejects_backslash_k() {
        let mut router = Router::new();
        assert!(matches!(router.add(r"/foo\K/bar", |_| {}), Err(Error::InvalidArgument)));
    }

    #[test]
    fn pattern_starting_with_paren_is_not_wrapped() {
        let mut router = Router::new();
        router.add("(/foo|/bar)", |_| {}).unwrap();
        assert_eq!(router.routes()[0].wrapped_pattern(), "(/foo|/bar)");
    }

    #[test]
    fn plain_pattern_is_anchored_both_ends() {
        let mut router = Router::new();
        router.add("/foo", |_| {}).unwrap();
        assert_eq!(router.routes()[0].wrapped_pattern(), "^/foo$");
    }

    #[test]
    fn segments_iter_visits_positional_captures_in_order() {
        let mut router = Router::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        router
            .add(r"^/users/(\d+)/posts/(\d+)$", move |m| {
                m.segments_iter(|seg| {
                    s.lock().unwrap().push(seg.to_owned());
                    0
                });
            })
            .unwrap();
        router.dispatch("/users/42/posts/7").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["42", "7"]);
    }

    #[test]
    fn vars_iter_visits_named_captures() {
        let mut router = Router::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        router
            .add(r"^/users/(?P<id>\d+)$", move |m| {
                m.vars_iter(|name, value| {
                    s.lock().unwrap().push((name.to_owned(), value.to_owned()));
                    0
                });
            })
            .unwrap();
        router.dispatch("/users/99").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("id".to_owned(), "99".to_owned())]);
    }

    #[test]
    fn dispatch_cb_nonzero_aborts_before_matching_and_propagates_its_code() {
        let mut router = Router::new();
        router.add("/foo", |_| {}).unwrap();
        let result = router.dispatch2(
            "/foo",
            Some(|_: &str, _: &Route| 7),
            None::<fn(&RouteMatch) -> i32>,
        );
        assert!(matches!(result, Err(DispatchError::Aborted(7))));
    }

    #[test]
    fn rm_removes_registered_route() {
        let mut router = Router::new();
        router.add("/foo", |_| {}).unwrap();
        router.rm("/foo").unwrap();
        assert_eq!(router.count(), 0);
        assert!(matches!(router.rm("/foo"), Err(Error::NotFound)));
    }
}
