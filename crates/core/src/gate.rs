//! Access gatekeeper: route classification and the forward/redirect decision.
//!
//! The gatekeeper only answers "is there a session". Role and degree checks
//! belong to the [`crate::policy`] functions called further down.

/// Where unauthenticated visitors of protected pages are sent.
pub const SIGN_IN_PATH: &str = "/login";

/// Pages reachable without a session.
const PUBLIC_PATHS: &[&str] = &["/login", "/register"];

/// Path prefixes that never pass through the gatekeeper. Resource endpoints
/// authorize themselves; public object URLs and metrics are not pages.
const EXCLUDED_PREFIXES: &[&str] = &["/api/", "/files/", "/_next/"];

const EXCLUDED_EXACT: &[&str] = &["/api", "/metrics", "/favicon.ico"];

/// Diagnostic pages that stay reachable when session resolution is broken.
const BREAK_GLASS_PAGES: &[&str] = &[
    "/auth-debug",
    "/debug",
    "/user-debug",
    "/admin-debug",
    "/admin-check",
];

/// Classification of a request path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    /// Not gated at all.
    Excluded,
    /// Reachable with or without a session.
    Public,
    /// Requires a session.
    Protected,
}

/// Outcome of resolving a session from the request cookies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionLookup {
    Found,
    Missing,
    /// The credential store could not be consulted.
    Failed,
}

/// What the gatekeeper does with a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Forward,
    RedirectToSignIn,
}

/// Classify a request path.
pub fn classify(path: &str) -> RouteClass {
    if is_excluded(path) {
        return RouteClass::Excluded;
    }
    let trimmed = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    if PUBLIC_PATHS.contains(&trimmed) {
        RouteClass::Public
    } else {
        RouteClass::Protected
    }
}

fn is_excluded(path: &str) -> bool {
    if EXCLUDED_EXACT.contains(&path) || EXCLUDED_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return true;
    }
    if BREAK_GLASS_PAGES
        .iter()
        .any(|page| path == *page || path.starts_with(&format!("{page}/")))
    {
        return true;
    }
    // static assets
    path.rsplit('/').next().is_some_and(|segment| segment.contains('.'))
}

/// Decide what to do with a request.
///
/// A found session forwards everything, including public pages. Without a
/// session, protected pages redirect and public pages forward; a failed
/// lookup is treated like a missing session.
pub fn decide(class: RouteClass, lookup: SessionLookup) -> GateDecision {
    match (class, lookup) {
        (RouteClass::Excluded, _) => GateDecision::Forward,
        (_, SessionLookup::Found) => GateDecision::Forward,
        (RouteClass::Public, _) => GateDecision::Forward,
        (RouteClass::Protected, SessionLookup::Missing | SessionLookup::Failed) => {
            GateDecision::RedirectToSignIn
        }
    }
}
