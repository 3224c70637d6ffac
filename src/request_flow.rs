//! Request path after parsing: route the target (demo login / registration
//! and shortcut pages), then resolve it to a resource.
//!
//! Kept free of sockets so tests can drive it with plain buffers.

use tracing::{debug, info};

use crate::credentials::CredentialStore;
use crate::protocol::{HttpCode, Method};
use crate::resource::{ResolveError, Resource, ResourceResolver};

/// Result of fulfilling a parsed request.
pub struct Fulfilled {
    pub code: HttpCode,
    pub resource: Option<Resource>,
}

/// Pull `user` and `password` (or `passwd`) out of an urlencoded form body.
pub fn parse_form(body: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(body).ok()?;
    let mut user = None;
    let mut password = None;
    for pair in text.split('&') {
        match pair.split_once('=') {
            Some(("user", v)) => user = Some(v.to_string()),
            Some(("password" | "passwd", v)) => password = Some(v.to_string()),
            _ => {}
        }
    }
    Some((user?, password?))
}

/// Map the request target to the page actually served.
///
/// A `POST` whose last path segment starts with `2` checks a login, `3`
/// registers a user. Segments starting with `0`, `1`, `5`, `6`, `7` are
/// shortcuts to fixed pages.
pub fn route(
    method: Method,
    target: &str,
    body: Option<&[u8]>,
    store: &dyn CredentialStore,
) -> String {
    let name = target.rsplit('/').next().unwrap_or_default();
    let leading = name.chars().next();

    if method == Method::Post && matches!(leading, Some('2' | '3')) {
        let creds = body.and_then(parse_form);
        let page = if leading == Some('3') {
            match creds {
                Some((user, password)) if store.insert(&user, &password) => {
                    info!(user = %user, "registered user");
                    "/log.html"
                }
                _ => "/registerError.html",
            }
        } else {
            match creds {
                Some((user, password))
                    if store.lookup(&user).as_deref() == Some(password.as_str()) =>
                {
                    info!(user = %user, "login accepted");
                    "/welcome.html"
                }
                _ => "/logError.html",
            }
        };
        return page.to_string();
    }

    match leading {
        Some('0') => "/register.html".to_string(),
        Some('1') => "/log.html".to_string(),
        Some('5') => "/picture.html".to_string(),
        Some('6') => "/video.html".to_string(),
        Some('7') => "/fans.html".to_string(),
        _ => target.to_string(),
    }
}

/// Route and resolve a complete request.
pub fn fulfill(
    method: Method,
    target: &str,
    body: Option<&[u8]>,
    resolver: &dyn ResourceResolver,
    store: &dyn CredentialStore,
) -> Fulfilled {
    let path = route(method, target, body, store);
    match resolver.resolve(&path) {
        Ok(resource) => Fulfilled {
            code: HttpCode::FileRequest,
            resource: Some(resource),
        },
        Err(err) => {
            debug!(path = %path, error = %err, "resource lookup failed");
            let code = match err {
                ResolveError::NotFound => HttpCode::NoResource,
                ResolveError::Forbidden => HttpCode::ForbiddenRequest,
                ResolveError::IsDirectory => HttpCode::BadRequest,
                ResolveError::Io(_) => HttpCode::InternalError,
            };
            Fulfilled {
                code,
                resource: None,
            }
        }
    }
}
