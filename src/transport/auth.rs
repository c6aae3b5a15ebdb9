//! Handshake filters for the room endpoint.
//!
//! Filters are tungstenite handshake [`Callback`]s that inspect the
//! upgrade request before the WebSocket is accepted. They compose by
//! wrapping: [`MustAuth`] takes any callback and returns one that only
//! delegates when the request carries the auth cookie.
//!
//! ```ignore
//! let filter = MustAuth::new(RoomRoute::new("/room"), "auth", "/login")?;
//! tokio_tungstenite::accept_hdr_async(stream, filter).await?;
//! ```
//!
//! Identity is not parsed here; cookie presence is the whole check.

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::handshake::server::{
    Callback, ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::header::ToStrError;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Helpers
// ============================================================================

/// Builds an error response with an optional body.
fn error_response(status: StatusCode, body: Option<String>) -> ErrorResponse {
    let mut response = ErrorResponse::new(body);
    *response.status_mut() = status;
    response
}

/// Looks up a cookie by name across all `Cookie` headers.
///
/// Fails if a `Cookie` header is not valid visible ASCII.
fn find_cookie<'r>(
    request: &'r Request,
    name: &str,
) -> std::result::Result<Option<&'r str>, ToStrError> {
    for value in request.headers().get_all(header::COOKIE) {
        let value = value.to_str()?;
        for pair in value.split(';') {
            if let Some((key, cookie)) = pair.trim().split_once('=')
                && key == name
            {
                return Ok(Some(cookie));
            }
        }
    }
    Ok(None)
}

// ============================================================================
// RoomRoute
// ============================================================================

/// Accepts only upgrades for the room path.
#[derive(Debug, Clone)]
pub struct RoomRoute {
    path: String,
}

impl RoomRoute {
    /// Creates a route for `path`.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Callback for RoomRoute {
    fn on_request(
        self,
        request: &Request,
        response: Response,
    ) -> std::result::Result<Response, ErrorResponse> {
        if request.uri().path() == self.path {
            Ok(response)
        } else {
            debug!(path = request.uri().path(), "Upgrade for unknown path");
            Err(error_response(StatusCode::NOT_FOUND, None))
        }
    }
}

// ============================================================================
// MustAuth
// ============================================================================

/// Requires the auth cookie before delegating to `inner`.
///
/// Requests without it are redirected to the login page with
/// `307 Temporary Redirect`. An unreadable `Cookie` header is answered
/// with `500 Internal Server Error`.
#[derive(Debug, Clone)]
pub struct MustAuth<C> {
    inner: C,
    cookie: String,
    login: HeaderValue,
}

impl<C: Callback> MustAuth<C> {
    /// Wraps `inner`.
    ///
    /// # Arguments
    ///
    /// * `inner` - Callback run for authenticated requests
    /// * `cookie` - Name of the cookie marking a request as authenticated
    /// * `login_path` - Redirect target for everyone else
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `login_path` is not a valid header value.
    pub fn new(inner: C, cookie: impl Into<String>, login_path: &str) -> Result<Self> {
        let login = HeaderValue::from_str(login_path)
            .map_err(|e| Error::config(format!("invalid login path {login_path:?}: {e}")))?;

        Ok(Self {
            inner,
            cookie: cookie.into(),
            login,
        })
    }
}

impl<C: Callback> Callback for MustAuth<C> {
    fn on_request(
        self,
        request: &Request,
        response: Response,
    ) -> std::result::Result<Response, ErrorResponse> {
        match find_cookie(request, &self.cookie) {
            Ok(Some(_)) => self.inner.on_request(request, response),

            Ok(None) => {
                debug!(path = request.uri().path(), "Unauthenticated upgrade, redirecting");
                let mut redirect = error_response(StatusCode::TEMPORARY_REDIRECT, None);
                redirect.headers_mut().insert(header::LOCATION, self.login);
                Err(redirect)
            }

            Err(e) => {
                debug!(error = %e, "Unreadable cookie header");
                Err(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(e.to_string()),
                ))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
