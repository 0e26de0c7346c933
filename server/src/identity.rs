//! Client identity used to partition rate limiter state.
//!
//! The identity of a request is the IP address of the connecting peer,
//! without the port. It is derived from axum's [`ConnectInfo`], so the server
//! must be started with `into_make_service_with_connect_info::<SocketAddr>()`.

use std::fmt;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Extensions;
use thiserror::Error;

/// Errors raised while deriving a client identity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The transport did not report a peer address for the request.
    #[error("peer address is missing from the request")]
    MissingPeerAddr,
}

/// Identity of a requesting client, typically its IP address.
///
/// The admission gate attaches the identity to every forwarded request as an
/// extension, so handlers can extract it with
/// `axum::Extension<ClientIdentity>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Builds the identity from the host part of a peer socket address.
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        Self(addr.ip().to_string())
    }

    /// Extracts the identity from the connection info stored in request
    /// extensions.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MissingPeerAddr`] when no
    /// `ConnectInfo<SocketAddr>` is present.
    pub fn from_extensions(extensions: &Extensions) -> Result<Self, IdentityError> {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Self::from_socket_addr(addr))
            .ok_or(IdentityError::MissingPeerAddr)
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
