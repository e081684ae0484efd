//! Authenticated peer identity for TLS transports.

/// Identity of the far end after a TLS handshake.
///
/// Populated once from the peer certificate and immutable thereafter.
/// Request handlers see it through the request context.
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    /// True when the certificate was verified (server-auth on the client
    /// side, client-cert verification on the server side).
    pub authenticated: bool,
    /// Subject distinguished name.
    pub subject: String,
    /// Issuer distinguished name.
    pub issuer: String,
    /// Subject common name, if present.
    pub common_name: String,
    /// DNS subject-alternative-names.
    pub dns_sans: Vec<String>,
    /// The peer certificate, PEM-encoded.
    pub pem: String,
}
