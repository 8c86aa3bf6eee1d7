//! Error types for connection setup, negotiation and stanza exchange.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::net::AddrParseError;

use hickory_resolver::{
    error::ResolveError as DnsResolveError, proto::error::ProtoError as DnsProtoError,
};

use crate::jid;
use crate::proto::StreamError;
use crate::stanza::StanzaError;

/// Any failure a client operation can surface.
#[derive(Debug)]
pub enum Error {
    /// The socket failed underneath the pipeline, during connect, TLS or
    /// normal traffic.
    Transport(IoError),
    /// A string that was supposed to be a JID did not parse as one.
    Jid(jid::Error),
    /// The peer sent something the stream contract does not allow here.
    Protocol(ProtocolError),
    /// SASL negotiation went wrong.
    Auth(AuthError),
    /// A request of ours came back as an error stanza.
    Stanza(StanzaError),
    /// The pipeline tasks are gone; nothing more can be sent or received.
    Closed,
    /// The operation does not fit the stream's current state.
    BadState,
    /// SRV lookup for the server domain failed.
    Lookup(DnsResolveError),
    /// The SRV query name could not be formed.
    DnsName(DnsProtoError),
    /// The server domain has no ASCII (IDNA) form.
    HostName,
    /// A literal server address was not `ip:port`.
    ServerAddr(AddrParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(fmt, "transport failure: {}", e),
            Error::Jid(e) => write!(fmt, "{}", e),
            Error::Protocol(e) => write!(fmt, "stream protocol violation: {}", e),
            Error::Auth(e) => write!(fmt, "SASL: {}", e),
            Error::Stanza(e) => write!(fmt, "request failed, {}", e),
            Error::Closed => write!(fmt, "connection pipeline has shut down"),
            Error::BadState => write!(fmt, "not possible in the current stream state"),
            Error::Lookup(e) => write!(fmt, "SRV lookup: {}", e),
            Error::DnsName(e) => write!(fmt, "bad DNS name: {}", e),
            Error::HostName => write!(fmt, "server domain is not valid IDNA"),
            Error::ServerAddr(e) => write!(fmt, "bad server address: {}", e),
        }
    }
}

impl StdError for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Transport(e)
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::Jid(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<StanzaError> for Error {
    fn from(e: StanzaError) -> Self {
        Error::Stanza(e)
    }
}

impl From<DnsResolveError> for Error {
    fn from(e: DnsResolveError) -> Error {
        Error::Lookup(e)
    }
}

impl From<DnsProtoError> for Error {
    fn from(e: DnsProtoError) -> Error {
        Error::DnsName(e)
    }
}

impl From<idna::Errors> for Error {
    fn from(_e: idna::Errors) -> Self {
        Error::HostName
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Error {
        Error::ServerAddr(e)
    }
}

/// XMPP protocol-level error
#[derive(Debug)]
pub enum ProtocolError {
    /// XML stream was not well-formed or a subtree failed to build
    Xml(xso::error::Error),
    /// A stanza attribute carried an unparseable Jabber-Id
    Jid(jid::Error),
    /// Root element of a stanza was not iq, message or presence
    UnknownElement(String),
    /// A required attribute was missing or carried a bad value
    BadAttribute(&'static str),
    /// Invalid response to resource binding
    InvalidBindResponse,
    /// Peer answered `<starttls/>` with a failure
    TlsRefused,
    /// Peer closed the stream with `<stream:error>`
    Stream(StreamError),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Xml(e) => write!(fmt, "XML parser error: {}", e),
            ProtocolError::Jid(e) => write!(fmt, "jid attribute error: {}", e),
            ProtocolError::UnknownElement(name) => {
                write!(fmt, "not iq, message, or presence: {}", name)
            }
            ProtocolError::BadAttribute(name) => {
                write!(fmt, "missing or invalid attribute: {}", name)
            }
            ProtocolError::InvalidBindResponse => {
                write!(fmt, "invalid response to resource binding")
            }
            ProtocolError::TlsRefused => write!(fmt, "server refused starttls"),
            ProtocolError::Stream(e) => write!(fmt, "stream error: {}", e),
        }
    }
}

impl StdError for ProtocolError {}

impl From<xso::error::Error> for ProtocolError {
    fn from(e: xso::error::Error) -> Self {
        ProtocolError::Xml(e)
    }
}

impl From<jid::Error> for ProtocolError {
    fn from(e: jid::Error) -> Self {
        ProtocolError::Jid(e)
    }
}

/// Authentication error
#[derive(Debug)]
pub enum AuthError {
    /// Server offered no SASL mechanism we implement
    NoMechanism,
    /// Server challenge did not offer qop=auth
    NoQopAuth,
    /// Server challenge could not be decoded
    Challenge(String),
    /// Failure from server, with the defined condition if one was sent
    Fail(String),
}

impl StdError for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::NoQopAuth => write!(fmt, "server does not support qop=auth"),
            AuthError::Challenge(e) => write!(fmt, "malformed SASL challenge: {}", e),
            AuthError::Fail(condition) => write!(fmt, "failure from the server: {}", condition),
        }
    }
}
