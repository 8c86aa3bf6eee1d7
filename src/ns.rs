//! XML namespaces used by RFC 3920/3921 client streams.

/// `<stream:stream>` and friends.
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// Stream error defined conditions.
pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// In-band TLS negotiation (`<starttls/>`, `<proceed/>`).
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

/// SASL negotiation (`<auth/>`, `<challenge/>`, …).
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// Resource binding.
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// Session establishment (RFC 3921, section 3).
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";

/// Default namespace of client-to-server streams.
pub const JABBER_CLIENT: &str = "jabber:client";

/// Roster management (RFC 3921, section 7).
pub const ROSTER: &str = "jabber:iq:roster";
