//! Wire-level values: the stream header, stream errors, the features
//! advertisement, and the typed packets exchanged between the XML codec
//! tasks and the stream filter.

use std::fmt;

use minidom::Element;

use crate::ns;
use crate::stanza::{parse_stanza, Stanza};

pub(crate) mod reader;
pub(crate) mod writer;
pub(crate) mod xml;

/// The attributes of a `<stream:stream>` header.
///
/// Its outbound serialisation never closes: the element stays open for the
/// lifetime of the session.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    /// Intended recipient domain.
    pub to: Option<String>,
    /// Sending entity.
    pub from: Option<String>,
    /// Session id assigned by the server.
    pub id: Option<String>,
    /// The `xml:lang` attribute.
    pub lang: Option<String>,
    /// RFC 3920 version, "1.0".
    pub version: Option<String>,
}

impl StreamHeader {
    /// The header a client sends to open (or restart) a stream to `domain`.
    pub(crate) fn client_to(domain: &str) -> StreamHeader {
        StreamHeader {
            to: Some(domain.to_owned()),
            version: Some("1.0".to_owned()),
            ..StreamHeader::default()
        }
    }

    /// Serialise the header, without a closing tag.
    pub(crate) fn to_wire(&self) -> String {
        let mut out = String::from("<stream:stream");
        xml::write_attribute(&mut out, "xmlns", ns::JABBER_CLIENT);
        xml::write_attribute(&mut out, "xmlns:stream", ns::STREAM);
        for (name, value) in [
            ("to", &self.to),
            ("from", &self.from),
            ("id", &self.id),
            ("xml:lang", &self.lang),
            ("version", &self.version),
        ] {
            if let Some(value) = value {
                xml::write_attribute(&mut out, name, value);
            }
        }
        out.push('>');
        out
    }
}

/// A `<stream:error>` received from the peer. Fatal to the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamError {
    /// Name of the defined-condition child element.
    pub condition: String,
    /// Optional descriptive text.
    pub text: Option<String>,
}

impl StreamError {
    pub(crate) fn parse(el: &Element) -> StreamError {
        let mut condition = String::new();
        let mut text = None;
        for child in el.children() {
            if child.is("text", ns::STREAMS) {
                text = Some(child.text());
            } else if condition.is_empty() {
                condition = child.name().to_owned();
            }
        }
        StreamError { condition, text }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.condition)?;
        if let Some(ref text) = self.text {
            write!(fmt, " ({})", text)?;
        }
        Ok(())
    }
}

/// The `<starttls/>` feature advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct StartTls {
    /// Whether the server requires TLS before anything else.
    pub required: bool,
}

/// Snapshot of the peer's `<stream:features/>`, replaced on every stream
/// restart.
#[derive(Debug, Clone, Default)]
pub struct StreamFeatures {
    /// TLS negotiation offer.
    pub starttls: Option<StartTls>,
    /// SASL mechanism names.
    pub mechanisms: Vec<String>,
    /// Whether resource binding is offered.
    pub bind: bool,
    /// Whether session establishment is offered.
    pub session: bool,
    /// Any other advertised features.
    pub others: Vec<Element>,
}

impl StreamFeatures {
    pub(crate) fn parse(el: &Element) -> StreamFeatures {
        let mut features = StreamFeatures::default();
        for child in el.children() {
            if child.is("starttls", ns::TLS) {
                features.starttls = Some(StartTls {
                    required: child.has_child("required", ns::TLS),
                });
            } else if child.is("mechanisms", ns::SASL) {
                features.mechanisms = child
                    .children()
                    .filter(|mech| mech.is("mechanism", ns::SASL))
                    .map(Element::text)
                    .collect();
            } else if child.is("bind", ns::BIND) {
                features.bind = true;
            } else if child.is("session", ns::SESSION) {
                features.session = true;
            } else {
                features.others.push(child.clone());
            }
        }
        features
    }

    /// Can TLS be started?
    pub fn can_starttls(&self) -> bool {
        self.starttls.is_some()
    }

    /// Is resource binding available?
    pub fn can_bind(&self) -> bool {
        self.bind
    }

    /// Is session establishment available?
    pub fn can_session(&self) -> bool {
        self.session
    }
}

/// Typed inbound values produced by the XML reader, one per complete
/// top-level child of the stream (plus the stream header and footer).
#[derive(Debug)]
pub(crate) enum XmlPacket {
    /// `<stream:stream>` opened by the peer.
    StreamStart(StreamHeader),
    /// `<stream:features/>`.
    Features(StreamFeatures),
    /// `<stream:error/>`.
    StreamError(StreamError),
    /// `<proceed/>` in the TLS namespace.
    TlsProceed,
    /// `<failure/>` in the TLS namespace.
    TlsFailure,
    /// `<challenge/>` with its base64 text.
    SaslChallenge(String),
    /// `<success/>`.
    SaslSuccess,
    /// `<failure/>` in the SASL namespace, with the condition name.
    SaslFailure(String),
    /// An application-level stanza.
    Stanza(Stanza),
    /// Anything else.
    Unknown(Element),
    /// `</stream:stream>` or end of input.
    StreamEnd,
}

/// Outbound values consumed by the XML writer.
#[derive(Debug)]
pub(crate) enum WirePacket {
    /// A (re)opened stream header; serialised unclosed.
    Header(StreamHeader),
    /// Any complete element.
    Element(Element),
}

/// Map a complete inbound element to its typed packet, per the dispatch
/// table of RFC 3920 client streams. Stanzas that fail to parse are logged
/// and dropped.
pub(crate) fn classify_element(el: Element) -> Option<XmlPacket> {
    let ns = el.ns();
    match (ns.as_str(), el.name()) {
        (ns::STREAM, "error") => Some(XmlPacket::StreamError(StreamError::parse(&el))),
        (ns::STREAM, "features") => Some(XmlPacket::Features(StreamFeatures::parse(&el))),
        (ns::TLS, "proceed") => Some(XmlPacket::TlsProceed),
        (ns::TLS, "failure") => Some(XmlPacket::TlsFailure),
        (ns::SASL, "challenge") => Some(XmlPacket::SaslChallenge(el.text())),
        (ns::SASL, "success") => Some(XmlPacket::SaslSuccess),
        (ns::SASL, "failure") => {
            let condition = el
                .children()
                .next()
                .map(|child| child.name().to_owned())
                .unwrap_or_default();
            Some(XmlPacket::SaslFailure(condition))
        }
        (ns::JABBER_CLIENT, "iq" | "message" | "presence") => match parse_stanza(&el) {
            Ok(stanza) => Some(XmlPacket::Stanza(stanza)),
            Err(e) => {
                log::warn!("unmarshal stanza: {}", e);
                None
            }
        },
        (other_ns, other_name) => {
            log::debug!("ignoring unrecognized: {} {}", other_ns, other_name);
            Some(XmlPacket::Unknown(el))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_header_serialisation() {
        let header = StreamHeader {
            to: Some("bob".to_owned()),
            ..StreamHeader::default()
        };
        assert_eq!(
            header.to_wire(),
            r#"<stream:stream xmlns="jabber:client" xmlns:stream="http://etherx.jabber.org/streams" to="bob">"#
        );

        let header = StreamHeader {
            to: Some("bob".to_owned()),
            from: Some("alice".to_owned()),
            id: Some("#3".to_owned()),
            version: Some("5.3".to_owned()),
            ..StreamHeader::default()
        };
        assert_eq!(
            header.to_wire(),
            r#"<stream:stream xmlns="jabber:client" xmlns:stream="http://etherx.jabber.org/streams" to="bob" from="alice" id="#3" version="5.3">"#
        );

        let header = StreamHeader {
            lang: Some("en_US".to_owned()),
            ..StreamHeader::default()
        };
        assert_eq!(
            header.to_wire(),
            r#"<stream:stream xmlns="jabber:client" xmlns:stream="http://etherx.jabber.org/streams" xml:lang="en_US">"#
        );
    }

    #[test]
    fn features_parse_all_four() {
        let el: Element = r#"<features xmlns="http://etherx.jabber.org/streams"><starttls xmlns="urn:ietf:params:xml:ns:xmpp-tls"><required/></starttls><mechanisms xmlns="urn:ietf:params:xml:ns:xmpp-sasl"><mechanism>DIGEST-MD5</mechanism><mechanism>PLAIN</mechanism></mechanisms><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"/><session xmlns="urn:ietf:params:xml:ns:xmpp-session"/></features>"#
            .parse()
            .unwrap();
        let features = StreamFeatures::parse(&el);
        assert_eq!(features.starttls, Some(StartTls { required: true }));
        assert_eq!(features.mechanisms, vec!["DIGEST-MD5", "PLAIN"]);
        assert!(features.can_bind());
        assert!(features.can_session());
    }

    #[test]
    fn stream_error_parse() {
        let el: Element = r#"<error xmlns="http://etherx.jabber.org/streams"><host-unknown xmlns="urn:ietf:params:xml:ns:xmpp-streams"/><text xmlns="urn:ietf:params:xml:ns:xmpp-streams">no such host</text></error>"#
            .parse()
            .unwrap();
        let error = StreamError::parse(&el);
        assert_eq!(error.condition, "host-unknown");
        assert_eq!(error.text.as_deref(), Some("no such host"));
    }
}
