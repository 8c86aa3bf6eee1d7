//! The three core XMPP stanza types: iq, message, presence. See
//! RFC 3920, section 9.

use std::any::Any;
use std::fmt;

use minidom::Element;

use crate::error::ProtocolError;
use crate::jid::Jid;
use crate::ns;

mod iq;
mod message;
mod presence;

pub use iq::{Iq, IqType};
pub use message::Message;
pub use presence::Presence;

/// A typed extension payload attached to a stanza after parsing.
///
/// Extensions register a constructor per namespace; the resulting values
/// are carried here and recovered with [`Nested::downcast_ref`].
pub struct Nested(Box<dyn Any + Send + Sync>);

impl Nested {
    /// Wrap a typed extension payload.
    pub fn new<T: Any + Send + Sync>(value: T) -> Nested {
        Nested(Box::new(value))
    }

    /// Recover the typed payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Nested {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Nested(..)")
    }
}

/// An XMPP stanza error. See RFC 3920, section 9.3.
///
/// This is the single `<error/>` child of a stanza, distinct from stream
/// errors.
#[derive(Debug, Clone, PartialEq)]
pub struct StanzaError {
    /// The error type attribute (`cancel`, `modify`, …).
    pub type_: String,
    /// The nested defined-condition element, if present.
    pub condition: Option<Element>,
}

impl StanzaError {
    pub(crate) fn parse(el: &Element) -> StanzaError {
        StanzaError {
            type_: el.attr("type").unwrap_or_default().to_owned(),
            condition: el.children().next().cloned(),
        }
    }

    pub(crate) fn to_element(&self) -> Element {
        let mut builder = Element::builder("error", ns::JABBER_CLIENT);
        if !self.type_.is_empty() {
            builder = builder.attr("type", self.type_.clone());
        }
        if let Some(ref condition) = self.condition {
            builder = builder.append(condition.clone());
        }
        builder.build()
    }
}

impl fmt::Display for StanzaError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "type={}", self.type_)?;
        if let Some(ref condition) = self.condition {
            write!(fmt, " condition={}", condition.name())?;
        }
        Ok(())
    }
}

impl std::error::Error for StanzaError {}

/// One of the three stanza variants.
#[derive(Debug)]
pub enum Stanza {
    /// Request/response stanza.
    Iq(Iq),
    /// One-directional message.
    Message(Message),
    /// Presence broadcast or subscription management.
    Presence(Presence),
}

impl Stanza {
    /// The element name: "iq", "message" or "presence".
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Iq(_) => "iq",
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
        }
    }

    /// The `to` attribute.
    pub fn to(&self) -> Option<&Jid> {
        match self {
            Stanza::Iq(iq) => iq.to.as_ref(),
            Stanza::Message(m) => m.to.as_ref(),
            Stanza::Presence(p) => p.to.as_ref(),
        }
    }

    /// The `from` attribute.
    pub fn from(&self) -> Option<&Jid> {
        match self {
            Stanza::Iq(iq) => iq.from.as_ref(),
            Stanza::Message(m) => m.from.as_ref(),
            Stanza::Presence(p) => p.from.as_ref(),
        }
    }

    /// The `id` attribute.
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Iq(iq) => iq.id.as_deref(),
            Stanza::Message(m) => m.id.as_deref(),
            Stanza::Presence(p) => p.id.as_deref(),
        }
    }

    /// The `type` attribute, as its text value.
    pub fn type_str(&self) -> Option<&str> {
        match self {
            Stanza::Iq(iq) => Some(iq.type_.as_str()),
            Stanza::Message(m) => m.type_.as_deref(),
            Stanza::Presence(p) => p.type_.as_deref(),
        }
    }

    /// The `xml:lang` attribute.
    pub fn lang(&self) -> Option<&str> {
        match self {
            Stanza::Iq(iq) => iq.lang.as_deref(),
            Stanza::Message(m) => m.lang.as_deref(),
            Stanza::Presence(p) => p.lang.as_deref(),
        }
    }

    /// The nested `<error/>` child, if any.
    pub fn error(&self) -> Option<&StanzaError> {
        match self {
            Stanza::Iq(iq) => iq.error.as_ref(),
            Stanza::Message(m) => m.error.as_ref(),
            Stanza::Presence(p) => p.error.as_ref(),
        }
    }

    /// Whether this is an error stanza.
    pub fn is_error(&self) -> bool {
        match self {
            Stanza::Iq(iq) => iq.type_ == IqType::Error,
            _ => self.type_str() == Some("error"),
        }
    }

    /// Raw extension children, in namespaces this crate does not model.
    pub fn payloads(&self) -> &[Element] {
        match self {
            Stanza::Iq(iq) => &iq.payloads,
            Stanza::Message(m) => &m.payloads,
            Stanza::Presence(p) => &p.payloads,
        }
    }

    /// Typed extension payloads attached by the extension hook.
    pub fn nested(&self) -> &[Nested] {
        match self {
            Stanza::Iq(iq) => &iq.nested,
            Stanza::Message(m) => &m.nested,
            Stanza::Presence(p) => &p.nested,
        }
    }

    pub(crate) fn add_nested(&mut self, nested: Nested) {
        match self {
            Stanza::Iq(iq) => iq.nested.push(nested),
            Stanza::Message(m) => m.nested.push(nested),
            Stanza::Presence(p) => p.nested.push(nested),
        }
    }
}

impl From<Stanza> for Element {
    fn from(stanza: Stanza) -> Element {
        match stanza {
            Stanza::Iq(iq) => iq.into(),
            Stanza::Message(m) => m.into(),
            Stanza::Presence(p) => p.into(),
        }
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Stanza {
        Stanza::Iq(iq)
    }
}

impl From<Message> for Stanza {
    fn from(m: Message) -> Stanza {
        Stanza::Message(m)
    }
}

impl From<Presence> for Stanza {
    fn from(p: Presence) -> Stanza {
        Stanza::Presence(p)
    }
}

/// Parse a stanza element into an [`Iq`], [`Message`] or [`Presence`],
/// dispatching on the root element name.
pub fn parse_stanza(el: &Element) -> Result<Stanza, ProtocolError> {
    match el.name() {
        "iq" => Ok(Stanza::Iq(Iq::parse(el)?)),
        "message" => Ok(Stanza::Message(Message::parse(el)?)),
        "presence" => Ok(Stanza::Presence(Presence::parse(el)?)),
        other => Err(ProtocolError::UnknownElement(other.to_owned())),
    }
}

pub(crate) fn parse_jid_attr(
    el: &Element,
    name: &'static str,
) -> Result<Option<Jid>, ProtocolError> {
    match el.attr(name) {
        Some(value) => Ok(Some(value.parse()?)),
        None => Ok(None),
    }
}

pub(crate) fn attr_string(el: &Element, name: &str) -> Option<String> {
    el.attr(name).map(str::to_owned)
}

pub(crate) fn child_text(el: &Element, name: &str) -> Option<String> {
    el.get_child(name, ns::JABBER_CLIENT).map(Element::text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::xml::element_to_string;

    fn parse_element(s: &str) -> Element {
        s.parse().expect("malformed test XML")
    }

    #[test]
    fn dispatches_on_root_name() {
        let iq = parse_element(r#"<iq xmlns="jabber:client" type="get" id="a"/>"#);
        assert!(matches!(parse_stanza(&iq), Ok(Stanza::Iq(_))));

        let message = parse_element(r#"<message xmlns="jabber:client"/>"#);
        assert!(matches!(parse_stanza(&message), Ok(Stanza::Message(_))));

        let presence = parse_element(r#"<presence xmlns="jabber:client"/>"#);
        assert!(matches!(parse_stanza(&presence), Ok(Stanza::Presence(_))));
    }

    #[test]
    fn unknown_root_is_an_error() {
        let el = parse_element(r#"<bogus xmlns="jabber:client"/>"#);
        match parse_stanza(&el) {
            Err(ProtocolError::UnknownElement(name)) => assert_eq!(name, "bogus"),
            other => panic!("expected UnknownElement, got {:?}", other),
        }
    }

    #[test]
    fn iq_marshal_with_payload() {
        let iq = Iq::set(
            "3",
            Element::builder("bind", crate::ns::BIND).build(),
        );
        let el: Element = Stanza::Iq(iq).into();
        assert_eq!(
            element_to_string(&el, crate::ns::JABBER_CLIENT),
            r#"<iq id="3" type="set"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"/></iq>"#
        );
    }

    #[test]
    fn chardata_is_escaped() {
        let message = Message {
            body: Some(r#"&<!-- ""#.to_owned()),
            ..Message::default()
        };
        let el: Element = Stanza::Message(message).into();
        assert_eq!(
            element_to_string(&el, crate::ns::JABBER_CLIENT),
            "<message><body>&amp;&lt;!-- &#34;</body></message>"
        );
    }

    #[test]
    fn error_child_is_detected() {
        let el = parse_element(
            r#"<iq xmlns="jabber:client" type="error" id="x"><error type="cancel"><feature-not-implemented xmlns="urn:ietf:params:xml:ns:xmpp-stanzas"/></error></iq>"#,
        );
        let stanza = parse_stanza(&el).unwrap();
        assert!(stanza.is_error());
        let error = stanza.error().unwrap();
        assert_eq!(error.type_, "cancel");
        assert_eq!(
            error.condition.as_ref().unwrap().name(),
            "feature-not-implemented"
        );
    }

    #[test]
    fn attributes_survive_round_trip() {
        let el = parse_element(
            r#"<message xmlns="jabber:client" from="a@b" to="c@d" id="m1" type="chat" xml:lang="en"><body>hi</body></message>"#,
        );
        let stanza = parse_stanza(&el).unwrap();
        assert_eq!(stanza.from().unwrap().to_string(), "a@b");
        assert_eq!(stanza.to().unwrap().to_string(), "c@d");
        assert_eq!(stanza.id(), Some("m1"));
        assert_eq!(stanza.type_str(), Some("chat"));
        assert_eq!(stanza.lang(), Some("en"));

        let out: Element = stanza.into();
        assert_eq!(
            element_to_string(&out, crate::ns::JABBER_CLIENT),
            r#"<message from="a@b" id="m1" to="c@d" type="chat" xml:lang="en"><body>hi</body></message>"#
        );
    }
}
