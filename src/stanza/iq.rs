use minidom::Element;

use crate::error::ProtocolError;
use crate::jid::Jid;
use crate::ns;

use super::{attr_string, parse_jid_attr, Nested, StanzaError};

/// The `type` attribute of an iq stanza; mandatory per RFC 3920.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    /// Request for information.
    Get,
    /// Request changing state.
    Set,
    /// Successful response.
    Result,
    /// Error response.
    Error,
}

impl IqType {
    /// The attribute text value.
    pub fn as_str(&self) -> &'static str {
        match self {
            IqType::Get => "get",
            IqType::Set => "set",
            IqType::Result => "result",
            IqType::Error => "error",
        }
    }

    fn parse(s: &str) -> Result<IqType, ProtocolError> {
        match s {
            "get" => Ok(IqType::Get),
            "set" => Ok(IqType::Set),
            "result" => Ok(IqType::Result),
            "error" => Ok(IqType::Error),
            _ => Err(ProtocolError::BadAttribute("type")),
        }
    }
}

/// Request/response stanza with mandatory id and type.
#[derive(Debug)]
pub struct Iq {
    /// The sender.
    pub from: Option<Jid>,
    /// The recipient.
    pub to: Option<Jid>,
    /// Correlation id.
    pub id: Option<String>,
    /// get, set, result or error.
    pub type_: IqType,
    /// The `xml:lang` attribute.
    pub lang: Option<String>,
    /// Nested `<error/>`, if any.
    pub error: Option<StanzaError>,
    /// Extension payload children.
    pub payloads: Vec<Element>,
    /// Typed extension payloads attached after parsing.
    pub nested: Vec<Nested>,
}

impl Iq {
    fn empty(type_: IqType, id: &str) -> Iq {
        Iq {
            from: None,
            to: None,
            id: Some(id.to_owned()),
            type_,
            lang: None,
            error: None,
            payloads: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// A get request carrying `payload`.
    pub fn get(id: &str, payload: Element) -> Iq {
        let mut iq = Iq::empty(IqType::Get, id);
        iq.payloads.push(payload);
        iq
    }

    /// A set request carrying `payload`.
    pub fn set(id: &str, payload: Element) -> Iq {
        let mut iq = Iq::empty(IqType::Set, id);
        iq.payloads.push(payload);
        iq
    }

    /// An empty result acknowledging the request with the same id.
    pub fn result(id: &str) -> Iq {
        Iq::empty(IqType::Result, id)
    }

    /// Set the recipient.
    pub fn with_to(mut self, to: Jid) -> Iq {
        self.to = Some(to);
        self
    }

    /// The first payload child matching `name` in `namespace`.
    pub fn payload(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.payloads.iter().find(|el| el.is(name, namespace))
    }

    pub(crate) fn parse(el: &Element) -> Result<Iq, ProtocolError> {
        let type_ = match el.attr("type") {
            Some(value) => IqType::parse(value)?,
            None => return Err(ProtocolError::BadAttribute("type")),
        };
        let mut iq = Iq {
            from: parse_jid_attr(el, "from")?,
            to: parse_jid_attr(el, "to")?,
            id: attr_string(el, "id"),
            type_,
            lang: attr_string(el, "xml:lang"),
            error: None,
            payloads: Vec::new(),
            nested: Vec::new(),
        };
        for child in el.children() {
            if child.is("error", ns::JABBER_CLIENT) {
                iq.error = Some(StanzaError::parse(child));
            } else {
                iq.payloads.push(child.clone());
            }
        }
        Ok(iq)
    }
}

impl From<Iq> for Element {
    fn from(iq: Iq) -> Element {
        let mut builder = Element::builder("iq", ns::JABBER_CLIENT);
        if let Some(ref to) = iq.to {
            builder = builder.attr("to", to.to_string());
        }
        if let Some(ref from) = iq.from {
            builder = builder.attr("from", from.to_string());
        }
        if let Some(ref id) = iq.id {
            builder = builder.attr("id", id.clone());
        }
        builder = builder.attr("type", iq.type_.as_str());
        if let Some(ref lang) = iq.lang {
            builder = builder.attr("xml:lang", lang.clone());
        }
        for payload in iq.payloads {
            builder = builder.append(payload);
        }
        if let Some(ref error) = iq.error {
            builder = builder.append(error.to_element());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_is_mandatory() {
        let el: Element = r#"<iq xmlns="jabber:client" id="x"/>"#.parse().unwrap();
        assert!(matches!(
            Iq::parse(&el),
            Err(ProtocolError::BadAttribute("type"))
        ));
    }

    #[test]
    fn payload_lookup() {
        let el: Element = r#"<iq xmlns="jabber:client" type="result" id="x"><query xmlns="jabber:iq:roster"/></iq>"#
            .parse()
            .unwrap();
        let iq = Iq::parse(&el).unwrap();
        assert!(iq.payload("query", ns::ROSTER).is_some());
        assert!(iq.payload("query", ns::BIND).is_none());
    }
}
