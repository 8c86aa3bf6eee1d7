use minidom::Element;

use crate::error::ProtocolError;
use crate::jid::Jid;
use crate::ns;

use super::{attr_string, child_text, parse_jid_attr, Nested, StanzaError};

/// Presence broadcast or subscription management stanza.
#[derive(Debug, Default)]
pub struct Presence {
    /// The sender.
    pub from: Option<Jid>,
    /// The recipient.
    pub to: Option<Jid>,
    /// Stanza id.
    pub id: Option<String>,
    /// unavailable, subscribe, … or absent for plain availability.
    pub type_: Option<String>,
    /// The `xml:lang` attribute.
    pub lang: Option<String>,
    /// Nested `<error/>`, if any.
    pub error: Option<StanzaError>,
    /// Availability sub-state (away, chat, dnd, xa).
    pub show: Option<String>,
    /// Free-form status text.
    pub status: Option<String>,
    /// Priority of this resource, -128..=127.
    pub priority: Option<i8>,
    /// Extension payload children.
    pub payloads: Vec<Element>,
    /// Typed extension payloads attached after parsing.
    pub nested: Vec<Nested>,
}

impl Presence {
    /// Plain available presence, `<presence/>`.
    pub fn available() -> Presence {
        Presence::default()
    }

    pub(crate) fn parse(el: &Element) -> Result<Presence, ProtocolError> {
        let priority = match child_text(el, "priority") {
            Some(text) => Some(
                text.parse::<i8>()
                    .map_err(|_| ProtocolError::BadAttribute("priority"))?,
            ),
            None => None,
        };
        let mut presence = Presence {
            from: parse_jid_attr(el, "from")?,
            to: parse_jid_attr(el, "to")?,
            id: attr_string(el, "id"),
            type_: attr_string(el, "type"),
            lang: attr_string(el, "xml:lang"),
            show: child_text(el, "show"),
            status: child_text(el, "status"),
            priority,
            ..Presence::default()
        };
        for child in el.children() {
            if child.is("error", ns::JABBER_CLIENT) {
                presence.error = Some(StanzaError::parse(child));
            } else if child.is("show", ns::JABBER_CLIENT)
                || child.is("status", ns::JABBER_CLIENT)
                || child.is("priority", ns::JABBER_CLIENT)
            {
                // already captured above
            } else {
                presence.payloads.push(child.clone());
            }
        }
        Ok(presence)
    }
}

impl From<Presence> for Element {
    fn from(presence: Presence) -> Element {
        let mut builder = Element::builder("presence", ns::JABBER_CLIENT);
        if let Some(ref to) = presence.to {
            builder = builder.attr("to", to.to_string());
        }
        if let Some(ref from) = presence.from {
            builder = builder.attr("from", from.to_string());
        }
        if let Some(ref id) = presence.id {
            builder = builder.attr("id", id.clone());
        }
        if let Some(ref type_) = presence.type_ {
            builder = builder.attr("type", type_.clone());
        }
        if let Some(ref lang) = presence.lang {
            builder = builder.attr("xml:lang", lang.clone());
        }
        for (name, value) in [("show", &presence.show), ("status", &presence.status)] {
            if let Some(value) = value {
                builder = builder.append(
                    Element::builder(name, ns::JABBER_CLIENT)
                        .append(minidom::Node::Text(value.clone()))
                        .build(),
                );
            }
        }
        if let Some(priority) = presence.priority {
            builder = builder.append(
                Element::builder("priority", ns::JABBER_CLIENT)
                    .append(minidom::Node::Text(priority.to_string()))
                    .build(),
            );
        }
        for payload in presence.payloads {
            builder = builder.append(payload);
        }
        if let Some(ref error) = presence.error {
            builder = builder.append(error.to_element());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_status_priority() {
        let el: Element = r#"<presence xmlns="jabber:client"><show>away</show><status>brb</status><priority>-1</priority></presence>"#
            .parse()
            .unwrap();
        let presence = Presence::parse(&el).unwrap();
        assert_eq!(presence.show.as_deref(), Some("away"));
        assert_eq!(presence.status.as_deref(), Some("brb"));
        assert_eq!(presence.priority, Some(-1));
    }

    #[test]
    fn bad_priority_is_rejected() {
        let el: Element = r#"<presence xmlns="jabber:client"><priority>high</priority></presence>"#
            .parse()
            .unwrap();
        assert!(Presence::parse(&el).is_err());
    }
}
