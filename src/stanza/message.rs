use minidom::Element;

use crate::error::ProtocolError;
use crate::jid::Jid;
use crate::ns;

use super::{attr_string, child_text, parse_jid_attr, Nested, StanzaError};

/// One-directional message stanza.
#[derive(Debug, Default)]
pub struct Message {
    /// The sender.
    pub from: Option<Jid>,
    /// The recipient.
    pub to: Option<Jid>,
    /// Stanza id.
    pub id: Option<String>,
    /// chat, groupchat, headline, normal or error.
    pub type_: Option<String>,
    /// The `xml:lang` attribute.
    pub lang: Option<String>,
    /// Nested `<error/>`, if any.
    pub error: Option<StanzaError>,
    /// Message subject.
    pub subject: Option<String>,
    /// Message body.
    pub body: Option<String>,
    /// Conversation thread.
    pub thread: Option<String>,
    /// Extension payload children.
    pub payloads: Vec<Element>,
    /// Typed extension payloads attached after parsing.
    pub nested: Vec<Nested>,
}

impl Message {
    /// A chat message with a body, ready to address.
    pub fn chat(to: Jid, body: &str) -> Message {
        Message {
            to: Some(to),
            type_: Some("chat".to_owned()),
            body: Some(body.to_owned()),
            ..Message::default()
        }
    }

    pub(crate) fn parse(el: &Element) -> Result<Message, ProtocolError> {
        let mut message = Message {
            from: parse_jid_attr(el, "from")?,
            to: parse_jid_attr(el, "to")?,
            id: attr_string(el, "id"),
            type_: attr_string(el, "type"),
            lang: attr_string(el, "xml:lang"),
            subject: child_text(el, "subject"),
            body: child_text(el, "body"),
            thread: child_text(el, "thread"),
            ..Message::default()
        };
        for child in el.children() {
            if child.is("error", ns::JABBER_CLIENT) {
                message.error = Some(StanzaError::parse(child));
            } else if child.is("subject", ns::JABBER_CLIENT)
                || child.is("body", ns::JABBER_CLIENT)
                || child.is("thread", ns::JABBER_CLIENT)
            {
                // already captured above
            } else {
                message.payloads.push(child.clone());
            }
        }
        Ok(message)
    }
}

impl From<Message> for Element {
    fn from(message: Message) -> Element {
        let mut builder = Element::builder("message", ns::JABBER_CLIENT);
        if let Some(ref to) = message.to {
            builder = builder.attr("to", to.to_string());
        }
        if let Some(ref from) = message.from {
            builder = builder.attr("from", from.to_string());
        }
        if let Some(ref id) = message.id {
            builder = builder.attr("id", id.clone());
        }
        if let Some(ref type_) = message.type_ {
            builder = builder.attr("type", type_.clone());
        }
        if let Some(ref lang) = message.lang {
            builder = builder.attr("xml:lang", lang.clone());
        }
        for (name, value) in [
            ("subject", &message.subject),
            ("body", &message.body),
            ("thread", &message.thread),
        ] {
            if let Some(value) = value {
                builder = builder.append(
                    Element::builder(name, ns::JABBER_CLIENT)
                        .append(minidom::Node::Text(value.clone()))
                        .build(),
                );
            }
        }
        for payload in message.payloads {
            builder = builder.append(payload);
        }
        if let Some(ref error) = message.error {
            builder = builder.append(error.to_element());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_and_foreign_payload_are_split() {
        let el: Element = r#"<message xmlns="jabber:client"><body>hi</body><x xmlns="jabber:x:event"/></message>"#
            .parse()
            .unwrap();
        let message = Message::parse(&el).unwrap();
        assert_eq!(message.body.as_deref(), Some("hi"));
        assert_eq!(message.payloads.len(), 1);
        assert_eq!(message.payloads[0].name(), "x");
    }
}
