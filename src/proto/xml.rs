//! Hand-written XML output.
//!
//! The stream header must be emitted without its closing tag and stanza
//! output must escape chardata exactly as the wire tests expect, so output
//! goes through this small serialiser instead of a generic writer.

use minidom::{Element, Node};

/// Append `value` to `out`, escaping the five XML special characters.
pub(crate) fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

/// Append ` name="value"` to `out`. Empty values are omitted entirely.
pub(crate) fn write_attribute(out: &mut String, name: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_into(out, value);
    out.push('"');
}

/// Serialise an element subtree. An `xmlns` attribute is emitted wherever
/// an element's namespace differs from the inherited one; attributes are
/// written in sorted order so output is deterministic.
pub(crate) fn write_element(out: &mut String, el: &Element, parent_ns: &str) {
    out.push('<');
    out.push_str(el.name());
    let ns = el.ns();
    if !ns.is_empty() && ns != parent_ns {
        write_attribute(out, "xmlns", &ns);
    }
    let mut attrs: Vec<(&str, &str)> = el.attrs().collect();
    attrs.sort_by_key(|&(name, _)| name);
    for (name, value) in attrs {
        write_attribute(out, name, value);
    }
    let mut nodes = el.nodes().peekable();
    if nodes.peek().is_none() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for node in nodes {
        match node {
            Node::Element(child) => write_element(out, child, &ns),
            Node::Text(text) => escape_into(out, text),
        }
    }
    out.push_str("</");
    out.push_str(el.name());
    out.push('>');
}

pub(crate) fn element_to_string(el: &Element, parent_ns: &str) -> String {
    let mut out = String::new();
    write_element(&mut out, el, parent_ns);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns;

    #[test]
    fn escapes_specials() {
        let mut out = String::new();
        escape_into(&mut out, r#"&<!-- ""#);
        assert_eq!(out, "&amp;&lt;!-- &#34;");
    }

    #[test]
    fn xmlns_only_on_namespace_change() {
        let el = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "set")
            .append(Element::builder("bind", ns::BIND).build())
            .build();
        assert_eq!(
            element_to_string(&el, ns::JABBER_CLIENT),
            r#"<iq type="set"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"/></iq>"#
        );
    }

    #[test]
    fn text_and_children_interleave() {
        let el = Element::builder("message", ns::JABBER_CLIENT)
            .append(
                Element::builder("body", ns::JABBER_CLIENT)
                    .append(Node::Text("a > b".to_owned()))
                    .build(),
            )
            .build();
        assert_eq!(
            element_to_string(&el, ns::JABBER_CLIENT),
            "<message><body>a &gt; b</body></message>"
        );
    }
}
