//! Jabber-Id handling
//!
//! A JID looks like `node@domain/resource`; node and resource are optional.
//! Parsing follows the grammar `(node "@")? domain ("/" resource)?` where
//! none of the three parts may be empty or contain `@` or `/`.

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

/// Error returned when a string cannot be parsed as a JID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error(String);

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "can not parse as JID: {}", self.0)
    }
}

impl StdError for Error {}

/// An entity that can communicate with other entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Build a JID from its parts. `node` and `resource` may be empty
    /// strings, which count as absent.
    pub fn new(node: &str, domain: &str, resource: &str) -> Result<Jid, Error> {
        let mut text = String::new();
        if !node.is_empty() {
            text.push_str(node);
            text.push('@');
        }
        text.push_str(domain);
        if !resource.is_empty() {
            text.push('/');
            text.push_str(resource);
        }
        text.parse()
    }

    /// The part before `@`, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The mandatory domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The part after `/`, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The same JID without its resource.
    pub fn to_bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }
}

fn valid_part(s: &str) -> bool {
    !s.is_empty() && !s.contains('@') && !s.contains('/')
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Jid, Error> {
        let err = || Error(s.to_owned());

        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) => (bare, Some(resource)),
            None => (s, None),
        };
        let (node, domain) = match bare.split_once('@') {
            Some((node, domain)) => (Some(node), domain),
            None => (None, bare),
        };

        if !valid_part(domain) {
            return Err(err());
        }
        if let Some(node) = node {
            if !valid_part(node) {
                return Err(err());
            }
        }
        if let Some(resource) = resource {
            if !valid_part(resource) {
                return Err(err());
            }
        }

        Ok(Jid {
            node: node.map(str::to_owned),
            domain: domain.to_owned(),
            resource: resource.map(str::to_owned),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref node) = self.node {
            write!(fmt, "{}@", node)?;
        }
        write!(fmt, "{}", self.domain)?;
        if let Some(ref resource) = self.resource {
            write!(fmt, "/{}", resource)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_jid() {
        let jid: Jid = "user@domain/res".parse().unwrap();
        assert_eq!(jid.node(), Some("user"));
        assert_eq!(jid.domain(), "domain");
        assert_eq!(jid.resource(), Some("res"));
        assert_eq!(jid.to_string(), "user@domain/res");
    }

    #[test]
    fn domain_only() {
        let jid: Jid = "domain.tld".parse().unwrap();
        assert_eq!(jid.node(), None);
        assert_eq!(jid.domain(), "domain.tld");
        assert_eq!(jid.resource(), None);
        assert_eq!(jid.to_string(), "domain.tld");
    }

    #[test]
    fn round_trips() {
        for s in ["user@domain/res", "domain.tld", "domain/res", "user@domain"] {
            let jid: Jid = s.parse().unwrap();
            assert_eq!(jid.to_string(), s);
        }
    }

    #[test]
    fn rejects_malformed() {
        for s in ["", "@domain", "user@", "domain/", "/res", "a@b@c", "a@b/c/d", "a@b/c@d"] {
            assert!(s.parse::<Jid>().is_err(), "{:?} should not parse", s);
        }
    }

    #[test]
    fn bare() {
        let jid: Jid = "user@domain/res".parse().unwrap();
        assert_eq!(jid.to_bare().to_string(), "user@domain");
    }
}
