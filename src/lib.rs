//! A client-side implementation of the XMPP instant-messaging protocol
//! (RFC [3920](https://www.rfc-editor.org/rfc/rfc3920) and
//! [3921](https://www.rfc-editor.org/rfc/rfc3921)) with asynchronous I/O
//! using [tokio](https://tokio.rs/).
//!
//! The crate covers the stream negotiation state machine and the
//! concurrent pipeline carrying stanzas between the application and the
//! network: TCP connect over SRV discovery, in-band upgrade to TLS, SASL
//! DIGEST-MD5 authentication, resource binding, session establishment,
//! and stanza dispatch with correlation by id. Payloads in registered
//! namespaces are re-parsed into typed values through the extension hook;
//! the [`roster`] module is the canonical extension.
//!
//! # Getting started
//!
//! ```no_run
//! use tokio_jabber::{Client, Jid, Presence};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tokio_jabber::Error> {
//!     let jid: Jid = "romeo@example.net/orchard".parse()?;
//!     let mut client = Client::new(jid, "secret", vec![tokio_jabber::roster::extension()]).await?;
//!     client.start_session(true, Some(Presence::available())).await?;
//!     while let Some(stanza) = client.recv().await {
//!         println!("<< {:?}", stanza);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

pub use minidom;

mod client;
pub mod connect;
pub mod error;
mod extension;
pub mod jid;
pub mod ns;
mod proto;
pub mod roster;
mod sasl;
mod stanza;

pub use client::Client;
pub use connect::ServerConfig;
pub use error::Error;
pub use extension::{Extension, ParseFn, StartFn};
pub use jid::Jid;
pub use proto::{StartTls, StreamError, StreamFeatures, StreamHeader};
pub use stanza::{parse_stanza, Iq, IqType, Message, Nested, Presence, Stanza, StanzaError};
