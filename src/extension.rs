//! The extension hook.
//!
//! Extensions are configured before a client is created and are immutable
//! afterwards. Each entry maps a payload namespace to a constructor for
//! its typed value, plus a hook that runs once per client at session
//! start. The roster module is the canonical user.

use std::future::Future;
use std::pin::Pin;

use minidom::Element;

use crate::client::Client;
use crate::error::Error;
use crate::stanza::Nested;

/// Constructor turning a payload element in the registered namespace into
/// a typed value, invoked on the stream filter task.
pub type ParseFn = fn(&Element) -> Result<Nested, Error>;

/// Hook run once per client from `start_session`, after the stream is
/// ready.
pub type StartFn =
    for<'a> fn(&'a mut Client) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// One registry entry of the extension hook.
#[derive(Clone, Copy)]
pub struct Extension {
    /// Namespace of the payload children this extension handles.
    pub namespace: &'static str,
    /// Payload constructor.
    pub parse: ParseFn,
    /// Session-start hook.
    pub start: StartFn,
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Extension")
            .field("namespace", &self.namespace)
            .finish()
    }
}
