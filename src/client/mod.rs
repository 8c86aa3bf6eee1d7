//! XMPP client connection and state.

use std::collections::HashMap;

use minidom::Element;
use tokio::io::BufReader;
use tokio::sync::{mpsc, oneshot, watch};

use crate::connect::transport::{self, PumpCommand, Transport};
use crate::connect::ServerConfig;
use crate::error::Error;
use crate::extension::{Extension, ParseFn};
use crate::jid::Jid;
use crate::ns;
use crate::proto::{reader, writer, StreamFeatures, StreamHeader, WirePacket};
use crate::roster::{RosterCommand, RosterItem};
use crate::stanza::{Iq, Presence, Stanza};

mod filter;
mod gate;
mod id;

use filter::{HandlerRecord, StreamFilter};
use gate::GateControl;
use id::IdSequence;

/// An XMPP client connection.
///
/// [`Client::new`] returns as soon as the TCP connection is established;
/// stream negotiation proceeds asynchronously on the pipeline tasks, and
/// any send blocks until it has reached resource binding. Call
/// [`Client::start_session`] to wait for the stream to become ready.
pub struct Client {
    out: mpsc::Sender<Stanza>,
    inbound: mpsc::Receiver<Stanza>,
    ids: IdSequence,
    handlers: mpsc::Sender<HandlerRecord>,
    ready: Option<oneshot::Receiver<Result<(), Error>>>,
    gate: mpsc::Sender<GateControl>,
    pump: mpsc::Sender<PumpCommand>,
    features: watch::Receiver<Option<StreamFeatures>>,
    bound_jid: watch::Receiver<Jid>,
    extensions: Vec<Extension>,
    roster: Option<mpsc::Sender<RosterCommand>>,
}

impl Client {
    /// Connect to the server responsible for `jid`'s domain, discovered
    /// through an SRV lookup of `_xmpp-client._tcp`, and authenticate
    /// with `password`. SRV targets are tried in order until one dials.
    pub async fn new(
        jid: Jid,
        password: &str,
        extensions: Vec<Extension>,
    ) -> Result<Client, Error> {
        let config = ServerConfig::srv_default_client(jid.domain());
        Client::new_with_config(jid, password, extensions, config).await
    }

    /// Like [`Client::new`], with explicit server discovery.
    pub async fn new_with_config(
        jid: Jid,
        password: &str,
        extensions: Vec<Extension>,
        config: ServerConfig,
    ) -> Result<Client, Error> {
        let tcp = config.resolve().await?;
        log::debug!("connected to {}", config);

        let (xml_out_tx, xml_out_rx) = mpsc::channel(8);
        let (packet_tx, packet_rx) = mpsc::channel(8);
        let (handler_tx, handler_rx) = mpsc::channel(8);
        let (reader_tx, reader_rx) = mpsc::channel(1);
        let (pump_tx, pump_rx) = mpsc::channel(1);
        let (gate_tx, gate_rx) = mpsc::channel(1);
        let (out_tx, out_rx) = mpsc::channel(1);
        let (in_tx, in_rx) = mpsc::channel(8);
        let (features_tx, features_rx) = watch::channel(None);
        let (jid_tx, jid_rx) = watch::channel(jid.clone());
        let (ready_tx, ready_rx) = oneshot::channel();
        let ids = IdSequence::new();

        // In-memory byte pipes between the pump and the XML codec, one
        // per direction.
        let (pump_to_reader, reader_pipe) = tokio::io::duplex(8192);
        let (writer_pipe, pump_from_writer) = tokio::io::duplex(8192);

        tokio::spawn(transport::pump(
            Transport::Tcp(tcp),
            pump_to_reader,
            pump_from_writer,
            pump_rx,
        ));
        tokio::spawn(reader::run(
            BufReader::new(reader_pipe),
            reader_rx,
            packet_tx,
        ));
        tokio::spawn(writer::run(writer_pipe, xml_out_rx));

        let parse_map: HashMap<String, ParseFn> = extensions
            .iter()
            .map(|extension| (extension.namespace.to_owned(), extension.parse))
            .collect();
        let filter = StreamFilter::new(
            jid.clone(),
            password.to_owned(),
            parse_map,
            ids.clone(),
            xml_out_tx.clone(),
            pump_tx.clone(),
            reader_tx,
            gate_tx.clone(),
            in_tx,
            features_tx,
            jid_tx,
            ready_tx,
        );
        tokio::spawn(filter.run(packet_rx, handler_rx));
        tokio::spawn(gate::run(gate_rx, out_rx, xml_out_tx.clone()));

        // Initial handshake.
        xml_out_tx
            .send(WirePacket::Header(StreamHeader::client_to(jid.domain())))
            .await
            .map_err(|_| Error::Closed)?;

        Ok(Client {
            out: out_tx,
            inbound: in_rx,
            ids,
            handlers: handler_tx,
            ready: Some(ready_rx),
            gate: gate_tx,
            pump: pump_tx,
            features: features_rx,
            bound_jid: jid_rx,
            extensions,
            roster: None,
        })
    }

    /// Wait until resource binding completes, then establish a session
    /// (if requested and advertised), send the initial presence (if any),
    /// and run the extension start hooks.
    pub async fn start_session(
        &mut self,
        want_session: bool,
        initial_presence: Option<Presence>,
    ) -> Result<(), Error> {
        let ready = self.ready.take().ok_or(Error::BadState)?;
        ready.await.map_err(|_| Error::Closed)??;

        if want_session && self.features().is_some_and(|f| f.can_session()) {
            let id = self.next_id().await;
            let domain: Jid = self.jid().domain().parse()?;
            let iq = Iq::set(&id, Element::builder("session", ns::SESSION).build())
                .with_to(domain);
            let (result_tx, result_rx) = oneshot::channel();
            self.handle_stanza(&id, move |stanza| {
                let result = match stanza.error() {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                };
                let _ = result_tx.send(result);
                false
            })
            .await;
            self.send(iq).await?;
            result_rx
                .await
                .map_err(|_| Error::Closed)?
                .map_err(Error::Stanza)?;
        }

        if let Some(presence) = initial_presence {
            self.send(presence).await?;
        }

        let extensions = std::mem::take(&mut self.extensions);
        for extension in &extensions {
            (extension.start)(self).await?;
        }
        Ok(())
    }

    /// Receive the next stanza the server addressed to the application.
    /// Returns `None` once the connection has closed.
    pub async fn recv(&mut self) -> Option<Stanza> {
        self.inbound.recv().await
    }

    /// Send a stanza. Blocks until the outbound gate has opened, i.e.
    /// resource binding completed.
    pub async fn send(&self, stanza: impl Into<Stanza>) -> Result<(), Error> {
        self.out
            .send(stanza.into())
            .await
            .map_err(|_| Error::Closed)
    }

    /// A clonable handle on the outbound stanza channel.
    pub fn out(&self) -> mpsc::Sender<Stanza> {
        self.out.clone()
    }

    /// A fresh correlation id, unique within this connection.
    pub async fn next_id(&self) -> String {
        self.ids.next().await
    }

    /// Register a one-shot callback for the next stanza carrying `id`.
    ///
    /// The callback runs on the stream filter task and must not block on
    /// the inbound channel. Returning `false` consumes the stanza;
    /// returning `true` also delivers it to the application.
    pub async fn handle_stanza(
        &self,
        id: &str,
        callback: impl FnOnce(&Stanza) -> bool + Send + Sync + 'static,
    ) {
        let record = HandlerRecord {
            id: id.to_owned(),
            callback: Box::new(callback),
        };
        if self.handlers.send(record).await.is_err() {
            log::warn!("stanza handler registered after stream closure");
        }
    }

    /// Insert a middleware stage into the inbound pipeline. Returns the
    /// upstream receiver (stanzas flowing from the server) and the
    /// downstream sender (toward the application); the caller bridges
    /// them, typically from a spawned task.
    pub fn add_filter(&mut self) -> (mpsc::Receiver<Stanza>, mpsc::Sender<Stanza>) {
        let (downstream_tx, downstream_rx) = mpsc::channel(8);
        let upstream = std::mem::replace(&mut self.inbound, downstream_rx);
        (upstream, downstream_tx)
    }

    /// This client's JID. Replaced by the server-assigned full JID once
    /// resource binding completes.
    pub fn jid(&self) -> Jid {
        self.bound_jid.borrow().clone()
    }

    /// The features the server advertised on the current stream, if any
    /// arrived yet. Replaced on every stream restart.
    pub fn features(&self) -> Option<StreamFeatures> {
        self.features.borrow().clone()
    }

    /// An immutable snapshot of the roster cache. Empty unless the roster
    /// extension is installed and the session started.
    pub async fn roster(&self) -> HashMap<Jid, RosterItem> {
        let Some(ref roster) = self.roster else {
            return HashMap::new();
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if roster
            .send(RosterCommand::Snapshot(reply_tx))
            .await
            .is_err()
        {
            return HashMap::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub(crate) fn set_roster_channel(&mut self, channel: mpsc::Sender<RosterCommand>) {
        self.roster = Some(channel);
    }

    /// Close the connection, best-effort. Dropping the client has the
    /// same effect through channel closure.
    pub async fn close(self) {
        let _ = self.gate.send(GateControl::Stop).await;
        let _ = self.pump.send(PumpCommand::Shutdown).await;
    }
}
