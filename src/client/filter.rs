//! The stream filter: a single task that advances the negotiation state
//! machine, owns the handler registry, and forwards application stanzas
//! inward once correlation has had its chance.

use std::collections::HashMap;

use minidom::Element;
use tokio::sync::{mpsc, oneshot, watch};

use crate::connect::transport::PumpCommand;
use crate::error::{AuthError, Error, ProtocolError};
use crate::extension::ParseFn;
use crate::jid::Jid;
use crate::ns;
use crate::proto::reader::ReaderControl;
use crate::proto::{StreamFeatures, StreamHeader, WirePacket, XmlPacket};
use crate::sasl;
use crate::stanza::{Iq, Stanza};

use super::gate::GateControl;
use super::id::IdSequence;

/// One-shot callback for a stanza with a particular id. Returning `false`
/// means the stanza was consumed and is not delivered to the application.
pub(crate) type Handler = Box<dyn FnOnce(&Stanza) -> bool + Send + Sync>;

/// A registration sent over the handlers channel.
pub(crate) struct HandlerRecord {
    pub(crate) id: String,
    pub(crate) callback: Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Header sent, waiting for `<stream:features/>`.
    WaitFeatures,
    /// `<starttls/>` sent, waiting for `<proceed/>`.
    StartTlsRequested,
    /// `<auth/>` sent, running challenge rounds.
    Sasl,
    /// Bind iq sent, waiting for its result.
    Bind,
    /// Negotiation complete.
    Ready,
}

pub(crate) struct StreamFilter {
    jid: Jid,
    password: String,
    extensions: HashMap<String, ParseFn>,
    ids: IdSequence,
    xml_out: mpsc::Sender<WirePacket>,
    pump: mpsc::Sender<PumpCommand>,
    reader: mpsc::Sender<ReaderControl>,
    gate: mpsc::Sender<GateControl>,
    inbound: mpsc::Sender<Stanza>,
    features: watch::Sender<Option<StreamFeatures>>,
    bound_jid: watch::Sender<Jid>,
    ready: Option<oneshot::Sender<Result<(), Error>>>,
    state: StreamState,
    handlers: HashMap<String, Handler>,
    sasl_expected: Option<String>,
    tls_done: bool,
    auth_done: bool,
    bind_id: Option<String>,
}

impl StreamFilter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        jid: Jid,
        password: String,
        extensions: HashMap<String, ParseFn>,
        ids: IdSequence,
        xml_out: mpsc::Sender<WirePacket>,
        pump: mpsc::Sender<PumpCommand>,
        reader: mpsc::Sender<ReaderControl>,
        gate: mpsc::Sender<GateControl>,
        inbound: mpsc::Sender<Stanza>,
        features: watch::Sender<Option<StreamFeatures>>,
        bound_jid: watch::Sender<Jid>,
        ready: oneshot::Sender<Result<(), Error>>,
    ) -> StreamFilter {
        StreamFilter {
            jid,
            password,
            extensions,
            ids,
            xml_out,
            pump,
            reader,
            gate,
            inbound,
            features,
            bound_jid,
            ready: Some(ready),
            state: StreamState::WaitFeatures,
            handlers: HashMap::new(),
            sasl_expected: None,
            tls_done: false,
            auth_done: false,
            bind_id: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut packets: mpsc::Receiver<XmlPacket>,
        mut registrations: mpsc::Receiver<HandlerRecord>,
    ) {
        loop {
            tokio::select! {
                registration = registrations.recv() => match registration {
                    Some(registration) => {
                        self.handlers.insert(registration.id, registration.callback);
                    }
                    None => break,
                },
                packet = packets.recv() => {
                    let Some(packet) = packet else {
                        self.fail(Error::Closed);
                        break;
                    };
                    if let Err(e) = self.handle_packet(packet).await {
                        self.fail(e);
                        break;
                    }
                }
            }
        }
    }

    async fn handle_packet(&mut self, packet: XmlPacket) -> Result<(), Error> {
        match packet {
            XmlPacket::StreamStart(header) => {
                log::debug!("stream opened, id={:?}", header.id);
                Ok(())
            }
            XmlPacket::Features(features) => self.handle_features(features).await,
            XmlPacket::StreamError(error) => {
                log::error!("stream error: {}", error);
                Err(ProtocolError::Stream(error).into())
            }
            XmlPacket::TlsProceed => self.handle_proceed().await,
            XmlPacket::TlsFailure => Err(ProtocolError::TlsRefused.into()),
            XmlPacket::SaslChallenge(data) => self.handle_challenge(&data).await,
            XmlPacket::SaslSuccess => {
                log::debug!("SASL authentication succeeded");
                self.auth_done = true;
                self.sasl_expected = None;
                self.restart_stream().await
            }
            XmlPacket::SaslFailure(condition) => {
                log::error!("SASL authentication failed");
                Err(AuthError::Fail(condition).into())
            }
            XmlPacket::Stanza(stanza) => self.handle_stanza(stanza).await,
            XmlPacket::Unknown(el) => {
                log::debug!("unhandled non-stanza: {}", el.name());
                Ok(())
            }
            XmlPacket::StreamEnd => Err(Error::Closed),
        }
    }

    /// React to a features advertisement. When several are offered at
    /// once: TLS first, then SASL, then bind.
    async fn handle_features(&mut self, features: StreamFeatures) -> Result<(), Error> {
        let advertised = features.clone();
        self.features.send_replace(Some(features));

        if advertised.can_starttls() && !self.tls_done {
            self.send_element(Element::builder("starttls", ns::TLS).build())
                .await?;
            self.state = StreamState::StartTlsRequested;
            Ok(())
        } else if !advertised.mechanisms.is_empty() && !self.auth_done {
            self.choose_sasl(&advertised).await
        } else if advertised.can_bind() {
            self.start_bind().await
        } else {
            log::warn!("no usable stream features advertised");
            Ok(())
        }
    }

    async fn choose_sasl(&mut self, features: &StreamFeatures) -> Result<(), Error> {
        let digest_md5 = features
            .mechanisms
            .iter()
            .any(|mechanism| mechanism.eq_ignore_ascii_case("DIGEST-MD5"));
        if !digest_md5 {
            return Err(AuthError::NoMechanism.into());
        }
        self.send_element(
            Element::builder("auth", ns::SASL)
                .attr("mechanism", "DIGEST-MD5")
                .build(),
        )
        .await?;
        self.state = StreamState::Sasl;
        Ok(())
    }

    async fn handle_proceed(&mut self) -> Result<(), Error> {
        if self.state != StreamState::StartTlsRequested {
            return Err(Error::BadState);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.pump
            .send(PumpCommand::StartTls {
                domain: self.jid.domain().to_owned(),
                done: done_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        done_rx.await.map_err(|_| Error::Closed)??;
        self.tls_done = true;
        self.restart_stream().await
    }

    async fn handle_challenge(&mut self, data: &str) -> Result<(), Error> {
        let challenge = sasl::decode_challenge(data)?;
        match self.sasl_expected.take() {
            None => {
                let response =
                    sasl::digest_md5::respond(&self.jid, &self.password, &challenge)?;
                self.sasl_expected = Some(response.expected_rspauth);
                self.send_element(
                    Element::builder("response", ns::SASL)
                        .append(minidom::Node::Text(response.data))
                        .build(),
                )
                .await
            }
            Some(expected) => {
                if challenge.get("rspauth").map(String::as_str) == Some(expected.as_str()) {
                    self.send_element(Element::builder("response", ns::SASL).build())
                        .await
                } else {
                    // The server will answer the abort with a failure,
                    // which terminates the stream.
                    log::error!("SASL rspauth mismatch, aborting");
                    self.send_element(
                        Element::builder("failure", ns::SASL)
                            .append(Element::builder("abort", ns::SASL).build())
                            .build(),
                    )
                    .await
                }
            }
        }
    }

    /// Restart after TLS or SASL: reset the parser, clear the features
    /// snapshot, re-emit the stream header.
    async fn restart_stream(&mut self) -> Result<(), Error> {
        self.features.send_replace(None);
        self.reader
            .send(ReaderControl::Reset)
            .await
            .map_err(|_| Error::Closed)?;
        self.xml_out
            .send(WirePacket::Header(StreamHeader::client_to(
                self.jid.domain(),
            )))
            .await
            .map_err(|_| Error::Closed)?;
        self.state = StreamState::WaitFeatures;
        Ok(())
    }

    /// Request resource binding, RFC 3920 section 7.
    async fn start_bind(&mut self) -> Result<(), Error> {
        let id = self.ids.next().await;
        let mut bind = Element::builder("bind", ns::BIND);
        if let Some(resource) = self.jid.resource() {
            bind = bind.append(
                Element::builder("resource", ns::BIND)
                    .append(minidom::Node::Text(resource.to_owned()))
                    .build(),
            );
        }
        let iq = Iq::set(&id, bind.build());
        self.bind_id = Some(id);
        self.state = StreamState::Bind;
        self.send_element(Stanza::Iq(iq).into()).await
    }

    async fn finish_bind(&mut self, stanza: Stanza) -> Result<(), Error> {
        self.bind_id = None;
        if stanza.is_error() {
            log::error!("resource binding failed");
            return Err(match stanza.error() {
                Some(error) => Error::Stanza(error.clone()),
                None => ProtocolError::InvalidBindResponse.into(),
            });
        }
        let Stanza::Iq(iq) = stanza else {
            return Err(ProtocolError::InvalidBindResponse.into());
        };
        let jid_text = iq
            .payload("bind", ns::BIND)
            .and_then(|bind| bind.get_child("jid", ns::BIND))
            .map(Element::text)
            .filter(|text| !text.is_empty())
            .ok_or(ProtocolError::InvalidBindResponse)?;
        let bound: Jid = jid_text
            .parse()
            .map_err(|_| ProtocolError::InvalidBindResponse)?;
        log::debug!("bound resource: {}", bound);
        self.jid = bound.clone();
        self.bound_jid.send_replace(bound);
        self.state = StreamState::Ready;
        self.gate
            .send(GateControl::Resume)
            .await
            .map_err(|_| Error::Closed)?;
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }
        Ok(())
    }

    async fn handle_stanza(&mut self, mut stanza: Stanza) -> Result<(), Error> {
        self.attach_extensions(&mut stanza);

        // The bind result belongs to the negotiation, not the application.
        if self.state == StreamState::Bind
            && self.bind_id.is_some()
            && self.bind_id.as_deref() == stanza.id()
        {
            return self.finish_bind(stanza).await;
        }

        let mut deliver = true;
        if let Some(id) = stanza.id() {
            if let Some(handler) = self.handlers.remove(id) {
                deliver = handler(&stanza);
            }
        }
        if deliver && self.inbound.send(stanza).await.is_err() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Re-parse payload children whose namespace has a registered
    /// constructor and attach the typed values to the stanza.
    fn attach_extensions(&self, stanza: &mut Stanza) {
        if self.extensions.is_empty() {
            return;
        }
        let mut attachments = Vec::new();
        for payload in stanza.payloads() {
            if let Some(parse) = self.extensions.get(&payload.ns()) {
                match parse(payload) {
                    Ok(nested) => attachments.push(nested),
                    Err(e) => log::warn!("extension unmarshal ({}): {}", payload.ns(), e),
                }
            }
        }
        for nested in attachments {
            stanza.add_nested(nested);
        }
    }

    fn fail(&mut self, error: Error) {
        log::error!("stream failed: {}", error);
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(error));
        }
        let _ = self.gate.try_send(GateControl::Stop);
        let _ = self.pump.try_send(PumpCommand::Shutdown);
    }

    async fn send_element(&self, el: Element) -> Result<(), Error> {
        self.xml_out
            .send(WirePacket::Element(el))
            .await
            .map_err(|_| Error::Closed)
    }
}
