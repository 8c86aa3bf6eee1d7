//! The inbound half of the XML codec.
//!
//! A task that turns the byte stream coming out of the transport pump into
//! typed [`XmlPacket`] values. rxml events are assembled into complete
//! [`minidom::Element`] subtrees; the stream header and footer are handled
//! directly from the event level because they never complete as subtrees.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{ready, Stream, StreamExt};
use minidom::Element;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use xso::{error::FromEventsError, FromEventsBuilder, FromXml};

use crate::ns;
use crate::proto::{classify_element, StreamHeader, XmlPacket};

/// Commands accepted by the reader task.
#[derive(Debug)]
pub(crate) enum ReaderControl {
    /// Forget all parser state and expect a fresh stream header. Sent by
    /// the stream filter whenever the stream restarts (TLS, SASL success).
    Reset,
}

type ElementParse = Result<Element, xso::error::Error>;
type ElementBuilder = <ElementParse as FromXml>::Builder;

/// Event source over a byte stream, skipping XML declarations.
struct RawXmlReader<Io> {
    inner: rxml::AsyncReader<Io>,
}

impl<Io: AsyncBufRead + Unpin> RawXmlReader<Io> {
    fn new(io: Io) -> Self {
        RawXmlReader {
            inner: rxml::AsyncReader::wrap(io, rxml::Parser::default()),
        }
    }

    /// Restart the parser for a fresh XML document on the same bytes.
    fn reset(&mut self) {
        *Pin::new(&mut self.inner).parser_pinned() = rxml::Parser::default();
    }
}

impl<Io: AsyncBufRead + Unpin> Stream for RawXmlReader<Io> {
    type Item = io::Result<rxml::Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return Poll::Ready(
                match ready!(Pin::new(&mut self.inner).poll_read(cx)).transpose() {
                    Some(Ok(rxml::Event::XmlDeclaration(_, _))) => continue,
                    other => other,
                },
            );
        }
    }
}

/// Run the reader task until the stream ends or the pipeline is dropped.
pub(crate) async fn run<Io>(
    io: Io,
    mut control: mpsc::Receiver<ReaderControl>,
    packets: mpsc::Sender<XmlPacket>,
) where
    Io: AsyncBufRead + Unpin,
{
    let mut reader = RawXmlReader::new(io);
    let mut builder: Option<ElementBuilder> = None;
    let mut in_stream = false;

    loop {
        tokio::select! {
            biased;
            cmd = control.recv() => match cmd {
                Some(ReaderControl::Reset) => {
                    reader.reset();
                    builder = None;
                    in_stream = false;
                }
                None => break,
            },
            event = reader.next() => {
                let event = match event {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        log::error!("read: {}", e);
                        break;
                    }
                    None => {
                        let _ = packets.send(XmlPacket::StreamEnd).await;
                        break;
                    }
                };

                // A child subtree is in progress; feed it to completion.
                if let Some(b) = builder.as_mut() {
                    match b.feed(event, &xso::Context::empty()) {
                        Ok(Some(Ok(element))) => {
                            builder = None;
                            log::trace!("S: <{} xmlns={:?}>", element.name(), element.ns());
                            if let Some(packet) = classify_element(element) {
                                if packets.send(packet).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(Some(Err(e))) => {
                            builder = None;
                            log::warn!("unmarshal: {}", e);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log::error!("read: {}", e);
                            break;
                        }
                    }
                    continue;
                }

                match event {
                    rxml::Event::StartElement(_, name, attrs) if in_stream => {
                        match <ElementParse as FromXml>::from_events(
                            name,
                            attrs,
                            &xso::Context::empty(),
                        ) {
                            Ok(b) => builder = Some(b),
                            Err(FromEventsError::Invalid(e)) => {
                                log::error!("read: {}", e);
                                break;
                            }
                            Err(FromEventsError::Mismatch { .. }) => {
                                log::error!("read: unexpected element start");
                                break;
                            }
                        }
                    }
                    rxml::Event::StartElement(_, (element_ns, element_name), mut attrs) => {
                        if element_ns != ns::STREAM || element_name != "stream" {
                            log::error!(
                                "read: stream header expected, got {}",
                                element_name
                            );
                            break;
                        }
                        let header = StreamHeader {
                            to: attrs.remove(rxml::Namespace::none(), "to"),
                            from: attrs.remove(rxml::Namespace::none(), "from"),
                            id: attrs.remove(rxml::Namespace::none(), "id"),
                            lang: attrs.remove(rxml::Namespace::xml(), "lang"),
                            version: attrs.remove(rxml::Namespace::none(), "version"),
                        };
                        in_stream = true;
                        if packets.send(XmlPacket::StreamStart(header)).await.is_err() {
                            return;
                        }
                    }
                    rxml::Event::EndElement(_) => {
                        // The stream footer; nothing may follow it.
                        let _ = packets.send(XmlPacket::StreamEnd).await;
                        break;
                    }
                    rxml::Event::Text(_, data) => {
                        // Whitespace keepalives are expected between stanzas.
                        if !xso::is_xml_whitespace(data.as_bytes()) {
                            log::warn!("read: stray text between stanzas");
                        }
                    }
                    rxml::Event::XmlDeclaration(_, _) => {}
                }
            }
        }
    }
}
