//! The socket layer and its pump task.
//!
//! [`Transport`] owns the one TCP connection of a session and is swapped
//! in place for a TLS-wrapped connection when `<starttls/>` succeeds. The
//! pump shuttles raw bytes between the socket and the XML codec's byte
//! pipes; because it is a single task that owns the socket exclusively,
//! the upgrade command doubles as the reader-parking barrier.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::{
    client::TlsStream,
    rustls::{pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};

use crate::error::Error;

/// The connection underneath the byte pipes.
#[allow(clippy::large_enum_variant)]
pub(crate) enum Transport {
    /// Plain TCP, as established at connect time.
    Tcp(TcpStream),
    /// After the in-band upgrade.
    Tls(TlsStream<TcpStream>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Commands accepted by the pump task.
pub(crate) enum PumpCommand {
    /// Run the TLS handshake over the current TCP connection and swap
    /// the transport. Sent by the stream filter after `<proceed/>`.
    StartTls {
        /// Certificate name to verify.
        domain: String,
        /// Completion signal.
        done: oneshot::Sender<Result<(), Error>>,
    },
    /// Close the connection.
    Shutdown,
}

/// Wrap the TCP connection in TLS, verifying `domain` against the
/// webpki roots.
async fn starttls(transport: Transport, domain: &str) -> Result<Transport, Error> {
    let tcp = match transport {
        Transport::Tcp(tcp) => tcp,
        Transport::Tls(_) => return Err(Error::BadState),
    };

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let name = ServerName::try_from(domain.to_owned())
        .map_err(|e| Error::Transport(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    let stream = TlsConnector::from(Arc::new(config))
        .connect(name, tcp)
        .await?;
    log::debug!("TLS negotiation succeeded");
    Ok(Transport::Tls(stream))
}

/// Shuttle bytes between the socket and the codec pipes until either side
/// closes or a command says to stop.
pub(crate) async fn pump(
    mut transport: Transport,
    mut to_reader: DuplexStream,
    mut from_writer: DuplexStream,
    mut control: mpsc::Receiver<PumpCommand>,
) {
    let mut rbuf = BytesMut::with_capacity(4096);
    let mut wbuf = BytesMut::with_capacity(4096);
    loop {
        tokio::select! {
            biased;
            cmd = control.recv() => match cmd {
                Some(PumpCommand::StartTls { domain, done }) => {
                    match starttls(transport, &domain).await {
                        Ok(upgraded) => {
                            transport = upgraded;
                            let _ = done.send(Ok(()));
                        }
                        Err(e) => {
                            // The handshake consumed the socket; nothing
                            // left to shut down.
                            let _ = done.send(Err(e));
                            return;
                        }
                    }
                }
                Some(PumpCommand::Shutdown) | None => break,
            },
            read = transport.read_buf(&mut rbuf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    if to_reader.write_all(&rbuf).await.is_err() {
                        break;
                    }
                    rbuf.clear();
                }
                Err(e) => {
                    log::error!("read: {}", e);
                    break;
                }
            },
            read = from_writer.read_buf(&mut wbuf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(e) = transport.write_all(&wbuf).await {
                        log::error!("write: {}", e);
                        break;
                    }
                    if transport.flush().await.is_err() {
                        break;
                    }
                    wbuf.clear();
                }
                Err(e) => {
                    log::error!("write: {}", e);
                    break;
                }
            },
        }
    }
    let _ = transport.shutdown().await;
}
