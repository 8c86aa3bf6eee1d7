//! The outbound half of the XML codec: a task that serialises
//! [`WirePacket`] values into the transport pump's byte pipe.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::ns;
use crate::proto::{xml, WirePacket};

/// Drain `packets` into `io` until the channel closes or a write fails.
pub(crate) async fn run<Io>(mut io: Io, mut packets: mpsc::Receiver<WirePacket>)
where
    Io: AsyncWrite + Unpin,
{
    while let Some(packet) = packets.recv().await {
        let buf = match packet {
            WirePacket::Header(header) => header.to_wire(),
            WirePacket::Element(el) => xml::element_to_string(&el, ns::JABBER_CLIENT),
        };
        log::trace!("C: {}", buf);
        if let Err(e) = io.write_all(buf.as_bytes()).await {
            log::error!("write: {}", e);
            break;
        }
        if let Err(e) = io.flush().await {
            log::error!("write: {}", e);
            break;
        }
    }
}
