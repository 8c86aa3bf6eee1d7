//! The outbound gate.
//!
//! A single-reader task between the application's stanza channel and the
//! XML writer. It starts paused so the application cannot inject stanzas
//! into the negotiation stream; the stream filter resumes it once
//! resource binding completes. While paused, application sends queue up
//! in the bounded channel and block.

use tokio::sync::mpsc;

use crate::proto::WirePacket;
use crate::stanza::Stanza;

/// Gate control values. The gate stays open once opened; closing it again
/// mid-session is not supported.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum GateControl {
    /// Open the gate; sent after resource binding.
    Resume,
    /// Stop forwarding and exit.
    Stop,
}

pub(crate) async fn run(
    mut control: mpsc::Receiver<GateControl>,
    mut stanzas: mpsc::Receiver<Stanza>,
    xml_out: mpsc::Sender<WirePacket>,
) {
    // Paused: the stanza channel is deliberately not polled.
    loop {
        match control.recv().await {
            Some(GateControl::Resume) => break,
            Some(GateControl::Stop) | None => return,
        }
    }

    loop {
        tokio::select! {
            cmd = control.recv() => match cmd {
                Some(GateControl::Resume) => {}
                Some(GateControl::Stop) | None => break,
            },
            stanza = stanzas.recv() => match stanza {
                Some(stanza) => {
                    if xml_out.send(WirePacket::Element(stanza.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::Presence;

    #[tokio::test]
    async fn holds_stanzas_until_resumed() {
        let (control_tx, control_rx) = mpsc::channel(1);
        let (stanza_tx, stanza_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        tokio::spawn(run(control_rx, stanza_rx, out_tx));

        stanza_tx
            .send(Stanza::Presence(Presence::available()))
            .await
            .unwrap();
        // Give the gate a chance to (incorrectly) forward.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(out_rx.try_recv().is_err());

        control_tx.send(GateControl::Resume).await.unwrap();
        match out_rx.recv().await {
            Some(WirePacket::Element(el)) => assert_eq!(el.name(), "presence"),
            other => panic!("expected presence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn forwards_in_submission_order() {
        let (control_tx, control_rx) = mpsc::channel(1);
        let (stanza_tx, stanza_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        tokio::spawn(run(control_rx, stanza_rx, out_tx));
        control_tx.send(GateControl::Resume).await.unwrap();

        for i in 0..3 {
            let mut presence = Presence::available();
            presence.id = Some(format!("p{}", i));
            stanza_tx.send(Stanza::Presence(presence)).await.unwrap();
        }
        for i in 0..3 {
            match out_rx.recv().await {
                Some(WirePacket::Element(el)) => {
                    assert_eq!(el.attr("id"), Some(format!("p{}", i).as_str()))
                }
                other => panic!("expected presence, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn stop_ends_the_task() {
        let (control_tx, control_rx) = mpsc::channel(1);
        let (_stanza_tx, stanza_rx) = mpsc::channel::<Stanza>(1);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run(control_rx, stanza_rx, out_tx));
        control_tx.send(GateControl::Stop).await.unwrap();
        handle.await.unwrap();
    }
}
