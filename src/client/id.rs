//! Correlation id generator.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Handle on the id generator task, which yields `id_1`, `id_2`, … on a
/// channel. Ids are unique within the connection; they make no promise of
/// unpredictability.
#[derive(Clone)]
pub(crate) struct IdSequence {
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl IdSequence {
    pub(crate) fn new() -> IdSequence {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut serial: u64 = 1;
            loop {
                if tx.send(format!("id_{}", serial)).await.is_err() {
                    break;
                }
                serial += 1;
            }
        });
        IdSequence {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Read the next fresh id.
    pub(crate) async fn next(&self) -> String {
        // The generator only stops once every clone of this receiver is
        // gone, so a recv on a live handle cannot come back empty.
        self.rx
            .lock()
            .await
            .recv()
            .await
            .expect("id generator task ended")
    }
}
