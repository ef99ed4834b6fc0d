use std::io;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Terminate,
    Interrupt,
    /// SIGUSR1, dumps the session table to the log
    User1,
}

impl SignalType {
    pub fn is_shutdown(self) -> bool {
        matches!(self, SignalType::Terminate | SignalType::Interrupt)
    }
}

#[derive(Clone)]
pub struct SignalHandler {
    signal_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<SignalType>>>,
}

impl SignalHandler {
    /// Installs the process signal listeners. Must be called within a Tokio runtime.
    pub fn new() -> io::Result<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self::spawn_signal_listeners(signal_tx)?;
        Ok(Self {
            signal_rx: Arc::new(tokio::sync::Mutex::new(signal_rx)),
        })
    }

    #[cfg(unix)]
    fn spawn_signal_listeners(tx: mpsc::UnboundedSender<SignalType>) -> io::Result<()> {
        use signal::unix::{signal, SignalKind};

        let listeners = [
            (SignalKind::terminate(), SignalType::Terminate),
            (SignalKind::interrupt(), SignalType::Interrupt),
            (SignalKind::user_defined1(), SignalType::User1),
        ];

        for (kind, signal_type) in listeners {
            // Installed before spawning so a failure surfaces to the caller
            let mut stream = signal(kind)?;
            let tx = tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    debug!("Received {:?}", signal_type);
                    if tx.send(signal_type).is_err() {
                        break;
                    }
                }
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn spawn_signal_listeners(tx: mpsc::UnboundedSender<SignalType>) -> io::Result<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    break;
                }
                debug!("Received Ctrl+C");
                if tx.send(SignalType::Interrupt).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    pub async fn wait_for_signal(&self) -> SignalType {
        let mut rx = self.signal_rx.lock().await;
        match rx.recv().await {
            Some(signal_type) => signal_type,
            None => {
                error!("Signal listeners are gone, treating as termination");
                SignalType::Terminate
            }
        }
    }

    pub fn try_recv(&self) -> Option<SignalType> {
        let mut rx = self.signal_rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}
