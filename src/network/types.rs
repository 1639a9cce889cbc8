use crate::configuration::types::Protocol;
use std::net::SocketAddr;
use tokio::sync::{watch, OwnedSemaphorePermit};
use uuid::Uuid;

/// Identity of one accepted connection, handed to the session handler with the stream.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub id: Uuid,
    pub client_addr: SocketAddr,
    pub dst_port: u16,
    pub protocol: Protocol,
}

impl ConnectionMeta {
    pub fn new(client_addr: SocketAddr, dst_port: u16, protocol: Protocol) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_addr,
            dst_port,
            protocol,
        }
    }
}

/// One unit of the global concurrency budget. The slot is given back when dropped.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionSlot {
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { _permit: permit }
    }
}

/// Sending half of the process-wide stop flag.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of the stop flag, cloned into every listener and session.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested. If the trigger is dropped without firing,
    /// this never resolves.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
