use std::sync::Arc;
use std::time::Duration;

use ihc_protocol::{Header, Packet};

use crate::{
    ConnectionConfig, DatagramTransport, SendFlags, StreamTransport,
    Transport, TransportError, TransportEvents,
};

/// A transport chosen at runtime from [`ConnectionConfig::mode`].
pub enum ClientTransport {
    Stream(StreamTransport),
    Datagram(DatagramTransport),
}

impl ClientTransport {
    pub fn from_config(config: ConnectionConfig) -> Self {
        if config.mode.is_datagram() {
            Self::Datagram(DatagramTransport::new(config))
        } else {
            Self::Stream(StreamTransport::new(config))
        }
    }
}

impl Transport for ClientTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        match self {
            Self::Stream(t) => t.initialize().await,
            Self::Datagram(t) => t.initialize().await,
        }
    }

    async fn run<E: TransportEvents>(&self, events: Arc<E>) {
        match self {
            Self::Stream(t) => t.run(events).await,
            Self::Datagram(t) => t.run(events).await,
        }
    }

    async fn send(
        &self,
        header: Header,
        payload: &[u8],
        flags: SendFlags,
    ) -> Result<(), TransportError> {
        match self {
            Self::Stream(t) => t.send(header, payload, flags).await,
            Self::Datagram(t) => t.send(header, payload, flags).await,
        }
    }

    async fn poll(&self, header: Header, timeout: Duration) -> Option<Packet> {
        match self {
            Self::Stream(t) => t.poll(header, timeout).await,
            Self::Datagram(t) => t.poll(header, timeout).await,
        }
    }

    fn shutdown(&self) {
        match self {
            Self::Stream(t) => t.shutdown(),
            Self::Datagram(t) => t.shutdown(),
        }
    }

    fn is_administrator(&self) -> bool {
        match self {
            Self::Stream(t) => t.is_administrator(),
            Self::Datagram(t) => t.is_administrator(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportMode;

    #[test]
    fn test_from_config_selects_by_mode() {
        let tcp = ClientTransport::from_config(ConnectionConfig {
            mode: TransportMode::Tcp,
            ..Default::default()
        });
        assert!(matches!(tcp, ClientTransport::Stream(_)));

        for mode in [TransportMode::Multicast, TransportMode::Broadcast, TransportMode::Udp] {
            let t = ClientTransport::from_config(ConnectionConfig {
                mode,
                ..Default::default()
            });
            assert!(matches!(t, ClientTransport::Datagram(_)));
        }
    }
}
