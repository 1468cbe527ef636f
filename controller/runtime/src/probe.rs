use crate::core::{Peer, ProbePeer};
use tokio::net::TcpStream;

/// Considers a peer reachable when any of its gateways accepts a TCP connection.
///
/// Gateways are tried in declared order. The caller bounds the overall probe duration.
#[derive(Copy, Clone, Debug, Default)]
pub struct TcpProbe;

#[async_trait::async_trait]
impl ProbePeer for TcpProbe {
    async fn probe(&self, peer: &Peer) -> bool {
        for gateway in &peer.gateways {
            match TcpStream::connect((gateway.host.as_str(), gateway.port)).await {
                Ok(_) => return true,
                Err(error) => tracing::debug!(
                    peer = %peer.name,
                    host = %gateway.host,
                    port = gateway.port,
                    %error,
                    "Gateway unreachable"
                ),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn any_gateway_suffices() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let peer = Peer::new("mbg2", [("127.0.0.1", closed), ("127.0.0.1", open)]);
        assert!(TcpProbe.probe(&peer).await);
    }

    #[tokio::test]
    async fn unreachable_when_no_gateway_accepts() {
        let closed = closed_port().await;
        let peer = Peer::new("mbg3", [("127.0.0.1", closed)]);
        assert!(!TcpProbe.probe(&peer).await);
    }
}
