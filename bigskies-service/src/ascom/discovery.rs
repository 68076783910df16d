//! Alpaca UDP discovery responder
//!
//! Imaging software broadcasts `alpacadiscovery1` probes; the responder
//! answers with the HTTP API port so clients can find the gateway without
//! configuration.

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

const DISCOVERY_TOKEN: &[u8] = b"alpacadiscovery1";

/// Answer discovery probes until cancelled
pub async fn run_discovery(port: u16, alpaca_port: u16, cancel: CancellationToken) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    let response = discovery_response(alpaca_port);

    tracing::info!("Alpaca discovery listening on udp/{}", port);

    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("discovery responder stopping");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!("discovery recv failed: {}", e);
                        continue;
                    }
                };

                if !is_discovery_probe(&buf[..len]) {
                    continue;
                }

                if let Err(e) = socket.send_to(response.as_bytes(), peer).await {
                    tracing::warn!("discovery reply to {} failed: {}", peer, e);
                }
            }
        }
    }
}

fn is_discovery_probe(datagram: &[u8]) -> bool {
    datagram
        .windows(DISCOVERY_TOKEN.len())
        .any(|window| window == DISCOVERY_TOKEN)
}

fn discovery_response(alpaca_port: u16) -> String {
    serde_json::json!({ "AlpacaPort": alpaca_port }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_detection() {
        assert!(is_discovery_probe(b"alpacadiscovery1"));
        assert!(is_discovery_probe(b"xxalpacadiscovery1yy"));
        assert!(!is_discovery_probe(b"alpacadiscovery"));
        assert!(!is_discovery_probe(b""));
    }

    #[test]
    fn test_response_shape() {
        let response = discovery_response(11111);
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["AlpacaPort"], 11111);
    }

    #[tokio::test]
    async fn test_responder_answers_probe() {
        let cancel = CancellationToken::new();

        // Bind the responder on an ephemeral port by probing for one
        let probe_socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server_socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server_port = server_socket.local_addr().unwrap().port();
        drop(server_socket);

        let responder = tokio::spawn(run_discovery(server_port, 11111, cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        probe_socket
            .send_to(b"alpacadiscovery1", ("127.0.0.1", server_port))
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            probe_socket.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(value["AlpacaPort"], 11111);

        cancel.cancel();
        let _ = responder.await;
    }
}
