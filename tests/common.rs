//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;`.

#![allow(dead_code)]

use embercache::client::CacheClient;
use embercache::core::config::{ClientConfig, ServerConfig};
use embercache::net::frame::{read_frame, write_frame};
use embercache::net::locator::{FixedServerLocator, ServerAddress, ServerHostData};
use embercache::net::tls::SecurityOptions;
use embercache::net::transport::{self, BoxedStream};
use embercache::proto::codec::{decode_envelope, encode_envelope};
use embercache::proto::message::{Envelope, Message};
use embercache::server::CacheServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shared secret used by every test server.
pub const SECRET: &str = "ciao";

/// Start a plaintext server on an ephemeral port.
pub async fn start_server() -> (CacheServer, SocketAddr) {
    start_server_with(ServerConfig::default()).await
}

/// Start a plaintext server with explicit tunables.
pub async fn start_server_with(config: ServerConfig) -> (CacheServer, SocketAddr) {
    let host_data = ServerHostData::new("127.0.0.1", 0, "test", false);
    let server = CacheServer::with_config(SECRET, host_data, config);
    let addr = server.start().await.expect("server start");
    (server, addr)
}

/// Start a TLS server on an ephemeral port with the given material.
pub async fn start_tls_server(options: SecurityOptions) -> (CacheServer, SocketAddr) {
    let host_data = ServerHostData::new("localhost", 0, "test", true);
    let server = CacheServer::new(SECRET, host_data);
    server.setup_security(options).expect("setup security");
    let addr = server.start().await.expect("server start");
    (server, addr)
}

/// A plaintext client for the given server port.
pub fn make_client(id: &str, addr: SocketAddr) -> CacheClient {
    make_client_full(id, SECRET, "127.0.0.1", addr.port(), false, None)
}

/// A TLS client, optionally verifying against a CA bundle.
pub fn make_tls_client(id: &str, addr: SocketAddr, trust_store: Option<PathBuf>) -> CacheClient {
    make_client_full(id, SECRET, "localhost", addr.port(), true, trust_store)
}

/// Fully parameterized client construction.
pub fn make_client_full(
    id: &str,
    secret: &str,
    host: &str,
    port: u16,
    ssl: bool,
    trust_store: Option<PathBuf>,
) -> CacheClient {
    let host_data = ServerHostData::new(host, port, "test", ssl);
    let mut config = ClientConfig::default();
    config.connect_timeout_ms = 5_000;
    config.rpc_timeout_ms = 15_000;
    CacheClient::with_config(
        id,
        secret,
        Box::new(FixedServerLocator::new(host_data)),
        config,
        trust_store,
    )
}

/// Start and register a plaintext client, panicking if it cannot connect.
pub async fn connected_client(id: &str, addr: SocketAddr) -> CacheClient {
    let client = make_client(id, addr);
    client.start().await.expect("client start");
    assert!(client.wait_for_connection(Duration::from_secs(10)).await);
    client
}

/// A hand-driven protocol connection, for tests that need a misbehaving
/// or abruptly vanishing peer.
pub struct RawPeer {
    stream: BoxedStream,
    correlation: u64,
}

impl RawPeer {
    /// Connect and register over plaintext.
    pub async fn register(addr: SocketAddr, id: &str) -> RawPeer {
        let server_addr = ServerAddress {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            ssl: false,
            server_name: "localhost".to_string(),
        };
        let stream = transport::connect(&server_addr, None, Duration::from_secs(5))
            .await
            .expect("raw connect");
        let mut peer = RawPeer {
            stream,
            correlation: 0,
        };
        let cid = peer
            .send(Message::Register {
                client_id: id.to_string(),
                shared_secret: SECRET.to_string(),
            })
            .await;
        let reply = peer.recv().await;
        assert_eq!(reply.correlation_id, cid);
        assert!(matches!(
            reply.message,
            Message::RegisterAck { accepted: true, .. }
        ));
        peer
    }

    /// Send one message, returning its correlation id.
    pub async fn send(&mut self, message: Message) -> u64 {
        self.correlation += 1;
        let envelope = Envelope::new(self.correlation, message);
        let mut buf = bytes::BytesMut::new();
        encode_envelope(&envelope, &mut buf);
        write_frame(&mut self.stream, &buf).await.expect("raw send");
        self.correlation
    }

    /// Receive one envelope.
    pub async fn recv(&mut self) -> Envelope {
        let frame = read_frame(&mut self.stream, 8 * 1024 * 1024)
            .await
            .expect("raw recv")
            .expect("peer closed");
        let mut payload = frame;
        decode_envelope(&mut payload).expect("raw decode")
    }

    /// Fetch a key so the server records this peer as a holder.
    pub async fn become_holder(&mut self, key: &str) {
        let cid = self
            .send(Message::Get {
                key: key.to_string(),
            })
            .await;
        loop {
            let reply = self.recv().await;
            if reply.correlation_id == cid {
                assert!(matches!(
                    reply.message,
                    Message::GetResult { value: Some(_), .. }
                ));
                return;
            }
        }
    }
}
