use std::net::SocketAddr;
use std::time::Duration;

use conduit_core::Chain;
use conduit_transport_tcp::{dial, serve, spawn_inbound, Listener, ListenerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_echo_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    if stream.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn bytes_round_trip_through_inbound_and_outbound_nodes() {
    let origin_addr = spawn_echo_origin().await;

    let listener = Listener::bind(ListenerConfig::new("127.0.0.1:0".parse().unwrap()))
        .await
        .unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    let handle = serve(listener, move |stream, _peer| async move {
        let chain = Chain::new();
        let inbound = spawn_inbound(&chain, stream, 16 * 1024);
        match dial(&chain, origin_addr, 16 * 1024).await {
            Ok(outbound) => {
                chain.connect(inbound, outbound).unwrap();
            }
            Err(_) => {
                chain.remove(inbound);
            }
        }
    });

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(b"hello world").await.unwrap();

    let mut buf = [0u8; 32];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();

    assert_eq!(&buf[..n], b"hello world");

    drop(client);
    handle.shutdown().await;
}
