//! End-to-end tests driving the server-role handshake and relay over real
//! loopback sockets, plus the client-role handshake against an in-process
//! fake upstream.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use socks5_relay::error::HandshakeOutcome;
use socks5_relay::handshake::server as server_handshake;

async fn local_addr_of(listener: &TcpListener) -> SocketAddr {
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn connect_over_real_loopback_relays_both_directions() {
    // A fake "target" the server will dial once it parses the CONNECT request.
    let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = local_addr_of(&target_listener).await;

    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = local_addr_of(&proxy_listener).await;

    let server_task = tokio::spawn(async move {
        let (mut conn, _) = proxy_listener.accept().await.unwrap();
        match server_handshake::handshake(&mut conn, proxy_addr).await.unwrap() {
            HandshakeOutcome::Connect(addr) => {
                let upstream = TcpStream::connect(addr.to_string()).await.unwrap();
                socks5_relay::relay::relay(conn, upstream).await.unwrap()
            }
            other => panic!("expected Connect, got {other:?}"),
        }
    });

    let target_task = tokio::spawn(async move {
        let (mut sock, _) = target_listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        sock.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        sock.write_all(b"world").await.unwrap();
    });

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method_reply = [0u8; 2];
    client.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [0x05, 0x00]);

    let target_host = target_addr.ip().to_string();
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    match target_addr.ip() {
        std::net::IpAddr::V4(v4) => request.extend_from_slice(&v4.octets()),
        std::net::IpAddr::V6(_) => panic!("test target must be IPv4"),
    }
    request.extend_from_slice(&target_addr.port().to_be_bytes());
    client.write_all(&request).await.unwrap();
    let _ = target_host;

    let mut conn_reply = [0u8; 10];
    client.read_exact(&mut conn_reply).await.unwrap();
    assert_eq!(conn_reply[..2], [0x05, 0x00]);

    client.write_all(b"hello").await.unwrap();
    let mut resp = [0u8; 5];
    client.read_exact(&mut resp).await.unwrap();
    assert_eq!(&resp, b"world");

    drop(client);
    target_task.await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), server_task).await;
}

#[tokio::test]
async fn udp_associate_reports_bind_addr_and_holds_connection() {
    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = local_addr_of(&proxy_listener).await;

    let server_task = tokio::spawn(async move {
        let (mut conn, _) = proxy_listener.accept().await.unwrap();
        let outcome = server_handshake::handshake(&mut conn, proxy_addr).await.unwrap();
        assert!(matches!(outcome, HandshakeOutcome::UdpAssociate));
        server_handshake::hold_udp_associate(&mut conn).await;
    });

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method_reply = [0u8; 2];
    client.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [0x05, 0x00]);

    client
        .write_all(&[0x05, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
        .await
        .unwrap();
    let mut conn_reply = [0u8; 10];
    client.read_exact(&mut conn_reply).await.unwrap();
    assert_eq!(conn_reply[..2], [0x05, 0x00]);

    // Closing the client's half should end the server's hold promptly.
    drop(client);
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server task should notice client closed the control connection")
        .unwrap();
}
