//! Acceptor/dialer integration over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use burrow_crypto::IdentityKeyPair;
use burrow_keys::{KeyStore, StaticKeyStore};
use burrow_transport::{TunnelAcceptor, TunnelDialer};
use bytes::Bytes;

struct Rig {
    acceptor: TunnelAcceptor,
    dialer: TunnelDialer,
}

async fn rig(identity: &str) -> Rig {
    let server_id = IdentityKeyPair::generate();
    let client_id = IdentityKeyPair::generate();
    let server_pub = server_id.public_bytes();

    let keystore: Arc<dyn KeyStore> =
        Arc::new(StaticKeyStore::new(&server_id).with_authorized(client_id.public_bytes()));

    let acceptor = TunnelAcceptor::bind("127.0.0.1:0".parse().unwrap(), server_id, keystore)
        .await
        .unwrap();

    let dialer = TunnelDialer::new(
        "127.0.0.1",
        acceptor.local_addr().port(),
        Bytes::from(identity.to_string()),
        client_id,
        server_pub,
    );

    Rig { acceptor, dialer }
}

fn message(tag: &str) -> Vec<Bytes> {
    vec![Bytes::new(), Bytes::from(tag.to_string())]
}

#[tokio::test]
async fn round_trip_frames_both_ways() {
    let Rig {
        mut acceptor,
        dialer,
    } = rig("origin-host:9090").await;

    let mut conn = dialer.connect().await.unwrap();
    conn.send(message("hello from peer")).await.unwrap();

    let (peer, parts) = acceptor.recv().await.unwrap();
    assert_eq!(peer, Bytes::from_static(b"origin-host:9090"));
    assert_eq!(parts, message("hello from peer"));

    acceptor.handle().send(&peer, message("hello back")).await;
    assert_eq!(conn.recv().await.unwrap(), message("hello back"));
}

#[tokio::test]
async fn per_peer_fifo_is_preserved() {
    let Rig {
        mut acceptor,
        dialer,
    } = rig("fifo-host:7000").await;

    let conn = dialer.connect().await.unwrap();
    for i in 0..200u32 {
        conn.send(message(&format!("frame-{i}"))).await.unwrap();
    }

    for i in 0..200u32 {
        let (_, parts) = acceptor.recv().await.unwrap();
        assert_eq!(parts, message(&format!("frame-{i}")));
    }
}

#[tokio::test]
async fn unauthorized_peer_is_rejected_without_frames() {
    let server_id = IdentityKeyPair::generate();
    let stranger = IdentityKeyPair::generate();
    let server_pub = server_id.public_bytes();

    // Empty allow-set: nobody gets in.
    let keystore: Arc<dyn KeyStore> = Arc::new(StaticKeyStore::new(&server_id));
    let mut acceptor = TunnelAcceptor::bind("127.0.0.1:0".parse().unwrap(), server_id, keystore)
        .await
        .unwrap();

    let dialer = TunnelDialer::new(
        "127.0.0.1",
        acceptor.local_addr().port(),
        Bytes::from_static(b"stranger:1"),
        stranger,
        server_pub,
    );

    assert!(dialer.connect().await.is_err());

    // No frame ever surfaces for the rejected peer.
    let nothing = tokio::time::timeout(Duration::from_millis(300), acceptor.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn reconnect_takes_over_the_identity() {
    let Rig {
        mut acceptor,
        dialer,
    } = rig("takeover-host:8080").await;

    let mut first = dialer.connect().await.unwrap();
    first.send(message("from first")).await.unwrap();
    let (peer, _) = acceptor.recv().await.unwrap();

    let mut second = dialer.connect().await.unwrap();
    second.send(message("from second")).await.unwrap();
    let (peer2, parts) = acceptor.recv().await.unwrap();
    assert_eq!(peer2, peer);
    assert_eq!(parts, message("from second"));

    // Outbound routing now lands on the newest connection.
    acceptor.handle().send(&peer, message("routed")).await;
    assert_eq!(second.recv().await.unwrap(), message("routed"));

    let nothing = tokio::time::timeout(Duration::from_millis(300), first.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn messages_for_unknown_peers_are_dropped() {
    let Rig { acceptor, dialer } = rig("known-host:1234").await;
    let _conn = dialer.connect().await.unwrap();

    // Must not error or hang.
    acceptor
        .handle()
        .send(&Bytes::from_static(b"nobody:0"), message("lost"))
        .await;
    assert!(!acceptor.handle().is_connected(&Bytes::from_static(b"nobody:0")));
}
