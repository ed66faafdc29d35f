//! Listener behavior: accept events, the pre-accept filter, and the
//! start/stop lifecycle, driven over real loopback TCP.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use strake_net::{Config, Connection, Listener, NetError};
use tokio::{sync::Notify, time::timeout};

async fn bound_addr(listener: &Listener) -> std::net::SocketAddr {
    for _ in 0..500 {
        if let Some(addr) = listener.local_addr() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener did not bind in time");
}

#[tokio::test]
async fn round_trip_through_listener() {
    let listener = Arc::new(Listener::new(Config::default()));

    let received = Arc::new(Mutex::new(Vec::<(u8, String)>::new()));
    let done = Arc::new(Notify::new());
    {
        let received = Arc::clone(&received);
        let done = Arc::clone(&done);
        listener.on_new_connection(move |conn| {
            let received = Arc::clone(&received);
            let done = Arc::clone(&done);
            conn.on_message(move |mut delivery| {
                let msg = delivery.message();
                let text = msg.read_string().expect("payload is a string");
                received.lock().unwrap().push((msg.message_type(), text));
                done.notify_one();
            });
            let runner = conn.clone();
            tokio::spawn(async move {
                let _ = runner.read_loop().await;
            });
        });
    }

    let server = Arc::clone(&listener);
    let server_task = tokio::spawn(async move { server.listen(0).await });
    let addr = bound_addr(&listener).await;
    assert!(listener.is_listening());

    let client: Connection = Connection::new(Config::default());
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let sent = client.send_with(3, |msg| msg.write_str("Hello")).await.unwrap();
    assert_eq!(sent, 11);

    timeout(Duration::from_secs(5), done.notified()).await.expect("no delivery");
    assert_eq!(received.lock().unwrap().as_slice(), &[(3, "Hello".to_string())]);

    listener.stop();
    timeout(Duration::from_secs(5), server_task).await.unwrap().unwrap().unwrap();
    assert!(!listener.is_listening());
}

#[tokio::test]
async fn second_concurrent_listen_is_rejected() {
    let listener = Arc::new(Listener::new(Config::default()));

    let server = Arc::clone(&listener);
    let server_task = tokio::spawn(async move { server.listen(0).await });
    bound_addr(&listener).await;

    assert!(matches!(listener.listen(0).await, Err(NetError::AlreadyListening)));

    listener.stop();
    timeout(Duration::from_secs(5), server_task).await.unwrap().unwrap().unwrap();

    // After a clean stop the listener may be reused.
    let server = Arc::clone(&listener);
    let second_task = tokio::spawn(async move { server.listen(0).await });
    bound_addr(&listener).await;
    listener.stop();
    timeout(Duration::from_secs(5), second_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn filter_rejects_before_connection_events() {
    let listener = Arc::new(Listener::new(Config::default()));

    let accepted = Arc::new(AtomicUsize::new(0));
    let filtered = Arc::new(AtomicUsize::new(0));
    {
        let count = Arc::clone(&filtered);
        listener.on_connection_request(move |_peer| {
            count.fetch_add(1, Ordering::SeqCst);
            false
        });
        let count = Arc::clone(&accepted);
        listener.on_new_connection(move |_conn| {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }

    let server = Arc::clone(&listener);
    let server_task = tokio::spawn(async move { server.listen(0).await });
    let addr = bound_addr(&listener).await;

    // The TCP handshake itself succeeds; the socket is dropped right after.
    let client: Connection = Connection::new(Config::default());
    client.connect("127.0.0.1", addr.port()).await.unwrap();

    // Give the accept loop time to run the filter.
    timeout(Duration::from_secs(5), async {
        while filtered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("filter never ran");

    assert_eq!(accepted.load(Ordering::SeqCst), 0, "rejected peer must not emit an event");

    listener.stop();
    timeout(Duration::from_secs(5), server_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let listener = Arc::new(Listener::new(Config::default()));
    listener.on_new_connection(|_conn| {});

    let server = Arc::clone(&listener);
    let server_task = tokio::spawn(async move { server.listen(0).await });
    let addr = bound_addr(&listener).await;

    let client: Connection = Connection::new(Config::default());
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    assert!(matches!(
        client.connect("127.0.0.1", addr.port()).await,
        Err(NetError::AlreadyConnected)
    ));

    listener.stop();
    timeout(Duration::from_secs(5), server_task).await.unwrap().unwrap().unwrap();
}
