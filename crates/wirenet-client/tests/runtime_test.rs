//! Client runtime tests against a scripted router on a local socket.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};
use wirenet_client::{
    ClientConfig, ClientRuntime, ConnectionError, EngineError,
    devices::{Relay, Source, Supply},
};
use wirenet_proto::{State, voltage};

async fn listener() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ClientConfig {
        server_address: listener.local_addr().unwrap().to_string(),
        client_name: "bench".to_string(),
        retry_interval: Duration::from_millis(10),
        reconnect: false,
    };
    (listener, config)
}

#[tokio::test]
async fn announces_and_asserts_on_connect() {
    let (listener, config) = listener().await;
    let mut runtime = ClientRuntime::new(config);
    runtime
        .install(|engine| {
            Source::install(
                engine,
                "Q1.1",
                State::from(voltage::AC_ON),
                State::from(voltage::AC_OFF),
            )
        })
        .await
        .unwrap();
    let client = tokio::spawn(runtime.run());

    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();

    assert_eq!(lines.next_line().await.unwrap().unwrap(), "clientname:bench");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "registration:Q1.1");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:Q1.1:230VAC");

    drop(lines);
    assert!(client.await.unwrap().is_ok());
}

#[tokio::test]
async fn routed_change_drives_relay_contacts() {
    let (listener, config) = listener().await;
    let mut runtime = ClientRuntime::new(config);
    runtime
        .install(|engine| {
            Relay::install(
                engine,
                Supply::Dc,
                "K1.A1",
                "K1.A2",
                vec![("K1.11".to_string(), "K1.14".to_string())],
            )
        })
        .await
        .unwrap();
    let client = tokio::spawn(runtime.run());

    let (stream, _) = listener.accept().await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    assert_eq!(lines.next_line().await.unwrap().unwrap(), "clientname:bench");
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        "registration:K1.11:K1.14:K1.A1:K1.A2"
    );
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:K1.A2:0VDC");

    writer.write_all(b"statechange:K1.11:48VDC\nstatechange:K1.A1:48VDC\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:K1.14:48VDC");

    writer.write_all(b"statechange:K1.A1:None\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:K1.14:None");

    drop(writer);
    drop(lines);
    assert!(client.await.unwrap().is_ok());
}

#[tokio::test]
async fn short_circuit_halts_client() {
    let (listener, config) = listener().await;
    let mut runtime = ClientRuntime::new(config);
    runtime
        .install(|engine| {
            Source::install(
                engine,
                "Q1.1",
                State::from(voltage::AC_ON),
                State::from(voltage::AC_OFF),
            )
        })
        .await
        .unwrap();
    let client = tokio::spawn(runtime.run());

    let (mut stream, _) = listener.accept().await.unwrap();
    stream.write_all(b"statechange:Q1.1:0VAC\n").await.unwrap();

    let result = client.await.unwrap();
    assert!(matches!(result, Err(ConnectionError::Engine(EngineError::ShortCircuit { .. }))));
}

#[tokio::test]
async fn handle_update_is_flushed() {
    let (listener, config) = listener().await;
    let mut runtime = ClientRuntime::new(config);
    runtime
        .install(|engine| {
            engine.register("S1", State::NoState, None)?;
            Source::install(
                engine,
                "Q9",
                State::from(voltage::LOGIC),
                State::from(voltage::DC_OFF),
            )
        })
        .await
        .unwrap();
    let handle = runtime.handle();
    let client = tokio::spawn(runtime.run());

    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    for _ in 0..3 {
        lines.next_line().await.unwrap().unwrap();
    }

    handle
        .update(|engine| engine.apply_local_change("S1", State::from(voltage::SIGNAL_ON)))
        .await
        .unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:S1:12VDC");

    drop(lines);
    assert!(client.await.unwrap().is_ok());
}

#[tokio::test]
async fn retries_until_router_appears() {
    // Reserve a port, then free it so the first attempts are refused.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = reserved.local_addr().unwrap();
    drop(reserved);

    let config = ClientConfig {
        server_address: address.to_string(),
        client_name: "late".to_string(),
        retry_interval: Duration::from_millis(20),
        reconnect: false,
    };
    let client = tokio::spawn(ClientRuntime::new(config).run());

    tokio::time::sleep(Duration::from_millis(60)).await;
    let listener = TcpListener::bind(address).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();

    assert_eq!(lines.next_line().await.unwrap().unwrap(), "clientname:late");

    drop(lines);
    assert!(client.await.unwrap().is_ok());
}

#[tokio::test]
async fn reconnects_and_announces_again() {
    let (listener, config) = listener().await;
    let address = listener.local_addr().unwrap();
    let mut runtime = ClientRuntime::new(ClientConfig { reconnect: true, ..config });
    runtime
        .install(|engine| {
            engine.register("S1", State::NoState, None)?;
            Source::install(
                engine,
                "Q1.1",
                State::from(voltage::AC_ON),
                State::from(voltage::AC_OFF),
            )
        })
        .await
        .unwrap();
    let handle = runtime.handle();
    let client = tokio::spawn(runtime.run());

    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "clientname:bench");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "registration:Q1.1:S1");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:Q1.1:230VAC");

    // Drop the session and keep the router away while the switch is flipped.
    drop(lines);
    drop(listener);
    while handle.update(|engine| engine.is_connected()).await {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle
        .update(|engine| engine.apply_local_change("S1", State::from(voltage::SIGNAL_ON)))
        .await
        .unwrap();

    let listener = TcpListener::bind(address).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();

    assert_eq!(lines.next_line().await.unwrap().unwrap(), "clientname:bench");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "registration:Q1.1:S1");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:S1:12VDC");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "statechange:Q1.1:230VAC");

    assert!(!client.is_finished());
    client.abort();
}
