//! Drives a real server over TCP with the client library.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tether_client::Client;
use tether_protocol::{ContextKind, FaultClass, ParamShape, Payload, Signal, INTERRUPT_PROMPT};
use tether_server::demo::demo_commands;
use tether_server::{Command, MemoryCache, ShellCache, ShellConfig, ShellServer, ShellServerBuilder};
use tether_utils::TetherError;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn start_server(max_clients: usize) -> (ShellServer, std::net::SocketAddr) {
    let mut config = ShellConfig::default();
    config.app_name = "e2e".into();
    config.server.port = Some(0);
    config.server.idle_delay_ms = 0;
    config.server.max_clients = max_clients;

    let cache: Arc<dyn ShellCache> = Arc::new(MemoryCache::new());
    let server = ShellServerBuilder::new()
        .config(config)
        .cache(Arc::clone(&cache))
        .register_all(demo_commands(cache))
        .register(
            Command::builder("twin")
                .param(ParamShape::context("first", ContextKind::Simple))
                .param(ParamShape::context("second", ContextKind::Progress))
                .handler(|_| async { Ok(Some("should not run".to_string())) }),
        )
        .build()
        .unwrap();
    let addr = server.start().unwrap();
    (server, addr)
}

async fn connect(addr: std::net::SocketAddr) -> Client {
    Client::connect(addr).await.unwrap().with_timeout(TEST_TIMEOUT)
}

async fn wait_for_channels(server: &ShellServer, expected: usize) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while server.channel_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {} channels, still {}",
            expected,
            server.channel_count()
        )
    });
}

/// Read until `pick` matches, returning everything seen before it
async fn recv_until(client: &mut Client, pick: impl Fn(&Signal) -> bool) -> Vec<Signal> {
    let mut seen = Vec::new();
    loop {
        let signal = client.recv().await.unwrap();
        let done = pick(&signal);
        seen.push(signal);
        if done {
            return seen;
        }
    }
}

fn is_fault(signal: &Signal, expected: FaultClass) -> bool {
    matches!(signal, Signal::Output(Payload::Fault { class, .. }) if *class == expected)
}

#[tokio::test]
async fn meta_lists_registered_commands() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    let names: Vec<String> = client
        .commands()
        .await
        .unwrap()
        .into_iter()
        .map(|descriptor| descriptor.name)
        .collect();
    assert_eq!(
        names,
        vec!["cache-get", "cache-set", "echo", "progress", "sleep", "sum", "twin"]
    );
}

#[tokio::test]
async fn command_output_then_completed() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    assert_eq!(
        client.run_to_completion("sum 19 23").await.unwrap(),
        vec![Payload::Text("42".into()), Payload::Completed]
    );
}

#[tokio::test]
async fn unknown_command_reports_resolution_fault() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    let payloads = client.run_to_completion("frobnicate now").await.unwrap();
    assert!(matches!(
        payloads.as_slice(),
        [Payload::Fault { class: FaultClass::Resolution, .. }, Payload::Completed]
    ));
}

#[tokio::test]
async fn two_context_params_fail_at_dispatch() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    let payloads = client.run_to_completion("twin").await.unwrap();
    assert!(matches!(
        payloads.as_slice(),
        [Payload::Fault { class: FaultClass::Configuration, .. }, Payload::Completed]
    ));
}

#[tokio::test]
async fn admission_limit_rejects_extra_client() {
    let (server, addr) = start_server(2);
    let mut first = connect(addr).await;
    let _second = connect(addr).await;
    wait_for_channels(&server, 2).await;

    // The OS completes the handshake, then the server drops the socket
    let mut third = connect(addr).await;
    let rejected = third.recv().await;
    assert!(
        matches!(
            rejected,
            Err(TetherError::ConnectionClosed) | Err(TetherError::Connection(_))
        ),
        "unexpected {:?}",
        rejected
    );
    assert_eq!(server.channel_count(), 2);

    // Admitted clients are unaffected
    assert_eq!(
        first.run_to_completion("echo still-served").await.unwrap(),
        vec![Payload::Text("still-served".into()), Payload::Completed]
    );

    // A freed slot admits a new client
    drop(first);
    wait_for_channels(&server, 1).await;
    let mut fourth = connect(addr).await;
    assert!(!fourth.commands().await.unwrap().is_empty());
}

#[tokio::test]
async fn third_line_is_refused_while_lane_is_full() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    for _ in 0..3 {
        client.execute("sleep 2000").await.unwrap();
    }
    let seen = recv_until(&mut client, |signal| is_fault(signal, FaultClass::Busy)).await;
    assert_eq!(
        seen.iter().filter(|signal| is_fault(signal, FaultClass::Busy)).count(),
        1
    );
}

#[tokio::test]
async fn long_task_interrupt_negotiation() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    client.execute("sleep 60000").await.unwrap();
    assert_eq!(client.recv().await.unwrap(), Signal::text("sleeping 60000 ms"));

    // The prompt arrives while the command is still running
    let asked = Instant::now();
    client.interrupt().await.unwrap();
    assert_eq!(
        client.recv().await.unwrap(),
        Signal::AskInterrupt {
            prompt: INTERRUPT_PROMPT.to_string()
        }
    );
    assert!(asked.elapsed() < Duration::from_secs(1));

    client.confirm_interrupt(true).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), Signal::text("interrupted"));
    assert_eq!(client.recv().await.unwrap(), Signal::Output(Payload::Completed));
}

#[tokio::test]
async fn declined_interrupt_lets_command_finish() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    client.execute("sleep 300").await.unwrap();
    assert_eq!(client.recv().await.unwrap(), Signal::text("sleeping 300 ms"));
    client.interrupt().await.unwrap();
    assert!(matches!(client.recv().await.unwrap(), Signal::AskInterrupt { .. }));
    client.confirm_interrupt(false).await.unwrap();

    assert_eq!(client.recv().await.unwrap(), Signal::text("awake"));
    assert_eq!(client.recv().await.unwrap(), Signal::Output(Payload::Completed));
}

#[tokio::test]
async fn progress_completes_from_background_task() {
    let (_server, addr) = start_server(2);
    let mut client = connect(addr).await;

    let payloads = client
        .run_to_completion("progress 3 --delay-ms 1")
        .await
        .unwrap();
    let expected: Vec<Payload> = (1..=3)
        .map(|step| Payload::Progress {
            title: "progress".into(),
            progress: step,
            whole: 3,
        })
        .chain(std::iter::once(Payload::Completed))
        .collect();
    assert_eq!(payloads, expected);
}

#[tokio::test]
async fn cache_is_shared_between_connections() {
    let (_server, addr) = start_server(2);
    let mut writer = connect(addr).await;
    let mut reader = connect(addr).await;

    writer.run_to_completion("cache-set release v2.0").await.unwrap();
    assert_eq!(
        reader.run_to_completion("cache-get release").await.unwrap(),
        vec![Payload::Text("v2.0".into()), Payload::Completed]
    );
}

#[tokio::test]
async fn disconnect_frees_channel_entry() {
    let (server, addr) = start_server(2);
    let client = connect(addr).await;
    wait_for_channels(&server, 1).await;

    drop(client);
    wait_for_channels(&server, 0).await;
}

#[tokio::test]
async fn close_is_idempotent_and_drops_clients() {
    let (server, addr) = start_server(2);
    let mut client = connect(addr).await;
    wait_for_channels(&server, 1).await;

    server.close().await;
    server.close().await;
    assert!(!server.is_running());
    assert_eq!(server.channel_count(), 0);

    assert!(client.recv().await.is_err());
    assert!(Client::connect(addr).await.is_err());
}
