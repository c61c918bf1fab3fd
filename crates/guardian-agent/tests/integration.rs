//! End-to-end tests for guardian-agentd
//!
//! Each test runs the real command server on a loopback port in front of a
//! mock host and talks to it the way a controller would.

use futures_util::{SinkExt, StreamExt};
use guardian_agent::AgentService;
use guardian_api::{Event, EventType, Packet, PolicySnapshot, Rule, RuleSet};
use guardian_config::AgentConfig;
use guardian_core::{CategoryResolver, PolicyEngine, PolicyStore, UsageAccounting};
use guardian_host_api::MockHost;
use guardian_net::{ClientOptions, CommandServer, DeviceClient, EventHub};
use guardian_store::{SqliteStore, Store};
use guardian_util::TargetId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

struct RunningAgent {
    addr: SocketAddr,
    engine: Arc<PolicyEngine>,
    hub: Arc<EventHub>,
    _shutdown: watch::Sender<bool>,
}

impl RunningAgent {
    fn client(&self) -> DeviceClient {
        DeviceClient::new(&self.addr.to_string(), ClientOptions::default()).unwrap()
    }

    async fn wait_for_subscribers(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.hub.subscriber_count().await != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber count never reached");
    }
}

async fn start_agent(store: Arc<dyn Store>) -> RunningAgent {
    let host = Arc::new(MockHost::new());
    let policy = Arc::new(PolicyStore::with_persistence(store.clone()));
    let engine = Arc::new(
        PolicyEngine::new(
            policy,
            UsageAccounting::new(host.clone(), Duration::from_millis(200)),
            CategoryResolver::default(),
            TargetId::new("guardian-agentd"),
            Duration::from_secs(600),
        )
        .with_store(store.clone()),
    );
    let hub = Arc::new(EventHub::new());
    let config = AgentConfig {
        device_name: Some("Test device".into()),
        ..AgentConfig::default()
    };
    let service = Arc::new(AgentService::new(
        host,
        engine.clone(),
        store,
        hub.clone(),
        &config,
    ));

    let server = CommandServer::bind("127.0.0.1:0".parse().unwrap(), service, hub.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.serve(shutdown_rx));

    RunningAgent {
        addr,
        engine,
        hub,
        _shutdown: shutdown_tx,
    }
}

fn in_memory() -> Arc<dyn Store> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

#[tokio::test]
async fn pushed_rule_is_reported_and_enforced() {
    let agent = start_agent(in_memory()).await;
    let client = agent.client();

    let rule_set = RuleSet {
        rules: vec![Rule::new("x").blocked()],
        ..RuleSet::default()
    };
    let response = client.update_rules(rule_set).await.unwrap();
    assert_eq!(response.message.as_deref(), Some("Rules updated"));

    let stats = client.stats(false).await.unwrap();
    assert_eq!(stats.active_rules.len(), 1);
    assert_eq!(stats.active_rules[0].target, TargetId::new("x"));
    assert!(stats.active_rules[0].permanently_blocked);

    let decision = agent
        .engine
        .decide(&TargetId::new("x"), &guardian_util::now())
        .await;
    assert!(decision.is_block());
}

#[tokio::test]
async fn rules_survive_agent_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("guardian.db");

    {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).unwrap());
        let agent = start_agent(store).await;
        let rule_set = RuleSet {
            rules: vec![Rule::new("game").with_quota_ms(60_000)],
            ..RuleSet::default()
        };
        agent.client().update_rules(rule_set).await.unwrap();
    }

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path).unwrap());
    let restored = PolicyStore::with_persistence(store);
    let snapshot: Arc<PolicySnapshot> = restored.snapshot();
    let rule = snapshot.rule_for(&TargetId::new("game")).unwrap();
    assert_eq!(rule.daily_quota_ms, 60_000);
}

#[tokio::test]
async fn invalid_body_is_rejected_with_success_false() {
    let agent = start_agent(in_memory()).await;
    let http = reqwest::Client::new();

    for body in ["not json", r#"{"kind":"command","commandType":"LOCK_DEVICE"}"#] {
        let response = http
            .post(format!("http://{}/rules", agent.addr))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let reply: serde_json::Value = response.json().await.unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["message"], "Invalid command");
    }
}

async fn next_event<S>(stream: &mut S) -> Event
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no frame in time")
        .expect("stream ended")
        .expect("receive failed");
    let Message::Text(text) = frame else {
        panic!("expected a text frame");
    };
    match Packet::from_json(&text).unwrap() {
        Packet::Event(event) => event,
        other => panic!("expected an event, got {:?}", other),
    }
}

#[tokio::test]
async fn lock_change_reaches_every_subscriber() {
    let agent = start_agent(in_memory()).await;
    let url = format!("ws://{}/events", agent.addr);

    let (mut first, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut leaving, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    agent.wait_for_subscribers(3).await;

    // One controller leaves while the event is being fanned out
    let client = agent.client();
    let (response, _) = tokio::join!(client.set_lock(true), async move {
        let _ = leaving.close(None).await;
    });
    assert!(response.unwrap().success);

    for stream in [&mut first, &mut second] {
        let event = next_event(stream).await;
        assert_eq!(event.event_type, EventType::LockStatusChanged);
        assert_eq!(event.locked(), Some(true));
    }
    agent.wait_for_subscribers(2).await;

    // The remaining sessions keep receiving
    client.set_lock(false).await.unwrap();
    for stream in [&mut first, &mut second] {
        assert_eq!(next_event(stream).await.locked(), Some(false));
    }

    first.send(Message::Close(None)).await.ok();
    second.send(Message::Close(None)).await.ok();
}

#[tokio::test]
async fn ping_answers_pong() {
    let agent = start_agent(in_memory()).await;
    assert_eq!(agent.client().ping().await.unwrap(), "Pong");
}
