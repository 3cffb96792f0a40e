//! Integration tests against a live Asterisk instance.
//!
//! These tests require AMI on 127.0.0.1:5038 with a manager user `crm`,
//! secret `crm`, and read/write permissions for `call,agent,system,command`.
//! Run with: cargo test --test live_asterisk -- --ignored

use asterisk_ami_tokio::{
    Action, AmiClient, AmiListener, ConnectOptions, HandlerRegistry, ListenerConfig,
    ListenerState,
};
use std::time::Duration;
use tokio::time::timeout;

const AMI_HOST: &str = "127.0.0.1";
const AMI_PORT: u16 = 5038;
const AMI_USER: &str = "crm";
const AMI_SECRET: &str = "crm";

async fn connect() -> AmiClient {
    let options = ConnectOptions {
        action_timeout: Some(Duration::from_secs(10)),
        ..ConnectOptions::default()
    };
    let mut client = AmiClient::connect_with_options(AMI_HOST, AMI_PORT, options)
        .await
        .expect("failed to connect to Asterisk");
    assert!(client
        .login(AMI_USER, AMI_SECRET)
        .await
        .unwrap());
    client
}

#[tokio::test]
#[ignore]
async fn live_greeting_and_ping() {
    let mut client = connect().await;
    assert!(client
        .greeting()
        .unwrap_or_default()
        .starts_with("Asterisk Call Manager"));

    let pong = client
        .ping()
        .await
        .unwrap();
    assert!(pong.is_success(), "{:?}", pong);
    client
        .disconnect()
        .await;
}

#[tokio::test]
#[ignore]
async fn live_wrong_secret_rejected() {
    let mut client = AmiClient::connect(AMI_HOST, AMI_PORT)
        .await
        .unwrap();
    assert!(!client
        .login(AMI_USER, "definitely-wrong")
        .await
        .unwrap());
}

#[tokio::test]
#[ignore]
async fn live_core_show_channels_list() {
    let mut client = connect().await;
    let channels = client
        .collect_events(Action::core_show_channels())
        .await
        .unwrap();
    for channel in &channels {
        assert_eq!(channel.event(), Some("CoreShowChannel"));
    }
    client
        .disconnect()
        .await;
}

#[tokio::test]
#[ignore]
async fn live_command_output() {
    let mut client = connect().await;
    let reply = client
        .command("core show version")
        .await
        .unwrap();
    assert!(reply.is_response(), "{:?}", reply);
    client
        .disconnect()
        .await;
}

#[tokio::test]
#[ignore]
async fn live_listener_reaches_listening_and_stops() {
    let config = ListenerConfig {
        read_timeout: Duration::from_secs(1),
        event_mask: Some("call,agent".into()),
        ..ListenerConfig::new(AMI_HOST, AMI_USER, AMI_SECRET)
    };
    let listener = AmiListener::new(config, HandlerRegistry::new());
    let stop = listener.stop_handle();
    let mut states = listener.subscribe_state();
    let run = tokio::spawn(listener.run());

    timeout(Duration::from_secs(10), async {
        while *states.borrow_and_update() != ListenerState::Listening {
            states
                .changed()
                .await
                .unwrap();
        }
    })
    .await
    .expect("listener never reached Listening");

    stop.stop();
    let stats = timeout(Duration::from_secs(5), run)
        .await
        .expect("listener ignored stop")
        .unwrap();
    assert_eq!(stats.sessions, 1);
}
