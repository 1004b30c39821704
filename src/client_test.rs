use std::sync::{Arc, Mutex};

use super::*;
use frames::ALL_CHANNELS;
use serde_json::json;

// =============================================================================
// Helpers
// =============================================================================

/// Transport that records every call instead of touching the network.
#[derive(Debug, Default)]
struct Recorder {
    opens: Vec<String>,
    closes: usize,
    sent: Vec<String>,
}

impl Transport for Recorder {
    fn open(&mut self, url: &str) {
        self.opens.push(url.to_owned());
    }

    fn close(&mut self) {
        self.closes += 1;
    }

    fn send(&mut self, text: String) {
        self.sent.push(text);
    }
}

fn config() -> ClientConfig {
    let mut config = ClientConfig::new("ws://comet.test/ws").unwrap();
    config.auto_open = false;
    config
}

fn closed_client() -> Client<Recorder> {
    Client::new(config(), Recorder::default())
}

fn open_client() -> Client<Recorder> {
    let mut client = closed_client();
    client.open();
    client.handle_transport_event(TransportEvent::Open);
    client
}

fn sent(client: &Client<Recorder>) -> Vec<&str> {
    client.transport().sent.iter().map(String::as_str).collect()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

type Seen = Arc<Mutex<Vec<Event>>>;

fn record(client: &mut Client<Recorder>, key: EventKey) -> (Seen, HandlerId) {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let id = client.on(key, move |event| sink.lock().unwrap().push(event.clone())).unwrap();
    (seen, id)
}

fn deliver(client: &mut Client<Recorder>, text: &str) {
    client.handle_transport_event(TransportEvent::Message(text.to_owned()));
}

// =============================================================================
// Connection state
// =============================================================================

#[test]
fn auto_open_connects_on_construction() {
    let mut config = config();
    config.auto_open = true;
    let client = Client::new(config, Recorder::default());

    assert_eq!(client.transport().opens, ["ws://comet.test/ws"]);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[test]
fn open_waits_for_transport_before_reporting_open() {
    let mut client = closed_client();
    let (opened, _) = record(&mut client, EventKey::Open);

    client.open();
    assert!(!client.is_open());
    assert!(opened.lock().unwrap().is_empty());

    client.handle_transport_event(TransportEvent::Open);
    assert!(client.is_open());
    assert_eq!(opened.lock().unwrap().len(), 1);

    client.handle_transport_event(TransportEvent::Open);
    assert_eq!(opened.lock().unwrap().len(), 1);
}

#[test]
fn open_while_open_does_not_reconnect() {
    let mut client = open_client();
    client.open();
    assert_eq!(client.transport().opens.len(), 1);
}

#[test]
fn close_marks_force_closed_and_closes_transport() {
    let mut client = open_client();
    let (closed, _) = record(&mut client, EventKey::Close);

    client.close();
    assert!(client.is_force_closed());
    assert_eq!(client.transport().closes, 1);

    client.handle_transport_event(TransportEvent::Close);
    client.handle_transport_event(TransportEvent::Close);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(closed.lock().unwrap().len(), 1);

    client.open();
    assert!(!client.is_force_closed());
    assert_eq!(client.transport().opens.len(), 2);
}

#[test]
fn close_while_closed_does_not_touch_transport() {
    let mut client = closed_client();
    client.close();
    assert!(client.is_force_closed());
    assert_eq!(client.transport().closes, 0);
}

#[test]
fn peer_close_is_not_force_closed() {
    let mut client = open_client();
    client.handle_transport_event(TransportEvent::Close);
    assert!(!client.is_open());
    assert!(!client.is_force_closed());
}

#[test]
fn station_ids_are_per_instance() {
    let a = closed_client();
    let b = closed_client();
    assert_ne!(a.station_id(), b.station_id());
}

#[test]
fn connection_state_serializes_lowercase() {
    assert_eq!(serde_json::to_value(ConnectionState::Open).unwrap(), json!("open"));
    assert_eq!(serde_json::to_value(ConnectionState::Closed).unwrap(), json!("closed"));
}

#[test]
fn set_server_url_applies_to_next_open() {
    let mut client = closed_client();
    client.set_server_url("//other.test/ws").unwrap();
    assert_eq!(client.server_url(), "http://other.test/ws");

    client.open();
    assert_eq!(client.transport().opens, ["http://other.test/ws"]);
}

#[test]
fn set_server_url_rejects_blank() {
    let mut client = closed_client();
    assert!(matches!(client.set_server_url("  "), Err(ConfigError::MissingServerUrl)));
    assert_eq!(client.server_url(), "ws://comet.test/ws");
}

// =============================================================================
// Channels
// =============================================================================

#[test]
fn send_while_closed_makes_no_transport_call() {
    let mut client = closed_client();
    client.send("chat", json!({"text": "hi"})).unwrap();
    assert!(client.transport().sent.is_empty());
}

#[test]
fn send_encodes_json_and_text_payloads() {
    let mut client = open_client();
    client.send("chat", json!({"text": "hi"})).unwrap();
    client.send("chat", "plain words").unwrap();

    assert_eq!(sent(&client), [r#"channel chat {"text":"hi"}"#, "channel chat plain words"]);
}

#[test]
fn subscribe_sends_once_per_channel() {
    let mut client = open_client();
    client.subscribe("room1").unwrap();
    client.subscribe("room1").unwrap();
    client.unsubscribe("room1").unwrap();
    client.unsubscribe("room1").unwrap();

    assert_eq!(sent(&client), ["subscribe room1", "unsubscribe room1"]);
    assert!(client.subscriptions().is_empty());
}

#[test]
fn invalid_names_are_rejected() {
    let mut client = open_client();

    assert!(matches!(client.subscribe(""), Err(ClientError::InvalidChannel(_))));
    assert!(matches!(client.unsubscribe("a b"), Err(ClientError::InvalidChannel(_))));
    assert!(matches!(client.send("a\tb", "x"), Err(ClientError::InvalidChannel(_))));
    assert!(matches!(client.on(EventKey::channel(""), |_| {}), Err(ClientError::InvalidChannel(_))));
    assert!(matches!(client.request("user get", Map::new()), Err(ClientError::InvalidRoute(_))));
    assert!(client.transport().sent.is_empty());
    assert_eq!(client.pending_requests(), 0);
}

#[test]
fn subscriptions_made_while_closed_are_sent_on_open() {
    let mut client = closed_client();
    client.subscribe("room1").unwrap();
    assert!(client.transport().sent.is_empty());

    client.handle_transport_event(TransportEvent::Open);
    assert_eq!(sent(&client), ["subscribe room1"]);
}

#[test]
fn reconnect_replays_subscriptions_in_order_once() {
    let mut client = open_client();
    client.subscribe("b").unwrap();
    client.subscribe("a").unwrap();
    client.subscribe("c").unwrap();
    client.transport_mut().sent.clear();

    client.handle_transport_event(TransportEvent::Close);
    client.handle_transport_event(TransportEvent::Open);

    assert_eq!(sent(&client), ["subscribe b", "subscribe a", "subscribe c"]);
    assert_eq!(client.subscriptions(), ["b", "a", "c"]);
}

#[test]
fn replay_happens_before_open_observers_run() {
    let mut client = closed_client();
    client.subscribe("room1").unwrap();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    for (key, label) in [(EventKey::Open, "open"), (EventKey::BeforeSend, "send")] {
        let sink = Arc::clone(&order);
        client.on(key, move |_| sink.lock().unwrap().push(label)).unwrap();
    }

    client.handle_transport_event(TransportEvent::Open);
    assert_eq!(sent(&client), ["subscribe room1"]);
    assert_eq!(*order.lock().unwrap(), ["send", "open"]);
}

#[test]
fn replay_disabled_keeps_set_but_sends_nothing() {
    let mut config = config();
    config.auto_subscribe_on_reconnect = false;
    let mut client = Client::new(config, Recorder::default());
    client.subscribe("room1").unwrap();

    client.handle_transport_event(TransportEvent::Open);
    assert!(client.transport().sent.is_empty());
    assert_eq!(client.subscriptions(), ["room1"]);
}

// =============================================================================
// Observers with wire effects
// =============================================================================

#[test]
fn two_wildcard_handlers_share_one_subscription() {
    let mut client = open_client();
    let first = client.on(EventKey::AllChannels, |_| {}).unwrap();
    let second = client.on(EventKey::AllChannels, |_| {}).unwrap();
    assert_eq!(sent(&client), [format!("subscribe {ALL_CHANNELS}")]);

    assert!(client.off(&EventKey::AllChannels, first));
    assert_eq!(client.transport().sent.len(), 1);

    assert!(client.off(&EventKey::AllChannels, second));
    assert_eq!(
        sent(&client),
        [format!("subscribe {ALL_CHANNELS}"), format!("unsubscribe {ALL_CHANNELS}")]
    );
    assert!(!client.has_handlers(&EventKey::AllChannels));
}

#[test]
fn channel_handler_keeps_subscription_while_another_remains() {
    let mut client = open_client();
    let first = client.on(EventKey::channel("room1"), |_| {}).unwrap();
    let second = client.on(EventKey::channel("room1"), |_| {}).unwrap();
    assert_eq!(sent(&client), ["subscribe room1"]);
    assert!(client.has_channel_handlers("room1"));

    client.off(&EventKey::channel("room1"), first);
    assert_eq!(client.subscriptions(), ["room1"]);

    client.off(&EventKey::channel("room1"), second);
    assert_eq!(sent(&client), ["subscribe room1", "unsubscribe room1"]);
    assert!(client.subscriptions().is_empty());
}

#[test]
fn off_with_unknown_id_has_no_wire_effect() {
    let mut client = open_client();
    let id = client.on(EventKey::channel("room1"), |_| {}).unwrap();
    client.off(&EventKey::channel("room1"), id);

    assert!(!client.off(&EventKey::channel("room1"), id));
    assert_eq!(client.transport().sent.len(), 2);
}

#[test]
fn off_all_unsubscribes_once() {
    let mut client = open_client();
    client.on(EventKey::AllChannels, |_| {}).unwrap();
    client.on(EventKey::AllChannels, |_| {}).unwrap();

    assert_eq!(client.off_all(&EventKey::AllChannels), 2);
    assert_eq!(client.off_all(&EventKey::AllChannels), 0);
    assert_eq!(
        sent(&client),
        [format!("subscribe {ALL_CHANNELS}"), format!("unsubscribe {ALL_CHANNELS}")]
    );
}

// =============================================================================
// Inbound dispatch
// =============================================================================

#[test]
fn channel_json_payload_reaches_params() {
    let mut client = open_client();
    let (seen, _) = record(&mut client, EventKey::channel("room1"));

    deliver(&mut client, r#"channel room1 {"x":1}"#);
    deliver(&mut client, "channel room1 hello");

    let seen = seen.lock().unwrap();
    assert_eq!(
        seen[0],
        Event::Channel(ChannelEvent { channel: "room1".into(), params: Some(json!({"x": 1})), message: None })
    );
    assert_eq!(
        seen[1],
        Event::Channel(ChannelEvent { channel: "room1".into(), params: None, message: Some("hello".into()) })
    );
}

#[test]
fn channel_observers_only_see_their_channel() {
    let mut client = open_client();
    let (seen, _) = record(&mut client, EventKey::channel("room1"));

    deliver(&mut client, "channel room2 hello");
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn dispatch_order_is_channel_then_wildcard_then_message() {
    let mut client = open_client();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    for (key, label) in [
        (EventKey::Message, "message"),
        (EventKey::AllChannels, "all"),
        (EventKey::channel("room1"), "room1"),
    ] {
        let sink = Arc::clone(&order);
        client.on(key, move |_| sink.lock().unwrap().push(label)).unwrap();
    }

    deliver(&mut client, "channel room1 hi");
    assert_eq!(*order.lock().unwrap(), ["room1", "all", "message"]);
}

#[test]
fn message_observers_see_raw_text_even_when_malformed() {
    let mut client = open_client();
    let (messages, _) = record(&mut client, EventKey::Message);
    let (channel, _) = record(&mut client, EventKey::AllChannels);

    deliver(&mut client, "channel room1 {broken");
    deliver(&mut client, "welcome");

    assert!(channel.lock().unwrap().is_empty());
    assert_eq!(
        *messages.lock().unwrap(),
        [
            Event::Message(MessageEvent { message: "channel room1 {broken".into() }),
            Event::Message(MessageEvent { message: "welcome".into() }),
        ]
    );
}

#[test]
fn before_send_rewrites_outbound_text() {
    let mut client = open_client();
    client
        .on(EventKey::BeforeSend, |event| {
            if let Event::BeforeSend(out) = event {
                out.message.push_str(" !");
            }
        })
        .unwrap();

    client.send("chat", "hi").unwrap();
    assert_eq!(sent(&client), ["channel chat hi !"]);
}

#[test]
fn before_send_fires_while_closed() {
    let mut client = closed_client();
    let (seen, _) = record(&mut client, EventKey::BeforeSend);

    client.send("chat", "hi").unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(client.transport().sent.is_empty());
}

// =============================================================================
// Requests
// =============================================================================

fn sent_action(client: &Client<Recorder>, index: usize) -> (String, Value) {
    let text = &client.transport().sent[index];
    let rest = text.strip_prefix("action ").unwrap();
    let (route, body) = rest.split_once(' ').unwrap();
    (route.to_owned(), serde_json::from_str(body).unwrap())
}

#[tokio::test]
async fn request_settles_with_matching_response() {
    let mut client = open_client();
    let (responses, _) = record(&mut client, EventKey::Request);

    let pending = client.request("user.get", object(json!({"id": 7}))).unwrap();
    let request_id = pending.request_id().to_owned();

    let (route, body) = sent_action(&client, 0);
    assert_eq!(route, "user.get");
    assert_eq!(body, json!({"id": 7, "requestId": request_id}));
    assert_eq!(client.pending_requests(), 1);

    deliver(&mut client, &format!(r#"action {{"requestId":"{request_id}","name":"Ann"}}"#));

    assert_eq!(pending.await.unwrap(), json!({"requestId": request_id, "name": "Ann"}));
    assert_eq!(client.pending_requests(), 0);
    let responses = responses.lock().unwrap();
    assert!(matches!(&responses[0], Event::Request(r) if r.route == "user.get" && r.params["name"] == "Ann"));
}

#[test]
fn unknown_response_settles_nothing() {
    let mut client = open_client();
    let (responses, _) = record(&mut client, EventKey::Request);
    let (messages, _) = record(&mut client, EventKey::Message);
    let _pending = client.request("user.get", Map::new()).unwrap();

    deliver(&mut client, r#"action {"requestId":"someone-else","name":"Bob"}"#);

    assert_eq!(client.pending_requests(), 1);
    assert!(responses.lock().unwrap().is_empty());
    assert_eq!(messages.lock().unwrap().len(), 1);
}

#[test]
fn before_request_can_add_params() {
    let mut client = open_client();
    client
        .on(EventKey::BeforeRequest, |event| {
            if let Event::BeforeRequest(request) = event {
                request.params.insert("token".into(), json!("abc"));
            }
        })
        .unwrap();

    let _pending = client.request("user.get", Map::new()).unwrap();
    let (_, body) = sent_action(&client, 0);
    assert_eq!(body["token"], "abc");
}

#[test]
fn removed_request_id_is_restored() {
    let mut client = open_client();
    client
        .on(EventKey::BeforeRequest, |event| {
            if let Event::BeforeRequest(request) = event {
                request.params.clear();
            }
        })
        .unwrap();

    let pending = client.request("user.get", object(json!({"id": 7}))).unwrap();
    let (_, body) = sent_action(&client, 0);
    assert_eq!(body, json!({"requestId": pending.request_id()}));
}

#[test]
fn request_id_chosen_by_observer_is_used() {
    let mut client = open_client();
    client
        .on(EventKey::BeforeRequest, |event| {
            if let Event::BeforeRequest(request) = event {
                request.params.insert(REQUEST_ID_KEY.into(), json!("custom-1"));
            }
        })
        .unwrap();

    let pending = client.request("user.get", Map::new()).unwrap();
    assert_eq!(pending.request_id(), "custom-1");
}

#[tokio::test]
async fn request_while_closed_is_tracked_but_not_sent() {
    let mut client = closed_client();
    let pending = client.request("user.get", Map::new()).unwrap();

    assert!(client.transport().sent.is_empty());
    assert_eq!(client.pending_requests(), 1);

    assert!(client.cancel_request(pending.request_id()));
    assert!(matches!(pending.await, Err(ClientError::RequestAbandoned { .. })));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn out_of_order_responses_settle_their_own_requests() {
    let mut client = open_client();
    let first = client.request("one", Map::new()).unwrap();
    let second = client.request("two", Map::new()).unwrap();
    let (first_id, second_id) = (first.request_id().to_owned(), second.request_id().to_owned());

    deliver(&mut client, &format!(r#"action {{"requestId":"{second_id}","n":2}}"#));
    deliver(&mut client, &format!(r#"action {{"requestId":"{first_id}","n":1}}"#));

    assert_eq!(first.await.unwrap()["n"], 1);
    assert_eq!(second.await.unwrap()["n"], 2);
}

#[test]
fn malformed_action_settles_nothing_but_reaches_message_observers() {
    let mut client = open_client();
    let (responses, _) = record(&mut client, EventKey::Request);
    let (messages, _) = record(&mut client, EventKey::Message);
    let _pending = client.request("user.get", Map::new()).unwrap();

    deliver(&mut client, "action {broken");

    assert_eq!(client.pending_requests(), 1);
    assert!(responses.lock().unwrap().is_empty());
    assert_eq!(
        *messages.lock().unwrap(),
        [Event::Message(MessageEvent { message: "action {broken".into() })]
    );
}

// =============================================================================
// Handle
// =============================================================================

#[test]
fn observer_can_reopen_through_handle() {
    let mut client = open_client();
    let handle = client.handle();
    client.on(EventKey::Close, move |_| handle.open()).unwrap();

    client.handle_transport_event(TransportEvent::Close);

    assert_eq!(client.transport().opens.len(), 2);
    assert!(!client.is_force_closed());
}

#[test]
fn observer_commands_run_after_dispatch_in_order() {
    let mut client = open_client();
    let handle = client.handle();
    client
        .on(EventKey::channel("lobby"), move |event| {
            if let Event::Channel(publication) = event {
                handle.subscribe("room2").unwrap();
                handle.send("room2", publication.message.clone().unwrap_or_default()).unwrap();
                handle.unsubscribe("lobby").unwrap();
            }
        })
        .unwrap();
    let (all, _) = record(&mut client, EventKey::AllChannels);
    client.transport_mut().sent.clear();

    deliver(&mut client, "channel lobby hello");

    assert_eq!(all.lock().unwrap().len(), 1);
    assert_eq!(sent(&client), ["subscribe room2", "channel room2 hello", "unsubscribe lobby"]);
    assert_eq!(client.subscriptions(), [ALL_CHANNELS, "room2"]);
}

#[test]
fn observer_can_close_through_handle() {
    let mut client = open_client();
    let handle = client.handle();
    client.on(EventKey::Message, move |_| handle.close()).unwrap();

    deliver(&mut client, "goodbye");

    assert!(client.is_force_closed());
    assert_eq!(client.transport().closes, 1);
}

#[test]
fn handle_rejects_invalid_channels() {
    let client = closed_client();
    let handle = client.handle();
    assert!(matches!(handle.subscribe(""), Err(ClientError::InvalidChannel(_))));
    assert!(matches!(handle.send("a b", "x"), Err(ClientError::InvalidChannel(_))));
}

#[test]
fn commands_from_outside_observers_apply_on_next_event() {
    let mut client = open_client();
    let handle = client.handle();

    handle.subscribe("room1").unwrap();
    assert!(client.transport().sent.is_empty());

    deliver(&mut client, "ping");
    assert_eq!(sent(&client), ["subscribe room1"]);
}

#[test]
fn commands_queued_by_before_request_follow_the_action() {
    let mut client = open_client();
    let handle = client.handle();
    client.on(EventKey::BeforeRequest, move |_| handle.subscribe("audit").unwrap()).unwrap();

    let _pending = client.request("user.get", Map::new()).unwrap();

    let sent = sent(&client);
    assert!(sent[0].starts_with("action user.get "));
    assert_eq!(sent[1], "subscribe audit");
}
