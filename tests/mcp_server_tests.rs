//! End-to-end tests for the MCP transport against an in-memory world
//!
//! Run with: cargo test --test mcp_server_tests

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use world_avatar_mcp::events::EventBus;
use world_avatar_mcp::mcp::{McpServer, ToolDispatcher};
use world_avatar_mcp::session::{MockConnector, MockWorld, Position, SessionClient};
use world_avatar_mcp::SessionSettings;

struct Harness {
    world: Arc<MockWorld>,
    session: Arc<SessionClient>,
    tx: DuplexStream,
    rx: Lines<BufReader<DuplexStream>>,
    server: JoinHandle<anyhow::Result<()>>,
    next_id: u64,
}

impl Harness {
    fn start(world: MockWorld) -> Self {
        let world = Arc::new(world);
        let settings = SessionSettings {
            host: "localhost".into(),
            port: 25565,
            username: "MCPBot".into(),
            version: "1.21".into(),
            navigation: true,
            gateway: "127.0.0.1:0".into(),
        };
        let session = Arc::new(SessionClient::new(
            settings,
            Arc::new(MockConnector::new(world.clone())),
            EventBus::default(),
        ));
        let server = Arc::new(McpServer::new(Arc::new(ToolDispatcher::new(session.clone()))));

        let (client_in, server_out) = duplex(64 * 1024);
        let (server_in, client_out) = duplex(64 * 1024);
        let handle = tokio::spawn(server.serve(server_in, server_out));

        Self {
            world,
            session,
            tx: client_out,
            rx: BufReader::new(client_in).lines(),
            server: handle,
            next_id: 1,
        }
    }

    /// Start and complete the initialize handshake
    async fn ready(world: MockWorld) -> Self {
        let mut harness = Self::start(world);
        let init = harness
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "harness", "version": "0.1"}
                }),
            )
            .await;
        assert!(init.get("result").is_some(), "initialize failed: {init}");
        harness.notify("notifications/initialized").await;
        harness
    }

    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.tx.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = self.rx.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn notify(&mut self, method: &str) {
        self.send(json!({"jsonrpc": "2.0", "method": method})).await;
    }

    /// Send a request without waiting for its response
    async fn submit(&mut self, method: &str, params: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        id
    }

    async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.submit(method, params).await;
        let response = self.recv().await;
        assert_eq!(response["id"], id);
        response
    }

    async fn call(&mut self, tool: &str, arguments: Value) -> Value {
        self.request("tools/call", json!({"name": tool, "arguments": arguments}))
            .await
    }
}

fn text_of(response: &Value) -> &str {
    response["result"]["content"][0]["text"].as_str().unwrap_or_default()
}

fn is_error(response: &Value) -> bool {
    response["result"]["isError"].as_bool().unwrap_or(false)
}

#[tokio::test]
async fn test_tools_list_exposes_full_catalog() {
    let mut h = Harness::ready(MockWorld::new()).await;

    let response = h.request("tools/list", json!({})).await;
    let tools = response["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 21);

    let select = tools.iter().find(|t| t["name"] == "selectSlot").unwrap();
    assert_eq!(select["inputSchema"]["type"], "object");
    assert_eq!(select["inputSchema"]["required"], json!(["slot"]));

    let resources = h.request("resources/list", json!({})).await;
    assert_eq!(resources["result"]["resources"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_calls_before_connect_report_not_connected() {
    let mut h = Harness::ready(MockWorld::new()).await;

    let response = h.call("chat", json!({"message": "hello"})).await;
    assert!(is_error(&response));
    assert!(text_of(&response).starts_with("NotConnected:"));

    let response = h.call("getStatus", json!({})).await;
    assert!(text_of(&response).starts_with("NotConnected:"));
    assert!(h.world.chat_log().is_empty());
}

#[tokio::test]
async fn test_location_unavailable_before_connect() {
    let mut h = Harness::ready(MockWorld::new().with_position(Position::new(1.0, 64.0, 1.0))).await;

    let response = h
        .request("resources/read", json!({"uri": "world://avatar/location"}))
        .await;
    assert_eq!(response["error"]["code"], -32002);
    assert_eq!(response["error"]["data"]["kind"], "ResourceUnavailable");

    let status = h
        .request("resources/read", json!({"uri": "world://avatar/status"}))
        .await;
    assert_eq!(status["result"]["contents"][0]["text"], r#"{"connected":false}"#);
}

#[tokio::test]
async fn test_bad_slot_does_not_break_dispatcher() {
    let mut h = Harness::ready(MockWorld::new().with_item("stone", 64, 36)).await;
    h.session.connect().await.unwrap();

    let response = h.call("selectSlot", json!({"slot": 9})).await;
    assert_eq!(response["error"]["code"], -32602);
    assert_eq!(response["error"]["data"]["kind"], "InvalidArguments");

    let response = h.call("selectSlot", json!({"slot": 3})).await;
    assert!(!is_error(&response));
    assert_eq!(text_of(&response), "Selected slot 3");
    assert_eq!(h.world.selected_slot(), Some(3));
}

#[tokio::test]
async fn test_unknown_tool_is_method_not_found() {
    let mut h = Harness::ready(MockWorld::new()).await;

    let response = h.call("fly", json!({})).await;
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["error"]["data"]["kind"], "UnknownTool");
}

#[tokio::test]
async fn test_stop_following_cancels_pending_navigation() {
    let mut h = Harness::ready(MockWorld::new().with_position(Position::new(0.0, 64.0, 0.0))).await;
    h.session.connect().await.unwrap();

    let goto = h
        .submit(
            "tools/call",
            json!({"name": "goToPosition", "arguments": {"x": 10, "y": 64, "z": -3}}),
        )
        .await;
    h.world.wait_for_goal().await;

    let stop = h
        .submit("tools/call", json!({"name": "stopFollowing", "arguments": {}}))
        .await;

    let mut texts = std::collections::HashMap::new();
    for _ in 0..2 {
        let response = h.recv().await;
        let id = response["id"].as_u64().unwrap();
        texts.insert(id, text_of(&response).to_string());
    }
    assert!(texts[&goto].contains("cancelled"), "got {}", texts[&goto]);
    assert_eq!(texts[&stop], "Stopped following");

    let status = h.call("getStatus", json!({})).await;
    assert!(!is_error(&status));
    let body: Value = serde_json::from_str(text_of(&status)).unwrap();
    assert!(body.get("health").is_some());
}

#[tokio::test]
async fn test_chat_reaches_the_world() {
    let mut h = Harness::ready(MockWorld::new()).await;
    h.session.connect().await.unwrap();

    let response = h.call("chat", json!({"message": "hello there"})).await;
    assert_eq!(text_of(&response), "Message sent");
    assert_eq!(h.world.chat_log(), vec!["hello there".to_string()]);

    let response = h.call("chat", json!({})).await;
    assert_eq!(response["error"]["data"]["kind"], "InvalidArguments");
}

#[tokio::test]
async fn test_client_hangup_ends_server() {
    let h = Harness::ready(MockWorld::new()).await;
    let Harness { tx, rx, server, .. } = h;
    drop(tx);
    drop(rx);
    server.await.unwrap().unwrap();
}
