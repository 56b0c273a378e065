//! Tool discovery against a scripted MCP server.
//!
//! The fake server is a small shell loop: it answers every `tools/list`
//! request with the next page, echoing the request id, and emits a
//! notification before each answer.

use bridge_core::discovery::list_backend_tools;
use bridge_core::relay::{self, RelayConfig, RelayServer};
use bridge_core::schema::{map_tools, TypeDef};
use bridge_core::{
    Backend, BackendConfig, BridgeError, CancellationToken, CommandSpec, StreamChannel,
    ToolDiscoveryClient,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

const FAKE_SERVER: &str = r#"
page=0
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  page=$((page + 1))
  echo '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
  case $page in
    1) printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"search","description":"Search","inputSchema":{"type":"object","properties":{"query":{"type":"string"},"limit":{"type":"integer"}},"required":["query"]}}],"nextCursor":"p2"}}\n' "$id" ;;
    2) printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"configure","inputSchema":{"type":"object","properties":{"settings":{"type":"object"}}}}],"nextCursor":"p3"}}\n' "$id" ;;
    *) printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"tag","inputSchema":{"type":"object","properties":{"labels":{"type":"array","items":{"type":"string","enum":["red","green"]}}}}}]}}\n' "$id" ;;
  esac
done
"#;

fn fake_server() -> CommandSpec {
    CommandSpec::new("sh").with_args(["-c", FAKE_SERVER])
}

#[tokio::test]
async fn test_discovers_all_pages_on_shared_backend() {
    let backend = Backend::start(BackendConfig::from_command(fake_server())).unwrap();
    let mut bystander = backend.subscribe().unwrap();

    let tools = tokio::time::timeout(WAIT, list_backend_tools(&backend, &CancellationToken::new()))
        .await
        .expect("discovery timed out")
        .unwrap();

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "configure", "tag"]);

    // Other subscribers see the same traffic, notifications included.
    let first = bystander.recv().await.unwrap();
    assert!(first.starts_with(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\""));

    let mapped = map_tools(&tools);
    assert_eq!(mapped.functions.len(), 2);
    assert_eq!(mapped.failures.len(), 1);
    assert_eq!(mapped.failures[0].0, "configure");

    let search = &mapped.functions[0];
    assert_eq!(search.args.len(), 2);
    assert_eq!(search.args[1].name, "query");
    assert!(!search.args[1].optional);

    let tag = &mapped.functions[1];
    assert_eq!(
        tag.args[0].type_def,
        TypeDef::List {
            item: Box::new(TypeDef::Enum {
                name: "LabelsItem".to_string(),
                values: vec!["red".to_string(), "green".to_string()],
            })
        }
    );
}

#[tokio::test]
async fn test_discovers_through_tcp_relay() {
    let server = RelayServer::start("127.0.0.1:0", RelayConfig::new(fake_server()))
        .await
        .unwrap();
    let stream = relay::connect(&server.addr().to_string(), 0).await.unwrap();
    let (reader, writer) = stream.into_split();

    let mut client = ToolDiscoveryClient::new(StreamChannel::new(reader, writer, 1024 * 1024))
        .with_page_timeout(WAIT);
    let tools = client.list_tools(&CancellationToken::new()).await.unwrap();

    assert_eq!(tools.len(), 3);
    assert_eq!(tools[0].required_fields().len(), 1);
}

#[tokio::test]
async fn test_backend_exit_during_discovery() {
    let config = BackendConfig::new("sh").with_args(["-c", "read line; exit 0"]);
    let backend = Backend::start(config).unwrap();

    let result = tokio::time::timeout(WAIT, list_backend_tools(&backend, &CancellationToken::new()))
        .await
        .expect("discovery should notice the exit");
    assert!(matches!(result, Err(BridgeError::BackendClosed)));
}

#[tokio::test]
async fn test_oversized_reply_on_shared_backend_fails() {
    // Answers the first request with a ~300 byte line, then stays alive.
    let script = r#"read -r line; printf '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"%0300d"}]}}\n' 0; read -r line"#;
    let config = BackendConfig::new("sh")
        .with_args(["-c", script])
        .with_max_line_bytes(128);
    let backend = Backend::start(config).unwrap();

    let mut client = ToolDiscoveryClient::for_backend(&backend)
        .unwrap()
        .with_max_message_bytes(128);
    let result = tokio::time::timeout(WAIT, client.list_tools(&CancellationToken::new()))
        .await
        .expect("oversized reply should fail discovery");

    match result {
        Err(BridgeError::OversizedMessage { size, limit }) => {
            assert!(size > 128);
            assert_eq!(limit, 128);
        }
        other => panic!("Expected OversizedMessage, got: {:?}", other),
    }
}
