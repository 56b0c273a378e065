//! Tool discovery over JSON-RPC (`tools/list` with pagination).
//!
//! The client is generic over an [`RpcChannel`]: either a private
//! subscription on a shared [`Backend`] or a plain byte stream such as a TCP
//! connection to a relay. Responses are matched by request id; everything
//! else on the channel (notifications, other clients' traffic, junk lines)
//! is skipped.

use crate::backend::Backend;
use crate::broadcast::Subscription;
use crate::cancel::CancellationToken;
use crate::codec::{Line, LineCodec};
use crate::config::DiscoveryDefaults;
use crate::error::{BridgeError, Result};
use crate::protocol::{
    list_tools_params, Envelope, JsonRpcRequest, ListToolsResult, Message, MessageKind, Tool,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, trace};

/// Largest id handed out. Kept within 2^53 so JavaScript servers, which
/// parse ids as doubles, echo them back unchanged.
const MAX_REQUEST_ID: u64 = (1 << 53) - 1;

/// A bidirectional line channel to a JSON-RPC server.
#[async_trait]
pub trait RpcChannel: Send {
    /// Write one framed message.
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Next line from the server. `BackendClosed` at end of stream.
    async fn next_line(&mut self) -> Result<Bytes>;
}

/// Channel over a shared backend: writes go to its stdin, reads come from a
/// subscription opened before the first write.
pub struct SubscriptionChannel {
    backend: Backend,
    subscription: Subscription,
}

impl SubscriptionChannel {
    pub fn open(backend: &Backend) -> Result<Self> {
        Ok(Self {
            subscription: backend.subscribe()?,
            backend: backend.clone(),
        })
    }
}

#[async_trait]
impl RpcChannel for SubscriptionChannel {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.backend.write(payload).await
    }

    async fn next_line(&mut self) -> Result<Bytes> {
        match self.subscription.recv_line().await {
            Some(Line::Complete(line)) => Ok(line),
            Some(Line::Oversized { size }) => Err(BridgeError::OversizedMessage {
                size,
                limit: self.backend.max_line_bytes(),
            }),
            None => Err(BridgeError::BackendClosed),
        }
    }
}

/// Channel over any reader/writer pair.
pub struct StreamChannel<R, W> {
    reader: FramedRead<R, LineCodec>,
    writer: W,
}

impl<R, W> StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, max_line_bytes: usize) -> Self {
        Self {
            reader: FramedRead::new(reader, LineCodec::new(max_line_bytes)),
            writer,
        }
    }
}

#[async_trait]
impl<R, W> RpcChannel for StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.writer
            .write_all(payload)
            .await
            .map_err(BridgeError::write)?;
        self.writer.flush().await.map_err(BridgeError::write)
    }

    async fn next_line(&mut self) -> Result<Bytes> {
        match self.reader.next().await {
            Some(Ok(Line::Complete(line))) => Ok(line),
            Some(Ok(Line::Oversized { size })) => Err(BridgeError::OversizedMessage {
                size,
                limit: self.reader.decoder().max_length(),
            }),
            Some(Err(e)) => Err(e.into()),
            None => Err(BridgeError::BackendClosed),
        }
    }
}

/// State of one `list_tools` call.
#[derive(Debug, Default)]
struct PendingRequest {
    used_ids: HashSet<u64>,
    tools: Vec<Tool>,
    cursor: Option<Value>,
}

impl PendingRequest {
    fn next_id(&mut self) -> u64 {
        let mut rng = rand::rng();
        loop {
            let id = rng.random_range(1..=MAX_REQUEST_ID);
            if self.used_ids.insert(id) {
                return id;
            }
        }
    }
}

/// Issues `tools/list` and assembles the complete catalogue.
pub struct ToolDiscoveryClient<C> {
    channel: C,
    max_message_bytes: usize,
    page_timeout: Option<Duration>,
}

impl ToolDiscoveryClient<SubscriptionChannel> {
    /// Discover tools on a shared backend.
    pub fn for_backend(backend: &Backend) -> Result<Self> {
        Ok(Self::new(SubscriptionChannel::open(backend)?))
    }
}

impl<C: RpcChannel> ToolDiscoveryClient<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            max_message_bytes: DiscoveryDefaults::MAX_MESSAGE_BYTES,
            page_timeout: None,
        }
    }

    /// Reject response lines longer than `limit` bytes.
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// Fail a page that takes longer than `timeout` to arrive.
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = Some(timeout);
        self
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Fetch every page of `tools/list` and return the tools in server order.
    ///
    /// Cancellation yields [`BridgeError::Cancelled`] and discards any pages
    /// already received.
    pub async fn list_tools(&mut self, cancel: &CancellationToken) -> Result<Vec<Tool>> {
        let mut pending = PendingRequest::default();
        let mut page_count = 0usize;

        loop {
            cancel.check()?;

            let id = pending.next_id();
            let request = JsonRpcRequest::new(
                id,
                DiscoveryDefaults::METHOD,
                Some(list_tools_params(pending.cursor.as_ref())),
            );
            self.channel.send(&request.to_line()?).await?;
            trace!("Sent tools/list id={} cursor={:?}", id, pending.cursor);

            let page = self.await_page(id, cancel).await?;
            page_count += 1;
            let next = page.continuation().cloned();
            pending.tools.extend(page.tools);

            match next {
                Some(cursor) => pending.cursor = Some(cursor),
                None => {
                    debug!(
                        "Discovered {} tools in {} page(s)",
                        pending.tools.len(),
                        page_count
                    );
                    return Ok(pending.tools);
                }
            }
        }
    }

    async fn await_page(&mut self, id: u64, cancel: &CancellationToken) -> Result<ListToolsResult> {
        let page_timeout = self.page_timeout;
        let scan = async {
            match page_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.scan_for(id)).await {
                    Ok(page) => page,
                    Err(_) => Err(BridgeError::Timeout(limit)),
                },
                None => self.scan_for(id).await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            page = scan => page,
        }
    }

    async fn scan_for(&mut self, id: u64) -> Result<ListToolsResult> {
        loop {
            let line = self.channel.next_line().await?;
            if line.len() > self.max_message_bytes {
                return Err(BridgeError::OversizedMessage {
                    size: line.len(),
                    limit: self.max_message_bytes,
                });
            }

            let Some(envelope) = Envelope::probe(&line) else {
                trace!("Skipping non-JSON line");
                continue;
            };
            if envelope.kind() != MessageKind::Response || envelope.id_u64() != Some(id) {
                continue;
            }

            if let Message::Response(response) = envelope.into_message(&line)? {
                return match response.into_result()? {
                    Some(result) => Ok(serde_json::from_value(result)?),
                    None => Ok(ListToolsResult::default()),
                };
            }
        }
    }
}

/// Discover tools on a shared backend in one call.
pub async fn list_backend_tools(
    backend: &Backend,
    cancel: &CancellationToken,
) -> Result<Vec<Tool>> {
    ToolDiscoveryClient::for_backend(backend)?
        .list_tools(cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Scripted server: answers each request with the next canned page,
    /// optionally preceded by noise lines.
    struct FakeServer {
        pages: VecDeque<Value>,
        noise: Vec<String>,
        outbox: VecDeque<Bytes>,
        sent: Vec<Value>,
    }

    impl FakeServer {
        fn new(pages: Vec<Value>) -> Self {
            Self {
                pages: pages.into(),
                noise: Vec::new(),
                outbox: VecDeque::new(),
                sent: Vec::new(),
            }
        }

        fn with_noise(mut self, noise: &[&str]) -> Self {
            self.noise = noise.iter().map(|s| s.to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl RpcChannel for FakeServer {
        async fn send(&mut self, payload: &[u8]) -> Result<()> {
            let request: Value = serde_json::from_slice(payload)?;
            let id = request["id"].clone();
            self.sent.push(request);

            for line in &self.noise {
                self.outbox.push_back(Bytes::from(format!("{}\n", line)));
            }
            if let Some(mut page) = self.pages.pop_front() {
                page["id"] = id;
                self.outbox.push_back(Bytes::from(format!("{}\n", page)));
            }
            Ok(())
        }

        async fn next_line(&mut self) -> Result<Bytes> {
            match self.outbox.pop_front() {
                Some(line) => Ok(line),
                None => std::future::pending().await,
            }
        }
    }

    fn page(tools: &[&str], cursor: Option<&str>) -> Value {
        let tools: Vec<Value> = tools
            .iter()
            .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
            .collect();
        let mut result = json!({ "tools": tools });
        if let Some(cursor) = cursor {
            result["nextCursor"] = json!(cursor);
        }
        json!({"jsonrpc": "2.0", "result": result})
    }

    fn names(tools: &[Tool]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_follows_cursors_across_pages() {
        let server = FakeServer::new(vec![
            page(&["a", "b"], Some("p2")),
            page(&["c"], Some("p3")),
            page(&["d"], None),
        ]);
        let mut client = ToolDiscoveryClient::new(server);

        let tools = client.list_tools(&CancellationToken::new()).await.unwrap();
        assert_eq!(names(&tools), vec!["a", "b", "c", "d"]);

        let server = client.into_inner();
        assert_eq!(server.sent.len(), 3);
        assert_eq!(server.sent[0]["params"], json!({}));
        assert_eq!(server.sent[1]["params"], json!({"cursor": "p2"}));
        assert_eq!(server.sent[2]["params"], json!({"cursor": "p3"}));

        let ids: HashSet<&Value> = server.sent.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_cursor_ends_listing() {
        let server = FakeServer::new(vec![page(&["only"], Some(""))]);
        let mut client = ToolDiscoveryClient::new(server);

        let tools = client.list_tools(&CancellationToken::new()).await.unwrap();
        assert_eq!(names(&tools), vec!["only"]);
        assert_eq!(client.into_inner().sent.len(), 1);
    }

    #[tokio::test]
    async fn test_skips_noise_and_foreign_responses() {
        let server = FakeServer::new(vec![page(&["real"], None)]).with_noise(&[
            "not json at all",
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"wrong"}]}}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
        ]);
        let mut client = ToolDiscoveryClient::new(server);

        let tools = client.list_tools(&CancellationToken::new()).await.unwrap();
        assert_eq!(names(&tools), vec!["real"]);
    }

    #[tokio::test]
    async fn test_error_response_aborts() {
        let server = FakeServer::new(vec![json!({
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "Method not found"}
        })]);
        let mut client = ToolDiscoveryClient::new(server);

        match client.list_tools(&CancellationToken::new()).await {
            Err(BridgeError::Protocol { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("Expected Protocol error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_cancelled() {
        // No pages: the client waits forever unless cancelled.
        let mut client = ToolDiscoveryClient::new(FakeServer::new(vec![]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), client.list_tools(&cancel))
            .await
            .expect("list_tools should observe cancellation");
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_page_timeout() {
        let mut client = ToolDiscoveryClient::new(FakeServer::new(vec![]))
            .with_page_timeout(Duration::from_millis(20));

        let result = client.list_tools(&CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_oversized_response_fails() {
        let server = FakeServer::new(vec![page(&["a-tool-with-a-long-name"], None)]);
        let mut client = ToolDiscoveryClient::new(server).with_max_message_bytes(16);

        let result = client.list_tools(&CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::OversizedMessage { limit: 16, .. })));
    }

    #[tokio::test]
    async fn test_stream_channel_end_of_stream_is_backend_closed() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client_side);
        drop(server_side);

        let mut channel = StreamChannel::new(reader, writer, 1024);
        assert!(matches!(
            channel.next_line().await,
            Err(BridgeError::BackendClosed)
        ));
    }

    #[test]
    fn test_request_ids_are_unique_and_bounded() {
        let mut pending = PendingRequest::default();
        let ids: HashSet<u64> = (0..100).map(|_| pending.next_id()).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| (1..=MAX_REQUEST_ID).contains(id)));
    }
}
