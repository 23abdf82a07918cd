//! Redis Streams implementation of the stream gateway.
//!
//! Reads through a consumer group (`XREADGROUP`) so several relay
//! instances share one input stream, and writes with `XADD`. Records are
//! carried as a JSON string in the `payload` field. Entries written by
//! producers that use flat fields instead are folded into a JSON object.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::RwLock;

use crate::ports::{StreamError, StreamGateway, StreamMessage};

const PAYLOAD_FIELD: &str = "payload";

/// Consumer-group settings for [`RedisStreams`].
#[derive(Debug, Clone)]
pub struct ConsumerGroup {
    pub group: String,
    pub consumer: String,
    pub block_ms: usize,
}

/// Blocking reads and writes use separate connections so a pending
/// `XREADGROUP ... BLOCK` never delays a publish.
#[derive(Clone)]
struct Connections {
    reader: MultiplexedConnection,
    writer: MultiplexedConnection,
}

impl Connections {
    async fn open(client: &redis::Client) -> Result<Self, StreamError> {
        let reader = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        let writer = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self { reader, writer })
    }
}

/// Redis Streams gateway.
///
/// A multiplexed connection that lost its socket stays broken, so
/// [`reconnect`](StreamGateway::reconnect) replaces both connections with
/// fresh ones opened from the stored client.
pub struct RedisStreams {
    client: redis::Client,
    connections: RwLock<Connections>,
    group: ConsumerGroup,
}

impl RedisStreams {
    /// Opens both connections from a URL.
    pub async fn connect(url: &str, group: ConsumerGroup) -> Result<Self, StreamError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let connections = Connections::open(&client).await?;
        Ok(Self {
            client,
            connections: RwLock::new(connections),
            group,
        })
    }

    async fn reader(&self) -> MultiplexedConnection {
        self.connections.read().await.reader.clone()
    }

    async fn writer(&self) -> MultiplexedConnection {
        self.connections.read().await.writer.clone()
    }
}

fn unavailable(e: redis::RedisError) -> StreamError {
    StreamError::Unavailable(e.to_string())
}

/// Decodes one stream entry into a JSON payload.
fn decode_entry(entry: &StreamId) -> JsonValue {
    if let Some(raw) = entry.get::<String>(PAYLOAD_FIELD) {
        return serde_json::from_str(&raw).unwrap_or(JsonValue::String(raw));
    }

    let mut object = Map::new();
    for (field, value) in &entry.map {
        if let Ok(text) = redis::from_redis_value::<String>(value) {
            let value = match serde_json::from_str::<JsonValue>(&text) {
                Ok(parsed @ (JsonValue::Number(_) | JsonValue::Object(_) | JsonValue::Array(_))) => {
                    parsed
                }
                _ => JsonValue::String(text),
            };
            object.insert(field.clone(), value);
        }
    }
    JsonValue::Object(object)
}

#[async_trait]
impl StreamGateway for RedisStreams {
    async fn reconnect(&self) -> Result<(), StreamError> {
        let fresh = Connections::open(&self.client).await?;
        *self.connections.write().await = fresh;
        tracing::debug!(group = %self.group.group, "Opened new Redis connections");
        Ok(())
    }

    async fn ensure_channel(&self, channel: &str) -> Result<(), StreamError> {
        let mut conn = self.writer().await;
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(channel)
            .arg(&self.group.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                tracing::info!(channel, group = %self.group.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn next_batch(&self, channel: &str, max: usize) -> Result<Vec<StreamMessage>, StreamError> {
        let mut conn = self.reader().await;
        let options = StreamReadOptions::default()
            .group(&self.group.group, &self.group.consumer)
            .count(max)
            .block(self.group.block_ms);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[channel], &[">"], &options)
            .await
            .map_err(|e: redis::RedisError| {
                if e.code() == Some("NOGROUP") {
                    StreamError::UnknownChannel(channel.to_string())
                } else {
                    unavailable(e)
                }
            })?;

        let messages = reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| {
                        let channel = key.key;
                        key.ids.into_iter().map(move |entry| StreamMessage {
                            payload: decode_entry(&entry),
                            id: entry.id,
                            channel: channel.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(messages)
    }

    async fn publish(&self, channel: &str, record: &JsonValue) -> Result<String, StreamError> {
        let payload =
            serde_json::to_string(record).map_err(|e| StreamError::Encoding(e.to_string()))?;
        let mut conn = self.writer().await;
        conn.xadd(channel, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(unavailable)
    }

    async fn ack(&self, channel: &str, ids: &[String]) -> Result<(), StreamError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer().await;
        conn.xack::<_, _, _, i64>(channel, &self.group.group, ids)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreams")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::broadcast;

    fn entry(fields: &[(&str, &str)]) -> StreamId {
        let map: HashMap<String, redis::Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), redis::Value::Data(v.as_bytes().to_vec())))
            .collect();
        StreamId {
            id: "1-0".to_string(),
            map,
        }
    }

    #[test]
    fn payload_field_is_parsed_as_json() {
        let decoded = decode_entry(&entry(&[("payload", r#"{"elementId":"e-1","quantity":2}"#)]));
        assert_eq!(decoded["elementId"], "e-1");
        assert_eq!(decoded["quantity"], 2);
    }

    #[test]
    fn flat_fields_are_folded_into_an_object() {
        let decoded = decode_entry(&entry(&[("id", "e-1"), ("area", "12.5"), ("ebkph", "C2.1")]));
        assert_eq!(decoded["id"], "e-1");
        assert_eq!(decoded["area"], 12.5);
        assert_eq!(decoded["ebkph"], "C2.1");
    }

    #[test]
    fn unparseable_payload_is_kept_as_string() {
        let decoded = decode_entry(&entry(&[("payload", "not json")]));
        assert_eq!(decoded, JsonValue::String("not json".into()));
    }

    /// Minimal RESP server: answers `+OK` to every command and drops all
    /// connections accepted so far when `kill` fires.
    struct FakeRedis {
        url: String,
        accepted: Arc<AtomicUsize>,
        kill: broadcast::Sender<()>,
    }

    /// Length of the first complete command frame in `buf`, if any.
    fn frame_len(buf: &[u8]) -> Option<usize> {
        fn line(buf: &[u8], from: usize) -> Option<(i64, usize)> {
            let end = buf[from..].windows(2).position(|w| w == b"\r\n")? + from;
            let n = std::str::from_utf8(&buf[from + 1..end]).ok()?.parse().ok()?;
            Some((n, end + 2))
        }

        let (args, mut at) = line(buf, 0)?;
        for _ in 0..args {
            let (len, start) = line(buf, at)?;
            at = start + len as usize + 2;
            if at > buf.len() {
                return None;
            }
        }
        Some(at)
    }

    async fn serve(mut socket: TcpStream, mut kill: broadcast::Receiver<()>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            tokio::select! {
                _ = kill.recv() => return,
                read = socket.read(&mut chunk) => {
                    let n = match read {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    while let Some(len) = frame_len(&buf) {
                        buf.drain(..len);
                        if socket.write_all(b"+OK\r\n").await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn fake_redis() -> FakeRedis {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let (kill, _) = broadcast::channel(1);

        let counter = accepted.clone();
        let killer = kill.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, killer.subscribe()));
            }
        });

        FakeRedis {
            url,
            accepted,
            kill,
        }
    }

    fn group() -> ConsumerGroup {
        ConsumerGroup {
            group: "cost-relay".into(),
            consumer: "test".into(),
            block_ms: 10,
        }
    }

    #[tokio::test]
    async fn reconnect_replaces_dropped_connections() {
        let server = fake_redis().await;
        let streams = RedisStreams::connect(&server.url, group()).await.unwrap();
        streams.ensure_channel("elements").await.unwrap();
        assert_eq!(server.accepted.load(Ordering::SeqCst), 2);

        server.kill.send(()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(streams.ensure_channel("elements").await.is_err());

        streams.reconnect().await.unwrap();
        streams.ensure_channel("elements").await.unwrap();

        assert_eq!(server.accepted.load(Ordering::SeqCst), 4);
    }
}
