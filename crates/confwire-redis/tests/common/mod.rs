//! In-process RESP server speaking just enough Redis for reader tests.
//!
//! Answers CONFIG GET/SET, GET, HGET and PSUBSCRIBE. Everything else gets
//! `+OK`. Hash fields are stored under `key#field`.

use confwire_core::CancellationToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// What a lookup answers.
#[derive(Debug, Clone)]
enum Entry {
    Value(Vec<u8>),
    ServerError(String),
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, Entry>,
    notify_flags: String,
    commands: HashMap<String, usize>,
}

struct Shared {
    store: Mutex<Store>,
    changes: broadcast::Sender<String>,
    /// Cancelled to hang up on every current pubsub connection
    subscribers: Mutex<CancellationToken>,
}

/// A fake Redis listening on an ephemeral local port.
pub struct FakeRedis {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (changes, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            store: Mutex::new(Store::default()),
            changes,
            subscribers: Mutex::new(CancellationToken::new()),
        });
        let shutdown = CancellationToken::new();

        let accept_shared = shared.clone();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => break,
                    },
                };
                tokio::spawn(serve(stream, accept_shared.clone()));
            }
        });

        Self {
            addr,
            shared,
            shutdown,
        }
    }

    /// Reader URI for `key` with an optional query string such as `?timeout=1s`.
    pub fn uri(&self, key: &str, query: &str) -> String {
        format!("redis://{}/{}{}", self.addr, key, query)
    }

    pub fn set(&self, key: &str, value: &str) {
        self.shared
            .store
            .lock()
            .entries
            .insert(key.to_string(), Entry::Value(value.as_bytes().to_vec()));
    }

    /// Answer lookups of `key` with an error reply such as `WRONGTYPE ...`.
    pub fn set_error(&self, key: &str, message: &str) {
        self.shared
            .store
            .lock()
            .entries
            .insert(key.to_string(), Entry::ServerError(message.to_string()));
    }

    /// Publish a `set` keyspace event for `key` to every pubsub connection.
    pub fn notify(&self, key: &str) {
        let _ = self.shared.changes.send(format!("__keyspace@0__:{}", key));
    }

    /// Hang up on every pubsub connection, as a server restart would.
    pub fn drop_subscribers(&self) {
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.cancel();
        *subscribers = CancellationToken::new();
    }

    /// How many times `command` was received.
    pub fn count(&self, command: &str) -> usize {
        self.shared
            .store
            .lock()
            .commands
            .get(command)
            .copied()
            .unwrap_or(0)
    }

    pub fn notify_flags(&self) -> String {
        self.shared.store.lock().notify_flags.clone()
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.shared.subscribers.lock().cancel();
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    while let Some(command) = read_command(&mut reader).await {
        let Some(name) = command.first().map(|c| c.to_ascii_uppercase()) else {
            return;
        };
        *shared
            .store
            .lock()
            .commands
            .entry(name.clone())
            .or_default() += 1;
        let arg = |i: usize| command.get(i).cloned().unwrap_or_default();

        let reply = match name.as_str() {
            "PSUBSCRIBE" => {
                let pattern = arg(1);
                let hangup = shared.subscribers.lock().clone();
                let changes = shared.changes.subscribe();
                let confirm = array(&[bulk(b"psubscribe"), bulk(pattern.as_bytes()), b":1\r\n".to_vec()]);
                if write.write_all(&confirm).await.is_err() {
                    return;
                }
                follow(reader, write, pattern, changes, hangup).await;
                return;
            }
            "GET" => lookup(&shared, &arg(1)),
            "HGET" => lookup(&shared, &format!("{}#{}", arg(1), arg(2))),
            "CONFIG" if arg(1).eq_ignore_ascii_case("GET") => {
                let flags = shared.store.lock().notify_flags.clone();
                array(&[bulk(arg(2).as_bytes()), bulk(flags.as_bytes())])
            }
            "CONFIG" if arg(1).eq_ignore_ascii_case("SET") => {
                shared.store.lock().notify_flags = arg(3);
                b"+OK\r\n".to_vec()
            }
            "PING" => b"+PONG\r\n".to_vec(),
            _ => b"+OK\r\n".to_vec(),
        };
        if write.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Push keyspace events until hung up. Dropping both halves closes the socket.
async fn follow(
    mut reader: BufReader<OwnedReadHalf>,
    mut write: OwnedWriteHalf,
    pattern: String,
    mut changes: broadcast::Receiver<String>,
    hangup: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = hangup.cancelled() => return,
            command = read_command(&mut reader) => {
                if command.is_none() {
                    return;
                }
            }
            change = changes.recv() => match change {
                Ok(channel) => {
                    let message = array(&[
                        bulk(b"pmessage"),
                        bulk(pattern.as_bytes()),
                        bulk(channel.as_bytes()),
                        bulk(b"set"),
                    ]);
                    if write.write_all(&message).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

fn lookup(shared: &Shared, key: &str) -> Vec<u8> {
    match shared.store.lock().entries.get(key) {
        Some(Entry::Value(value)) => bulk(value),
        Some(Entry::ServerError(message)) => format!("-{}\r\n", message).into_bytes(),
        None => b"$-1\r\n".to_vec(),
    }
}

fn bulk(value: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", value.len()).into_bytes();
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
    out
}

fn array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end().to_string()),
    }
}

/// One client command: an array of bulk strings.
async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<Vec<String>> {
    let count: usize = read_line(reader).await?.strip_prefix('*')?.parse().ok()?;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_line(reader).await?.strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        parts.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Some(parts)
}
