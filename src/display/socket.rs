// src/display/socket.rs
//! Overlay control over a TCP socket
//!
//! Requests and responses are single JSON objects, one per line:
//!
//! ```text
//! → {"op":"auth","password":"..."}                 (once per connection)
//! → {"op":"set_visible","source":"active3","visible":true}
//! ← {"ok":true}
//! → {"op":"list_items"}
//! ← {"ok":true,"items":[{"name":"active3","id":7}]}
//! ← {"ok":false,"error":"unknown source"}
//! ```
//!
//! The connection is opened lazily and dropped on any error, so the next
//! call reconnects.

use crate::display::{DisplayController, SceneItem};
use crate::utils::errors::{EngineError, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Auth { password: &'a str },
    SetVisible { source: &'a str, visible: bool },
    ListItems,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    items: Vec<SceneItem>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn roundtrip(&mut self, request: &Request<'_>) -> Result<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply).await?;
        if read == 0 {
            return Err(EngineError::Display("connection closed by peer".to_string()));
        }

        let response: Response = serde_json::from_str(reply.trim())?;
        if !response.ok {
            return Err(EngineError::Display(
                response
                    .error
                    .unwrap_or_else(|| "request rejected".to_string()),
            ));
        }
        Ok(response)
    }
}

/// Display controller speaking line-delimited JSON over TCP
pub struct SocketDisplay {
    addr: String,
    password: Option<String>,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl SocketDisplay {
    pub fn new(host: &str, port: u16, password: Option<String>, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            password,
            timeout,
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection> {
        debug!(addr = %self.addr, "connecting to display socket");
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| EngineError::Display(format!("connect to {} timed out", self.addr)))??;

        let (read, write) = stream.into_split();
        let mut connection = Connection {
            reader: BufReader::new(read),
            writer: write,
        };

        if let Some(password) = &self.password {
            connection
                .roundtrip(&Request::Auth {
                    password: password.as_str(),
                })
                .await?;
        }

        info!(addr = %self.addr, "display socket connected");
        Ok(connection)
    }

    async fn call(&self, request: Request<'_>) -> Result<Response> {
        let mut guard = self.connection.lock().await;

        let result = tokio::time::timeout(self.timeout, async {
            if guard.is_none() {
                *guard = Some(self.connect().await?);
            }
            match guard.as_mut() {
                Some(connection) => connection.roundtrip(&request).await,
                None => Err(EngineError::Display("not connected".to_string())),
            }
        })
        .await
        .unwrap_or_else(|_| Err(EngineError::Display("request timed out".to_string())));

        if result.is_err() {
            *guard = None;
        }
        result
    }
}

impl DisplayController for SocketDisplay {
    fn set_visible<'a>(&'a self, source: &'a str, visible: bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.call(Request::SetVisible { source, visible }).await?;
            Ok(())
        })
    }

    fn list_scene_items(&self) -> BoxFuture<'_, Result<Vec<SceneItem>>> {
        Box::pin(async move { Ok(self.call(Request::ListItems).await?.items) })
    }
}
