//! Transport provider that drives an external bridge process.
//!
//! Each `connect` spawns the platform's configured bridge command (a
//! Baileys or Telethon script, typically) and talks to it over stdio with
//! the line protocol in [`super::protocol`]. Replies are routed to waiting
//! requests by id; everything else is forwarded on the connection's event
//! stream. The event stream ends when the bridge's stdout closes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};

use msgdeck_core::transport::{
    BoxTransportSession, SignInOutcome, TransportConnection, TransportEvent, TransportProvider,
    TransportSession,
};
use msgdeck_types::account::{AccountKey, Platform};
use msgdeck_types::config::BridgeConfig;
use msgdeck_types::error::TransportError;
use msgdeck_types::message::{ChatSummary, SendReceipt};
use msgdeck_types::session::{AuthMethod, UserInfo};

use super::protocol::{
    BridgeCommand, BridgeRequest, Inbound, SignInReply, encode_request, parse_line,
};
use crate::filesystem::credential_dir;

/// Events buffered between the bridge and the session pump.
const EVENT_BUFFER: usize = 256;

type PendingReplies = DashMap<u64, oneshot::Sender<Result<serde_json::Value, TransportError>>>;

/// [`TransportProvider`] spawning one bridge process per connection.
#[derive(Debug, Clone)]
pub struct SubprocessTransportProvider {
    platform: Platform,
    bridge: BridgeConfig,
    session_dir: PathBuf,
}

impl SubprocessTransportProvider {
    /// `session_dir` is the credential root; each account's bridge gets
    /// its own subdirectory.
    pub fn new(platform: Platform, bridge: BridgeConfig, session_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            bridge,
            session_dir: session_dir.into(),
        }
    }
}

impl TransportProvider for SubprocessTransportProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn connect(
        &self,
        key: &AccountKey,
        method: AuthMethod,
    ) -> Result<TransportConnection, TransportError> {
        let auth_dir = credential_dir(&self.session_dir, key);
        tokio::fs::create_dir_all(&auth_dir).await.map_err(|e| {
            TransportError::Unavailable(format!(
                "cannot create {}: {e}",
                auth_dir.display()
            ))
        })?;

        let mut child = Command::new(&self.bridge.command)
            .args(&self.bridge.args)
            .envs(&self.bridge.env)
            .env("MSGDECK_PLATFORM", self.platform.as_str())
            .env("MSGDECK_SESSION_DIR", &auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Unavailable(format!(
                    "failed to spawn bridge '{}': {e}",
                    self.bridge.command
                ))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::Unavailable(
                "bridge stdio not captured".to_string(),
            ));
        };

        if let Some(stderr) = child.stderr.take() {
            let key = key.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(account = %key, "bridge: {line}");
                }
            });
        }

        tracing::info!(
            account = %key,
            command = %self.bridge.command,
            pid = ?child.id(),
            "spawned transport bridge"
        );

        let pending = Arc::new(PendingReplies::new());
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(read_loop(stdout, Arc::clone(&pending), events_tx, key.clone()));

        let session = BridgeSession {
            key: key.clone(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            timeout: Duration::from_secs(self.bridge.request_timeout_secs.max(1)),
        };

        let connect = BridgeCommand::Connect {
            phone_number: key.phone_number.clone(),
            method,
            session_dir: auth_dir.display().to_string(),
        };
        if let Err(e) = session.request(connect).await {
            session.close().await;
            return Err(match e {
                TransportError::CredentialRejected(m) => TransportError::CredentialRejected(m),
                other => TransportError::Unavailable(other.to_string()),
            });
        }

        Ok(TransportConnection {
            session: BoxTransportSession::new(session),
            events: events_rx,
        })
    }
}

/// Route bridge stdout until it closes. Dropping `events` on exit ends the
/// connection's event stream.
async fn read_loop(
    stdout: ChildStdout,
    pending: Arc<PendingReplies>,
    events: mpsc::Sender<TransportEvent>,
    key: AccountKey,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(Inbound::Response(response))) => match pending.remove(&response.id) {
                    Some((_, reply)) => {
                        let _ = reply.send(response.into_result());
                    }
                    None => {
                        tracing::debug!(account = %key, id = response.id, "reply for unknown request");
                    }
                },
                Ok(Some(Inbound::Event(event))) => {
                    // A closed receiver only means nobody is pumping
                    // events any more; replies still need routing.
                    let _ = events.send(event).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(account = %key, error = %e, "unparseable bridge line");
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(account = %key, error = %e, "bridge stdout read failed");
                break;
            }
        }
    }

    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, reply)) = pending.remove(&id) {
            let _ = reply.send(Err(TransportError::Closed));
        }
    }
    tracing::debug!(account = %key, "bridge stdout closed");
}

/// Command handle of one bridge process.
struct BridgeSession {
    key: AccountKey,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: Arc<PendingReplies>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl BridgeSession {
    async fn request(&self, command: BridgeCommand) -> Result<serde_json::Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        let line = encode_request(&BridgeRequest { id, command })
            .map_err(|e| TransportError::Other(format!("encode {name}: {e}")))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id, reply_tx);

        if let Err(e) = self.write_line(&line).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!(account = %self.key, request = name, "bridge request timed out");
                Err(TransportError::Timeout)
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| TransportError::Closed)?;
        stdin.flush().await.map_err(|_| TransportError::Closed)
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T, TransportError> {
    serde_json::from_value(value)
        .map_err(|e| TransportError::Other(format!("malformed {what} reply: {e}")))
}

#[derive(Deserialize)]
struct SendResult {
    message_id: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl TransportSession for BridgeSession {
    async fn send(&self, chat_id: &str, text: &str) -> Result<SendReceipt, TransportError> {
        let value = self
            .request(BridgeCommand::Send {
                chat_id: chat_id.to_string(),
                text: text.to_string(),
            })
            .await?;
        let result: SendResult = decode(value, "send")?;
        Ok(SendReceipt {
            message_id: result.message_id,
            timestamp: result.timestamp.unwrap_or_else(Utc::now),
        })
    }

    async fn list_chats(&self, limit: usize) -> Result<Vec<ChatSummary>, TransportError> {
        let value = self.request(BridgeCommand::ListChats { limit }).await?;
        let mut chats: Vec<ChatSummary> = decode(value, "list_chats")?;
        chats.truncate(limit);
        Ok(chats)
    }

    async fn submit_code(&self, code: &str) -> Result<SignInOutcome, TransportError> {
        let value = self
            .request(BridgeCommand::SubmitCode {
                code: code.to_string(),
            })
            .await?;
        Ok(match decode::<SignInReply>(value, "submit_code")? {
            SignInReply::Complete { user } => SignInOutcome::Complete(user),
            SignInReply::PasswordRequired { hint } => SignInOutcome::PasswordRequired { hint },
        })
    }

    async fn submit_password(&self, password: &str) -> Result<UserInfo, TransportError> {
        let value = self
            .request(BridgeCommand::SubmitPassword {
                password: password.to_string(),
            })
            .await?;
        if value.is_null() {
            return Ok(UserInfo::default());
        }
        decode(value, "submit_password")
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.request(BridgeCommand::Logout).await.map(|_| ())
    }

    async fn close(&self) {
        // Closing stdin first lets a well-behaved bridge exit on EOF.
        self.stdin.lock().await.take();
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(account = %self.key, error = %e, "bridge already exited");
            }
            tracing::debug!(account = %self.key, "bridge closed");
        }
    }
}
