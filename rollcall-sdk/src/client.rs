//! IRC client connection.
//!
//! This is the main entry point for SDK consumers. It manages the TCP
//! connection, IRC registration, CAP negotiation, and emits events.
//! Supports both plaintext and TLS connections.
//!
//! ## Reconnection
//!
//! The SDK does not implement automatic reconnection. A roll call is a single
//! run; consumers treat [`Event::Disconnected`] as the end of the stream.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

use crate::event::Event;
use crate::irc::Message;

/// Capabilities requested when the server offers them.
const WANTED_CAPS: &[&str] = &["message-tags", "server-time"];

/// Prefix of the PING tokens used as delivery barriers.
const CONFIRM_TOKEN_PREFIX: &str = "rollcall-confirm-";

/// Outcome of a confirmed send: `Err` carries the server's rejection text.
pub type Delivery = std::result::Result<(), String>;

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub realname: String,
    /// Use TLS.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "rollcall".to_string(),
            user: "rollcall".to_string(),
            realname: "roll-call bot".to_string(),
            tls: false,
            tls_insecure: false,
        }
    }
}

impl ConnectConfig {
    /// Host portion of `server_addr`.
    pub fn host(&self) -> &str {
        self.server_addr.split(':').next().unwrap_or("localhost")
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    Join(String),
    Privmsg { target: String, text: String },
    /// PRIVMSG followed by a PING barrier. `reply` resolves once the server
    /// answered the barrier, with any error numeric it sent for `target`.
    ConfirmedPrivmsg {
        target: String,
        text: String,
        reply: oneshot::Sender<Delivery>,
    },
    Raw(String),
    Quit(Option<String>),
}

/// A handle to a running IRC client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Build a handle around an existing command channel. Lets tests observe
    /// the commands a consumer issues without a live connection.
    pub fn from_sender(cmd_tx: mpsc::Sender<Command>) -> Self {
        Self { cmd_tx }
    }

    pub async fn join(&self, channel: &str) -> Result<()> {
        self.cmd_tx.send(Command::Join(channel.to_string())).await?;
        Ok(())
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Send a PRIVMSG and wait until the server has processed it.
    ///
    /// Servers handle a client's lines in order, so a rejection of the
    /// message (401, 404, ...) always arrives before the PONG for a PING
    /// written right after it. Fails on rejection or if the connection ends
    /// first. Callers bound the wait themselves.
    pub async fn privmsg_confirmed(&self, target: &str, text: &str) -> Result<()> {
        let (reply, delivered) = oneshot::channel();
        self.cmd_tx
            .send(Command::ConfirmedPrivmsg {
                target: target.to_string(),
                text: text.to_string(),
                reply,
            })
            .await?;
        match delivered.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => anyhow::bail!("server rejected message to {target}: {reason}"),
            Err(_) => anyhow::bail!("connection closed before delivery to {target} was confirmed"),
        }
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(|s| s.to_string())))
            .await?;
        Ok(())
    }

    pub async fn raw(&self, line: &str) -> Result<()> {
        self.cmd_tx.send(Command::Raw(line.to_string())).await?;
        Ok(())
    }

    /// Send a TAGMSG (tags-only, no body) to a target.
    pub async fn send_tagmsg(&self, target: &str, tags: HashMap<String, String>) -> Result<()> {
        let msg = Message {
            tags,
            prefix: None,
            command: "TAGMSG".to_string(),
            params: vec![target.to_string()],
        };
        self.raw(&msg.to_string()).await
    }

    /// Send a reaction emoji to a specific message.
    pub async fn react(&self, target: &str, emoji: &str, msgid: &str) -> Result<()> {
        let mut tags = HashMap::new();
        tags.insert("+draft/react".to_string(), emoji.to_string());
        tags.insert("+draft/reply".to_string(), msgid.to_string());
        self.send_tagmsg(target, tags).await
    }
}

/// Establish TCP (and optionally TLS) connection to the server.
///
/// Done before the protocol task starts so that connection errors surface
/// directly to the caller.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    // Auto-detect TLS from port if not explicitly set
    let use_tls = config.tls || config.server_addr.ends_with(":6697");
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {} failed: {e}", config.server_addr))?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if use_tls {
        let tls_config = if config.tls_insecure {
            tracing::debug!("TLS: insecure mode (skipping cert verification)");
            rustls_insecure_config()
        } else {
            rustls_default_config()
        };
        let connector = TlsConnector::from(Arc::new(tls_config));
        let dns_name = rustls::pki_types::ServerName::try_from(config.host().to_string())?;
        let tls_stream = connector
            .connect(dns_name, tcp)
            .await
            .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", config.server_addr))?;
        tracing::debug!("TLS handshake complete");
        Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
    } else {
        Ok(EstablishedConnection::Plain(tcp))
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Connect using an already-established connection.
///
/// Returns a handle for sending commands and a receiver for events.
/// The IRC protocol runs in a spawned task; the event channel closes when
/// that task ends.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let handle = ClientHandle { cmd_tx };

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
        };
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (handle, event_rx)
}

fn rustls_default_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(b"CAP LS 302\r\n").await?;
    writer
        .write_all(format!("NICK {}\r\n", config.nick).as_bytes())
        .await?;
    writer
        .write_all(format!("USER {} 0 * :{}\r\n", config.user, config.realname).as_bytes())
        .await?;
    writer.flush().await?;

    let mut registered = false;
    let mut nick_tries: u32 = 0;
    let mut pending_commands: Vec<Command> = Vec::new();
    let mut confirms = Confirmations::default();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut last_activity = tokio::time::Instant::now();
    let ping_interval = tokio::time::Duration::from_secs(60);
    let ping_timeout = tokio::time::Duration::from_secs(120);

    loop {
        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                let n = result?;
                if n == 0 {
                    let _ = event_tx.send(Event::Disconnected { reason: "EOF".to_string() }).await;
                    break;
                }

                last_activity = tokio::time::Instant::now();
                // Not every client sends UTF-8; a stray byte must not end the session.
                let line = String::from_utf8_lossy(&line_buf).into_owned();
                line_buf.clear();
                let _ = event_tx.send(Event::RawLine(line.trim_end().to_string())).await;

                if let Some(msg) = Message::parse(&line) {
                    match msg.command.as_str() {
                        // ERR_NICKNAMEINUSE
                        "433" if !registered => {
                            nick_tries = nick_tries.saturating_add(1);
                            if nick_tries <= 5 {
                                let alt = format!("{}{}", config.nick, nick_tries);
                                writer.write_all(format!("NICK {alt}\r\n").as_bytes()).await?;
                                writer.flush().await?;
                            } else {
                                let reason = "Nick in use".to_string();
                                let _ = event_tx.send(Event::Disconnected { reason }).await;
                                break;
                            }
                        }
                        "CAP" => {
                            handle_cap_response(&msg, &mut writer).await?;
                        }
                        "001" => {
                            let nick = msg.params.first().cloned().unwrap_or_default();
                            let _ = event_tx.send(Event::Registered { nick }).await;
                            registered = true;
                            // Flush any commands that were queued before registration
                            for cmd in pending_commands.drain(..) {
                                execute_command(&mut writer, cmd, &mut confirms).await?;
                            }
                        }
                        "PING" => {
                            let token = msg.params.first().map(|s| s.as_str()).unwrap_or("");
                            writer.write_all(format!("PONG :{token}\r\n").as_bytes()).await?;
                            writer.flush().await?;
                        }
                        "PONG" => {
                            if let Some(token) = msg.params.last() {
                                confirms.resolve(token);
                            }
                        }
                        "ERROR" => {
                            let reason =
                                msg.params.last().cloned().unwrap_or_else(|| "ERROR".to_string());
                            let _ = event_tx.send(Event::Disconnected { reason }).await;
                            break;
                        }
                        "PRIVMSG" | "NOTICE" => {
                            if msg.params.len() >= 2 {
                                let prefix = msg.prefix.as_deref().unwrap_or("");
                                let is_server_notice =
                                    msg.command == "NOTICE" && !prefix.contains('!');
                                if is_server_notice {
                                    let text = msg.params[1].clone();
                                    let _ = event_tx.send(Event::ServerNotice { text }).await;
                                } else {
                                    let _ = event_tx.send(Event::Message {
                                        from: prefix.to_string(),
                                        target: msg.params[0].clone(),
                                        text: msg.params[1].clone(),
                                        tags: msg.tags.clone(),
                                    }).await;
                                }
                            }
                        }
                        "TAGMSG" => {
                            if let Some(target) = msg.params.first() {
                                let _ = event_tx.send(Event::TagMsg {
                                    from: msg.prefix.clone().unwrap_or_default(),
                                    target: target.clone(),
                                    tags: msg.tags.clone(),
                                }).await;
                            }
                        }
                        "FAIL" => {
                            let text = msg.params.join(" ");
                            let _ = event_tx.send(Event::ServerNotice { text }).await;
                        }
                        _ => {
                            // Surface server error numerics (4xx, 5xx) so the
                            // consumer can log failed sends.
                            if let Ok(num) = msg.command.parse::<u16>()
                                && (400..600).contains(&num)
                            {
                                let text = if msg.params.len() > 1 {
                                    msg.params[1..].join(" ")
                                } else {
                                    msg.params.join(" ")
                                };
                                if let Some(target) = msg.params.get(1) {
                                    let reason = msg.params.last().cloned().unwrap_or_default();
                                    confirms.reject(target, format!("{num} {reason}"));
                                }
                                let _ = event_tx.send(Event::ServerNotice { text }).await;
                            }
                        }
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Every handle dropped; nothing more can be sent.
                    break;
                };
                let is_quit = matches!(cmd, Command::Quit(_));
                if registered || is_quit {
                    execute_command(&mut writer, cmd, &mut confirms).await?;
                    if is_quit {
                        break;
                    }
                } else {
                    // Queue until registered
                    pending_commands.push(cmd);
                }
            }
            // Periodic client-to-server PING and timeout detection
            _ = tokio::time::sleep_until(last_activity + ping_interval) => {
                if last_activity.elapsed() > ping_timeout {
                    let reason = "Ping timeout".to_string();
                    let _ = event_tx.send(Event::Disconnected { reason }).await;
                    break;
                }
                writer.write_all(b"PING :keepalive\r\n").await?;
                writer.flush().await?;
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Sends awaiting their PING barrier, oldest first.
#[derive(Default)]
struct Confirmations {
    pending: Vec<PendingConfirm>,
    next_token: u64,
}

struct PendingConfirm {
    token: String,
    target: String,
    rejection: Option<String>,
    reply: oneshot::Sender<Delivery>,
}

impl Confirmations {
    /// Register a send to `target` and return the PING token that closes it.
    fn barrier(&mut self, target: String, reply: oneshot::Sender<Delivery>) -> String {
        self.next_token += 1;
        let token = format!("{CONFIRM_TOKEN_PREFIX}{}", self.next_token);
        self.pending.push(PendingConfirm {
            token: token.clone(),
            target,
            rejection: None,
            reply,
        });
        token
    }

    /// Attribute an error numeric to the oldest open send to `target`.
    fn reject(&mut self, target: &str, reason: String) {
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| p.rejection.is_none() && p.target.eq_ignore_ascii_case(target))
        {
            p.rejection = Some(reason);
        }
    }

    fn resolve(&mut self, token: &str) {
        let Some(pos) = self.pending.iter().position(|p| p.token == token) else {
            return;
        };
        let p = self.pending.remove(pos);
        let _ = p.reply.send(p.rejection.map_or(Ok(()), Err));
    }
}

/// Execute a single IRC command on the wire.
async fn execute_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    cmd: Command,
    confirms: &mut Confirmations,
) -> Result<()> {
    let line = match cmd {
        Command::Join(channel) => format!("JOIN {channel}\r\n"),
        Command::Privmsg { target, text } => format!("PRIVMSG {target} :{text}\r\n"),
        Command::ConfirmedPrivmsg { target, text, reply } => {
            let line = format!("PRIVMSG {target} :{text}\r\n");
            let token = confirms.barrier(target, reply);
            format!("{line}PING :{token}\r\n")
        }
        Command::Raw(line) => format!("{line}\r\n"),
        Command::Quit(Some(m)) => format!("QUIT :{m}\r\n"),
        Command::Quit(None) => "QUIT\r\n".to_string(),
    };
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_cap_response<W: AsyncWrite + Unpin>(msg: &Message, writer: &mut W) -> Result<()> {
    let subcmd = msg.params.get(1).map(|s| s.to_ascii_uppercase());
    match subcmd.as_deref() {
        Some("LS") => {
            let caps_str = msg.params.last().map(|s| s.as_str()).unwrap_or("");
            let offered: Vec<&str> = caps_str
                .split_whitespace()
                .map(|c| c.split('=').next().unwrap_or(c))
                .collect();
            let req_caps: Vec<&str> = WANTED_CAPS
                .iter()
                .copied()
                .filter(|cap| offered.contains(cap))
                .collect();
            if req_caps.is_empty() {
                writer.write_all(b"CAP END\r\n").await?;
            } else {
                let req = format!("CAP REQ :{}\r\n", req_caps.join(" "));
                writer.write_all(req.as_bytes()).await?;
            }
        }
        Some("ACK") | Some("NAK") => {
            writer.write_all(b"CAP END\r\n").await?;
        }
        _ => {}
    }
    writer.flush().await?;
    Ok(())
}
