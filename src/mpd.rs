//! [`Backend`] for the Music Player Daemon.
//!
//! Speaks MPD's line based text protocol over two connections: one for
//! commands, and one parked in `idle player` that watches for the current
//! song to finish. MPD drops connections that idle too long, so both are
//! re-established on demand.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::oneshot,
};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{Backend, BackendId, PlaybackState, Status, Tag},
    error::{Error, Result},
};

/// Default address of a local MPD.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:6600";

const GREETING: &str = "OK MPD ";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

type Subscribers = Arc<Mutex<Vec<oneshot::Sender<()>>>>;

/// Key/value pairs of a successful response.
type Response = Vec<(String, String)>;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let mut connection = Self {
            reader: BufReader::new(reader),
            writer,
        };

        let greeting = connection.read_line().await?;
        let version = greeting
            .strip_prefix(GREETING)
            .ok_or_else(|| Error::unavailable(format!("{address} is not mpd: {greeting}")))?;
        debug!("connected to mpd {version} at {address}");

        Ok(connection)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(Error::unavailable("mpd closed the connection"));
        }

        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn command(&mut self, command: &str, args: &[&str]) -> Result<Response> {
        let line = command_line(command, args);
        trace!("mpd <- {line}");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        let mut response = Vec::new();
        loop {
            let line = self.read_line().await?;
            trace!("mpd -> {line}");

            if line == "OK" {
                break Ok(response);
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                break Err(Error::failed_precondition(format!("{command}: {ack}")));
            }
            if let Some((key, value)) = line.split_once(": ") {
                response.push((key.to_string(), value.to_string()));
            }
        }
    }
}

/// Formats a command with quoted arguments.
fn command_line(command: &str, args: &[&str]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push_str(" \"");
        for chr in arg.chars() {
            if matches!(chr, '"' | '\\') {
                line.push('\\');
            }
            line.push(chr);
        }
        line.push('"');
    }
    line
}

fn value<'a>(response: &'a Response, key: &str) -> Option<&'a str> {
    response
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn parse_status(response: &Response) -> Result<PlaybackState> {
    let status = match value(response, "state") {
        Some("play") => Status::Play,
        Some("pause") => Status::Pause,
        Some("stop") => Status::Stop,
        other => {
            return Err(Error::data_loss(format!(
                "unexpected mpd state: {}",
                other.unwrap_or("none")
            )))
        }
    };

    let elapsed = value(response, "elapsed")
        .and_then(|elapsed| elapsed.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or_default();

    let song = value(response, "songid")
        .map(str::parse::<BackendId>)
        .transpose()?;

    Ok(PlaybackState {
        status,
        elapsed,
        song,
    })
}

fn notify(subscribers: &Subscribers) {
    let senders: Vec<_> = subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain(..)
        .collect();

    if !senders.is_empty() {
        debug!("notifying {} track finished subscribers", senders.len());
    }
    for sender in senders {
        // The receiver may have given up on waiting.
        let _ = sender.send(());
    }
}

pub struct Mpd {
    address: String,
    connection: tokio::sync::Mutex<Option<Connection>>,
    subscribers: Subscribers,
    watcher: CancellationToken,
}

impl Mpd {
    /// Connects to MPD at `address` and starts watching the player.
    ///
    /// # Errors
    ///
    /// Returns an error when MPD cannot be reached or does not greet like
    /// MPD.
    pub async fn connect(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let connection = Connection::open(&address).await?;

        let subscribers = Subscribers::default();
        let watcher = CancellationToken::new();
        tokio::spawn(watch(
            address.clone(),
            Arc::clone(&subscribers),
            watcher.clone(),
        ));

        Ok(Self {
            address,
            connection: tokio::sync::Mutex::new(Some(connection)),
            subscribers,
            watcher,
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends a command, reconnecting once when the connection was lost.
    async fn command(&self, command: &str, args: &[&str]) -> Result<Response> {
        let mut connection = self.connection.lock().await;

        for attempt in 0..2 {
            let mut conn = match connection.take() {
                Some(conn) => conn,
                None => Connection::open(&self.address).await?,
            };

            match conn.command(command, args).await {
                Err(e) if attempt == 0 && e.is_transient() => {
                    debug!("reconnecting to mpd: {e}");
                }
                result => {
                    *connection = Some(conn);
                    return result;
                }
            }
        }

        Err(Error::unavailable(format!(
            "cannot reach mpd at {}",
            self.address
        )))
    }
}

impl Drop for Mpd {
    fn drop(&mut self) {
        self.watcher.cancel();
    }
}

/// Watches the player until cancelled, notifying subscribers whenever
/// playback stops by itself.
async fn watch(address: String, subscribers: Subscribers, token: CancellationToken) {
    loop {
        let result = tokio::select! {
            biased;
            () = token.cancelled() => break,
            result = watch_connection(&address, &subscribers) => result,
        };

        if let Err(e) = result {
            warn!("mpd idle connection failed: {e}");
        }

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

async fn watch_connection(address: &str, subscribers: &Subscribers) -> Result<()> {
    let mut connection = Connection::open(address).await?;

    loop {
        let changed = connection.command("idle", &["player"]).await?;
        if value(&changed, "changed") != Some("player") {
            continue;
        }

        let status = parse_status(&connection.command("status", &[]).await?)?;
        if status.status == Status::Stop {
            notify(subscribers);
        }
    }
}

#[async_trait]
impl Backend for Mpd {
    async fn clear(&self) -> Result<()> {
        self.command("clear", &[]).await.map(|_| ())
    }

    async fn enqueue(&self, uri: &str) -> Result<BackendId> {
        let response = self.command("addid", &[uri]).await?;
        let id = value(&response, "Id")
            .ok_or_else(|| Error::data_loss("mpd did not return a song id"))?;
        Ok(id.parse()?)
    }

    async fn tag(&self, id: BackendId, tag: Tag, value: &str) -> Result<()> {
        let id = id.to_string();
        let tag = tag.to_string();
        self.command("addtagid", &[&id, &tag, value])
            .await
            .map(|_| ())
    }

    async fn play(&self) -> Result<()> {
        self.command("play", &[]).await.map(|_| ())
    }

    async fn pause(&self) -> Result<()> {
        self.command("pause", &["1"]).await.map(|_| ())
    }

    async fn resume(&self) -> Result<()> {
        self.command("pause", &["0"]).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.command("stop", &[]).await.map(|_| ())
    }

    async fn state(&self) -> Result<PlaybackState> {
        parse_status(&self.command("status", &[]).await?)
    }

    fn on_track_finished(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn unsubscribe_all(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
