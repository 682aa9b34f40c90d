//! Client side of the named channel transport: private channel lifetime,
//! the handshake and the session loop.

use crate::error::{ClientError, Result};
use crate::input::{pump_commands, CommandSource};
use crate::rendering::Renderer;
use log::{debug, info, warn};
use shared::fifo;
use shared::{
    ConnectRequest, ConnectResponse, StageState, StateUpdate, CONNECT_RESPONSE_SIZE,
    PIPE_NAME_SIZE, STATE_UPDATE_SIZE,
};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tokio::task;

/// The two private channels of one client. Both are removed on drop.
#[derive(Debug)]
pub struct ClientPipes {
    pub request: PathBuf,
    pub notify: PathBuf,
}

impl ClientPipes {
    /// Creates `/tmp/pacman_req_<id>` and `/tmp/pacman_notif_<id>`.
    pub fn for_id(id: &str) -> Result<Self> {
        Self::create(
            PathBuf::from(format!("/tmp/pacman_req_{}", id)),
            PathBuf::from(format!("/tmp/pacman_notif_{}", id)),
        )
    }

    /// Creates both channels, replacing stale ones. Names that do not fit
    /// the wire field are refused before anything touches the filesystem.
    pub fn create(request: PathBuf, notify: PathBuf) -> Result<Self> {
        for path in [&request, &notify] {
            let name = path.to_string_lossy();
            if name.len() > PIPE_NAME_SIZE {
                return Err(ClientError::NameTooLong(name.into_owned()));
            }
        }

        fifo::create(&request)?;
        let pipes = Self { request, notify };
        fifo::create(&pipes.notify)?;
        Ok(pipes)
    }

    pub fn connect_request(&self) -> Result<ConnectRequest> {
        Ok(ConnectRequest::new(
            self.request.to_string_lossy(),
            self.notify.to_string_lossy(),
        )?)
    }

    pub fn remove(&self) {
        for path in [&self.request, &self.notify] {
            if let Err(e) = fifo::remove(path) {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for ClientPipes {
    fn drop(&mut self) {
        self.remove();
    }
}

/// How a session ended from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// State-updates received and drawn.
    pub frames: u64,
    /// Stage state and points of the last update, if any arrived.
    pub last: Option<(StageState, i16)>,
}

/// One client: its private channels plus where and how patiently to connect.
pub struct Client {
    pipes: ClientPipes,
    registration: PathBuf,
    handshake_timeout: Duration,
}

impl Client {
    pub fn new(id: &str, registration: PathBuf, handshake_timeout: Duration) -> Result<Self> {
        Ok(Self::with_pipes(
            ClientPipes::for_id(id)?,
            registration,
            handshake_timeout,
        ))
    }

    pub fn with_pipes(pipes: ClientPipes, registration: PathBuf, handshake_timeout: Duration) -> Self {
        Self {
            pipes,
            registration,
            handshake_timeout,
        }
    }

    pub fn pipes(&self) -> &ClientPipes {
        &self.pipes
    }

    /// Connects, then plays one session: commands from `source` go out on a
    /// pump thread while this task draws every state-update until the server
    /// closes the response channel.
    pub async fn run<W>(&self, source: CommandSource, out: W) -> Result<SessionSummary>
    where
        W: Write + Send + 'static,
    {
        handshake(&self.registration, &self.pipes, self.handshake_timeout).await?;
        info!("Connection accepted, waiting for a free game slot");

        let request_path = self.pipes.request.clone();
        let notify_path = self.pipes.notify.clone();
        let (notify, request) = task::spawn_blocking(move || open_session(&request_path, &notify_path))
            .await
            .map_err(join_error)??;
        info!("Session started");

        // Not a blocking task: an interactive pump may sit on stdin forever
        // and must not hold up runtime shutdown.
        thread::Builder::new()
            .name("command-pump".into())
            .spawn(move || pump_commands(source, request))?;

        let summary = task::spawn_blocking(move || {
            let mut renderer = Renderer::new(out);
            receive_updates(notify, &mut renderer)
        })
        .await
        .map_err(join_error)??;

        info!("Session over after {} updates", summary.frames);
        Ok(summary)
    }
}

/// Sends the connect-request and waits at most `timeout` for the answer.
///
/// A registration channel that is missing or has no reader is refused
/// immediately instead of blocking.
pub async fn handshake(registration: &Path, pipes: &ClientPipes, timeout: Duration) -> Result<()> {
    let request = pipes.connect_request()?;
    let registration = registration.to_path_buf();
    let notify = pipes.notify.clone();

    let exchange = task::spawn_blocking({
        let notify = notify.clone();
        move || -> Result<ConnectResponse> {
            let mut channel = fifo::try_open_writer(&registration).map_err(|e| {
                if e.kind() == io::ErrorKind::ConnectionRefused {
                    ClientError::ConnectionRefused(registration.clone())
                } else {
                    ClientError::Io(e)
                }
            })?;
            channel.write_all(&request.encode())?;
            drop(channel);

            let mut answer = fifo::open_reader(&notify)?;
            let mut buf = [0u8; CONNECT_RESPONSE_SIZE];
            answer.read_exact(&mut buf)?;
            Ok(ConnectResponse::decode(&buf)?)
        }
    });

    let response = match tokio::time::timeout(timeout, exchange).await {
        Ok(joined) => joined.map_err(join_error)??,
        Err(_) => {
            // The exchange is parked opening the response channel; a
            // writer that comes and goes releases it.
            if let Err(e) = fifo::try_open_writer(&notify) {
                debug!("Handshake task not waiting on {}: {}", notify.display(), e);
            }
            return Err(ClientError::HandshakeTimeout(timeout));
        }
    };

    if response.is_accepted() {
        Ok(())
    } else {
        Err(ClientError::Rejected(response.result))
    }
}

/// Opens both private channels for the session, response channel first.
/// Blocks until a worker has picked the session up.
pub fn open_session(request: &Path, notify: &Path) -> io::Result<(File, File)> {
    let notify = fifo::open_reader(notify)?;
    let request = fifo::open_writer(request)?;
    Ok((notify, request))
}

/// Draws state-updates until end-of-channel. Frames that fail to decode
/// are skipped.
pub fn receive_updates<R: Read, W: Write>(
    mut notify: R,
    renderer: &mut Renderer<W>,
) -> Result<SessionSummary> {
    let mut buf = vec![0u8; STATE_UPDATE_SIZE];
    let mut last = None;

    loop {
        match notify.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        let update = match StateUpdate::decode(&buf) {
            Ok(update) => update,
            Err(e) => {
                warn!("Discarding state-update: {}", e);
                continue;
            }
        };
        renderer.draw(&update)?;
        last = Some((update.state, update.points));
    }

    Ok(SessionSummary {
        frames: renderer.frames(),
        last,
    })
}

fn join_error(e: task::JoinError) -> ClientError {
    ClientError::Io(io::Error::new(io::ErrorKind::Other, e))
}
