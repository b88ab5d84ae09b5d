//! Unix socket listeners owned by service components.

use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use guestbox_core::error::GuestBoxError;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const SOCKET_MODE: u32 = 0o777;

/// Serves one accepted connection; runs on its own thread.
pub trait ConnectionHandler: Send + Sync + fmt::Debug {
    fn handle(&self, stream: UnixStream) -> Result<()>;

    fn set_paused(&self, _paused: bool) {}
}

/// Reads and discards whatever the peer sends.
#[derive(Debug, Default)]
pub struct DiscardHandler;

impl ConnectionHandler for DiscardHandler {
    fn handle(&self, mut stream: UnixStream) -> Result<()> {
        io::copy(&mut stream, &mut io::sink()).context("drain connection")?;
        Ok(())
    }
}

struct Running {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct SocketServer {
    name: &'static str,
    handler: Arc<dyn ConnectionHandler>,
    running: Mutex<Option<Running>>,
}

impl fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketServer")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SocketServer {
    pub fn new(name: &'static str, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            name,
            handler,
            running: Mutex::new(None),
        }
    }

    pub fn handler(&self) -> &Arc<dyn ConnectionHandler> {
        &self.handler
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Binds `path` and starts accepting. A no-op when already serving.
    pub fn start(&self, path: &Path) -> Result<()> {
        let mut running = self.lock();
        if running.is_some() {
            return Ok(());
        }
        let listener = bind(path)?;
        listener
            .set_nonblocking(true)
            .context("set listener nonblocking")?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let handler = Arc::clone(&self.handler);
            let name = self.name;
            thread::Builder::new()
                .name(format!("{name}-accept"))
                .spawn(move || accept_loop(name, listener, handler, stop))
                .context("spawn accept thread")?
        };
        tracing::info!(component = self.name, socket = %path.display(), "listening");
        *running = Some(Running {
            path: path.to_path_buf(),
            stop,
            thread,
        });
        Ok(())
    }

    pub fn stop(&self) {
        let Some(running) = self.lock().take() else {
            return;
        };
        running.stop.store(true, Ordering::SeqCst);
        if running.thread.join().is_err() {
            tracing::warn!(component = self.name, "accept thread panicked");
        }
        if let Err(err) = fs::remove_file(&running.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::debug!(component = self.name, error = %err, "socket cleanup failed");
            }
        }
        tracing::info!(component = self.name, "stopped listening");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| GuestBoxError::Resource(format!("create socket dir {}: {err}", parent.display())))?;
    }
    if path.exists() {
        if UnixStream::connect(path).is_ok() {
            return Err(GuestBoxError::Resource(format!("socket {} is already in use", path.display())).into());
        }
        fs::remove_file(path)
            .map_err(|err| GuestBoxError::Resource(format!("remove stale socket {}: {err}", path.display())))?;
    }
    let listener = UnixListener::bind(path)
        .map_err(|err| GuestBoxError::Resource(format!("bind socket {}: {err}", path.display())))?;
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("set socket permissions {}", path.display()))?;
    Ok(listener)
}

fn accept_loop(
    name: &'static str,
    listener: UnixListener,
    handler: Arc<dyn ConnectionHandler>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    tracing::warn!(component = name, error = %err, "dropping connection");
                    continue;
                }
                let handler = Arc::clone(&handler);
                thread::spawn(move || {
                    if let Err(err) = handler.handle(stream) {
                        tracing::debug!(component = name, error = %err, "connection ended with error");
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                tracing::warn!(component = name, error = %err, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct CountingHandler {
        connections: AtomicUsize,
    }

    impl ConnectionHandler for CountingHandler {
        fn handle(&self, stream: UnixStream) -> Result<()> {
            self.connections.fetch_add(1, Ordering::SeqCst);
            DiscardHandler.handle(stream)
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_serves_connections_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tmp/.sound/AS0");
        let handler = Arc::new(CountingHandler::default());
        let server = SocketServer::new("audio-bridge", handler.clone());

        server.start(&path).unwrap();
        server.start(&path).unwrap();
        let mut client = UnixStream::connect(&path).unwrap();
        client.write_all(b"frames").unwrap();
        drop(client);
        assert!(wait_for(|| handler.connections.load(Ordering::SeqCst) == 1));

        server.stop();
        assert!(!server.is_running());
        assert!(!path.exists());
        server.stop();
    }

    #[test]
    fn test_live_socket_is_resource_error_and_stale_one_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("SM0");
        let first = SocketServer::new("first", Arc::new(DiscardHandler));
        first.start(&path).unwrap();

        let second = SocketServer::new("second", Arc::new(DiscardHandler));
        let err = second.start(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GuestBoxError>(),
            Some(GuestBoxError::Resource(_))
        ));

        first.stop();
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());
        second.start(&path).unwrap();
        assert!(second.is_running());
    }
}
