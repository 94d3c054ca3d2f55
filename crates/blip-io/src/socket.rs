use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::BlipStream;

/// Default permission mode for created socket paths.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

/// `sockaddr_un.sun_path` budget: 108 bytes on Linux, 104 elsewhere.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Device + inode pair identifying the socket file a listener created.
type FileIdentity = (u64, u64);

/// Listening Unix domain socket for BLIP connections.
///
/// Binding claims the path: a socket file left behind by a dead listener is
/// cleared out first, while any other kind of file there is refused. On
/// drop the file is removed again, but only while it is still the very
/// inode this listener created — a path that was replaced in the meantime
/// belongs to someone else.
pub struct UnixServerSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: Option<FileIdentity>,
}

impl UnixServerSocket {
    /// Bind and listen on a filesystem-path Unix domain socket.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode on the socket file.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &PathBuf, source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        // Claim the path. Three cases: free, ours-from-a-past-life, taken.
        match std::fs::symlink_metadata(&path) {
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(&path, err)),
            Ok(meta) if meta.file_type().is_socket() => {
                debug!(?path, "clearing leftover socket file");
                std::fs::remove_file(&path).map_err(|err| bind_err(&path, err))?;
            }
            Ok(_) => {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
        }

        let listener = UnixListener::bind(&path).map_err(|err| bind_err(&path, err))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|err| bind_err(&path, err))?;
        let identity = file_identity(&path);

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            path,
            identity,
        })
    }

    /// Block until a peer connects, yielding its stream.
    pub fn accept(&self) -> Result<BlipStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(BlipStream::from_unix(stream))
    }

    /// Where this listener is bound.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixServerSocket {
    fn drop(&mut self) {
        let Some(created) = self.identity else {
            return;
        };
        match file_identity(&self.path) {
            Some(current) if current == created => {
                debug!(path = ?self.path, "removing socket file on shutdown");
                let _ = std::fs::remove_file(&self.path);
            }
            _ => {
                debug!(path = ?self.path, "socket path no longer ours; leaving it");
            }
        }
    }
}

/// Connect to a listening Unix domain socket (blocking).
pub fn connect(path: impl AsRef<Path>) -> Result<BlipStream> {
    let path = path.as_ref();
    let stream =
        std::os::unix::net::UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(?path, "dialed unix domain socket");
    Ok(BlipStream::from_unix(stream))
}

/// The (device, inode) pair of the socket file at `path`, if one is there.
fn file_identity(path: &Path) -> Option<FileIdentity> {
    std::fs::symlink_metadata(path)
        .ok()
        .filter(|meta| meta.file_type().is_socket())
        .map(|meta| (meta.dev(), meta.ino()))
}
