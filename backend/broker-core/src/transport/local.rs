//! Same-machine carrier: unix domain sockets, Windows named pipes.

use crate::error::transport::TransportError;
use crate::transport::Channel;

use common::ErrorLocation;

use std::panic::Location;

use log::{debug, info};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

#[cfg(windows)]
const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Map a bare endpoint name onto the platform's namespace.
#[cfg(unix)]
pub(crate) fn platform_pipe_name(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("{name}.sock"))
        .to_string_lossy()
        .to_string()
}

#[cfg(windows)]
pub(crate) fn platform_pipe_name(name: &str) -> String {
    format!("{PIPE_PREFIX}{name}")
}

#[cfg(unix)]
pub async fn connect(name: &str) -> Result<Channel, TransportError> {
    let stream = UnixStream::connect(name)
        .await
        .map_err(|e| TransportError::Connect {
            endpoint: name.to_string(),
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;
    debug!("Connected to local socket {name}");
    Ok(Channel::from_stream(stream, name))
}

#[cfg(windows)]
pub async fn connect(name: &str) -> Result<Channel, TransportError> {
    let client = ClientOptions::new()
        .open(name)
        .map_err(|e| TransportError::Connect {
            endpoint: name.to_string(),
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;
    debug!("Connected to named pipe {name}");
    Ok(Channel::from_stream(client, name))
}

#[cfg(unix)]
pub struct LocalListener {
    name: String,
    listener: UnixListener,
}

#[cfg(unix)]
impl LocalListener {
    pub fn bind(name: &str) -> Result<Self, TransportError> {
        let listener = UnixListener::bind(name).map_err(|e| TransportError::Bind {
            endpoint: name.to_string(),
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;
        info!("Listening on local socket {name}");
        Ok(Self {
            name: name.to_string(),
            listener,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn accept(&mut self) -> Result<Channel, TransportError> {
        let (stream, _) = self.listener.accept().await?;
        debug!("Accepted local connection on {}", self.name);
        Ok(Channel::from_stream(stream, self.name.clone()))
    }
}

#[cfg(unix)]
impl Drop for LocalListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.name);
    }
}

#[cfg(windows)]
pub struct LocalListener {
    name: String,
    next: NamedPipeServer,
}

#[cfg(windows)]
impl LocalListener {
    pub fn bind(name: &str) -> Result<Self, TransportError> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(name)
            .map_err(|e| TransportError::Bind {
                endpoint: name.to_string(),
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;
        info!("Listening on named pipe {name}");
        Ok(Self {
            name: name.to_string(),
            next,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn accept(&mut self) -> Result<Channel, TransportError> {
        self.next.connect().await?;
        let replacement = ServerOptions::new().create(&self.name)?;
        let connected = std::mem::replace(&mut self.next, replacement);
        debug!("Accepted pipe connection on {}", self.name);
        Ok(Channel::from_stream(connected, self.name.clone()))
    }
}
