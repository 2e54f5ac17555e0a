//! Channel transport
//!
//! Local sockets (Unix domain sockets / Windows named pipes) via the
//! interprocess crate, carrying length-prefixed JSON messages.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::paths;

/// Maximum channel message size (4 MB)
const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

pub use platform::Stream;

/// Create the channel listener, replacing any stale socket
pub async fn create_listener(name: &str) -> io::Result<Listener> {
    paths::ensure_socket_dir()?;

    #[cfg(unix)]
    {
        let stale = std::path::Path::new(name);
        if stale.exists() {
            std::fs::remove_file(stale)?;
        }
    }

    #[cfg(unix)]
    let listener = {
        let fs_name = name.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new().name(fs_name).create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let ns_name = name.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(ns_name).create_tokio()?
    };

    // Owner-only socket on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(name, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Connect to the coordinator's channel socket
pub async fn connect(name: &str) -> io::Result<Stream> {
    #[cfg(unix)]
    let stream = {
        let fs_name = name.to_fs_name::<GenericFilePath>()?;
        Stream::connect(fs_name).await?
    };

    #[cfg(windows)]
    let stream = {
        let ns_name = name.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(ns_name).await?
    };

    Ok(stream)
}

/// Send a length-prefixed message
pub async fn send_message<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Message too large",
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed message
pub async fn recv_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}
