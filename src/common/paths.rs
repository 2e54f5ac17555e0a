//! Platform paths for the channel socket, configuration and logs
//!
//! Unix/macOS: Unix domain socket under $XDG_RUNTIME_DIR or /tmp.
//! Windows: named pipe, namespaced by username.

use std::io;
use std::path::PathBuf;

/// Name used for the channel socket/pipe and the project directories
const APP_NAME: &str = "storyrun";

/// Get the channel socket path
///
/// - Unix: `$XDG_RUNTIME_DIR/storyrun/channel.sock` or `/tmp/storyrun-<uid>/channel.sock`
/// - Windows: pipe name (the interprocess crate adds the `\\.\pipe\` prefix)
#[cfg(unix)]
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir)
            .join(APP_NAME)
            .join("channel.sock");
    }

    // /tmp fallback, scoped by uid
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid)).join("channel.sock")
}

#[cfg(windows)]
pub fn socket_path() -> PathBuf {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
    PathBuf::from(format!("{}-{}", APP_NAME, username))
}

/// Socket name suitable for the interprocess local-socket API
#[cfg(unix)]
pub fn socket_name() -> String {
    socket_path().to_string_lossy().into_owned()
}

#[cfg(windows)]
pub fn socket_name() -> String {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
    format!("{}-{}", APP_NAME, username)
}

/// Ensure the socket directory exists, owner-only on Unix
#[cfg(unix)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    let socket = socket_path();
    let dir = socket
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid socket path"))?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir.to_path_buf())
}

#[cfg(windows)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    // Named pipes need no directory
    Ok(PathBuf::new())
}

/// Remove a stale socket file
#[cfg(unix)]
pub fn remove_socket() -> io::Result<()> {
    let path = socket_path();
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket() -> io::Result<()> {
    // Named pipes clean up automatically
    Ok(())
}

/// Platform configuration directory (`~/.config/storyrun/` on Linux)
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_is_nonempty() {
        assert!(!socket_path().as_os_str().is_empty());
    }

    #[test]
    fn config_dir_resolves() {
        assert!(config_dir().is_some());
    }
}
