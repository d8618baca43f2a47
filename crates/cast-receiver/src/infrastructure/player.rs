//! External player process fed through its stdin.
//!
//! When `player` is set in the config (for example `ffplay -` or
//! `gst-launch-1.0 fdsrc ! h264parse ! avdec_h264 ! autovideosink`), the
//! receiver starts that command once and writes every received stream into
//! the child's stdin instead of a file.  The command line is split on
//! whitespace; no shell is involved, so quoting is not supported.

use std::io::{self, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};

use tracing::{debug, info, warn};

use super::ReceiverError;

/// A running player and the pipe into its stdin.
#[derive(Debug)]
pub struct Player {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Player {
    /// Starts `command` with a piped stdin.  Stdout and stderr are inherited.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiverError::Player`] if the command line is empty or the
    /// program cannot be started.
    pub fn spawn(command: &str) -> Result<Self, ReceiverError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| ReceiverError::Player {
            command: command.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty player command"),
        })?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| ReceiverError::Player {
                command: command.to_string(),
                source,
            })?;
        let stdin = child.stdin.take();

        info!("started player {command:?} (pid {})", child.id());
        Ok(Self {
            command: command.to_string(),
            child,
            stdin,
        })
    }

    /// Closes the player's stdin and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns any error from waiting on the child.
    pub fn finish(mut self) -> io::Result<ExitStatus> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        debug!("player {:?} exited with {status}", self.command);
        Ok(status)
    }

    fn pipe(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "player stdin closed"))
    }
}

impl Write for Player {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipe()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pipe()?.flush()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        // Closing stdin is the end-of-stream signal; the player decides when
        // to exit.
        drop(self.stdin.take());
        match self.child.try_wait() {
            Ok(Some(status)) => debug!("player {:?} exited with {status}", self.command),
            Ok(None) => debug!("player {:?} still running after stdin closed", self.command),
            Err(e) => warn!("failed to poll player {:?}: {e}", self.command),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_rejects_blank_command() {
        let result = Player::spawn("   ");
        assert!(matches!(result, Err(ReceiverError::Player { .. })));
    }

    #[test]
    fn test_spawn_reports_missing_program() {
        let result = Player::spawn("cast-receiver-no-such-player -");
        assert!(matches!(
            result,
            Err(ReceiverError::Player { ref command, .. }) if command == "cast-receiver-no-such-player -"
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_player_receives_stream_on_stdin() {
        // Arrange: `dd` copies its stdin to a file and exits at end of input.
        let path = std::env::temp_dir().join(format!("cast_player_{}.h264", uuid::Uuid::new_v4()));
        let command = format!("dd of={} status=none", path.display());
        let mut player = Player::spawn(&command).unwrap();

        // Act
        player.write_all(&[0, 0, 0, 1, 0x65, 0x42]).unwrap();
        player.flush().unwrap();
        let status = player.finish().unwrap();

        // Assert
        assert!(status.success());
        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 0, 1, 0x65, 0x42]);
        std::fs::remove_file(&path).ok();
    }
}
