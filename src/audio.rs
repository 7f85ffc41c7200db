// Audio playback collaborator
//
// Playback is fire-and-forget: the controller hands over a file path and
// never waits for, or looks at, the result.

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Plays an audio file asynchronously
pub trait AudioPlayer: Send + Sync {
    fn play(&self, path: &Path);
}

/// Player that discards every request
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentAudio;

impl AudioPlayer for SilentAudio {
    fn play(&self, path: &Path) {
        debug!("Audio disabled, not playing {}", path.display());
    }
}

/// Player that launches an external program (e.g. `mpg123 -q`) per file
#[derive(Debug, Clone)]
pub struct ProcessAudioPlayer {
    program: String,
    args: Vec<String>,
}

impl ProcessAudioPlayer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the file path
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self, path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl AudioPlayer for ProcessAudioPlayer {
    fn play(&self, path: &Path) {
        debug!("Playing {} with {}", path.display(), self.program);
        match self.command(path).spawn() {
            // Reap on a detached thread so the caller never blocks on playback
            Ok(mut child) => {
                std::thread::spawn(move || {
                    if let Err(e) = child.wait() {
                        warn!("Audio player did not exit cleanly: {}", e);
                    }
                });
            }
            Err(e) => warn!("Failed to start audio player '{}': {}", self.program, e),
        }
    }
}
