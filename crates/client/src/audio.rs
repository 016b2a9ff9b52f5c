//! Audible cue played when a pickup changes.

use std::io::Write;

/// Something that can play a short notification sound.
pub trait AudioCue: Send + Sync {
    fn play(&self);
}

/// Rings the terminal bell (BEL on stderr).
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl AudioCue for TerminalBell {
    fn play(&self) {
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            crate::log_debug!("Failed to ring terminal bell: {}", e);
        }
    }
}

/// Plays nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl AudioCue for Silent {
    fn play(&self) {}
}
