//! Integrity: compare local and server checksums, decide confirm / retry / abort.

use crate::protocol::MAX_CHECKSUM_RETRIES;

/// What to tell the server after comparing checksums for one transfer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Checksums match; confirm and finish.
    Confirm,
    /// Mismatch with passes left; ask to retry and re-send the whole file.
    Retry,
    /// Mismatch on the last allowed pass; abort verification and accept the file as-is.
    Abort,
}

/// Counts transfer passes and mismatches for one run.
#[derive(Debug, Clone)]
pub struct ChecksumTracker {
    max_passes: u32,
    passes: u32,
    mismatches: u32,
}

impl ChecksumTracker {
    pub fn new(max_passes: u32) -> Self {
        Self {
            max_passes: max_passes.max(1),
            passes: 0,
            mismatches: 0,
        }
    }

    /// Record one completed transfer pass and decide what follows it.
    pub fn resolve(&mut self, local: u32, server: u32) -> Resolution {
        self.passes += 1;
        if local == server {
            return Resolution::Confirm;
        }
        self.mismatches += 1;
        if self.passes >= self.max_passes {
            Resolution::Abort
        } else {
            Resolution::Retry
        }
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn mismatches(&self) -> u32 {
        self.mismatches
    }
}

impl Default for ChecksumTracker {
    fn default() -> Self {
        Self::new(MAX_CHECKSUM_RETRIES)
    }
}
