//! Microphone ownership
//!
//! The microphone is the one resource recognition and command capture
//! contend for. Ownership is a [`MicLease`]: it cannot be cloned, and the only
//! way to give it back is [`MicArbiter::release`], so holding the lease is
//! holding the device.

use std::fmt;

use crate::error::VoiceError;

/// Components that may hold the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicHolder {
    /// Continuous speech recognition
    Recognition,
    /// Fixed-duration command recording
    Capture,
}

impl fmt::Display for MicHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recognition => write!(f, "recognition"),
            Self::Capture => write!(f, "command capture"),
        }
    }
}

/// Proof of microphone ownership
#[derive(Debug)]
#[must_use = "a dropped lease keeps the microphone marked as held"]
pub struct MicLease {
    holder: MicHolder,
}

impl MicLease {
    /// Who holds this lease
    #[must_use]
    pub const fn holder(&self) -> MicHolder {
        self.holder
    }
}

/// Hands out the single microphone lease
#[derive(Debug, Default)]
pub struct MicArbiter {
    holder: Option<MicHolder>,
}

impl MicArbiter {
    /// Create an arbiter with the microphone free
    #[must_use]
    pub const fn new() -> Self {
        Self { holder: None }
    }

    /// Take the microphone for `holder`
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::MicrophoneBusy`] naming the current holder
    pub fn acquire(&mut self, holder: MicHolder) -> Result<MicLease, VoiceError> {
        if let Some(current) = self.holder {
            tracing::debug!(%holder, %current, "microphone busy");
            return Err(VoiceError::MicrophoneBusy(current));
        }

        self.holder = Some(holder);
        tracing::trace!(%holder, "microphone acquired");
        Ok(MicLease { holder })
    }

    /// Give the microphone back
    pub fn release(&mut self, lease: MicLease) {
        if self.holder == Some(lease.holder) {
            self.holder = None;
            tracing::trace!(holder = %lease.holder, "microphone released");
        } else {
            tracing::warn!(
                holder = %lease.holder,
                current = ?self.holder,
                "released a lease the arbiter did not hand out"
            );
        }
    }

    /// Current holder, if any
    #[must_use]
    pub const fn holder(&self) -> Option<MicHolder> {
        self.holder
    }

    /// Whether nobody holds the microphone
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.holder.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused() {
        let mut mic = MicArbiter::new();
        let lease = mic.acquire(MicHolder::Recognition).unwrap();

        assert_eq!(
            mic.acquire(MicHolder::Capture).unwrap_err(),
            VoiceError::MicrophoneBusy(MicHolder::Recognition)
        );
        assert_eq!(mic.holder(), Some(MicHolder::Recognition));

        mic.release(lease);
        assert!(mic.is_free());
    }

    #[test]
    fn handoff_after_release() {
        let mut mic = MicArbiter::new();
        let lease = mic.acquire(MicHolder::Recognition).unwrap();
        mic.release(lease);

        let lease = mic.acquire(MicHolder::Capture).unwrap();
        assert_eq!(lease.holder(), MicHolder::Capture);
        assert_eq!(mic.holder(), Some(MicHolder::Capture));
        mic.release(lease);
    }
}
