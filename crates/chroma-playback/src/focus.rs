//! Audio focus arbitration.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// What kind of focus the engine asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRequest {
    /// Long-lived exclusive playback (music).
    Gain,
}

/// Arbiter's answer to a focus request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusGrant {
    Granted,
    Denied,
}

/// Focus notifications delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusChange {
    /// Another app took focus for good.
    PermanentLoss,
    /// Focus is gone for a while (e.g. a phone call); pause.
    TransientLoss,
    /// Focus is gone for a while but output may continue quietly.
    TransientLossCanDuck,
    /// Focus is back after a transient loss.
    Regained,
}

/// Engine-side view of focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FocusState {
    /// Not requested, released, or permanently lost.
    #[default]
    None,
    Granted,
    LostTransient,
    LostTransientCanDuck,
}

impl FocusState {
    /// Whether output may be audible in this state.
    pub const fn allows_playback(self) -> bool {
        matches!(self, Self::Granted | Self::LostTransientCanDuck)
    }

    /// Whether a request is outstanding with the arbiter.
    pub const fn is_held(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// System service granting the right to produce audio.
pub trait FocusArbiter: Send {
    /// Ask for focus.
    fn request(&mut self, kind: FocusRequest) -> FocusGrant;

    /// Give focus back.
    fn release(&mut self);
}

impl<F: FocusArbiter + ?Sized> FocusArbiter for Box<F> {
    fn request(&mut self, kind: FocusRequest) -> FocusGrant {
        (**self).request(kind)
    }

    fn release(&mut self) {
        (**self).release();
    }
}

/// Arbiter for hosts without a focus system: always grants.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmanagedFocus;

impl FocusArbiter for UnmanagedFocus {
    fn request(&mut self, kind: FocusRequest) -> FocusGrant {
        debug!("Granting {kind:?} focus (unmanaged)");
        FocusGrant::Granted
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_state_playback() {
        assert!(FocusState::Granted.allows_playback());
        assert!(FocusState::LostTransientCanDuck.allows_playback());
        assert!(!FocusState::LostTransient.allows_playback());
        assert!(!FocusState::None.allows_playback());
        assert!(FocusState::LostTransient.is_held());
        assert!(!FocusState::None.is_held());
    }

    #[test]
    fn test_unmanaged_focus_grants() {
        let mut focus = UnmanagedFocus;
        assert_eq!(focus.request(FocusRequest::Gain), FocusGrant::Granted);
        focus.release();
    }
}
