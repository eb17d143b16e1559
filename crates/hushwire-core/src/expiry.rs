//! Session expiry countdown.
//!
//! The server issues each login an `expires_at`. Once it passes the client
//! wipes itself exactly once; renewing re-arms the countdown.

/// Actions returned by [`SessionExpiry::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Run the panic wipe
    Wipe,
}

/// Countdown to the end of the authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpiry {
    expires_at: u64,
    fired: bool,
}

impl SessionExpiry {
    /// Arm a countdown ending at `expires_at` (Unix seconds).
    pub fn new(expires_at: u64) -> Self {
        Self { expires_at, fired: false }
    }

    /// Expiry instant, Unix seconds.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// True once the wipe has been requested.
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Seconds left, zero once expired.
    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    /// Advance to `now`. Returns `Wipe` the first time expiry is reached.
    pub fn tick(&mut self, now: u64) -> Option<ExpiryAction> {
        if self.fired || now < self.expires_at {
            return None;
        }
        self.fired = true;
        tracing::warn!(expires_at = self.expires_at, "session expired");
        Some(ExpiryAction::Wipe)
    }

    /// Move expiry to `expires_at` and re-arm.
    pub fn renew(&mut self, expires_at: u64) {
        self.expires_at = expires_at;
        self.fired = false;
    }

    /// Remaining time as `mm:ss`. Minutes are not capped at 59.
    pub fn countdown(&self, now: u64) -> String {
        let remaining = self.remaining(now);
        format!("{:02}:{:02}", remaining / 60, remaining % 60)
    }
}
