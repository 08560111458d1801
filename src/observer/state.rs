//! Observer state machine: `Idle → Armed → Pending → Committing → Armed`.
//!
//! Pure transitions; the driver owns timers and subscriptions and performs
//! the returned effects.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    /// Disabled; no subscription, no timers.
    Idle,
    /// Subscribed and waiting for changes.
    Armed,
    /// A mutation was seen; capture once `deadline` passes without another.
    Pending { deadline: Instant },
    /// A capture is running.
    Committing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverEvent {
    Enable,
    Disable,
    /// Resubscribe, e.g. after in-page navigation. Cancels a pending debounce.
    Rearm,
    Mutation,
    DebounceElapsed,
    /// Periodic safety timer, or the one-off capture after arming.
    SafetyTick,
    CaptureFinished,
}

/// Side effect the driver must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Subscribe,
    Unsubscribe,
    Capture,
}

impl ObserverState {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Debounce deadline, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Pending { deadline } => Some(*deadline),
            _ => None,
        }
    }

    pub fn next(
        self,
        event: ObserverEvent,
        now: Instant,
        debounce: Duration,
    ) -> (Self, Option<Effect>) {
        use ObserverEvent::*;

        match (self, event) {
            (Self::Idle, Enable) => (Self::Armed, Some(Effect::Subscribe)),
            (Self::Idle, _) => (Self::Idle, None),

            (_, Disable) => (Self::Idle, Some(Effect::Unsubscribe)),
            (state, Enable) => (state, None),
            (_, Rearm) => (Self::Armed, Some(Effect::Subscribe)),

            // Each mutation pushes the deadline out again.
            (_, Mutation) => (
                Self::Pending {
                    deadline: now + debounce,
                },
                None,
            ),

            (Self::Pending { deadline }, DebounceElapsed) if now >= deadline => {
                (Self::Committing, Some(Effect::Capture))
            }
            (state, DebounceElapsed) => (state, None),

            (Self::Armed | Self::Pending { .. }, SafetyTick) => {
                (Self::Committing, Some(Effect::Capture))
            }
            (state, SafetyTick) => (state, None),

            (Self::Committing, CaptureFinished) => (Self::Armed, None),
            // Changes that arrived mid-capture keep their own deadline.
            (state, CaptureFinished) => (state, None),
        }
    }
}
