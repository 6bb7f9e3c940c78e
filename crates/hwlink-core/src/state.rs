// ── Connection state machine ──
//
// The transition table as a pure function. The manager's owner task feeds
// inputs in and carries out the returned effects in order; nothing here
// touches I/O, so every sequence of inputs has exactly one outcome.

use serde::Serialize;
use strum::Display;

use crate::model::EventKind;

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionState {
    /// Manager inactive, no hotplug subscription.
    #[default]
    NotListening,
    /// Subscribed to hotplug events, no device present.
    Listening,
    /// A device was attached and its transport is being opened.
    AwaitingTransport,
    /// A transport is open and usable.
    Connected,
    /// Debounce window after a transport-level disconnect.
    Disconnected,
}

/// Everything that can drive a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Enable,
    Disable,
    DeviceAdded,
    DeviceRemoved,
    TransportOpened,
    TransportOpenFailed,
    TransportDisconnected,
    DebounceElapsed,
}

/// Side effects the owner task performs, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Ensure a hotplug subscription exists.
    SubscribeHotplug,
    UnsubscribeHotplug,
    Emit(EventKind),
    StartDebounce,
    CancelDebounce,
    /// Open a transport to the device from the triggering add event.
    OpenTransport,
    /// Keep the freshly opened transport as the Session and watch its
    /// disconnect signal.
    StoreSession,
    /// Drop the Session reference and close its handle.
    ClearSession,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ConnectionState, effects: &[Effect]) -> Self {
        Self {
            next,
            effects: effects.to_vec(),
        }
    }

    fn stay(state: ConnectionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    /// True when the input had no effect at all.
    pub fn is_noop(&self, from: ConnectionState) -> bool {
        self.next == from && self.effects.is_empty()
    }
}

/// Apply one input to `state`. Inputs with no row for `state` are ignored.
pub fn transition(state: ConnectionState, input: Input) -> Transition {
    use ConnectionState as S;
    use Effect as E;

    match (state, input) {
        (S::NotListening, Input::Enable) => Transition::to(S::Listening, &[E::SubscribeHotplug]),

        (S::Listening | S::Disconnected, Input::DeviceAdded) => Transition::to(
            S::AwaitingTransport,
            &[
                E::Emit(EventKind::WaitingTransport),
                E::CancelDebounce,
                E::UnsubscribeHotplug,
                E::OpenTransport,
            ],
        ),

        (S::AwaitingTransport, Input::TransportOpened) => Transition::to(
            S::Connected,
            &[E::StoreSession, E::Emit(EventKind::HasTransport)],
        ),

        (S::AwaitingTransport, Input::TransportOpenFailed) => {
            Transition::to(S::Listening, &[E::SubscribeHotplug])
        }

        (S::Connected, Input::TransportDisconnected) => Transition::to(
            S::Disconnected,
            &[E::ClearSession, E::StartDebounce, E::SubscribeHotplug],
        ),

        (S::Disconnected, Input::DebounceElapsed) => Transition::to(
            S::Listening,
            &[E::Emit(EventKind::Disconnected), E::SubscribeHotplug],
        ),

        (S::NotListening, Input::Disable) => Transition::stay(state),
        (_, Input::Disable) => Transition::to(
            S::NotListening,
            &[E::UnsubscribeHotplug, E::ClearSession, E::CancelDebounce],
        ),

        _ => Transition::stay(state),
    }
}
