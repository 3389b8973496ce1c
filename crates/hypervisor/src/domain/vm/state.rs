//! VM lifecycle state machine

use api_types::VmState;
use derive_more::Display;

/// Lifecycle event applied to a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum VmEvent {
    #[display("start")]
    Start,
    #[display("pause")]
    Pause,
    #[display("resume")]
    Resume,
    #[display("stop")]
    Stop,
    #[display("destroy")]
    Destroy,
    /// Unrecoverable internal error
    #[display("fault")]
    Fault,
}

impl VmEvent {
    pub const ALL: [VmEvent; 6] = [
        VmEvent::Start,
        VmEvent::Pause,
        VmEvent::Resume,
        VmEvent::Stop,
        VmEvent::Destroy,
        VmEvent::Fault,
    ];

    /// State the event leads to when it is legal.
    pub fn target(self) -> VmState {
        match self {
            VmEvent::Start | VmEvent::Resume => VmState::Running,
            VmEvent::Pause => VmState::Paused,
            VmEvent::Stop => VmState::Stopped,
            VmEvent::Destroy => VmState::Destroyed,
            VmEvent::Fault => VmState::Failed,
        }
    }

    /// Pause suspends scheduling but keeps the grant.
    pub fn releases_grant(self) -> bool {
        matches!(self, VmEvent::Stop | VmEvent::Destroy | VmEvent::Fault)
    }
}

/// Next state for `event` from `current`, or `None` if the transition is illegal.
pub fn next_state(current: VmState, event: VmEvent) -> Option<VmState> {
    use VmState::*;

    match (current, event) {
        (Created, VmEvent::Start) => Some(Running),
        (Running, VmEvent::Pause) => Some(Paused),
        (Paused, VmEvent::Resume) => Some(Running),
        (Running | Paused, VmEvent::Stop) => Some(Stopped),
        (Created | Running | Paused | Stopped, VmEvent::Destroy) => Some(Destroyed),
        (state, VmEvent::Fault) if !state.is_terminal() => Some(Failed),
        _ => None,
    }
}
