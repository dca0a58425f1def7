use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;
use log::{debug, warn};

use crate::protocol::MessageKind;
use crate::session::Session;

pub const COMMAND_QUEUE_CAPACITY: usize = 10;

/// A discrete action for the tracker loop. Each one maps to exactly one
/// collaborator call when dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Acknowledge,
    SetLed,
    SetRainbow,
    SetBuzzer,
    ChangePowerMode,
    RoutineReport,
}

/// Commands produced for one message kind, acknowledgement first.
pub type Route = Vec<Command, 2>;

/// Maps a message kind to the commands it queues.
pub fn route(kind: MessageKind) -> Route {
    let commands: &[Command] = match kind {
        MessageKind::AllData | MessageKind::Acknowledgement => &[],
        MessageKind::Buzzer => &[Command::Acknowledge, Command::SetBuzzer],
        MessageKind::Led => &[Command::Acknowledge, Command::SetLed],
        MessageKind::RainbowLed => &[Command::Acknowledge, Command::SetRainbow],
        MessageKind::PowerMode => &[Command::Acknowledge, Command::ChangePowerMode],
        MessageKind::WakeTimer => &[Command::RoutineReport],
    };
    let mut route = Route::new();
    for command in commands {
        // Capacity matches the longest route above.
        let _ = route.push(*command);
    }
    route
}

/// Bounded FIFO between the receive paths and the tracker loop.
///
/// Enqueue never blocks. When the queue is full the new command is dropped
/// and the queued ones are left alone.
pub struct CommandQueue {
    channel: Channel<CriticalSectionRawMutex, Command, COMMAND_QUEUE_CAPACITY>,
}

impl CommandQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Returns `false` when the command was dropped.
    pub fn enqueue(&self, command: Command) -> bool {
        match self.channel.try_send(command) {
            Ok(()) => true,
            Err(_) => {
                warn!("Command queue full, dropping {:?}", command);
                false
            }
        }
    }

    pub fn dequeue(&self) -> Option<Command> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes the session's current kind into `queue` and resets the kind to
/// WakeTimer so the next plain wake does not replay the command.
///
/// Returns how many commands were accepted.
pub fn route_pending(session: &Session, queue: &CommandQueue) -> usize {
    let kind = session.take_message_kind();
    let commands = route(kind);
    debug!("Routing {:?} -> {:?}", kind, commands.as_slice());
    let mut accepted = 0;
    for command in commands {
        if queue.enqueue(command) {
            accepted += 1;
        }
    }
    accepted
}
