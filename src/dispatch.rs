use log::{debug, error};

use crate::command::{Command, CommandQueue};
use crate::peripherals::{Buzzer, Radio, RgbLed};
use crate::power::PowerMode;
use crate::protocol::{self, MessageKind};
use crate::session::{Session, SessionState};

/// Outcome of one pass over the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drained {
    pub executed: usize,
    /// Last mode asked for by a ChangePowerMode command.
    pub requested_mode: Option<PowerMode>,
    /// A RoutineReport was taken off the queue but not sent yet.
    pub held_report: bool,
}

/// Executes queued commands against the output collaborators.
pub struct Dispatcher<R, L, Z> {
    radio: R,
    led: L,
    buzzer: Z,
}

impl<R, L, Z> Dispatcher<R, L, Z>
where
    R: Radio,
    L: RgbLed,
    Z: Buzzer,
{
    pub fn new(radio: R, led: L, buzzer: Z) -> Self {
        Self { radio, led, buzzer }
    }

    /// Runs one command with exactly one collaborator call.
    ///
    /// ChangePowerMode touches no hardware; it hands the acknowledged mode
    /// back for logging. Sleep follows the session's mode.
    pub fn execute(&mut self, command: Command, state: &SessionState) -> Option<PowerMode> {
        debug!("Executing {:?}", command);
        match command {
            Command::Acknowledge => {
                let mut reply = *state;
                reply.commands.acknowledged = true;
                self.transmit(&reply, MessageKind::Acknowledgement);
            }
            Command::SetLed => {
                let rgb = state.commands.led_rgb;
                if rgb.is_off() {
                    self.led.off();
                } else {
                    self.led.set_color(rgb);
                }
            }
            Command::SetRainbow => self.led.set_rainbow(state.commands.rainbow_enabled),
            Command::SetBuzzer => {
                if state.commands.buzzer_enabled {
                    self.buzzer.on();
                } else {
                    self.buzzer.off();
                }
            }
            Command::ChangePowerMode => return Some(state.mode),
            Command::RoutineReport => self.transmit(state, MessageKind::AllData),
        }
        None
    }

    /// Empties `queue` in FIFO order.
    pub fn drain(&mut self, queue: &CommandQueue, session: &Session) -> Drained {
        self.drain_inner(queue, session, false)
    }

    /// Empties `queue` but holds RoutineReport back, so a report is not
    /// sent before the position it carries has been refreshed.
    pub fn drain_holding_reports(&mut self, queue: &CommandQueue, session: &Session) -> Drained {
        self.drain_inner(queue, session, true)
    }

    fn drain_inner(
        &mut self,
        queue: &CommandQueue,
        session: &Session,
        hold_reports: bool,
    ) -> Drained {
        let mut drained = Drained::default();
        while let Some(command) = queue.dequeue() {
            if hold_reports && command == Command::RoutineReport {
                drained.held_report = true;
                continue;
            }
            let state = session.snapshot();
            if let Some(mode) = self.execute(command, &state) {
                drained.requested_mode = Some(mode);
            }
            drained.executed += 1;
        }
        drained
    }

    fn transmit(&mut self, state: &SessionState, kind: MessageKind) {
        let payload = match protocol::encode(state, kind) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {:?}: {}", kind, e);
                return;
            }
        };
        if let Err(e) = self.radio.send(&payload) {
            error!("Failed to send {:?} ({} bytes): {}", kind, payload.len(), e);
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn led(&self) -> &L {
        &self.led
    }

    pub fn buzzer(&self) -> &Z {
        &self.buzzer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeBuzzer, FakeLed, FakeRadio, LedCall};
    use crate::peripherals::LinkError;
    use crate::protocol::Message;
    use crate::session::Rgb;

    type TestDispatcher = Dispatcher<FakeRadio, FakeLed, FakeBuzzer>;

    fn dispatcher() -> TestDispatcher {
        Dispatcher::new(
            FakeRadio::default(),
            FakeLed::default(),
            FakeBuzzer::default(),
        )
    }

    fn calls(d: &TestDispatcher) -> usize {
        d.radio().sent.len() + d.led().calls.len() + d.buzzer().calls.len()
    }

    #[test]
    fn test_acknowledge_sends_ack_with_heartbeat() {
        let mut d = dispatcher();
        let mut state = SessionState::new();
        state.commands.led_rgb = Rgb::new(1, 2, 3);
        state.battery.harness_percent = 64;

        assert_eq!(d.execute(Command::Acknowledge, &state), None);
        assert_eq!(calls(&d), 1);
        let Message::Acknowledgement {
            ack,
            heartbeat,
            harness_battery,
        } = Message::decode(&d.radio().sent[0]).unwrap()
        else {
            panic!("expected an acknowledgement: {}", d.radio().sent_text(0));
        };
        assert!(ack);
        assert_eq!(heartbeat.unwrap().led_rgb, Rgb::new(1, 2, 3));
        assert_eq!(harness_battery, Some(64));
    }

    #[test]
    fn test_each_command_makes_one_call() {
        let mut state = SessionState::new();
        state.commands.led_rgb = Rgb::new(255, 0, 0);
        state.commands.buzzer_enabled = true;
        state.commands.rainbow_enabled = true;

        for command in [
            Command::Acknowledge,
            Command::SetLed,
            Command::SetRainbow,
            Command::SetBuzzer,
            Command::RoutineReport,
        ] {
            let mut d = dispatcher();
            d.execute(command, &state);
            assert_eq!(calls(&d), 1, "{:?}", command);
        }

        let mut d = dispatcher();
        assert_eq!(
            d.execute(Command::ChangePowerMode, &state),
            Some(PowerMode::LiveTracking)
        );
        assert_eq!(calls(&d), 0);
    }

    #[test]
    fn test_led_off_and_buzzer_off() {
        let mut d = dispatcher();
        let state = SessionState::new();
        d.execute(Command::SetLed, &state);
        d.execute(Command::SetBuzzer, &state);
        d.execute(Command::SetRainbow, &state);

        assert_eq!(d.led().calls, [LedCall::Off, LedCall::Rainbow(false)]);
        assert_eq!(d.buzzer().calls, [false]);
    }

    #[test]
    fn test_routine_report_is_all_data() {
        let mut d = dispatcher();
        let state = SessionState::new();
        d.execute(Command::RoutineReport, &state);
        assert!(d.radio().sent_text(0).starts_with(r#"{"msgType":0,"#));
    }

    #[test]
    fn test_send_failure_is_swallowed() {
        let mut d = Dispatcher::new(
            FakeRadio {
                sent: Default::default(),
                fail_with: Some(LinkError::Busy),
            },
            FakeLed::default(),
            FakeBuzzer::default(),
        );
        assert_eq!(
            d.execute(Command::RoutineReport, &SessionState::new()),
            None
        );
        assert!(d.radio().sent.is_empty());
    }

    #[test]
    fn test_drain_in_order() {
        let mut d = dispatcher();
        let session = Session::new();
        let queue = CommandQueue::new();
        session.apply(
            &Message::PowerMode {
                mode: PowerMode::ExtremePowerSaving,
            },
            None,
        );
        session.apply(&Message::Buzzer { enabled: true }, None);
        queue.enqueue(Command::Acknowledge);
        queue.enqueue(Command::SetBuzzer);
        queue.enqueue(Command::ChangePowerMode);

        let drained = d.drain(&queue, &session);
        assert_eq!(drained.requested_mode, Some(PowerMode::ExtremePowerSaving));
        assert_eq!(drained.executed, 3);
        assert!(queue.is_empty());
        assert_eq!(d.radio().sent.len(), 1);
        assert!(d.radio().sent_text(0).contains(r#""msgType":1"#));
        assert_eq!(d.buzzer().calls, [true]);
        assert_eq!(d.drain(&queue, &session), Drained::default());
    }

    #[test]
    fn test_drain_holding_reports() {
        let mut d = dispatcher();
        let session = Session::new();
        let queue = CommandQueue::new();
        queue.enqueue(Command::RoutineReport);
        queue.enqueue(Command::SetLed);

        let drained = d.drain_holding_reports(&queue, &session);
        assert!(drained.held_report);
        assert_eq!(drained.executed, 1);
        assert!(queue.is_empty());
        assert!(d.radio().sent.is_empty());
        assert_eq!(d.led().calls, [LedCall::Off]);
    }
}
