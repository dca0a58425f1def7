//! Harness orchestration: wake, sample, route, acquire a fix, dispatch, re-arm.

use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::command::{Command, CommandQueue, route_pending};
use crate::config::TrackerConfig;
use crate::dispatch::Dispatcher;
use crate::peripherals::{BatteryMonitor, Buzzer, Gps, Radio, RgbLed};
use crate::power::{GpsDutyCycle, PowerMode, PowerModeMachine};
use crate::protocol::{CodecError, Message, MessageKind};
use crate::session::{FixQuality, LinkQuality, Position, Session, TimeOfDay};
use crate::wake::{WakeCause, WakeScheduler};

/// Shared handles reached from receive callbacks.
///
/// Callbacks only decode, assign session fields and raise the wake signal.
/// Routing into the command queue happens on the tracker loop.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub session: &'a Session,
    pub commands: &'a CommandQueue,
    pub wake: &'a WakeScheduler,
}

impl<'a> Context<'a> {
    pub const fn new(
        session: &'a Session,
        commands: &'a CommandQueue,
        wake: &'a WakeScheduler,
    ) -> Self {
        Self {
            session,
            commands,
            wake,
        }
    }

    /// LoRa packet received with its link metrics.
    pub fn on_radio_receive(
        &self,
        payload: &[u8],
        rssi: i16,
        snr: i8,
    ) -> Result<MessageKind, CodecError> {
        self.receive(payload, Some(LinkQuality { rssi, snr }))
    }

    /// Phone wrote the BLE characteristic.
    pub fn on_ble_write(&self, payload: &[u8]) -> Result<MessageKind, CodecError> {
        self.receive(payload, None)
    }

    fn receive(
        &self,
        payload: &[u8],
        link: Option<LinkQuality>,
    ) -> Result<MessageKind, CodecError> {
        let message = Message::decode(payload).inspect_err(|e| {
            warn!("Dropping {} byte payload: {}", payload.len(), e);
        })?;
        self.session.apply(&message, link);
        self.wake.raise(WakeCause::RadioReceive);
        Ok(message.kind())
    }
}

/// Hardware the harness loop drives.
pub struct Peripherals<G, B, R, L, Z> {
    pub gps: G,
    pub battery: B,
    pub radio: R,
    pub led: L,
    pub buzzer: Z,
}

/// What one wake cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub cause: WakeCause,
    /// Commands routed at the start of the cycle.
    pub routed: usize,
    pub has_fix: bool,
    /// GPS polls spent waiting for the fix.
    pub fix_polls: u32,
    pub mode: PowerMode,
    pub sleep_ms: u32,
}

pub struct TrackerLoop<'a, G, B, R, L, Z, D> {
    ctx: Context<'a>,
    gps: G,
    battery: B,
    dispatcher: Dispatcher<R, L, Z>,
    delay: D,
    power: PowerModeMachine,
    config: TrackerConfig,
    gps_powered: bool,
}

impl<'a, G, B, R, L, Z, D> TrackerLoop<'a, G, B, R, L, Z, D>
where
    G: Gps,
    B: BatteryMonitor,
    R: Radio,
    L: RgbLed,
    Z: Buzzer,
    D: DelayNs,
{
    pub fn new(
        ctx: Context<'a>,
        peripherals: Peripherals<G, B, R, L, Z>,
        delay: D,
        config: TrackerConfig,
    ) -> Self {
        let Peripherals {
            gps,
            battery,
            radio,
            led,
            buzzer,
        } = peripherals;
        Self {
            ctx,
            gps,
            battery,
            dispatcher: Dispatcher::new(radio, led, buzzer),
            delay,
            power: PowerModeMachine::new(),
            config,
            gps_powered: false,
        }
    }

    /// Boot: bring up the GPS and arm the first wake.
    pub async fn start(&mut self) {
        self.ensure_gps().await;
        let sleep_ms = self.power.sleep_ms();
        info!(
            "Tracker started in {} mode, first wake in {} ms",
            self.power.active().label(),
            sleep_ms
        );
        self.ctx.wake.arm(sleep_ms);
    }

    /// Boots, then runs wake cycles forever.
    pub async fn run(&mut self) -> ! {
        self.start().await;
        loop {
            self.run_cycle().await;
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let cause = self.ctx.wake.wait_for_wake().await;
        info!("Woke on {:?}", cause);

        let battery = self.battery.read_percent();
        self.ctx.session.update(|state| {
            state.battery.harness_percent = battery;
            if cause == WakeCause::Timer {
                state.message_kind = MessageKind::WakeTimer;
            }
        });

        let routed = route_pending(self.ctx.session, self.ctx.commands);

        self.ensure_gps().await;
        self.gps.update();

        let mut requested_mode = None;
        let mut held_report = false;
        let mut fix_polls = 0;
        while !self.gps.has_fix() {
            if self.config.max_fix_polls.is_some_and(|max| fix_polls >= max) {
                warn!("No fix after {} polls, reporting last known position", fix_polls);
                break;
            }
            if self.config.drain_while_acquiring {
                self.route_arrivals();
                let drained = self
                    .dispatcher
                    .drain_holding_reports(self.ctx.commands, self.ctx.session);
                held_report |= drained.held_report;
                requested_mode = drained.requested_mode.or(requested_mode);
            }
            self.delay.delay_ms(self.config.fix_poll_interval_ms).await;
            self.gps.update();
            fix_polls += 1;
        }

        let has_fix = self.gps.has_fix();
        self.record_fix(has_fix);

        if held_report {
            let state = self.ctx.session.snapshot();
            self.dispatcher.execute(Command::RoutineReport, &state);
        }
        self.route_arrivals();
        let drained = self.dispatcher.drain(self.ctx.commands, self.ctx.session);
        if let Some(mode) = drained.requested_mode.or(requested_mode) {
            debug!("PowerMode command for {} acknowledged", mode.label());
        }
        // The session's mode governs sleep, even when its command was
        // superseded or dropped from a full queue.
        let mode = self.ctx.session.snapshot().mode;
        self.power.transition(mode);

        if self.power.gps_duty_cycle() == GpsDutyCycle::PowerCycled && self.gps_powered {
            self.gps.power_off();
            self.gps_powered = false;
            info!("GPS powered off until the next wake");
        }

        let sleep_ms = self.power.sleep_ms();
        self.ctx.wake.arm(sleep_ms);
        info!(
            "Sleeping {} ms in {} mode",
            sleep_ms,
            self.power.active().label()
        );

        CycleReport {
            cause,
            routed,
            has_fix,
            fix_polls,
            mode: self.power.active(),
            sleep_ms,
        }
    }

    /// Routes a message that arrived after this cycle's routing and drops
    /// its wake, since this cycle now handles it.
    fn route_arrivals(&mut self) {
        if self.ctx.session.snapshot().message_kind == MessageKind::WakeTimer {
            return;
        }
        self.ctx.wake.clear(WakeCause::RadioReceive);
        route_pending(self.ctx.session, self.ctx.commands);
    }

    fn record_fix(&mut self, has_fix: bool) {
        if !has_fix {
            self.ctx.session.update(|state| state.has_fix = false);
            return;
        }
        let position = Position {
            latitude: self.gps.latitude(),
            longitude: self.gps.longitude(),
            altitude: self.gps.altitude(),
        };
        let time_of_day = TimeOfDay {
            hour: self.gps.hour(),
            minute: self.gps.minute(),
            second: self.gps.second(),
        };
        let fix_quality = FixQuality {
            satellites_in_view: self.gps.satellites_in_view(),
            horizontal_dilution: self.gps.horizontal_dilution(),
        };
        self.ctx.session.update(|state| {
            state.has_fix = true;
            state.position = position;
            state.time_of_day = time_of_day;
            state.fix_quality = fix_quality;
        });
    }

    async fn ensure_gps(&mut self) {
        if self.gps_powered {
            return;
        }
        let gps = &mut self.gps;
        init_with_retry(&mut self.delay, self.config.init_retry_ms, "GPS", || {
            gps.begin()
        })
        .await;
        self.gps_powered = true;
    }

    pub fn power(&self) -> &PowerModeMachine {
        &self.power
    }

    pub fn gps(&self) -> &G {
        &self.gps
    }

    pub fn dispatcher(&self) -> &Dispatcher<R, L, Z> {
        &self.dispatcher
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }
}

/// Calls `begin` until it reports success, waiting `retry_ms` between
/// attempts. Returns the number of attempts.
pub async fn init_with_retry<D: DelayNs>(
    delay: &mut D,
    retry_ms: u32,
    name: &str,
    mut begin: impl FnMut() -> bool,
) -> u32 {
    let mut attempts = 1;
    while !begin() {
        error!(
            "{} did not respond (attempt {}), retrying in {} ms",
            name, attempts, retry_ms
        );
        delay.delay_ms(retry_ms).await;
        attempts += 1;
    }
    info!("{} initialized", name);
    attempts
}
