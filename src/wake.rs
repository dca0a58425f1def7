use core::cell::Cell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_sync::waitqueue::AtomicWaker;
use embedded_hal_async::delay::DelayNs;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Timer,
    RadioReceive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed(u32),
}

#[derive(Debug, Clone, Copy, Default)]
struct Pending {
    timer: bool,
    radio: bool,
}

/// One-shot wake timer plus the binary wake signal the tracker loop sleeps on.
///
/// Both the timer and the receive paths raise the signal through
/// [`WakeScheduler::raise`]; a raise while a wake is already pending for the
/// same cause is a no-op. The scheduler never re-arms itself.
pub struct WakeScheduler {
    pending: Mutex<CriticalSectionRawMutex, Cell<Pending>>,
    timer: Mutex<CriticalSectionRawMutex, Cell<TimerState>>,
    waker: AtomicWaker,
    arm_requests: Signal<CriticalSectionRawMutex, u32>,
}

impl WakeScheduler {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(Pending {
                timer: false,
                radio: false,
            })),
            timer: Mutex::new(Cell::new(TimerState::Idle)),
            waker: AtomicWaker::new(),
            arm_requests: Signal::new(),
        }
    }

    /// Marks `cause` pending and wakes the loop. Returns `false` when that
    /// cause was already pending. Safe to call from receive callbacks.
    pub fn raise(&self, cause: WakeCause) -> bool {
        let raised = self.pending.lock(|cell| {
            let mut pending = cell.get();
            let flag = match cause {
                WakeCause::Timer => &mut pending.timer,
                WakeCause::RadioReceive => &mut pending.radio,
            };
            let raised = !*flag;
            *flag = true;
            cell.set(pending);
            raised
        });
        self.waker.wake();
        raised
    }

    /// Drops a pending `cause` without waking. Returns whether it was pending.
    pub fn clear(&self, cause: WakeCause) -> bool {
        self.pending.lock(|cell| {
            let mut pending = cell.get();
            let flag = match cause {
                WakeCause::Timer => &mut pending.timer,
                WakeCause::RadioReceive => &mut pending.radio,
            };
            let was_pending = *flag;
            *flag = false;
            cell.set(pending);
            was_pending
        })
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock(|cell| {
            let pending = cell.get();
            pending.timer || pending.radio
        })
    }

    /// Cancels any running timer and starts a new one-shot of `ms`.
    pub fn arm(&self, ms: u32) {
        self.timer.lock(|cell| cell.set(TimerState::Armed(ms)));
        self.arm_requests.signal(ms);
    }

    /// Timer expiry: back to idle and raise a Timer wake.
    pub fn expire(&self) {
        self.timer.lock(|cell| cell.set(TimerState::Idle));
        self.raise(WakeCause::Timer);
    }

    pub fn state(&self) -> TimerState {
        self.timer.lock(|cell| cell.get())
    }

    /// Suspends until a wake is pending, then clears it.
    ///
    /// When both causes are pending the wake reports RadioReceive and
    /// consumes the Timer cause with it, so one cycle handles both.
    pub async fn wait_for_wake(&self) -> WakeCause {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            match self.take() {
                Some(cause) => Poll::Ready(cause),
                None => Poll::Pending,
            }
        })
        .await
    }

    fn take(&self) -> Option<WakeCause> {
        self.pending.lock(|cell| {
            let pending = cell.get();
            let cause = if pending.radio {
                WakeCause::RadioReceive
            } else if pending.timer {
                WakeCause::Timer
            } else {
                return None;
            };
            cell.set(Pending::default());
            Some(cause)
        })
    }

    /// Waits for the next [`WakeScheduler::arm`] and returns its duration.
    pub async fn armed(&self) -> u32 {
        self.arm_requests.wait().await
    }

    /// Sleeps `ms` and expires. A new arm request while sleeping restarts
    /// the countdown with the new duration.
    pub async fn sleep<D: DelayNs>(&self, delay: &mut D, mut ms: u32) {
        loop {
            match select(delay.delay_ms(ms), self.arm_requests.wait()).await {
                Either::First(()) => {
                    self.expire();
                    return;
                }
                Either::Second(next) => {
                    debug!("Wake timer re-armed: {} ms -> {} ms", ms, next);
                    ms = next;
                }
            }
        }
    }

    /// Timer task body.
    pub async fn run<D: DelayNs>(&self, delay: &mut D) -> ! {
        loop {
            let ms = self.armed().await;
            self.sleep(delay, ms).await;
        }
    }
}

impl Default for WakeScheduler {
    fn default() -> Self {
        Self::new()
    }
}
