use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::info;

use crate::machine::{InputSnapshot, Machine, PowerState, ZapperState};

/// What happens when a frame is published while the previous one has not
/// been consumed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Publishing never blocks; an unconsumed frame is replaced and counted
    /// as dropped. Newest wins.
    #[default]
    Overwrite,
    /// Publishing blocks until the consumer takes the previous frame.
    /// Emulation stalls to the consumer's rate; no frame is ever lost.
    WaitForConsume,
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub policy: DeliveryPolicy,
    /// Override the region frame rate; `None` paces at the machine's rate.
    pub target_fps: Option<f64>,
    /// When false, frames skip pixel composition but keep exact timing.
    pub want_video: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicy::Overwrite,
            target_fps: None,
            want_video: true,
        }
    }
}

/// One emulated frame crossing the thread boundary by value.
#[derive(Debug, Clone)]
pub struct FrameBundle {
    pub video: Vec<u8>,
    pub audio: Vec<i16>,
    pub frame_number: u64,
}

struct SlotState {
    bundle: Option<FrameBundle>,
    producer_alive: bool,
}

/// Single-slot handoff buffer. Taking the bundle is the consume
/// acknowledgement the WaitForConsume policy waits on.
struct Slot {
    state: Mutex<SlotState>,
    produced: Condvar,
    consumed: Condvar,
}

#[derive(Debug, PartialEq, Eq)]
enum PublishOutcome {
    Delivered,
    Replaced,
    Aborted,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                bundle: None,
                producer_alive: true,
            }),
            produced: Condvar::new(),
            consumed: Condvar::new(),
        }
    }

    fn publish(
        &self,
        bundle: FrameBundle,
        policy: DeliveryPolicy,
        shutdown: &AtomicBool,
    ) -> PublishOutcome {
        let mut state = self.state.lock().unwrap();
        match policy {
            DeliveryPolicy::Overwrite => {
                let replaced = state.bundle.replace(bundle).is_some();
                self.produced.notify_one();
                if replaced {
                    PublishOutcome::Replaced
                } else {
                    PublishOutcome::Delivered
                }
            }
            DeliveryPolicy::WaitForConsume => {
                while state.bundle.is_some() && !shutdown.load(Ordering::Acquire) {
                    state = self.consumed.wait(state).unwrap();
                }
                if state.bundle.is_some() {
                    return PublishOutcome::Aborted;
                }
                state.bundle = Some(bundle);
                self.produced.notify_one();
                PublishOutcome::Delivered
            }
        }
    }

    /// Block until the slot is empty (previous frame acknowledged) or
    /// shutdown is requested. Returns false on shutdown.
    fn await_empty(&self, shutdown: &AtomicBool) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.bundle.is_some() && !shutdown.load(Ordering::Acquire) {
            state = self.consumed.wait(state).unwrap();
        }
        state.bundle.is_none()
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.producer_alive = false;
        self.produced.notify_all();
    }

    /// Wake a publisher blocked in WaitForConsume; called with shutdown set.
    fn interrupt(&self) {
        let _state = self.state.lock().unwrap();
        self.consumed.notify_all();
        self.produced.notify_all();
    }
}

/// Consumer end of the frame handoff.
pub struct FrameReceiver {
    slot: Arc<Slot>,
}

impl FrameReceiver {
    pub fn try_take(&self) -> Option<FrameBundle> {
        let mut state = self.slot.state.lock().unwrap();
        let bundle = state.bundle.take();
        if bundle.is_some() {
            self.slot.consumed.notify_one();
        }
        bundle
    }

    pub fn take_timeout(&self, timeout: Duration) -> Option<FrameBundle> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock().unwrap();
        loop {
            if let Some(bundle) = state.bundle.take() {
                self.slot.consumed.notify_one();
                return Some(bundle);
            }
            if !state.producer_alive {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .slot
                .produced
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
        }
    }

    pub fn is_disconnected(&self) -> bool {
        let state = self.slot.state.lock().unwrap();
        !state.producer_alive && state.bundle.is_none()
    }
}

/// Pad and zapper state shared with the pacing thread. Plain atomics:
/// writers win in arrival order and the loop snapshots once per frame.
pub struct InputPort {
    pads: [AtomicU8; 3],
    zapper_x: AtomicI32,
    zapper_y: AtomicI32,
    zapper_trigger: AtomicBool,
}

impl InputPort {
    fn new() -> Self {
        Self {
            pads: [AtomicU8::new(0), AtomicU8::new(0), AtomicU8::new(0)],
            zapper_x: AtomicI32::new(-1),
            zapper_y: AtomicI32::new(-1),
            zapper_trigger: AtomicBool::new(false),
        }
    }

    pub fn set_pad(&self, index: usize, buttons: u8) {
        if let Some(pad) = self.pads.get(index) {
            pad.store(buttons, Ordering::Release);
        }
    }

    pub fn set_button(&self, index: usize, button: u8, pressed: bool) {
        if let Some(pad) = self.pads.get(index) {
            if pressed {
                pad.fetch_or(button, Ordering::AcqRel);
            } else {
                pad.fetch_and(!button, Ordering::AcqRel);
            }
        }
    }

    pub fn set_zapper(&self, x: i16, y: i16, trigger: bool) {
        self.zapper_x.store(x as i32, Ordering::Release);
        self.zapper_y.store(y as i32, Ordering::Release);
        self.zapper_trigger.store(trigger, Ordering::Release);
    }

    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            pads: [
                self.pads[0].load(Ordering::Acquire),
                self.pads[1].load(Ordering::Acquire),
                self.pads[2].load(Ordering::Acquire),
            ],
            zapper: ZapperState {
                x: self.zapper_x.load(Ordering::Acquire) as i16,
                y: self.zapper_y.load(Ordering::Acquire) as i16,
                trigger: self.zapper_trigger.load(Ordering::Acquire),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerStats {
    pub emulated_frames: u64,
    pub dropped_frames: u64,
}

struct Shared {
    input: InputPort,
    shutdown: AtomicBool,
    paused: AtomicBool,
    power_off: AtomicBool,
    reset_request: AtomicBool,
    emulated_frames: AtomicU64,
    dropped_frames: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            input: InputPort::new(),
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            power_off: AtomicBool::new(false),
            reset_request: AtomicBool::new(false),
            emulated_frames: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
        }
    }
}

/// Owns the pacing thread. The `Machine` moves onto that thread and is
/// never touched from anywhere else; this handle only carries atomics and
/// the handoff slot. Dropping joins the thread.
pub struct EmulatorThread {
    shared: Arc<Shared>,
    slot: Arc<Slot>,
    handle: Option<JoinHandle<()>>,
}

impl EmulatorThread {
    pub fn spawn(machine: Machine, options: RunnerOptions) -> (Self, FrameReceiver) {
        let slot = Arc::new(Slot::new());
        let shared = Arc::new(Shared::new());
        let receiver = FrameReceiver { slot: slot.clone() };

        let thread_slot = slot.clone();
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("emulator".into())
            .spawn(move || run_loop(machine, options, thread_shared, thread_slot))
            .expect("failed to spawn emulator thread");

        (
            Self {
                shared,
                slot,
                handle: Some(handle),
            },
            receiver,
        )
    }

    pub fn input(&self) -> &InputPort {
        &self.shared.input
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    pub fn request_power_off(&self) {
        self.shared.power_off.store(true, Ordering::Release);
    }

    pub fn request_reset(&self) {
        self.shared.reset_request.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            emulated_frames: self.shared.emulated_frames.load(Ordering::Relaxed),
            dropped_frames: self.shared.dropped_frames.load(Ordering::Relaxed),
        }
    }

    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.slot.interrupt();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EmulatorThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(mut machine: Machine, options: RunnerOptions, shared: Arc<Shared>, slot: Arc<Slot>) {
    info!("pacing loop started ({:?})", options.policy);
    let mut last_completed = Instant::now();

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if shared.power_off.swap(false, Ordering::AcqRel) {
            machine.set_power(false);
        }
        if shared.reset_request.swap(false, Ordering::AcqRel) {
            machine.reset();
        }

        if machine.power_state() != PowerState::Running || shared.paused.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(4));
            last_completed = Instant::now();
            continue;
        }

        let frame_rate = options.target_fps.unwrap_or_else(|| machine.frame_rate());
        let interval = Duration::from_secs_f64(1.0 / frame_rate.max(1.0));
        let elapsed = last_completed.elapsed();

        if elapsed < interval {
            // Sleep in short slices toward the deadline so flag and input
            // writes are observed promptly.
            thread::sleep((interval - elapsed).min(Duration::from_millis(1)));
            continue;
        }

        // Overruns skip frames instead of catching up: the timer restarts
        // from completion time below, so a late tick means lost ticks.
        // Under wait-for-consume the stall is backpressure, not loss.
        if options.policy == DeliveryPolicy::Overwrite && elapsed >= interval * 2 {
            shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }

        // Under wait-for-consume the next frame must not start until the
        // previous bundle was taken.
        if options.policy == DeliveryPolicy::WaitForConsume
            && !slot.await_empty(&shared.shutdown)
        {
            break;
        }

        let input = shared.input.snapshot();
        machine.run_frame(&input, options.want_video);
        shared.emulated_frames.fetch_add(1, Ordering::Relaxed);

        let bundle = FrameBundle {
            video: if options.want_video {
                machine.frame_buffer().to_vec()
            } else {
                Vec::new()
            },
            audio: machine.take_audio(),
            frame_number: machine.frame_number(),
        };

        match slot.publish(bundle, options.policy, &shared.shutdown) {
            PublishOutcome::Delivered => {}
            PublishOutcome::Replaced => {
                shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
            }
            PublishOutcome::Aborted => break,
        }

        last_completed = Instant::now();
    }

    // Flush battery RAM before the consumer observes disconnect, so no
    // store access outlives the join.
    machine.set_power(false);
    slot.close();
    info!("pacing loop stopped");
}
