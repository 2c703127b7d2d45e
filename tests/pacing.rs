use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use raster8::machine::{BatteryStore, Machine, MachineConfig};
use raster8::runner::{DeliveryPolicy, EmulatorThread, RunnerOptions};

fn nrom_image(battery: bool) -> Vec<u8> {
    let mut bytes = vec![0u8; 16];
    bytes[0..4].copy_from_slice(b"NES\x1A");
    bytes[4] = 1;
    bytes[5] = 1;
    bytes[6] = if battery { 0x02 } else { 0x00 };

    let mut prg = vec![0xEA; 0x4000];
    prg[0] = 0x4C;
    prg[1] = 0x00;
    prg[2] = 0x80;
    prg[0x3FFC] = 0x00;
    prg[0x3FFD] = 0x80;
    bytes.extend(prg);
    bytes.extend(vec![0u8; 0x2000]);
    bytes
}

fn running_machine(battery: bool, store: Option<Box<dyn BatteryStore>>) -> Machine {
    let config = MachineConfig::default();
    let mut machine = match store {
        Some(store) => Machine::with_store(config, store),
        None => Machine::new(config),
    };
    machine.load("pacing", &nrom_image(battery)).unwrap();
    machine.set_power(true);
    machine
}

#[derive(Default)]
struct MemoryStoreInner {
    saves: Mutex<HashMap<String, Vec<u8>>>,
    save_count: AtomicUsize,
}

#[derive(Clone, Default)]
struct MemoryStore(Arc<MemoryStoreInner>);

impl BatteryStore for MemoryStore {
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.0.saves.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.0
            .saves
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        self.0.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn wait_for<F: FnMut() -> bool>(mut condition: F, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn wait_policy_never_starts_the_next_frame_before_ack() {
    let machine = running_machine(false, None);
    let options = RunnerOptions {
        policy: DeliveryPolicy::WaitForConsume,
        target_fps: Some(500.0),
        want_video: false,
    };
    let (emulator, frames) = EmulatorThread::spawn(machine, options);

    // A deliberately slow consumer: do not take anything yet. At 500 fps
    // the loop would produce dozens of frames if it were not blocked.
    wait_for(|| emulator.stats().emulated_frames >= 1, "first frame");
    thread::sleep(Duration::from_millis(200));
    assert_eq!(
        emulator.stats().emulated_frames,
        1,
        "loop advanced past frame 1 before the handoff was acknowledged"
    );

    // Acknowledge frame 1; exactly one more frame may now be produced.
    let first = frames
        .take_timeout(Duration::from_secs(5))
        .expect("first frame");
    assert_eq!(first.frame_number, 1);

    let second = frames
        .take_timeout(Duration::from_secs(5))
        .expect("second frame");
    assert_eq!(second.frame_number, 2);
}

#[test]
fn overwrite_policy_drops_frames_for_a_slow_consumer() {
    let machine = running_machine(false, None);
    let options = RunnerOptions {
        policy: DeliveryPolicy::Overwrite,
        target_fps: Some(500.0),
        want_video: false,
    };
    let (emulator, frames) = EmulatorThread::spawn(machine, options);

    wait_for(|| emulator.stats().emulated_frames > 5, "several frames");
    let stats = emulator.stats();
    assert!(stats.dropped_frames > 0, "stats: {stats:?}");

    // Newest wins: the waiting bundle is a recent frame, not frame 1.
    let bundle = frames
        .take_timeout(Duration::from_secs(5))
        .expect("bundle");
    assert!(bundle.frame_number > 1);
}

#[test]
fn dropping_the_thread_joins_and_disconnects_the_receiver() {
    let machine = running_machine(false, None);
    let (emulator, frames) = EmulatorThread::spawn(
        machine,
        RunnerOptions {
            target_fps: Some(500.0),
            want_video: false,
            ..RunnerOptions::default()
        },
    );

    thread::sleep(Duration::from_millis(50));
    drop(emulator);

    // After the join any final bundle is still takeable, then the channel
    // reports disconnect.
    let _ = frames.try_take();
    assert!(frames.is_disconnected());
    assert!(frames.take_timeout(Duration::from_millis(10)).is_none());
}

#[test]
fn teardown_flushes_battery_before_releasing_the_machine() {
    let store = MemoryStore::default();
    let machine = running_machine(true, Some(Box::new(store.clone())));
    let (emulator, _frames) = EmulatorThread::spawn(
        machine,
        RunnerOptions {
            target_fps: Some(500.0),
            want_video: false,
            ..RunnerOptions::default()
        },
    );

    thread::sleep(Duration::from_millis(50));
    drop(emulator);

    assert_eq!(store.0.save_count.load(Ordering::SeqCst), 1);
}

#[test]
fn pause_stops_frame_production() {
    let machine = running_machine(false, None);
    let (emulator, frames) = EmulatorThread::spawn(
        machine,
        RunnerOptions {
            target_fps: Some(500.0),
            want_video: false,
            ..RunnerOptions::default()
        },
    );

    emulator.set_paused(true);
    // Drain anything produced before the pause landed.
    thread::sleep(Duration::from_millis(50));
    let _ = frames.try_take();

    let before = emulator.stats().emulated_frames;
    thread::sleep(Duration::from_millis(150));
    let after = emulator.stats().emulated_frames;
    assert!(after - before <= 1, "paused loop kept producing frames");

    emulator.set_paused(false);
    assert!(
        frames.take_timeout(Duration::from_secs(5)).is_some(),
        "loop did not resume after unpause"
    );
}
