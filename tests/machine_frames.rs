use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use raster8::machine::{
    BatteryStore, InputSnapshot, Machine, MachineConfig, PowerState,
};
use raster8::nes::BUTTON_A;

fn nrom_image(program: &[u8], battery: bool) -> Vec<u8> {
    let mut bytes = vec![0u8; 16];
    bytes[0..4].copy_from_slice(b"NES\x1A");
    bytes[4] = 1;
    bytes[5] = 1;
    bytes[6] = if battery { 0x02 } else { 0x00 };

    let mut prg = vec![0xEA; 0x4000];
    prg[..program.len()].copy_from_slice(program);
    prg[0x3FFC] = 0x00;
    prg[0x3FFD] = 0x80;
    bytes.extend(prg);
    bytes.extend(vec![0u8; 0x2000]);
    bytes
}

const SPIN: &[u8] = &[0x4C, 0x00, 0x80];

// Strobe the controllers, read pad 1 bit 0 (button A), store it to $10,
// repeat forever.
const READ_PAD_LOOP: &[u8] = &[
    0xA9, 0x01, // LDA #$01
    0x8D, 0x16, 0x40, // STA $4016
    0xA9, 0x00, // LDA #$00
    0x8D, 0x16, 0x40, // STA $4016
    0xAD, 0x16, 0x40, // LDA $4016
    0x29, 0x01, // AND #$01
    0x85, 0x10, // STA $10
    0x4C, 0x00, 0x80, // JMP $8000
];

#[derive(Default)]
struct MemoryStoreInner {
    saves: Mutex<HashMap<String, Vec<u8>>>,
    save_count: AtomicUsize,
}

#[derive(Clone, Default)]
struct MemoryStore(Arc<MemoryStoreInner>);

impl MemoryStore {
    fn saved(&self, key: &str) -> Option<Vec<u8>> {
        self.0.saves.lock().unwrap().get(key).cloned()
    }

    fn save_count(&self) -> usize {
        self.0.save_count.load(Ordering::SeqCst)
    }

    fn preload(&self, key: &str, data: Vec<u8>) {
        self.0.saves.lock().unwrap().insert(key.to_string(), data);
    }
}

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

#[test]
fn sixty_frames_produce_full_video_and_bounded_audio() {
    let mut machine = Machine::new(MachineConfig::default());
    machine.load("frames", &nrom_image(SPIN, false)).unwrap();
    machine.set_power(true);

    let spf = machine.samples_per_frame();
    let input = InputSnapshot::default();

    for frame in 0..60 {
        assert!(machine.run_frame(&input, true));
        assert_eq!(machine.frame_buffer().len(), 256 * 240 * 4);

        let audio = machine.take_audio();
        assert!(
            audio.len().abs_diff(spf) <= 1,
            "frame {frame}: {} samples vs target {spf}",
            audio.len()
        );
    }
    assert_eq!(machine.frame_number(), 60);
}

#[test]
fn skipping_video_does_not_desync_timing() {
    let image = nrom_image(SPIN, false);
    let input = InputSnapshot::default();

    let mut with_video = Machine::new(MachineConfig::default());
    with_video.load("a", &image).unwrap();
    with_video.set_power(true);

    let mut without_video = Machine::new(MachineConfig::default());
    without_video.load("b", &image).unwrap();
    without_video.set_power(true);

    for _ in 0..30 {
        with_video.run_frame(&input, true);
        without_video.run_frame(&input, false);
    }

    assert_eq!(
        with_video.cpu_state().cycles,
        without_video.cpu_state().cycles
    );
    assert_eq!(with_video.cpu_state().pc, without_video.cpu_state().pc);
}

#[test]
fn input_snapshot_applies_to_the_next_frame_only() {
    let mut machine = Machine::new(MachineConfig::default());
    machine
        .load("input", &nrom_image(READ_PAD_LOOP, false))
        .unwrap();
    machine.set_power(true);

    // Frame 1: no buttons held.
    machine.run_frame(&InputSnapshot::default(), true);
    assert_eq!(machine.peek(0x10), 0);

    // Frame 2: A held; the snapshot set before the frame is visible in it.
    let mut input = InputSnapshot::default();
    input.pads[0] = BUTTON_A;
    machine.run_frame(&input, true);
    assert_eq!(machine.peek(0x10), 1);

    // Frame 3: released again.
    machine.run_frame(&InputSnapshot::default(), true);
    assert_eq!(machine.peek(0x10), 0);
}

#[test]
fn power_off_twice_writes_battery_exactly_once() {
    let store = MemoryStore::default();
    let mut machine = Machine::with_store(MachineConfig::default(), Box::new(store.clone()));
    machine.load("save", &nrom_image(SPIN, true)).unwrap();
    machine.set_power(true);
    machine.run_frame(&InputSnapshot::default(), true);

    machine.set_power(false);
    assert_eq!(store.save_count(), 1);
    assert_eq!(machine.power_state(), PowerState::Off);

    machine.set_power(false);
    assert_eq!(store.save_count(), 1, "second power-off must not re-save");
}

#[test]
fn battery_ram_round_trips_through_the_store() {
    let store = MemoryStore::default();

    {
        let mut machine =
            Machine::with_store(MachineConfig::default(), Box::new(store.clone()));
        machine.load("game", &nrom_image(SPIN, true)).unwrap();
        machine.set_power(true);
        for (offset, byte) in [0xDEu8, 0xAD, 0xBE, 0xEF].into_iter().enumerate() {
            machine.poke(0x6000 + offset as u16, byte);
        }
        machine.set_power(false);
    }

    let saved = store.saved("game").expect("battery bytes were stored");
    assert_eq!(&saved[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);

    let mut machine = Machine::with_store(MachineConfig::default(), Box::new(store.clone()));
    machine.load("game", &nrom_image(SPIN, true)).unwrap();
    assert_eq!(machine.peek(0x6000), 0xDE);
    assert_eq!(machine.peek(0x6003), 0xEF);
}

#[test]
fn battery_disabled_never_touches_the_store() {
    let store = MemoryStore::default();
    store.preload("game", vec![0x77; 16]);

    let mut machine = Machine::with_store(
        MachineConfig {
            battery_backup: false,
            ..MachineConfig::default()
        },
        Box::new(store.clone()),
    );
    machine.load("game", &nrom_image(SPIN, true)).unwrap();
    // Preloaded bytes are not read when persistence is disabled.
    assert_eq!(machine.peek(0x6000), 0);
    machine.set_power(true);
    machine.set_power(false);
    assert_eq!(store.save_count(), 0);
}

#[test]
fn drop_flushes_battery_like_power_off() {
    let store = MemoryStore::default();
    {
        let mut machine =
            Machine::with_store(MachineConfig::default(), Box::new(store.clone()));
        machine.load("drop", &nrom_image(SPIN, true)).unwrap();
        machine.set_power(true);
        machine.poke(0x6000, 0x55);
    }
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.saved("drop").unwrap()[0], 0x55);
}
