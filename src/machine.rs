use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};

use crate::nes::cartridge::{Cartridge, LoadError};
use crate::nes::mapper::{board_name, build_mapper};
use crate::nes::{Nes, Region};

/// Machine power state. `Powered` means a ROM is loaded but the core is not
/// being stepped; `Running` means frames advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    Powered,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionPreference {
    /// Follow the ROM header hint, defaulting to NTSC.
    #[default]
    Auto,
    Ntsc,
    Pal,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub region: RegionPreference,
    pub sample_rate: u32,
    pub battery_backup: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            region: RegionPreference::Auto,
            sample_rate: 48_000,
            battery_backup: true,
        }
    }
}

/// Filesystem collaborator for battery-backed cartridge RAM. Keys are the
/// ROM path or name without extension; implementations append `.sav`.
pub trait BatteryStore: Send {
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn save(&self, key: &str, data: &[u8]) -> io::Result<()>;
}

/// Stores saves as `<key>.sav`, which puts them beside the ROM when the key
/// is a ROM path with the extension stripped.
#[derive(Debug, Default)]
pub struct DiskBatteryStore;

impl BatteryStore for DiskBatteryStore {
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(format!("{key}.sav")) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save(&self, key: &str, data: &[u8]) -> io::Result<()> {
        fs::write(format!("{key}.sav"), data)
    }
}

#[derive(Debug, Clone)]
pub struct RomInfo {
    pub name: String,
    pub mapper_id: u16,
    pub board: &'static str,
    pub battery_backed: bool,
    pub region: Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZapperState {
    pub x: i16,
    pub y: i16,
    pub trigger: bool,
}

impl Default for ZapperState {
    fn default() -> Self {
        Self {
            x: -1,
            y: -1,
            trigger: false,
        }
    }
}

/// Input polled exactly once per frame, last-write-wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    pub pads: [u8; 3],
    pub zapper: ZapperState,
}

/// CPU register snapshot for tracing and debug surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub pc: u16,
    pub cycles: u64,
}

/// Owns one console core plus its power state, region, and battery-backed
/// RAM persistence. Exactly one execution context may step a `Machine`.
pub struct Machine {
    nes: Nes,
    config: MachineConfig,
    store: Box<dyn BatteryStore>,
    power: PowerState,
    rom: Option<RomInfo>,
    frame_number: u64,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self::with_store(config, Box::new(DiskBatteryStore))
    }

    pub fn with_store(config: MachineConfig, store: Box<dyn BatteryStore>) -> Self {
        let mut nes = Nes::new();
        nes.set_sample_rate(config.sample_rate);
        Self {
            nes,
            config,
            store,
            power: PowerState::Off,
            rom: None,
            frame_number: 0,
        }
    }

    /// Parse and install a ROM image. On failure the machine keeps its
    /// previous state. The loaded machine is `Powered` but not running.
    pub fn load(&mut self, name: &str, bytes: &[u8]) -> Result<RomInfo, LoadError> {
        let cart = Cartridge::parse(bytes)?;
        let region = self.resolve_region(&cart);
        let info = RomInfo {
            name: name.to_string(),
            mapper_id: cart.mapper_id,
            board: board_name(cart.mapper_id),
            battery_backed: cart.has_battery,
            region,
        };
        let mut mapper = build_mapper(cart)?;

        // Nothing past this point can fail; previous state goes away now.
        self.eject();

        if info.battery_backed && self.config.battery_backup {
            match self.store.load(&info.name) {
                Ok(Some(bytes)) => mapper.load_battery_ram(&bytes),
                Ok(None) => {}
                Err(err) => warn!("battery load failed for {}: {err}", info.name),
            }
        }

        self.nes.install(mapper, region);
        self.nes.set_sample_rate(self.config.sample_rate);
        self.nes.reset();
        self.power = PowerState::Powered;
        self.frame_number = 0;
        self.rom = Some(info.clone());

        info!(
            "loaded {}: {} (mapper {}), {:?}{}",
            info.name,
            info.board,
            info.mapper_id,
            info.region,
            if info.battery_backed { ", battery" } else { "" }
        );
        Ok(info)
    }

    /// Load from disk, keying the battery save beside the ROM file.
    pub fn load_path(&mut self, path: &Path) -> Result<RomInfo, LoadError> {
        let bytes = fs::read(path)?;
        let key = path.with_extension("");
        self.load(&key.to_string_lossy(), &bytes)
    }

    pub fn set_power(&mut self, on: bool) {
        match (self.power, on) {
            (PowerState::Off, true) => {
                if self.rom.is_some() {
                    self.nes.reset();
                    self.power = PowerState::Running;
                    info!("power on");
                }
            }
            (PowerState::Powered, true) => {
                self.nes.reset();
                self.power = PowerState::Running;
                info!("power on");
            }
            (PowerState::Running, true) => {}
            (PowerState::Off, false) => {
                // Repeated power-off is a no-op: no second battery flush.
            }
            (_, false) => {
                self.flush_battery();
                self.power = PowerState::Off;
                info!("power off");
            }
        }
    }

    /// Flush battery RAM and drop the cartridge.
    pub fn eject(&mut self) {
        if self.power != PowerState::Off {
            self.flush_battery();
        }
        self.power = PowerState::Off;
        self.rom = None;
        self.nes.mapper = None;
    }

    pub fn reset(&mut self) {
        self.nes.reset();
    }

    /// Advance exactly one video frame. The input snapshot is applied at
    /// the frame boundary, before any CPU cycle of the new frame runs.
    /// Returns false when the machine is not running.
    pub fn run_frame(&mut self, input: &InputSnapshot, want_video: bool) -> bool {
        if self.power != PowerState::Running {
            return false;
        }

        self.nes.set_pads(input.pads);
        self.nes
            .set_zapper(input.zapper.x, input.zapper.y, input.zapper.trigger);
        self.nes.run_frame(want_video);
        self.frame_number += 1;
        true
    }

    pub fn frame_buffer(&self) -> &[u8] {
        self.nes.frame_buffer()
    }

    pub fn take_audio(&mut self) -> Vec<i16> {
        self.nes.take_audio()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn power_state(&self) -> PowerState {
        self.power
    }

    pub fn region(&self) -> Region {
        self.nes.region()
    }

    pub fn frame_rate(&self) -> f64 {
        self.nes.region().frame_rate_hz()
    }

    pub fn sample_rate(&self) -> u32 {
        self.nes.sample_rate()
    }

    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate() as f64 / self.frame_rate()).round() as usize
    }

    pub fn rom_info(&self) -> Option<&RomInfo> {
        self.rom.as_ref()
    }

    pub fn battery_ram(&self) -> Option<&[u8]> {
        self.nes.mapper.as_ref().and_then(|m| m.battery_ram())
    }

    /// Raw side-effect-free bus access for tools and tests.
    pub fn peek(&mut self, addr: u16) -> u8 {
        self.nes.peek(addr)
    }

    pub fn poke(&mut self, addr: u16, value: u8) {
        self.nes.poke(addr, value);
    }

    /// Single-step one CPU instruction; debug/tracing surface.
    pub fn step_instruction(&mut self) -> u32 {
        self.nes.step_instruction()
    }

    pub fn cpu_state(&self) -> CpuState {
        CpuState {
            a: self.nes.a,
            x: self.nes.x,
            y: self.nes.y,
            p: self.nes.p,
            sp: self.nes.sp,
            pc: self.nes.pc,
            cycles: self.nes.cycles,
        }
    }

    fn resolve_region(&self, cart: &Cartridge) -> Region {
        match self.config.region {
            RegionPreference::Ntsc => Region::Ntsc,
            RegionPreference::Pal => Region::Pal,
            RegionPreference::Auto => cart.region_hint.unwrap_or(Region::Ntsc),
        }
    }

    fn flush_battery(&mut self) {
        let Some(rom) = &self.rom else {
            return;
        };
        if !rom.battery_backed || !self.config.battery_backup {
            return;
        }
        let Some(sram) = self.battery_ram() else {
            return;
        };
        let sram = sram.to_vec();
        if let Err(err) = self.store.save(&rom.name, &sram) {
            warn!("battery save failed for {}: {err}", rom.name);
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if self.power != PowerState::Off {
            self.flush_battery();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn load_reports_board_and_leaves_machine_powered() {
        let mut machine = Machine::new(MachineConfig::default());
        let info = machine.load("test", &nrom_image(false)).unwrap();
        assert_eq!(info.board, "NROM");
        assert_eq!(machine.power_state(), PowerState::Powered);
        // Not running yet: frames do not advance.
        assert!(!machine.run_frame(&InputSnapshot::default(), true));
    }

    #[test]
    fn failed_load_keeps_previous_state() {
        let mut machine = Machine::new(MachineConfig::default());
        machine.load("good", &nrom_image(false)).unwrap();
        machine.set_power(true);

        let mut bad = nrom_image(false);
        bad[6] = 0x50; // mapper 5, unsupported
        assert!(matches!(
            machine.load("bad", &bad),
            Err(LoadError::UnsupportedMapper(5))
        ));
        assert_eq!(machine.power_state(), PowerState::Running);
        assert_eq!(machine.rom_info().unwrap().name, "good");
    }

    #[test]
    fn region_preference_overrides_header_hint() {
        let mut image = nrom_image(false);
        image[9] = 0x01; // PAL hint

        let mut machine = Machine::new(MachineConfig {
            region: RegionPreference::Ntsc,
            ..MachineConfig::default()
        });
        let info = machine.load("test", &image).unwrap();
        assert_eq!(info.region, Region::Ntsc);

        let mut machine = Machine::new(MachineConfig::default());
        let info = machine.load("test", &image).unwrap();
        assert_eq!(info.region, Region::Pal);
    }

    #[test]
    fn power_on_resets_and_runs() {
        let mut machine = Machine::new(MachineConfig::default());
        machine.load("test", &nrom_image(false)).unwrap();
        machine.set_power(true);
        assert_eq!(machine.power_state(), PowerState::Running);
        assert!(machine.run_frame(&InputSnapshot::default(), true));
        assert_eq!(machine.frame_number(), 1);

        machine.set_power(false);
        assert_eq!(machine.power_state(), PowerState::Off);
        assert!(!machine.run_frame(&InputSnapshot::default(), true));
    }

    #[test]
    fn samples_per_frame_matches_rate_ratio() {
        let mut machine = Machine::new(MachineConfig {
            sample_rate: 44_100,
            ..MachineConfig::default()
        });
        machine.load("test", &nrom_image(false)).unwrap();
        assert_eq!(machine.samples_per_frame(), 734);
    }
}
