pub mod apu;
pub mod cartridge;
pub mod cpu;
pub mod mapper;
mod palette;
pub mod ppu;

use log::error;

use apu::Apu;
use mapper::Mapper;
use ppu::Ppu;

pub const BUTTON_A: u8 = 0x01;
pub const BUTTON_B: u8 = 0x02;
pub const BUTTON_SELECT: u8 = 0x04;
pub const BUTTON_START: u8 = 0x08;
pub const BUTTON_UP: u8 = 0x10;
pub const BUTTON_DOWN: u8 = 0x20;
pub const BUTTON_LEFT: u8 = 0x40;
pub const BUTTON_RIGHT: u8 = 0x80;

pub(crate) const FLAG_CARRY: u8 = 0x01;
pub(crate) const FLAG_ZERO: u8 = 0x02;
pub(crate) const FLAG_INTERRUPT: u8 = 0x04;
pub(crate) const FLAG_DECIMAL: u8 = 0x08;
pub(crate) const FLAG_BREAK: u8 = 0x10;
pub(crate) const FLAG_UNUSED: u8 = 0x20;
pub(crate) const FLAG_OVERFLOW: u8 = 0x40;
pub(crate) const FLAG_NEGATIVE: u8 = 0x80;

pub const NTSC_FRAME_RATE_HZ: f64 = 60.098_813_897_440_515;
pub const PAL_FRAME_RATE_HZ: f64 = 50.006_977_968_268_29;
const PAL_CPU_CLOCK_HZ: f64 = 1_662_607.03;

/// Console timing region. All CPU/PPU/APU clock ratios derive from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Ntsc,
    Pal,
}

impl Region {
    pub fn cpu_clock_hz(self) -> f64 {
        match self {
            Region::Ntsc => apu::NTSC_CPU_CLOCK_HZ,
            Region::Pal => PAL_CPU_CLOCK_HZ,
        }
    }

    pub fn frame_rate_hz(self) -> f64 {
        match self {
            Region::Ntsc => NTSC_FRAME_RATE_HZ,
            Region::Pal => PAL_FRAME_RATE_HZ,
        }
    }

    fn prerender_scanline(self) -> i16 {
        match self {
            Region::Ntsc => ppu::NTSC_PRERENDER_SCANLINE,
            Region::Pal => ppu::PAL_PRERENDER_SCANLINE,
        }
    }

    fn odd_dot_skip(self) -> bool {
        matches!(self, Region::Ntsc)
    }
}

/// The console core: CPU registers, internal RAM, PPU, APU, the cartridge
/// board, and the controller ports, stepped in lockstep one video frame at
/// a time. Everything lives on this struct so two cores never share state.
pub struct Nes {
    pub(crate) a: u8,
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) p: u8,
    pub(crate) sp: u8,
    pub(crate) pc: u16,

    pub(crate) ram: [u8; 2048],
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) mapper: Option<Box<dyn Mapper>>,
    region: Region,

    pads: [u8; 3],
    port1_shift: u16,
    port2_shift: u8,
    strobe: bool,
    zapper_x: i16,
    zapper_y: i16,
    zapper_trigger: bool,

    open_bus: u8,
    pub(crate) pending_nmi: bool,
    pub(crate) stall_cycles: u32,
    pub(crate) halted: bool,
    pub(crate) cycles: u64,

    pub(crate) in_instruction: bool,
    pub(crate) bus_cycles_this_step: u32,
    ppu_tick_accum: u32,
    jam_reported: bool,
}

impl Default for Nes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nes {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            p: FLAG_INTERRUPT | FLAG_UNUSED,
            sp: 0xFD,
            pc: 0,
            ram: [0; 2048],
            ppu: Ppu::new(),
            apu: Apu::new(),
            mapper: None,
            region: Region::Ntsc,
            pads: [0; 3],
            port1_shift: 0,
            port2_shift: 0,
            strobe: false,
            zapper_x: -1,
            zapper_y: -1,
            zapper_trigger: false,
            open_bus: 0,
            pending_nmi: false,
            stall_cycles: 0,
            halted: false,
            cycles: 0,
            in_instruction: false,
            bus_cycles_this_step: 0,
            ppu_tick_accum: 0,
            jam_reported: false,
        }
    }

    pub(crate) fn install(&mut self, mapper: Box<dyn Mapper>, region: Region) {
        self.mapper = Some(mapper);
        self.region = region;
        self.ppu
            .set_timing(region.prerender_scanline(), region.odd_dot_skip());
        self.apu.set_cpu_clock(region.cpu_clock_hz());
    }

    pub(crate) fn region(&self) -> Region {
        self.region
    }

    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        self.apu.set_sample_rate(sample_rate);
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.apu.sample_rate()
    }

    pub(crate) fn frame_buffer(&self) -> &[u8] {
        self.ppu.frame_buffer()
    }

    pub(crate) fn take_audio(&mut self) -> Vec<i16> {
        self.apu.take_samples()
    }

    pub(crate) fn set_pads(&mut self, pads: [u8; 3]) {
        self.pads = pads;
        if self.strobe {
            self.reload_shift_registers();
        }
    }

    pub(crate) fn set_zapper(&mut self, x: i16, y: i16, trigger: bool) {
        self.zapper_x = x;
        self.zapper_y = y;
        self.zapper_trigger = trigger;
    }

    pub(crate) fn reset(&mut self) {
        if self.mapper.is_none() {
            return;
        }

        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.p = FLAG_INTERRUPT | FLAG_UNUSED;
        self.sp = 0xFD;
        self.pads = [0; 3];
        self.port1_shift = 0;
        self.port2_shift = 0;
        self.strobe = false;
        self.open_bus = 0;
        self.pending_nmi = false;
        self.stall_cycles = 0;
        self.halted = false;
        self.cycles = 0;
        self.in_instruction = false;
        self.bus_cycles_this_step = 0;
        self.ppu_tick_accum = 0;
        self.jam_reported = false;

        self.ppu.reset();
        self.apu.reset();

        self.pc = self.read16(cpu::RESET_VECTOR);
        // Fixed power-up delay before the first instruction executes.
        self.cycles = 7;
    }

    /// Run the core until the PPU completes one video frame. Runtime faults
    /// never abort the frame; a jammed CPU simply freezes the picture.
    pub(crate) fn run_frame(&mut self, want_video: bool) {
        if self.mapper.is_none() || self.halted {
            if self.halted && !self.jam_reported {
                error!("CPU is jammed; frames will repeat the last picture");
                self.jam_reported = true;
            }
            return;
        }

        self.ppu.set_video_enabled(want_video);
        self.ppu.begin_frame();

        let mut guard: usize = 0;
        while !self.ppu.frame_done() && !self.halted {
            self.step_instruction();

            guard += 1;
            if guard > 10_000_000 {
                error!("frame guard tripped after 10M CPU steps");
                break;
            }
        }
    }

    /// One instruction plus the catch-up clocks for its internal cycles.
    pub(crate) fn step_instruction(&mut self) -> u32 {
        let cycles = self.cpu_step();
        let remaining = cycles.saturating_sub(self.bus_cycles_this_step);
        for _ in 0..remaining {
            self.clock_cpu_cycle();
        }
        self.bus_cycles_this_step = 0;
        cycles
    }

    /// Advance every clocked component by one CPU cycle: 3 PPU dots on NTSC,
    /// 16/5 on PAL via an integer accumulator.
    fn clock_cpu_cycle(&mut self) {
        self.cycles += 1;

        let ppu_ticks = match self.region {
            Region::Ntsc => 3,
            Region::Pal => {
                self.ppu_tick_accum += 16;
                let ticks = self.ppu_tick_accum / 5;
                self.ppu_tick_accum %= 5;
                ticks
            }
        };

        for _ in 0..ppu_ticks {
            if let Some(mapper) = self.mapper.as_mut() {
                self.ppu.tick(mapper.as_mut());
            }
            if self.ppu.take_nmi() {
                self.pending_nmi = true;
            }
        }

        if let Some(mapper) = self.mapper.as_mut() {
            mapper.end_cpu_cycle();
        }

        self.apu.tick();
        if let Some(addr) = self.apu.take_dmc_dma_request() {
            let value = self.dmc_dma_read(addr);
            self.apu.finish_dmc_dma(value);
            // The fetch steals CPU cycles; the count depends on cycle parity.
            let stall = if (self.cycles & 1) == 0 { 4 } else { 3 };
            self.stall_cycles += stall;
        }
    }

    fn tick_if_in_instruction(&mut self) {
        if self.in_instruction {
            self.bus_cycles_this_step += 1;
            self.clock_cpu_cycle();
        }
    }

    pub(crate) fn cpu_read(&mut self, addr: u16) -> u8 {
        self.tick_if_in_instruction();
        let value = match addr {
            0x0000..=0x1FFF => self.ram[(addr as usize) & 0x07FF],
            0x2000..=0x3FFF => {
                let reg = 0x2000 + (addr & 0x0007);
                if let Some(mapper) = self.mapper.as_mut() {
                    self.ppu.reg_read(reg, mapper.as_mut())
                } else {
                    self.open_bus
                }
            }
            0x4015 => self.apu.read_status(),
            0x4016 => self.read_port1(),
            0x4017 => self.read_port2(),
            // Write-only APU/IO range reads back the open bus.
            0x4000..=0x401F => self.open_bus,
            _ => match self.mapper.as_mut().and_then(|m| m.cpu_read(addr)) {
                Some(value) => value,
                None => self.open_bus,
            },
        };
        self.open_bus = value;
        value
    }

    pub(crate) fn cpu_write(&mut self, addr: u16, value: u8) {
        self.open_bus = value;
        self.tick_if_in_instruction();
        match addr {
            0x0000..=0x1FFF => {
                self.ram[(addr as usize) & 0x07FF] = value;
            }
            0x2000..=0x3FFF => {
                let reg = 0x2000 + (addr & 0x0007);
                if let Some(mapper) = self.mapper.as_mut() {
                    self.ppu.reg_write(reg, value, mapper.as_mut());
                }
            }
            0x4000..=0x4013 | 0x4015 | 0x4017 => {
                self.apu.write_register(addr, value);
            }
            0x4014 => self.oam_dma(value),
            0x4016 => self.write_strobe(value),
            0x4018..=0x401F => {}
            _ => {
                if let Some(mapper) = self.mapper.as_mut() {
                    mapper.cpu_write(addr, value);
                }
            }
        }
    }

    /// Raw bus access without clocking or IO side effects, for tools and
    /// tests. Only RAM and the cartridge respond.
    pub(crate) fn peek(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[(addr as usize) & 0x07FF],
            0x4020..=0xFFFF => self
                .mapper
                .as_mut()
                .and_then(|m| m.cpu_read(addr))
                .unwrap_or(0),
            _ => 0,
        }
    }

    pub(crate) fn poke(&mut self, addr: u16, value: u8) {
        match addr {
            0x0000..=0x1FFF => {
                self.ram[(addr as usize) & 0x07FF] = value;
            }
            0x4020..=0xFFFF => {
                if let Some(mapper) = self.mapper.as_mut() {
                    mapper.cpu_write(addr, value);
                }
            }
            _ => {}
        }
    }

    fn read_port1(&mut self) -> u8 {
        let bit = if self.strobe {
            self.pads[0] & 0x01
        } else {
            let out = (self.port1_shift & 0x0001) as u8;
            // Pad 3 shifts in behind pad 1, Four Score style; 1s after that.
            self.port1_shift = (self.port1_shift >> 1) | 0x8000;
            out
        };

        0x40 | bit
    }

    fn read_port2(&mut self) -> u8 {
        let pad_bit = if self.strobe {
            self.pads[1] & 0x01
        } else {
            let out = self.port2_shift & 0x01;
            self.port2_shift = (self.port2_shift >> 1) | 0x80;
            out
        };

        let light_bit = if self.ppu.light_sense(self.zapper_x, self.zapper_y) {
            0
        } else {
            1
        };
        let trigger_bit = u8::from(self.zapper_trigger);

        0x40 | pad_bit | (light_bit << 3) | (trigger_bit << 4)
    }

    fn write_strobe(&mut self, value: u8) {
        self.strobe = (value & 0x01) != 0;
        if self.strobe {
            self.reload_shift_registers();
        }
    }

    fn reload_shift_registers(&mut self) {
        self.port1_shift = (self.pads[0] as u16) | ((self.pads[2] as u16) << 8);
        self.port2_shift = self.pads[1];
    }

    fn oam_dma(&mut self, page: u8) {
        let prev = self.in_instruction;
        self.in_instruction = false;
        let base = (page as u16) << 8;
        let mut bytes = [0u8; 256];
        for (idx, slot) in bytes.iter_mut().enumerate() {
            *slot = self.cpu_read(base.wrapping_add(idx as u16));
        }
        self.in_instruction = prev;
        self.ppu.oam_dma_write(&bytes);

        // 513 CPU cycles on even phase, 514 on odd.
        let extra = (self.cycles & 0x01) as u32;
        self.stall_cycles += 513 + extra;
    }

    fn dmc_dma_read(&mut self, addr: u16) -> u8 {
        let value = match addr {
            0x0000..=0x1FFF => self.ram[(addr as usize) & 0x07FF],
            0x8000..=0xFFFF => self
                .mapper
                .as_mut()
                .and_then(|m| m.cpu_read(addr))
                .unwrap_or(self.open_bus),
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    pub(crate) fn read16(&mut self, addr: u16) -> u16 {
        let lo = self.cpu_read(addr) as u16;
        let hi = self.cpu_read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// JMP ($xxFF) wraps within the page instead of crossing it.
    pub(crate) fn read16_bug(&mut self, addr: u16) -> u16 {
        let lo = self.cpu_read(addr) as u16;
        let hi_addr = (addr & 0xFF00) | (addr.wrapping_add(1) & 0x00FF);
        let hi = self.cpu_read(hi_addr) as u16;
        (hi << 8) | lo
    }

    pub(crate) fn push(&mut self, value: u8) {
        let addr = 0x0100 | self.sp as u16;
        self.cpu_write(addr, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub(crate) fn pop(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        let addr = 0x0100 | self.sp as u16;
        self.cpu_read(addr)
    }

    pub(crate) fn push16(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push(value as u8);
    }

    pub(crate) fn pop16(&mut self) -> u16 {
        let lo = self.pop() as u16;
        let hi = self.pop() as u16;
        (hi << 8) | lo
    }

    pub(crate) fn fetch8(&mut self) -> u8 {
        let byte = self.cpu_read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    pub(crate) fn fetch16(&mut self) -> u16 {
        let lo = self.fetch8() as u16;
        let hi = self.fetch8() as u16;
        (hi << 8) | lo
    }

    pub(crate) fn flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    pub(crate) fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
        self.p |= FLAG_UNUSED;
    }

    pub(crate) fn set_zn(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
    }
}
