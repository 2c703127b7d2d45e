use std::{fs, path::Path};

use thiserror::Error;

use super::Region;
use super::mapper::Mirroring;

/// Errors raised while parsing or loading a ROM image. The machine is left
/// untouched when any of these is returned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("not an iNES image (bad header magic)")]
    NotInes,
    #[error("image truncated: expected {expected} bytes of {section}")]
    Truncated {
        section: &'static str,
        expected: usize,
    },
    #[error("NES 2.0 exponent-encoded ROM sizes are not supported")]
    UnsupportedSize,
    #[error("unsupported mapper {0}")]
    UnsupportedMapper(u16),
    #[error("failed to read ROM image: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed, immutable ROM image.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub mapper_id: u16,
    pub submapper_id: u8,
    pub mirroring: Mirroring,
    pub four_screen: bool,
    pub has_battery: bool,
    pub region_hint: Option<Region>,
    pub prg_rom: Vec<u8>,
    pub chr_data: Vec<u8>,
    pub chr_is_ram: bool,
    pub prg_ram_size: usize,
}

impl Cartridge {
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < 16 || &bytes[0..4] != b"NES\x1A" {
            return Err(LoadError::NotInes);
        }

        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let is_nes2 = (flags7 & 0x0C) == 0x08;

        let mapper_low = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let mapper_id = if is_nes2 {
            mapper_low | (((bytes[8] as u16) & 0x0F) << 8)
        } else {
            mapper_low
        };
        let submapper_id = if is_nes2 { bytes[8] >> 4 } else { 0 };

        let four_screen = (flags6 & 0x08) != 0;
        let mirroring = if four_screen {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let has_battery = (flags6 & 0x02) != 0;
        let trainer_present = (flags6 & 0x04) != 0;

        let region_hint = if is_nes2 {
            match bytes[12] & 0x03 {
                0 => Some(Region::Ntsc),
                1 => Some(Region::Pal),
                _ => None,
            }
        } else if (bytes[9] & 0x01) != 0 {
            Some(Region::Pal)
        } else {
            None
        };

        let (prg_rom_size, chr_rom_size, prg_ram_size) = if is_nes2 {
            let prg_msb = (bytes[9] & 0x0F) as usize;
            let chr_msb = (bytes[9] >> 4) as usize;
            if prg_msb == 0x0F || chr_msb == 0x0F {
                return Err(LoadError::UnsupportedSize);
            }

            let prg_units = ((prg_msb << 8) | bytes[4] as usize).max(1);
            let chr_units = (chr_msb << 8) | bytes[5] as usize;

            let prg_ram_shift = bytes[10] & 0x0F;
            let prg_ram = if prg_ram_shift == 0 {
                8 * 1024
            } else {
                64usize << prg_ram_shift
            };

            (prg_units * 16 * 1024, chr_units * 8 * 1024, prg_ram)
        } else {
            let prg_units = (bytes[4] as usize).max(1);
            let chr_units = bytes[5] as usize;
            let prg_ram_units = if bytes[8] == 0 { 1 } else { bytes[8] as usize };
            (
                prg_units * 16 * 1024,
                chr_units * 8 * 1024,
                prg_ram_units * 8 * 1024,
            )
        };

        let mut cursor = 16usize;
        if trainer_present {
            cursor += 512;
        }

        if bytes.len() < cursor + prg_rom_size {
            return Err(LoadError::Truncated {
                section: "PRG ROM",
                expected: prg_rom_size,
            });
        }
        let prg_rom = bytes[cursor..cursor + prg_rom_size].to_vec();
        cursor += prg_rom_size;

        let (chr_data, chr_is_ram) = if chr_rom_size == 0 {
            // CHR-RAM board: give it the standard 8K.
            (vec![0; 8 * 1024], true)
        } else {
            if bytes.len() < cursor + chr_rom_size {
                return Err(LoadError::Truncated {
                    section: "CHR ROM",
                    expected: chr_rom_size,
                });
            }
            (bytes[cursor..cursor + chr_rom_size].to_vec(), false)
        };

        Ok(Self {
            mapper_id,
            submapper_id,
            mirroring,
            four_screen,
            has_battery,
            region_hint,
            prg_rom,
            chr_data,
            chr_is_ram,
            prg_ram_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ines_image(mapper_id: u8, prg_units: u8, chr_units: u8, flags6_low: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(b"NES\x1A");
        bytes[4] = prg_units;
        bytes[5] = chr_units;
        bytes[6] = (mapper_id << 4) | flags6_low;
        bytes.extend(vec![0xAA; prg_units as usize * 16 * 1024]);
        bytes.extend(vec![0x55; chr_units as usize * 8 * 1024]);
        bytes
    }

    #[test]
    fn parses_plain_ines_header() {
        let cart = Cartridge::parse(&ines_image(0, 2, 1, 0x01)).unwrap();
        assert_eq!(cart.mapper_id, 0);
        assert_eq!(cart.mirroring, Mirroring::Vertical);
        assert!(!cart.has_battery);
        assert_eq!(cart.prg_rom.len(), 32 * 1024);
        assert_eq!(cart.chr_data.len(), 8 * 1024);
        assert!(!cart.chr_is_ram);
    }

    #[test]
    fn battery_and_four_screen_bits() {
        let cart = Cartridge::parse(&ines_image(4, 1, 1, 0x0A)).unwrap();
        assert!(cart.has_battery);
        assert_eq!(cart.mirroring, Mirroring::FourScreen);
    }

    #[test]
    fn missing_chr_becomes_ram() {
        let cart = Cartridge::parse(&ines_image(2, 1, 0, 0x00)).unwrap();
        assert!(cart.chr_is_ram);
        assert_eq!(cart.chr_data.len(), 8 * 1024);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = ines_image(0, 1, 1, 0);
        bytes[0] = b'X';
        assert!(matches!(Cartridge::parse(&bytes), Err(LoadError::NotInes)));
    }

    #[test]
    fn rejects_truncated_prg() {
        let mut bytes = ines_image(0, 2, 0, 0);
        bytes.truncate(16 + 20 * 1024);
        assert!(matches!(
            Cartridge::parse(&bytes),
            Err(LoadError::Truncated {
                section: "PRG ROM",
                ..
            })
        ));
    }

    #[test]
    fn pal_hint_from_tv_system_byte() {
        let mut bytes = ines_image(0, 1, 1, 0);
        bytes[9] = 0x01;
        let cart = Cartridge::parse(&bytes).unwrap();
        assert_eq!(cart.region_hint, Some(Region::Pal));
    }

    #[test]
    fn nes2_mapper_high_bits() {
        let mut bytes = ines_image(0, 1, 1, 0);
        bytes[7] = 0x08;
        bytes[8] = 0x21; // submapper 2, mapper id bit 8 set
        let cart = Cartridge::parse(&bytes).unwrap();
        assert_eq!(cart.mapper_id, 0x100);
        assert_eq!(cart.submapper_id, 2);
    }
}
