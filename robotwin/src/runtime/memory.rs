//! Flash, SRAM and EEPROM backing stores.

use super::profiles::BoardProfile;

pub const DEFAULT_FLASH_BYTES: usize = 32 * 1024;
pub const DEFAULT_SRAM_BYTES: usize = 2 * 1024;
pub const DEFAULT_EEPROM_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct VirtualMemory {
    pub flash: Vec<u8>,
    pub sram: Vec<u8>,
    pub eeprom: Vec<u8>,
}

impl VirtualMemory {
    pub fn new(flash_bytes: usize, sram_bytes: usize, eeprom_bytes: usize) -> Self {
        Self {
            flash: vec![0; flash_bytes],
            sram: vec![0; sram_bytes],
            eeprom: vec![0; eeprom_bytes],
        }
    }

    pub fn for_profile(profile: &BoardProfile) -> Self {
        Self::new(profile.flash_bytes, profile.sram_bytes, profile.eeprom_bytes)
    }

    pub fn clear_flash(&mut self) {
        self.flash.iter_mut().for_each(|b| *b = 0);
    }

    pub fn clear_sram(&mut self) {
        self.sram.iter_mut().for_each(|b| *b = 0);
    }

    pub fn clear_eeprom(&mut self) {
        self.eeprom.iter_mut().for_each(|b| *b = 0);
    }

    /// Replace flash contents with `image`, zero-filling the remainder.
    /// Bytes beyond the flash size are dropped.
    pub fn commit_flash(&mut self, image: &[u8]) {
        self.clear_flash();
        let len = image.len().min(self.flash.len());
        self.flash[..len].copy_from_slice(&image[..len]);
    }
}

impl Default for VirtualMemory {
    fn default() -> Self {
        Self::new(DEFAULT_FLASH_BYTES, DEFAULT_SRAM_BYTES, DEFAULT_EEPROM_BYTES)
    }
}
