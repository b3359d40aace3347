// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Memory card protocol and image
//!
//! A 128 KiB card of 1024 sectors, 128 bytes each. READ streams a sector
//! followed by an XOR checksum (sector MSB, LSB and the 128 data bytes)
//! and the end byte `'G'`. WRITE reverses the streaming: the card verifies
//! the checksum and answers `'G'`, 0x4E on a bad checksum, 0xFF on a bad
//! sector. The flag byte reads 0x08 until the first successful write.

use std::path::{Path, PathBuf};

use crate::core::error::{EmulatorError, Result};

pub const MEMCARD_SIZE: usize = 128 * 1024;
pub const SECTOR_SIZE: usize = 128;
pub const MAX_SECTOR: u32 = 0x3FF;

const CARD_ID: [u8; 2] = [0x5A, 0x5D];
const CMD_ACK: [u8; 2] = [0x5C, 0x5D];

const END_BYTE: u8 = b'G';
const BAD_CHECKSUM: u8 = 0x4E;
const BAD_SECTOR: u8 = 0xFF;

/// Flag byte: 0x08 until the directory has been read (first write)
const FLAG_FRESH: u8 = 0x08;
const FLAG_DIR_READ: u8 = 0x00;

/// A card on the controller bus
pub trait MemcardDevice {
    /// Exchange one byte; the bool is the /ACK pulse
    fn exchange(&mut self, value: u8) -> (u8, bool);
    fn reset(&mut self);
    fn read_frame(&self, frame: u32) -> Option<Vec<u8>>;
    fn write_frame(&mut self, frame: u32, data: &[u8]) -> bool;
    /// Bumped on every committed write (save-file views resync on change)
    fn update_counter(&self) -> u32 {
        0
    }
}

/// Empty slot stand-in
pub struct NullMemcard;

impl MemcardDevice for NullMemcard {
    fn exchange(&mut self, _value: u8) -> (u8, bool) {
        (0xFF, false)
    }

    fn reset(&mut self) {}

    fn read_frame(&self, _frame: u32) -> Option<Vec<u8>> {
        None
    }

    fn write_frame(&mut self, _frame: u32, _data: &[u8]) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardState {
    Idle,
    GetId,
    Read,
    Write,
}

/// READ sub-states in wire order, with their per-state byte counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    Id,
    RecvSector,
    SendAck,
    SendConfirm,
    SendSector,
    SendChecksum,
    SendEnd,
}

impl ReadPhase {
    fn steps(self) -> u32 {
        match self {
            ReadPhase::SendSector => 128,
            ReadPhase::SendChecksum | ReadPhase::SendEnd => 1,
            _ => 2,
        }
    }

    fn next(self) -> Self {
        match self {
            ReadPhase::Id => ReadPhase::RecvSector,
            ReadPhase::RecvSector => ReadPhase::SendAck,
            ReadPhase::SendAck => ReadPhase::SendConfirm,
            ReadPhase::SendConfirm => ReadPhase::SendSector,
            ReadPhase::SendSector => ReadPhase::SendChecksum,
            _ => ReadPhase::SendEnd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WritePhase {
    Id,
    RecvSector,
    RecvData,
    RecvChecksum,
    SendAck,
    SendEnd,
}

impl WritePhase {
    fn steps(self) -> u32 {
        match self {
            WritePhase::RecvData => 128,
            WritePhase::RecvChecksum | WritePhase::SendEnd => 1,
            _ => 2,
        }
    }

    fn next(self) -> Self {
        match self {
            WritePhase::Id => WritePhase::RecvSector,
            WritePhase::RecvSector => WritePhase::RecvData,
            WritePhase::RecvData => WritePhase::RecvChecksum,
            WritePhase::RecvChecksum => WritePhase::SendAck,
            _ => WritePhase::SendEnd,
        }
    }
}

/// An official 128 KiB memory card
pub struct MemoryCard {
    path: Option<PathBuf>,
    data: Vec<u8>,

    state: CardState,
    flag: u8,
    read_phase: ReadPhase,
    write_phase: WritePhase,
    step: u32,
    max_steps: u32,

    selected_sector: u32,
    sector_valid: bool,
    checksum_valid: bool,
    staging: [u8; SECTOR_SIZE],

    update_counter: u32,
}

impl MemoryCard {
    /// Blank in-memory card
    pub fn new() -> Self {
        Self {
            path: None,
            data: vec![0u8; MEMCARD_SIZE],
            state: CardState::Idle,
            flag: FLAG_FRESH,
            read_phase: ReadPhase::Id,
            write_phase: WritePhase::Id,
            step: 0,
            max_steps: 0,
            selected_sector: 0,
            sector_valid: false,
            checksum_valid: false,
            staging: [0u8; SECTOR_SIZE],
            update_counter: 0,
        }
    }

    /// Load a card image, creating an empty 128 KiB file when missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, vec![0u8; MEMCARD_SIZE])?;
            log::info!("[MEMCARD] Created empty image {}", path.display());
        }

        let data = std::fs::read(path)?;
        if data.len() != MEMCARD_SIZE {
            return Err(EmulatorError::MemcardError(format!(
                "{}: expected {} bytes, got {}",
                path.display(),
                MEMCARD_SIZE,
                data.len()
            )));
        }

        let mut card = Self::new();
        card.data = data;
        card.path = Some(path.to_path_buf());
        Ok(card)
    }

    fn persist(&self) {
        if let Some(path) = &self.path {
            if let Err(err) = std::fs::write(path, &self.data) {
                log::error!("[MEMCARD] Flush to {} failed: {err}", path.display());
            }
        }
    }

    fn sector_checksum(&self, sector: u32, data: &[u8]) -> u8 {
        let mut checksum = (sector >> 8) as u8 ^ sector as u8;
        for &byte in data {
            checksum ^= byte;
        }
        checksum
    }

    fn process_idle(&mut self, value: u8) -> u8 {
        match value {
            0x53 => self.state = CardState::GetId,
            0x52 => {
                self.state = CardState::Read;
                self.read_phase = ReadPhase::Id;
            }
            0x57 => {
                self.state = CardState::Write;
                self.write_phase = WritePhase::Id;
            }
            _ => {}
        }
        self.step = 0;
        self.max_steps = 2;
        self.selected_sector = 0;
        self.flag
    }

    fn process_get_id(&mut self, _value: u8) -> u8 {
        // GETID: card id, acks, then the fixed geometry words
        const GETID_RESPONSE: [u8; 8] = [0x5A, 0x5D, 0x5C, 0x5D, 0x04, 0x00, 0x00, 0x80];
        let response = GETID_RESPONSE
            .get(self.step as usize)
            .copied()
            .unwrap_or(0xFF);
        self.step += 1;
        if self.step as usize >= GETID_RESPONSE.len() {
            self.state = CardState::Idle;
            self.step = 0;
        }
        response
    }

    fn process_read(&mut self, value: u8) -> u8 {
        let response = match self.read_phase {
            ReadPhase::Id => CARD_ID[self.step as usize],
            ReadPhase::RecvSector => {
                self.selected_sector = ((self.selected_sector << 8) | value as u32) & 0xFFFF;
                self.sector_valid = self.selected_sector <= MAX_SECTOR;
                0x00
            }
            ReadPhase::SendAck => CMD_ACK[self.step as usize],
            ReadPhase::SendConfirm => {
                if !self.sector_valid {
                    0xFF
                } else if self.step == 0 {
                    (self.selected_sector >> 8) as u8
                } else {
                    self.selected_sector as u8
                }
            }
            ReadPhase::SendSector => {
                let offset = self.selected_sector as usize * SECTOR_SIZE + self.step as usize;
                self.data[offset]
            }
            ReadPhase::SendChecksum => {
                let start = self.selected_sector as usize * SECTOR_SIZE;
                let sector = self.selected_sector;
                self.sector_checksum(sector, &self.data[start..start + SECTOR_SIZE])
            }
            ReadPhase::SendEnd => END_BYTE,
        };

        self.step += 1;
        if self.step == self.max_steps {
            self.step = 0;
            // An invalid sector aborts once the confirmation went out
            if self.read_phase == ReadPhase::SendEnd
                || (self.read_phase == ReadPhase::SendConfirm && !self.sector_valid)
            {
                self.state = CardState::Idle;
                self.selected_sector = 0;
            } else {
                self.read_phase = self.read_phase.next();
                self.max_steps = self.read_phase.steps();
            }
        }

        response
    }

    fn process_write(&mut self, value: u8) -> u8 {
        let response = match self.write_phase {
            WritePhase::Id => CARD_ID[self.step as usize],
            WritePhase::RecvSector => {
                self.selected_sector = ((self.selected_sector << 8) | value as u32) & 0xFFFF;
                self.sector_valid = self.selected_sector <= MAX_SECTOR;
                0x00
            }
            WritePhase::RecvData => {
                self.staging[self.step as usize] = value;
                0x00
            }
            WritePhase::RecvChecksum => {
                self.checksum_valid = self.sector_valid
                    && self.sector_checksum(self.selected_sector, &self.staging) == value;
                0x00
            }
            WritePhase::SendAck => CMD_ACK[self.step as usize],
            WritePhase::SendEnd => {
                if !self.sector_valid {
                    BAD_SECTOR
                } else if !self.checksum_valid {
                    BAD_CHECKSUM
                } else {
                    let offset = self.selected_sector as usize * SECTOR_SIZE;
                    self.data[offset..offset + SECTOR_SIZE].copy_from_slice(&self.staging);
                    self.update_counter += 1;
                    self.persist();
                    END_BYTE
                }
            }
        };

        self.step += 1;
        if self.step == self.max_steps {
            self.step = 0;
            if self.write_phase == WritePhase::SendEnd {
                self.state = CardState::Idle;
                self.selected_sector = 0;
                self.flag = FLAG_DIR_READ;
            } else {
                self.write_phase = self.write_phase.next();
                self.max_steps = self.write_phase.steps();
            }
        }

        response
    }
}

impl Default for MemoryCard {
    fn default() -> Self {
        Self::new()
    }
}

impl MemcardDevice for MemoryCard {
    fn exchange(&mut self, value: u8) -> (u8, bool) {
        let response = match self.state {
            CardState::Idle => self.process_idle(value),
            CardState::GetId => self.process_get_id(value),
            CardState::Read => self.process_read(value),
            CardState::Write => self.process_write(value),
        };
        (response, true)
    }

    fn reset(&mut self) {
        self.state = CardState::Idle;
        self.read_phase = ReadPhase::Id;
        self.write_phase = WritePhase::Id;
        self.step = 0;
        self.selected_sector = 0;
        self.sector_valid = false;
        self.checksum_valid = false;
    }

    fn read_frame(&self, frame: u32) -> Option<Vec<u8>> {
        if frame > MAX_SECTOR {
            return None;
        }
        let start = frame as usize * SECTOR_SIZE;
        Some(self.data[start..start + SECTOR_SIZE].to_vec())
    }

    fn write_frame(&mut self, frame: u32, data: &[u8]) -> bool {
        if frame > MAX_SECTOR || data.len() != SECTOR_SIZE {
            return false;
        }
        let start = frame as usize * SECTOR_SIZE;
        self.data[start..start + SECTOR_SIZE].copy_from_slice(data);
        self.update_counter += 1;
        self.persist();
        true
    }

    fn update_counter(&self) -> u32 {
        self.update_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a full READ of `sector`, returning (data, checksum, end byte)
    fn read_sector(card: &mut MemoryCard, sector: u16) -> (Vec<u8>, u8, u8) {
        card.exchange(0x52);
        card.exchange(0x00); // id 0x5A
        card.exchange(0x00); // id 0x5D
        card.exchange((sector >> 8) as u8);
        card.exchange(sector as u8);
        card.exchange(0x00); // ack 0x5C
        card.exchange(0x00); // ack 0x5D
        card.exchange(0x00); // confirm MSB
        card.exchange(0x00); // confirm LSB

        let mut data = Vec::with_capacity(SECTOR_SIZE);
        for _ in 0..SECTOR_SIZE {
            data.push(card.exchange(0x00).0);
        }
        let checksum = card.exchange(0x00).0;
        let end = card.exchange(0x00).0;
        (data, checksum, end)
    }

    /// Drive a full WRITE of `sector`, returning the end byte
    fn write_sector(card: &mut MemoryCard, sector: u16, data: &[u8; SECTOR_SIZE], checksum: u8) -> u8 {
        card.exchange(0x57);
        card.exchange(0x00);
        card.exchange(0x00);
        card.exchange((sector >> 8) as u8);
        card.exchange(sector as u8);
        for &byte in data.iter() {
            card.exchange(byte);
        }
        card.exchange(checksum);
        card.exchange(0x00); // ack 0x5C
        card.exchange(0x00); // ack 0x5D
        card.exchange(0x00).0
    }

    fn checksum_of(sector: u16, data: &[u8]) -> u8 {
        let mut checksum = (sector >> 8) as u8 ^ sector as u8;
        for &b in data {
            checksum ^= b;
        }
        checksum
    }

    #[test]
    fn test_read_sector_zero_protocol() {
        let mut card = MemoryCard::new();
        card.data[0..4].copy_from_slice(b"MC\x00\x0E");

        // First byte after selection reports the fresh flag
        assert_eq!(card.exchange(0x52).0, 0x08);
        assert_eq!(card.exchange(0x00).0, 0x5A);
        assert_eq!(card.exchange(0x00).0, 0x5D);
        card.reset();

        let (data, checksum, end) = read_sector(&mut card, 0);
        assert_eq!(&data[0..2], b"MC");
        assert_eq!(checksum, checksum_of(0, &data));
        assert_eq!(end, b'G');
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let mut card = MemoryCard::new();
        let mut payload = [0u8; SECTOR_SIZE];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let sector = 0x0042;
        let end = write_sector(&mut card, sector, &payload, checksum_of(sector, &payload));
        assert_eq!(end, b'G');

        let (data, _, _) = read_sector(&mut card, sector);
        assert_eq!(data, payload.to_vec());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut card = MemoryCard::new();
        let payload = [0x5Au8; SECTOR_SIZE];
        let end = write_sector(&mut card, 3, &payload, 0x00);
        assert_eq!(end, 0x4E);
        // Nothing was committed
        assert_eq!(card.read_frame(3).unwrap(), vec![0u8; SECTOR_SIZE]);
    }

    #[test]
    fn test_bad_sector_rejected() {
        let mut card = MemoryCard::new();
        let payload = [0u8; SECTOR_SIZE];
        let end = write_sector(&mut card, 0x400, &payload, checksum_of(0x400, &payload));
        assert_eq!(end, 0xFF);
    }

    #[test]
    fn test_flag_clears_after_first_write() {
        let mut card = MemoryCard::new();
        assert_eq!(card.exchange(0x53).0, 0x08, "fresh card");
        card.reset();

        let payload = [1u8; SECTOR_SIZE];
        write_sector(&mut card, 0, &payload, checksum_of(0, &payload));

        assert_eq!(card.exchange(0x53).0, 0x00, "directory-read flag toggled");
    }

    #[test]
    fn test_load_creates_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.mc");
        let card = MemoryCard::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(card.read_frame(0).unwrap().len(), SECTOR_SIZE);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), MEMCARD_SIZE as u64);
    }

    #[test]
    fn test_update_counter_bumps_on_write() {
        let mut card = MemoryCard::new();
        assert_eq!(card.update_counter(), 0);
        let payload = [9u8; SECTOR_SIZE];
        write_sector(&mut card, 1, &payload, checksum_of(1, &payload));
        assert_eq!(card.update_counter(), 1);
    }
}
