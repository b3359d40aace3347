// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Memory-card filesystem view
//!
//! A raw 128 KiB card holds 16 blocks of 8 KiB; block 0 carries the
//! header frame and 15 directory frames, each encoding an allocation
//! state, a next-block pointer, a filename and a byte-wise XOR checksum.
//! Data blocks start with a title frame (display flags, a Shift-JIS
//! title, the icon CLUT). This module mounts save files from those
//! structures without touching the wire protocol.

use crate::core::error::{EmulatorError, Result};
use crate::core::sio::memcard::MemcardDevice;

pub const FRAME_SIZE: usize = 128;
pub const FRAMES_PER_BLOCK: u32 = 64;
pub const NUM_BLOCKS: u32 = 16;
pub const NUM_DIRECTORY_FRAMES: u32 = 15;

/// Allocation state of one directory frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAllocation {
    FirstBlock,
    MiddleBlock,
    LastBlock,
    Free,
    DeletedFirst,
    DeletedMiddle,
    DeletedLast,
    Unknown(u32),
}

impl BlockAllocation {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0x51 => Self::FirstBlock,
            0x52 => Self::MiddleBlock,
            0x53 => Self::LastBlock,
            0xA0 => Self::Free,
            0xA1 => Self::DeletedFirst,
            0xA2 => Self::DeletedMiddle,
            0xA3 => Self::DeletedLast,
            other => Self::Unknown(other),
        }
    }
}

const INVALID_BLOCK_PTR: u16 = 0xFFFF;

/// One parsed directory frame
#[derive(Debug, Clone)]
pub struct DirectoryFrame {
    pub allocation: BlockAllocation,
    pub file_size: u32,
    pub next_block: u16,
    pub filename: String,
    pub checksum_ok: bool,
}

impl DirectoryFrame {
    fn parse(frame: &[u8]) -> Self {
        let allocation =
            BlockAllocation::from_raw(u32::from_le_bytes(frame[0..4].try_into().unwrap()));
        let file_size = u32::from_le_bytes(frame[4..8].try_into().unwrap());
        let next_block = u16::from_le_bytes(frame[8..10].try_into().unwrap());

        let name_bytes = &frame[0xA..0x1F];
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let filename = String::from_utf8_lossy(&name_bytes[..name_end]).to_string();

        let checksum = frame[..FRAME_SIZE - 1].iter().fold(0u8, |acc, &b| acc ^ b);
        let checksum_ok = checksum == frame[FRAME_SIZE - 1];

        Self {
            allocation,
            file_size,
            next_block,
            filename,
            checksum_ok,
        }
    }
}

/// Title frame of a save's first data block
#[derive(Debug, Clone)]
pub struct TitleFrame {
    /// 0x11/0x12/0x13: how many icon frames animate
    pub display_flag: u8,
    /// Shift-JIS title, raw bytes
    pub title: Vec<u8>,
    /// 16-color icon CLUT (ABGR1555)
    pub icon_clut: [u16; 16],
}

impl TitleFrame {
    fn parse(frame: &[u8]) -> Option<Self> {
        if &frame[0..2] != b"SC" {
            return None;
        }
        let mut icon_clut = [0u16; 16];
        for (i, entry) in icon_clut.iter_mut().enumerate() {
            *entry = u16::from_le_bytes(frame[0x60 + i * 2..0x60 + i * 2 + 2].try_into().unwrap());
        }
        Some(Self {
            display_flag: frame[2],
            title: frame[0x04..0x44].to_vec(),
            icon_clut,
        })
    }
}

/// A mounted save file
#[derive(Debug, Clone)]
pub struct SaveFile {
    pub name: String,
    pub size: u32,
    /// Data blocks in chain order (1-based block numbers)
    pub blocks: Vec<u16>,
    pub title: Option<TitleFrame>,
}

fn read_frame(card: &dyn MemcardDevice, frame: u32) -> Result<Vec<u8>> {
    card.read_frame(frame)
        .ok_or_else(|| EmulatorError::MemcardError(format!("frame {frame} unreadable")))
}

/// Walk the directory frames and mount every live save
pub fn list_saves(card: &dyn MemcardDevice) -> Result<Vec<SaveFile>> {
    let mut saves = Vec::new();

    for index in 0..NUM_DIRECTORY_FRAMES {
        // Directory frames follow the header frame
        let frame = read_frame(card, 1 + index)?;
        let dir = DirectoryFrame::parse(&frame);

        if dir.allocation != BlockAllocation::FirstBlock {
            continue;
        }
        if !dir.checksum_ok {
            log::warn!(
                "[MCFS] Directory frame {} has a bad checksum, skipping {}",
                index,
                dir.filename
            );
            continue;
        }

        // Chain middle/last blocks through the next pointers
        let mut blocks = vec![index as u16 + 1];
        let mut next = dir.next_block;
        while next != INVALID_BLOCK_PTR && blocks.len() < NUM_BLOCKS as usize {
            blocks.push(next + 1);
            let chained = DirectoryFrame::parse(&read_frame(card, 1 + next as u32)?);
            next = chained.next_block;
        }

        let title_frame = read_frame(card, blocks[0] as u32 * FRAMES_PER_BLOCK)?;
        let title = TitleFrame::parse(&title_frame);

        saves.push(SaveFile {
            name: dir.filename,
            size: dir.file_size,
            blocks,
            title,
        });
    }

    Ok(saves)
}

/// Read a save's data by walking its block chain
pub fn read_save(card: &dyn MemcardDevice, save: &SaveFile) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(save.blocks.len() * (FRAMES_PER_BLOCK as usize) * FRAME_SIZE);
    for &block in &save.blocks {
        for frame in 0..FRAMES_PER_BLOCK {
            data.extend_from_slice(&read_frame(card, block as u32 * FRAMES_PER_BLOCK + frame)?);
        }
    }
    data.truncate(save.size as usize);
    Ok(data)
}

/// Decode the printable subset of a Shift-JIS title
///
/// Full-width ASCII (0x8260.. letters, 0x824F.. digits, 0x8140 space and
/// common punctuation) covers what memory-card titles actually use.
pub fn decode_shift_jis(raw: &[u8]) -> String {
    let mut out = String::new();
    let mut iter = raw.chunks_exact(2);
    for pair in &mut iter {
        let (hi, lo) = (pair[0], pair[1]);
        if hi == 0 {
            break;
        }
        let decoded = match (hi, lo) {
            (0x81, 0x40) => Some(' '),
            (0x81, 0x43) => Some(','),
            (0x81, 0x44) => Some('.'),
            (0x81, 0x46) => Some(':'),
            (0x81, 0x49) => Some('!'),
            (0x81, 0x5E) => Some('/'),
            (0x81, 0x68) => Some('"'),
            (0x81, 0x69) => Some('('),
            (0x81, 0x6A) => Some(')'),
            (0x81, 0x7B) => Some('+'),
            (0x81, 0x7C) => Some('-'),
            (0x82, 0x4F..=0x58) => Some((b'0' + (lo - 0x4F)) as char),
            (0x82, 0x60..=0x79) => Some((b'A' + (lo - 0x60)) as char),
            (0x82, 0x81..=0x9A) => Some((b'a' + (lo - 0x81)) as char),
            _ => None,
        };
        match decoded {
            Some(ch) => out.push(ch),
            None => out.push('?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sio::memcard::MemoryCard;

    fn put_frame(card: &mut MemoryCard, frame: u32, data: &[u8]) {
        assert!(MemcardDevice::write_frame(card, frame, data));
    }

    /// Hand-build a card with one two-block save named BESLES-01234
    fn build_card() -> MemoryCard {
        let mut card = MemoryCard::new();

        let mut dir0 = vec![0u8; FRAME_SIZE];
        dir0[0..4].copy_from_slice(&0x51u32.to_le_bytes());
        dir0[4..8].copy_from_slice(&0x4000u32.to_le_bytes()); // two blocks
        dir0[8..10].copy_from_slice(&1u16.to_le_bytes()); // chain to dir frame 1
        dir0[0xA..0xA + 12].copy_from_slice(b"BESLES-01234");
        let checksum = dir0[..FRAME_SIZE - 1].iter().fold(0u8, |a, &b| a ^ b);
        dir0[FRAME_SIZE - 1] = checksum;
        put_frame(&mut card, 1, &dir0);

        let mut dir1 = vec![0u8; FRAME_SIZE];
        dir1[0..4].copy_from_slice(&0x53u32.to_le_bytes());
        dir1[8..10].copy_from_slice(&0xFFFFu16.to_le_bytes());
        let checksum = dir1[..FRAME_SIZE - 1].iter().fold(0u8, |a, &b| a ^ b);
        dir1[FRAME_SIZE - 1] = checksum;
        put_frame(&mut card, 2, &dir1);

        // Title frame of block 1
        let mut title = vec![0u8; FRAME_SIZE];
        title[0..2].copy_from_slice(b"SC");
        title[2] = 0x11;
        // "AB12" in full-width Shift-JIS
        title[4..12].copy_from_slice(&[0x82, 0x60, 0x82, 0x61, 0x82, 0x50, 0x82, 0x51]);
        put_frame(&mut card, FRAMES_PER_BLOCK, &title);

        // Recognizable first data bytes
        let mut frame1 = vec![0u8; FRAME_SIZE];
        frame1[0..4].copy_from_slice(b"DATA");
        put_frame(&mut card, FRAMES_PER_BLOCK + 1, &frame1);

        card
    }

    #[test]
    fn test_list_saves_mounts_block_chain() {
        let card = build_card();
        let saves = list_saves(&card).unwrap();
        assert_eq!(saves.len(), 1);

        let save = &saves[0];
        assert_eq!(save.name, "BESLES-01234");
        assert_eq!(save.size, 0x4000);
        assert_eq!(save.blocks, vec![1, 2]);

        let title = save.title.as_ref().expect("title frame present");
        assert_eq!(title.display_flag, 0x11);
        assert_eq!(decode_shift_jis(&title.title), "AB12");
    }

    #[test]
    fn test_read_save_truncates_to_size() {
        let card = build_card();
        let saves = list_saves(&card).unwrap();
        let data = read_save(&card, &saves[0]).unwrap();
        assert_eq!(data.len(), 0x4000);
        // Title frame leads the data
        assert_eq!(&data[0..2], b"SC");
    }

    #[test]
    fn test_bad_checksum_skips_entry() {
        let mut card = build_card();
        let mut dir0 = MemcardDevice::read_frame(&card, 1).unwrap();
        dir0[FRAME_SIZE - 1] ^= 0xFF;
        put_frame(&mut card, 1, &dir0);

        let saves = list_saves(&card).unwrap();
        assert!(saves.is_empty());
    }

    #[test]
    fn test_blank_card_has_no_saves() {
        let card = MemoryCard::new();
        assert!(list_saves(&card).unwrap().is_empty());
    }

    #[test]
    fn test_shift_jis_decode_unknown_pairs() {
        assert_eq!(decode_shift_jis(&[0x88, 0x9F]), "?");
        assert_eq!(decode_shift_jis(&[0x82, 0x60, 0x00, 0x00]), "A");
    }
}
