// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! ISO 9660 view of a disc
//!
//! Extracts the primary volume descriptor, the root directory record and
//! file entries so `cdrom:\NAME;1` paths resolve to sector runs. Both-
//! endian fields are read from their little-endian half.

use crate::core::cdrom::disc::{CdLocation, Disc, SECONDS_PER_MINUTE, SECTORS_PER_SECOND};
use crate::core::error::{EmulatorError, Result};

/// Logical block size ISO 9660 uses on PS1 discs
const BLOCK_SIZE: u32 = 0x800;

/// The primary volume descriptor lives at logical block 16
const PVD_BLOCK: u32 = 16;

/// Directory-record flag: entry is itself a directory
const FLAG_DIRECTORY: u8 = 1 << 1;

/// Logical block -> minute/second/sector, re-adding the lead-in
fn block_location(block: u32) -> CdLocation {
    let absolute = block as u64 + 2 * SECTORS_PER_SECOND;
    CdLocation {
        mm: absolute / (SECONDS_PER_MINUTE * SECTORS_PER_SECOND),
        ss: (absolute / SECTORS_PER_SECOND) % SECONDS_PER_MINUTE,
        sect: absolute % SECTORS_PER_SECOND,
    }
}

/// One parsed directory record
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub name: String,
    pub block: u32,
    pub size: u32,
    pub is_directory: bool,
}

impl DirectoryRecord {
    /// Parse one record; `None` when the length byte says "no more
    /// records in this sector"
    fn parse(data: &[u8]) -> Option<(Self, usize)> {
        let record_len = *data.first()? as usize;
        if record_len == 0 || record_len > data.len() {
            return None;
        }

        let block = u32::from_le_bytes(data[2..6].try_into().ok()?);
        let size = u32::from_le_bytes(data[10..14].try_into().ok()?);
        let flags = data[25];
        let name_len = data[32] as usize;
        let name_bytes = data.get(33..33 + name_len)?;

        let name = match name_bytes {
            [0x00] => ".".to_string(),
            [0x01] => "..".to_string(),
            bytes => String::from_utf8_lossy(bytes).to_string(),
        };

        Some((
            Self {
                name,
                block,
                size,
                is_directory: flags & FLAG_DIRECTORY != 0,
            },
            record_len,
        ))
    }
}

/// Primary volume descriptor fields the kernel cares about
#[derive(Debug, Clone)]
pub struct PrimaryVolume {
    pub volume_identifier: String,
    pub logical_block_size: u32,
    pub root: DirectoryRecord,
}

/// The license text stamped into the lead-in data sectors
pub fn read_license_string(disc: &mut Disc) -> Result<String> {
    let sector = disc.read_sector_data(block_location(4))?;
    let end = sector.iter().position(|&b| b == 0).unwrap_or(0x80).min(0x80);
    Ok(String::from_utf8_lossy(&sector[..end])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" "))
}

/// Read and validate the primary volume descriptor
pub fn read_primary_volume(disc: &mut Disc) -> Result<PrimaryVolume> {
    let sector = disc.read_sector_data(block_location(PVD_BLOCK))?;

    if sector[0] != 0x01 || &sector[1..6] != b"CD001" {
        return Err(EmulatorError::DiscError(
            "missing primary volume descriptor".into(),
        ));
    }

    let logical_block_size = u16::from_le_bytes(sector[128..130].try_into().unwrap()) as u32;
    if logical_block_size != BLOCK_SIZE {
        return Err(EmulatorError::DiscError(format!(
            "unsupported logical block size {logical_block_size}"
        )));
    }

    let volume_identifier = String::from_utf8_lossy(&sector[40..72]).trim_end().to_string();

    let (root, _) = DirectoryRecord::parse(&sector[156..190]).ok_or_else(|| {
        EmulatorError::DiscError("malformed root directory record".into())
    })?;

    Ok(PrimaryVolume {
        volume_identifier,
        logical_block_size,
        root,
    })
}

/// List the records inside a directory
pub fn read_directory(disc: &mut Disc, dir: &DirectoryRecord) -> Result<Vec<DirectoryRecord>> {
    let mut entries = Vec::new();
    let sectors = dir.size.div_ceil(BLOCK_SIZE);

    for index in 0..sectors {
        let sector = disc.read_sector_data(block_location(dir.block + index))?;
        let mut offset = 0;
        while let Some((record, len)) = DirectoryRecord::parse(&sector[offset..]) {
            entries.push(record);
            offset += len;
        }
    }

    Ok(entries)
}

/// Resolve a `cdrom:\DIR\NAME;1` style path to its record
pub fn lookup(disc: &mut Disc, path: &str) -> Result<Option<DirectoryRecord>> {
    let stripped = path
        .strip_prefix("cdrom:")
        .map(|rest| rest.trim_start_matches('\\'))
        .unwrap_or(path);

    let volume = read_primary_volume(disc)?;
    let mut current = volume.root;

    let components: Vec<&str> = stripped.split('\\').filter(|c| !c.is_empty()).collect();
    for (depth, component) in components.iter().enumerate() {
        let entries = read_directory(disc, &current)?;
        // Version suffixes (";1") are part of the on-disc name but not of
        // the query
        let found = entries.into_iter().find(|entry| {
            let on_disc = entry.name.split(';').next().unwrap_or(&entry.name);
            let wanted = component.split(';').next().unwrap_or(component);
            on_disc.eq_ignore_ascii_case(wanted)
        });

        match found {
            Some(entry) => {
                if depth + 1 < components.len() && !entry.is_directory {
                    return Ok(None);
                }
                current = entry;
            }
            None => return Ok(None),
        }
    }

    Ok(Some(current))
}

/// Read a file's contents (optionally a sub-range)
pub fn read_file(
    disc: &mut Disc,
    record: &DirectoryRecord,
    offset: u32,
    length: u32,
) -> Result<Vec<u8>> {
    let end = offset.saturating_add(length).min(record.size);
    if offset >= end {
        return Ok(Vec::new());
    }

    let first_block = offset / BLOCK_SIZE;
    let last_block = (end - 1) / BLOCK_SIZE;

    let mut raw = Vec::with_capacity(((last_block - first_block + 1) * BLOCK_SIZE) as usize);
    for block in first_block..=last_block {
        raw.extend_from_slice(&disc.read_sector_data(block_location(record.block + block))?);
    }

    let start = (offset % BLOCK_SIZE) as usize;
    Ok(raw[start..start + (end - offset) as usize].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;

    const FULL: usize = 0x930;
    const DATA_OFFSET: usize = 0x18;

    /// Build a tiny ISO image: PVD at block 16, root dir at block 20 with
    /// one file (HELLO.TXT;1 at block 21)
    fn build_disc() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let bin_path = dir.path().join("game.bin");

        let sectors = 24usize;
        let mut image = vec![0u8; sectors * FULL];

        let mut write_data = |block: usize, payload: &[u8]| {
            let base = block * FULL + DATA_OFFSET;
            image[base..base + payload.len()].copy_from_slice(payload);
        };

        // PVD
        let mut pvd = vec![0u8; 0x800];
        pvd[0] = 0x01;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[40..47].copy_from_slice(b"PSXGAME");
        pvd[128..130].copy_from_slice(&0x800u16.to_le_bytes());
        // Root record at 156: dir at block 20, one sector long
        let root = make_record(20, 0x800, true, &[0x00]);
        pvd[156..156 + root.len()].copy_from_slice(&root);
        write_data(16, &pvd);

        // Root directory: ".", "..", HELLO.TXT;1
        let mut dir_sector = Vec::new();
        dir_sector.extend_from_slice(&make_record(20, 0x800, true, &[0x00]));
        dir_sector.extend_from_slice(&make_record(20, 0x800, true, &[0x01]));
        dir_sector.extend_from_slice(&make_record(21, 12, false, b"HELLO.TXT;1"));
        write_data(20, &dir_sector);

        write_data(21, b"hello world!");

        File::create(&bin_path)
            .unwrap()
            .write_all(&image)
            .unwrap();

        let cue_path = dir.path().join("game.cue");
        let mut cue = File::create(&cue_path).unwrap();
        writeln!(cue, "FILE \"game.bin\" BINARY").unwrap();
        writeln!(cue, "  TRACK 01 MODE2/2352").unwrap();
        writeln!(cue, "    INDEX 01 00:00:00").unwrap();

        (dir, cue_path)
    }

    fn make_record(block: u32, size: u32, directory: bool, name: &[u8]) -> Vec<u8> {
        let name_len = name.len();
        let mut len = 33 + name_len;
        if len % 2 != 0 {
            len += 1;
        }
        let mut record = vec![0u8; len];
        record[0] = len as u8;
        record[2..6].copy_from_slice(&block.to_le_bytes());
        record[10..14].copy_from_slice(&size.to_le_bytes());
        record[25] = if directory { FLAG_DIRECTORY } else { 0 };
        record[32] = name_len as u8;
        record[33..33 + name_len].copy_from_slice(name);
        record
    }

    #[test]
    fn test_primary_volume_parses() {
        let (_tmp, cue) = build_disc();
        let mut disc = Disc::open(&cue).unwrap();
        let volume = read_primary_volume(&mut disc).unwrap();
        assert_eq!(volume.volume_identifier, "PSXGAME");
        assert_eq!(volume.root.block, 20);
        assert!(volume.root.is_directory);
    }

    #[test]
    fn test_directory_listing() {
        let (_tmp, cue) = build_disc();
        let mut disc = Disc::open(&cue).unwrap();
        let volume = read_primary_volume(&mut disc).unwrap();
        let entries = read_directory(&mut disc, &volume.root).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "HELLO.TXT;1"]);
    }

    #[test]
    fn test_lookup_and_read_file() {
        let (_tmp, cue) = build_disc();
        let mut disc = Disc::open(&cue).unwrap();

        let record = lookup(&mut disc, "cdrom:\\HELLO.TXT;1")
            .unwrap()
            .expect("file exists");
        assert_eq!(record.size, 12);

        let contents = read_file(&mut disc, &record, 0, record.size).unwrap();
        assert_eq!(contents, b"hello world!");

        // Sub-range reads honor offset and length
        let middle = read_file(&mut disc, &record, 6, 5).unwrap();
        assert_eq!(middle, b"world");
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_versionless() {
        let (_tmp, cue) = build_disc();
        let mut disc = Disc::open(&cue).unwrap();
        assert!(lookup(&mut disc, "cdrom:\\hello.txt").unwrap().is_some());
        assert!(lookup(&mut disc, "cdrom:\\MISSING.BIN;1").unwrap().is_none());
    }
}
