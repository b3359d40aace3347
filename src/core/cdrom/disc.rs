// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Disc images: cue sheet parsing and MODE2/2352 sector reads
//!
//! The cue+bin pair is the source of truth: one or more tracks inside a
//! bin file described by a cue sheet (MODE2/2352 only for now). Sector
//! addressing is minute/second/sector with 75 sectors per second, 60
//! seconds per minute and up to 74 minutes; absolute addresses include the
//! two-second lead-in the BIOS always skips.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::core::error::{EmulatorError, Result};

pub const SECTORS_PER_SECOND: u64 = 75;
pub const SECONDS_PER_MINUTE: u64 = 60;
pub const MINUTES_PER_DISC: u64 = 74;

/// Raw MODE2 sector size
pub const FULL_SECTOR_SIZE: usize = 0x930;
/// User data per sector
pub const DATA_SIZE: usize = 0x800;
/// Header + subheaders + data, the "whole sector" the drive can stream
pub const WHOLE_SECTOR_SIZE: usize = 0x924;

/// Offset of the header inside a raw sector (after the sync pattern)
const HEADER_OFFSET: usize = 0xC;
/// Offset of the user data inside a raw sector
const DATA_OFFSET: usize = 0x18;

/// Two seconds of lead-in precede logical block zero
const LEAD_IN_SECTORS: u64 = 2 * SECTORS_PER_SECOND;

/// A minute/second/sector position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CdLocation {
    pub mm: u64,
    pub ss: u64,
    pub sect: u64,
}

impl CdLocation {
    /// Decode a BIOS-format BCD triple
    pub fn from_bcd(mm: u8, ss: u8, sect: u8) -> Option<Self> {
        let digit = |v: u8| -> Option<u64> {
            if v & 0xF > 9 || v >> 4 > 9 {
                None
            } else {
                Some(((v >> 4) * 10 + (v & 0xF)) as u64)
            }
        };
        Some(Self {
            mm: digit(mm)?,
            ss: digit(ss)?,
            sect: digit(sect)?,
        })
    }

    /// Absolute sector number (lead-in included)
    pub fn absolute_sector(&self) -> u64 {
        (self.mm * SECONDS_PER_MINUTE + self.ss) * SECTORS_PER_SECOND + self.sect
    }

    /// Step one sector forward, wrapping at the disc end
    pub fn advance(&mut self) {
        self.sect += 1;
        if self.sect >= SECTORS_PER_SECOND {
            self.sect = 0;
            self.ss += 1;
        }
        if self.ss >= SECONDS_PER_MINUTE {
            self.ss = 0;
            self.mm += 1;
        }
        if self.mm >= MINUTES_PER_DISC {
            self.mm = 0;
        }
    }
}

/// Track type recognized by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Mode2_2352,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CuePosition {
    pub mm: u64,
    pub ss: u64,
    pub ff: u64,
}

#[derive(Debug, Clone)]
pub struct CueIndex {
    pub id: u64,
    pub position: CuePosition,
}

#[derive(Debug, Clone)]
pub struct CueTrack {
    pub number: u64,
    pub track_type: TrackType,
    pub indexes: Vec<CueIndex>,
}

#[derive(Debug, Clone)]
pub struct CueFile {
    pub bin_path: PathBuf,
    pub tracks: Vec<CueTrack>,
}

/// Parsed cue sheet
#[derive(Debug, Clone)]
pub struct CueSheet {
    pub files: Vec<CueFile>,
}

impl CueSheet {
    /// Parse a `.cue` file, resolving bin paths relative to it
    pub fn parse(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut files = Vec::new();
        let mut current_file: Option<CueFile> = None;
        let mut current_track: Option<CueTrack> = None;

        let finish_track =
            |file: &mut Option<CueFile>, track: &mut Option<CueTrack>| -> Result<()> {
                if let Some(track) = track.take() {
                    if track.indexes.is_empty() {
                        return Err(EmulatorError::DiscError(format!(
                            "track {} has no INDEX entries",
                            track.number
                        )));
                    }
                    file.as_mut()
                        .ok_or_else(|| {
                            EmulatorError::DiscError("TRACK before any FILE entry".into())
                        })?
                        .tracks
                        .push(track);
                }
                Ok(())
            };

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let keyword = line.split_whitespace().next().unwrap_or("");
            match keyword {
                "REM" | "PERFORMER" | "TITLE" | "PREGAP" | "POSTGAP" => {}
                "FILE" => {
                    finish_track(&mut current_file, &mut current_track)?;
                    if let Some(file) = current_file.take() {
                        files.push(file);
                    }

                    let open = line.find('"').ok_or_else(|| {
                        EmulatorError::DiscError(format!("missing file path on line {line_no}"))
                    })?;
                    let close = line.rfind('"').filter(|&c| c > open).ok_or_else(|| {
                        EmulatorError::DiscError(format!("missing file path on line {line_no}"))
                    })?;
                    let name = &line[open + 1..close];

                    let format = line[close + 1..].trim();
                    if format != "BINARY" {
                        return Err(EmulatorError::DiscError(format!(
                            "unsupported file format {format} on line {line_no}"
                        )));
                    }

                    current_file = Some(CueFile {
                        bin_path: dir.join(name),
                        tracks: Vec::new(),
                    });
                }
                "TRACK" => {
                    finish_track(&mut current_file, &mut current_track)?;

                    let mut parts = line.split_whitespace().skip(1);
                    let number: u64 = parts
                        .next()
                        .and_then(|n| n.parse().ok())
                        .ok_or_else(|| {
                            EmulatorError::DiscError(format!("bad track index on line {line_no}"))
                        })?;
                    let mode = parts.next().unwrap_or("");
                    if mode != "MODE2/2352" {
                        return Err(EmulatorError::DiscError(format!(
                            "unsupported track mode {mode} on line {line_no}"
                        )));
                    }
                    current_track = Some(CueTrack {
                        number,
                        track_type: TrackType::Mode2_2352,
                        indexes: Vec::new(),
                    });
                }
                "INDEX" => {
                    let mut parts = line.split_whitespace().skip(1);
                    let id: u64 = parts
                        .next()
                        .and_then(|n| n.parse().ok())
                        .ok_or_else(|| {
                            EmulatorError::DiscError(format!("bad index id on line {line_no}"))
                        })?;
                    let position = parts.next().unwrap_or("");
                    let mut fields = position.split(':');
                    let parse = |field: Option<&str>| -> Result<u64> {
                        field.and_then(|f| f.parse().ok()).ok_or_else(|| {
                            EmulatorError::DiscError(format!(
                                "bad index position on line {line_no}"
                            ))
                        })
                    };
                    let position = CuePosition {
                        mm: parse(fields.next())?,
                        ss: parse(fields.next())?,
                        ff: parse(fields.next())?,
                    };

                    current_track
                        .as_mut()
                        .ok_or_else(|| {
                            EmulatorError::DiscError(format!(
                                "INDEX outside a TRACK on line {line_no}"
                            ))
                        })?
                        .indexes
                        .push(CueIndex { id, position });
                }
                other => {
                    return Err(EmulatorError::DiscError(format!(
                        "unexpected entry {other} on line {line_no}"
                    )));
                }
            }
        }

        finish_track(&mut current_file, &mut current_track)?;
        if let Some(file) = current_file.take() {
            files.push(file);
        }

        if files.is_empty() || files.iter().any(|f| f.tracks.is_empty()) {
            return Err(EmulatorError::DiscError(
                "cue sheet holds no usable tracks".into(),
            ));
        }

        Ok(Self { files })
    }
}

/// An opened cue+bin disc
pub struct Disc {
    cue: CueSheet,
    bin: File,
}

impl Disc {
    /// The parsed cue sheet describing this disc
    pub fn cue_sheet(&self) -> &CueSheet {
        &self.cue
    }

    /// Open a cue sheet and its (first) bin file
    pub fn open(cue_path: &Path) -> Result<Self> {
        if cue_path.extension().and_then(|e| e.to_str()) != Some("cue") {
            return Err(EmulatorError::DiscError(format!(
                "unsupported disc file {}",
                cue_path.display()
            )));
        }

        let cue = CueSheet::parse(cue_path)?;
        let bin_path = &cue.files[0].bin_path;
        let bin = File::open(bin_path).map_err(|err| {
            EmulatorError::DiscError(format!("cannot open {}: {err}", bin_path.display()))
        })?;

        Ok(Self { cue, bin })
    }

    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.bin.seek(SeekFrom::Start(offset))?;
        // Short reads past the image end leave the tail zeroed
        let mut filled = 0;
        while filled < out.len() {
            let n = self.bin.read(&mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out[filled..].fill(0);
        Ok(())
    }

    fn sector_offset(loc: CdLocation) -> u64 {
        loc.absolute_sector().saturating_sub(LEAD_IN_SECTORS) * FULL_SECTOR_SIZE as u64
    }

    /// The 0x800 user-data bytes of a sector
    pub fn read_sector_data(&mut self, loc: CdLocation) -> Result<Vec<u8>> {
        let mut out = vec![0u8; DATA_SIZE];
        self.read_at(Self::sector_offset(loc) + DATA_OFFSET as u64, &mut out)?;
        Ok(out)
    }

    /// Header + subheaders + data (0x924 bytes, whole-sector mode)
    pub fn read_sector_whole(&mut self, loc: CdLocation) -> Result<Vec<u8>> {
        let mut out = vec![0u8; WHOLE_SECTOR_SIZE];
        self.read_at(Self::sector_offset(loc) + HEADER_OFFSET as u64, &mut out)?;
        Ok(out)
    }

    /// A raw 0x930-byte sector
    pub fn read_sector_raw(&mut self, loc: CdLocation) -> Result<Vec<u8>> {
        let mut out = vec![0u8; FULL_SECTOR_SIZE];
        self.read_at(Self::sector_offset(loc), &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cue(dir: &Path, bin_name: &str) -> PathBuf {
        let cue_path = dir.join("game.cue");
        let mut cue = File::create(&cue_path).unwrap();
        writeln!(cue, "FILE \"{bin_name}\" BINARY").unwrap();
        writeln!(cue, "  TRACK 01 MODE2/2352").unwrap();
        writeln!(cue, "    INDEX 01 00:00:00").unwrap();
        cue_path
    }

    fn make_disc_with_sectors(count: u64) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let bin_path = dir.path().join("game.bin");
        let mut bin = File::create(&bin_path).unwrap();
        for sector in 0..count {
            let mut raw = vec![0u8; FULL_SECTOR_SIZE];
            raw[DATA_OFFSET] = sector as u8;
            raw[HEADER_OFFSET + 3] = 0x02; // mode byte
            bin.write_all(&raw).unwrap();
        }
        let cue_path = write_cue(dir.path(), "game.bin");
        (dir, cue_path)
    }

    #[test]
    fn test_bcd_decode() {
        let loc = CdLocation::from_bcd(0x12, 0x34, 0x56).unwrap();
        assert_eq!(
            loc,
            CdLocation {
                mm: 12,
                ss: 34,
                sect: 56
            }
        );
        assert!(CdLocation::from_bcd(0x1A, 0, 0).is_none());
    }

    #[test]
    fn test_location_advance_carries() {
        let mut loc = CdLocation {
            mm: 0,
            ss: 59,
            sect: 74,
        };
        loc.advance();
        assert_eq!(
            loc,
            CdLocation {
                mm: 1,
                ss: 0,
                sect: 0
            }
        );
    }

    #[test]
    fn test_cue_parse_and_sector_read() {
        let (_dir, cue_path) = make_disc_with_sectors(5);
        let mut disc = Disc::open(&cue_path).unwrap();

        // BIOS address 00:02:03 maps to the fourth file sector
        let loc = CdLocation {
            mm: 0,
            ss: 2,
            sect: 3,
        };
        let data = disc.read_sector_data(loc).unwrap();
        assert_eq!(data.len(), DATA_SIZE);
        assert_eq!(data[0], 3);

        let whole = disc.read_sector_whole(loc).unwrap();
        assert_eq!(whole.len(), WHOLE_SECTOR_SIZE);
        assert_eq!(whole[3], 0x02, "mode byte leads the whole-sector view");
    }

    #[test]
    fn test_cue_rejects_wrong_mode() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("game.bin")).unwrap();
        let cue_path = dir.path().join("game.cue");
        let mut cue = File::create(&cue_path).unwrap();
        writeln!(cue, "FILE \"game.bin\" BINARY").unwrap();
        writeln!(cue, "  TRACK 01 AUDIO").unwrap();
        writeln!(cue, "    INDEX 01 00:00:00").unwrap();

        assert!(Disc::open(&cue_path).is_err());
    }

    #[test]
    fn test_cue_requires_cue_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.iso");
        File::create(&path).unwrap();
        assert!(Disc::open(&path).is_err());
    }

    #[test]
    fn test_cue_track_needs_index() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("game.bin")).unwrap();
        let cue_path = dir.path().join("game.cue");
        let mut cue = File::create(&cue_path).unwrap();
        writeln!(cue, "FILE \"game.bin\" BINARY").unwrap();
        writeln!(cue, "  TRACK 01 MODE2/2352").unwrap();

        assert!(Disc::open(&cue_path).is_err());
    }
}
