//! Block/sector-addressed memory access for MIFARE-family tags.
//!
//! MIFARE Classic is organized into sectors of 16-byte blocks gated by
//! per-sector key authentication; Ultralight is a flat run of 4-byte pages
//! with no authentication. All index arithmetic and bounds checks live
//! here, ahead of any radio command.

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::debug;

use crate::error::NfcError;
use crate::reader::RawTag;

/// Block size of a MIFARE Classic tag in bytes.
pub const CLASSIC_BLOCK_SIZE: usize = 16;
/// Page size of a MIFARE Ultralight tag in bytes.
pub const ULTRALIGHT_PAGE_SIZE: usize = 4;
/// First writable Ultralight page; pages 0-3 hold manufacturer data and
/// lock bytes.
pub const ULTRALIGHT_FIRST_USER_PAGE: usize = 4;
/// Sectors 0-31 hold 4 blocks each; only 4K tags have sectors beyond that,
/// holding 16 blocks each.
const SMALL_SECTOR_COUNT: usize = 32;
const SMALL_SECTOR_BLOCKS: usize = 4;
const LARGE_SECTOR_BLOCKS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MifareFamily {
    #[strum(to_string = "classic")]
    Classic,
    #[strum(to_string = "ultralight")]
    Ultralight,
}

/// Tag-reported product variant within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MifareVariant {
    #[strum(to_string = "classic")]
    Classic,
    #[strum(to_string = "plus")]
    Plus,
    #[strum(to_string = "pro")]
    Pro,
    #[strum(to_string = "classic_unknown")]
    ClassicUnknown,
    #[strum(to_string = "ultralight")]
    Ultralight,
    #[strum(to_string = "ultralight_c")]
    UltralightC,
    #[strum(to_string = "ultralight_unknown")]
    UltralightUnknown,
}

/// Geometry and identity of a MIFARE tag, queried once at classification.
///
/// `block_count * block_size == total_size` holds for every constructed
/// profile; `sector_count` is `None` for Ultralight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MifareProfile {
    pub family: MifareFamily,
    pub variant: MifareVariant,
    pub total_size: usize,
    pub block_size: usize,
    pub block_count: usize,
    pub sector_count: Option<usize>,
}

impl MifareProfile {
    /// Profile for a Classic tag of `total_size` bytes.
    pub fn classic(variant: MifareVariant, total_size: usize, sector_count: usize) -> Self {
        MifareProfile {
            family: MifareFamily::Classic,
            variant,
            total_size,
            block_size: CLASSIC_BLOCK_SIZE,
            block_count: total_size / CLASSIC_BLOCK_SIZE,
            sector_count: Some(sector_count),
        }
    }

    /// Profile for an Ultralight tag: 16 pages for the original part,
    /// 44 pages for Ultralight C.
    pub fn ultralight(variant: MifareVariant) -> Self {
        let page_count = match variant {
            MifareVariant::UltralightC => 0x2B + 1,
            _ => 0x0F + 1,
        };
        MifareProfile {
            family: MifareFamily::Ultralight,
            variant,
            total_size: page_count * ULTRALIGHT_PAGE_SIZE,
            block_size: ULTRALIGHT_PAGE_SIZE,
            block_count: page_count,
            sector_count: None,
        }
    }
}

/// Number of blocks in a Classic sector.
pub fn block_count_in_sector(sector: usize) -> usize {
    if sector < SMALL_SECTOR_COUNT {
        SMALL_SECTOR_BLOCKS
    } else {
        LARGE_SECTOR_BLOCKS
    }
}

/// First block index of a Classic sector.
pub fn sector_to_block(sector: usize) -> usize {
    if sector < SMALL_SECTOR_COUNT {
        sector * SMALL_SECTOR_BLOCKS
    } else {
        SMALL_SECTOR_COUNT * SMALL_SECTOR_BLOCKS
            + (sector - SMALL_SECTOR_COUNT) * LARGE_SECTOR_BLOCKS
    }
}

/// Owning sector of a Classic block index.
pub fn block_to_sector(block: usize) -> usize {
    let small_blocks = SMALL_SECTOR_COUNT * SMALL_SECTOR_BLOCKS;
    if block < small_blocks {
        block / SMALL_SECTOR_BLOCKS
    } else {
        SMALL_SECTOR_COUNT + (block - small_blocks) / LARGE_SECTOR_BLOCKS
    }
}

/// A 6-byte MIFARE Classic authentication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MifareKey([u8; 6]);

impl MifareKey {
    /// The factory default key, `FF FF FF FF FF FF`.
    pub const DEFAULT: MifareKey = MifareKey([0xFF; 6]);

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        MifareKey(bytes)
    }

    /// Parse a caller-supplied key. An empty string selects the factory
    /// default key rather than a zero-length key.
    pub fn from_hex(s: &str) -> Result<Self, NfcError> {
        if s.is_empty() {
            return Ok(MifareKey::DEFAULT);
        }
        let bytes = hex::decode(s)?;
        let bytes: [u8; 6] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            NfcError::InvalidArgument(format!(
                "authentication key must be 6 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(MifareKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

/// Which key slot a sector authentication uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    A,
    B,
}

/// Memory operations over one polled MIFARE tag.
///
/// Authentication is never cached: every entry into a sector authenticates
/// again, within the same physical connection window.
pub struct MemoryAccess<'a> {
    profile: &'a MifareProfile,
    tag: &'a dyn RawTag,
}

impl<'a> MemoryAccess<'a> {
    pub fn new(profile: &'a MifareProfile, tag: &'a dyn RawTag) -> Self {
        MemoryAccess { profile, tag }
    }

    fn check_block(&self, index: usize) -> Result<(), NfcError> {
        // block 0 (the manufacturer block) is readable and therefore valid
        if index >= self.profile.block_count {
            return Err(NfcError::InvalidArgument(format!(
                "block/page index {index} out of range 0..{}",
                self.profile.block_count
            )));
        }
        Ok(())
    }

    fn check_sector(&self, index: usize) -> Result<usize, NfcError> {
        let sector_count = self
            .profile
            .sector_count
            .ok_or(NfcError::TechnologyNotSupported("sector operations"))?;
        if index >= sector_count {
            return Err(NfcError::InvalidArgument(format!(
                "sector index {index} out of range 0..{sector_count}"
            )));
        }
        Ok(sector_count)
    }

    fn authenticate(
        &self,
        sector: usize,
        key: &MifareKey,
        slot: KeySlot,
    ) -> Result<bool, NfcError> {
        self.tag.mifare_authenticate(sector as u8, key, slot)
    }

    /// Authenticate a Classic sector, trying key A first if supplied,
    /// falling back to key B.
    pub fn authenticate_sector(
        &self,
        index: usize,
        key_a: Option<&MifareKey>,
        key_b: Option<&MifareKey>,
    ) -> Result<bool, NfcError> {
        if self.profile.family != MifareFamily::Classic {
            return Err(NfcError::TechnologyNotSupported("sector authentication"));
        }
        self.check_sector(index)?;
        if key_a.is_none() && key_b.is_none() {
            return Err(NfcError::InvalidArgument(
                "no authentication key supplied".to_string(),
            ));
        }

        let mut authenticated = false;
        if let Some(key) = key_a {
            authenticated = self.authenticate(index, key, KeySlot::A)?;
        }
        if !authenticated {
            if let Some(key) = key_b {
                authenticated = self.authenticate(index, key, KeySlot::B)?;
            }
        }
        debug!(sector = index, ok = authenticated, "sector authentication");
        Ok(authenticated)
    }

    fn enter_sector(&self, sector: usize, key: Option<&MifareKey>) -> Result<(), NfcError> {
        let key = key.copied().unwrap_or(MifareKey::DEFAULT);
        if !self.authenticate(sector, &key, KeySlot::A)? {
            return Err(NfcError::CommunicationError(format!(
                "authentication failed for sector {sector}"
            )));
        }
        Ok(())
    }

    /// Read exactly one block verbatim, enforcing the Classic 16-byte
    /// block contract.
    fn read_classic_block(&self, index: usize) -> Result<Vec<u8>, NfcError> {
        let mut data = self.tag.mifare_read(index as u8)?;
        if data.len() < CLASSIC_BLOCK_SIZE {
            // a short read is a failed read, never a zero-padded success
            return Err(NfcError::CommunicationError(format!(
                "short read of block {index}: {} bytes",
                data.len()
            )));
        }
        data.truncate(CLASSIC_BLOCK_SIZE);
        Ok(data)
    }

    /// Read one block (Classic) or one page run (Ultralight).
    pub fn read_block(&self, index: usize, key: Option<&MifareKey>) -> Result<Vec<u8>, NfcError> {
        self.check_block(index)?;
        match self.profile.family {
            MifareFamily::Classic => {
                self.enter_sector(block_to_sector(index), key)?;
                self.read_classic_block(index)
            }
            MifareFamily::Ultralight => self.tag.mifare_read(index as u8),
        }
    }

    /// Write one block (Classic) or one page (Ultralight). The payload
    /// length must equal the profile's block size.
    pub fn write_block(
        &self,
        index: usize,
        data: &[u8],
        key: Option<&MifareKey>,
    ) -> Result<(), NfcError> {
        self.check_block(index)?;
        if data.len() != self.profile.block_size {
            return Err(NfcError::InvalidArgument(format!(
                "invalid data size {}, should be {}",
                data.len(),
                self.profile.block_size
            )));
        }
        match self.profile.family {
            MifareFamily::Classic => {
                self.enter_sector(block_to_sector(index), key)?;
                self.tag.mifare_write(index as u8, data)
            }
            MifareFamily::Ultralight => {
                if index < ULTRALIGHT_FIRST_USER_PAGE {
                    // manufacturer/lock pages, off limits per vendor guidance
                    return Err(NfcError::InvalidArgument(format!(
                        "page {index} is reserved, first writable page is \
                         {ULTRALIGHT_FIRST_USER_PAGE}"
                    )));
                }
                self.tag.mifare_write(index as u8, data)
            }
        }
    }

    /// Read a whole Classic sector, trailer block included, as one buffer.
    pub fn read_sector(&self, index: usize, key: Option<&MifareKey>) -> Result<Vec<u8>, NfcError> {
        if self.profile.family != MifareFamily::Classic {
            return Err(NfcError::TechnologyNotSupported("sector read"));
        }
        self.check_sector(index)?;
        self.enter_sector(index, key)?;

        let begin = sector_to_block(index);
        let end = begin + block_count_in_sector(index);
        let mut data = Vec::with_capacity((end - begin) * CLASSIC_BLOCK_SIZE);
        for block in begin..end {
            data.extend_from_slice(&self.read_classic_block(block)?);
        }
        Ok(data)
    }

    /// Dump the entire tag, sector by sector (Classic) or in 4-page reads
    /// (Ultralight). Each sector entry re-authenticates.
    pub fn read_all(&self, key: Option<&MifareKey>) -> Result<Vec<Vec<u8>>, NfcError> {
        match self.profile.family {
            MifareFamily::Classic => {
                let sector_count = self.profile.sector_count.unwrap_or(0);
                let mut sectors = Vec::with_capacity(sector_count);
                for sector in 0..sector_count {
                    sectors.push(self.read_sector(sector, key)?);
                }
                Ok(sectors)
            }
            MifareFamily::Ultralight => {
                let mut chunks = Vec::new();
                let mut page = 0;
                while page < self.profile.block_count {
                    chunks.push(self.tag.mifare_read(page as u8)?);
                    page += 4;
                }
                Ok(chunks)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_block_arithmetic_small_sectors() {
        assert_eq!(sector_to_block(0), 0);
        assert_eq!(sector_to_block(1), 4);
        assert_eq!(sector_to_block(31), 124);
        assert_eq!(block_to_sector(0), 0);
        assert_eq!(block_to_sector(3), 0);
        assert_eq!(block_to_sector(4), 1);
        assert_eq!(block_to_sector(127), 31);
        assert_eq!(block_count_in_sector(0), 4);
        assert_eq!(block_count_in_sector(31), 4);
    }

    #[test]
    fn sector_block_arithmetic_4k_tail() {
        assert_eq!(sector_to_block(32), 128);
        assert_eq!(sector_to_block(33), 144);
        assert_eq!(sector_to_block(39), 240);
        assert_eq!(block_to_sector(128), 32);
        assert_eq!(block_to_sector(143), 32);
        assert_eq!(block_to_sector(144), 33);
        assert_eq!(block_count_in_sector(32), 16);
    }

    #[test]
    fn classic_profile_geometry_invariant() {
        for (size, sectors) in [(1024, 16), (2048, 32), (4096, 40)] {
            let profile = MifareProfile::classic(MifareVariant::Classic, size, sectors);
            assert_eq!(profile.block_count * profile.block_size, profile.total_size);
        }
    }

    #[test]
    fn ultralight_profile_geometry() {
        let ul = MifareProfile::ultralight(MifareVariant::Ultralight);
        assert_eq!(ul.block_count, 16);
        assert_eq!(ul.total_size, 64);
        assert_eq!(ul.sector_count, None);

        let ulc = MifareProfile::ultralight(MifareVariant::UltralightC);
        assert_eq!(ulc.block_count, 44);
        assert_eq!(ulc.total_size, 176);
    }

    #[test]
    fn empty_key_string_selects_default() {
        assert_eq!(MifareKey::from_hex("").unwrap(), MifareKey::DEFAULT);
    }

    #[test]
    fn key_must_be_six_bytes() {
        assert!(MifareKey::from_hex("A0A1A2A3A4A5").is_ok());
        assert!(matches!(
            MifareKey::from_hex("A0A1A2A3").unwrap_err(),
            NfcError::InvalidArgument(_)
        ));
        assert!(matches!(
            MifareKey::from_hex("A0A1A2A3A4A5A6").unwrap_err(),
            NfcError::InvalidArgument(_)
        ));
    }
}
