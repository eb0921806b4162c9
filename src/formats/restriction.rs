///! restrictions.bin format - turn restrictions keyed by from-way id
///!
///! Format (little-endian):
///!
///! Header (16 bytes):
///!   magic:     u32 = 0x52535452  // "RSTR"
///!   version:   u16 = 1
///!   reserved:  u16 = 0
///!   count:     u64
///!
///! Body (count records, sorted by from_way_id):
///!   from_way_id:  u64
///!   to_way_id:    u64
///!   via_graphid:  u64
///!   type:         u8
///!   day_on:       u8   // 0 = always; day-of-week mask otherwise
///!   reserved:     [6]u8
///!
///! Footer (16 bytes):
///!   body_crc64:  u64
///!   file_crc64:  u64

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use super::crc;
use crate::graph_id::GraphId;

const MAGIC: u32 = 0x5253_5452; // "RSTR"
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;
const RECORD_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RestrictionType {
    NoLeftTurn = 0,
    NoRightTurn = 1,
    NoStraightOn = 2,
    NoUTurn = 3,
    OnlyRightTurn = 4,
    OnlyLeftTurn = 5,
    OnlyStraightOn = 6,
}

impl RestrictionType {
    pub fn from_u8(value: u8) -> Result<RestrictionType> {
        Ok(match value {
            0 => RestrictionType::NoLeftTurn,
            1 => RestrictionType::NoRightTurn,
            2 => RestrictionType::NoStraightOn,
            3 => RestrictionType::NoUTurn,
            4 => RestrictionType::OnlyRightTurn,
            5 => RestrictionType::OnlyLeftTurn,
            6 => RestrictionType::OnlyStraightOn,
            _ => bail!("Invalid restriction type: {}", value),
        })
    }

    /// Only* types keep a single turn and ban the rest
    pub fn is_only(self) -> bool {
        matches!(
            self,
            RestrictionType::OnlyRightTurn
                | RestrictionType::OnlyLeftTurn
                | RestrictionType::OnlyStraightOn
        )
    }
}

#[derive(Debug, Clone)]
pub struct Restriction {
    pub from_way_id: u64,
    pub to_way_id: u64,
    /// Graph id of the via node, assigned after the node sorter has run
    pub via_graphid: GraphId,
    pub restriction_type: RestrictionType,
    pub day_on: u8,
}

impl Restriction {
    pub fn is_timed(&self) -> bool {
        self.day_on != 0
    }
}

fn encode_record(r: &Restriction) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[0..8].copy_from_slice(&r.from_way_id.to_le_bytes());
    buf[8..16].copy_from_slice(&r.to_way_id.to_le_bytes());
    buf[16..24].copy_from_slice(&r.via_graphid.value().to_le_bytes());
    buf[24] = r.restriction_type as u8;
    buf[25] = r.day_on;
    buf
}

fn decode_record(buf: &[u8]) -> Result<Restriction> {
    Ok(Restriction {
        from_way_id: u64::from_le_bytes(buf[0..8].try_into()?),
        to_way_id: u64::from_le_bytes(buf[8..16].try_into()?),
        via_graphid: GraphId::from_value(u64::from_le_bytes(buf[16..24].try_into()?)),
        restriction_type: RestrictionType::from_u8(buf[24])?,
        day_on: buf[25],
    })
}

/// Write restrictions.bin
pub fn write<P: AsRef<Path>>(path: P, restrictions: &[Restriction]) -> Result<()> {
    let file = File::create(path.as_ref())
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
    let mut writer = BufWriter::new(file);

    let mut sorted: Vec<&Restriction> = restrictions.iter().collect();
    sorted.sort_by_key(|r| (r.from_way_id, r.to_way_id));

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(&MAGIC.to_le_bytes());
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&(sorted.len() as u64).to_le_bytes());
    writer.write_all(&header)?;

    let mut body_digest = crc::Digest::new();
    let mut file_digest = crc::Digest::new();
    file_digest.update(&header);
    for r in sorted {
        let record = encode_record(r);
        body_digest.update(&record);
        file_digest.update(&record);
        writer.write_all(&record)?;
    }

    writer.write_all(&body_digest.finalize().to_le_bytes())?;
    writer.write_all(&file_digest.finalize().to_le_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read restrictions.bin, verifying the file checksum
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<Restriction>> {
    let mut file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;

    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    if content.len() < HEADER_SIZE + 16 {
        bail!("Restrictions file too short");
    }

    let magic = u32::from_le_bytes(content[0..4].try_into()?);
    if magic != MAGIC {
        bail!("Invalid restrictions magic: {:08x}", magic);
    }
    let version = u16::from_le_bytes(content[4..6].try_into()?);
    if version != VERSION {
        bail!("Unsupported restrictions version: {}", version);
    }
    let count = u64::from_le_bytes(content[8..16].try_into()?) as usize;

    let body_end = content.len() - 16;
    if body_end - HEADER_SIZE != count * RECORD_SIZE {
        bail!("Restrictions body size does not match count {}", count);
    }
    let stored_file_crc = u64::from_le_bytes(content[body_end + 8..].try_into()?);
    let computed = crc::checksum(&content[..body_end]);
    if computed != stored_file_crc {
        bail!(
            "Restrictions file CRC mismatch: expected {:016x}, got {:016x}",
            stored_file_crc,
            computed
        );
    }

    let mut restrictions = Vec::with_capacity(count);
    for i in 0..count {
        let start = HEADER_SIZE + i * RECORD_SIZE;
        restrictions.push(decode_record(&content[start..start + RECORD_SIZE])?);
    }
    Ok(restrictions)
}

/// Read restrictions.bin into a from-way-id multimap
pub fn read_multimap<P: AsRef<Path>>(path: P) -> Result<HashMap<u64, Vec<Restriction>>> {
    let mut map: HashMap<u64, Vec<Restriction>> = HashMap::new();
    for r in read_all(path)? {
        map.entry(r.from_way_id).or_default().push(r);
    }
    Ok(map)
}
