///! names.bin format - string tables and id-keyed name maps
///!
///! Holds every string the graph build needs: the two offset tables that way
///! records index into (refs and names), the way id -> relation ref map, and
///! the node id -> ref / name / exit_to maps.
///!
///! Format (little-endian):
///!
///! Header (16 bytes):
///!   magic:    u32 = 0x534D414E  // "NAMS"
///!   version:  u16 = 1
///!   reserved: u16 = 0
///!   reserved2: u64 = 0
///!
///! Body, six sections in order:
///!   ref_table, name_table:     count u32, then count strings (len u16 + utf8)
///!   way_ref, node_ref,
///!   node_name, node_exit_to:   count u64, then count entries
///!                              (id u64 + len u16 + utf8), sorted by id
///!
///! Footer (8 bytes): file_crc64

use anyhow::{bail, ensure, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use super::crc;

const MAGIC: u32 = 0x534D_414E; // "NAMS"
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;

/// Offset-addressed string table; entry 0 is always the empty string and
/// means "absent"
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    entries: Vec<String>,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable {
            entries: vec![String::new()],
        }
    }

    /// Intern a string, returning its index
    pub fn add(&mut self, value: &str) -> u32 {
        self.entries.push(value.to_string());
        (self.entries.len() - 1) as u32
    }

    /// Look up by index; out-of-range and 0 both give ""
    pub fn name(&self, index: u32) -> &str {
        self.entries
            .get(index as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

/// All string data consumed by the tile build
#[derive(Debug, Clone, Default)]
pub struct NameData {
    pub ref_table: StringTable,
    pub name_table: StringTable,
    pub way_ref: HashMap<u64, String>,
    pub node_ref: HashMap<u64, String>,
    pub node_name: HashMap<u64, String>,
    pub node_exit_to: HashMap<u64, String>,
}

impl NameData {
    pub fn new() -> Self {
        NameData {
            ref_table: StringTable::new(),
            name_table: StringTable::new(),
            ..Default::default()
        }
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn write_table(out: &mut Vec<u8>, table: &StringTable) {
    out.extend_from_slice(&(table.entries.len() as u32).to_le_bytes());
    for entry in &table.entries {
        write_string(out, entry);
    }
}

fn write_map(out: &mut Vec<u8>, map: &HashMap<u64, String>) {
    out.extend_from_slice(&(map.len() as u64).to_le_bytes());
    let mut ids: Vec<&u64> = map.keys().collect();
    ids.sort();
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
        write_string(out, &map[id]);
    }
}

/// Write names.bin
pub fn write<P: AsRef<Path>>(path: P, names: &NameData) -> Result<()> {
    let file = File::create(path.as_ref())
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
    let mut writer = BufWriter::new(file);

    let mut content = Vec::new();
    content.extend_from_slice(&MAGIC.to_le_bytes());
    content.extend_from_slice(&VERSION.to_le_bytes());
    content.extend_from_slice(&0u16.to_le_bytes());
    content.extend_from_slice(&0u64.to_le_bytes());

    write_table(&mut content, &names.ref_table);
    write_table(&mut content, &names.name_table);
    write_map(&mut content, &names.way_ref);
    write_map(&mut content, &names.node_ref);
    write_map(&mut content, &names.node_name);
    write_map(&mut content, &names.node_exit_to);

    let file_crc = crc::checksum(&content);
    writer.write_all(&content)?;
    writer.write_all(&file_crc.to_le_bytes())?;
    writer.flush()?;
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(self.pos + n <= self.buf.len(), "Names file truncated");
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into()?))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        Ok(std::str::from_utf8(self.take(len)?)?.to_string())
    }

    fn read_table(&mut self) -> Result<StringTable> {
        let count = self.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(self.read_string()?);
        }
        ensure!(!entries.is_empty(), "String table missing empty sentinel");
        Ok(StringTable { entries })
    }

    fn read_map(&mut self) -> Result<HashMap<u64, String>> {
        let count = self.read_u64()? as usize;
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let id = self.read_u64()?;
            map.insert(id, self.read_string()?);
        }
        Ok(map)
    }
}

/// Read names.bin, verifying the file checksum
pub fn read<P: AsRef<Path>>(path: P) -> Result<NameData> {
    let mut file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() < HEADER_SIZE + 8 {
        bail!("Names file too short");
    }

    let content_end = bytes.len() - 8;
    let stored_crc = u64::from_le_bytes(bytes[content_end..].try_into()?);
    let computed = crc::checksum(&bytes[..content_end]);
    if computed != stored_crc {
        bail!(
            "Names file CRC mismatch: expected {:016x}, got {:016x}",
            stored_crc,
            computed
        );
    }

    let mut reader = Reader {
        buf: &bytes[..content_end],
        pos: 0,
    };
    let magic = reader.read_u32()?;
    if magic != MAGIC {
        bail!("Invalid names magic: {:08x}", magic);
    }
    let version = reader.read_u16()?;
    if version != VERSION {
        bail!("Unsupported names version: {}", version);
    }
    reader.read_u16()?;
    reader.read_u64()?;

    Ok(NameData {
        ref_table: reader.read_table()?,
        name_table: reader.read_table()?,
        way_ref: reader.read_map()?,
        node_ref: reader.read_map()?,
        node_name: reader.read_map()?,
        node_exit_to: reader.read_map()?,
    })
}
