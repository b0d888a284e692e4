//! Compound identifiers and the bit-field reader for molecule blobs.

use std::fmt;
use ascii::AsciiString;
use byteorder::{ByteOrder, BigEndian};
use rand::Rng;

use crate::error::{Error, Result};
use crate::layout;

pub type CompoundIndex = u32;

pub const IDENTIFIER_SIZE: usize = 30;

#[derive(PartialEq, Eq, Clone, Hash)]
pub struct CompoundIdentifier(pub [u8; IDENTIFIER_SIZE]);

impl CompoundIdentifier {

    pub fn from_str(data: &str) -> Result<Self> {

        let bytes = data.as_bytes();

        if bytes.len() > IDENTIFIER_SIZE || !data.is_ascii() {
            return Err(Error::InvalidInput(format!("identifier must be at most {} ascii bytes: {:?}", IDENTIFIER_SIZE, data)));
        }

        let mut fill_arr = [0u8; IDENTIFIER_SIZE];
        fill_arr[..bytes.len()].copy_from_slice(bytes);

        Ok(Self(fill_arr))
    }

    pub fn from_ascii_array(data: &[u8], offset: usize) -> Result<Self> {

        let bytes = data.get(offset..offset + IDENTIFIER_SIZE)
            .ok_or_else(|| Error::Structural("identifier slice out of range".to_string()))?;

        let mut s = [0u8; IDENTIFIER_SIZE];
        s.copy_from_slice(bytes);
        Ok(Self(s))
    }

    pub fn random() -> Self {

        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; IDENTIFIER_SIZE];

        for x in &mut bytes {
            *x = rng.gen_range(65..91);
        }

        Self(bytes)
    }

    pub fn to_string(&self) -> String {

        let end = self.0.iter().position(|&b| b == 0).unwrap_or(IDENTIFIER_SIZE);

        match AsciiString::from_ascii(&self.0[..end]) {
            Ok(s) => String::from(s),
            Err(_) => String::from_utf8_lossy(&self.0[..end]).into_owned(),
        }
    }
}

impl fmt::Debug for CompoundIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

/// One streamed search result. `score` is set by similarity search only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: CompoundIndex,
    pub score: Option<f32>,
}

/// `[aaaaaaaa][aaaabbbb][bbbbbbbb]`: two 12-bit indices, high bits first.
pub fn unpack_index_pair(bytes: &[u8]) -> (usize, usize) {

    let a = (bytes[0] as usize) << 4 | (bytes[1] as usize) >> 4;
    let b = ((bytes[1] & 0x0F) as usize) << 8 | bytes[2] as usize;
    (a, b)
}

pub fn pack_index_pair(a: usize, b: usize) -> [u8; 3] {

    debug_assert!(a <= layout::MAX_PACKED_INDEX && b <= layout::MAX_PACKED_INDEX);
    [
        (a >> 4) as u8,
        ((a & 0x0F) << 4) as u8 | (b >> 8) as u8,
        (b & 0xFF) as u8,
    ]
}

/// `[ttttiiii][iiiiiiii]`: a 4-bit tag followed by a 12-bit index.
pub fn unpack_tagged_index(bytes: &[u8]) -> (u8, usize) {

    let tag = bytes[0] >> 4;
    let index = ((bytes[0] & 0x0F) as usize) << 8 | bytes[1] as usize;
    (tag, index)
}

pub fn pack_tagged_index(tag: u8, index: usize) -> [u8; 2] {

    debug_assert!(tag <= 0x0F && index <= layout::MAX_PACKED_INDEX);
    [tag << 4 | (index >> 8) as u8, (index & 0xFF) as u8]
}

/// Counts header of a molecule blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlobCounts {
    pub x_atoms: usize,
    pub c_atoms: usize,
    pub h_atoms: usize,
    pub bonds: usize,
    pub specials: usize,
}

impl BlobCounts {

    pub fn heavy_atoms(&self) -> usize {
        self.x_atoms + self.c_atoms
    }

    pub fn atom_data_start(&self) -> usize {
        layout::HEADER_SIZE
    }

    pub fn bond_data_start(&self) -> usize {
        self.atom_data_start() + self.x_atoms * layout::ATOM_RECORD_SIZE
    }

    pub fn hydrogen_data_start(&self) -> usize {
        self.bond_data_start() + self.bonds * layout::BOND_RECORD_SIZE
    }

    pub fn special_data_start(&self) -> usize {
        self.hydrogen_data_start() + self.h_atoms * layout::H_BOND_RECORD_SIZE
    }

    pub fn blob_size(&self) -> usize {
        self.special_data_start() + self.specials * layout::SPECIAL_RECORD_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondRecord {
    pub atoms: (usize, usize),
    pub bond_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrogenRecord {
    pub atom: usize,
    pub bond_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialRecord {
    pub tag: u8,
    pub index: usize,
    pub payload: u8,
}

/// Read-only view over a molecule blob. The length is validated against the header once,
/// so the record accessors index without further checks.
#[derive(Debug, Clone, Copy)]
pub struct BlobReader<'a> {
    data: &'a [u8],
    counts: BlobCounts,
}

impl<'a> BlobReader<'a> {

    pub fn new(data: &'a [u8]) -> Result<Self> {

        let counts = Self::read_counts(data)?;

        if data.len() < counts.blob_size() {
            return Err(Error::Structural(format!("blob holds {} bytes but header requires {}", data.len(), counts.blob_size())));
        }

        Ok(Self { data, counts })
    }

    pub fn read_counts(data: &[u8]) -> Result<BlobCounts> {

        if data.len() < layout::HEADER_SIZE {
            return Err(Error::Structural(format!("blob of {} bytes is shorter than its header", data.len())));
        }

        let count_at = |offset: usize| BigEndian::read_u16(&data[offset..offset + layout::COUNT_SIZE]) as usize;

        let counts = BlobCounts {
            x_atoms: count_at(layout::X_ATOM_COUNT_OFFSET),
            c_atoms: count_at(layout::C_ATOM_COUNT_OFFSET),
            h_atoms: count_at(layout::H_ATOM_COUNT_OFFSET),
            bonds: count_at(layout::BOND_COUNT_OFFSET),
            specials: count_at(layout::SPECIAL_COUNT_OFFSET),
        };

        if counts.heavy_atoms() + counts.h_atoms > layout::MAX_PACKED_INDEX + 1 {
            return Err(Error::Structural(format!("{} atoms exceed the 12-bit index range", counts.heavy_atoms() + counts.h_atoms)));
        }

        Ok(counts)
    }

    pub fn counts(&self) -> &BlobCounts {
        &self.counts
    }

    pub fn atom_number(&self, i: usize) -> i8 {
        self.data[self.counts.atom_data_start() + i] as i8
    }

    pub fn bond(&self, i: usize) -> BondRecord {

        let start = self.counts.bond_data_start() + i * layout::BOND_RECORD_SIZE;
        let record = &self.data[start..start + layout::BOND_RECORD_SIZE];

        BondRecord {
            atoms: unpack_index_pair(record),
            bond_type: record[layout::BOND_TYPE_OFFSET],
        }
    }

    pub fn hydrogen(&self, i: usize) -> HydrogenRecord {

        let start = self.counts.hydrogen_data_start() + i * layout::H_BOND_RECORD_SIZE;
        let (bond_type, atom) = unpack_tagged_index(&self.data[start..start + layout::H_BOND_RECORD_SIZE]);

        HydrogenRecord { atom, bond_type }
    }

    pub fn special(&self, i: usize) -> SpecialRecord {

        let start = self.counts.special_data_start() + i * layout::SPECIAL_RECORD_SIZE;
        let record = &self.data[start..start + layout::SPECIAL_RECORD_SIZE];
        let (tag, index) = unpack_tagged_index(record);

        SpecialRecord {
            tag,
            index,
            payload: record[layout::SPECIAL_PAYLOAD_OFFSET],
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn packed_fields_keep_their_bit_layout() {

        let packed = pack_index_pair(0xABC, 0x123);
        assert_eq!(packed, [0xAB, 0xC1, 0x23]);
        assert_eq!(unpack_index_pair(&packed), (0xABC, 0x123));

        let tagged = pack_tagged_index(0x3, 0x7FE);
        assert_eq!(tagged, [0x37, 0xFE]);
        assert_eq!(unpack_tagged_index(&tagged), (0x3, 0x7FE));
    }

    #[test]
    fn truncated_blob_is_structural_error() {

        let mut blob = vec![0u8; layout::HEADER_SIZE];
        blob[layout::BOND_COUNT_OFFSET + 1] = 2;

        match BlobReader::new(&blob) {
            Err(Error::Structural(_)) => {},
            other => panic!("expected structural error, got {:?}", other),
        }

        assert!(BlobReader::new(&blob[..4]).is_err());
    }

    #[test]
    fn identifier_round_trip() {

        let identifier = CompoundIdentifier::from_str("it's a molecule").unwrap();
        assert_eq!(identifier.to_string(), "it's a molecule");

        let random = CompoundIdentifier::random();
        assert_eq!(random.to_string().len(), IDENTIFIER_SIZE);

        assert!(CompoundIdentifier::from_str(&"x".repeat(IDENTIFIER_SIZE + 1)).is_err());
    }
}
