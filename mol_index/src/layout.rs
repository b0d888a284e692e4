//! Sets constants for the molecule blob layout and the on-disk index files
//!
//! Molecule blob (all counts big-endian u16):
//!
//! ```text
//! | xAtoms | cAtoms | hAtoms | bonds | specials | atom numbers (xAtoms x 1) |
//! | bond records (bonds x 4) | hydrogen records (hAtoms x 2) | special records (specials x 3) |
//! ```

//for the counts header
pub const COUNT_SIZE: usize = 2;

pub const X_ATOM_COUNT_OFFSET: usize = 0;
pub const C_ATOM_COUNT_OFFSET: usize = X_ATOM_COUNT_OFFSET + COUNT_SIZE;
pub const H_ATOM_COUNT_OFFSET: usize = C_ATOM_COUNT_OFFSET + COUNT_SIZE;
pub const BOND_COUNT_OFFSET: usize = H_ATOM_COUNT_OFFSET + COUNT_SIZE;
pub const SPECIAL_COUNT_OFFSET: usize = BOND_COUNT_OFFSET + COUNT_SIZE;

pub const HEADER_SIZE: usize = SPECIAL_COUNT_OFFSET + COUNT_SIZE;

//explicit atom numbers, one signed byte each
pub const ATOM_RECORD_SIZE: usize = 1;

//two 12-bit endpoints packed into 3 bytes, then the bond type
pub const BOND_RECORD_SIZE: usize = 4;
pub const BOND_TYPE_OFFSET: usize = 3;

//bond type nibble + 12-bit endpoint of the hydrogen
pub const H_BOND_RECORD_SIZE: usize = 2;

//type nibble + 12-bit atom (or bond) index, then one payload byte
pub const SPECIAL_RECORD_SIZE: usize = 3;
pub const SPECIAL_PAYLOAD_OFFSET: usize = 2;

/// Largest index representable by a packed 12-bit field.
pub const MAX_PACKED_INDEX: usize = 0x0FFF;

pub const SPECIAL_CHARGE: u8 = 0;
pub const SPECIAL_ISOTOPE: u8 = 1;
pub const SPECIAL_ATOM_STEREO: u8 = 2;
pub const SPECIAL_BOND_STEREO: u8 = 3;

/// Fixed capacity of each per-atom bond list.
pub const MAX_DEGREE: usize = 32;

//for the fingerprint file: entries (u64) then feature size (u32)
pub const FP_HEADER_SIZE: usize = 8 + 4;

pub const FP_DATA_START: usize = FP_HEADER_SIZE;
