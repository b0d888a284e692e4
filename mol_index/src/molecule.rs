//! Compact in-memory molecular graph decoded from a molecule blob.
//!
//! Two decode modes exist. Compact mode folds hydrogens into a per-atom count and keeps
//! only heavy atoms as graph nodes. Extended mode materialises every hydrogen record as a
//! real node, which is required as soon as a hydrogen carries more than one bond or a
//! property the matcher must see. Use [`needs_extended_search`] on the query blob to pick
//! the mode, and decode every target of that query the same way.
//!
//! Atom indices follow the blob: explicit atoms, then implicit carbons, then (extended
//! mode only) hydrogens.

use crate::data::{BlobCounts, BlobReader};
use crate::error::{Error, Result};
use crate::layout;

pub const HYDROGEN: i8 = 1;
pub const CARBON: i8 = 6;

/// `*`: matches any atom.
pub const PSEUDO_ATOM: i8 = -1;
/// `R`: R-group attachment, matches any atom.
pub const R_GROUP: i8 = -2;
/// `Q`: matches any atom except carbon and hydrogen.
pub const HETEROATOM: i8 = -3;

pub const BOND_SINGLE: u8 = 1;
pub const BOND_DOUBLE: u8 = 2;
pub const BOND_TRIPLE: u8 = 3;
pub const BOND_QUADRUPLE: u8 = 4;
pub const BOND_AROMATIC: u8 = 11;

const NO_BOND: u16 = u16::MAX;

pub fn is_pseudo(atomic_number: i8) -> bool {
    atomic_number < 0
}

/// Tetrahedral parity relative to the neighbours sorted by atom index, with a missing
/// fourth neighbour (implicit hydrogen or lone pair) placed last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtomStereo {
    #[default]
    None,
    Clockwise,
    AntiClockwise,
    Undefined,
}

impl AtomStereo {

    pub fn from_payload(payload: u8) -> Result<Self> {
        match payload {
            0 => Ok(AtomStereo::None),
            1 => Ok(AtomStereo::Clockwise),
            2 => Ok(AtomStereo::AntiClockwise),
            3 => Ok(AtomStereo::Undefined),
            x => Err(Error::Structural(format!("unknown atom stereo value {}", x))),
        }
    }

    pub fn to_payload(self) -> u8 {
        match self {
            AtomStereo::None => 0,
            AtomStereo::Clockwise => 1,
            AtomStereo::AntiClockwise => 2,
            AtomStereo::Undefined => 3,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, AtomStereo::Clockwise | AtomStereo::AntiClockwise)
    }

    pub fn flipped(self) -> Self {
        match self {
            AtomStereo::Clockwise => AtomStereo::AntiClockwise,
            AtomStereo::AntiClockwise => AtomStereo::Clockwise,
            other => other,
        }
    }
}

/// Double bond configuration relative to the lowest-indexed substituent on each end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BondStereo {
    #[default]
    None,
    Cis,
    Trans,
    Undefined,
}

impl BondStereo {

    pub fn from_payload(payload: u8) -> Result<Self> {
        match payload {
            0 => Ok(BondStereo::None),
            1 => Ok(BondStereo::Cis),
            2 => Ok(BondStereo::Trans),
            3 => Ok(BondStereo::Undefined),
            x => Err(Error::Structural(format!("unknown bond stereo value {}", x))),
        }
    }

    pub fn to_payload(self) -> u8 {
        match self {
            BondStereo::None => 0,
            BondStereo::Cis => 1,
            BondStereo::Trans => 2,
            BondStereo::Undefined => 3,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, BondStereo::Cis | BondStereo::Trans)
    }

    pub fn flipped(self) -> Self {
        match self {
            BondStereo::Cis => BondStereo::Trans,
            BondStereo::Trans => BondStereo::Cis,
            other => other,
        }
    }
}

/// Cheap pre-scan deciding whether a molecule must be matched with explicit hydrogen nodes.
///
/// True when a hydrogen is bonded to another hydrogen, carries more than one bond or a
/// non-single bond, or is the subject of a charge, isotope or stereo record.
pub fn needs_extended_search(blob: &[u8]) -> Result<bool> {

    let reader = BlobReader::new(blob)?;
    let counts = *reader.counts();
    let heavy = counts.heavy_atoms();

    for i in 0..counts.h_atoms {
        let record = reader.hydrogen(i);
        if record.bond_type != BOND_SINGLE || record.atom >= heavy {
            return Ok(true);
        }
        //H-H: the partner is written as an explicit atom
        if record.atom < counts.x_atoms && reader.atom_number(record.atom) == HYDROGEN {
            return Ok(true);
        }
    }

    for i in 0..counts.bonds {
        let (a, b) = reader.bond(i).atoms;
        if a >= heavy || b >= heavy {
            return Ok(true);
        }
    }

    for i in 0..counts.specials {
        let record = reader.special(i);
        if record.tag != layout::SPECIAL_BOND_STEREO && record.index >= heavy {
            return Ok(true);
        }
    }

    Ok(false)
}

#[derive(Debug, Clone, Default)]
pub struct Molecule {
    extended: bool,
    heavy_atom_count: usize,

    atomic_numbers: Vec<i8>,
    hydrogen_counts: Vec<u8>,
    //the optional per-atom arrays stay empty when the blob has no such record
    formal_charges: Vec<i8>,
    isotope_masses: Vec<u8>,
    atom_stereo: Vec<AtomStereo>,
    rest_h: Vec<bool>,

    bond_types: Vec<u8>,
    bond_stereo: Vec<BondStereo>,
    bond_atoms: Vec<[u16; 2]>,

    //atom_count x MAX_DEGREE bond indices
    bond_lists: Vec<u16>,
    bond_list_sizes: Vec<u8>,
    //atom_count x atom_count bond indices, NO_BOND when unbonded
    bond_matrix: Vec<u16>,

    //blob bond record -> bond index, for bond stereo records
    record_bonds: Vec<u16>,
}

impl Molecule {

    pub fn decode(blob: &[u8], extended: bool, rest_h: Option<&[bool]>) -> Result<Self> {

        let mut molecule = Self::default();
        molecule.load(blob, extended, rest_h)?;
        Ok(molecule)
    }

    /// Decodes `blob` into `self`, reusing the buffers of the previous molecule.
    ///
    /// On error `self` is left empty.
    pub fn load(&mut self, blob: &[u8], extended: bool, rest_h: Option<&[bool]>) -> Result<()> {

        let result = self.load_inner(blob, extended, rest_h);

        if result.is_err() {
            self.reset(0, 0, false);
        }

        result
    }

    fn load_inner(&mut self, blob: &[u8], extended: bool, rest_h: Option<&[bool]>) -> Result<()> {

        let reader = BlobReader::new(blob)?;
        let counts: BlobCounts = *reader.counts();

        let heavy = counts.heavy_atoms();
        let total = heavy + counts.h_atoms;
        let atom_count = if extended { total } else { heavy };

        self.reserve(atom_count, counts.bonds + if extended { counts.h_atoms } else { 0 })?;
        self.reset(atom_count, heavy, extended);

        for i in 0..counts.x_atoms {
            self.atomic_numbers.push(reader.atom_number(i));
        }
        self.atomic_numbers.resize(heavy, CARBON);
        self.atomic_numbers.resize(atom_count, HYDROGEN);

        for i in 0..counts.bonds {
            let record = reader.bond(i);
            let (a, b) = record.atoms;

            if a >= total || b >= total {
                return Err(Error::Structural(format!("bond {} references atom beyond {}", i, total)));
            }

            if a < atom_count && b < atom_count {
                let bond = self.add_bond(a, b, record.bond_type)?;
                self.record_bonds.push(bond as u16);
            } else {
                self.record_bonds.push(NO_BOND);
            }
        }

        for i in 0..counts.h_atoms {
            let record = reader.hydrogen(i);

            if record.atom >= total || record.atom == heavy + i {
                return Err(Error::Structural(format!("hydrogen {} bonded to invalid atom {}", i, record.atom)));
            }

            if extended {
                self.add_bond(heavy + i, record.atom, record.bond_type)?;
            } else if record.atom < heavy {
                self.hydrogen_counts[record.atom] = self.hydrogen_counts[record.atom].saturating_add(1);
            }
        }

        for i in 0..counts.specials {
            let record = reader.special(i);

            if record.tag == layout::SPECIAL_BOND_STEREO {
                let bond = *self.record_bonds.get(record.index)
                    .ok_or_else(|| Error::Structural(format!("stereo record for missing bond {}", record.index)))?;

                if bond != NO_BOND {
                    if self.bond_stereo.is_empty() {
                        self.bond_stereo.resize(self.bond_types.len(), BondStereo::None);
                    }
                    self.bond_stereo[bond as usize] = BondStereo::from_payload(record.payload)?;
                }
                continue;
            }

            if record.index >= total {
                return Err(Error::Structural(format!("property record for missing atom {}", record.index)));
            }

            //properties of folded hydrogens are dropped in compact mode
            if record.index >= atom_count {
                continue;
            }

            match record.tag {
                layout::SPECIAL_CHARGE => {
                    if self.formal_charges.is_empty() {
                        self.formal_charges.resize(atom_count, 0);
                    }
                    self.formal_charges[record.index] = record.payload as i8;
                },
                layout::SPECIAL_ISOTOPE => {
                    if self.isotope_masses.is_empty() {
                        self.isotope_masses.resize(atom_count, 0);
                    }
                    self.isotope_masses[record.index] = record.payload;
                },
                layout::SPECIAL_ATOM_STEREO => {
                    if self.atom_stereo.is_empty() {
                        self.atom_stereo.resize(atom_count, AtomStereo::None);
                    }
                    self.atom_stereo[record.index] = AtomStereo::from_payload(record.payload)?;
                },
                tag => return Err(Error::Structural(format!("unknown property record type {}", tag))),
            }
        }

        if let Some(flags) = rest_h {
            if flags.len() > atom_count {
                return Err(Error::Structural(format!("{} rest-H flags for {} atoms", flags.len(), atom_count)));
            }
            if flags.iter().any(|&f| f) {
                self.rest_h.extend_from_slice(flags);
                self.rest_h.resize(atom_count, false);
            }
        }

        Ok(())
    }

    fn reserve(&mut self, atom_count: usize, bond_count: usize) -> Result<()> {

        let matrix = atom_count * atom_count;
        self.bond_matrix.try_reserve(matrix.saturating_sub(self.bond_matrix.len()))?;
        self.bond_lists.try_reserve((atom_count * layout::MAX_DEGREE).saturating_sub(self.bond_lists.len()))?;
        self.atomic_numbers.try_reserve(atom_count.saturating_sub(self.atomic_numbers.len()))?;
        self.bond_atoms.try_reserve(bond_count.saturating_sub(self.bond_atoms.len()))?;
        Ok(())
    }

    fn reset(&mut self, atom_count: usize, heavy: usize, extended: bool) {

        self.extended = extended;
        self.heavy_atom_count = heavy;

        self.atomic_numbers.clear();
        self.hydrogen_counts.clear();
        self.hydrogen_counts.resize(atom_count, 0);
        self.formal_charges.clear();
        self.isotope_masses.clear();
        self.atom_stereo.clear();
        self.rest_h.clear();

        self.bond_types.clear();
        self.bond_stereo.clear();
        self.bond_atoms.clear();
        self.record_bonds.clear();

        self.bond_lists.clear();
        self.bond_lists.resize(atom_count * layout::MAX_DEGREE, 0);
        self.bond_list_sizes.clear();
        self.bond_list_sizes.resize(atom_count, 0);
        self.bond_matrix.clear();
        self.bond_matrix.resize(atom_count * atom_count, NO_BOND);
    }

    fn add_bond(&mut self, a: usize, b: usize, bond_type: u8) -> Result<usize> {

        let n = self.atomic_numbers.len();

        if a == b {
            return Err(Error::Structural(format!("atom {} bonded to itself", a)));
        }

        if self.bond_matrix[a * n + b] != NO_BOND {
            return Err(Error::Structural(format!("duplicate bond between {} and {}", a, b)));
        }

        for atom in [a, b] {
            if self.bond_list_sizes[atom] as usize >= layout::MAX_DEGREE {
                return Err(Error::Structural(format!("atom {} exceeds {} bonds", atom, layout::MAX_DEGREE)));
            }
        }

        let bond = self.bond_types.len();
        self.bond_types.push(bond_type);
        self.bond_atoms.push([a as u16, b as u16]);

        for atom in [a, b] {
            let size = self.bond_list_sizes[atom] as usize;
            self.bond_lists[atom * layout::MAX_DEGREE + size] = bond as u16;
            self.bond_list_sizes[atom] += 1;
        }

        self.bond_matrix[a * n + b] = bond as u16;
        self.bond_matrix[b * n + a] = bond as u16;

        Ok(bond)
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn atom_count(&self) -> usize {
        self.atomic_numbers.len()
    }

    pub fn heavy_atom_count(&self) -> usize {
        self.heavy_atom_count
    }

    pub fn bond_count(&self) -> usize {
        self.bond_types.len()
    }

    pub fn atomic_number(&self, atom: usize) -> i8 {
        self.atomic_numbers[atom]
    }

    pub fn hydrogen_count(&self, atom: usize) -> u8 {
        self.hydrogen_counts[atom]
    }

    pub fn formal_charge(&self, atom: usize) -> i8 {
        self.formal_charges.get(atom).copied().unwrap_or(0)
    }

    pub fn isotope_mass(&self, atom: usize) -> u8 {
        self.isotope_masses.get(atom).copied().unwrap_or(0)
    }

    pub fn atom_stereo(&self, atom: usize) -> AtomStereo {
        self.atom_stereo.get(atom).copied().unwrap_or_default()
    }

    pub fn has_atom_stereo(&self) -> bool {
        !self.atom_stereo.is_empty()
    }

    pub fn is_rest_h(&self, atom: usize) -> bool {
        self.rest_h.get(atom).copied().unwrap_or(false)
    }

    pub fn has_rest_h(&self) -> bool {
        !self.rest_h.is_empty()
    }

    pub fn has_pseudo_atoms(&self) -> bool {
        self.atomic_numbers.iter().any(|&n| is_pseudo(n))
    }

    pub fn bond_type(&self, bond: usize) -> u8 {
        self.bond_types[bond]
    }

    pub fn bond_stereo(&self, bond: usize) -> BondStereo {
        self.bond_stereo.get(bond).copied().unwrap_or_default()
    }

    pub fn has_bond_stereo(&self) -> bool {
        !self.bond_stereo.is_empty()
    }

    pub fn bond_atoms(&self, bond: usize) -> (usize, usize) {
        let [a, b] = self.bond_atoms[bond];
        (a as usize, b as usize)
    }

    pub fn other_atom(&self, bond: usize, atom: usize) -> usize {
        let (a, b) = self.bond_atoms(bond);
        if a == atom { b } else { a }
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.bond_list_sizes[atom] as usize
    }

    /// Bond indices incident to `atom`, in insertion order.
    pub fn bonds_of(&self, atom: usize) -> &[u16] {
        let start = atom * layout::MAX_DEGREE;
        &self.bond_lists[start..start + self.degree(atom)]
    }

    pub fn neighbors(&self, atom: usize) -> impl Iterator<Item = usize> + '_ {
        self.bonds_of(atom).iter().map(move |&b| self.other_atom(b as usize, atom))
    }

    pub fn bond_between(&self, a: usize, b: usize) -> Option<usize> {

        let bond = self.bond_matrix[a * self.atom_count() + b];
        if bond == NO_BOND { None } else { Some(bond as usize) }
    }

    /// Number of bonds from `atom` to atoms that are not hydrogen nodes.
    pub fn heavy_bond_count(&self, atom: usize) -> usize {
        self.neighbors(atom).filter(|&n| self.atomic_numbers[n] != HYDROGEN).count()
    }

    pub fn total_hydrogen_count(&self) -> usize {

        let folded: usize = self.hydrogen_counts.iter().map(|&h| h as usize).sum();
        let nodes = self.atomic_numbers.iter().filter(|&&n| n == HYDROGEN).count();
        folded + nodes
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::MoleculeBuilder;

    fn ethanol_with_hydrogens() -> MoleculeBuilder {

        let mut b = MoleculeBuilder::new();
        let c1 = b.add_atom(CARBON);
        let c2 = b.add_atom(CARBON);
        let o = b.add_atom(8);
        b.add_bond(c1, c2, BOND_SINGLE);
        b.add_bond(c2, o, BOND_SINGLE);
        b.add_hydrogens(c1, 3);
        b.add_hydrogens(c2, 2);
        b.add_hydrogens(o, 1);
        b
    }

    #[test]
    fn decoded_counts_match_header() {

        let blob = ethanol_with_hydrogens().encode().unwrap();
        let counts = BlobReader::read_counts(&blob).unwrap();

        let compact = Molecule::decode(&blob, false, None).unwrap();
        assert_eq!(compact.atom_count(), counts.heavy_atoms());
        assert_eq!(compact.bond_count(), counts.bonds);
        assert_eq!(compact.total_hydrogen_count(), counts.h_atoms);

        let extended = Molecule::decode(&blob, true, None).unwrap();
        assert_eq!(extended.atom_count(), counts.heavy_atoms() + counts.h_atoms);
        assert_eq!(extended.bond_count(), counts.bonds + counts.h_atoms);
        assert_eq!(extended.total_hydrogen_count(), counts.h_atoms);
    }

    #[test]
    fn explicit_atoms_come_before_carbons() {

        let blob = ethanol_with_hydrogens().encode().unwrap();
        let molecule = Molecule::decode(&blob, false, None).unwrap();

        assert_eq!(molecule.atomic_number(0), 8);
        assert_eq!(molecule.atomic_number(1), CARBON);
        assert_eq!(molecule.atomic_number(2), CARBON);
        assert_eq!(molecule.hydrogen_count(0), 1);
        assert_eq!(molecule.hydrogen_count(1) + molecule.hydrogen_count(2), 5);
    }

    #[test]
    fn adjacency_is_consistent() {

        let blob = ethanol_with_hydrogens().encode().unwrap();
        let molecule = Molecule::decode(&blob, true, None).unwrap();

        for bond in 0..molecule.bond_count() {
            let (a, b) = molecule.bond_atoms(bond);
            assert_eq!(molecule.bond_between(a, b), Some(bond));
            assert_eq!(molecule.bond_between(b, a), Some(bond));
            assert!(molecule.bonds_of(a).contains(&(bond as u16)));
            assert!(molecule.bonds_of(b).contains(&(bond as u16)));
        }

        for atom in 0..molecule.atom_count() {
            for other in 0..molecule.atom_count() {
                if let Some(bond) = molecule.bond_between(atom, other) {
                    assert_eq!(molecule.other_atom(bond, atom), other);
                }
            }
        }
    }

    #[test]
    fn single_bonded_hydrogens_do_not_need_extended_search() {

        let blob = ethanol_with_hydrogens().encode().unwrap();
        assert!(!needs_extended_search(&blob).unwrap());
        assert!(Molecule::decode(&blob, true, None).unwrap().is_extended());
    }

    #[test]
    fn charged_hydrogen_needs_extended_search() {

        let mut b = ethanol_with_hydrogens();
        let h = b.add_hydrogen(0);
        b.set_charge(h, 1);
        let blob = b.encode().unwrap();

        assert!(needs_extended_search(&blob).unwrap());

        let extended = Molecule::decode(&blob, true, None).unwrap();
        let charged = (0..extended.atom_count()).find(|&a| extended.formal_charge(a) == 1).unwrap();
        assert_eq!(extended.atomic_number(charged), HYDROGEN);
    }

    #[test]
    fn bridging_hydrogen_needs_extended_search() {

        let mut b = MoleculeBuilder::new();
        let b1 = b.add_atom(5);
        let b2 = b.add_atom(5);
        let h = b.add_hydrogen(b1);
        b.add_bond(h, b2, BOND_SINGLE);
        let blob = b.encode().unwrap();

        assert!(needs_extended_search(&blob).unwrap());

        let extended = Molecule::decode(&blob, true, None).unwrap();
        let h = (0..extended.atom_count()).find(|&a| extended.atomic_number(a) == HYDROGEN).unwrap();
        assert_eq!(extended.degree(h), 2);
    }

    #[test]
    fn hydrogen_molecule_needs_extended_search() {

        let mut b = MoleculeBuilder::new();
        let first = b.add_atom(HYDROGEN);
        let second = b.add_atom(HYDROGEN);
        b.add_bond(first, second, BOND_SINGLE);
        let blob = b.encode().unwrap();

        assert!(needs_extended_search(&blob).unwrap());

        let extended = Molecule::decode(&blob, true, None).unwrap();
        assert_eq!(extended.atom_count(), 2);
        assert_eq!(extended.bond_count(), 1);
    }

    #[test]
    fn degree_overflow_is_structural() {

        let mut b = MoleculeBuilder::new();
        let center = b.add_atom(CARBON);
        for _ in 0..layout::MAX_DEGREE + 1 {
            let x = b.add_atom(9);
            b.add_bond(center, x, BOND_SINGLE);
        }
        let blob = b.encode().unwrap();

        match Molecule::decode(&blob, false, None) {
            Err(Error::Structural(_)) => {},
            other => panic!("expected structural error, got {:?}", other.map(|m| m.atom_count())),
        }
    }

    #[test]
    fn load_reuses_buffers_across_molecules() {

        let big = ethanol_with_hydrogens().encode().unwrap();

        let mut small = MoleculeBuilder::new();
        small.add_atom(7);
        let small = small.encode().unwrap();

        let mut molecule = Molecule::decode(&big, true, None).unwrap();
        molecule.load(&small, true, None).unwrap();

        assert_eq!(molecule.atom_count(), 1);
        assert_eq!(molecule.bond_count(), 0);
        assert_eq!(molecule.atomic_number(0), 7);
        assert_eq!(molecule.neighbors(0).count(), 0);
    }

    #[test]
    fn properties_and_rest_h() {

        let mut b = MoleculeBuilder::new();
        let n = b.add_atom(7);
        let c = b.add_atom(CARBON);
        b.add_bond(n, c, BOND_SINGLE);
        b.set_charge(n, 1);
        b.set_isotope(c, 13);
        b.set_rest_h(c);
        let encoded = b.encode_full().unwrap();

        let molecule = Molecule::decode(&encoded.blob, false, encoded.rest_h.as_deref()).unwrap();
        let n = encoded.atom_map[n];
        let c = encoded.atom_map[c];

        assert_eq!(molecule.formal_charge(n), 1);
        assert_eq!(molecule.formal_charge(c), 0);
        assert_eq!(molecule.isotope_mass(c), 13);
        assert!(molecule.is_rest_h(c));
        assert!(!molecule.is_rest_h(n));
    }
}
