//! Writer for the molecule blob layout, the inverse of [`crate::molecule::Molecule::decode`].
//!
//! Atoms are added in any order and reindexed on encode: explicit (non-carbon) atoms first,
//! then carbons, then every hydrogen that could be given its own single hydrogen record.
//! Stereo descriptors are given relative to builder indices and re-derived for the new order.

use byteorder::{BigEndian, WriteBytesExt};

use crate::data::{pack_index_pair, pack_tagged_index};
use crate::error::{Error, Result};
use crate::layout;
use crate::molecule::{AtomStereo, BondStereo, BOND_SINGLE, CARBON, HYDROGEN};
use crate::stereo::{permutation_is_odd, VIRTUAL_NEIGHBOR};

#[derive(Debug, Clone, Default)]
struct AtomEntry {
    number: i8,
    charge: i8,
    isotope: u8,
    stereo: AtomStereo,
    rest_h: bool,
}

#[derive(Debug, Clone)]
struct BondEntry {
    atoms: (usize, usize),
    bond_type: u8,
    stereo: BondStereo,
}

/// Result of [`MoleculeBuilder::encode_full`].
#[derive(Debug, Clone)]
pub struct EncodedMolecule {
    pub blob: Vec<u8>,
    /// builder atom index -> decoded atom index
    pub atom_map: Vec<usize>,
    /// rest-H flags in decoded atom order, `None` when no atom is flagged
    pub rest_h: Option<Vec<bool>>,
}

#[derive(Debug, Clone, Default)]
pub struct MoleculeBuilder {
    atoms: Vec<AtomEntry>,
    bonds: Vec<BondEntry>,
}

impl MoleculeBuilder {

    pub fn new() -> Self {
        Self::default()
    }

    /// Linear chain of `elements` joined by bonds of `bond_type`.
    pub fn chain(elements: &[i8], bond_type: u8) -> Self {

        let mut builder = Self::new();
        for (i, &element) in elements.iter().enumerate() {
            let atom = builder.add_atom(element);
            if i > 0 {
                builder.add_bond(atom - 1, atom, bond_type);
            }
        }
        builder
    }

    /// Ring of `elements`, closing the last atom back onto the first.
    pub fn ring(elements: &[i8], bond_type: u8) -> Self {

        let mut builder = Self::chain(elements, bond_type);
        if elements.len() > 2 {
            builder.add_bond(elements.len() - 1, 0, bond_type);
        }
        builder
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn bond_count(&self) -> usize {
        self.bonds.len()
    }

    pub fn add_atom(&mut self, number: i8) -> usize {

        self.atoms.push(AtomEntry { number, ..AtomEntry::default() });
        self.atoms.len() - 1
    }

    pub fn add_bond(&mut self, a: usize, b: usize, bond_type: u8) -> usize {

        self.bonds.push(BondEntry { atoms: (a, b), bond_type, stereo: BondStereo::None });
        self.bonds.len() - 1
    }

    /// Adds one hydrogen single-bonded to `atom` and returns its index.
    pub fn add_hydrogen(&mut self, atom: usize) -> usize {

        let h = self.add_atom(HYDROGEN);
        self.add_bond(h, atom, BOND_SINGLE);
        h
    }

    pub fn add_hydrogens(&mut self, atom: usize, count: usize) {

        for _ in 0..count {
            self.add_hydrogen(atom);
        }
    }

    pub fn set_charge(&mut self, atom: usize, charge: i8) {
        self.atoms[atom].charge = charge;
    }

    pub fn set_isotope(&mut self, atom: usize, mass: u8) {
        self.atoms[atom].isotope = mass;
    }

    /// Parity relative to the neighbours of `atom` sorted by builder index.
    pub fn set_atom_stereo(&mut self, atom: usize, stereo: AtomStereo) {
        self.atoms[atom].stereo = stereo;
    }

    /// Configuration relative to the lowest builder-indexed substituent on each end.
    pub fn set_bond_stereo(&mut self, bond: usize, stereo: BondStereo) {
        self.bonds[bond].stereo = stereo;
    }

    pub fn set_rest_h(&mut self, atom: usize) {
        self.atoms[atom].rest_h = true;
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.encode_full()?.blob)
    }

    pub fn encode_full(&self) -> Result<EncodedMolecule> {

        let n = self.atoms.len();

        if n > layout::MAX_PACKED_INDEX + 1 {
            return Err(Error::InvalidInput(format!("{} atoms exceed the 12-bit index range", n)));
        }

        let mut incident: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, bond) in self.bonds.iter().enumerate() {
            let (a, b) = bond.atoms;
            if a >= n || b >= n {
                return Err(Error::InvalidInput(format!("bond {} references unknown atom", i)));
            }
            incident[a].push(i);
            incident[b].push(i);
        }

        //each hydrogen claims one unused bond as its hydrogen record
        let mut primary: Vec<Option<usize>> = vec![None; n];
        let mut claimed = vec![false; self.bonds.len()];

        for atom in 0..n {
            if self.atoms[atom].number != HYDROGEN {
                continue;
            }
            for &bond in incident[atom].iter() {
                let entry = &self.bonds[bond];
                if !claimed[bond] && entry.stereo == BondStereo::None && entry.bond_type <= 0x0F {
                    claimed[bond] = true;
                    primary[atom] = Some(bond);
                    break;
                }
            }
        }

        let explicit: Vec<usize> = (0..n)
            .filter(|&a| primary[a].is_none() && self.atoms[a].number != CARBON)
            .collect();
        let carbons: Vec<usize> = (0..n).filter(|&a| self.atoms[a].number == CARBON).collect();
        let hydrogens: Vec<usize> = (0..n).filter(|&a| primary[a].is_some()).collect();

        let mut atom_map = vec![0usize; n];
        for (new, &old) in explicit.iter().chain(carbons.iter()).chain(hydrogens.iter()).enumerate() {
            atom_map[old] = new;
        }

        let heavy = explicit.len() + carbons.len();

        let bond_records: Vec<usize> = (0..self.bonds.len()).filter(|&b| !claimed[b]).collect();

        let mut specials: Vec<[u8; layout::SPECIAL_RECORD_SIZE]> = Vec::new();

        for old in 0..n {
            let atom = &self.atoms[old];
            let new = atom_map[old];

            if atom.charge != 0 {
                specials.push(special_record(layout::SPECIAL_CHARGE, new, atom.charge as u8));
            }
            if atom.isotope != 0 {
                specials.push(special_record(layout::SPECIAL_ISOTOPE, new, atom.isotope));
            }
            if atom.stereo != AtomStereo::None {
                let stereo = self.reindexed_atom_stereo(old, &incident, &atom_map);
                specials.push(special_record(layout::SPECIAL_ATOM_STEREO, new, stereo.to_payload()));
            }
        }

        for (record, &bond) in bond_records.iter().enumerate() {
            if self.bonds[bond].stereo != BondStereo::None {
                let stereo = self.reindexed_bond_stereo(bond, &incident, &atom_map);
                specials.push(special_record(layout::SPECIAL_BOND_STEREO, record, stereo.to_payload()));
            }
        }

        for count in [explicit.len(), carbons.len(), hydrogens.len(), bond_records.len(), specials.len()] {
            if count > u16::MAX as usize {
                return Err(Error::InvalidInput(format!("section of {} records does not fit the header", count)));
            }
        }

        let mut blob: Vec<u8> = Vec::new();
        blob.write_u16::<BigEndian>(explicit.len() as u16)?;
        blob.write_u16::<BigEndian>(carbons.len() as u16)?;
        blob.write_u16::<BigEndian>(hydrogens.len() as u16)?;
        blob.write_u16::<BigEndian>(bond_records.len() as u16)?;
        blob.write_u16::<BigEndian>(specials.len() as u16)?;

        for &old in explicit.iter() {
            blob.write_i8(self.atoms[old].number)?;
        }

        for &bond in bond_records.iter() {
            let entry = &self.bonds[bond];
            let (a, b) = entry.atoms;
            blob.extend_from_slice(&pack_index_pair(atom_map[a], atom_map[b]));
            blob.write_u8(entry.bond_type)?;
        }

        for &h in hydrogens.iter() {
            let bond = primary[h].ok_or_else(|| Error::InvalidInput("hydrogen without record".to_string()))?;
            let entry = &self.bonds[bond];
            let other = if entry.atoms.0 == h { entry.atoms.1 } else { entry.atoms.0 };
            blob.extend_from_slice(&pack_tagged_index(entry.bond_type, atom_map[other]));
        }

        for record in specials.iter() {
            blob.extend_from_slice(record);
        }

        debug_assert_eq!(atom_map.iter().filter(|&&a| a >= heavy).count(), hydrogens.len());

        let rest_h = if self.atoms.iter().any(|a| a.rest_h) {
            let len = (0..n).filter(|&a| self.atoms[a].rest_h).map(|a| atom_map[a] + 1).max().unwrap_or(0);
            let mut flags = vec![false; len];
            for old in (0..n).filter(|&a| self.atoms[a].rest_h) {
                flags[atom_map[old]] = true;
            }
            Some(flags)
        } else {
            None
        };

        Ok(EncodedMolecule { blob, atom_map, rest_h })
    }

    fn neighbors(&self, atom: usize, incident: &[Vec<usize>]) -> Vec<usize> {

        incident[atom].iter().map(|&b| {
            let (x, y) = self.bonds[b].atoms;
            if x == atom { y } else { x }
        }).collect()
    }

    fn reindexed_atom_stereo(&self, atom: usize, incident: &[Vec<usize>], atom_map: &[usize]) -> AtomStereo {

        let stereo = self.atoms[atom].stereo;
        let mut old = self.neighbors(atom, incident);

        if !stereo.is_defined() || !(3..=4).contains(&old.len()) {
            return stereo;
        }

        old.sort_unstable();

        let renumbered: Vec<usize> = old.iter()
            .map(|&n| atom_map[n])
            .chain(std::iter::repeat(VIRTUAL_NEIGHBOR))
            .take(4)
            .collect();

        if permutation_is_odd(&renumbered) { stereo.flipped() } else { stereo }
    }

    fn reindexed_bond_stereo(&self, bond: usize, incident: &[Vec<usize>], atom_map: &[usize]) -> BondStereo {

        let entry = &self.bonds[bond];
        let mut stereo = entry.stereo;

        if !stereo.is_defined() {
            return stereo;
        }

        let (a, b) = entry.atoms;
        for (end, partner) in [(a, b), (b, a)] {
            let substituents: Vec<usize> = self.neighbors(end, incident).into_iter().filter(|&x| x != partner).collect();

            let old_ref = substituents.iter().copied().min();
            let new_ref = substituents.iter().copied().min_by_key(|&x| atom_map[x]);

            if old_ref != new_ref {
                stereo = stereo.flipped();
            }
        }

        stereo
    }
}

fn special_record(tag: u8, index: usize, payload: u8) -> [u8; layout::SPECIAL_RECORD_SIZE] {

    let [first, second] = pack_tagged_index(tag, index);
    [first, second, payload]
}
