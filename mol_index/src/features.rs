//! Integer feature counts used as an O(1) lower-bound prune before decoding a candidate.
//!
//! A target can only contain the query if it has at least as many atoms of every element
//! and bonds of every type. Target pseudo atoms may stand in for any query element, so the
//! element test compares the summed deficit against the target's pseudo count, and the bond
//! test does the same against bonds that touch a pseudo atom.

use std::sync::OnceLock;

use crate::molecule::{is_pseudo, Molecule, BOND_AROMATIC, BOND_DOUBLE, BOND_SINGLE, BOND_TRIPLE, HYDROGEN};

pub const HYDROGEN_SLOT: usize = 0;
pub const OTHER_ELEMENT_SLOT: usize = 10;
pub const PSEUDO_SLOT: usize = 11;
pub const SINGLE_BOND_SLOT: usize = 12;
pub const DOUBLE_BOND_SLOT: usize = 13;
pub const TRIPLE_BOND_SLOT: usize = 14;
pub const AROMATIC_BOND_SLOT: usize = 15;
pub const OTHER_BOND_SLOT: usize = 16;
/// bonds between heavy atoms where at least one end is a pseudo atom
pub const WILDCARD_BOND_SLOT: usize = 17;

pub const FEATURE_COUNT_SLOTS: usize = 18;

//element slots 1..=9
const TRACKED_ELEMENTS: [i8; 9] = [6, 7, 8, 9, 15, 16, 17, 35, 53];

static ELEMENT_SLOTS: OnceLock<[u8; 256]> = OnceLock::new();

/// Builds the element -> slot table. Safe to call any number of times from any thread.
pub fn ensure_initialized() -> &'static [u8; 256] {

    ELEMENT_SLOTS.get_or_init(|| {
        let mut table = [OTHER_ELEMENT_SLOT as u8; 256];

        for number in i8::MIN..=-1 {
            table[number as u8 as usize] = PSEUDO_SLOT as u8;
        }

        table[HYDROGEN as u8 as usize] = HYDROGEN_SLOT as u8;

        for (i, &number) in TRACKED_ELEMENTS.iter().enumerate() {
            table[number as u8 as usize] = (i + 1) as u8;
        }

        table
    })
}

#[inline]
pub fn element_slot(atomic_number: i8) -> usize {
    ensure_initialized()[atomic_number as u8 as usize] as usize
}

fn bond_slot(bond_type: u8) -> usize {

    match bond_type {
        BOND_SINGLE => SINGLE_BOND_SLOT,
        BOND_DOUBLE => DOUBLE_BOND_SLOT,
        BOND_TRIPLE => TRIPLE_BOND_SLOT,
        BOND_AROMATIC => AROMATIC_BOND_SLOT,
        _ => OTHER_BOND_SLOT,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureCounts(pub [u16; FEATURE_COUNT_SLOTS]);

impl FeatureCounts {

    /// Counts from a decoded molecule. Index targets should be decoded in extended mode so the
    /// hydrogen slot and bond slots do not depend on how a query is decoded.
    pub fn from_molecule(molecule: &Molecule) -> Self {

        let mut counts = [0u16; FEATURE_COUNT_SLOTS];

        for atom in 0..molecule.atom_count() {
            let number = molecule.atomic_number(atom);
            let slot = element_slot(number);
            counts[slot] = counts[slot].saturating_add(1);

            if !is_pseudo(number) {
                counts[HYDROGEN_SLOT] = counts[HYDROGEN_SLOT].saturating_add(molecule.hydrogen_count(atom) as u16);
            }
        }

        //bonds to hydrogen nodes depend on the decode mode and are not counted
        for bond in 0..molecule.bond_count() {
            let (a, b) = molecule.bond_atoms(bond);
            let (na, nb) = (molecule.atomic_number(a), molecule.atomic_number(b));

            if na == HYDROGEN || nb == HYDROGEN {
                continue;
            }

            let slot = if is_pseudo(na) || is_pseudo(nb) {
                WILDCARD_BOND_SLOT
            } else {
                bond_slot(molecule.bond_type(bond))
            };
            counts[slot] = counts[slot].saturating_add(1);
        }

        Self(counts)
    }

    pub fn get(&self, slot: usize) -> u16 {
        self.0[slot]
    }

    pub fn has_pseudo_atoms(&self) -> bool {
        self.0[PSEUDO_SLOT] > 0
    }

    /// False only if no subgraph of `self` can match `query`.
    pub fn may_contain(&self, query: &FeatureCounts) -> bool {

        let bond_deficit: u32 = (SINGLE_BOND_SLOT..=OTHER_BOND_SLOT)
            .map(|slot| query.0[slot].saturating_sub(self.0[slot]) as u32)
            .sum();

        if bond_deficit > self.0[WILDCARD_BOND_SLOT] as u32 {
            return false;
        }

        //query pseudo atoms and their bonds are wildcards and not compared
        let deficit: u32 = (1..=OTHER_ELEMENT_SLOT)
            .map(|slot| query.0[slot].saturating_sub(self.0[slot]) as u32)
            .sum();

        if deficit > self.0[PSEUDO_SLOT] as u32 {
            return false;
        }

        if !self.has_pseudo_atoms() && query.0[HYDROGEN_SLOT] > self.0[HYDROGEN_SLOT] {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::MoleculeBuilder;
    use crate::molecule::{CARBON, PSEUDO_ATOM};

    fn counts(builder: &MoleculeBuilder, extended: bool) -> FeatureCounts {
        FeatureCounts::from_molecule(&Molecule::decode(&builder.encode().unwrap(), extended, None).unwrap())
    }

    #[test]
    fn element_table() {

        assert_eq!(element_slot(HYDROGEN), HYDROGEN_SLOT);
        assert_eq!(element_slot(CARBON), 1);
        assert_eq!(element_slot(53), 9);
        assert_eq!(element_slot(26), OTHER_ELEMENT_SLOT);
        assert_eq!(element_slot(PSEUDO_ATOM), PSEUDO_SLOT);
    }

    #[test]
    fn compact_and_extended_counts_agree() {

        let mut b = MoleculeBuilder::chain(&[CARBON, CARBON, 8], BOND_SINGLE);
        b.add_hydrogens(0, 3);
        b.add_hydrogens(1, 2);
        b.add_hydrogens(2, 1);

        let compact = counts(&b, false);
        let extended = counts(&b, true);

        assert_eq!(compact, extended);
        assert_eq!(compact.get(HYDROGEN_SLOT), 6);
        assert_eq!(compact.get(1), 2);
        assert_eq!(compact.get(3), 1);
        assert_eq!(compact.get(SINGLE_BOND_SLOT), 2);
    }

    #[test]
    fn lower_bounds() {

        let ethanol = counts(&MoleculeBuilder::chain(&[CARBON, CARBON, 8], BOND_SINGLE), true);
        let ethane = counts(&MoleculeBuilder::chain(&[CARBON, CARBON], BOND_SINGLE), true);
        let ethene = counts(&MoleculeBuilder::chain(&[CARBON, CARBON], BOND_DOUBLE), true);
        let butane = counts(&MoleculeBuilder::chain(&[CARBON; 4], BOND_SINGLE), true);
        let wildcard = counts(&MoleculeBuilder::chain(&[CARBON, CARBON, PSEUDO_ATOM], BOND_SINGLE), true);

        assert!(ethanol.may_contain(&ethane));
        assert!(!ethane.may_contain(&ethanol));
        assert!(!ethanol.may_contain(&ethene));

        //the pseudo atom can stand in for the oxygen
        assert!(wildcard.may_contain(&ethanol));
        assert!(!wildcard.may_contain(&butane));
        assert_eq!(wildcard.get(WILDCARD_BOND_SLOT), 1);
    }
}
