//! Stereo validation of a complete query -> target mapping.
//!
//! Tetrahedral parity is stored relative to the neighbours of the centre sorted by atom
//! index, with a missing fourth neighbour placed last. To compare a query centre with its
//! image, the query neighbour order is carried through the mapping and the parity of the
//! resulting permutation of the target order decides whether the target descriptor is
//! flipped before comparing. Double bonds work the same way with one reference substituent
//! per end (the lowest-indexed neighbour other than the partner atom).

use crate::molecule::{AtomStereo, BondStereo, Molecule};

/// Stand-in for an implicit hydrogen or lone pair in a neighbour list.
pub const VIRTUAL_NEIGHBOR: usize = usize::MAX;

pub fn permutation_is_odd(sequence: &[usize]) -> bool {

    let mut inversions = 0;
    for i in 0..sequence.len() {
        for j in i + 1..sequence.len() {
            if sequence[i] > sequence[j] {
                inversions += 1;
            }
        }
    }
    inversions % 2 == 1
}

fn sorted_neighbors(molecule: &Molecule, atom: usize) -> Option<[usize; 4]> {

    let degree = molecule.degree(atom);
    if !(3..=4).contains(&degree) {
        return None;
    }

    let mut neighbors = [VIRTUAL_NEIGHBOR; 4];
    for (slot, n) in neighbors.iter_mut().zip(molecule.neighbors(atom)) {
        *slot = n;
    }
    neighbors.sort_unstable();
    Some(neighbors)
}

fn reference_substituent(molecule: &Molecule, atom: usize, partner: usize) -> Option<usize> {
    molecule.neighbors(atom).filter(|&n| n != partner).min()
}

pub struct StereoCheck<'a> {
    query: &'a Molecule,
    target: &'a Molecule,
    core: &'a [usize],
    exact: bool,
}

impl<'a> StereoCheck<'a> {

    /// `core[q]` is the target atom mapped to query atom `q`; every query atom must be mapped.
    pub fn new(query: &'a Molecule, target: &'a Molecule, core: &'a [usize], exact: bool) -> Self {
        Self { query, target, core, exact }
    }

    pub fn validate(&self) -> bool {

        if self.query.has_atom_stereo() {
            for atom in 0..self.query.atom_count() {
                if !self.atom_matches(atom) {
                    return false;
                }
            }
        }

        if self.query.has_bond_stereo() {
            for bond in 0..self.query.bond_count() {
                if !self.bond_matches(bond) {
                    return false;
                }
            }
        }

        true
    }

    fn atom_matches(&self, atom: usize) -> bool {

        let query_stereo = self.query.atom_stereo(atom);
        let mapped = self.core[atom];
        let target_stereo = self.target.atom_stereo(mapped);

        match query_stereo {
            AtomStereo::None => return true,
            AtomStereo::Undefined => return !self.exact || !target_stereo.is_defined(),
            _ => {},
        }

        if !target_stereo.is_defined() {
            return false;
        }

        let (query_order, target_order) = match (sorted_neighbors(self.query, atom), sorted_neighbors(self.target, mapped)) {
            (Some(q), Some(t)) => (q, t),
            _ => return true,
        };

        let mut image = [VIRTUAL_NEIGHBOR; 4];
        for (slot, &q) in image.iter_mut().zip(query_order.iter()) {
            if q != VIRTUAL_NEIGHBOR {
                *slot = self.core[q];
            }
        }

        //the query's implicit neighbour maps onto whichever real target neighbour is left
        if image[3] == VIRTUAL_NEIGHBOR && target_order[3] != VIRTUAL_NEIGHBOR {
            if let Some(&left) = target_order.iter().find(|t| !image.contains(t)) {
                image[3] = left;
            }
        }

        let mut positions = [0usize; 4];
        for (position, t) in positions.iter_mut().zip(image.iter()) {
            match target_order.iter().position(|x| x == t) {
                Some(p) => *position = p,
                None => return false,
            }
        }

        let oriented = if permutation_is_odd(&positions) { target_stereo.flipped() } else { target_stereo };
        oriented == query_stereo
    }

    fn bond_matches(&self, bond: usize) -> bool {

        let query_stereo = self.query.bond_stereo(bond);
        let (a, b) = self.query.bond_atoms(bond);
        let (ta, tb) = (self.core[a], self.core[b]);

        let target_bond = match self.target.bond_between(ta, tb) {
            Some(x) => x,
            None => return false,
        };
        let target_stereo = self.target.bond_stereo(target_bond);

        match query_stereo {
            BondStereo::None => return true,
            BondStereo::Undefined => return !self.exact || !target_stereo.is_defined(),
            _ => {},
        }

        if !target_stereo.is_defined() {
            return false;
        }

        let mut oriented = target_stereo;

        for (end, partner, target_end, target_partner) in [(a, b, ta, tb), (b, a, tb, ta)] {
            let query_ref = match reference_substituent(self.query, end, partner) {
                Some(x) => self.core[x],
                None => continue,
            };
            let target_ref = reference_substituent(self.target, target_end, target_partner);

            if target_ref != Some(query_ref) {
                oriented = oriented.flipped();
            }
        }

        oriented == query_stereo
    }
}
