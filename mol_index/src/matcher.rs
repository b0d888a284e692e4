//! Backtracking subgraph isomorphism (VF2 family) between a query and a target molecule.
//!
//! The search is an explicit state machine over a frame stack, one frame per mapped query
//! atom. A frame keeps the cursor of its candidate scan, so undoing a pair resumes the scan
//! where it stopped instead of restarting it. Query atoms are visited in a breadth-first
//! order rooted at the most selective atom; every non-root atom has an already-mapped
//! parent, and only the target neighbours of the parent's image are tried for it.
//!
//! Both molecules must be decoded in the same mode (see
//! [`crate::molecule::needs_extended_search`]).

use std::cmp::Reverse;
use std::collections::HashSet;

use crate::cancel::{Cancellation, MatchClock};
use crate::config::{ChargeMode, IsotopeMode, SearchMode, SearchOptions, StereoMode};
use crate::error::{Interrupt, Result};
use crate::molecule::{is_pseudo, Molecule, CARBON, HETEROATOM, HYDROGEN};
use crate::stereo::StereoCheck;

const UNMAPPED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchOptions {
    pub mode: SearchMode,
    pub charge_mode: ChargeMode,
    pub isotope_mode: IsotopeMode,
    pub stereo_mode: StereoMode,
}

impl From<&SearchOptions> for MatchOptions {

    fn from(options: &SearchOptions) -> Self {
        Self {
            mode: options.mode,
            charge_mode: options.charge_mode,
            isotope_mode: options.isotope_mode,
            stereo_mode: options.stereo_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Match,
    NoMatch,
    /// The search stopped before deciding. Not a negative result.
    Inconclusive(Interrupt),
}

impl MatchOutcome {

    pub fn is_match(&self) -> bool {
        *self == MatchOutcome::Match
    }
}

/// `*` and `R` match anything, `Q` anything but carbon or hydrogen, two pseudo atoms always match.
pub fn atoms_compatible(query: i8, target: i8) -> bool {

    if query == target {
        return true;
    }

    let not_carbon_or_hydrogen = |n: i8| n != CARBON && n != HYDROGEN;

    match (is_pseudo(query), is_pseudo(target)) {
        (true, true) => true,
        (true, false) => query != HETEROATOM || not_carbon_or_hydrogen(target),
        (false, true) => target != HETEROATOM || not_carbon_or_hydrogen(query),
        (false, false) => false,
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    cursor: usize,
    target_atom: usize,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    SelectQueryAtom,
    SelectTargetCandidate,
    Backtrack,
}

#[derive(Debug)]
pub struct Matcher<'q> {
    query: &'q Molecule,
    options: MatchOptions,

    //query atoms in visit order, and the already-visited neighbour each one was reached from
    order: Vec<usize>,
    parents: Vec<Option<usize>>,
    query_heavy_bonds: Vec<usize>,

    core_query: Vec<usize>,
    core_target: Vec<usize>,
    frames: Vec<Frame>,
}

impl<'q> Matcher<'q> {

    pub fn new(query: &'q Molecule, options: MatchOptions) -> Result<Self> {

        let n = query.atom_count();

        let mut core_query = Vec::new();
        core_query.try_reserve_exact(n)?;
        core_query.resize(n, UNMAPPED);

        let mut frames = Vec::new();
        frames.try_reserve_exact(n)?;

        let (order, parents) = Self::visit_order(query);
        let query_heavy_bonds = (0..n).map(|a| query.heavy_bond_count(a)).collect();

        Ok(Self {
            query,
            options,
            order,
            parents,
            query_heavy_bonds,
            core_query,
            core_target: Vec::new(),
            frames,
        })
    }

    pub fn query(&self) -> &Molecule {
        self.query
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    fn visit_order(query: &Molecule) -> (Vec<usize>, Vec<Option<usize>>) {

        let n = query.atom_count();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut parents = Vec::with_capacity(n);

        let selectivity = |atom: usize| -> u8 {
            match query.atomic_number(atom) {
                x if is_pseudo(x) || x == HYDROGEN => 0,
                CARBON => 1,
                _ => 2,
            }
        };

        while order.len() < n {
            let root = (0..n)
                .filter(|&a| !placed[a])
                .max_by_key(|&a| (selectivity(a), query.degree(a), Reverse(a)));

            let root = match root {
                Some(x) => x,
                None => break,
            };

            placed[root] = true;
            order.push(root);
            parents.push(None);

            let mut head = order.len() - 1;
            while head < order.len() {
                let atom = order[head];
                head += 1;

                for neighbor in query.neighbors(atom) {
                    if !placed[neighbor] {
                        placed[neighbor] = true;
                        order.push(neighbor);
                        parents.push(Some(atom));
                    }
                }
            }
        }

        (order, parents)
    }

    fn exact(&self) -> bool {
        self.options.mode == SearchMode::Exact
    }

    fn admissible(&self, target: &Molecule) -> bool {

        debug_assert_eq!(self.query.is_extended(), target.is_extended(), "query and target decoded in different modes");

        let (qa, qb) = (self.query.atom_count(), self.query.bond_count());
        let (ta, tb) = (target.atom_count(), target.bond_count());

        if self.exact() { qa == ta && qb == tb } else { qa <= ta && qb <= tb }
    }

    /// Single-witness search.
    pub fn is_match(&mut self, target: &Molecule, cancellation: &Cancellation) -> MatchOutcome {

        if !self.admissible(target) {
            return MatchOutcome::NoMatch;
        }

        let clock = cancellation.start_match();
        let mut found = false;

        let result = self.run(target, &clock, |_| {
            found = true;
            false
        });

        match result {
            Err(interrupt) => MatchOutcome::Inconclusive(interrupt),
            Ok(()) if found => MatchOutcome::Match,
            Ok(()) => MatchOutcome::NoMatch,
        }
    }

    /// Enumerates mappings (`mapping[query_atom] = target_atom`) that cover distinct target atom sets.
    pub fn find_all(&mut self, target: &Molecule, max: Option<usize>, cancellation: &Cancellation) -> std::result::Result<Vec<Vec<usize>>, Interrupt> {

        let mut mappings: Vec<Vec<usize>> = Vec::new();

        if max == Some(0) || !self.admissible(target) {
            return Ok(mappings);
        }

        let clock = cancellation.start_match();
        let mut seen: HashSet<Vec<usize>> = HashSet::new();

        self.run(target, &clock, |core| {
            let mut key = core.to_vec();
            key.sort_unstable();

            if seen.insert(key) {
                mappings.push(core.to_vec());
            }

            max.map_or(true, |m| mappings.len() < m)
        })?;

        Ok(mappings)
    }

    /// Drives the search. `on_match` sees each complete mapping and returns whether to continue.
    fn run<F>(&mut self, target: &Molecule, clock: &MatchClock, mut on_match: F) -> std::result::Result<(), Interrupt>
    where
        F: FnMut(&[usize]) -> bool,
    {
        let n = self.order.len();

        for x in self.core_query.iter_mut() {
            *x = UNMAPPED;
        }
        self.core_target.clear();
        self.core_target.resize(target.atom_count(), UNMAPPED);
        self.frames.clear();

        if n == 0 {
            on_match(&self.core_query);
            return Ok(());
        }

        let mut step = Step::SelectQueryAtom;

        loop {
            match step {
                Step::SelectQueryAtom => {
                    if self.frames.len() == n {
                        if self.complete_mapping_valid(target) && !on_match(&self.core_query) {
                            return Ok(());
                        }
                        step = Step::Backtrack;
                    } else {
                        self.frames.push(Frame { cursor: 0, target_atom: UNMAPPED });
                        step = Step::SelectTargetCandidate;
                    }
                },

                Step::SelectTargetCandidate => {
                    let depth = self.frames.len() - 1;

                    match self.next_candidate(target, depth) {
                        Some(t) => {
                            if let Some(interrupt) = clock.poll() {
                                return Err(interrupt);
                            }

                            let q = self.order[depth];
                            if self.feasible(q, t, target) {
                                self.core_query[q] = t;
                                self.core_target[t] = q;
                                self.frames[depth].target_atom = t;
                                step = Step::SelectQueryAtom;
                            }
                        },
                        None => {
                            self.frames.pop();
                            if self.frames.is_empty() {
                                return Ok(());
                            }
                            step = Step::Backtrack;
                        },
                    }
                },

                Step::Backtrack => {
                    let depth = self.frames.len() - 1;
                    let q = self.order[depth];
                    let t = self.frames[depth].target_atom;

                    self.core_query[q] = UNMAPPED;
                    self.core_target[t] = UNMAPPED;
                    self.frames[depth].target_atom = UNMAPPED;

                    step = Step::SelectTargetCandidate;
                },
            }
        }
    }

    fn next_candidate(&mut self, target: &Molecule, depth: usize) -> Option<usize> {

        let cursor = &mut self.frames[depth].cursor;

        match self.parents[depth] {
            Some(parent) => {
                let anchor = self.core_query[parent];
                let bonds = target.bonds_of(anchor);

                while *cursor < bonds.len() {
                    let t = target.other_atom(bonds[*cursor] as usize, anchor);
                    *cursor += 1;
                    if self.core_target[t] == UNMAPPED {
                        return Some(t);
                    }
                }
                None
            },
            None => {
                while *cursor < target.atom_count() {
                    let t = *cursor;
                    *cursor += 1;
                    if self.core_target[t] == UNMAPPED {
                        return Some(t);
                    }
                }
                None
            },
        }
    }

    fn charge_matches(&self, query: i8, target: i8) -> bool {

        match self.options.charge_mode {
            ChargeMode::Ignore => true,
            ChargeMode::DefaultAsUncharged => query == target,
            ChargeMode::DefaultAsAny => query == target || (query == 0 && !self.exact()),
        }
    }

    fn isotope_matches(&self, query: u8, target: u8) -> bool {

        match self.options.isotope_mode {
            IsotopeMode::Ignore => true,
            IsotopeMode::DefaultAsStandard => query == target,
            IsotopeMode::DefaultAsAny => query == target || (query == 0 && !self.exact()),
        }
    }

    fn feasible(&self, q: usize, t: usize, target: &Molecule) -> bool {

        let query = self.query;
        let (qn, tn) = (query.atomic_number(q), target.atomic_number(t));

        if !atoms_compatible(qn, tn) {
            return false;
        }

        if !self.charge_matches(query.formal_charge(q), target.formal_charge(t)) {
            return false;
        }

        if !self.isotope_matches(query.isotope_mass(q), target.isotope_mass(t)) {
            return false;
        }

        if !is_pseudo(qn) && !is_pseudo(tn) {
            let (qh, th) = (query.hydrogen_count(q), target.hydrogen_count(t));
            if (self.exact() && qh != th) || qh > th {
                return false;
            }
        }

        let mut query_mapped = 0;
        let mut query_unmapped = 0;

        for &bond in query.bonds_of(q) {
            let bond = bond as usize;
            let mapped = self.core_query[query.other_atom(bond, q)];

            if mapped == UNMAPPED {
                query_unmapped += 1;
                continue;
            }

            query_mapped += 1;
            match target.bond_between(t, mapped) {
                Some(target_bond) if target.bond_type(target_bond) == query.bond_type(bond) => {},
                _ => return false,
            }
        }

        let mut target_mapped = 0;
        let mut target_unmapped = 0;

        for neighbor in target.neighbors(t) {
            if self.core_target[neighbor] == UNMAPPED {
                target_unmapped += 1;
            } else {
                target_mapped += 1;
            }
        }

        if self.exact() {
            query_mapped == target_mapped && query_unmapped == target_unmapped
        } else {
            target_unmapped >= query_unmapped
        }
    }

    fn complete_mapping_valid(&self, target: &Molecule) -> bool {

        let query = self.query;

        if query.has_rest_h() {
            for q in 0..query.atom_count() {
                if query.is_rest_h(q) && target.heavy_bond_count(self.core_query[q]) > self.query_heavy_bonds[q] {
                    return false;
                }
            }
        }

        if self.options.stereo_mode == StereoMode::Strict {
            return StereoCheck::new(query, target, &self.core_query, self.exact()).validate();
        }

        true
    }
}
