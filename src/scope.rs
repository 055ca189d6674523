//! Interned scope names.
//!
//! A scope like `string.quoted.double.lua` is split on dots and every part (an atom) is
//! interned in a process-wide table. The atom indices are packed into a single u128,
//! 16 bits per atom, first atom in the most significant bits. A scope is therefore `Copy`,
//! cheap to compare and a prefix check is a single masked XOR.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use serde::{Serialize, Serializer};

pub const MAX_ATOMS: usize = 8;
const ATOM_BITS: usize = 16;
// 0 marks an unused slot so the table can hold at most u16::MAX - 1 atoms
const MAX_TABLE_SIZE: usize = u16::MAX as usize - 1;

/// A dotted scope name, e.g. `comment.line.double-dash.lua`.
/// Scopes with more than 8 atoms are truncated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Scope {
    atoms: u128,
}

impl Scope {
    pub fn new(s: &str) -> Scope {
        lock_atom_table().intern(s.trim())
    }

    /// Atom number at the given slot, 0 if the slot is unused
    #[inline]
    pub fn atom_at(self, index: usize) -> u16 {
        debug_assert!(index < MAX_ATOMS);
        let shift = (MAX_ATOMS - 1 - index) * ATOM_BITS;
        ((self.atoms >> shift) & 0xFFFF) as u16
    }

    #[inline]
    pub fn len(self) -> usize {
        MAX_ATOMS - self.unused_slots()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.atoms == 0
    }

    #[inline]
    fn unused_slots(self) -> usize {
        if self.atoms == 0 {
            MAX_ATOMS
        } else {
            self.atoms.trailing_zeros() as usize / ATOM_BITS
        }
    }

    /// Whether `self` is `other` or one of its ancestors: `source.lua` is a prefix of
    /// `source.lua.embedded` but not of `source.luax`.
    #[inline]
    pub fn is_prefix_of(self, other: Scope) -> bool {
        let unused = self.unused_slots();
        if unused == MAX_ATOMS {
            return true;
        }
        let mask = u128::MAX << (unused * ATOM_BITS);
        (self.atoms ^ other.atoms) & mask == 0
    }

    /// Rebuilds the dotted string. Takes the table lock so keep it out of hot loops.
    pub fn build_string(self) -> String {
        lock_atom_table().resolve(self)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.build_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build_string())
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.build_string())
    }
}

#[derive(Default)]
struct AtomTable {
    atoms: Vec<String>,
    index_of: HashMap<String, u16>,
}

impl AtomTable {
    /// Returns the atom number (table index + 1) of the given atom, registering it if needed
    fn atom_number(&mut self, atom: &str) -> u16 {
        if let Some(&number) = self.index_of.get(atom) {
            return number;
        }

        if self.atoms.len() >= MAX_TABLE_SIZE {
            panic!("scope atom table is full ({MAX_TABLE_SIZE} atoms)");
        }

        self.atoms.push(atom.to_owned());
        let number = self.atoms.len() as u16;
        self.index_of.insert(atom.to_owned(), number);
        number
    }

    fn intern(&mut self, s: &str) -> Scope {
        let mut atoms = 0u128;
        let mut slot = 0;

        for part in s.split('.').filter(|p| !p.is_empty()) {
            if slot == MAX_ATOMS {
                break;
            }
            let number = self.atom_number(part) as u128;
            atoms |= number << ((MAX_ATOMS - 1 - slot) * ATOM_BITS);
            slot += 1;
        }

        Scope { atoms }
    }

    fn resolve(&self, scope: Scope) -> String {
        let mut out = String::new();
        for i in 0..scope.len() {
            if i > 0 {
                out.push('.');
            }
            out.push_str(&self.atoms[(scope.atom_at(i) - 1) as usize]);
        }
        out
    }
}

static ATOM_TABLE: LazyLock<Mutex<AtomTable>> = LazyLock::new(Default::default);

fn lock_atom_table() -> MutexGuard<'static, AtomTable> {
    ATOM_TABLE.lock().expect("scope atom table lock poisoned")
}
