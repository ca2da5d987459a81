//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
pub type Id = internment::Intern<String>;

/// Word size of the target in bytes.  Every scalar the source language can
/// express (i32 and pointers) occupies one word.
pub const WORD_SIZE: i32 = 4;

/// The runtime library: name, parameter types in Koopa spelling, and whether
/// the function returns a value.  These are declared at the top of every IR
/// dump and pre-bound in the symbol environment.
pub const RUNTIME_FUNCS: [(&str, &[&str], bool); 8] = [
    ("getint", &[], true),
    ("getch", &[], true),
    ("getarray", &["*i32"], true),
    ("putint", &["i32"], false),
    ("putch", &["i32"], false),
    ("putarray", &["i32", "*i32"], false),
    ("starttime", &[], false),
    ("stoptime", &[], false),
];
