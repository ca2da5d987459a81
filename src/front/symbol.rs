//! The symbol environment: a stack of lexical scopes mapping source
//! identifiers to bindings.

use super::lower::LowerError;
use crate::common::{Id, Map, RUNTIME_FUNCS};

/// What a source identifier resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    /// A compile-time integer constant.
    Const(i32),
    /// Storage for a variable (or constant array) declaration.
    Var(VarBinding),
    /// A function, either user-defined or from the runtime library.
    Func { ir_name: String, is_void: bool },
}

/// A storage binding: the IR name of the alloc (or global), the array shape
/// discovered at declaration, and whether the binding is a pointer parameter.
/// The pointer depth of the binding is `dims.len()` plus one if `is_ptr`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarBinding {
    pub ir_name: String,
    pub dims: Vec<i32>,
    pub is_ptr: bool,
}

/// Lexically scoped identifier table.  Frames mirror source block nesting.
pub struct SymbolTable {
    frames: Vec<Map<Id, Binding>>,
}

impl SymbolTable {
    /// A fresh table with one global frame holding the runtime library.
    pub fn new() -> Self {
        let mut globals = Map::new();
        for (name, _, has_ret) in RUNTIME_FUNCS {
            globals.insert(
                Id::new(name.to_string()),
                Binding::Func {
                    ir_name: name.to_string(),
                    is_void: !has_ret,
                },
            );
        }
        SymbolTable {
            frames: vec![globals],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Map::new());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Bind `name` in the innermost frame.  Redeclaration in the same scope
    /// is an error; shadowing an outer scope is not.
    pub fn insert(&mut self, name: Id, binding: Binding) -> Result<(), LowerError> {
        let frame = self.frames.last_mut().unwrap();
        if frame.contains_key(&name) {
            return Err(LowerError::DuplicateName(name));
        }
        frame.insert(name, binding);
        Ok(())
    }

    /// Innermost-to-outermost search.
    pub fn lookup(&self, name: Id) -> Result<&Binding, LowerError> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(&name))
            .ok_or(LowerError::UnknownName(name))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Id {
        Id::new(s.to_string())
    }

    #[test]
    fn innermost_scope_wins() {
        let mut table = SymbolTable::new();
        table.push();
        table.insert(id("x"), Binding::Const(1)).unwrap();
        table.push();
        table.insert(id("x"), Binding::Const(2)).unwrap();
        assert_eq!(*table.lookup(id("x")).unwrap(), Binding::Const(2));
        table.pop();
        assert_eq!(*table.lookup(id("x")).unwrap(), Binding::Const(1));
    }

    #[test]
    fn redeclaration_in_same_scope_fails() {
        let mut table = SymbolTable::new();
        table.push();
        table.insert(id("x"), Binding::Const(1)).unwrap();
        assert!(matches!(
            table.insert(id("x"), Binding::Const(2)),
            Err(LowerError::DuplicateName(_))
        ));
    }

    #[test]
    fn unknown_name_fails() {
        let table = SymbolTable::new();
        assert!(matches!(
            table.lookup(id("nope")),
            Err(LowerError::UnknownName(_))
        ));
    }

    #[test]
    fn runtime_library_is_prebound() {
        let table = SymbolTable::new();
        assert!(matches!(
            table.lookup(id("getint")).unwrap(),
            Binding::Func { is_void: false, .. }
        ));
        assert!(matches!(
            table.lookup(id("starttime")).unwrap(),
            Binding::Func { is_void: true, .. }
        ));
    }
}
