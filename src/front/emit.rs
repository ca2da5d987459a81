//! The emission buffer: an append-only text sink that knows about basic-block
//! structure.
//!
//! After a terminator the lowerer mutes the buffer, so code emitted in dead
//! tails (after `return`, `break`, `continue`) is swallowed without any tree
//! rewriting.  Opening a new basic-block label makes the buffer live again.

use std::fmt::Write;

pub struct EmitBuffer {
    text: String,
    muted: bool,
}

impl EmitBuffer {
    pub fn new() -> Self {
        EmitBuffer {
            text: String::new(),
            muted: false,
        }
    }

    /// Writes pass through only while live.
    pub fn is_live(&self) -> bool {
        !self.muted
    }

    /// Latch the muted state.  Called right after every terminator.
    pub fn mute(&mut self) {
        self.muted = true;
    }

    /// Append one indented instruction line, unless muted.
    pub fn inst(&mut self, line: impl AsRef<str>) {
        if !self.muted {
            writeln!(self.text, "  {}", line.as_ref()).unwrap();
        }
    }

    /// Open a basic-block label.  Clears the muted state.
    pub fn label(&mut self, name: &str) {
        self.muted = false;
        writeln!(self.text, "%{name}:").unwrap();
    }

    /// Append top-level text (function headers, globals, closing braces).
    /// These sit outside any basic block, so the muted state does not apply
    /// and is cleared.
    pub fn raw(&mut self, text: impl AsRef<str>) {
        self.muted = false;
        writeln!(self.text, "{}", text.as_ref()).unwrap();
    }

    pub fn finish(self) -> String {
        self.text
    }
}

impl Default for EmitBuffer {
    fn default() -> Self {
        Self::new()
    }
}
