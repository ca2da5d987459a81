//! The frame planner: assigns every IR value that produces a result a stack
//! slot and sizes the function's frame.
//!
//! Frame layout, from the stack pointer up:
//!
//! ```txt
//!   sp + size - 4    saved ra (only when the function makes calls)
//!   ...              locals: one word per value, aggregates in full
//!   sp + arg_area    first local slot
//!   sp + 0           outgoing stack arguments (beyond the eight registers)
//! ```
//!
//! The total is rounded up to a multiple of 16 per the RISC-V ABI.

use crate::common::{Map, WORD_SIZE};
use crate::middle::ir::{Function, ValueId, ValueKind};

#[derive(Debug)]
pub struct Frame {
    /// Total frame size in bytes, a multiple of 16.
    pub size: i32,
    /// Whether `ra` is saved at `size - 4`.
    pub save_ra: bool,
    /// sp-relative offset of every value with a result.
    pub offsets: Map<ValueId, i32>,
}

pub fn plan(func: &Function) -> Frame {
    // The outgoing argument area sits at the bottom of the frame: one word
    // per argument beyond the eight passed in registers, across the largest
    // call in the function.
    let mut max_call_argc: i32 = -1;
    for block in &func.blocks {
        for &id in &block.insts {
            if let ValueKind::Call { args, .. } = &func.value(id).kind {
                max_call_argc = max_call_argc.max(args.len() as i32);
            }
        }
    }
    let arg_area = (max_call_argc - 8).max(0) * WORD_SIZE;

    let mut offsets = Map::new();
    let mut offset = arg_area;
    for block in &func.blocks {
        for &id in &block.insts {
            let value = func.value(id);
            let size = match &value.kind {
                // The alloc's slot holds the pointee itself; its "value" is
                // the slot's address.
                ValueKind::Alloc => value.ty.pointee().unwrap().size(),
                _ if value.has_result() => WORD_SIZE,
                _ => 0,
            };
            if size > 0 {
                offsets.insert(id, offset);
                offset += size;
            }
        }
    }

    let save_ra = max_call_argc >= 0;
    if save_ra {
        offset += WORD_SIZE;
    }
    let size = (offset + 15) / 16 * 16;
    Frame {
        size,
        save_ra,
        offsets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_src(src: &str) -> Vec<Frame> {
        let ir = crate::front::lower(&crate::front::parse(src).unwrap()).unwrap();
        let prog = crate::middle::parse(&ir).unwrap();
        prog.funcs.iter().map(plan).collect()
    }

    #[test]
    fn leaf_function_without_locals_needs_no_frame() {
        let frames = plan_src("int main() { return 0; }");
        assert_eq!(frames[0].size, 0);
        assert!(!frames[0].save_ra);
    }

    #[test]
    fn frame_size_is_a_multiple_of_16() {
        let frames = plan_src(
            "int f(int x) { return x + 1; } int main() { int a = 2; return f(a); }",
        );
        for frame in &frames {
            assert_eq!(frame.size % 16, 0);
            assert!(frame.size > 0);
        }
    }

    #[test]
    fn callers_reserve_the_ra_word() {
        let frames = plan_src("int f(int x) { return x; } int main() { return f(1); }");
        // f makes no calls, main does.
        assert!(!frames[0].save_ra);
        assert!(frames[1].save_ra);
    }

    #[test]
    fn aggregates_reserve_their_full_size() {
        let frames = plan_src("int main() { int a[4][4]; return 0; }");
        // 64 bytes of array rounds to 64 on its own.
        assert!(frames[0].size >= 64);
    }

    #[test]
    fn outgoing_stack_arguments_push_locals_up() {
        let src = "int f(int a, int b, int c, int d, int e, int g, int h, int i, int j, int k) { return j + k; }\n\
                   int main() { return f(1, 2, 3, 4, 5, 6, 7, 8, 9, 10); }";
        let frames = plan_src(src);
        let main = &frames[1];
        // Two arguments spill past the eight registers.
        assert!(main.save_ra);
        let lowest = main.offsets.values().min().copied().unwrap();
        assert_eq!(lowest, 2 * WORD_SIZE);
    }
}
