//! Parser for Koopa IR text.
//!
//! The front-end hands its output to this stage as text; here it is
//! re-ingested as the object graph of [`crate::middle::ir`].  The grammar is
//! the subset the lowerer emits: `decl` lines, `global` allocations, and
//! `fun` bodies of labeled basic blocks.

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ir::*;
use crate::common::Map;

#[derive(Display)]
#[display("IR parse error: {}", self.0)]
pub struct IrParseError(String);

impl Debug for IrParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub fn parse(input: &str) -> Result<Program, IrParseError> {
    let mut program = Program {
        globals: Vec::new(),
        funcs: Vec::new(),
    };
    // Callable names with their return types; `decl` lines and function
    // headers both feed it, the latter before their body so recursion
    // resolves.
    let mut decls: Map<String, Option<Type>> = Map::new();
    let mut global_names: Map<String, usize> = Map::new();

    let lines: Vec<&str> = input.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() {
            i += 1;
        } else if let Some(rest) = line.strip_prefix("decl ") {
            let (name, ret) = parse_decl(rest).map_err(|e| at(i, e))?;
            decls.insert(name, ret);
            i += 1;
        } else if let Some(rest) = line.strip_prefix("global ") {
            let def = parse_global(rest).map_err(|e| at(i, e))?;
            global_names.insert(def.name.clone(), program.globals.len());
            program.globals.push(def);
            i += 1;
        } else if line.starts_with("fun ") {
            let (func, next) =
                parse_fun(&lines, i, &mut decls, &global_names, &program.globals)?;
            program.funcs.push(func);
            i = next;
        } else {
            return Err(at(i, format!("unexpected top-level line '{line}'")));
        }
    }
    Ok(program)
}

fn at(line: usize, message: String) -> IrParseError {
    IrParseError(format!("line {}: {message}", line + 1))
}

fn parse_decl(rest: &str) -> Result<(String, Option<Type>), String> {
    let mut c = Cursor::new(rest);
    let name = c.name()?;
    let Some(bare) = name.strip_prefix('@') else {
        return Err("declared functions are '@'-named".to_string());
    };
    let bare = bare.to_string();
    c.expect("(")?;
    if !c.eat(")") {
        loop {
            c.ty()?;
            if !c.eat(",") {
                break;
            }
        }
        c.expect(")")?;
    }
    let ret = if c.eat(":") { Some(c.ty()?) } else { None };
    c.end()?;
    Ok((bare, ret))
}

fn parse_global(rest: &str) -> Result<GlobalDef, String> {
    let mut c = Cursor::new(rest);
    let name = c.name()?;
    let Some(bare) = name.strip_prefix('@') else {
        return Err("globals are '@'-named".to_string());
    };
    let name = bare.to_string();
    c.expect("=")?;
    c.expect("alloc")?;
    let ty = c.ty()?;
    c.expect(",")?;
    let init = c.init()?;
    c.end()?;
    Ok(GlobalDef { name, ty, init })
}

fn parse_fun<'a>(
    lines: &[&'a str],
    start: usize,
    decls: &mut Map<String, Option<Type>>,
    global_names: &Map<String, usize>,
    globals: &[GlobalDef],
) -> Result<(Function, usize), IrParseError> {
    let mut c = Cursor::new(lines[start].trim());
    c.expect("fun").map_err(|e| at(start, e))?;
    let header = (|| -> Result<(String, Vec<(String, Type)>), String> {
        let name = c.name()?;
        let Some(bare) = name.strip_prefix('@') else {
            return Err("functions are '@'-named".to_string());
        };
        let bare = bare.to_string();
        c.expect("(")?;
        let mut params = Vec::new();
        if !c.eat(")") {
            loop {
                let pname = c.name()?;
                if !pname.starts_with('@') {
                    return Err(format!("parameter '{pname}' must be '@'-named"));
                }
                c.expect(":")?;
                params.push((pname, c.ty()?));
                if !c.eat(",") {
                    break;
                }
            }
            c.expect(")")?;
        }
        Ok((bare, params))
    })()
    .map_err(|e| at(start, e))?;
    let (name, params) = header;
    let ret = if c.eat(":") {
        Some(c.ty().map_err(|e| at(start, e))?)
    } else {
        None
    };
    c.expect("{").map_err(|e| at(start, e))?;
    c.end().map_err(|e| at(start, e))?;
    decls.insert(name.clone(), ret.clone());

    // Find the function's extent and pre-scan its labels so forward branch
    // targets resolve.
    let mut end = start + 1;
    while end < lines.len() && lines[end].trim() != "}" {
        end += 1;
    }
    if end == lines.len() {
        return Err(at(start, format!("function '{name}' has no closing brace")));
    }

    let mut func = Function::new(
        name,
        params.iter().map(|(_, ty)| ty.clone()).collect(),
        ret,
    );
    let mut labels: Map<String, usize> = Map::new();
    for line in &lines[start + 1..end] {
        let line = line.trim();
        if let Some(label) = block_label(line) {
            if labels.insert(label.to_string(), func.blocks.len()).is_some() {
                return Err(at(start, format!("duplicate label '%{label}'")));
            }
            func.blocks.push(Block {
                label: label.to_string(),
                insts: Vec::new(),
            });
        }
    }

    let mut parser = FuncParser {
        func,
        names: Map::new(),
        labels,
        decls,
        global_names,
        globals,
    };
    for (i, (pname, ty)) in params.iter().enumerate() {
        let id = parser.func.add_value(Value {
            ty: ty.clone(),
            kind: ValueKind::Arg(i),
        });
        parser.names.insert(pname.clone(), id);
    }

    let mut cur: Option<usize> = None;
    for (lineno, line) in lines.iter().enumerate().take(end).skip(start + 1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(label) = block_label(line) {
            cur = Some(parser.labels[label]);
            continue;
        }
        let block = cur.ok_or_else(|| {
            at(lineno, "instruction outside of a basic block".to_string())
        })?;
        parser.inst(line, block).map_err(|e| at(lineno, e))?;
    }

    Ok((parser.func, end + 1))
}

fn block_label(line: &str) -> Option<&str> {
    line.strip_prefix('%')?.strip_suffix(':')
}

struct FuncParser<'a> {
    func: Function,
    /// Named values of this function, keyed with their sigil.
    names: Map<String, ValueId>,
    labels: Map<String, usize>,
    decls: &'a Map<String, Option<Type>>,
    global_names: &'a Map<String, usize>,
    globals: &'a [GlobalDef],
}

impl FuncParser<'_> {
    fn inst(&mut self, line: &str, block: usize) -> Result<(), String> {
        let mut c = Cursor::new(line);

        let dst = if matches!(c.peek(), Some('@' | '%')) {
            let name = c.name()?;
            c.expect("=")?;
            Some(name)
        } else {
            None
        };

        let op = c.word()?;
        let value = match op {
            "alloc" => {
                let ty = c.ty()?;
                Value {
                    ty: Type::Pointer(Box::new(ty)),
                    kind: ValueKind::Alloc,
                }
            }
            "load" => {
                let src = self.operand(&mut c)?;
                let ty = self
                    .func
                    .value(src)
                    .ty
                    .pointee()
                    .ok_or("load from a non-pointer")?
                    .clone();
                Value {
                    ty,
                    kind: ValueKind::Load { src },
                }
            }
            "store" => {
                let val = self.operand(&mut c)?;
                c.expect(",")?;
                let ptr = self.operand(&mut c)?;
                if self.func.value(ptr).ty.pointee().is_none() {
                    return Err("store through a non-pointer".to_string());
                }
                Value {
                    ty: Type::Unit,
                    kind: ValueKind::Store { val, dst: ptr },
                }
            }
            "getelemptr" => {
                let src = self.operand(&mut c)?;
                c.expect(",")?;
                let index = self.operand(&mut c)?;
                let ty = match self.func.value(src).ty.pointee() {
                    Some(Type::Array(elem, _)) => Type::Pointer(elem.clone()),
                    _ => return Err("getelemptr source must point to an array".to_string()),
                };
                Value {
                    ty,
                    kind: ValueKind::GetElemPtr { src, index },
                }
            }
            "getptr" => {
                let src = self.operand(&mut c)?;
                c.expect(",")?;
                let index = self.operand(&mut c)?;
                let ty = self.func.value(src).ty.clone();
                if ty.pointee().is_none() {
                    return Err("getptr source must be a pointer".to_string());
                }
                Value {
                    ty,
                    kind: ValueKind::GetPtr { src, index },
                }
            }
            "call" => {
                let callee = c.name()?;
                let Some(callee) = callee.strip_prefix('@') else {
                    return Err("callees are '@'-named".to_string());
                };
                c.expect("(")?;
                let mut args = Vec::new();
                if !c.eat(")") {
                    loop {
                        args.push(self.operand(&mut c)?);
                        if !c.eat(",") {
                            break;
                        }
                    }
                    c.expect(")")?;
                }
                let ret = self
                    .decls
                    .get(callee)
                    .ok_or_else(|| format!("call to unknown function '@{callee}'"))?;
                Value {
                    ty: ret.clone().unwrap_or(Type::Unit),
                    kind: ValueKind::Call {
                        callee: callee.to_string(),
                        args,
                    },
                }
            }
            "br" => {
                let cond = self.operand(&mut c)?;
                c.expect(",")?;
                let then_bb = self.label(&mut c)?;
                c.expect(",")?;
                let else_bb = self.label(&mut c)?;
                Value {
                    ty: Type::Unit,
                    kind: ValueKind::Branch {
                        cond,
                        then_bb,
                        else_bb,
                    },
                }
            }
            "jump" => {
                let target = self.label(&mut c)?;
                Value {
                    ty: Type::Unit,
                    kind: ValueKind::Jump { target },
                }
            }
            "ret" => {
                let val = if c.at_end() {
                    None
                } else {
                    Some(self.operand(&mut c)?)
                };
                Value {
                    ty: Type::Unit,
                    kind: ValueKind::Return { val },
                }
            }
            op => {
                let op: BinaryOp = op
                    .parse()
                    .map_err(|()| format!("unknown instruction '{op}'"))?;
                let lhs = self.operand(&mut c)?;
                c.expect(",")?;
                let rhs = self.operand(&mut c)?;
                Value {
                    ty: Type::I32,
                    kind: ValueKind::Binary { op, lhs, rhs },
                }
            }
        };
        c.end()?;

        let produces_result = value.has_result();
        let id = self.func.add_value(value);
        match dst {
            Some(name) => {
                if !produces_result {
                    return Err(format!("'{name}' bound to a unit instruction"));
                }
                if self.names.insert(name.clone(), id).is_some() {
                    return Err(format!("redefinition of '{name}'"));
                }
            }
            None if matches!(self.func.value(id).kind, ValueKind::Call { .. }) => {}
            None if !produces_result => {}
            None => return Err(format!("'{op}' result must be bound to a name")),
        }
        self.func.blocks[block].insts.push(id);
        Ok(())
    }

    fn operand(&mut self, c: &mut Cursor) -> Result<ValueId, String> {
        match c.peek() {
            Some('@' | '%') => {
                let name = c.name()?;
                if let Some(&id) = self.names.get(&name) {
                    return Ok(id);
                }
                // A not-yet-seen '@' name is a reference to a program global;
                // materialize one pointer value per function and memoize it.
                if let Some(bare) = name.strip_prefix('@') {
                    if let Some(&g) = self.global_names.get(bare) {
                        let id = self.func.add_value(Value {
                            ty: Type::Pointer(Box::new(self.globals[g].ty.clone())),
                            kind: ValueKind::Global(g),
                        });
                        self.names.insert(name, id);
                        return Ok(id);
                    }
                }
                Err(format!("unknown value '{name}'"))
            }
            _ => {
                let v = c.int()?;
                Ok(self.func.add_value(Value {
                    ty: Type::I32,
                    kind: ValueKind::Integer(v),
                }))
            }
        }
    }

    fn label(&mut self, c: &mut Cursor) -> Result<usize, String> {
        let name = c.name()?;
        let Some(bare) = name.strip_prefix('%') else {
            return Err(format!("'{name}' is not a block label"));
        };
        self.labels
            .get(bare)
            .copied()
            .ok_or_else(|| format!("unknown label '%{bare}'"))
    }
}

// ----------------------------------------------------------------------
// A small in-line cursor over one line of IR text.

struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Cursor { s, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start_matches([' ', '\t']);
        self.pos = self.s.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn eat(&mut self, tok: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(tok) {
            self.pos += tok.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &str) -> Result<(), String> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(format!("expected '{tok}' before '{}'", self.rest().trim()))
        }
    }

    fn end(&mut self) -> Result<(), String> {
        if self.at_end() {
            Ok(())
        } else {
            Err(format!("trailing text '{}'", self.rest().trim()))
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos == self.s.len()
    }

    /// A bare identifier word.
    fn word(&mut self) -> Result<&'a str, String> {
        self.skip_ws();
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_alphanumeric() && *ch != '_')
            .map_or(rest.len(), |(i, _)| i);
        if end == 0 {
            return Err(format!("expected identifier before '{}'", rest.trim()));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    /// A `@`- or `%`-sigiled name, returned with its sigil.
    fn name(&mut self) -> Result<String, String> {
        match self.peek() {
            Some(sigil @ ('@' | '%')) => {
                self.pos += 1;
                let word = self.word()?;
                Ok(format!("{sigil}{word}"))
            }
            _ => Err(format!(
                "expected a named value before '{}'",
                self.rest().trim()
            )),
        }
    }

    fn int(&mut self) -> Result<i32, String> {
        self.skip_ws();
        let rest = self.rest();
        let digits_start = usize::from(rest.starts_with('-'));
        let end = rest[digits_start..]
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_digit())
            .map_or(rest.len(), |(i, _)| digits_start + i);
        if end == digits_start {
            return Err(format!("expected an integer before '{}'", rest.trim()));
        }
        let value = rest[..end]
            .parse::<i64>()
            .map_err(|_| format!("integer '{}' out of range", &rest[..end]))?;
        self.pos += end;
        Ok(value as i32)
    }

    fn ty(&mut self) -> Result<Type, String> {
        if self.eat("i32") {
            Ok(Type::I32)
        } else if self.eat("*") {
            Ok(Type::Pointer(Box::new(self.ty()?)))
        } else if self.eat("[") {
            let elem = self.ty()?;
            self.expect(",")?;
            let n = self.int()?;
            self.expect("]")?;
            if n <= 0 {
                return Err(format!("array length {n} must be positive"));
            }
            Ok(Type::Array(Box::new(elem), n as usize))
        } else {
            Err(format!("expected a type before '{}'", self.rest().trim()))
        }
    }

    fn init(&mut self) -> Result<GlobalInit, String> {
        if self.eat("zeroinit") {
            Ok(GlobalInit::Zero)
        } else if self.eat("{") {
            let mut items = Vec::new();
            loop {
                items.push(self.init()?);
                if !self.eat(",") {
                    break;
                }
            }
            self.expect("}")?;
            Ok(GlobalInit::Aggregate(items))
        } else {
            Ok(GlobalInit::Int(self.int()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_function() {
        let prog = parse("fun @main(): i32 {\n%entry:\n  ret 0\n}\n").unwrap();
        assert_eq!(prog.funcs.len(), 1);
        let main = &prog.funcs[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.ret, Some(Type::I32));
        assert_eq!(main.blocks.len(), 1);
        let inst = main.value(main.blocks[0].insts[0]);
        assert!(matches!(inst.kind, ValueKind::Return { val: Some(_) }));
    }

    #[test]
    fn parses_globals_and_references() {
        let prog = parse(
            "global @a_1 = alloc [[i32, 3], 2], {{1, 2, 3}, {4, 0, 0}}\n\
             global @g_2 = alloc i32, zeroinit\n\
             fun @main(): i32 {\n\
             %entry:\n  %0 = load @g_2\n  ret %0\n}\n",
        )
        .unwrap();
        assert_eq!(prog.globals.len(), 2);
        assert_eq!(prog.globals[0].ty.size(), 24);
        let GlobalInit::Aggregate(rows) = &prog.globals[0].init else {
            panic!("expected an aggregate")
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(prog.globals[1].init, GlobalInit::Zero);

        let main = &prog.funcs[0];
        let load = main.value(main.blocks[0].insts[0]);
        let ValueKind::Load { src } = load.kind else {
            panic!("expected a load")
        };
        assert!(matches!(main.value(src).kind, ValueKind::Global(1)));
        assert_eq!(load.ty, Type::I32);
    }

    #[test]
    fn parses_params_calls_and_pointer_arithmetic() {
        let prog = parse(
            "decl @getint(): i32\n\
             fun @f(@a_param: *[i32, 3], @n_param: i32): i32 {\n\
             %entry:\n\
               @a_1 = alloc *[i32, 3]\n\
               store @a_param, @a_1\n\
               %0 = load @a_1\n\
               %1 = getptr %0, 1\n\
               %2 = getelemptr %1, 2\n\
               %3 = load %2\n\
               %4 = call @getint()\n\
               %5 = add %3, %4\n\
               ret %5\n\
             }\n",
        )
        .unwrap();
        let f = &prog.funcs[0];
        assert_eq!(f.params.len(), 2);
        let insts = &f.blocks[0].insts;
        // getptr keeps the pointer-to-array type, getelemptr peels the array.
        assert_eq!(
            f.value(insts[3]).ty,
            Type::Pointer(Box::new(Type::Array(Box::new(Type::I32), 3)))
        );
        assert_eq!(f.value(insts[4]).ty, Type::Pointer(Box::new(Type::I32)));
        assert!(matches!(
            f.value(insts[6]).kind,
            ValueKind::Call { .. }
        ));
    }

    #[test]
    fn branch_targets_resolve_forward() {
        let prog = parse(
            "fun @main(): i32 {\n\
             %entry:\n  br 1, %then_0, %end_0\n\
             %then_0:\n  jump %end_0\n\
             %end_0:\n  ret 0\n}\n",
        )
        .unwrap();
        let main = &prog.funcs[0];
        let ValueKind::Branch {
            then_bb, else_bb, ..
        } = main.value(main.blocks[0].insts[0]).kind
        else {
            panic!("expected a branch")
        };
        assert_eq!((then_bb, else_bb), (1, 2));
    }

    #[test]
    fn unknown_operand_is_an_error() {
        let err = parse("fun @main(): i32 {\n%entry:\n  ret %9\n}\n").unwrap_err();
        assert!(err.to_string().contains("unknown value"));
    }

    #[test]
    fn getelemptr_requires_an_array_pointee() {
        let err = parse(
            "fun @main(): i32 {\n%entry:\n  @x_1 = alloc i32\n  %0 = getelemptr @x_1, 0\n  ret 0\n}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must point to an array"));
    }

    #[test]
    fn round_trip_from_the_lowerer_is_well_formed() {
        let src = "int a[2][3] = {1, 2, 3, {4}};\n\
                   int f(int x) { return x + a[1][0]; }\n\
                   int main() { int i = 0; while (i < 10) { if (i == 5) break; i = i + 1; } return f(i); }";
        let ir = crate::front::lower(&crate::front::parse(src).unwrap()).unwrap();
        let prog = parse(&ir).unwrap();
        assert_eq!(prog.funcs.len(), 2);
        for func in &prog.funcs {
            for block in &func.blocks {
                // Exactly one terminator per block, and it comes last.
                let terminators = block
                    .insts
                    .iter()
                    .filter(|&&id| func.value(id).kind.is_terminator())
                    .count();
                assert_eq!(terminators, 1, "block %{} of @{}", block.label, func.name);
                assert!(func
                    .value(*block.insts.last().unwrap())
                    .kind
                    .is_terminator());
            }
        }
    }
}
