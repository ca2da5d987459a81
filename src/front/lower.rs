//! Lowering from the AST to Koopa IR text.
//!
//! A single forward traversal over the tree.  Scopes are tracked in the
//! symbol environment, constant expressions fold eagerly, control flow
//! becomes structured gotos over manufactured labels, and dead tails after a
//! terminator are swallowed by the emission buffer's muted state.  The output
//! is IR *text*; the middle stage re-ingests it as an object graph.

use derive_more::derive::Display;

use super::ast::*;
use super::emit::EmitBuffer;
use super::fold::fold;
use super::symbol::{Binding, SymbolTable, VarBinding};
use crate::common::{Id, RUNTIME_FUNCS};

#[derive(Display, PartialEq, Eq)]
pub enum LowerError {
    #[display("duplicate declaration of '{_0}'")]
    DuplicateName(Id),
    #[display("unknown identifier '{_0}'")]
    UnknownName(Id),
    #[display("'{_0}' cannot be used in a constant context")]
    NotConstant(Id),
    #[display("division by zero in a constant expression")]
    DivisionByZero,
    #[display("initializer does not fit the declared shape of '{_0}'")]
    MalformedInitializer(Id),
    #[display("invalid use of '{_0}'")]
    InvalidUse(Id),
    #[display("break or continue outside of a loop")]
    EscapeOutsideLoop,
}

impl std::fmt::Debug for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Lower a compilation unit to Koopa IR text.
pub fn lower(unit: &CompUnit) -> Result<String, LowerError> {
    let mut lowerer = Lowerer::new();
    lowerer.unit(unit)?;
    Ok(lowerer.buf.finish())
}

/// An IR operand handed from a sub-expression to its parent.  `Slot` is a
/// named storage reference that has not been materialized yet; `prepare`
/// turns it into a temporary.  Immediates stay immediates.
#[derive(Clone, Debug)]
enum Operand {
    Imm(i32),
    Temp(u32),
    Slot(SlotRef),
}

/// A storage binding annotated with its already-lowered subscript operands.
#[derive(Clone, Debug)]
struct SlotRef {
    binding: VarBinding,
    subs: Vec<String>,
}

struct LoopLabels {
    entry: String,
    end: String,
}

struct Lowerer {
    buf: EmitBuffer,
    symbols: SymbolTable,
    /// Fresh unnamed temporaries, `%0, %1, ...`, reset per function.
    temps: u32,
    /// Suffix for fresh named locals and globals, never reset, so shadowed
    /// source names stay distinct in the IR.
    names: u32,
    /// Label series counter (if-series, loop-series, short-circuit-series),
    /// never reset.
    labels: u32,
    loops: Vec<LoopLabels>,
}

impl Lowerer {
    fn new() -> Self {
        Lowerer {
            buf: EmitBuffer::new(),
            symbols: SymbolTable::new(),
            temps: 0,
            names: 0,
            labels: 0,
            loops: Vec::new(),
        }
    }

    fn fresh_temp(&mut self) -> u32 {
        let t = self.temps;
        self.temps += 1;
        t
    }

    fn fresh_name(&mut self, name: Id) -> String {
        self.names += 1;
        format!("{name}_{}", self.names)
    }

    fn fresh_series(&mut self) -> u32 {
        let k = self.labels;
        self.labels += 1;
        k
    }

    /// Emit a terminator and latch the muted state.
    fn terminate(&mut self, line: String) {
        self.buf.inst(line);
        self.buf.mute();
    }

    fn unit(&mut self, unit: &CompUnit) -> Result<(), LowerError> {
        for (name, params, has_ret) in RUNTIME_FUNCS {
            let ret = if has_ret { ": i32" } else { "" };
            self.buf
                .raw(format!("decl @{name}({}){ret}", params.join(", ")));
        }
        self.buf.raw("");
        for item in &unit.items {
            match item {
                Item::Decl(decl) => self.decl(decl, true)?,
                Item::Func(func) => self.func(func)?,
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Functions

    fn func(&mut self, func: &FuncDef) -> Result<(), LowerError> {
        self.temps = 0;

        // Fold parameter dimensions in the enclosing scope, before the
        // function itself is visible.
        let mut params = Vec::new();
        for param in &func.params {
            let dims = match &param.dims {
                None => None,
                Some(trailing) => Some(self.fold_dims(trailing, param.name)?),
            };
            params.push((param.name, dims));
        }

        // The function binds in the global scope first so its body can
        // recurse into it.
        self.symbols.insert(
            func.name,
            Binding::Func {
                ir_name: func.name.to_string(),
                is_void: func.ret == FuncType::Void,
            },
        )?;

        let sig: Vec<String> = params
            .iter()
            .map(|(name, dims)| format!("@{name}_param: {}", param_type(dims.as_deref())))
            .collect();
        let ret = match func.ret {
            FuncType::Int => ": i32",
            FuncType::Void => "",
        };
        self.buf
            .raw(format!("fun @{}({}){ret} {{", func.name, sig.join(", ")));
        self.buf.label("entry");

        // The one-cell short-circuit slot, allocated up front when any
        // `&&`/`||` occurs in the body.
        if block_has_short_circuit(&func.body) {
            self.buf.inst("@_tmp_short = alloc i32");
        }

        // Parameters are copied into fresh locals; the source name binds to
        // the local, in a scope of its own around the body.
        self.symbols.push();
        let body = self.func_body(func, &params);
        self.symbols.pop();
        body?;

        // Closing hook: control fell off the end while live.
        if self.buf.is_live() {
            match func.ret {
                FuncType::Int => self.buf.inst("ret 0"),
                FuncType::Void => self.buf.inst("ret"),
            }
        }
        self.buf.raw("}");
        self.buf.raw("");
        Ok(())
    }

    fn func_body(
        &mut self,
        func: &FuncDef,
        params: &[(Id, Option<Vec<i32>>)],
    ) -> Result<(), LowerError> {
        for (name, dims) in params {
            let ir_name = self.fresh_name(*name);
            let ty = param_type(dims.as_deref());
            self.buf.inst(format!("@{ir_name} = alloc {ty}"));
            self.buf.inst(format!("store @{name}_param, @{ir_name}"));
            let binding = match dims {
                None => VarBinding {
                    ir_name,
                    dims: Vec::new(),
                    is_ptr: false,
                },
                Some(trailing) => VarBinding {
                    ir_name,
                    dims: trailing.clone(),
                    is_ptr: true,
                },
            };
            self.symbols.insert(*name, Binding::Var(binding))?;
        }
        self.block(&func.body)
    }

    // ------------------------------------------------------------------
    // Statements

    fn block(&mut self, block: &Block) -> Result<(), LowerError> {
        self.symbols.push();
        let result = block.items.iter().try_for_each(|item| match item {
            BlockItem::Decl(decl) => self.decl(decl, false),
            BlockItem::Stmt(stmt) => self.stmt(stmt),
        });
        self.symbols.pop();
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), LowerError> {
        match stmt {
            Stmt::Return(val) => {
                match val {
                    Some(expr) => {
                        let v = self.expr(expr)?;
                        let v = self.prepare(v)?;
                        self.terminate(format!("ret {v}"));
                    }
                    None => self.terminate("ret".to_string()),
                }
                Ok(())
            }
            Stmt::Assign(lval, rhs) => {
                let ptr = self.assign_target(lval)?;
                let v = self.expr(rhs)?;
                let v = self.prepare(v)?;
                self.buf.inst(format!("store {v}, {ptr}"));
                Ok(())
            }
            Stmt::Expr(expr) => {
                if let Some(expr) = expr {
                    self.expr(expr)?;
                }
                Ok(())
            }
            Stmt::Block(block) => self.block(block),
            Stmt::If { cond, then, els } => self.if_stmt(cond, then, els.as_deref()),
            Stmt::While { cond, body } => self.while_stmt(cond, body),
            Stmt::Break => {
                let target = self
                    .loops
                    .last()
                    .ok_or(LowerError::EscapeOutsideLoop)?
                    .end
                    .clone();
                self.terminate(format!("jump %{target}"));
                Ok(())
            }
            Stmt::Continue => {
                let target = self
                    .loops
                    .last()
                    .ok_or(LowerError::EscapeOutsideLoop)?
                    .entry
                    .clone();
                self.terminate(format!("jump %{target}"));
                Ok(())
            }
        }
    }

    fn if_stmt(&mut self, cond: &Expr, then: &Stmt, els: Option<&Stmt>) -> Result<(), LowerError> {
        let k = self.fresh_series();
        let c = self.expr(cond)?;
        let c = self.prepare(c)?;
        let else_target = if els.is_some() {
            format!("else_{k}")
        } else {
            format!("end_{k}")
        };
        self.terminate(format!("br {c}, %then_{k}, %{else_target}"));

        self.buf.label(&format!("then_{k}"));
        self.stmt(then)?;
        self.terminate(format!("jump %end_{k}"));

        if let Some(els) = els {
            self.buf.label(&format!("else_{k}"));
            self.stmt(els)?;
            self.terminate(format!("jump %end_{k}"));
        }
        self.buf.label(&format!("end_{k}"));
        Ok(())
    }

    fn while_stmt(&mut self, cond: &Expr, body: &Stmt) -> Result<(), LowerError> {
        let k = self.fresh_series();
        let entry = format!("while_entry_{k}");
        let end = format!("while_end_{k}");

        self.terminate(format!("jump %{entry}"));
        self.buf.label(&entry);
        let c = self.expr(cond)?;
        let c = self.prepare(c)?;
        self.terminate(format!("br {c}, %while_body_{k}, %{end}"));

        self.buf.label(&format!("while_body_{k}"));
        self.loops.push(LoopLabels {
            entry: entry.clone(),
            end: end.clone(),
        });
        let body = self.stmt(body);
        self.loops.pop();
        body?;
        self.terminate(format!("jump %{entry}"));

        self.buf.label(&end);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Declarations

    fn decl(&mut self, decl: &Decl, global: bool) -> Result<(), LowerError> {
        match decl {
            Decl::Const(decl) => decl
                .defs
                .iter()
                .try_for_each(|def| self.const_def(def, global)),
            Decl::Var(decl) => decl
                .defs
                .iter()
                .try_for_each(|def| self.var_def(def, global)),
        }
    }

    fn const_def(&mut self, def: &ConstDef, global: bool) -> Result<(), LowerError> {
        let dims = self.fold_dims(&def.dims, def.name)?;
        if dims.is_empty() {
            let InitVal::Expr(expr) = &def.init else {
                return Err(LowerError::MalformedInitializer(def.name));
            };
            let value = fold(expr, &self.symbols)?;
            return self.symbols.insert(def.name, Binding::Const(value));
        }

        // Constant arrays are materialized storage with every element folded.
        let leaves = normalize(&dims, &def.init, def.name)?;
        let values = leaves
            .iter()
            .map(|leaf| leaf.map_or(Ok(0), |expr| fold(expr, &self.symbols)))
            .collect::<Result<Vec<i32>, _>>()?;
        let ir_name = self.fresh_name(def.name);
        if global {
            self.buf.raw(format!(
                "global @{ir_name} = alloc {}, {}",
                array_type(&dims),
                aggregate_text(&dims, &values),
            ));
        } else {
            self.buf
                .inst(format!("@{ir_name} = alloc {}", array_type(&dims)));
            for (flat, value) in values.iter().enumerate() {
                let ptr = self.element_ptr(&ir_name, &dims, flat);
                self.buf.inst(format!("store {value}, {ptr}"));
            }
        }
        self.symbols.insert(
            def.name,
            Binding::Var(VarBinding {
                ir_name,
                dims,
                is_ptr: false,
            }),
        )
    }

    fn var_def(&mut self, def: &VarDef, global: bool) -> Result<(), LowerError> {
        let dims = self.fold_dims(&def.dims, def.name)?;
        let ir_name = self.fresh_name(def.name);

        if global {
            let init = match (&def.init, dims.is_empty()) {
                (None, _) => "zeroinit".to_string(),
                (Some(InitVal::Expr(expr)), true) => fold(expr, &self.symbols)?.to_string(),
                (Some(init), false) => {
                    let leaves = normalize(&dims, init, def.name)?;
                    let values = leaves
                        .iter()
                        .map(|leaf| leaf.map_or(Ok(0), |expr| fold(expr, &self.symbols)))
                        .collect::<Result<Vec<i32>, _>>()?;
                    aggregate_text(&dims, &values)
                }
                (Some(InitVal::List(_)), true) => {
                    return Err(LowerError::MalformedInitializer(def.name))
                }
            };
            self.buf.raw(format!(
                "global @{ir_name} = alloc {}, {init}",
                local_type(&dims)
            ));
        } else if dims.is_empty() {
            self.buf.inst(format!("@{ir_name} = alloc i32"));
            if let Some(init) = &def.init {
                let InitVal::Expr(expr) = init else {
                    return Err(LowerError::MalformedInitializer(def.name));
                };
                let v = self.expr(expr)?;
                let v = self.prepare(v)?;
                self.buf.inst(format!("store {v}, @{ir_name}"));
            }
        } else {
            self.buf
                .inst(format!("@{ir_name} = alloc {}", array_type(&dims)));
            if let Some(init) = &def.init {
                let leaves = normalize(&dims, init, def.name)?;
                for (flat, leaf) in leaves.iter().enumerate() {
                    let value = match leaf {
                        Some(expr) => {
                            let v = self.expr(expr)?;
                            self.prepare(v)?
                        }
                        None => "0".to_string(),
                    };
                    let ptr = self.element_ptr(&ir_name, &dims, flat);
                    self.buf.inst(format!("store {value}, {ptr}"));
                }
            }
        }

        self.symbols.insert(
            def.name,
            Binding::Var(VarBinding {
                ir_name,
                dims,
                is_ptr: false,
            }),
        )
    }

    fn fold_dims(&self, dims: &[Expr], name: Id) -> Result<Vec<i32>, LowerError> {
        dims.iter()
            .map(|expr| match fold(expr, &self.symbols)? {
                d if d > 0 => Ok(d),
                _ => Err(LowerError::InvalidUse(name)),
            })
            .collect()
    }

    /// Emit the `getelemptr` chain addressing flat element `flat` of the
    /// array `@ir_name` with shape `dims`; returns the pointer operand.
    fn element_ptr(&mut self, ir_name: &str, dims: &[i32], flat: usize) -> String {
        let mut cur = format!("@{ir_name}");
        let mut rem = flat as i32;
        let mut stride: i32 = dims.iter().product();
        for &d in dims {
            stride /= d;
            let idx = rem / stride;
            rem %= stride;
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = getelemptr {cur}, {idx}"));
            cur = format!("%{t}");
        }
        cur
    }

    // ------------------------------------------------------------------
    // Expressions

    fn expr(&mut self, expr: &Expr) -> Result<Operand, LowerError> {
        match expr {
            Expr::Num(v) => Ok(Operand::Imm(*v)),
            Expr::LVal(lval) => self.lval(lval),
            Expr::Unary(op, inner) => {
                let x = self.expr(inner)?;
                let x = self.prepare(x)?;
                let t = self.fresh_temp();
                let op = match op {
                    UnaryOp::Pos => "add",
                    UnaryOp::Neg => "sub",
                    UnaryOp::Not => "eq",
                };
                self.buf.inst(format!("%{t} = {op} 0, {x}"));
                Ok(Operand::Temp(t))
            }
            Expr::Binary {
                op: op @ (BinOp::And | BinOp::Or),
                lhs,
                rhs,
            } => self.short_circuit(*op, lhs, rhs),
            Expr::Binary { op, lhs, rhs } => {
                let l = self.expr(lhs)?;
                let l = self.prepare(l)?;
                let r = self.expr(rhs)?;
                let r = self.prepare(r)?;
                let t = self.fresh_temp();
                self.buf.inst(format!("%{t} = {op} {l}, {r}"));
                Ok(Operand::Temp(t))
            }
            Expr::Call { callee, args } => self.call(*callee, args),
        }
    }

    /// Compile `&&`/`||` to a three-block diamond carrying the result across
    /// blocks in the per-function `@_tmp_short` cell.
    fn short_circuit(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Operand, LowerError> {
        let k = self.fresh_series();
        let l = self.expr(lhs)?;
        let l = self.prepare(l)?;
        self.terminate(format!("br {l}, %then_short_{k}, %else_short_{k}"));

        self.buf.label(&format!("then_short_{k}"));
        if op == BinOp::Or {
            // Left operand already true: the result is 1.
            self.buf.inst("store 1, @_tmp_short");
            self.terminate(format!("jump %end_short_{k}"));
            self.buf.label(&format!("else_short_{k}"));
            let r = self.expr(rhs)?;
            let r = self.prepare(r)?;
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = ne 0, {r}"));
            self.buf.inst(format!("store %{t}, @_tmp_short"));
            self.terminate(format!("jump %end_short_{k}"));
        } else {
            let r = self.expr(rhs)?;
            let r = self.prepare(r)?;
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = ne 0, {r}"));
            self.buf.inst(format!("store %{t}, @_tmp_short"));
            self.terminate(format!("jump %end_short_{k}"));
            self.buf.label(&format!("else_short_{k}"));
            // Left operand already false: the result is 0.
            self.buf.inst("store 0, @_tmp_short");
            self.terminate(format!("jump %end_short_{k}"));
        }

        self.buf.label(&format!("end_short_{k}"));
        let t = self.fresh_temp();
        self.buf.inst(format!("%{t} = load @_tmp_short"));
        Ok(Operand::Temp(t))
    }

    fn lval(&mut self, lval: &LVal) -> Result<Operand, LowerError> {
        match self.symbols.lookup(lval.name)?.clone() {
            Binding::Const(v) => {
                if !lval.idx.is_empty() {
                    return Err(LowerError::InvalidUse(lval.name));
                }
                Ok(Operand::Imm(v))
            }
            Binding::Var(binding) => {
                if lval.idx.len() > binding.dims.len() + usize::from(binding.is_ptr) {
                    return Err(LowerError::InvalidUse(lval.name));
                }
                let mut subs = Vec::new();
                for idx in &lval.idx {
                    let s = self.expr(idx)?;
                    subs.push(self.prepare(s)?);
                }
                Ok(Operand::Slot(SlotRef { binding, subs }))
            }
            Binding::Func { .. } => Err(LowerError::InvalidUse(lval.name)),
        }
    }

    fn call(&mut self, callee: Id, args: &[Expr]) -> Result<Operand, LowerError> {
        let Binding::Func { ir_name, is_void } = self.symbols.lookup(callee)?.clone() else {
            return Err(LowerError::InvalidUse(callee));
        };
        // Arguments are evaluated and materialized left to right; the call
        // operand list repeats them in source order.
        let mut prepared = Vec::new();
        for arg in args {
            let a = self.expr(arg)?;
            prepared.push(self.prepare(a)?);
        }
        let args = prepared.join(", ");
        if is_void {
            self.buf.inst(format!("call @{ir_name}({args})"));
            Ok(Operand::Imm(0))
        } else {
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = call @{ir_name}({args})"));
            Ok(Operand::Temp(t))
        }
    }

    /// Materialize an operand.  Re-preparing an already-materialized
    /// temporary is a no-op and immediates stay immediates.
    fn prepare(&mut self, op: Operand) -> Result<String, LowerError> {
        match op {
            Operand::Imm(v) => Ok(v.to_string()),
            Operand::Temp(t) => Ok(format!("%{t}")),
            Operand::Slot(slot) => Ok(self.materialize(&slot)),
        }
    }

    /// Walk a storage reference's subscript chain.  A full chain loads the
    /// scalar; a partial chain produces the sub-array pointer (decayed to
    /// its element type for passing to functions).
    fn materialize(&mut self, slot: &SlotRef) -> String {
        let VarBinding {
            ir_name,
            dims,
            is_ptr,
        } = &slot.binding;
        let depth = dims.len() + usize::from(*is_ptr);

        let mut applied = 0;
        let mut cur = if *is_ptr {
            // A pointer parameter's alloc holds the pointer itself; the
            // first subscript advances it without a leading-dimension
            // multiplier, hence getptr.
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = load @{ir_name}"));
            let mut cur = format!("%{t}");
            if let Some(first) = slot.subs.first() {
                let t = self.fresh_temp();
                self.buf.inst(format!("%{t} = getptr {cur}, {first}"));
                cur = format!("%{t}");
                applied = 1;
            }
            cur
        } else {
            format!("@{ir_name}")
        };

        for sub in &slot.subs[applied..] {
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = getelemptr {cur}, {sub}"));
            cur = format!("%{t}");
        }

        if slot.subs.len() == depth {
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = load {cur}"));
            format!("%{t}")
        } else if *is_ptr && slot.subs.is_empty() {
            // Passing a pointer parameter straight through.
            cur
        } else {
            // Partial chain: decay to a pointer to the first element.
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = getelemptr {cur}, 0"));
            format!("%{t}")
        }
    }

    /// Lower an assignment target to a pointer operand.
    fn assign_target(&mut self, lval: &LVal) -> Result<String, LowerError> {
        let Binding::Var(binding) = self.symbols.lookup(lval.name)?.clone() else {
            return Err(LowerError::InvalidUse(lval.name));
        };
        let depth = binding.dims.len() + usize::from(binding.is_ptr);
        if lval.idx.len() != depth {
            return Err(LowerError::InvalidUse(lval.name));
        }
        if depth == 0 {
            return Ok(format!("@{}", binding.ir_name));
        }
        let mut subs = Vec::new();
        for idx in &lval.idx {
            let s = self.expr(idx)?;
            subs.push(self.prepare(s)?);
        }

        let mut applied = 0;
        let mut cur = if binding.is_ptr {
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = load @{}", binding.ir_name));
            let p = self.fresh_temp();
            self.buf.inst(format!("%{p} = getptr %{t}, {}", subs[0]));
            applied = 1;
            format!("%{p}")
        } else {
            format!("@{}", binding.ir_name)
        };
        for sub in &subs[applied..] {
            let t = self.fresh_temp();
            self.buf.inst(format!("%{t} = getelemptr {cur}, {sub}"));
            cur = format!("%{t}");
        }
        Ok(cur)
    }
}

// ----------------------------------------------------------------------
// Initializer normalization

/// Rewrite a brace initializer so its shape matches `dims` exactly, as a flat
/// row-major leaf vector; `None` leaves are zero-filled positions.
fn normalize<'a>(
    dims: &[i32],
    init: &'a InitVal,
    name: Id,
) -> Result<Vec<Option<&'a Expr>>, LowerError> {
    let InitVal::List(items) = init else {
        return Err(LowerError::MalformedInitializer(name));
    };
    let mut out = Vec::new();
    fill(dims, items, &mut out, name)?;
    Ok(out)
}

fn fill<'a>(
    dims: &[i32],
    items: &'a [InitVal],
    out: &mut Vec<Option<&'a Expr>>,
    name: Id,
) -> Result<(), LowerError> {
    let total = dims.iter().product::<i32>() as usize;
    let base = out.len();
    for item in items {
        match item {
            InitVal::Expr(expr) => {
                if out.len() - base >= total {
                    return Err(LowerError::MalformedInitializer(name));
                }
                out.push(Some(expr));
            }
            InitVal::List(sub) => {
                // A nested aggregate must start on a sub-array boundary; it
                // fills the largest sub-dimension it aligns to.
                let pos = out.len() - base;
                let mut level = 1;
                let stride = loop {
                    if level >= dims.len() {
                        return Err(LowerError::MalformedInitializer(name));
                    }
                    let stride = dims[level..].iter().product::<i32>() as usize;
                    if pos % stride == 0 {
                        break stride;
                    }
                    level += 1;
                };
                if pos + stride > total {
                    return Err(LowerError::MalformedInitializer(name));
                }
                fill(&dims[level..], sub, out, name)?;
            }
        }
    }
    out.resize(base + total, None);
    Ok(())
}

// ----------------------------------------------------------------------
// Type and initializer spellings

fn array_type(dims: &[i32]) -> String {
    let mut ty = "i32".to_string();
    for &d in dims.iter().rev() {
        ty = format!("[{ty}, {d}]");
    }
    ty
}

fn local_type(dims: &[i32]) -> String {
    if dims.is_empty() {
        "i32".to_string()
    } else {
        array_type(dims)
    }
}

fn param_type(dims: Option<&[i32]>) -> String {
    match dims {
        None => "i32".to_string(),
        Some(trailing) => format!("*{}", array_type(trailing)),
    }
}

/// The brace aggregate for a folded global initializer.  All-zero subtrees
/// collapse to `zeroinit`.
fn aggregate_text(dims: &[i32], values: &[i32]) -> String {
    if values.iter().all(|&v| v == 0) {
        return "zeroinit".to_string();
    }
    if dims.len() == 1 {
        let items: Vec<String> = values.iter().map(i32::to_string).collect();
        return format!("{{{}}}", items.join(", "));
    }
    let stride = dims[1..].iter().product::<i32>() as usize;
    let rows: Vec<String> = values
        .chunks(stride)
        .map(|chunk| aggregate_text(&dims[1..], chunk))
        .collect();
    format!("{{{}}}", rows.join(", "))
}

// ----------------------------------------------------------------------
// Short-circuit scan: decides whether a function needs the `@_tmp_short`
// slot in its entry block.

fn block_has_short_circuit(block: &Block) -> bool {
    block.items.iter().any(|item| match item {
        BlockItem::Decl(decl) => decl_has_short_circuit(decl),
        BlockItem::Stmt(stmt) => stmt_has_short_circuit(stmt),
    })
}

fn decl_has_short_circuit(decl: &Decl) -> bool {
    // Constant initializers fold at compile time and never reach the IR.
    match decl {
        Decl::Const(_) => false,
        Decl::Var(decl) => decl.defs.iter().any(|def| {
            def.init
                .as_ref()
                .is_some_and(init_has_short_circuit)
        }),
    }
}

fn init_has_short_circuit(init: &InitVal) -> bool {
    match init {
        InitVal::Expr(expr) => expr_has_short_circuit(expr),
        InitVal::List(items) => items.iter().any(init_has_short_circuit),
    }
}

fn stmt_has_short_circuit(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Assign(lval, expr) => {
            lval.idx.iter().any(expr_has_short_circuit) || expr_has_short_circuit(expr)
        }
        Stmt::Expr(expr) => expr.as_ref().is_some_and(expr_has_short_circuit),
        Stmt::Block(block) => block_has_short_circuit(block),
        Stmt::If { cond, then, els } => {
            expr_has_short_circuit(cond)
                || stmt_has_short_circuit(then)
                || els.as_deref().is_some_and(stmt_has_short_circuit)
        }
        Stmt::While { cond, body } => {
            expr_has_short_circuit(cond) || stmt_has_short_circuit(body)
        }
        Stmt::Return(expr) => expr.as_ref().is_some_and(expr_has_short_circuit),
        Stmt::Break | Stmt::Continue => false,
    }
}

fn expr_has_short_circuit(expr: &Expr) -> bool {
    match expr {
        Expr::Num(_) => false,
        Expr::LVal(lval) => lval.idx.iter().any(expr_has_short_circuit),
        Expr::Unary(_, inner) => expr_has_short_circuit(inner),
        Expr::Binary {
            op: BinOp::And | BinOp::Or,
            ..
        } => true,
        Expr::Binary { lhs, rhs, .. } => {
            expr_has_short_circuit(lhs) || expr_has_short_circuit(rhs)
        }
        Expr::Call { args, .. } => args.iter().any(expr_has_short_circuit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse;

    fn lower_src(src: &str) -> String {
        lower(&parse(src).unwrap()).unwrap()
    }

    #[test]
    fn minimal_main() {
        let ir = lower_src("int main() { return 0; }");
        assert!(ir.contains("fun @main(): i32 {"));
        assert!(ir.contains("%entry:"));
        assert!(ir.contains("  ret 0"));
        assert!(!ir.contains("@_tmp_short"));
    }

    #[test]
    fn unfolded_arithmetic_chains_mul_under_add() {
        let ir = lower_src("int main() { return 1 + 2 * 3; }");
        assert!(ir.contains("%0 = mul 2, 3"));
        assert!(ir.contains("%1 = add 1, %0"));
        assert!(ir.contains("ret %1"));
    }

    #[test]
    fn dead_tail_after_return_is_muted() {
        let ir = lower_src("int main() { return 1; return 2; }");
        assert!(ir.contains("ret 1"));
        assert!(!ir.contains("ret 2"));
    }

    #[test]
    fn short_circuit_diamond_with_slot() {
        let ir = lower_src("int main() { int a = 3; int b = 4; return a < b && b < 10; }");
        assert!(ir.contains("@_tmp_short = alloc i32"));
        assert!(ir.contains("br %2, %then_short_0, %else_short_0"));
        // The right operand is normalized to 0/1 on the evaluating side and
        // the short-circuit side stores the constant 0.
        assert!(ir.contains("store %5, @_tmp_short"));
        assert!(ir.contains("store 0, @_tmp_short"));
        assert!(ir.contains("%6 = load @_tmp_short"));
        assert!(ir.contains("ret %6"));
    }

    #[test]
    fn while_with_break_targets_loop_end() {
        let ir = lower_src(
            "int main() { int i = 0; while (i < 10) { if (i == 5) break; i = i + 1; } return i; }",
        );
        assert!(ir.contains("%while_entry_0:"));
        assert!(ir.contains("%while_body_0:"));
        assert!(ir.contains("%while_end_0:"));
        // One if-series inside the loop, whose then-branch breaks.
        assert!(ir.contains("br %3, %then_1, %end_1"));
        assert!(ir.contains("jump %while_end_0"));
    }

    #[test]
    fn continue_targets_loop_entry() {
        let ir = lower_src(
            "int main() { int i = 0; while (i < 3) { i = i + 1; continue; } return i; }",
        );
        let body = ir.split("%while_body_0:").nth(1).unwrap();
        assert!(body.contains("jump %while_entry_0"));
    }

    #[test]
    fn escape_outside_loop_is_an_error() {
        let err = lower(&parse("int main() { break; return 0; }").unwrap()).unwrap_err();
        assert_eq!(err, LowerError::EscapeOutsideLoop);
    }

    #[test]
    fn shadowed_names_get_distinct_suffixes() {
        let ir = lower_src("int main() { int a = 1; { int a = 2; } return a; }");
        assert!(ir.contains("@a_1 = alloc i32"));
        assert!(ir.contains("@a_2 = alloc i32"));
        assert!(ir.contains("store 1, @a_1"));
        assert!(ir.contains("store 2, @a_2"));
        // The return reads the outer binding.
        assert!(ir.contains("load @a_1"));
    }

    #[test]
    fn duplicate_declaration_in_one_scope_fails() {
        let err = lower(&parse("int main() { int a = 1; int a = 2; return a; }").unwrap())
            .unwrap_err();
        assert!(matches!(err, LowerError::DuplicateName(_)));
    }

    #[test]
    fn global_aggregate_is_shape_normalized() {
        let ir = lower_src("int a[2][3] = {1, 2, 3, {4}}; int main() { return a[1][0]; }");
        assert!(ir.contains("global @a_1 = alloc [[i32, 3], 2], {{1, 2, 3}, {4, 0, 0}}"));
    }

    #[test]
    fn global_without_initializer_is_zeroinit() {
        let ir = lower_src("int g; int h[4]; int main() { return g; }");
        assert!(ir.contains("global @g_1 = alloc i32, zeroinit"));
        assert!(ir.contains("global @h_2 = alloc [i32, 4], zeroinit"));
    }

    #[test]
    fn const_scalar_folds_to_immediate() {
        let ir = lower_src("int main() { const int c = 6; return c * 7; }");
        assert!(!ir.contains("alloc"));
        assert!(ir.contains("%0 = mul 6, 7"));
    }

    #[test]
    fn local_array_initializer_stores_every_position() {
        let ir = lower_src("int main() { int a[2][2] = {1}; return a[0][0]; }");
        // Four positions, each stored through a getelemptr chain.
        assert_eq!(ir.matches("store ").count(), 4);
        assert!(ir.contains("store 1, %1"));
        assert_eq!(ir.matches("store 0, ").count(), 3);
    }

    #[test]
    fn pointer_parameter_uses_getptr_on_first_subscript() {
        let ir = lower_src(
            "int f(int a[], int b[][3]) { return a[1] + b[2][1]; }\nint main() { return 0; }",
        );
        assert!(ir.contains("fun @f(@a_param: *i32, @b_param: *[i32, 3]): i32 {"));
        // a[1]: load the pointer, getptr, load the scalar.
        assert!(ir.contains("%0 = load @a_1"));
        assert!(ir.contains("%1 = getptr %0, 1"));
        assert!(ir.contains("%2 = load %1"));
        // b[2][1]: getptr then getelemptr.
        assert!(ir.contains("%4 = getptr %3, 2"));
        assert!(ir.contains("%5 = getelemptr %4, 1"));
    }

    #[test]
    fn passing_an_array_decays_to_element_pointer() {
        let ir = lower_src(
            "int f(int a[]) { return a[0]; }\nint main() { int x[3]; return f(x); }",
        );
        let main = ir.split("fun @main").nth(1).unwrap();
        assert!(main.contains("getelemptr @x_2, 0"));
        assert!(main.contains("call @f("));
    }

    #[test]
    fn void_function_gets_bare_ret() {
        let ir = lower_src("void f() { } int main() { f(); return 0; }");
        assert!(ir.contains("fun @f() {"));
        let f = ir.split("fun @f() {").nth(1).unwrap();
        assert!(f.split('}').next().unwrap().contains("  ret\n"));
        assert!(ir.contains("call @f()"));
    }

    #[test]
    fn call_result_binds_a_fresh_temporary() {
        let ir = lower_src("int f(int x) { return x + 1; } int main() { return f(41); }");
        assert!(ir.contains("call @f(41)"));
        assert!(ir.contains("= call @f(41)"));
    }

    #[test]
    fn runtime_library_is_declared_and_callable() {
        let ir = lower_src("int main() { putint(getint()); return 0; }");
        assert!(ir.starts_with("decl @getint(): i32\n"));
        assert!(ir.contains("decl @putarray(i32, *i32)"));
        assert!(ir.contains("%0 = call @getint()"));
        assert!(ir.contains("call @putint(%0)"));
    }

    #[test]
    fn normalization_leaf_count_matches_shape() {
        let unit = parse("int a[4][2][3] = {1, 2, 3, {4, 5}, {6, 9, 10, {7, 8}}};").unwrap();
        let Item::Decl(Decl::Var(decl)) = &unit.items[0] else {
            panic!()
        };
        let init = decl.defs[0].init.as_ref().unwrap();
        let leaves = normalize(&[4, 2, 3], init, decl.defs[0].name).unwrap();
        assert_eq!(leaves.len(), 24);
        // {4, 5} sits on a row boundary and fills a row of three; the next
        // aggregate sits on a plane boundary and fills a whole 2x3 plane,
        // with {7, 8} aligning to the second row inside it.
        let values: Vec<i32> = leaves
            .iter()
            .map(|leaf| {
                leaf.map_or(0, |e| match e {
                    Expr::Num(v) => *v,
                    _ => panic!("constant leaves only"),
                })
            })
            .collect();
        assert_eq!(
            values,
            vec![1, 2, 3, 4, 5, 0, 6, 9, 10, 7, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn misaligned_aggregate_is_malformed() {
        let unit = parse("int a[2][3] = {1, {2}};").unwrap();
        let Item::Decl(Decl::Var(decl)) = &unit.items[0] else {
            panic!()
        };
        let init = decl.defs[0].init.as_ref().unwrap();
        assert!(matches!(
            normalize(&[2, 3], init, decl.defs[0].name),
            Err(LowerError::MalformedInitializer(_))
        ));
    }

    #[test]
    fn overlong_initializer_is_malformed() {
        let err = lower(&parse("int a[2] = {1, 2, 3}; int main() { return 0; }").unwrap())
            .unwrap_err();
        assert!(matches!(err, LowerError::MalformedInitializer(_)));
    }
}
