//! Recursive-descent front-end: parsing, semantic analysis and code
//! emission in a single pass.
//!
//! Every tentative alternative takes a [`Guard`] first. A guard records the
//! token cursor and the length of the code buffer that is current at that
//! point; restoring it rewinds the cursor and truncates the buffer, so a
//! failed alternative leaves no trace in the emitted code. Once a production
//! has consumed enough tokens to be committed (`STRUCT ID LACC`, a statement
//! keyword, an operator), any further failure is a fatal diagnostic carrying
//! the last consumed token's line.
//!
//! Expression productions return what they know about the recognized value
//! (type, addressability, constness) and leave its code in the current
//! buffer: an address for lvalues, a value for everything else. Conversions
//! that have to land *after* an already-emitted left operand go through a
//! reserved `NOP` slot that is patched once the common type is known, so the
//! buffer is append-only and recorded jump targets stay valid.

use std::collections::HashMap;

use atomc_runtime::{CodeId, Instr, Program, Value, host_fns};

use crate::lexer::{Payload, Token, TokenKind};
use crate::symbols::{FnInfo, Symbol, SymbolId, SymbolKind, SymbolTable, VarStorage};
use crate::types::{Ty, TyBase, arith_type_to, conv_to};

/// Result of compiling one source unit.
#[derive(Debug)]
pub struct Compilation {
    pub program: Program,
    pub symbols: SymbolTable,
}

/// Parse a token stream into a compiled unit.
///
/// Host functions are registered into the global domain first, then the
/// grammar's `unit` production runs, then the entry code that calls `main`
/// is synthesized into the driver buffer.
pub fn parse(tokens: Vec<Token>) -> Result<Compilation, String> {
    let mut p = Parser::new(tokens);
    p.register_host_fns()?;
    p.unit()?;
    p.link_entry()?;
    Ok(Compilation {
        program: p.program,
        symbols: p.st,
    })
}

/// What an expression production knows about the value it recognized.
#[derive(Debug, Clone, Copy)]
struct ExprVal {
    ty: Ty,
    /// The emitted code leaves an address and the value is assignable-to.
    lval: bool,
    /// Literal or operator result, never an assignment destination.
    constant: bool,
}

impl ExprVal {
    fn rval(ty: Ty) -> ExprVal {
        ExprVal {
            ty,
            lval: false,
            constant: true,
        }
    }

    fn lval(ty: Ty) -> ExprVal {
        ExprVal {
            ty,
            lval: true,
            constant: false,
        }
    }
}

/// Backtracking checkpoint: token cursor plus emitted-code tail.
struct Guard {
    pos: usize,
    consumed: Option<usize>,
    code: CodeId,
    code_len: usize,
}

/// Explicit array dimension from `arrayDecl`.
#[derive(Debug, Clone, Copy)]
enum ArraySize {
    /// `[]`
    Unspecified,
    /// `[n]`
    Fixed(usize),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Index of the last consumed token, for diagnostics.
    consumed: Option<usize>,
    st: SymbolTable,
    program: Program,
    /// Driver buffer: global code and the synthesized entry.
    global_code: CodeId,
    /// Buffer currently receiving emitted code.
    crt_code: CodeId,
    /// Function or struct being defined, if any.
    owner: Option<SymbolId>,
    /// String literals already materialized in the data segment.
    strings: HashMap<String, usize>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Parser {
        let mut program = Program::new();
        let global_code = program.add_buf();
        Parser {
            tokens,
            pos: 0,
            consumed: None,
            st: SymbolTable::new(),
            program,
            global_code,
            crt_code: global_code,
            owner: None,
            strings: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // token plumbing
    // ------------------------------------------------------------------

    fn kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::End)
    }

    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.kind() == kind {
            self.consumed = Some(self.pos);
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume_id(&mut self) -> Option<String> {
        if self.kind() != TokenKind::Id {
            return None;
        }
        let text = match &self.tokens[self.pos].payload {
            Payload::Text(t) => t.clone(),
            _ => return None,
        };
        self.consumed = Some(self.pos);
        self.pos += 1;
        Some(text)
    }

    fn consume_int_lit(&mut self) -> Option<i64> {
        if self.kind() != TokenKind::Int {
            return None;
        }
        let value = match self.tokens[self.pos].payload {
            Payload::Int(v) => v,
            _ => return None,
        };
        self.consumed = Some(self.pos);
        self.pos += 1;
        Some(value)
    }

    fn consume_double_lit(&mut self) -> Option<f64> {
        if self.kind() != TokenKind::Double {
            return None;
        }
        let value = match self.tokens[self.pos].payload {
            Payload::Double(v) => v,
            _ => return None,
        };
        self.consumed = Some(self.pos);
        self.pos += 1;
        Some(value)
    }

    fn consume_char_lit(&mut self) -> Option<char> {
        if self.kind() != TokenKind::Char {
            return None;
        }
        let value = match self.tokens[self.pos].payload {
            Payload::Char(v) => v,
            _ => return None,
        };
        self.consumed = Some(self.pos);
        self.pos += 1;
        Some(value)
    }

    fn consume_str_lit(&mut self) -> Option<String> {
        if self.kind() != TokenKind::Str {
            return None;
        }
        let text = match &self.tokens[self.pos].payload {
            Payload::Text(t) => t.clone(),
            _ => return None,
        };
        self.consumed = Some(self.pos);
        self.pos += 1;
        Some(text)
    }

    /// Diagnostic line: the last consumed token's, or the current one's when
    /// nothing has been consumed yet.
    fn err_msg(&self, msg: impl Into<String>) -> String {
        let line = self
            .consumed
            .or(Some(self.pos))
            .and_then(|i| self.tokens.get(i))
            .map_or(1, |t| t.line);
        format!("error in line {}: {}", line, msg.into())
    }

    fn err<T>(&self, msg: impl Into<String>) -> Result<T, String> {
        Err(self.err_msg(msg))
    }

    // ------------------------------------------------------------------
    // guards and emission
    // ------------------------------------------------------------------

    fn guard(&self) -> Guard {
        Guard {
            pos: self.pos,
            consumed: self.consumed,
            code: self.crt_code,
            code_len: self.program.buf(self.crt_code).len(),
        }
    }

    fn restore(&mut self, g: Guard) {
        self.pos = g.pos;
        self.consumed = g.consumed;
        self.crt_code = g.code;
        self.program.buf_mut(g.code).truncate(g.code_len);
    }

    fn emit(&mut self, instr: Instr) -> usize {
        self.program.buf_mut(self.crt_code).push(instr)
    }

    fn here(&self) -> usize {
        self.program.buf(self.crt_code).len()
    }

    fn patch(&mut self, at: usize, instr: Instr) {
        self.program.buf_mut(self.crt_code).patch(at, instr);
    }

    fn conv_instr(src: &Ty, dst: &Ty) -> Option<Instr> {
        if src.is_array() || dst.is_array() {
            return None;
        }
        match (src.base, dst.base) {
            (TyBase::Double, TyBase::Int | TyBase::Char) => Some(Instr::ConvFI),
            (TyBase::Int | TyBase::Char, TyBase::Double) => Some(Instr::ConvIF),
            _ => None,
        }
    }

    /// Append the conversion an operand needs in this position, if any.
    fn emit_conv(&mut self, src: &Ty, dst: &Ty) {
        if let Some(instr) = Self::conv_instr(src, dst) {
            self.emit(instr);
        }
    }

    /// Patch the reserved slot after an already-emitted left operand.
    fn patch_conv(&mut self, slot: usize, src: &Ty, dst: &Ty) {
        if let Some(instr) = Self::conv_instr(src, dst) {
            self.patch(slot, instr);
        }
    }

    /// Turn an lvalue into a loaded value. Aggregates stay as their address.
    fn add_rval(&mut self, v: &mut ExprVal) {
        if v.lval && !v.ty.is_array() {
            match v.ty.base {
                TyBase::Double => {
                    self.emit(Instr::LoadF);
                }
                TyBase::Int | TyBase::Char => {
                    self.emit(Instr::LoadI);
                }
                _ => {}
            }
        }
        v.lval = false;
        v.constant = true;
    }

    /// Emit the address of a named variable or parameter.
    fn emit_symbol_addr(&mut self, sid: SymbolId) {
        let sym = self.st.get(sid);
        let ty = sym.ty;
        let owner = sym.owner;
        let aggregate = ty.is_array() || matches!(ty.base, TyBase::Struct(_));
        let storage = match &sym.kind {
            SymbolKind::Var(storage) => Some(*storage),
            _ => None,
        };
        let param_index = match &sym.kind {
            SymbolKind::Param { index } => Some(*index),
            _ => None,
        };
        if let Some(storage) = storage {
            match storage {
                VarStorage::Global { base } => {
                    self.emit(Instr::Addr(base));
                }
                VarStorage::Local { slot } => {
                    self.emit(frame_addr(&ty, slot as i64 + 1));
                }
                // members are only reached through a struct lvalue
                VarStorage::Member { .. } => {}
            }
        } else if let Some(index) = param_index {
            let nparams = owner
                .and_then(|o| self.st.fn_info(o))
                .map_or(0, |info| info.params.len());
            self.emit(frame_addr(&ty, index as i64 - nparams as i64 - 1));
            if aggregate {
                // the parameter cell holds the aggregate's address
                self.emit(Instr::LoadI);
            }
        }
    }

    /// Zero-initialized cells for a global of the given type.
    fn push_zero_cells(&self, ty: &Ty, out: &mut Vec<Value>) {
        if let Some(n) = ty.array_len {
            let elem = ty.elem();
            for _ in 0..n.max(1) {
                self.push_zero_cells(&elem, out);
            }
            return;
        }
        match ty.base {
            TyBase::Double => out.push(Value::Double(0.0)),
            TyBase::Int | TyBase::Char => out.push(Value::Int(0)),
            TyBase::Void => {}
            TyBase::Struct(id) => {
                let members = self
                    .st
                    .struct_members(id)
                    .map(|m| m.to_vec())
                    .unwrap_or_default();
                for m in members {
                    let mty = self.st.get(m).ty;
                    self.push_zero_cells(&mty, out);
                }
            }
        }
    }

    /// Materialize a string literal as NUL-terminated char cells, reusing an
    /// earlier block for an identical literal.
    fn intern_string(&mut self, text: &str) -> usize {
        if let Some(&base) = self.strings.get(text) {
            return base;
        }
        let cells = text
            .bytes()
            .map(|b| Value::Int(b as i64))
            .chain(std::iter::once(Value::Int(0)));
        let base = self.program.alloc_data(cells);
        self.strings.insert(text.to_string(), base);
        base
    }

    // ------------------------------------------------------------------
    // host functions and the entry point
    // ------------------------------------------------------------------

    fn register_host_fns(&mut self) -> Result<(), String> {
        for (ext, host) in host_fns().iter().enumerate() {
            let ret_ty = host.ret.map_or(Ty::VOID, host_kind_ty);
            let fid = self
                .st
                .add(Symbol {
                    name: host.name.to_string(),
                    kind: SymbolKind::Fn(FnInfo {
                        external: Some(ext),
                        ..FnInfo::default()
                    }),
                    ty: ret_ty,
                    owner: None,
                })
                .map_err(|e| self.err_msg(e))?;
            for (index, (pname, pkind)) in host.params.iter().enumerate() {
                let pid = self.st.add_detached(Symbol {
                    name: pname.to_string(),
                    kind: SymbolKind::Param { index },
                    ty: host_kind_ty(*pkind),
                    owner: Some(fid),
                });
                if let Some(info) = self.st.fn_info_mut(fid) {
                    info.params.push(pid);
                }
            }
        }
        Ok(())
    }

    /// Synthesize the driver code: call `main`, halt.
    fn link_entry(&mut self) -> Result<(), String> {
        let Some(mid) = self.st.find("main") else {
            return self.err("undefined id: main");
        };
        let Some(info) = self.st.fn_info(mid) else {
            return self.err("main must be a function");
        };
        if !info.params.is_empty() {
            return self.err("main cannot take parameters");
        }
        let (Some(code), None) = (info.code, info.external) else {
            return self.err("main must be a function");
        };
        self.crt_code = self.global_code;
        self.emit(Instr::Call(code));
        self.emit(Instr::Halt);
        self.program.entry = Some(self.global_code);
        Ok(())
    }

    // ------------------------------------------------------------------
    // declarations
    // ------------------------------------------------------------------

    // unit: ( structDef | fnDef | varDef )* END
    fn unit(&mut self) -> Result<(), String> {
        loop {
            if self.struct_def()? {
                continue;
            }
            if self.fn_def()? {
                continue;
            }
            if self.var_def()? {
                continue;
            }
            break;
        }
        if !self.consume(TokenKind::End) {
            return self.err("syntax error");
        }
        Ok(())
    }

    // typeBase: TYPE_INT | TYPE_DOUBLE | TYPE_CHAR | STRUCT ID
    fn type_base(&mut self) -> Result<Option<Ty>, String> {
        if self.consume(TokenKind::TypeInt) {
            return Ok(Some(Ty::INT));
        }
        if self.consume(TokenKind::TypeDouble) {
            return Ok(Some(Ty::DOUBLE));
        }
        if self.consume(TokenKind::TypeChar) {
            return Ok(Some(Ty::CHAR));
        }
        if self.consume(TokenKind::Struct) {
            let Some(name) = self.consume_id() else {
                return self.err("Missing struct name in type definition");
            };
            let sid = self
                .st
                .find(&name)
                .filter(|&id| matches!(self.st.get(id).kind, SymbolKind::Struct { .. }));
            let Some(sid) = sid else {
                return self.err(format!("undefined structure: {}", name));
            };
            return Ok(Some(Ty::scalar(TyBase::Struct(sid))));
        }
        Ok(None)
    }

    // arrayDecl: LBRACKET INT? RBRACKET
    fn array_decl(&mut self) -> Result<Option<ArraySize>, String> {
        let g = self.guard();
        if self.consume(TokenKind::Lbracket) {
            let size = self.consume_int_lit();
            if self.consume(TokenKind::Rbracket) {
                let size = match size {
                    None => ArraySize::Unspecified,
                    Some(n) => ArraySize::Fixed(n as usize),
                };
                return Ok(Some(size));
            }
            self.restore(g);
        }
        Ok(None)
    }

    // varDef: typeBase ID arrayDecl? SEMICOLON
    fn var_def(&mut self) -> Result<bool, String> {
        let g = self.guard();
        let Some(base_ty) = self.type_base()? else {
            // a member like "x;" forgot its type
            if self.in_struct() {
                let g2 = self.guard();
                if self.consume_id().is_some() {
                    let _ = self.array_decl()?;
                    if self.consume(TokenKind::Semicolon) {
                        return self.err("Missing type in variable definition inside struct");
                    }
                }
                self.restore(g2);
            }
            self.restore(g);
            return Ok(false);
        };
        let Some(name) = self.consume_id() else {
            return self.err("Missing variable name");
        };
        let dim = self.array_decl()?;
        if !self.consume(TokenKind::Semicolon) {
            return self.err("Missing ';' after variable definition");
        }
        let ty = match dim {
            None => base_ty,
            Some(ArraySize::Unspecified) => {
                return self.err("a vector variable must have a specified dimension");
            }
            Some(ArraySize::Fixed(0)) => {
                return self.err("the array size cannot be zero");
            }
            Some(ArraySize::Fixed(n)) => Ty::array(base_ty.base, n),
        };
        self.define_var(name, ty)?;
        Ok(true)
    }

    fn in_struct(&self) -> bool {
        self.owner
            .is_some_and(|o| matches!(self.st.get(o).kind, SymbolKind::Struct { .. }))
    }

    fn define_var(&mut self, name: String, ty: Ty) -> Result<(), String> {
        let owner = self.owner;
        if let Some(oid) = owner {
            if self.in_struct() && ty.base == TyBase::Struct(oid) {
                return self.err("a structure cannot contain itself");
            }
        }
        let kind = match owner {
            None => {
                let mut cells = Vec::new();
                self.push_zero_cells(&ty, &mut cells);
                let base = self.program.alloc_data(cells);
                SymbolKind::Var(VarStorage::Global { base })
            }
            Some(oid) => match &self.st.get(oid).kind {
                SymbolKind::Fn(info) => SymbolKind::Var(VarStorage::Local {
                    slot: info.local_cells,
                }),
                SymbolKind::Struct { members } => {
                    let offset = members
                        .iter()
                        .map(|&m| self.st.get(m).ty.size_of(&self.st))
                        .sum();
                    SymbolKind::Var(VarStorage::Member { offset })
                }
                _ => SymbolKind::Var(VarStorage::Global { base: 0 }),
            },
        };
        let sid = self
            .st
            .add(Symbol {
                name,
                kind,
                ty,
                owner,
            })
            .map_err(|e| self.err_msg(e))?;
        if let Some(oid) = owner {
            let cells = ty.cells(&self.st);
            match &mut self.st.get_mut(oid).kind {
                SymbolKind::Fn(info) => {
                    info.locals.push(sid);
                    info.local_cells += cells;
                }
                SymbolKind::Struct { members } => members.push(sid),
                _ => {}
            }
        }
        Ok(())
    }

    // structDef: STRUCT ID LACC varDef* RACC SEMICOLON
    fn struct_def(&mut self) -> Result<bool, String> {
        let g = self.guard();
        if !self.consume(TokenKind::Struct) {
            return Ok(false);
        }
        let Some(name) = self.consume_id() else {
            return self.err("Missing struct name in definition");
        };
        if !self.consume(TokenKind::Lacc) {
            // a declaration like "struct X v;": not a definition
            self.restore(g);
            return Ok(false);
        }
        let sid = self
            .st
            .add(Symbol {
                name,
                kind: SymbolKind::Struct {
                    members: Vec::new(),
                },
                ty: Ty::VOID,
                owner: None,
            })
            .map_err(|e| self.err_msg(e))?;
        self.st.get_mut(sid).ty = Ty::scalar(TyBase::Struct(sid));
        let outer = self.owner;
        self.owner = Some(sid);
        self.st.push_domain();
        while self.var_def()? {}
        if !self.consume(TokenKind::Racc) {
            return self.err("Missing '}' in struct definition");
        }
        if !self.consume(TokenKind::Semicolon) {
            return self.err("Missing ';' in struct definition");
        }
        self.st.drop_domain();
        self.owner = outer;
        Ok(true)
    }

    // fnParam: typeBase ID arrayDecl?
    fn fn_param(&mut self) -> Result<bool, String> {
        let Some(base_ty) = self.type_base()? else {
            let g = self.guard();
            if self.consume_id().is_some() {
                let _ = self.array_decl()?;
                return self.err("Missing function parameter type");
            }
            self.restore(g);
            return Ok(false);
        };
        let Some(name) = self.consume_id() else {
            return self.err("Missing function parameter name");
        };
        let dim = self.array_decl()?;
        // array parameters always carry an unknown length
        let ty = match dim {
            None => base_ty,
            Some(_) => Ty::array(base_ty.base, 0),
        };
        let Some(fid) = self.owner else {
            return self.err("Missing function parameter type");
        };
        let index = self.st.fn_info(fid).map_or(0, |info| info.params.len());
        let sid = self
            .st
            .add(Symbol {
                name,
                kind: SymbolKind::Param { index },
                ty,
                owner: Some(fid),
            })
            .map_err(|e| self.err_msg(e))?;
        if let Some(info) = self.st.fn_info_mut(fid) {
            info.params.push(sid);
        }
        Ok(true)
    }

    // fnDef: ( typeBase | VOID ) ID LPAR ( fnParam ( COMMA fnParam )* )? RPAR stmCompound
    fn fn_def(&mut self) -> Result<bool, String> {
        let g = self.guard();
        let ret_ty = if let Some(t) = self.type_base()? {
            t
        } else if self.consume(TokenKind::Void) {
            Ty::VOID
        } else {
            return Ok(false);
        };
        let Some(name) = self.consume_id() else {
            self.restore(g);
            return Ok(false);
        };
        if !self.consume(TokenKind::Lpar) {
            self.restore(g);
            return Ok(false);
        }
        let fid = self
            .st
            .add(Symbol {
                name,
                kind: SymbolKind::Fn(FnInfo::default()),
                ty: ret_ty,
                owner: None,
            })
            .map_err(|e| self.err_msg(e))?;
        let body = self.program.add_buf();
        if let Some(info) = self.st.fn_info_mut(fid) {
            info.code = Some(body);
        }
        let outer_code = self.crt_code;
        self.crt_code = body;
        self.owner = Some(fid);
        self.st.push_domain();

        if self.fn_param()? {
            while self.consume(TokenKind::Comma) {
                if !self.fn_param()? {
                    return self.err("Missing function parameter after ','");
                }
            }
        }
        if !self.consume(TokenKind::Rpar) {
            return self.err(
                "Function parameters not correctly defined or missing ')' in function definition",
            );
        }
        self.emit(Instr::Enter(0));
        if !self.stm_compound(false)? {
            return self.err("Missing function body");
        }
        let (nparams, local_cells) = self
            .st
            .fn_info(fid)
            .map_or((0, 0), |info| (info.params.len(), info.local_cells));
        if ret_ty.base == TyBase::Void {
            self.emit(Instr::RetVoid(nparams));
        }
        self.patch(0, Instr::Enter(local_cells));

        self.st.drop_domain();
        self.owner = None;
        self.crt_code = outer_code;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    // stmCompound: LACC ( varDef | stm )* RACC
    fn stm_compound(&mut self, own_domain: bool) -> Result<bool, String> {
        if !self.consume(TokenKind::Lacc) {
            return Ok(false);
        }
        if own_domain {
            self.st.push_domain();
        }
        loop {
            if self.var_def()? {
                continue;
            }
            if self.stm()? {
                continue;
            }
            break;
        }
        if !self.consume(TokenKind::Racc) {
            return self.err("Not a valid instruction or missing '}' after instructions");
        }
        if own_domain {
            self.st.drop_domain();
        }
        Ok(true)
    }

    // stm: stmCompound
    //    | IF LPAR expr RPAR stm ( ELSE stm )?
    //    | WHILE LPAR expr RPAR stm
    //    | RETURN expr? SEMICOLON
    //    | expr? SEMICOLON
    fn stm(&mut self) -> Result<bool, String> {
        if self.stm_compound(true)? {
            return Ok(true);
        }

        if self.consume(TokenKind::If) {
            if !self.consume(TokenKind::Lpar) {
                return self.err("Missing '(' before if condition");
            }
            let Some(mut cond) = self.expr()? else {
                return self.err("Missing or invalid if condition");
            };
            if !self.consume(TokenKind::Rpar) {
                return self.err("if condition not correct or missing ')' after if condition");
            }
            self.add_rval(&mut cond);
            if !cond.ty.can_be_scalar() {
                return self.err("the if condition must be a scalar value");
            }
            self.emit_conv(&cond.ty, &Ty::INT);
            let jf = self.emit(Instr::Jf(0));
            if !self.stm()? {
                return self.err("Missing statement inside if");
            }
            if self.consume(TokenKind::Else) {
                let jmp = self.emit(Instr::Jmp(0));
                let l_else = self.emit(Instr::Nop);
                self.patch(jf, Instr::Jf(l_else));
                if !self.stm()? {
                    return self.err("Missing statement inside else");
                }
                let l_end = self.emit(Instr::Nop);
                self.patch(jmp, Instr::Jmp(l_end));
            } else {
                let l_end = self.emit(Instr::Nop);
                self.patch(jf, Instr::Jf(l_end));
            }
            return Ok(true);
        }

        if self.consume(TokenKind::While) {
            if !self.consume(TokenKind::Lpar) {
                return self.err("Missing '(' before while condition");
            }
            let top = self.here();
            let Some(mut cond) = self.expr()? else {
                return self.err("Missing or invalid while condition");
            };
            if !self.consume(TokenKind::Rpar) {
                return self.err("while condition not correct or missing ')' after while condition");
            }
            self.add_rval(&mut cond);
            if !cond.ty.can_be_scalar() {
                return self.err("the while condition must be a scalar value");
            }
            self.emit_conv(&cond.ty, &Ty::INT);
            let jf = self.emit(Instr::Jf(0));
            if !self.stm()? {
                return self.err("Missing statement inside while");
            }
            self.emit(Instr::Jmp(top));
            let l_end = self.emit(Instr::Nop);
            self.patch(jf, Instr::Jf(l_end));
            return Ok(true);
        }

        if self.consume(TokenKind::Return) {
            let Some(fid) = self.owner else {
                return self.err("return outside of a function");
            };
            let ret_ty = self.st.get(fid).ty;
            let nparams = self.st.fn_info(fid).map_or(0, |info| info.params.len());
            if let Some(mut v) = self.expr()? {
                if ret_ty.base == TyBase::Void {
                    return self.err("a void function cannot return a value");
                }
                self.add_rval(&mut v);
                if !conv_to(&v.ty, &ret_ty) {
                    return self
                        .err("cannot convert the return expression type to the function return type");
                }
                self.emit_conv(&v.ty, &ret_ty);
                if !self.consume(TokenKind::Semicolon) {
                    return self.err("Missing ';' after return statement");
                }
                self.emit(Instr::Ret(nparams));
            } else {
                if ret_ty.base != TyBase::Void {
                    return self.err("a non-void function must return a value");
                }
                if !self.consume(TokenKind::Semicolon) {
                    return self.err("Missing ';' after return statement");
                }
                self.emit(Instr::RetVoid(nparams));
            }
            return Ok(true);
        }

        if let Some(v) = self.expr()? {
            if !self.consume(TokenKind::Semicolon) {
                return self.err("Missing semicolon after expression");
            }
            if v.ty.base != TyBase::Void {
                self.emit(Instr::Drop);
            }
            return Ok(true);
        }
        if self.consume(TokenKind::Semicolon) {
            return Ok(true);
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    // expr: exprAssign
    fn expr(&mut self) -> Result<Option<ExprVal>, String> {
        self.expr_assign()
    }

    // exprAssign: exprUnary ASSIGN exprAssign | exprOr
    fn expr_assign(&mut self) -> Result<Option<ExprVal>, String> {
        let g = self.guard();
        if let Some(dst) = self.expr_unary()? {
            if self.consume(TokenKind::Assign) {
                if !dst.lval {
                    return self.err("the assign destination must be a left-value");
                }
                if dst.constant {
                    return self.err("the assign destination cannot be constant");
                }
                if !dst.ty.can_be_scalar() {
                    return self.err("the assign destination must be scalar");
                }
                let Some(mut src) = self.expr_assign()? else {
                    return self.err("Missing or invalid expression after assign");
                };
                self.add_rval(&mut src);
                if !conv_to(&src.ty, &dst.ty) {
                    return self.err("the assign source cannot be converted to the destination");
                }
                self.emit_conv(&src.ty, &dst.ty);
                self.emit(pick_by_base(dst.ty.base, Instr::StoreI, Instr::StoreF));
                return Ok(Some(ExprVal::rval(dst.ty)));
            }
        }
        self.restore(g);
        self.expr_or()
    }

    // exprOr: exprAnd ( OR exprAnd )*
    fn expr_or(&mut self) -> Result<Option<ExprVal>, String> {
        let Some(mut left) = self.expr_and()? else {
            return Ok(None);
        };
        while self.consume(TokenKind::Or) {
            // a true left operand short-circuits to 1
            self.add_rval(&mut left);
            self.emit_conv(&left.ty, &Ty::INT);
            let jf_rhs = self.emit(Instr::Jf(0));
            self.emit(Instr::PushI(1));
            let jmp_end_l = self.emit(Instr::Jmp(0));
            let l_rhs = self.emit(Instr::Nop);
            self.patch(jf_rhs, Instr::Jf(l_rhs));
            let Some(mut right) = self.expr_and()? else {
                return self.err("Missing expression after ||");
            };
            self.add_rval(&mut right);
            if arith_type_to(&left.ty, &right.ty).is_none() {
                return self.err("invalid operand type for ||");
            }
            self.emit_conv(&right.ty, &Ty::INT);
            let jf_false = self.emit(Instr::Jf(0));
            self.emit(Instr::PushI(1));
            let jmp_end_r = self.emit(Instr::Jmp(0));
            let l_false = self.emit(Instr::Nop);
            self.patch(jf_false, Instr::Jf(l_false));
            self.emit(Instr::PushI(0));
            let l_end = self.emit(Instr::Nop);
            self.patch(jmp_end_l, Instr::Jmp(l_end));
            self.patch(jmp_end_r, Instr::Jmp(l_end));
            left = ExprVal::rval(Ty::INT);
        }
        Ok(Some(left))
    }

    // exprAnd: exprEq ( AND exprEq )*
    fn expr_and(&mut self) -> Result<Option<ExprVal>, String> {
        let Some(mut left) = self.expr_eq()? else {
            return Ok(None);
        };
        while self.consume(TokenKind::And) {
            // a false left operand short-circuits to 0
            self.add_rval(&mut left);
            self.emit_conv(&left.ty, &Ty::INT);
            let jf_l = self.emit(Instr::Jf(0));
            let Some(mut right) = self.expr_eq()? else {
                return self.err("Missing expression after &&");
            };
            self.add_rval(&mut right);
            if arith_type_to(&left.ty, &right.ty).is_none() {
                return self.err("invalid operand type for &&");
            }
            self.emit_conv(&right.ty, &Ty::INT);
            let jf_r = self.emit(Instr::Jf(0));
            self.emit(Instr::PushI(1));
            let jmp_end = self.emit(Instr::Jmp(0));
            let l_false = self.emit(Instr::Nop);
            self.patch(jf_l, Instr::Jf(l_false));
            self.patch(jf_r, Instr::Jf(l_false));
            self.emit(Instr::PushI(0));
            let l_end = self.emit(Instr::Nop);
            self.patch(jmp_end, Instr::Jmp(l_end));
            left = ExprVal::rval(Ty::INT);
        }
        Ok(Some(left))
    }

    // exprEq: exprRel ( ( EQUAL | NOTEQ ) exprRel )*
    fn expr_eq(&mut self) -> Result<Option<ExprVal>, String> {
        let Some(mut left) = self.expr_rel()? else {
            return Ok(None);
        };
        loop {
            let op = if self.consume(TokenKind::Equal) {
                TokenKind::Equal
            } else if self.consume(TokenKind::NotEq) {
                TokenKind::NotEq
            } else {
                break;
            };
            self.add_rval(&mut left);
            let slot = self.emit(Instr::Nop);
            let Some(mut right) = self.expr_rel()? else {
                return match op {
                    TokenKind::Equal => self.err("Missing expression after =="),
                    _ => self.err("Missing expression after !="),
                };
            };
            self.add_rval(&mut right);
            let Some(common) = arith_type_to(&left.ty, &right.ty) else {
                return self.err("invalid operand type for == or !=");
            };
            self.patch_conv(slot, &left.ty, &common);
            self.emit_conv(&right.ty, &common);
            let instr = match op {
                TokenKind::Equal => pick_by_base(common.base, Instr::EqI, Instr::EqF),
                _ => pick_by_base(common.base, Instr::NotEqI, Instr::NotEqF),
            };
            self.emit(instr);
            left = ExprVal::rval(Ty::INT);
        }
        Ok(Some(left))
    }

    // exprRel: exprAdd ( ( LESS | LESSEQ | GREATER | GREATEREQ ) exprAdd )*
    fn expr_rel(&mut self) -> Result<Option<ExprVal>, String> {
        let Some(mut left) = self.expr_add()? else {
            return Ok(None);
        };
        loop {
            let op = if self.consume(TokenKind::Less) {
                TokenKind::Less
            } else if self.consume(TokenKind::LessEq) {
                TokenKind::LessEq
            } else if self.consume(TokenKind::Greater) {
                TokenKind::Greater
            } else if self.consume(TokenKind::GreaterEq) {
                TokenKind::GreaterEq
            } else {
                break;
            };
            self.add_rval(&mut left);
            let slot = self.emit(Instr::Nop);
            let Some(mut right) = self.expr_add()? else {
                return match op {
                    TokenKind::Less => self.err("Missing expression after <"),
                    TokenKind::LessEq => self.err("Missing expression after <="),
                    TokenKind::Greater => self.err("Missing expression after >"),
                    _ => self.err("Missing expression after >="),
                };
            };
            self.add_rval(&mut right);
            let Some(common) = arith_type_to(&left.ty, &right.ty) else {
                return self.err("invalid operand type for <, <=, > or >=");
            };
            self.patch_conv(slot, &left.ty, &common);
            self.emit_conv(&right.ty, &common);
            let instr = match op {
                TokenKind::Less => pick_by_base(common.base, Instr::LessI, Instr::LessF),
                TokenKind::LessEq => pick_by_base(common.base, Instr::LessEqI, Instr::LessEqF),
                TokenKind::Greater => pick_by_base(common.base, Instr::GreaterI, Instr::GreaterF),
                _ => pick_by_base(common.base, Instr::GreaterEqI, Instr::GreaterEqF),
            };
            self.emit(instr);
            left = ExprVal::rval(Ty::INT);
        }
        Ok(Some(left))
    }

    // exprAdd: exprMul ( ( ADD | SUB ) exprMul )*
    fn expr_add(&mut self) -> Result<Option<ExprVal>, String> {
        let Some(mut left) = self.expr_mul()? else {
            return Ok(None);
        };
        loop {
            let op = if self.consume(TokenKind::Add) {
                TokenKind::Add
            } else if self.consume(TokenKind::Sub) {
                TokenKind::Sub
            } else {
                break;
            };
            self.add_rval(&mut left);
            let slot = self.emit(Instr::Nop);
            let Some(mut right) = self.expr_mul()? else {
                return match op {
                    TokenKind::Add => self.err("Missing expression after +"),
                    _ => self.err("Missing expression after -"),
                };
            };
            self.add_rval(&mut right);
            let Some(common) = arith_type_to(&left.ty, &right.ty) else {
                return self.err("invalid operand type for + or -");
            };
            self.patch_conv(slot, &left.ty, &common);
            self.emit_conv(&right.ty, &common);
            let instr = match op {
                TokenKind::Add => pick_by_base(common.base, Instr::AddI, Instr::AddF),
                _ => pick_by_base(common.base, Instr::SubI, Instr::SubF),
            };
            self.emit(instr);
            left = ExprVal::rval(common);
        }
        Ok(Some(left))
    }

    // exprMul: exprCast ( ( MUL | DIV ) exprCast )*
    fn expr_mul(&mut self) -> Result<Option<ExprVal>, String> {
        let Some(mut left) = self.expr_cast()? else {
            return Ok(None);
        };
        loop {
            let op = if self.consume(TokenKind::Mul) {
                TokenKind::Mul
            } else if self.consume(TokenKind::Div) {
                TokenKind::Div
            } else {
                break;
            };
            self.add_rval(&mut left);
            let slot = self.emit(Instr::Nop);
            let Some(mut right) = self.expr_cast()? else {
                return match op {
                    TokenKind::Mul => self.err("Missing expression after *"),
                    _ => self.err("Missing expression after /"),
                };
            };
            self.add_rval(&mut right);
            let Some(common) = arith_type_to(&left.ty, &right.ty) else {
                return self.err("invalid operand type for * or /");
            };
            self.patch_conv(slot, &left.ty, &common);
            self.emit_conv(&right.ty, &common);
            let instr = match op {
                TokenKind::Mul => pick_by_base(common.base, Instr::MulI, Instr::MulF),
                _ => pick_by_base(common.base, Instr::DivI, Instr::DivF),
            };
            self.emit(instr);
            left = ExprVal::rval(common);
        }
        Ok(Some(left))
    }

    // exprCast: LPAR typeBase arrayDecl? RPAR exprCast | exprUnary
    fn expr_cast(&mut self) -> Result<Option<ExprVal>, String> {
        let g = self.guard();
        if self.consume(TokenKind::Lpar) {
            if let Some(base_ty) = self.type_base()? {
                let target = match self.array_decl()? {
                    None => base_ty,
                    Some(ArraySize::Unspecified) => Ty::array(base_ty.base, 0),
                    Some(ArraySize::Fixed(n)) => Ty::array(base_ty.base, n),
                };
                if self.consume(TokenKind::Rpar) {
                    let Some(mut v) = self.expr_cast()? else {
                        return self.err("Missing casting expression after ')'");
                    };
                    if matches!(target.base, TyBase::Struct(_)) {
                        return self.err("cannot convert to a struct type");
                    }
                    if matches!(v.ty.base, TyBase::Struct(_)) {
                        return self.err("cannot convert a struct");
                    }
                    if v.ty.is_array() && !target.is_array() {
                        return self.err("an array can be converted only to another array");
                    }
                    if !v.ty.is_array() && target.is_array() {
                        return self.err("a scalar can be converted only to another scalar");
                    }
                    self.add_rval(&mut v);
                    self.emit_conv(&v.ty, &target);
                    return Ok(Some(ExprVal::rval(target)));
                }
            }
        }
        self.restore(g);
        self.expr_unary()
    }

    // exprUnary: ( SUB | NOT ) exprUnary | exprPostfix
    fn expr_unary(&mut self) -> Result<Option<ExprVal>, String> {
        if self.consume(TokenKind::Sub) {
            // negation is a subtraction from a zero patched in once the
            // operand's type is known
            let slot = self.emit(Instr::Nop);
            let Some(mut v) = self.expr_unary()? else {
                return self.err("Missing expression after sub or not");
            };
            if !v.ty.can_be_scalar() {
                return self.err("unary - must have a scalar operand");
            }
            self.add_rval(&mut v);
            match v.ty.base {
                TyBase::Double => {
                    self.patch(slot, Instr::PushF(0.0));
                    self.emit(Instr::SubF);
                }
                _ => {
                    self.patch(slot, Instr::PushI(0));
                    self.emit(Instr::SubI);
                }
            }
            return Ok(Some(ExprVal::rval(v.ty)));
        }
        if self.consume(TokenKind::Not) {
            let Some(mut v) = self.expr_unary()? else {
                return self.err("Missing expression after sub or not");
            };
            if !v.ty.can_be_scalar() {
                return self.err("unary ! must have a scalar operand");
            }
            self.add_rval(&mut v);
            self.emit_conv(&v.ty, &Ty::INT);
            let jf = self.emit(Instr::Jf(0));
            self.emit(Instr::PushI(0));
            let jmp = self.emit(Instr::Jmp(0));
            let l_zero = self.emit(Instr::Nop);
            self.patch(jf, Instr::Jf(l_zero));
            self.emit(Instr::PushI(1));
            let l_end = self.emit(Instr::Nop);
            self.patch(jmp, Instr::Jmp(l_end));
            return Ok(Some(ExprVal::rval(Ty::INT)));
        }
        self.expr_postfix()
    }

    // exprPostfix: exprPrimary ( LBRACKET expr RBRACKET | DOT ID )*
    fn expr_postfix(&mut self) -> Result<Option<ExprVal>, String> {
        let Some(mut v) = self.expr_primary()? else {
            return Ok(None);
        };
        loop {
            if self.consume(TokenKind::Lbracket) {
                if v.ty.array_len.is_none() {
                    return self.err("only an array can be indexed");
                }
                let Some(mut index) = self.expr()? else {
                    return self.err("Missing expression in array indexing");
                };
                if !self.consume(TokenKind::Rbracket) {
                    return self.err("Missing ']' in array indexing");
                }
                self.add_rval(&mut index);
                if !conv_to(&index.ty, &Ty::INT) {
                    return self.err("the index is not convertible to int");
                }
                self.emit_conv(&index.ty, &Ty::INT);
                let elem = v.ty.elem();
                let elem_cells = elem.cells(&self.st);
                self.emit(Instr::PushI(elem_cells as i64));
                self.emit(Instr::MulI);
                self.emit(Instr::Offset);
                v = ExprVal::lval(elem);
                continue;
            }
            if self.consume(TokenKind::Dot) {
                let Some(field) = self.consume_id() else {
                    return self.err("Struct field access with no field name specified");
                };
                let TyBase::Struct(struct_id) = v.ty.base else {
                    return self.err("a field can only be selected from a struct");
                };
                if v.ty.is_array() {
                    return self.err("a field can only be selected from a struct");
                }
                let Some(member) = self.st.find_member(struct_id, &field) else {
                    let sname = self.st.get(struct_id).name.clone();
                    return self.err(format!(
                        "the structure {} does not have a field {}",
                        sname, field
                    ));
                };
                let offset = self.st.member_cell_offset(struct_id, member);
                self.emit(Instr::PushI(offset as i64));
                self.emit(Instr::Offset);
                v = ExprVal::lval(self.st.get(member).ty);
                continue;
            }
            break;
        }
        Ok(Some(v))
    }

    // exprPrimary: ID ( LPAR ( expr ( COMMA expr )* )? RPAR )?
    //            | INT | DOUBLE | CHAR | STRING | LPAR expr RPAR
    fn expr_primary(&mut self) -> Result<Option<ExprVal>, String> {
        let g = self.guard();
        if let Some(name) = self.consume_id() {
            if self.consume(TokenKind::Lpar) {
                return self.call(&name).map(Some);
            }
            let Some(sid) = self.st.find(&name) else {
                return self.err(format!("undefined id: {}", name));
            };
            if matches!(self.st.get(sid).kind, SymbolKind::Fn(_)) {
                return self.err("a function can only be called");
            }
            if matches!(self.st.get(sid).kind, SymbolKind::Struct { .. }) {
                return self.err("a structure name cannot be used as a value");
            }
            let ty = self.st.get(sid).ty;
            self.emit_symbol_addr(sid);
            return Ok(Some(ExprVal::lval(ty)));
        }
        if let Some(value) = self.consume_int_lit() {
            self.emit(Instr::PushI(value));
            return Ok(Some(ExprVal::rval(Ty::INT)));
        }
        if let Some(value) = self.consume_double_lit() {
            self.emit(Instr::PushF(value));
            return Ok(Some(ExprVal::rval(Ty::DOUBLE)));
        }
        if let Some(value) = self.consume_char_lit() {
            self.emit(Instr::PushI(value as i64));
            return Ok(Some(ExprVal::rval(Ty::CHAR)));
        }
        if let Some(text) = self.consume_str_lit() {
            let len = text.len() + 1;
            let base = self.intern_string(&text);
            self.emit(Instr::Addr(base));
            return Ok(Some(ExprVal::rval(Ty::array(TyBase::Char, len))));
        }
        if self.consume(TokenKind::Lpar) {
            if let Some(v) = self.expr()? {
                if !self.consume(TokenKind::Rpar) {
                    return self.err("Missing ')' at the end of expression");
                }
                return Ok(Some(v));
            }
        }
        self.restore(g);
        Ok(None)
    }

    /// `ID LPAR` committed: parse arguments, check the callee, emit the call.
    fn call(&mut self, name: &str) -> Result<ExprVal, String> {
        let Some(sid) = self.st.find(name) else {
            return self.err(format!("undefined id: {}", name));
        };
        let Some(info) = self.st.fn_info(sid) else {
            return self.err("only a function can be called");
        };
        let params = info.params.clone();
        let external = info.external;
        let code = info.code;
        let ret_ty = self.st.get(sid).ty;

        let mut argc = 0usize;
        if let Some(mut arg) = self.expr()? {
            self.check_arg(name, &params, argc, &mut arg)?;
            argc += 1;
            while self.consume(TokenKind::Comma) {
                let Some(mut arg) = self.expr()? else {
                    return self.err("Expected expression after ','");
                };
                self.check_arg(name, &params, argc, &mut arg)?;
                argc += 1;
            }
        }
        if !self.consume(TokenKind::Rpar) {
            return self.err("Missing ')' in function call");
        }
        if argc < params.len() {
            return self.err("too few arguments in function call");
        }
        match (external, code) {
            (Some(ext), _) => {
                self.emit(Instr::CallExt(ext));
            }
            (None, Some(code)) => {
                self.emit(Instr::Call(code));
            }
            (None, None) => {
                return self.err(format!("undefined id: {}", name));
            }
        }
        Ok(ExprVal::rval(ret_ty))
    }

    fn check_arg(
        &mut self,
        fname: &str,
        params: &[SymbolId],
        argc: usize,
        arg: &mut ExprVal,
    ) -> Result<(), String> {
        if argc >= params.len() {
            return self.err("too many arguments in function call");
        }
        let pty = self.st.get(params[argc]).ty;
        self.add_rval(arg);
        if !conv_to(&arg.ty, &pty) {
            return self.err(format!(
                "in call to {}, cannot convert the argument type to the parameter type",
                fname
            ));
        }
        self.emit_conv(&arg.ty, &pty);
        Ok(())
    }
}

fn frame_addr(ty: &Ty, off: i64) -> Instr {
    if !ty.is_array() && ty.base == TyBase::Double {
        Instr::FpAddrF(off)
    } else {
        Instr::FpAddrI(off)
    }
}

fn pick_by_base(base: TyBase, int_instr: Instr, dbl_instr: Instr) -> Instr {
    if base == TyBase::Double {
        dbl_instr
    } else {
        int_instr
    }
}

fn host_kind_ty(kind: atomc_runtime::HostKind) -> Ty {
    match kind {
        atomc_runtime::HostKind::Int => Ty::INT,
        atomc_runtime::HostKind::Double => Ty::DOUBLE,
    }
}
