use std::{fmt::Write, io, ops::Range, path::Path};

use rustc_hash::FxHashMap;

use crate::{
    ast::{
        ActualParam, BinOp, Command, Declaration, DeclarationKind, Decoration, Expr, ExprKind,
        FormalParam, FormalParamKind, Ident, Literal, Name, Program, Span, Spanned, UnaryOp, Vname,
        VnameKind,
    },
    decl::{DeclId, Decls},
    errors::{source_span, ErrorReporter, InternalError, SemanticError},
    tam::{
        self, Emitter, Instr, Label, Operand, Primitive, Register, FALSE, LINK_DATA_SIZE, MAXINT,
        TRUE,
    },
    ty::{Ty, TyKind, ADDRESS_SIZE, CLOSURE_SIZE},
};

type Result<T> = std::result::Result<T, InternalError>;

/// Where a declaration lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub level: u8,
    pub displacement: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// Constant with a compile-time value; occupies no storage.
    KnownValue(i32),
    /// Constant evaluated at run time, or a value parameter.
    UnknownValue(Address),
    /// Variable.
    KnownAddress(Address),
    /// Var parameter: the slot holds the variable's address.
    UnknownAddress(Address),
    KnownRoutine { level: u8, entry: Label },
    /// Routine parameter: the slot holds a closure.
    UnknownRoutine(Address),
    Primitive(Primitive),
    Type,
}

/// Instructions emitted for one expression and the words it leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprCode {
    pub span: Span,
    pub code: Range<usize>,
    pub size: i32,
}

/// Output of a successful encode.
#[derive(Debug)]
pub struct Encoding {
    emitter: Emitter,
    entities: Vec<Option<Entity>>,
    exprs: Vec<ExprCode>,
    call_effects: FxHashMap<usize, i32>,
}

impl Encoding {
    pub fn instructions(&self) -> &[Instr] {
        self.emitter.instructions()
    }

    pub fn entity(&self, id: DeclId) -> Option<Entity> {
        self.entities.get(id.index()).copied().flatten()
    }

    /// Storage address of a constant, variable or parameter.
    pub fn address_of(&self, id: DeclId) -> Option<Address> {
        match self.entity(id)? {
            Entity::UnknownValue(addr)
            | Entity::KnownAddress(addr)
            | Entity::UnknownAddress(addr)
            | Entity::UnknownRoutine(addr) => Some(addr),
            _ => None,
        }
    }

    /// Code address of a declared routine.
    pub fn entry_of(&self, id: DeclId) -> Option<u32> {
        match self.entity(id)? {
            Entity::KnownRoutine { entry, .. } => self.emitter.label_address(entry),
            _ => None,
        }
    }

    /// Every encoded expression in the order its code was finished.
    pub fn exprs(&self) -> &[ExprCode] {
        &self.exprs
    }

    /// Net stack effect of running `range`, see [`tam::net_stack_effect`].
    pub fn stack_effect(&self, range: Range<usize>) -> Option<i32> {
        tam::net_stack_effect(self.instructions(), range, &self.call_effects)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        self.emitter.save(path)
    }

    /// One line per program declaration with the storage or code it was
    /// given.
    pub fn table(&self, decls: &Decls) -> String {
        let mut out = String::new();
        for (id, decl) in decls.iter().filter(|(_, decl)| decl.builtin.is_none()) {
            let place = match (self.entity(id), self.address_of(id)) {
                (_, Some(addr)) => format!("{}[level {}]", addr.displacement, addr.level),
                (Some(Entity::KnownValue(value)), _) => format!("value {value}"),
                (Some(Entity::KnownRoutine { level, .. }), _) => {
                    let entry = self.entry_of(id).unwrap_or_default();
                    format!("{entry}[CB] level {level}")
                }
                (Some(Entity::Primitive(primitive)), _) => format!("{}[PB]", primitive.displacement()),
                (Some(Entity::Type), _) => "type".to_string(),
                // parameters of routine parameters
                (_, None) => "-".to_string(),
            };
            let kind = format!("{:?}", decl.kind);
            _ = writeln!(out, "{:<12} {kind:<10} {place}", decl.name);
        }
        out
    }
}

/// Storage allocated so far in the routine being encoded.
#[derive(Debug, Clone, Copy)]
struct Frame {
    level: u8,
    size: i32,
}

impl Frame {
    const GLOBAL: Self = Self { level: 0, size: 0 };

    fn expand(self, size: i32) -> Self {
        Self { size: self.size.saturating_add(size), ..self }
    }

    fn address(self) -> Address {
        Address { level: self.level, displacement: self.size }
    }

    fn routine_body(self) -> Self {
        Self { level: self.level + 1, size: LINK_DATA_SIZE }
    }
}

/// How a v-name reaches its storage: the entity it is rooted at, the static
/// offset of fields and constant subscripts, and whether a dynamic index has
/// been pushed.
struct Access {
    name: Ident,
    entity: Entity,
    offset: i32,
    indexed: bool,
}

/// Encodes a checked program as TAM code.
///
/// Restrictions of the machine are reported to `reporter`; an `Err` means the
/// tree was not fully decorated by a successful check.
pub fn encode(
    program: &Program,
    decls: &Decls,
    reporter: &mut ErrorReporter,
) -> Result<Encoding> {
    let mut encoder = Encoder {
        decls,
        reporter,
        emitter: Emitter::new(),
        entities: vec![None; decls.len()],
        exprs: vec![],
        call_effects: FxHashMap::default(),
    };
    encoder.standard_environment();
    encoder.command(&program.command, Frame::GLOBAL)?;
    encoder.emitter.emit(Instr::Halt);

    if let Some(label) = encoder.emitter.unbound_label() {
        return Err(InternalError::UnboundLabel(label));
    }
    if encoder.emitter.is_full() {
        let span = source_span(&program.command.span);
        encoder.reporter.report(SemanticError::CodeStoreFull { span });
    }
    log::debug!("encoded {} instructions", encoder.emitter.current_position());
    // narrowed operands leave restricted code unbalanced
    let restricted = encoder.reporter.has_errors();
    let encoding = Encoding {
        emitter: encoder.emitter,
        entities: encoder.entities,
        exprs: encoder.exprs,
        call_effects: encoder.call_effects,
    };
    debug_assert!(
        restricted
            || encoding
                .exprs
                .iter()
                .all(|expr| encoding.stack_effect(expr.code.clone()) == Some(expr.size)),
        "expression code is not stack balanced"
    );
    Ok(encoding)
}

struct Encoder<'a> {
    decls: &'a Decls,
    reporter: &'a mut ErrorReporter,
    emitter: Emitter,
    entities: Vec<Option<Entity>>,
    exprs: Vec<ExprCode>,
    call_effects: FxHashMap<usize, i32>,
}

impl Encoder<'_> {
    fn standard_environment(&mut self) {
        for (id, decl) in self.decls.iter() {
            let Some(builtin) = decl.builtin else { continue };
            let entity = match (builtin.value(), builtin.primitive()) {
                (Some(value), _) => Entity::KnownValue(value.word() as i32),
                (None, Some(primitive)) => Entity::Primitive(primitive),
                (None, None) => Entity::Type,
            };
            self.entities[id.index()] = Some(entity);
        }
    }

    fn command(&mut self, command: &Spanned<Command>, frame: Frame) -> Result<()> {
        match &command.inner {
            Command::Empty => {}
            Command::Assign { target, expr } => {
                let size = self.expr(expr, frame)?;
                self.store(target, frame.expand(size))?;
            }
            Command::Call { callee, args } => self.call(callee, args, frame)?,
            Command::Seq(commands) => {
                for command in commands {
                    self.command(command, frame)?;
                }
            }
            Command::Let { decls, body } => {
                let extra = self.declarations(decls, frame)?;
                self.command(body, frame.expand(extra))?;
                if extra > 0 {
                    self.emitter.emit(Instr::Pop { result: 0, count: extra });
                }
            }
            Command::If { cond, then, r#else } => {
                let else_label = self.emitter.create_label();
                let end = self.emitter.create_label();
                self.expr(cond, frame)?;
                self.emitter.emit_to_label(jump_if(FALSE), else_label);
                self.command(then, frame)?;
                self.emitter.emit_to_label(jump(), end);
                self.emitter.bind_label(else_label);
                self.command(r#else, frame)?;
                self.emitter.bind_label(end);
            }
            Command::While { cond, body } => {
                let test = self.emitter.create_label();
                let start = self.emitter.create_label();
                self.emitter.emit_to_label(jump(), test);
                self.emitter.bind_label(start);
                self.command(body, frame)?;
                self.emitter.bind_label(test);
                self.expr(cond, frame)?;
                self.emitter.emit_to_label(jump_if(TRUE), start);
            }
        }
        Ok(())
    }

    /// Elaborates a declaration block, returning the words it left on the
    /// stack.
    fn declarations(&mut self, decls: &[Declaration], frame: Frame) -> Result<i32> {
        // every routine in the block gets its entry label before any body is
        // encoded; calls emitted early are patched when the label is bound
        for decl in decls {
            if let DeclarationKind::Proc { .. } | DeclarationKind::Func { .. } = decl.kind {
                let entry = self.emitter.create_label();
                let routine = Entity::KnownRoutine { level: frame.level, entry };
                self.bind(&decl.decl, &decl.span, routine)?;
            }
        }
        let mut extra = 0;
        for decl in decls {
            let size = self.declaration(decl, frame.expand(extra))?;
            extra = extra.saturating_add(size);
        }
        Ok(extra)
    }

    fn declaration(&mut self, decl: &Declaration, frame: Frame) -> Result<i32> {
        match &decl.kind {
            DeclarationKind::Const(expr) => {
                if let Some(literal) = expr.literal() {
                    let value = self.word(literal, &expr.span);
                    self.bind(&decl.decl, &decl.span, Entity::KnownValue(value))?;
                    return Ok(0);
                }
                let size = self.expr(expr, frame)?;
                self.bind(&decl.decl, &decl.span, Entity::UnknownValue(frame.address()))?;
                Ok(size)
            }
            DeclarationKind::Var(_) => {
                let id = self.bind(&decl.decl, &decl.span, Entity::KnownAddress(frame.address()))?;
                let decls = self.decls;
                let size = self.size(&decls[id].ty, &decl.span)?;
                self.emitter.emit(Instr::Push(size));
                Ok(size)
            }
            DeclarationKind::Type(_) => {
                self.bind(&decl.decl, &decl.span, Entity::Type)?;
                Ok(0)
            }
            DeclarationKind::Proc { params, body } => {
                let entry = self.entry(decl)?;
                let skip = self.emitter.create_label();
                self.emitter.emit_to_label(jump(), skip);
                self.emitter.bind_label(entry);
                let args = self.formals(params, frame.level + 1)?;
                self.command(body, frame.routine_body())?;
                self.emitter.emit(Instr::Return { result: 0, args });
                self.emitter.bind_label(skip);
                Ok(0)
            }
            DeclarationKind::Func { params, body, .. } => {
                let entry = self.entry(decl)?;
                let skip = self.emitter.create_label();
                self.emitter.emit_to_label(jump(), skip);
                self.emitter.bind_label(entry);
                let args = self.formals(params, frame.level + 1)?;
                let size = self.expr(body, frame.routine_body())?;
                let result = self.small(size, &body.span);
                self.emitter.emit(Instr::Return { result, args });
                self.emitter.bind_label(skip);
                Ok(0)
            }
        }
    }

    fn entry(&self, decl: &Declaration) -> Result<Label> {
        let id = decl_id(&decl.decl, &decl.span)?;
        match self.entities[id.index()] {
            Some(Entity::KnownRoutine { entry, .. }) => Ok(entry),
            _ => Err(InternalError::WrongEntity { name: decl.ident.inner, expected: "a routine" }),
        }
    }

    /// Assigns parameters their negative displacements, the last one nearest
    /// the frame base. Returns the words the arguments occupy.
    fn formals(&mut self, params: &[FormalParam], level: u8) -> Result<i32> {
        let decls = self.decls;
        let mut sizes = Vec::with_capacity(params.len());
        for param in params {
            let size = match param.kind {
                FormalParamKind::Value(_) => {
                    let id = decl_id(&param.decl, &param.span)?;
                    self.size(&decls[id].ty, &param.span)?
                }
                FormalParamKind::Var(_) => ADDRESS_SIZE as i32,
                FormalParamKind::Proc(_) | FormalParamKind::Func(..) => CLOSURE_SIZE as i32,
            };
            sizes.push(size);
        }
        let total: i32 = sizes.iter().sum();
        let mut displacement = -total;
        for (param, size) in params.iter().zip(sizes) {
            let addr = Address { level, displacement };
            let entity = match param.kind {
                FormalParamKind::Value(_) => Entity::UnknownValue(addr),
                FormalParamKind::Var(_) => Entity::UnknownAddress(addr),
                FormalParamKind::Proc(_) | FormalParamKind::Func(..) => Entity::UnknownRoutine(addr),
            };
            self.bind(&param.decl, &param.span, entity)?;
            displacement += size;
        }
        Ok(total)
    }

    /// Evaluates `expr` onto the stack, returning the words it occupies.
    fn expr(&mut self, expr: &Expr, frame: Frame) -> Result<i32> {
        let ty = decorated_ty(&expr.ty, "expression", &expr.span)?;
        let start = self.emitter.current_position();
        match &expr.kind {
            ExprKind::Literal(literal) => {
                let value = self.word(*literal, &expr.span);
                self.emitter.emit(Instr::LoadL(value));
            }
            ExprKind::Vname(vname) => self.fetch(vname, frame)?,
            ExprKind::Call { callee, args } => self.call(callee, args, frame)?,
            ExprKind::Unary { op, expr: operand } => {
                self.expr(operand, frame)?;
                let primitive = match op {
                    UnaryOp::Not => Primitive::Not,
                    UnaryOp::Neg => Primitive::Neg,
                };
                self.primitive(primitive, 0);
            }
            ExprKind::Binary { op, exprs } => {
                let [lhs, rhs] = &**exprs;
                let lhs_size = self.expr(lhs, frame)?;
                let rhs_size = self.expr(rhs, frame.expand(lhs_size))?;
                let primitive = match op {
                    BinOp::Eq | BinOp::Ne => {
                        self.emitter.emit(Instr::LoadL(lhs_size));
                        let effect = 1 - (lhs_size + rhs_size + 1);
                        let primitive = if *op == BinOp::Eq { Primitive::Eq } else { Primitive::Ne };
                        self.primitive(primitive, effect);
                        None
                    }
                    BinOp::Or => Some(Primitive::Or),
                    BinOp::And => Some(Primitive::And),
                    BinOp::Lt => Some(Primitive::Lt),
                    BinOp::Le => Some(Primitive::Le),
                    BinOp::Gt => Some(Primitive::Gt),
                    BinOp::Ge => Some(Primitive::Ge),
                    BinOp::Add => Some(Primitive::Add),
                    BinOp::Sub => Some(Primitive::Sub),
                    BinOp::Mul => Some(Primitive::Mult),
                    BinOp::Div => Some(Primitive::Div),
                    BinOp::Mod => Some(Primitive::Mod),
                };
                if let Some(primitive) = primitive {
                    self.primitive(primitive, 1 - lhs_size - rhs_size);
                }
            }
            ExprKind::If { exprs } => {
                let [cond, then, r#else] = &**exprs;
                let else_label = self.emitter.create_label();
                let end = self.emitter.create_label();
                self.expr(cond, frame)?;
                self.emitter.emit_to_label(jump_if(FALSE), else_label);
                self.expr(then, frame)?;
                self.emitter.emit_to_label(jump(), end);
                self.emitter.bind_label(else_label);
                self.expr(r#else, frame)?;
                self.emitter.bind_label(end);
            }
            ExprKind::Let { decls, body } => {
                let extra = self.declarations(decls, frame)?;
                let size = self.expr(body, frame.expand(extra))?;
                if extra > 0 {
                    let result = self.small(size, &expr.span);
                    self.emitter.emit(Instr::Pop { result, count: extra });
                }
            }
            ExprKind::Array(elems) => {
                let mut pushed = 0;
                for elem in elems {
                    pushed += self.expr(elem, frame.expand(pushed))?;
                }
            }
            ExprKind::Record(fields) => {
                let mut pushed = 0;
                for field in fields {
                    pushed += self.expr(&field.expr, frame.expand(pushed))?;
                }
            }
        }
        let size = self.size(&ty, &expr.span)?;
        let code = start..self.emitter.current_position();
        self.exprs.push(ExprCode { span: expr.span.clone(), code, size });
        Ok(size)
    }

    /// Calls a procedure or function with `args`.
    fn call(&mut self, callee: &Name, args: &[ActualParam], frame: Frame) -> Result<()> {
        let id = decl_id(&callee.decl, &callee.span)?;
        let decls = self.decls;
        let ret_size = match decls[id].ty.kind() {
            TyKind::Func { ret, .. } => self.size(ret, &callee.span)?,
            _ => 0,
        };
        let mut args_size = 0;
        for arg in args {
            args_size += self.arg(arg, frame.expand(args_size))?;
        }
        let effect = ret_size - args_size;
        match self.entity(id, callee.ident)? {
            Entity::KnownRoutine { level, entry } => {
                let static_link = self.display(frame, level, &callee.span);
                let call = Instr::Call { static_link, addr: Operand::code(0) };
                let position = self.emitter.emit_to_label(call, entry);
                self.call_effects.insert(position, effect);
            }
            Entity::UnknownRoutine(addr) => {
                let closure = self.operand(frame, addr, 0, &callee.span);
                self.emitter.emit(Instr::Load { size: CLOSURE_SIZE as u8, addr: closure });
                let position = self.emitter.emit(Instr::CallI);
                self.call_effects.insert(position, effect - CLOSURE_SIZE as i32);
            }
            Entity::Primitive(primitive) => self.primitive(primitive, effect),
            _ => {
                return Err(InternalError::WrongEntity { name: callee.ident, expected: "a routine" });
            }
        }
        Ok(())
    }

    fn arg(&mut self, arg: &ActualParam, frame: Frame) -> Result<i32> {
        match arg {
            ActualParam::Value(expr) => self.expr(expr, frame),
            ActualParam::Var(vname) => {
                self.fetch_address(vname, frame)?;
                Ok(ADDRESS_SIZE as i32)
            }
            ActualParam::Proc(name) | ActualParam::Func(name) => {
                self.closure(name, frame)?;
                Ok(CLOSURE_SIZE as i32)
            }
        }
    }

    /// Pushes the static link and code address of a routine.
    fn closure(&mut self, name: &Name, frame: Frame) -> Result<()> {
        let id = decl_id(&name.decl, &name.span)?;
        match self.entity(id, name.ident)? {
            Entity::KnownRoutine { level, entry } => {
                let static_link = self.display(frame, level, &name.span);
                self.emitter.emit(Instr::LoadA(Operand::new(static_link, 0)));
                self.emitter.emit_to_label(Instr::LoadA(Operand::code(0)), entry);
            }
            Entity::UnknownRoutine(addr) => {
                let closure = self.operand(frame, addr, 0, &name.span);
                self.emitter.emit(Instr::Load { size: CLOSURE_SIZE as u8, addr: closure });
            }
            Entity::Primitive(primitive) => {
                self.emitter.emit(Instr::LoadA(Operand::new(Register::SB, 0)));
                self.emitter.emit(Instr::LoadA(Operand::primitive(primitive)));
            }
            _ => return Err(InternalError::WrongEntity { name: name.ident, expected: "a routine" }),
        }
        Ok(())
    }

    /// Resolves a v-name to its root entity, folding field offsets and
    /// constant subscripts into a static offset and pushing any dynamic index.
    fn access(&mut self, vname: &Vname, frame: Frame) -> Result<Access> {
        match &vname.kind {
            VnameKind::Simple(name) => {
                let id = decl_id(&name.decl, &name.span)?;
                let entity = self.entity(id, name.ident)?;
                Ok(Access { name: name.ident, entity, offset: 0, indexed: false })
            }
            VnameKind::Field { vname: base, field } => {
                let mut access = self.access(base, frame)?;
                let record = decorated_ty(&base.ty, "v-name", &base.span)?;
                if record.field(field.inner).is_none() {
                    let ty = record.to_string();
                    return Err(InternalError::MissingField { name: field.inner, ty });
                }
                let offset = self.offset(record.field_offset(field.inner), &field.span);
                access.offset = access.offset.saturating_add(offset);
                Ok(access)
            }
            VnameKind::Index { vname: base, index } => {
                let mut access = self.access(base, frame)?;
                let elem = decorated_ty(&vname.ty, "v-name", &vname.span)?;
                let elem_size = self.size(&elem, &vname.span)?;
                if let Some(literal) = index.literal() {
                    let offset = self.word(literal, &index.span).saturating_mul(elem_size);
                    access.offset = access.offset.saturating_add(offset);
                    return Ok(access);
                }
                let frame = if access.indexed { frame.expand(1) } else { frame };
                self.expr(index, frame)?;
                if elem_size != 1 {
                    self.emitter.emit(Instr::LoadL(elem_size));
                    self.primitive(Primitive::Mult, -1);
                }
                if access.indexed {
                    self.primitive(Primitive::Add, -1);
                }
                access.indexed = true;
                Ok(access)
            }
        }
    }

    fn fetch(&mut self, vname: &Vname, frame: Frame) -> Result<()> {
        let ty = decorated_ty(&vname.ty, "v-name", &vname.span)?;
        let size = self.size(&ty, &vname.span)?;
        let size = self.small(size, &vname.span);
        let access = self.access(vname, frame)?;
        match access.entity {
            Entity::KnownValue(value) => {
                self.emitter.emit(Instr::LoadL(value));
            }
            Entity::UnknownValue(addr) | Entity::KnownAddress(addr) => {
                let operand = self.operand(frame, addr, access.offset, &vname.span);
                if access.indexed {
                    self.emitter.emit(Instr::LoadA(operand));
                    self.primitive(Primitive::Add, -1);
                    self.emitter.emit(Instr::LoadI(size));
                } else {
                    self.emitter.emit(Instr::Load { size, addr: operand });
                }
            }
            Entity::UnknownAddress(addr) => {
                self.indirect(frame, addr, &access, &vname.span);
                self.emitter.emit(Instr::LoadI(size));
            }
            _ => return Err(InternalError::WrongEntity { name: access.name, expected: "a value" }),
        }
        Ok(())
    }

    /// Pops a value of the v-name's size into its storage.
    fn store(&mut self, vname: &Vname, frame: Frame) -> Result<()> {
        let ty = decorated_ty(&vname.ty, "v-name", &vname.span)?;
        let size = self.size(&ty, &vname.span)?;
        let size = self.small(size, &vname.span);
        let access = self.access(vname, frame)?;
        match access.entity {
            Entity::KnownAddress(addr) => {
                let operand = self.operand(frame, addr, access.offset, &vname.span);
                if access.indexed {
                    self.emitter.emit(Instr::LoadA(operand));
                    self.primitive(Primitive::Add, -1);
                    self.emitter.emit(Instr::StoreI(size));
                } else {
                    self.emitter.emit(Instr::Store { size, addr: operand });
                }
            }
            Entity::UnknownAddress(addr) => {
                self.indirect(frame, addr, &access, &vname.span);
                self.emitter.emit(Instr::StoreI(size));
            }
            _ => {
                return Err(InternalError::WrongEntity { name: access.name, expected: "a variable" });
            }
        }
        Ok(())
    }

    /// Pushes the address of a v-name's storage.
    fn fetch_address(&mut self, vname: &Vname, frame: Frame) -> Result<()> {
        let access = self.access(vname, frame)?;
        match access.entity {
            Entity::UnknownValue(addr) | Entity::KnownAddress(addr) => {
                let operand = self.operand(frame, addr, access.offset, &vname.span);
                self.emitter.emit(Instr::LoadA(operand));
                if access.indexed {
                    self.primitive(Primitive::Add, -1);
                }
            }
            Entity::UnknownAddress(addr) => self.indirect(frame, addr, &access, &vname.span),
            _ => {
                return Err(InternalError::WrongEntity { name: access.name, expected: "a variable" });
            }
        }
        Ok(())
    }

    /// Pushes the address held in a var parameter, adjusted by the access's
    /// index and offset.
    fn indirect(&mut self, frame: Frame, addr: Address, access: &Access, span: &Span) {
        let operand = self.operand(frame, addr, 0, span);
        self.emitter.emit(Instr::Load { size: ADDRESS_SIZE as u8, addr: operand });
        if access.indexed {
            self.primitive(Primitive::Add, -1);
        }
        if access.offset != 0 {
            self.emitter.emit(Instr::LoadL(access.offset));
            self.primitive(Primitive::Add, -1);
        }
    }

    fn primitive(&mut self, primitive: Primitive, effect: i32) {
        // chr and ord are the identity on TAM words
        if primitive == Primitive::Id {
            return;
        }
        let call = Instr::Call { static_link: Register::SB, addr: Operand::primitive(primitive) };
        let position = self.emitter.emit(call);
        self.call_effects.insert(position, effect);
    }

    fn operand(&mut self, frame: Frame, addr: Address, offset: i32, span: &Span) -> Operand {
        let register = self.display(frame, addr.level, span);
        Operand::new(register, addr.displacement + offset)
    }

    /// Register addressing data declared at `level` from code at `frame`.
    fn display(&mut self, frame: Frame, level: u8, span: &Span) -> Register {
        if level == 0 {
            return Register::SB;
        }
        let levels_out = usize::from(frame.level.saturating_sub(level));
        Register::display(levels_out).unwrap_or_else(|| {
            self.reporter.report(SemanticError::NestingTooDeep { span: source_span(span) });
            Register::L6
        })
    }

    fn bind(&mut self, decl: &Decoration<DeclId>, span: &Span, entity: Entity) -> Result<DeclId> {
        let id = decl_id(decl, span)?;
        log::trace!("`{}` is {entity:?}", self.decls[id].name);
        self.entities[id.index()] = Some(entity);
        Ok(id)
    }

    fn entity(&self, id: DeclId, name: Ident) -> Result<Entity> {
        self.entities[id.index()].ok_or(InternalError::MissingEntity { name })
    }

    /// Words a value of `ty` occupies. Anything beyond `maxint` words is
    /// reported and counts as empty.
    fn size(&mut self, ty: &Ty, span: &Span) -> Result<i32> {
        if ty.is_error() {
            return Err(InternalError::ErrorTyped { what: "declaration", span: span.clone() });
        }
        Ok(self.offset(ty.size(), span))
    }

    /// Narrows a word count to a displacement, reporting counts beyond
    /// `maxint` and overflowed ones.
    fn offset(&mut self, words: Option<u32>, span: &Span) -> i32 {
        match words.and_then(|words| i32::try_from(words).ok()) {
            Some(words) if i64::from(words) <= MAXINT => words,
            _ => {
                let value = words.map_or(i64::MAX, i64::from);
                self.reporter.report(SemanticError::OperandTooLarge { value, span: source_span(span) });
                0
            }
        }
    }

    /// Narrows a size to the 8-bit `n` field of an instruction.
    fn small(&mut self, size: i32, span: &Span) -> u8 {
        u8::try_from(size).unwrap_or_else(|_| {
            let value = i64::from(size);
            self.reporter.report(SemanticError::OperandTooLarge { value, span: source_span(span) });
            u8::MAX
        })
    }

    fn word(&mut self, literal: Literal, span: &Span) -> i32 {
        i32::try_from(literal.word()).unwrap_or_else(|_| {
            let value = literal.word();
            self.reporter.report(SemanticError::OperandTooLarge { value, span: source_span(span) });
            0
        })
    }
}

fn decl_id(decl: &Decoration<DeclId>, span: &Span) -> Result<DeclId> {
    decl.get()
        .copied()
        .ok_or_else(|| InternalError::Undecorated { what: "identifier", span: span.clone() })
}

fn decorated_ty(ty: &Decoration<Ty>, what: &'static str, span: &Span) -> Result<Ty> {
    match ty.get() {
        None => Err(InternalError::Undecorated { what, span: span.clone() }),
        Some(ty) if ty.is_error() => Err(InternalError::ErrorTyped { what, span: span.clone() }),
        Some(ty) => Ok(ty.clone()),
    }
}

fn jump() -> Instr {
    Instr::Jump(Operand::code(0))
}

fn jump_if(value: u8) -> Instr {
    Instr::JumpIf { value, addr: Operand::code(0) }
}

#[cfg(test)]
mod tests {
    use super::{encode, Address, Encoding};
    use crate::{
        ast::{Command, DeclarationKind, Program},
        checker::check,
        decl::{DeclKind, Decls},
        errors::{ErrorReporter, InternalError, SemanticError},
        fold::fold,
        parser::parse,
        tam::{Instr, Operand, Primitive, Register},
    };

    fn encoded(src: &str, folding: bool) -> (Program, Decls, Encoding) {
        let mut program = parse(src).unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        assert_eq!(reporter.errors(), &[]);
        if folding {
            fold(&mut program, &decls);
        }
        let encoding = encode(&program, &decls, &mut reporter).unwrap();
        assert_eq!(reporter.errors(), &[]);
        (program, decls, encoding)
    }

    fn call(primitive: Primitive) -> Instr {
        Instr::Call { static_link: Register::SB, addr: Operand::primitive(primitive) }
    }

    #[test]
    fn folded_let_is_a_single_literal() {
        let (_, _, encoding) = encoded("putint(let const x ~ 3 in x + 4)", true);
        assert_eq!(encoding.instructions(), &[
            Instr::LoadL(7),
            call(Primitive::PutInt),
            Instr::Halt,
        ]);
        let arg = &encoding.exprs()[0];
        assert_eq!(arg.code, 0..1);
        assert_eq!(arg.size, 1);
    }

    #[test]
    fn globals_are_addressed_from_sb() {
        let src = "let var a: Integer; var p: record x: Integer, y: array 3 of Char end \
                   in begin a := 1; p.y[2] := 'c'; p.y[a] := 'd' end";
        let (_, _, encoding) = encoded(src, false);
        let sb = |d| Operand::new(Register::SB, d);
        assert_eq!(encoding.instructions(), &[
            Instr::Push(1),
            Instr::Push(4),
            Instr::LoadL(1),
            Instr::Store { size: 1, addr: sb(0) },
            Instr::LoadL('c' as i32),
            Instr::Store { size: 1, addr: sb(1 + 1 + 2) },
            Instr::LoadL('d' as i32),
            Instr::Load { size: 1, addr: sb(0) },
            Instr::LoadA(sb(2)),
            call(Primitive::Add),
            Instr::StoreI(1),
            Instr::Pop { result: 0, count: 5 },
            Instr::Halt,
        ]);
    }

    #[test]
    fn routine_frames() {
        let src = "let var g: Integer; \
                   proc p(a: Integer, var b: Integer) ~ let var l: Integer in b := a + l + g \
                   in p(1, var g)";
        let (program, _, encoding) = encoded(src, false);
        let Command::Let { decls, .. } = &program.command.inner else { panic!() };
        let DeclarationKind::Proc { params, .. } = &decls[1].kind else { panic!() };
        assert_eq!(
            encoding.address_of(*decls[0].decl.get().unwrap()),
            Some(Address { level: 0, displacement: 0 })
        );
        assert_eq!(
            encoding.address_of(*params[0].decl.get().unwrap()),
            Some(Address { level: 1, displacement: -2 })
        );
        assert_eq!(
            encoding.address_of(*params[1].decl.get().unwrap()),
            Some(Address { level: 1, displacement: -1 })
        );
        assert_eq!(encoding.entry_of(*decls[1].decl.get().unwrap()), Some(2));

        let lb = |d| Operand::new(Register::LB, d);
        let sb = |d| Operand::new(Register::SB, d);
        assert_eq!(encoding.instructions(), &[
            Instr::Push(1),
            Instr::Jump(Operand::code(12)),
            Instr::Push(1),
            Instr::Load { size: 1, addr: lb(-2) },
            Instr::Load { size: 1, addr: lb(3) },
            call(Primitive::Add),
            Instr::Load { size: 1, addr: sb(0) },
            call(Primitive::Add),
            Instr::Load { size: 1, addr: lb(-1) },
            Instr::StoreI(1),
            Instr::Pop { result: 0, count: 1 },
            Instr::Return { result: 0, args: 2 },
            Instr::LoadL(1),
            Instr::LoadA(sb(0)),
            Instr::Call { static_link: Register::SB, addr: Operand::code(2) },
            Instr::Pop { result: 0, count: 1 },
            Instr::Halt,
        ]);
    }

    #[test]
    fn addresses_are_deterministic() {
        let src = "let var a: array 2 of Integer; const c ~ a[0] + 1; \
                   func f(x: Integer): Integer ~ x * c in putint(f(2))";
        let (_, decls, first) = encoded(src, false);
        let (_, _, second) = encoded(src, false);
        assert_eq!(first.instructions(), second.instructions());
        for (id, decl) in decls.iter() {
            assert_eq!(first.entity(id), second.entity(id), "{}", decl.name);
            if decl.kind == DeclKind::Var {
                assert!(first.address_of(id).is_some());
            }
        }
    }

    #[test]
    fn every_expression_nets_its_size() {
        let src = "let type P ~ record x: Integer, y: Integer end; \
                   var ps: array 3 of P; var i: Integer; \
                   func dist(p: P): Integer ~ let const dx ~ p.x in if dx < 0 then -dx else dx; \
                   proc apply(func g(q: P): Integer, var r: Integer) ~ r := g(ps[i]) \
                   in begin \
                     ps := [{x ~ 1, y ~ 2}, {x ~ -3, y ~ 4}, {x ~ 5, y ~ 6}]; \
                     i := 1; \
                     apply(func dist, var i); \
                     putint(i + ord(chr(i))); \
                     puteol(); \
                     if ps[i] = ps[0] \\/ \\eol() then puteol() else putint(ps[i].y // 2) \
                   end";
        let (_, _, encoding) = encoded(src, false);
        assert!(encoding.exprs().len() > 20);
        for expr in encoding.exprs() {
            assert_eq!(
                encoding.stack_effect(expr.code.clone()),
                Some(expr.size),
                "{:?} at {:?}",
                &src[expr.span.clone()],
                expr.code
            );
        }
    }

    #[test]
    fn deep_nesting_is_a_restriction() {
        // v1 lives in p1's frame and is assigned from p8's, seven frames out
        let mut src = String::from("v1 := 1");
        for level in (1..=8).rev() {
            src = format!("let proc p{level}() ~ let var v{level}: Integer in {src} in p{level}()");
        }
        let mut program = parse(&src).unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        assert_eq!(reporter.error_count(), 0);
        encode(&program, &decls, &mut reporter).unwrap();
        assert!(matches!(reporter.errors(), [SemanticError::NestingTooDeep { .. }]));
    }

    fn restrictions(src: &str) -> Vec<SemanticError> {
        let mut program = parse(src).unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        assert_eq!(reporter.error_count(), 0);
        encode(&program, &decls, &mut reporter).unwrap();
        reporter.errors().to_vec()
    }

    #[test]
    fn oversized_types_are_a_restriction() {
        let src = "let var a: array 30000 of array 30000 of array 30000 of Integer in puteol()";
        let errors = restrictions(src);
        let [SemanticError::OperandTooLarge { value, .. }] = errors[..] else { panic!("{errors:?}") };
        assert_eq!(value, i64::MAX);

        let src = "let var a: array 300 of array 300 of Integer; var b: Integer in b := 1";
        let errors = restrictions(src);
        let [SemanticError::OperandTooLarge { value, .. }] = errors[..] else { panic!("{errors:?}") };
        assert_eq!(value, 90000);
    }

    #[test]
    fn wide_values_are_a_restriction() {
        let src = "let type Wide ~ record a: array 300 of Integer end; var r: Wide; var s: Wide \
                   in r := s";
        let errors = restrictions(src);
        assert!(!errors.is_empty());
        assert!(
            errors.iter().all(|error| matches!(error, SemanticError::OperandTooLarge { value: 300, .. })),
            "{errors:?}"
        );
    }

    #[test]
    fn long_programs_fill_the_code_store() {
        let src = format!("begin {} end", vec!["putint(1)"; 600].join("; "));
        let errors = restrictions(&src);
        assert!(matches!(errors[..], [SemanticError::CodeStoreFull { .. }]), "{errors:?}");
    }

    #[test]
    fn error_typed_trees_are_rejected() {
        let mut program = parse("putint(1 + 'a')").unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        assert!(reporter.has_errors());
        let err = encode(&program, &decls, &mut reporter).unwrap_err();
        assert!(matches!(err, InternalError::ErrorTyped { .. }), "{err:?}");
    }

    #[test]
    fn table_lists_program_declarations() {
        let src = "let const k ~ 3; var v: Integer; proc p(x: Integer) ~ v := x + k in p(1)";
        let (_, decls, encoding) = encoded(src, false);
        assert_eq!(encoding.table(&decls), "\
k            Const      value 3
v            Var        0[level 0]
p            Proc       2[CB] level 0
x            ValueParam -1[level 1]
");
    }

    #[test]
    fn unchecked_trees_are_rejected() {
        let program = parse("putint(1)").unwrap();
        let mut reporter = ErrorReporter::new();
        let err = encode(&program, &Decls::new(), &mut reporter).unwrap_err();
        assert!(matches!(err, InternalError::Undecorated { .. }));
    }
}
