//! Walks an `embr-ast` syntax tree and emits an `embr-bytecode` `Module`.
//!
//! Every expression is compiled to leave exactly one value on the operand
//! stack; every statement is compiled to leave the stack exactly as it
//! found it (with one exception — see `compile_program`'s doc comment).
//! Keeping that discipline uniform is what lets `if`/`while`/object and
//! array literals/assignment all share the same few opcodes without extra
//! bookkeeping at each call site.

use std::rc::Rc;

use embr_ast::{
    BinaryOp, Expression, Literal, LogicalOp, MemberProperty, Program, PropertyKey, Statement,
    UnaryOp,
};
use embr_bytecode::{Constant, FunctionTemplate, Module, ModuleBuilder, Opcode};

use crate::error::{CompileError, CompileResult};

/// Tracks the back-patch sites a loop's `break`/`continue` need: `continue`
/// jumps straight to the loop's test, `break` jumps to just past the loop
/// (recorded as placeholder sites and patched once the loop's end offset is
/// known).
struct LoopContext {
    continue_target: usize,
    break_sites: Vec<usize>,
}

/// Lowers one syntax tree — a whole program, or a single function body —
/// into a bytecode [`Module`]. Nested function declarations/expressions
/// recurse into a fresh `Compiler` and come back as a constant-pool
/// [`FunctionTemplate`] (see `compile_function_value`).
pub struct Compiler {
    builder: ModuleBuilder,
    loops: Vec<LoopContext>,
}

impl Compiler {
    fn new() -> Self {
        Self {
            builder: ModuleBuilder::new(),
            loops: Vec::new(),
        }
    }

    /// Compile a whole top-level program. The final statement, if it is a
    /// bare expression statement, keeps its value on the stack instead of
    /// popping it — the program's completion value, the way a REPL reports
    /// the value of the last thing it evaluated. Every other statement form
    /// leaves the stack exactly as it found it, so the VM's "topmost stack
    /// value, or undefined if empty" termination rule still does the right
    /// thing when the program ends on a `return`-less declaration or loop.
    pub fn compile_program(program: &Program) -> CompileResult<Module> {
        tracing::debug!(statements = program.body.len(), "compiling program");
        let mut compiler = Compiler::new();
        compiler.builder.set_name("<script>");
        compiler.compile_body(&program.body, true)?;
        Ok(compiler.builder.build())
    }

    fn compile_function(
        name: Option<&str>,
        params: &[String],
        body: &[Statement],
    ) -> CompileResult<Module> {
        let mut compiler = Compiler::new();
        if let Some(name) = name {
            compiler.builder.set_name(name.to_string());
        }
        compiler.builder.set_parameter_count(params.len() as u32);
        compiler.compile_body(body, false)?;
        Ok(compiler.builder.build())
    }

    fn compile_body(&mut self, body: &[Statement], is_top_level: bool) -> CompileResult<()> {
        for (i, stmt) in body.iter().enumerate() {
            if is_top_level && i + 1 == body.len() {
                if let Statement::Expression(expr) = stmt {
                    self.compile_expression(expr)?;
                    continue;
                }
            }
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, stmt: &Statement) -> CompileResult<()> {
        match stmt {
            Statement::Expression(expr) => {
                self.compile_expression(expr)?;
                self.builder.emit_bare(Opcode::Pop);
            }
            Statement::VariableDeclaration { declarations, .. } => {
                for (name, init) in declarations {
                    match init {
                        Some(expr) => self.compile_expression(expr)?,
                        None => {
                            self.builder.emit_bare(Opcode::PushUndefined);
                        }
                    }
                    let idx = self.builder.add_string(name.clone());
                    self.builder.emit(Opcode::StoreVar, idx);
                }
            }
            Statement::FunctionDeclaration { name, params, body } => {
                self.compile_function_value(Some(name), params, body)?;
                let idx = self.builder.add_string(name.clone());
                self.builder.emit(Opcode::StoreVar, idx);
            }
            Statement::If {
                test,
                consequent,
                alternate,
            } => {
                self.compile_expression(test)?;
                let jump_to_else = self.builder.emit_jump_placeholder(Opcode::JumpIfFalse);
                self.compile_statement(consequent)?;
                match alternate {
                    Some(alternate) => {
                        let jump_to_end = self.builder.emit_jump_placeholder(Opcode::Jump);
                        self.builder.patch_jump(jump_to_else)?;
                        self.compile_statement(alternate)?;
                        self.builder.patch_jump(jump_to_end)?;
                    }
                    None => {
                        self.builder.patch_jump(jump_to_else)?;
                    }
                }
            }
            Statement::While { test, body } => {
                let start = self.builder.offset();
                self.compile_expression(test)?;
                let exit = self.builder.emit_jump_placeholder(Opcode::JumpIfFalse);
                self.loops.push(LoopContext {
                    continue_target: start,
                    break_sites: Vec::new(),
                });
                self.compile_statement(body)?;
                self.builder.emit(Opcode::Jump, start as u32);
                self.builder.patch_jump(exit)?;
                let ctx = self.loops.pop().expect("pushed immediately above");
                for site in ctx.break_sites {
                    self.builder.patch_jump(site)?;
                }
            }
            Statement::Return(expr) => {
                match expr {
                    Some(expr) => self.compile_expression(expr)?,
                    None => {
                        self.builder.emit_bare(Opcode::PushUndefined);
                    }
                }
                self.builder.emit_bare(Opcode::Return);
            }
            Statement::Break => {
                let site = self.builder.emit_jump_placeholder(Opcode::Jump);
                let ctx = self
                    .loops
                    .last_mut()
                    .ok_or(CompileError::BreakOutsideLoop)?;
                ctx.break_sites.push(site);
            }
            Statement::Continue => {
                let target = self
                    .loops
                    .last()
                    .ok_or(CompileError::ContinueOutsideLoop)?
                    .continue_target;
                self.builder.emit(Opcode::Jump, target as u32);
            }
            Statement::Block(body) => {
                self.compile_body(body, false)?;
            }
        }
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expression) -> CompileResult<()> {
        match expr {
            Expression::Literal(lit) => self.compile_literal(lit),
            Expression::Identifier(name) => {
                let idx = self.builder.add_string(name.clone());
                self.builder.emit(Opcode::LoadVar, idx);
            }
            Expression::Unary {
                op,
                argument,
                prefix,
            } => {
                if !*prefix {
                    return Err(CompileError::UnsupportedNode("postfix unary expression"));
                }
                self.compile_unary(*op, argument)?;
            }
            Expression::Binary { op, left, right } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.builder.emit_bare(binary_opcode(*op));
            }
            Expression::Logical { op, left, right } => {
                // Both operands are always evaluated: `&&`/`||` combine
                // `to_boolean` of each side through the AND/OR opcodes
                // rather than short-circuiting via a jump.
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.builder.emit_bare(match op {
                    LogicalOp::And => Opcode::And,
                    LogicalOp::Or => Opcode::Or,
                });
            }
            Expression::Assignment { target, value } => {
                self.compile_expression(value)?;
                self.compile_assignment_target(target)?;
            }
            Expression::Call { callee, arguments } => {
                self.compile_expression(callee)?;
                for arg in arguments {
                    self.compile_expression(arg)?;
                }
                self.builder.emit(Opcode::Call, arguments.len() as u32);
            }
            Expression::Member { object, property } => {
                self.compile_expression(object)?;
                match property {
                    MemberProperty::Dotted(name) => {
                        let idx = self.builder.add_string(name.clone());
                        self.builder.emit(Opcode::GetProp, idx);
                    }
                    MemberProperty::Computed(prop_expr) => {
                        self.compile_expression(prop_expr)?;
                        self.builder.emit_bare(Opcode::GetPropComputed);
                    }
                }
            }
            Expression::ArrayLiteral(elements) => {
                self.builder.emit(Opcode::NewArray, 0);
                for element in elements {
                    self.compile_expression(element)?;
                    self.builder.emit_bare(Opcode::ArrayPush);
                }
            }
            Expression::ObjectLiteral(props) => {
                self.builder.emit_bare(Opcode::NewObject);
                for (key, value) in props {
                    // SET_PROP pops [value, object] and pushes the value
                    // back (the shape assignment wants), not the object —
                    // so a literal must keep its own reference to the
                    // object around a write: Dup it, push the value, Swap
                    // so the object is on top for SET_PROP, then Pop the
                    // value SET_PROP hands back, leaving the object as the
                    // only thing this iteration added to the stack.
                    self.builder.emit_bare(Opcode::Dup);
                    self.compile_expression(value)?;
                    self.builder.emit_bare(Opcode::Swap);
                    let idx = self.builder.add_string(property_key_name(key));
                    self.builder.emit(Opcode::SetProp, idx);
                    self.builder.emit_bare(Opcode::Pop);
                }
            }
            Expression::FunctionExpression { name, params, body } => {
                self.compile_function_value(name.as_deref(), params, body)?;
            }
        }
        Ok(())
    }

    /// Compile the left-hand side of an assignment whose right-hand value
    /// has already been pushed. Identifier targets just `STORE_VAR`; member
    /// targets compile the object (and property, if computed) on top of
    /// that value and emit the matching `SET_PROP*` opcode.
    fn compile_assignment_target(&mut self, target: &Expression) -> CompileResult<()> {
        match target {
            Expression::Identifier(name) => {
                let idx = self.builder.add_string(name.clone());
                self.builder.emit(Opcode::StoreVar, idx);
            }
            Expression::Member { object, property } => {
                self.compile_expression(object)?;
                match property {
                    MemberProperty::Dotted(name) => {
                        let idx = self.builder.add_string(name.clone());
                        self.builder.emit(Opcode::SetProp, idx);
                    }
                    MemberProperty::Computed(prop_expr) => {
                        self.compile_expression(prop_expr)?;
                        self.builder.emit_bare(Opcode::SetPropComputed);
                    }
                }
            }
            _ => return Err(CompileError::InvalidAssignmentTarget),
        }
        Ok(())
    }

    fn compile_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Undefined => {
                self.builder.emit_bare(Opcode::PushUndefined);
            }
            Literal::Null => {
                self.builder.emit_bare(Opcode::PushNull);
            }
            Literal::Boolean(true) => {
                self.builder.emit_bare(Opcode::PushTrue);
            }
            Literal::Boolean(false) => {
                self.builder.emit_bare(Opcode::PushFalse);
            }
            Literal::Number(n) => {
                let idx = self.builder.add_constant(Constant::Number(*n));
                self.builder.emit(Opcode::LoadConst, idx);
            }
            Literal::String(s) => {
                let str_idx = self.builder.add_string(s.clone());
                let const_idx = self.builder.add_constant(Constant::String(str_idx));
                self.builder.emit(Opcode::LoadConst, const_idx);
            }
        }
    }

    fn compile_unary(&mut self, op: UnaryOp, argument: &Expression) -> CompileResult<()> {
        if op == UnaryOp::Void {
            // `void expr` always evaluates to undefined, but still runs
            // the argument for its side effects.
            self.compile_expression(argument)?;
            self.builder.emit_bare(Opcode::Pop);
            self.builder.emit_bare(Opcode::PushUndefined);
            return Ok(());
        }
        self.compile_expression(argument)?;
        let opcode = match op {
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Plus => Opcode::Plus,
            UnaryOp::Not => Opcode::Not,
            UnaryOp::BitNot => Opcode::BitNot,
            UnaryOp::Typeof => Opcode::Typeof,
            UnaryOp::Void => unreachable!("handled above"),
        };
        self.builder.emit_bare(opcode);
        Ok(())
    }

    /// Compile a function declaration/expression's body into its own
    /// module, wrap it as a `FunctionTemplate` constant, and emit the
    /// `LOAD_CONST` that turns it into a callable value. `closure_scope` is
    /// left unset — this VM has no lexical scoping, so every function reads
    /// and writes through the same global object (see the design notes on
    /// closures being an extension point, not mandatory semantics).
    fn compile_function_value(
        &mut self,
        name: Option<&str>,
        params: &[String],
        body: &[Statement],
    ) -> CompileResult<()> {
        let module = Compiler::compile_function(name, params, body)?;
        let template = FunctionTemplate {
            name: name.map(str::to_string),
            params: params.to_vec(),
            module: Rc::new(module),
        };
        let idx = self
            .builder
            .add_constant(Constant::Function(Rc::new(template)));
        self.builder.emit(Opcode::LoadConst, idx);
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
    }
}

/// Object literal keys are always static in this grammar (no computed
/// keys), so they lower directly to a string-pool entry. Numeric keys use
/// the same integer-trimming convention as `format_number` for whole
/// numbers, without pulling in `embr-value` just for this.
fn property_key_name(key: &PropertyKey) -> String {
    match key {
        PropertyKey::Identifier(name) | PropertyKey::String(name) => name.clone(),
        PropertyKey::Number(n) => {
            if n.is_finite() && n.fract() == 0.0 {
                format!("{}", *n as i64)
            } else {
                n.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embr_ast::Parser;
    use embr_bytecode::Opcode;

    fn compile(source: &str) -> Module {
        let program = Parser::parse_program(source).expect("parse");
        Compiler::compile_program(&program).expect("compile")
    }

    #[test]
    fn arithmetic_expression_lowers_to_postfix_opcode_order() {
        let module = compile("1 + 2 * 3;");
        let ops: Vec<Opcode> = module.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadConst,
                Opcode::LoadConst,
                Opcode::LoadConst,
                Opcode::Mul,
                Opcode::Add,
            ]
        );
        module.validate().expect("valid bytecode");
    }

    #[test]
    fn last_top_level_expression_statement_keeps_its_value() {
        let module = compile("var x = 1; x");
        assert_eq!(module.instructions.last().unwrap().opcode, Opcode::LoadVar);
    }

    #[test]
    fn if_without_else_patches_forward_jump_past_consequent() {
        let module = compile("if (true) { 1; }");
        let jump = module
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::JumpIfFalse)
            .unwrap();
        assert_eq!(jump.operand as usize, module.instructions.len());
        module.validate().expect("valid bytecode");
    }

    #[test]
    fn while_loop_back_edge_targets_the_test() {
        let module = compile("while (x) { x = x - 1; }");
        let back_edge = module
            .instructions
            .iter()
            .rev()
            .find(|i| i.opcode == Opcode::Jump)
            .unwrap();
        assert_eq!(back_edge.operand, 0);
        module.validate().expect("valid bytecode");
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let program = Parser::parse_program("break;").expect("parse");
        assert!(matches!(
            Compiler::compile_program(&program),
            Err(CompileError::BreakOutsideLoop)
        ));
    }

    #[test]
    fn function_declaration_embeds_a_nested_module() {
        let module = compile("function add(a, b) { return a + b; }");
        let has_function_constant = (0..module.constants.len()).any(|i| {
            matches!(
                module.constant(i as u32),
                Some(Constant::Function(_))
            )
        });
        assert!(has_function_constant);
    }

    #[test]
    fn object_literal_builds_then_assigns_each_property() {
        let module = compile("({ a: 1, b: 2 });");
        let ops: Vec<Opcode> = module.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(ops[0], Opcode::NewObject);
        assert_eq!(ops.iter().filter(|o| **o == Opcode::SetProp).count(), 2);
        module.validate().expect("valid bytecode");
    }
}
