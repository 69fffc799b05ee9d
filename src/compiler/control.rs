// Jvmgen Control Flow
// Branches, loops, non-local jumps and exception regions

use smallvec::SmallVec;

use super::emitter::Emitter;
use super::jump::{JumpScope, JumpTarget, LoopLabels, PendingEnsures};
use crate::ast::{LoopNode, Node, RescueNode};
use crate::bytecode::{Instruction, InvokeKind, Kind, Label};
use crate::error::{EmitResult, Fault};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LoopJump {
    Break,
    Next,
    Redo,
}

impl LoopJump {
    fn describe(self) -> &'static str {
        match self {
            LoopJump::Break => "break",
            LoopJump::Next => "next",
            LoopJump::Redo => "redo",
        }
    }
}

impl<'u, 'a> Emitter<'u, 'a> {
    // ==================== Branches ====================

    pub(super) fn compile_if(
        &mut self,
        node: &'a Node,
        condition: &'a Node,
        body: Option<&'a Node>,
        else_body: Option<&'a Node>,
        want_value: bool,
    ) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        let value = want_value && !ty.is_void();
        let method = self.method()?;
        let else_label = method.label();
        let done = method.label();

        if body.is_some() || value {
            self.jump_if_not(condition, else_label)?;
            self.compile_branch(body, value, &ty)?;
            let method = self.method()?;
            if method.reachable() {
                method.goto(done);
            }
            method.set(else_label);
            self.compile_branch(else_body, value, &ty)?;
        } else {
            // Nothing to run when the condition holds
            self.jump_if(condition, done)?;
            if let Some(else_body) = else_body {
                self.emit(else_body, false)?;
            }
        }
        let method = self.method()?;
        method.set(done);
        if want_value && !value {
            method.emit(Instruction::AconstNull);
        }
        Ok(())
    }

    fn compile_branch(&mut self, body: Option<&'a Node>, value: bool, ty: &Type) -> EmitResult<()> {
        match body {
            Some(body) if value => self.emit_as(body, ty),
            Some(body) => self.emit(body, false),
            None => {
                if value {
                    ty.init_value(self.method()?);
                }
                Ok(())
            }
        }
    }

    // ==================== Loops ====================

    pub(super) fn compile_loop(&mut self, parts: &'a LoopNode, want_value: bool) -> EmitResult<()> {
        let method = self.method()?;
        let labels = LoopLabels {
            break_label: method.label(),
            next_label: method.label(),
            redo_label: method.label(),
        };
        self.jumps.push(JumpScope::Loop(labels));
        let result = self.compile_loop_parts(parts, labels);
        self.jumps.pop();
        result?;
        if want_value {
            // Loops evaluate to null
            self.method()?.emit(Instruction::AconstNull);
        }
        Ok(())
    }

    fn compile_loop_parts(&mut self, parts: &'a LoopNode, labels: LoopLabels) -> EmitResult<()> {
        for init in &parts.init {
            self.emit(init, false)?;
        }
        let has_post = !parts.post.is_empty();

        if !parts.skip_first_check {
            if !has_post {
                self.method()?.set(labels.next_label);
            }
            self.test_loop_exit(parts, labels.break_label)?;
        }

        let method = self.method()?;
        let pre_label = method.label();
        method.set(pre_label);
        for pre in &parts.pre {
            self.emit(pre, false)?;
        }
        self.method()?.set(labels.redo_label);
        if let Some(body) = &parts.body {
            self.emit(body, false)?;
        }

        if parts.skip_first_check || has_post {
            self.method()?.set(labels.next_label);
            for post in &parts.post {
                self.emit(post, false)?;
            }
            if parts.negative {
                self.jump_if_not(&parts.condition, pre_label)?;
            } else {
                self.jump_if(&parts.condition, pre_label)?;
            }
        } else {
            self.method()?.goto(labels.next_label);
        }
        self.method()?.set(labels.break_label);
        Ok(())
    }

    /// Leave the loop when a `while` condition fails or an `until` condition holds
    fn test_loop_exit(&mut self, parts: &'a LoopNode, exit: Label) -> EmitResult<()> {
        if parts.negative {
            self.jump_if(&parts.condition, exit)
        } else {
            self.jump_if_not(&parts.condition, exit)
        }
    }

    // ==================== Jumps ====================

    /// A jump without a target: a diagnostic when the source position is
    /// known, a fault otherwise
    fn missing_target(&mut self, node: &Node, jump: &'static str, target: JumpTarget) -> EmitResult<()> {
        match node.span {
            Some(span) => {
                self.unit
                    .report(format!("{} outside of {}", jump, target.describe()), span);
                Ok(())
            }
            None => Err(Fault::NoJumpTarget {
                jump,
                target: target.describe(),
            }),
        }
    }

    pub(super) fn compile_loop_jump(&mut self, node: &'a Node, jump: LoopJump) -> EmitResult<()> {
        let Some(pending) = self.jumps.find_ensures(JumpTarget::Loop) else {
            return self.missing_target(node, jump.describe(), JumpTarget::Loop);
        };
        let labels = self
            .jumps
            .loop_labels(pending.target_depth)
            .ok_or_else(|| Fault::Internal("loop scope without labels".to_string()))?;
        let starts = self.run_ensures(&pending)?;
        let target = match jump {
            LoopJump::Break => labels.break_label,
            LoopJump::Next => labels.next_label,
            LoopJump::Redo => labels.redo_label,
        };
        self.method()?.goto(target);
        self.close_gaps(&pending, starts)
    }

    pub(super) fn compile_return(&mut self, node: &'a Node, value: Option<&'a Node>) -> EmitResult<()> {
        let Some(pending) = self.jumps.find_ensures(JumpTarget::Method) else {
            return self.missing_target(node, "return", JumpTarget::Method);
        };
        let return_type = self.frame()?.return_type.clone();
        match value {
            Some(value) if return_type.is_void() => self.emit(value, false)?,
            Some(value) => self.emit_as(value, &return_type)?,
            None => return_type.init_value(self.method()?),
        }

        if pending.ensures.is_empty() {
            return_type.ret(self.method()?);
            return Ok(());
        }
        // Park the value while the ensure clauses run
        let saved = match return_type.is_void() {
            true => None,
            false => {
                let method = self.method()?;
                let slot = method.temp_local(&return_type);
                return_type.store(method, slot)?;
                Some(slot)
            }
        };
        let starts = self.run_ensures(&pending)?;
        let method = self.method()?;
        if let Some(slot) = saved {
            return_type.load(method, slot)?;
        }
        return_type.ret(method);
        self.close_gaps(&pending, starts)
    }

    /// Inline every pending ensure clause, innermost first. Each clause is
    /// emitted with only the jump scopes outside it open. Returns the label
    /// where each clause's copy starts, in the same order.
    fn run_ensures(&mut self, pending: &PendingEnsures<'a>) -> EmitResult<SmallVec<[Label; 2]>> {
        let mut starts = SmallVec::new();
        for (depth, clause) in &pending.ensures {
            let method = self.method()?;
            let start = method.label();
            method.set(start);
            starts.push(start);
            let detached = self.jumps.split_off(*depth);
            let result = self.emit(*clause, false);
            self.jumps.restore(detached);
            result?;
        }
        Ok(starts)
    }

    /// Cut each ensure's own copy, and everything after it up to the jump,
    /// out of that ensure's protected region. Copies of inner clauses stay
    /// covered by the outer handlers.
    fn close_gaps(&mut self, pending: &PendingEnsures<'a>, starts: SmallVec<[Label; 2]>) -> EmitResult<()> {
        if starts.is_empty() {
            return Ok(());
        }
        let method = self.method()?;
        let end = method.label();
        method.set(end);
        for ((depth, _), start) in pending.ensures.iter().zip(starts) {
            self.jumps.record_gap(*depth, start, end);
        }
        Ok(())
    }

    // ==================== Exceptions ====================

    pub(super) fn compile_raise(&mut self, value: &'a Node) -> EmitResult<()> {
        let ty = self.node_type(value)?;
        let types = self.types();
        if ty == types.string() {
            let method = self.method()?;
            method.emit(Instruction::New("java/lang/RuntimeException".to_string()));
            method.emit(Instruction::Dup);
            self.emit(value, true)?;
            self.method()?.emit(Instruction::invoke(
                InvokeKind::Special,
                "java/lang/RuntimeException",
                "<init>",
                "(Ljava/lang/String;)V",
            ));
        } else if ty.is_meta() {
            // `raise SomeError` instantiates the class
            let class = ty.unmeta().internal_name();
            self.emit(value, false)?;
            let method = self.method()?;
            method.emit(Instruction::New(class.clone()));
            method.emit(Instruction::Dup);
            method.emit(Instruction::invoke(InvokeKind::Special, &class, "<init>", "()V"));
        } else {
            self.emit(value, true)?;
        }
        self.method()?.emit(Instruction::Athrow);
        Ok(())
    }

    pub(super) fn compile_rescue(&mut self, node: &'a Node, rescue: &'a RescueNode, want_value: bool) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        let value = want_value && !ty.is_void();
        let method = self.method()?;
        let start = method.label();
        let body_end = method.label();
        let done = method.label();

        method.set(start);
        let body_value = value && rescue.else_clause.is_none();
        self.compile_branch(Some(&rescue.body), body_value, &ty)?;
        let method = self.method()?;
        method.set(body_end);
        let empty = method.position(start) == Some(method.offset());

        if let Some(else_clause) = &rescue.else_clause {
            self.compile_branch(Some(else_clause), value, &ty)?;
        }
        let method = self.method()?;
        if method.reachable() {
            method.goto(done);
        }

        if empty {
            self.log.debug(format_args!("empty rescue region, no handlers"));
        } else {
            for clause in &rescue.clauses {
                let method = self.method()?;
                let handler = method.label();
                method.set(handler);
                let caught = match clause.types.is_empty() {
                    true => vec!["java.lang.Exception".to_string()],
                    false => clause.types.clone(),
                };
                for name in &caught {
                    let class = self.types().get(name)?.internal_name();
                    self.method()?.try_catch(start, body_end, handler, Some(class));
                }
                self.bind_exception(clause.id, clause.name.as_deref())?;
                self.compile_branch(Some(&clause.body), value, &ty)?;
                let method = self.method()?;
                if method.reachable() {
                    method.goto(done);
                }
            }
        }
        let method = self.method()?;
        method.set(done);
        if want_value && !value {
            method.emit(Instruction::AconstNull);
        }
        Ok(())
    }

    /// Store the caught exception (on the stack) into the clause variable
    fn bind_exception(&mut self, clause_id: crate::ast::NodeId, name: Option<&str>) -> EmitResult<()> {
        let Some(name) = name else {
            self.method()?.emit(Instruction::Pop);
            return Ok(());
        };
        let scopes = self.scopes;
        let scope = scopes
            .scope_for(clause_id)
            .ok_or_else(|| Fault::Internal("rescue clause was never scoped".to_string()))?;
        let ty = scope
            .local_type(name)
            .cloned()
            .ok_or_else(|| Fault::Internal(format!("rescue variable {} has no type", name)))?;
        if scope.is_captured(name) {
            let binding = self.load_binding()?;
            let field = self.capture_ref(&binding, name, &ty);
            let method = self.method()?;
            method.emit(Instruction::Swap);
            method.emit(Instruction::PutField(field));
            Ok(())
        } else {
            let slot = self.local_slot(scope.id, name, &ty)?;
            ty.store(self.method()?, slot)
        }
    }

    pub(super) fn compile_ensure(
        &mut self,
        node: &'a Node,
        body: &'a Node,
        clause: &'a Node,
        want_value: bool,
    ) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        let value = want_value && !ty.is_void();
        let method = self.method()?;
        let start = method.label();
        method.set(start);

        self.jumps.push(JumpScope::Ensure {
            clause,
            gaps: Vec::new(),
        });
        let result = self.compile_branch(Some(body), value, &ty);
        let scope = self.jumps.pop();
        result?;
        let gaps = match scope {
            Some(JumpScope::Ensure { gaps, .. }) => gaps,
            _ => return Err(Fault::Internal("jump scopes out of order".to_string())),
        };

        let method = self.method()?;
        let body_end = method.label();
        method.set(body_end);
        let ranges = protected_ranges(method, start, body_end, &gaps);

        if method.reachable() {
            self.emit(clause, false)?;
        }
        if ranges.is_empty() {
            self.log.debug(format_args!("empty ensure region, no handler"));
        } else {
            let method = self.method()?;
            let done = method.label();
            if method.reachable() {
                method.goto(done);
            }
            let handler = method.label();
            method.set(handler);
            for (from, to) in ranges {
                method.try_catch(from, to, handler, None);
            }
            let throwable = self.types().get("java.lang.Throwable")?;
            let method = self.method()?;
            let slot = method.temp_local(&throwable);
            method.emit(Instruction::Store(Kind::Ref, slot));
            self.emit(clause, false)?;
            let method = self.method()?;
            method.emit(Instruction::Load(Kind::Ref, slot));
            method.emit(Instruction::Athrow);
            method.set(done);
        }
        if want_value && !value {
            self.method()?.emit(Instruction::AconstNull);
        }
        Ok(())
    }
}

/// `[start, end)` minus the gaps, dropping ranges that cover no instruction
fn protected_ranges(
    method: &crate::bytecode::MethodBuilder,
    start: Label,
    end: Label,
    gaps: &[(Label, Label)],
) -> Vec<(Label, Label)> {
    let mut ranges = Vec::new();
    let mut from = start;
    for (gap_start, gap_end) in gaps {
        ranges.push((from, *gap_start));
        from = *gap_end;
    }
    ranges.push((from, end));
    ranges
        .into_iter()
        .filter(|(a, b)| match (method.position(*a), method.position(*b)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        })
        .collect()
}
