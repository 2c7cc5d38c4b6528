//! Expression and statement interpreter
//!
//! A small JavaScript-flavoured interpreter over the parser's AST. Identifier
//! lookup goes through the scope chain first, then the registry's globals and
//! namespaces. Member access on items evaluates the item's property through
//! the [`Evaluator`].

use std::sync::Arc;

use indexmap::IndexMap;
use rqbs_parser::{AssignOp, BinaryOp, Block, Expr, ExprKind, FunctionBody, Stmt, StmtKind, UnaryOp};

use crate::error::{LangError, LangResult};
use crate::evaluator::Evaluator;
use crate::scope::{Scope, ScopeRef};
use crate::variant::{Function, VmValue};

/// Completion of a statement
enum Flow {
    Normal,
    Return(VmValue),
}

impl Evaluator<'_> {
    /// Evaluate an expression in a scope
    pub fn eval_expr(&self, expr: &Expr, scope: &ScopeRef) -> LangResult<VmValue> {
        // Check recursion depth
        let current_depth = self.depth.get();
        if current_depth >= self.max_depth {
            return Err(LangError::StackOverflow);
        }
        self.depth.set(current_depth + 1);
        let result = self.eval_expr_inner(expr, scope);
        self.depth.set(current_depth);
        result
    }

    fn eval_expr_inner(&self, expr: &Expr, scope: &ScopeRef) -> LangResult<VmValue> {
        match &expr.kind {
            // Literals
            ExprKind::Undefined => Ok(VmValue::Undefined),
            ExprKind::Null => Ok(VmValue::Null),
            ExprKind::Bool(b) => Ok(VmValue::Boolean(*b)),
            ExprKind::Int(i) => Ok(VmValue::Int(*i)),
            ExprKind::Float(f) => Ok(VmValue::Float(*f)),
            ExprKind::String(s) => Ok(VmValue::string(s.as_str())),
            ExprKind::Array(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval_expr(e, scope))
                    .collect::<LangResult<Vec<_>>>()?;
                Ok(VmValue::list(values))
            }
            ExprKind::Object(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval_expr(value, scope)?);
                }
                Ok(VmValue::object(map))
            }

            ExprKind::Identifier(name) => self.resolve_identifier(name, scope),
            ExprKind::Member { base, member } => {
                let base = self.eval_expr(base, scope)?;
                self.get_member(&base, &member.node, scope)
            }
            ExprKind::Index { base, index } => {
                let base = self.eval_expr(base, scope)?;
                let index = self.eval_expr(index, scope)?;
                self.eval_subscript(&base, &index, scope)
            }
            ExprKind::Call { callee, args } => {
                let callee = self.eval_expr(callee, scope)?;
                let args = args
                    .iter()
                    .map(|e| self.eval_expr(e, scope))
                    .collect::<LangResult<Vec<_>>>()?;
                self.call_function(&callee, args, scope)
            }

            ExprKind::Unary { op, operand } => {
                if *op == UnaryOp::TypeOf {
                    return self.eval_typeof(operand, scope);
                }
                let value = self.eval_expr(operand, scope)?;
                self.eval_unary_op(*op, value)
            }
            ExprKind::Binary { op, left, right } => self.eval_binary_op(*op, left, right, scope),
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                if self.eval_expr(condition, scope)?.is_truthy() {
                    self.eval_expr(then_expr, scope)
                } else {
                    self.eval_expr(else_expr, scope)
                }
            }
            ExprKind::Function { params, body } => {
                Ok(VmValue::Function(Arc::new(Function::Closure {
                    name: None,
                    params: params.clone(),
                    body: Arc::new(body.clone()),
                    scope: Arc::clone(scope),
                })))
            }
        }
    }

    fn resolve_identifier(&self, name: &str, scope: &ScopeRef) -> LangResult<VmValue> {
        if let Some(value) = scope.lookup(name, self)? {
            return Ok(value);
        }
        if let Some(global) = self.externals().get_global(name) {
            return Ok(VmValue::external(name, Arc::clone(global)));
        }
        if self.externals().has_namespace(name) {
            return Ok(self.externals().namespace_object(name));
        }
        Err(LangError::undefined_var(name))
    }

    /// `typeof` does not fail on unknown identifiers
    fn eval_typeof(&self, operand: &Expr, scope: &ScopeRef) -> LangResult<VmValue> {
        let value = match &operand.kind {
            ExprKind::Identifier(name) => match self.resolve_identifier(name, scope) {
                Ok(value) => value,
                Err(LangError::UndefinedVariable(_)) => VmValue::Undefined,
                Err(e) => return Err(e),
            },
            _ => self.eval_expr(operand, scope)?,
        };
        Ok(VmValue::string(value.typeof_name()))
    }

    // =========================================================================
    // Member access and subscripts
    // =========================================================================

    fn get_member(&self, base: &VmValue, member: &str, scope: &ScopeRef) -> LangResult<VmValue> {
        if base.is_nullish() {
            return Err(LangError::type_error(
                format!("object (reading '{}')", member),
                base.typeof_name(),
            ));
        }

        // Check external properties first
        if let Some(ext_fn) = self.externals().get_property(base.type_name(), member) {
            return ext_fn(std::slice::from_ref(base), self, scope);
        }

        match base {
            VmValue::Item(item) => {
                if let Some(value) = self.item_member(*item, member)? {
                    return Ok(value);
                }
            }
            VmValue::Object(entries) => {
                if let Some(value) = entries.get(member) {
                    return Ok(value.clone());
                }
            }
            VmValue::String(s) if member == "length" => {
                return Ok(VmValue::Int(s.chars().count() as i64));
            }
            VmValue::List(items) if member == "length" => {
                return Ok(VmValue::Int(items.len() as i64));
            }
            _ => {}
        }

        if let Some(method) = self.externals().get_method(base.type_name(), member) {
            return Ok(VmValue::Function(Arc::new(Function::External {
                name: member.to_string(),
                func: Arc::clone(method),
                this: Some(base.clone()),
            })));
        }
        Ok(VmValue::Undefined)
    }

    fn eval_subscript(&self, base: &VmValue, index: &VmValue, scope: &ScopeRef) -> LangResult<VmValue> {
        match (base, index) {
            (VmValue::List(list), _) => {
                let idx = index
                    .as_int()
                    .ok_or_else(|| LangError::type_error("Number", index.type_name()))?;
                if idx < 0 || idx >= list.len() as i64 {
                    Err(LangError::IndexOutOfBounds {
                        index: idx,
                        length: list.len(),
                    })
                } else {
                    Ok(list[idx as usize].clone())
                }
            }
            (VmValue::String(s), VmValue::Int(_) | VmValue::Float(_)) => {
                let idx = index
                    .as_int()
                    .ok_or_else(|| LangError::type_error("integer", index.type_name()))?;
                Ok(usize::try_from(idx)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| VmValue::string(c.to_string()))
                    .unwrap_or(VmValue::Undefined))
            }
            (VmValue::Object(_) | VmValue::Item(_) | VmValue::String(_), _) => {
                self.get_member(base, &index.to_string(), scope)
            }
            _ => Err(LangError::type_error("List, String or Object", base.type_name())),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call a function value with evaluated arguments
    pub fn call_function(
        &self,
        callee: &VmValue,
        args: Vec<VmValue>,
        scope: &ScopeRef,
    ) -> LangResult<VmValue> {
        let VmValue::Function(function) = callee else {
            return Err(LangError::NotCallable(callee.type_name().to_string()));
        };
        match function.as_ref() {
            Function::Closure {
                params,
                body,
                scope: captured,
                ..
            } => {
                // Missing arguments are undefined, extra ones are ignored
                let mut args = args.into_iter();
                let bindings = params
                    .iter()
                    .map(|p| (p.node.clone(), args.next().unwrap_or(VmValue::Undefined)))
                    .collect();
                let call_scope = Scope::with_locals(captured, bindings);
                match body.as_ref() {
                    FunctionBody::Expr(expr) => self.eval_expr(expr, &call_scope),
                    FunctionBody::Block(block) => self.run_function_block(block, &call_scope),
                }
            }
            Function::External { func, this, .. } => match this {
                Some(receiver) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(receiver.clone());
                    full.extend(args);
                    func(&full, self, scope)
                }
                None => func(&args, self, scope),
            },
        }
    }

    /// Run a binding's statement block in its own local frame
    pub(crate) fn call_block(&self, block: &Block, scope: &ScopeRef) -> LangResult<VmValue> {
        let local = Scope::with_locals(scope, Vec::new());
        self.run_function_block(block, &local)
    }

    fn run_function_block(&self, block: &Block, scope: &ScopeRef) -> LangResult<VmValue> {
        match self.exec_block(block, scope)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(VmValue::Undefined),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec_block(&self, block: &Block, scope: &ScopeRef) -> LangResult<Flow> {
        for stmt in &block.statements {
            if let Flow::Return(value) = self.exec_stmt(stmt, scope)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, scope: &ScopeRef) -> LangResult<Flow> {
        match &stmt.kind {
            StmtKind::Var { name, init } => {
                let value = match init {
                    Some(init) => self.eval_expr(init, scope)?,
                    None => VmValue::Undefined,
                };
                scope.declare(&name.node, value)?;
            }
            StmtKind::Assign { name, op, value } => {
                let rhs = self.eval_expr(value, scope)?;
                let new_value = match op {
                    AssignOp::Assign => rhs,
                    AssignOp::AddAssign => {
                        let current = self.resolve_identifier(&name.node, scope)?;
                        self.eval_add(&current, &rhs)?
                    }
                    AssignOp::SubAssign => {
                        let current = self.resolve_identifier(&name.node, scope)?;
                        self.eval_arithmetic(BinaryOp::Sub, &current, &rhs)?
                    }
                };
                if !scope.assign(&name.node, new_value) {
                    return Err(LangError::undefined_var(&name.node));
                }
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_expr(condition, scope)?.is_truthy() {
                    return self.exec_stmt(then_branch, scope);
                } else if let Some(else_branch) = else_branch {
                    return self.exec_stmt(else_branch, scope);
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, scope)?,
                    None => VmValue::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Block(block) => return self.exec_block(block, scope),
            StmtKind::Expr(expr) => {
                self.eval_expr(expr, scope)?;
            }
            StmtKind::Empty => {}
        }
        Ok(Flow::Normal)
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn eval_unary_op(&self, op: UnaryOp, value: VmValue) -> LangResult<VmValue> {
        match op {
            UnaryOp::Not => Ok(VmValue::Boolean(!value.is_truthy())),
            UnaryOp::Neg => match value {
                VmValue::Int(i) => Ok(i
                    .checked_neg()
                    .map(VmValue::Int)
                    .unwrap_or(VmValue::Float(-(i as f64)))),
                VmValue::Float(f) => Ok(VmValue::Float(-f)),
                other => Err(LangError::type_error("Number", other.type_name())),
            },
            UnaryOp::Plus => match &value {
                VmValue::Int(_) | VmValue::Float(_) => Ok(value),
                other => other
                    .to_number()
                    .map(number_value)
                    .ok_or_else(|| LangError::type_error("Number", other.type_name())),
            },
            UnaryOp::TypeOf => Ok(VmValue::string(value.typeof_name())),
        }
    }

    fn eval_binary_op(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &ScopeRef,
    ) -> LangResult<VmValue> {
        // Short-circuit evaluation; the operand itself is the result
        match op {
            BinaryOp::And => {
                let l = self.eval_expr(left, scope)?;
                if !l.is_truthy() {
                    return Ok(l);
                }
                return self.eval_expr(right, scope);
            }
            BinaryOp::Or => {
                let l = self.eval_expr(left, scope)?;
                if l.is_truthy() {
                    return Ok(l);
                }
                return self.eval_expr(right, scope);
            }
            _ => {}
        }

        let lval = self.eval_expr(left, scope)?;
        let rval = self.eval_expr(right, scope)?;

        match op {
            BinaryOp::Add => self.eval_add(&lval, &rval),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.eval_arithmetic(op, &lval, &rval)
            }
            BinaryOp::Eq => Ok(VmValue::Boolean(lval.loose_eq(&rval))),
            BinaryOp::Ne => Ok(VmValue::Boolean(!lval.loose_eq(&rval))),
            BinaryOp::StrictEq => Ok(VmValue::Boolean(lval.strict_eq(&rval))),
            BinaryOp::StrictNe => Ok(VmValue::Boolean(!lval.strict_eq(&rval))),
            BinaryOp::Lt => self.eval_comparison(&lval, &rval, |ord| ord.is_lt()),
            BinaryOp::Le => self.eval_comparison(&lval, &rval, |ord| ord.is_le()),
            BinaryOp::Gt => self.eval_comparison(&lval, &rval, |ord| ord.is_gt()),
            BinaryOp::Ge => self.eval_comparison(&lval, &rval, |ord| ord.is_ge()),
            BinaryOp::And | BinaryOp::Or => unreachable!(), // Handled above
        }
    }

    /// `+`: string concatenation if either side is a string, else numeric
    fn eval_add(&self, l: &VmValue, r: &VmValue) -> LangResult<VmValue> {
        match (l, r) {
            (VmValue::String(_), _) | (_, VmValue::String(_)) => {
                Ok(VmValue::string(format!("{}{}", l, r)))
            }
            (VmValue::List(_), _) | (_, VmValue::List(_)) => {
                Ok(VmValue::string(format!("{}{}", l, r)))
            }
            _ => self.eval_arithmetic(BinaryOp::Add, l, r),
        }
    }

    fn eval_arithmetic(&self, op: BinaryOp, l: &VmValue, r: &VmValue) -> LangResult<VmValue> {
        if let (VmValue::Int(a), VmValue::Int(b)) = (l, r) {
            let (a, b) = (*a, *b);
            let exact = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => return Err(LangError::DivisionByZero),
                BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
                BinaryOp::Div => None,
                BinaryOp::Mod => a.checked_rem(b),
                _ => None,
            };
            if let Some(result) = exact {
                return Ok(VmValue::Int(result));
            }
        }

        let (Some(a), Some(b)) = (numeric_operand(l), numeric_operand(r)) else {
            return Err(LangError::type_error(
                "Number",
                format!("{} {} {}", l.type_name(), op.as_str(), r.type_name()),
            ));
        };
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Err(LangError::DivisionByZero),
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
            _ => {
                return Err(LangError::InvalidOperation(format!(
                    "'{}' is not an arithmetic operator",
                    op.as_str()
                )))
            }
        };
        Ok(VmValue::Float(result))
    }

    fn eval_comparison<F>(&self, l: &VmValue, r: &VmValue, f: F) -> LangResult<VmValue>
    where
        F: Fn(std::cmp::Ordering) -> bool,
    {
        match l.partial_cmp(r) {
            Some(ord) => Ok(VmValue::Boolean(f(ord))),
            None if l.to_number().is_some() && r.to_number().is_some() => {
                // NaN compares false in every direction
                Ok(VmValue::Boolean(false))
            }
            None => Err(LangError::type_error(
                "comparable values",
                format!("{} and {}", l.type_name(), r.type_name()),
            )),
        }
    }
}

/// Numbers and booleans take part in arithmetic; everything else is an error
fn numeric_operand(value: &VmValue) -> Option<f64> {
    match value {
        VmValue::Int(_) | VmValue::Float(_) | VmValue::Boolean(_) | VmValue::Null => {
            value.to_number()
        }
        _ => None,
    }
}

fn number_value(n: f64) -> VmValue {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        VmValue::Int(n as i64)
    } else {
        VmValue::Float(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ExternalRegistry;
    use crate::pool::ItemPool;
    use pretty_assertions::assert_eq;

    fn eval(source: &str) -> LangResult<VmValue> {
        let pool = ItemPool::new();
        let evaluator = Evaluator::new(&pool, Arc::new(ExternalRegistry::new()));
        evaluator.evaluate_expression(source)
    }

    fn eval_ok(source: &str) -> VmValue {
        eval(source).unwrap_or_else(|e| panic!("{}: {}", source, e))
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval_ok("1 + 2 * 3"), VmValue::Int(7));
        assert_eq!(eval_ok("7 / 2"), VmValue::Float(3.5));
        assert_eq!(eval_ok("8 / 2"), VmValue::Int(4));
        assert_eq!(eval_ok("7 % 3"), VmValue::Int(1));
        assert_eq!(eval_ok("-(2 - 5)"), VmValue::Int(3));
        assert!(matches!(eval("1 / 0"), Err(LangError::DivisionByZero)));
        assert!(matches!(eval("[1] - 1"), Err(LangError::TypeError { .. })));
    }

    #[test]
    fn strings_and_equality() {
        assert_eq!(eval_ok("'a' + 1 + 2"), VmValue::string("a12"));
        assert_eq!(eval_ok("1 + 2 + 'a'"), VmValue::string("3a"));
        assert_eq!(eval_ok("'1' == 1"), VmValue::Boolean(true));
        assert_eq!(eval_ok("'1' === 1"), VmValue::Boolean(false));
        assert_eq!(eval_ok("null == undefined"), VmValue::Boolean(true));
        assert_eq!(eval_ok("'abc'.length"), VmValue::Int(3));
        assert_eq!(eval_ok("'b' < 'c'"), VmValue::Boolean(true));
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(eval_ok("0 || 'x'"), VmValue::string("x"));
        assert_eq!(eval_ok("'a' && 'b'"), VmValue::string("b"));
        assert_eq!(eval_ok("!''"), VmValue::Boolean(true));
        assert_eq!(eval_ok("typeof missing"), VmValue::string("undefined"));
        assert_eq!(eval_ok("typeof [1]"), VmValue::string("object"));
    }

    #[test]
    fn closures_and_calls() {
        assert_eq!(eval_ok("(x => x * 2)(21)"), VmValue::Int(42));
        assert_eq!(
            eval_ok("(function (a, b) { var s = a; s += b; return s; })(1, 2)"),
            VmValue::Int(3)
        );
        assert_eq!(eval_ok("((a, b) => b)(1)"), VmValue::Undefined);
        assert!(matches!(eval("(1)(2)"), Err(LangError::NotCallable(_))));
    }

    #[test]
    fn member_and_index_access() {
        assert_eq!(eval_ok("({a: {b: [1, 2]}}).a.b[1]"), VmValue::Int(2));
        assert_eq!(eval_ok("({a: 1})['a']"), VmValue::Int(1));
        assert_eq!(eval_ok("({a: 1}).missing"), VmValue::Undefined);
        assert_eq!(eval_ok("'abc'[1]"), VmValue::string("b"));
        assert!(matches!(
            eval("[1, 2][5]"),
            Err(LangError::IndexOutOfBounds { index: 5, length: 2 })
        ));
        assert!(matches!(eval("undefined.x"), Err(LangError::TypeError { .. })));
    }

    #[test]
    fn undefined_identifier() {
        assert!(matches!(eval("nope"), Err(LangError::UndefinedVariable(_))));
    }

    #[test]
    fn runaway_recursion_overflows() {
        // Deep recursion needs more than the default test thread stack
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let pool = ItemPool::new();
                let evaluator = Evaluator::new(&pool, Arc::new(ExternalRegistry::new()));
                let scope = Scope::with_locals(&Scope::new(), Vec::new());
                let f = evaluator
                    .eval_expr(
                        &rqbs_parser::parse_expression("function (n) { return f(n + 1); }")
                            .unwrap(),
                        &scope,
                    )
                    .unwrap();
                scope.declare("f", f.clone()).unwrap();
                matches!(
                    evaluator.call_function(&f, vec![VmValue::Int(0)], &scope),
                    Err(LangError::StackOverflow)
                )
            })
            .unwrap();
        assert!(handle.join().unwrap());
    }
}
