//! Parser implementation: converts pest output to AST

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::error::{ParseError, ParseResult};

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct RqbsParser;

/// Parse an item file (imports followed by one root item)
pub fn parse_file(source: &str) -> ParseResult<File> {
    let pairs = RqbsParser::parse(Rule::file, source)?;
    let pair = pairs.into_iter().next().unwrap();
    build_file(pair)
}

/// Parse a script file consisting of function declarations
pub fn parse_script(source: &str) -> ParseResult<Script> {
    let pairs = RqbsParser::parse(Rule::script_file, source)?;
    let pair = pairs.into_iter().next().unwrap();
    let span = span_from_pair(&pair);
    let mut functions = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::function_decl {
            functions.push(build_function_decl(inner)?);
        }
    }
    Ok(Script { functions, span })
}

/// Parse a single expression (requires full input consumption)
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let pairs = RqbsParser::parse(Rule::standalone_expression, source)?;
    let pair = pairs.into_iter().next().unwrap();
    let inner = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::expression)
        .unwrap();
    build_expression(inner)
}

// =============================================================================
// Helper functions
// =============================================================================

fn span_from_pair(pair: &Pair<Rule>) -> Span {
    let pest_span = pair.as_span();
    Span::new(pest_span.start(), pest_span.end())
}

fn build_identifier(pair: Pair<Rule>) -> Identifier {
    Identifier::new(pair.as_str().to_string(), span_from_pair(&pair))
}

fn build_qualified_ident(pair: Pair<Rule>) -> QualifiedIdent {
    debug_assert_eq!(pair.as_rule(), Rule::qualified_ident);
    QualifiedIdent {
        parts: pair.into_inner().map(build_identifier).collect(),
    }
}

fn build_param_list(pair: Pair<Rule>) -> Vec<Identifier> {
    debug_assert_eq!(pair.as_rule(), Rule::param_list);
    pair.into_inner().map(build_identifier).collect()
}

// =============================================================================
// File and item building
// =============================================================================

fn build_file(pair: Pair<Rule>) -> ParseResult<File> {
    debug_assert_eq!(pair.as_rule(), Rule::file);
    let span = span_from_pair(&pair);

    let mut imports = Vec::new();
    let mut root = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::import_stmt => imports.push(build_import(inner)?),
            Rule::item_def => root = Some(build_item_def(inner)?),
            _ => {}
        }
    }

    Ok(File {
        imports,
        root: root.unwrap(),
        span,
    })
}

fn build_import(pair: Pair<Rule>) -> ParseResult<Import> {
    debug_assert_eq!(pair.as_rule(), Rule::import_stmt);
    let span = span_from_pair(&pair);

    let mut kind = None;
    let mut version = None;
    let mut alias = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::string_literal => kind = Some(ImportKind::Path(build_string_literal(inner)?)),
            Rule::qualified_ident => {
                kind = Some(ImportKind::Namespace(build_qualified_ident(inner)));
            }
            Rule::version_number => version = Some(inner.as_str().to_string()),
            Rule::import_alias => {
                let ident = inner
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::identifier)
                    .unwrap();
                alias = Some(build_identifier(ident));
            }
            _ => {}
        }
    }

    Ok(Import {
        kind: kind.unwrap(),
        version,
        alias,
        span,
    })
}

fn build_item_def(pair: Pair<Rule>) -> ParseResult<ItemDef> {
    debug_assert_eq!(pair.as_rule(), Rule::item_def);
    let span = span_from_pair(&pair);
    let mut inner = pair.into_inner();
    let type_name = build_qualified_ident(inner.next().unwrap());

    let mut members = Vec::new();
    for member in inner {
        match member.as_rule() {
            Rule::property_decl => {
                members.push(ItemMember::PropertyDecl(build_property_decl(member)?))
            }
            Rule::binding => members.push(ItemMember::Binding(build_binding(member)?)),
            Rule::item_def => members.push(ItemMember::Child(build_item_def(member)?)),
            _ => {}
        }
    }

    Ok(ItemDef {
        type_name,
        members,
        span,
    })
}

fn build_property_decl(pair: Pair<Rule>) -> ParseResult<PropertyDecl> {
    debug_assert_eq!(pair.as_rule(), Rule::property_decl);
    let span = span_from_pair(&pair);

    let mut readonly = false;
    let mut type_name = None;
    let mut name = None;
    let mut value = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::readonly_kw => readonly = true,
            Rule::property_type => type_name = Some(build_identifier(inner)),
            Rule::identifier => name = Some(build_identifier(inner)),
            Rule::binding_value => value = Some(build_binding_value(inner)?),
            _ => {}
        }
    }

    Ok(PropertyDecl {
        readonly,
        type_name: type_name.unwrap(),
        name: name.unwrap(),
        value,
        span,
    })
}

fn build_binding(pair: Pair<Rule>) -> ParseResult<Binding> {
    debug_assert_eq!(pair.as_rule(), Rule::binding);
    let span = span_from_pair(&pair);
    let mut inner = pair.into_inner();
    let name = build_qualified_ident(inner.next().unwrap());
    let value = build_binding_value(inner.next().unwrap())?;
    Ok(Binding { name, value, span })
}

fn build_binding_value(pair: Pair<Rule>) -> ParseResult<BindingValue> {
    debug_assert_eq!(pair.as_rule(), Rule::binding_value);
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::block => Ok(BindingValue::Block(build_block(inner)?)),
        Rule::expression => Ok(BindingValue::Expr(build_expression(inner)?)),
        _ => unreachable!("unexpected binding value: {:?}", inner.as_rule()),
    }
}

// =============================================================================
// Statement building
// =============================================================================

fn build_function_decl(pair: Pair<Rule>) -> ParseResult<FunctionDecl> {
    debug_assert_eq!(pair.as_rule(), Rule::function_decl);
    let span = span_from_pair(&pair);

    let mut name = None;
    let mut params = Vec::new();
    let mut body = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => name = Some(build_identifier(inner)),
            Rule::param_list => params = build_param_list(inner),
            Rule::block => body = Some(build_block(inner)?),
            _ => {}
        }
    }

    Ok(FunctionDecl {
        name: name.unwrap(),
        params,
        body: body.unwrap(),
        span,
    })
}

fn build_block(pair: Pair<Rule>) -> ParseResult<Block> {
    debug_assert_eq!(pair.as_rule(), Rule::block);
    let span = span_from_pair(&pair);
    let statements = pair
        .into_inner()
        .map(build_statement)
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Block { statements, span })
}

fn build_statement(pair: Pair<Rule>) -> ParseResult<Stmt> {
    debug_assert_eq!(pair.as_rule(), Rule::statement);
    let span = span_from_pair(&pair);
    let inner = pair.into_inner().next().unwrap();

    let kind = match inner.as_rule() {
        Rule::var_stmt => {
            let mut name = None;
            let mut init = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::identifier => name = Some(build_identifier(part)),
                    Rule::expression => init = Some(build_expression(part)?),
                    _ => {}
                }
            }
            StmtKind::Var {
                name: name.unwrap(),
                init,
            }
        }
        Rule::assign_stmt => {
            let mut parts = inner.into_inner();
            let name = build_identifier(parts.next().unwrap());
            let op_pair = parts.next().unwrap();
            let op = match op_pair.as_str() {
                "=" => AssignOp::Assign,
                "+=" => AssignOp::AddAssign,
                "-=" => AssignOp::SubAssign,
                other => return Err(ParseError::UnknownOperator(other.to_string())),
            };
            let value = build_expression(parts.next().unwrap())?;
            StmtKind::Assign { name, op, value }
        }
        Rule::if_stmt => {
            let mut condition = None;
            let mut branches = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::expression => condition = Some(build_expression(part)?),
                    Rule::statement => branches.push(Box::new(build_statement(part)?)),
                    _ => {}
                }
            }
            let mut branches = branches.into_iter();
            StmtKind::If {
                condition: condition.unwrap(),
                then_branch: branches.next().unwrap(),
                else_branch: branches.next(),
            }
        }
        Rule::return_stmt => {
            let value = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::expression)
                .map(build_expression)
                .transpose()?;
            StmtKind::Return(value)
        }
        Rule::block => StmtKind::Block(build_block(inner)?),
        Rule::expr_stmt => StmtKind::Expr(build_expression(inner.into_inner().next().unwrap())?),
        Rule::empty_stmt => StmtKind::Empty,
        _ => unreachable!("unexpected statement: {:?}", inner.as_rule()),
    };

    Ok(Stmt { kind, span })
}

// =============================================================================
// Expression building
// =============================================================================

fn build_expression(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::expression);
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::arrow_function => build_arrow_function(inner),
        Rule::conditional_expr => build_conditional_expr(inner),
        _ => unreachable!("unexpected expression: {:?}", inner.as_rule()),
    }
}

fn build_conditional_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::conditional_expr);
    let span = span_from_pair(&pair);
    let mut inner = pair.into_inner();
    let condition = build_binary_expr(inner.next().unwrap())?;

    match (inner.next(), inner.next()) {
        (Some(then_pair), Some(else_pair)) => Ok(Expr::new(
            ExprKind::Conditional {
                condition: Box::new(condition),
                then_expr: Box::new(build_expression(then_pair)?),
                else_expr: Box::new(build_expression(else_pair)?),
            },
            span,
        )),
        _ => Ok(condition),
    }
}

fn build_binary_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::binary_expr);
    let mut inner = pair.into_inner();
    let first = build_prefix_expr(inner.next().unwrap())?;

    let mut ops_and_exprs = Vec::new();
    while let Some(op_pair) = inner.next() {
        let op = parse_binary_op(&op_pair)?;
        let operand = build_prefix_expr(inner.next().unwrap())?;
        ops_and_exprs.push((op, operand));
    }

    build_expr_with_precedence(first, ops_and_exprs)
}

/// Fold a flat operator sequence into a tree, highest precedence first and
/// left-associative within one precedence level.
fn build_expr_with_precedence(left: Expr, ops_and_exprs: Vec<(BinaryOp, Expr)>) -> ParseResult<Expr> {
    if ops_and_exprs.is_empty() {
        return Ok(left);
    }

    let mut exprs: Vec<Expr> = vec![left];
    let mut ops: Vec<BinaryOp> = vec![];
    for (op, expr) in ops_and_exprs {
        ops.push(op);
        exprs.push(expr);
    }

    for precedence in (0..=5).rev() {
        let mut i = 0;
        while i < ops.len() {
            let op = ops[i];
            if op.precedence() == precedence {
                let left_expr = exprs.remove(i);
                let right_expr = exprs.remove(i);
                let span = left_expr.span.merge(right_expr.span);

                let combined = Expr::new(
                    ExprKind::Binary {
                        op,
                        left: Box::new(left_expr),
                        right: Box::new(right_expr),
                    },
                    span,
                );
                exprs.insert(i, combined);
                ops.remove(i);
            } else {
                i += 1;
            }
        }
    }

    debug_assert_eq!(exprs.len(), 1);
    debug_assert!(ops.is_empty());

    Ok(exprs.pop().unwrap())
}

fn parse_binary_op(pair: &Pair<Rule>) -> ParseResult<BinaryOp> {
    let op = match pair.as_str() {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNe,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "&&" => BinaryOp::And,
        "||" => BinaryOp::Or,
        other => return Err(ParseError::UnknownOperator(other.to_string())),
    };
    Ok(op)
}

fn build_prefix_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::prefix_expr);
    let span = span_from_pair(&pair);

    let mut ops = Vec::new();
    let mut operand = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::prefix_op => {
                let op = match inner.as_str() {
                    "!" => UnaryOp::Not,
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Plus,
                    "typeof" => UnaryOp::TypeOf,
                    other => return Err(ParseError::UnknownOperator(other.to_string())),
                };
                ops.push(op);
            }
            Rule::postfix_expr => operand = Some(build_postfix_expr(inner)?),
            _ => {}
        }
    }

    // Innermost operator applies first
    let mut expr = operand.unwrap();
    for op in ops.into_iter().rev() {
        expr = match (op, expr.kind) {
            (UnaryOp::Neg, ExprKind::Int(i)) => Expr::new(ExprKind::Int(-i), span),
            (UnaryOp::Neg, ExprKind::Float(f)) => Expr::new(ExprKind::Float(-f), span),
            (op, kind) => Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(Expr::new(kind, expr.span)),
                },
                span,
            ),
        };
    }
    Ok(expr)
}

fn build_postfix_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::postfix_expr);
    let mut inner = pair.into_inner();
    let mut expr = build_primary_expr(inner.next().unwrap())?;
    for suffix in inner {
        expr = apply_postfix_suffix(expr, suffix)?;
    }
    Ok(expr)
}

fn apply_postfix_suffix(base: Expr, suffix: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(suffix.as_rule(), Rule::postfix_suffix);
    let suffix_span = span_from_pair(&suffix);
    let span = base.span.merge(suffix_span);
    let inner = suffix.into_inner().next().unwrap();

    let kind = match inner.as_rule() {
        Rule::member_suffix => {
            let member = build_identifier(inner.into_inner().next().unwrap());
            ExprKind::Member {
                base: Box::new(base),
                member,
            }
        }
        Rule::index_suffix => {
            let index = build_expression(inner.into_inner().next().unwrap())?;
            ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            }
        }
        Rule::call_suffix => {
            let args = match inner.into_inner().next() {
                Some(list) => list
                    .into_inner()
                    .map(build_expression)
                    .collect::<ParseResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            ExprKind::Call {
                callee: Box::new(base),
                args,
            }
        }
        _ => unreachable!("unexpected postfix suffix: {:?}", inner.as_rule()),
    };

    Ok(Expr::new(kind, span))
}

fn build_primary_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::primary_expr);
    let inner = pair.into_inner().next().unwrap();
    let span = span_from_pair(&inner);

    match inner.as_rule() {
        Rule::literal => build_literal(inner),
        Rule::array_literal => {
            let items = inner
                .into_inner()
                .map(build_expression)
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::new(ExprKind::Array(items), span))
        }
        Rule::object_literal => {
            let mut entries = Vec::new();
            for entry in inner.into_inner() {
                let mut parts = entry.into_inner();
                let key_pair = parts.next().unwrap();
                let key = match key_pair.as_rule() {
                    Rule::string_literal => build_string_literal(key_pair)?,
                    _ => key_pair.as_str().to_string(),
                };
                let value = build_expression(parts.next().unwrap())?;
                entries.push((key, value));
            }
            Ok(Expr::new(ExprKind::Object(entries), span))
        }
        Rule::function_expr => {
            let mut params = Vec::new();
            let mut body = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::param_list => params = build_param_list(part),
                    Rule::block => body = Some(build_block(part)?),
                    _ => {}
                }
            }
            Ok(Expr::new(
                ExprKind::Function {
                    params,
                    body: FunctionBody::Block(body.unwrap()),
                },
                span,
            ))
        }
        Rule::paren_expr => {
            let expr = build_expression(inner.into_inner().next().unwrap())?;
            Ok(Expr::new(expr.kind, span))
        }
        Rule::identifier => Ok(Expr::new(
            ExprKind::Identifier(inner.as_str().to_string()),
            span,
        )),
        _ => unreachable!("unexpected primary expression: {:?}", inner.as_rule()),
    }
}

fn build_arrow_function(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::arrow_function);
    let span = span_from_pair(&pair);
    let mut inner = pair.into_inner();

    let params_pair = inner.next().unwrap();
    let params = match params_pair.into_inner().next() {
        Some(p) if p.as_rule() == Rule::param_list => build_param_list(p),
        Some(p) => vec![build_identifier(p)],
        None => Vec::new(),
    };

    let body_pair = inner.next().unwrap();
    let body = match body_pair.as_rule() {
        Rule::block => FunctionBody::Block(build_block(body_pair)?),
        _ => FunctionBody::Expr(Box::new(build_expression(body_pair)?)),
    };

    Ok(Expr::new(ExprKind::Function { params, body }, span))
}

// =============================================================================
// Literals
// =============================================================================

fn build_literal(pair: Pair<Rule>) -> ParseResult<Expr> {
    debug_assert_eq!(pair.as_rule(), Rule::literal);
    let span = span_from_pair(&pair);
    let inner = pair.into_inner().next().unwrap();

    let kind = match inner.as_rule() {
        Rule::number => parse_number(inner.as_str())?,
        Rule::string_literal => ExprKind::String(build_string_literal(inner)?),
        Rule::true_lit => ExprKind::Bool(true),
        Rule::false_lit => ExprKind::Bool(false),
        Rule::null_lit => ExprKind::Null,
        Rule::undefined_lit => ExprKind::Undefined,
        _ => unreachable!("unexpected literal: {:?}", inner.as_rule()),
    };
    Ok(Expr::new(kind, span))
}

fn build_string_literal(pair: Pair<Rule>) -> ParseResult<String> {
    debug_assert_eq!(pair.as_rule(), Rule::string_literal);
    match pair.into_inner().next() {
        Some(chars) => unescape(chars.as_str()),
        None => Ok(String::new()),
    }
}

fn unescape(s: &str) -> ParseResult<String> {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('b') => result.push('\u{8}'),
            Some('f') => result.push('\u{c}'),
            Some('v') => result.push('\u{b}'),
            Some('0') => result.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                result.push(parse_code_point(&hex, s)?);
            }
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                result.push(parse_code_point(&hex, s)?);
            }
            Some('\n') => {}
            // Any other escaped character stands for itself
            Some(other) => result.push(other),
            None => return Err(ParseError::InvalidEscape(s.to_string())),
        }
    }

    Ok(result)
}

fn parse_code_point(hex: &str, context: &str) -> ParseResult<char> {
    u32::from_str_radix(hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ParseError::InvalidEscape(context.to_string()))
}

fn parse_number(text: &str) -> ParseResult<ExprKind> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16)
            .map(ExprKind::Int)
            .map_err(|_| ParseError::InvalidNumber(text.to_string()));
    }
    if text.contains(['.', 'e', 'E']) {
        return text
            .parse::<f64>()
            .map(ExprKind::Float)
            .map_err(|_| ParseError::InvalidNumber(text.to_string()));
    }
    match text.parse::<i64>() {
        Ok(i) => Ok(ExprKind::Int(i)),
        // Too large for an integer, keep it as a double like a script engine would
        Err(_) => text
            .parse::<f64>()
            .map(ExprKind::Float)
            .map_err(|_| ParseError::InvalidNumber(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn expr(source: &str) -> ExprKind {
        parse_expression(source).unwrap().kind
    }

    #[test]
    fn parses_item_file_with_imports() {
        let file = parse_file(
            r#"
            import "helpers.js" as Helpers
            import qbs.FileInfo
            Product {
                name: "app"
                property bool enableFoo: true
                readonly property stringList defs
                cpp.defines: ["A"]
                Depends { name: "cpp" }
            }
            "#,
        )
        .unwrap();

        assert_eq!(file.imports.len(), 2);
        assert_eq!(file.imports[0].kind, ImportKind::Path("helpers.js".into()));
        assert_eq!(file.imports[0].alias.as_ref().unwrap().node, "Helpers");
        match &file.imports[1].kind {
            ImportKind::Namespace(q) => assert_eq!(q.to_string(), "qbs.FileInfo"),
            other => panic!("unexpected import {:?}", other),
        }

        assert_eq!(file.root.type_name.to_string(), "Product");
        assert_eq!(file.root.members.len(), 5);
        match &file.root.members[2] {
            ItemMember::PropertyDecl(decl) => {
                assert!(decl.readonly);
                assert_eq!(decl.type_name.node, "stringList");
                assert_eq!(decl.name.node, "defs");
                assert!(decl.value.is_none());
            }
            other => panic!("unexpected member {:?}", other),
        }
        match &file.root.members[3] {
            ItemMember::Binding(b) => assert_eq!(b.name.to_string(), "cpp.defines"),
            other => panic!("unexpected member {:?}", other),
        }
        assert!(matches!(file.root.members[4], ItemMember::Child(_)));
    }

    #[test]
    fn property_types_may_be_keywords() {
        let file = parse_file("Module { property var x: 1 }").unwrap();
        match &file.root.members[0] {
            ItemMember::PropertyDecl(decl) => assert_eq!(decl.type_name.node, "var"),
            other => panic!("unexpected member {:?}", other),
        }
    }

    #[test]
    fn block_binding_versus_object_literal() {
        let file = parse_file("Module { a: { return 1; } b: { x: 1 } }").unwrap();
        match &file.root.members[0] {
            ItemMember::Binding(b) => assert!(matches!(b.value, BindingValue::Block(_))),
            other => panic!("unexpected member {:?}", other),
        }
        match &file.root.members[1] {
            ItemMember::Binding(b) => assert!(matches!(
                b.value,
                BindingValue::Expr(Expr {
                    kind: ExprKind::Object(_),
                    ..
                })
            )),
            other => panic!("unexpected member {:?}", other),
        }
    }

    #[test]
    fn binary_precedence() {
        match expr("1 + 2 * 3") {
            ExprKind::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOp::Add);
                assert!(matches!(
                    right.kind,
                    ExprKind::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
        match expr("a || b && c") {
            ExprKind::Binary { op, .. } => assert_eq!(op, BinaryOp::Or),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn negative_literals_fold() {
        assert_eq!(expr("-1"), ExprKind::Int(-1));
        assert_eq!(expr("-1.5"), ExprKind::Float(-1.5));
        assert!(matches!(
            expr("!x"),
            ExprKind::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn postfix_chain() {
        match expr("base.concat(['x'])[0]") {
            ExprKind::Index { base, .. } => match base.kind {
                ExprKind::Call { callee, args } => {
                    assert_eq!(args.len(), 1);
                    assert!(matches!(callee.kind, ExprKind::Member { .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn arrow_functions() {
        match expr("(a, b) => a + b") {
            ExprKind::Function { params, body } => {
                assert_eq!(params.len(), 2);
                assert!(matches!(body, FunctionBody::Expr(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        match expr("x => { return x; }") {
            ExprKind::Function { params, body } => {
                assert_eq!(params[0].node, "x");
                assert!(matches!(body, FunctionBody::Block(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn string_escapes() {
        assert_eq!(expr(r#""a\nb""#), ExprKind::String("a\nb".into()));
        assert_eq!(expr(r"'it\'s'"), ExprKind::String("it's".into()));
        assert_eq!(expr(r#""\u0041\x42""#), ExprKind::String("AB".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(expr("0x10"), ExprKind::Int(16));
        assert_eq!(expr("1e3"), ExprKind::Float(1000.0));
    }

    #[test]
    fn conditional_expression() {
        assert!(matches!(
            expr("a ? 1 : 2"),
            ExprKind::Conditional { .. }
        ));
    }

    #[test]
    fn parses_script_functions() {
        let script = parse_script(
            r#"
            function twice(x) { return x * 2; }
            function greet(name) {
                var s = "hi ";
                if (name) s += name; else s += "nobody";
                return s;
            }
            "#,
        )
        .unwrap();
        assert_eq!(script.functions.len(), 2);
        assert_eq!(script.functions[1].body.statements.len(), 3);
    }

    #[test]
    fn free_identifiers() {
        let e = parse_expression("base.concat(outer).filter(x => x != original.y)").unwrap();
        let mut seen = Vec::new();
        e.visit_identifiers(&mut |name| seen.push(name.to_string()));
        assert!(seen.contains(&"base".to_string()));
        assert!(seen.contains(&"outer".to_string()));
        assert!(seen.contains(&"original".to_string()));
        assert!(!seen.contains(&"concat".to_string()));
    }

    #[test]
    fn syntax_error_is_reported() {
        assert!(matches!(
            parse_file("Product { name: }"),
            Err(ParseError::Syntax(_))
        ));
    }
}
