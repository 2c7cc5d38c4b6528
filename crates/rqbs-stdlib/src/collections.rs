//! List methods
//!
//! Lists are immutable values, so every method returns a new list instead
//! of modifying its receiver.

use std::sync::Arc;

use rqbs_runtime::{Evaluator, ExternalRegistry, LangError, LangResult, ScopeRef, VmValue};

pub fn register(registry: &mut ExternalRegistry) {
    registry.register_method("List", "concat", Arc::new(list_concat));
    registry.register_method("List", "uniqueConcat", Arc::new(list_unique_concat));
    registry.register_method("List", "contains", Arc::new(list_includes));
    registry.register_method("List", "includes", Arc::new(list_includes));
    registry.register_method("List", "indexOf", Arc::new(list_index_of));
    registry.register_method("List", "lastIndexOf", Arc::new(list_last_index_of));
    registry.register_method("List", "join", Arc::new(list_join));
    registry.register_method("List", "slice", Arc::new(list_slice));
    registry.register_method("List", "reverse", Arc::new(list_reverse));

    // Higher-order functions
    registry.register_method("List", "map", Arc::new(list_map));
    registry.register_method("List", "filter", Arc::new(list_filter));
    registry.register_method("List", "some", Arc::new(list_some));
    registry.register_method("List", "every", Arc::new(list_every));
    registry.register_method("List", "find", Arc::new(list_find));
    registry.register_method("List", "reduce", Arc::new(list_reduce));
}

fn get_list_arg(args: &[VmValue], idx: usize) -> LangResult<Arc<Vec<VmValue>>> {
    match args.get(idx) {
        Some(VmValue::List(l)) => Ok(Arc::clone(l)),
        other => Err(LangError::type_error(
            "List",
            other.map_or("none", |v| v.type_name()),
        )),
    }
}

fn get_function_arg(args: &[VmValue], idx: usize) -> LangResult<&VmValue> {
    match args.get(idx) {
        Some(f @ VmValue::Function(_)) => Ok(f),
        other => Err(LangError::type_error(
            "Function",
            other.map_or("none", |v| v.type_name()),
        )),
    }
}

fn get_arg(args: &[VmValue], idx: usize) -> LangResult<&VmValue> {
    args.get(idx).ok_or(LangError::WrongArgCount {
        expected: idx + 1,
        actual: args.len(),
    })
}

/// List arguments are spliced in, anything else is appended
fn list_concat(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let mut result = get_list_arg(args, 0)?.as_ref().clone();
    for arg in &args[1..] {
        match arg {
            VmValue::List(items) => result.extend(items.iter().cloned()),
            other => result.push(other.clone()),
        }
    }
    Ok(VmValue::list(result))
}

fn list_unique_concat(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let mut result = get_list_arg(args, 0)?.as_ref().clone();
    let mut push = |value: &VmValue| {
        if !result.iter().any(|v| v.strict_eq(value)) {
            result.push(value.clone());
        }
    };
    for arg in &args[1..] {
        match arg {
            VmValue::List(items) => items.iter().for_each(&mut push),
            other => push(other),
        }
    }
    Ok(VmValue::list(result))
}

fn list_includes(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let element = get_arg(args, 1)?;
    Ok(VmValue::Boolean(this.iter().any(|v| v.strict_eq(element))))
}

fn list_index_of(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let element = get_arg(args, 1)?;
    Ok(VmValue::Int(
        this.iter()
            .position(|v| v.strict_eq(element))
            .map_or(-1, |i| i as i64),
    ))
}

fn list_last_index_of(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let element = get_arg(args, 1)?;
    Ok(VmValue::Int(
        this.iter()
            .rposition(|v| v.strict_eq(element))
            .map_or(-1, |i| i as i64),
    ))
}

/// `undefined` and `null` elements join as empty strings
fn list_join(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let separator = match args.get(1) {
        None | Some(VmValue::Undefined) => ",".to_string(),
        Some(other) => other.to_string(),
    };
    let joined = this
        .iter()
        .map(|v| if v.is_nullish() { String::new() } else { v.to_string() })
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(VmValue::string(joined))
}

fn list_slice(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let len = this.len() as i64;
    let index = |idx: usize, default: i64| -> LangResult<usize> {
        let value = match args.get(idx) {
            None | Some(VmValue::Undefined) => default,
            Some(v) => v
                .as_int()
                .ok_or_else(|| LangError::type_error("Number", v.type_name()))?,
        };
        let value = if value < 0 { len.saturating_add(value) } else { value };
        Ok(value.clamp(0, len) as usize)
    };
    let start = index(1, 0)?;
    let end = index(2, len)?;
    let slice = if start < end { this[start..end].to_vec() } else { Vec::new() };
    Ok(VmValue::list(slice))
}

fn list_reverse(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    Ok(VmValue::list(this.iter().rev().cloned().collect()))
}

// =============================================================================
// Higher-order functions
// =============================================================================

/// Call `callback(element, index)`
fn call(
    eval: &Evaluator,
    callback: &VmValue,
    item: &VmValue,
    index: usize,
    scope: &ScopeRef,
) -> LangResult<VmValue> {
    eval.call_function(callback, vec![item.clone(), VmValue::Int(index as i64)], scope)
}

fn list_map(args: &[VmValue], eval: &Evaluator, scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let callback = get_function_arg(args, 1)?;
    let mapped = this
        .iter()
        .enumerate()
        .map(|(i, item)| call(eval, callback, item, i, scope))
        .collect::<LangResult<Vec<_>>>()?;
    Ok(VmValue::list(mapped))
}

fn list_filter(args: &[VmValue], eval: &Evaluator, scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let callback = get_function_arg(args, 1)?;
    let mut kept = Vec::new();
    for (i, item) in this.iter().enumerate() {
        if call(eval, callback, item, i, scope)?.is_truthy() {
            kept.push(item.clone());
        }
    }
    Ok(VmValue::list(kept))
}

fn list_some(args: &[VmValue], eval: &Evaluator, scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let callback = get_function_arg(args, 1)?;
    for (i, item) in this.iter().enumerate() {
        if call(eval, callback, item, i, scope)?.is_truthy() {
            return Ok(VmValue::Boolean(true));
        }
    }
    Ok(VmValue::Boolean(false))
}

fn list_every(args: &[VmValue], eval: &Evaluator, scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let callback = get_function_arg(args, 1)?;
    for (i, item) in this.iter().enumerate() {
        if !call(eval, callback, item, i, scope)?.is_truthy() {
            return Ok(VmValue::Boolean(false));
        }
    }
    Ok(VmValue::Boolean(true))
}

fn list_find(args: &[VmValue], eval: &Evaluator, scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let callback = get_function_arg(args, 1)?;
    for (i, item) in this.iter().enumerate() {
        if call(eval, callback, item, i, scope)?.is_truthy() {
            return Ok(item.clone());
        }
    }
    Ok(VmValue::Undefined)
}

/// `reduce(f, initial)`; without an initial value the first element is used
fn list_reduce(args: &[VmValue], eval: &Evaluator, scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_list_arg(args, 0)?;
    let callback = get_function_arg(args, 1)?;
    let mut items = this.iter().cloned();
    let mut acc = match args.get(2) {
        Some(initial) => initial.clone(),
        None => items.next().ok_or_else(|| {
            LangError::InvalidOperation("reduce of empty list with no initial value".to_string())
        })?,
    };
    for item in items {
        acc = eval.call_function(callback, vec![acc, item], scope)?;
    }
    Ok(acc)
}
