//! String methods

use std::sync::Arc;

use rqbs_runtime::{Evaluator, ExternalRegistry, LangError, LangResult, ScopeRef, VmValue};

pub fn register(registry: &mut ExternalRegistry) {
    registry.register_method("String", "contains", Arc::new(string_includes));
    registry.register_method("String", "includes", Arc::new(string_includes));
    registry.register_method("String", "startsWith", Arc::new(string_starts_with));
    registry.register_method("String", "endsWith", Arc::new(string_ends_with));
    registry.register_method("String", "indexOf", Arc::new(string_index_of));
    registry.register_method("String", "lastIndexOf", Arc::new(string_last_index_of));
    registry.register_method("String", "split", Arc::new(string_split));
    registry.register_method("String", "trim", Arc::new(string_trim));
    registry.register_method("String", "toUpperCase", Arc::new(string_to_upper_case));
    registry.register_method("String", "toLowerCase", Arc::new(string_to_lower_case));
    registry.register_method("String", "replace", Arc::new(string_replace));
    registry.register_method("String", "replaceAll", Arc::new(string_replace_all));
    registry.register_method("String", "slice", Arc::new(string_slice));
    registry.register_method("String", "substring", Arc::new(string_substring));
    registry.register_method("String", "concat", Arc::new(string_concat));
    registry.register_method("String", "repeat", Arc::new(string_repeat));
    registry.register_method("String", "toString", Arc::new(string_to_string));
}

fn get_string_arg(args: &[VmValue], idx: usize) -> LangResult<Arc<str>> {
    match args.get(idx) {
        Some(VmValue::String(s)) => Ok(Arc::clone(s)),
        other => Err(LangError::type_error(
            "String",
            other.map_or("none", |v| v.type_name()),
        )),
    }
}

/// Optional integer argument; JavaScript truncates fractional indices
fn get_index_arg(args: &[VmValue], idx: usize) -> LangResult<Option<i64>> {
    match args.get(idx) {
        None | Some(VmValue::Undefined) => Ok(None),
        Some(VmValue::Int(n)) => Ok(Some(*n)),
        Some(VmValue::Float(f)) => Ok(Some(f.trunc() as i64)),
        Some(other) => Err(LangError::type_error("Number", other.type_name())),
    }
}

/// Clamp a possibly negative index into `0..=len`
fn relative_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let index = if index < 0 { len.saturating_add(index) } else { index };
    index.clamp(0, len) as usize
}

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

/// Character position of a byte offset
fn char_position(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn string_includes(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let pattern = get_string_arg(args, 1)?;
    Ok(VmValue::Boolean(this.contains(&*pattern)))
}

fn string_starts_with(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let prefix = get_string_arg(args, 1)?;
    Ok(VmValue::Boolean(this.starts_with(&*prefix)))
}

fn string_ends_with(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let suffix = get_string_arg(args, 1)?;
    Ok(VmValue::Boolean(this.ends_with(&*suffix)))
}

fn string_index_of(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let pattern = get_string_arg(args, 1)?;
    Ok(VmValue::Int(
        this.find(&*pattern).map_or(-1, |byte| char_position(&this, byte)),
    ))
}

fn string_last_index_of(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let pattern = get_string_arg(args, 1)?;
    Ok(VmValue::Int(
        this.rfind(&*pattern).map_or(-1, |byte| char_position(&this, byte)),
    ))
}

fn string_split(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let parts = match args.get(1) {
        None | Some(VmValue::Undefined) => vec![VmValue::String(this)],
        Some(_) => {
            let separator = get_string_arg(args, 1)?;
            if separator.is_empty() {
                this.chars().map(|c| VmValue::string(c.to_string())).collect()
            } else {
                this.split(&*separator).map(VmValue::string).collect()
            }
        }
    };
    Ok(VmValue::list(parts))
}

fn string_trim(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    Ok(VmValue::string(this.trim()))
}

fn string_to_upper_case(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    Ok(VmValue::string(this.to_uppercase()))
}

fn string_to_lower_case(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    Ok(VmValue::string(this.to_lowercase()))
}

/// Replaces the first occurrence only, like JavaScript with a string pattern
fn string_replace(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let pattern = get_string_arg(args, 1)?;
    let replacement = get_string_arg(args, 2)?;
    Ok(VmValue::string(this.replacen(&*pattern, &replacement, 1)))
}

fn string_replace_all(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let pattern = get_string_arg(args, 1)?;
    let replacement = get_string_arg(args, 2)?;
    Ok(VmValue::string(this.replace(&*pattern, &replacement)))
}

fn string_slice(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = chars(&get_string_arg(args, 0)?);
    let start = relative_index(get_index_arg(args, 1)?.unwrap_or(0), this.len());
    let end = get_index_arg(args, 2)?.map_or(this.len(), |e| relative_index(e, this.len()));
    let slice: String = if start < end { this[start..end].iter().collect() } else { String::new() };
    Ok(VmValue::string(slice))
}

/// Negative arguments count as zero and swapped bounds are reordered
fn string_substring(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = chars(&get_string_arg(args, 0)?);
    let len = this.len() as i64;
    let start = get_index_arg(args, 1)?.unwrap_or(0).clamp(0, len) as usize;
    let end = get_index_arg(args, 2)?.unwrap_or(len).clamp(0, len) as usize;
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    Ok(VmValue::string(this[start..end].iter().collect::<String>()))
}

fn string_concat(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let mut result = get_string_arg(args, 0)?.to_string();
    for arg in &args[1..] {
        result.push_str(&arg.to_string());
    }
    Ok(VmValue::string(result))
}

fn string_repeat(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = get_string_arg(args, 0)?;
    let count = get_index_arg(args, 1)?.unwrap_or(0);
    let count = usize::try_from(count)
        .map_err(|_| LangError::InvalidOperation(format!("invalid repeat count {}", count)))?;
    Ok(VmValue::string(this.repeat(count)))
}

fn string_to_string(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(VmValue::String(get_string_arg(args, 0)?))
}
