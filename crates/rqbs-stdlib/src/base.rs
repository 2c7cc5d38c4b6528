//! Global functions and the `JSON` and `Object` namespaces

use std::sync::Arc;

use rqbs_runtime::{Evaluator, ExternalRegistry, LangError, LangResult, ScopeRef, VmValue};

pub fn register(registry: &mut ExternalRegistry) {
    registry.register_global("parseInt", Arc::new(parse_int));
    registry.register_global("parseFloat", Arc::new(parse_float));
    registry.register_global("String", Arc::new(to_string));
    registry.register_global("Number", Arc::new(to_number));
    registry.register_global("Boolean", Arc::new(to_boolean));
    registry.register_global("isNaN", Arc::new(is_nan));

    registry.register_function("JSON", "stringify", Arc::new(json_stringify));
    registry.register_function("JSON", "parse", Arc::new(json_parse));

    registry.register_function("Object", "keys", Arc::new(object_keys));
    registry.register_function("Object", "values", Arc::new(object_values));

    registry.register_method("Boolean", "toString", Arc::new(any_to_string));
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

fn first(args: &[VmValue]) -> VmValue {
    args.first().cloned().unwrap_or(VmValue::Undefined)
}

/// Leading integer of a string, `NaN` if there is none; supports a radix
/// and the `0x` prefix
fn parse_int(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let text = first(args).to_string();
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let mut radix = match args.get(1) {
        None | Some(VmValue::Undefined) => 10,
        Some(v) => v
            .as_int()
            .and_then(|r| u32::try_from(r).ok())
            .filter(|r| (2..=36).contains(r))
            .ok_or_else(|| LangError::InvalidOperation(format!("invalid radix {}", v)))?,
    };
    let mut digits = digits;
    if radix == 16 || args.get(1).map_or(true, VmValue::is_undefined) {
        if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            digits = hex;
            radix = 16;
        }
    }

    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_digit(radix))
        .map_or(digits.len(), |(i, _)| i);
    match i64::from_str_radix(&digits[..end], radix) {
        Ok(n) => Ok(VmValue::Int(if negative { -n } else { n })),
        Err(_) => Ok(VmValue::Float(f64::NAN)),
    }
}

/// Longest numeric prefix of a string, `NaN` if there is none
fn parse_float(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let text = first(args).to_string();
    let text = text.trim_start();
    let parsed = (1..=text.len())
        .rev()
        .filter(|&end| text.is_char_boundary(end))
        .find_map(|end| text[..end].parse::<f64>().ok());
    Ok(match parsed {
        Some(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => VmValue::Int(n as i64),
        Some(n) => VmValue::Float(n),
        None => VmValue::Float(f64::NAN),
    })
}

fn to_string(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(VmValue::string(first(args).to_string()))
}

fn to_number(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(match first(args) {
        value @ (VmValue::Int(_) | VmValue::Float(_)) => value,
        other => match other.to_number() {
            Some(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => VmValue::Int(n as i64),
            Some(n) => VmValue::Float(n),
            None => VmValue::Float(f64::NAN),
        },
    })
}

fn to_boolean(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(VmValue::Boolean(first(args).is_truthy()))
}

fn is_nan(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let value = first(args);
    Ok(VmValue::Boolean(value.to_number().map_or(true, f64::is_nan)))
}

fn any_to_string(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(VmValue::string(first(args).to_string()))
}

// =============================================================================
// JSON
// =============================================================================

fn json_stringify(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let value = first(args);
    let pretty = args.get(2).is_some_and(VmValue::is_truthy);
    let text = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    text.map(VmValue::string)
        .map_err(|e| LangError::InvalidOperation(format!("JSON.stringify: {}", e)))
}

fn json_parse(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let text = get_string_arg(args, 0)?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| LangError::InvalidOperation(format!("JSON.parse: {}", e)))?;
    Ok(VmValue::from(&json))
}

// =============================================================================
// Object
// =============================================================================

fn get_object_entries(args: &[VmValue]) -> LangResult<Vec<(String, VmValue)>> {
    match args.first() {
        Some(VmValue::Object(entries)) => Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()),
        other => Err(LangError::type_error(
            "Object",
            other.map_or("none", |v| v.type_name()),
        )),
    }
}

fn object_keys(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let entries = get_object_entries(args)?;
    Ok(VmValue::string_list(entries.iter().map(|(k, _)| k)))
}

fn object_values(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let entries = get_object_entries(args)?;
    Ok(VmValue::list(entries.into_iter().map(|(_, v)| v).collect()))
}
