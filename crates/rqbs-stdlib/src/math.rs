//! The `Math` namespace and number methods

use std::sync::Arc;

use rqbs_runtime::{Evaluator, ExternalRegistry, LangError, LangResult, ScopeRef, VmValue};

pub fn register(registry: &mut ExternalRegistry) {
    registry.register_function("Math", "abs", Arc::new(math_abs));
    registry.register_function("Math", "floor", Arc::new(math_floor));
    registry.register_function("Math", "ceil", Arc::new(math_ceil));
    registry.register_function("Math", "round", Arc::new(math_round));
    registry.register_function("Math", "trunc", Arc::new(math_trunc));
    registry.register_function("Math", "sqrt", Arc::new(math_sqrt));
    registry.register_function("Math", "pow", Arc::new(math_pow));
    registry.register_function("Math", "max", Arc::new(math_max));
    registry.register_function("Math", "min", Arc::new(math_min));

    registry.register_method("Number", "toFixed", Arc::new(number_to_fixed));
    registry.register_method("Number", "toString", Arc::new(number_to_string));
}

fn get_number_arg(args: &[VmValue], idx: usize) -> LangResult<f64> {
    args.get(idx).and_then(|v| v.as_float()).ok_or_else(|| {
        LangError::type_error("Number", args.get(idx).map_or("none", |v| v.type_name()))
    })
}

/// Integral results stay integers when they fit
fn number(value: f64) -> VmValue {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < i64::MAX as f64 {
        VmValue::Int(value as i64)
    } else {
        VmValue::Float(value)
    }
}

fn math_abs(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    match args.first() {
        Some(VmValue::Int(n)) => n
            .checked_abs()
            .map(VmValue::Int)
            .ok_or_else(|| LangError::InvalidOperation("integer overflow in Math.abs".to_string())),
        _ => Ok(VmValue::Float(get_number_arg(args, 0)?.abs())),
    }
}

fn math_floor(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(number(get_number_arg(args, 0)?.floor()))
}

fn math_ceil(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(number(get_number_arg(args, 0)?.ceil()))
}

/// Halves round towards positive infinity, as in JavaScript
fn math_round(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(number((get_number_arg(args, 0)? + 0.5).floor()))
}

fn math_trunc(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(number(get_number_arg(args, 0)?.trunc()))
}

fn math_sqrt(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(VmValue::Float(get_number_arg(args, 0)?.sqrt()))
}

fn math_pow(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let base = get_number_arg(args, 0)?;
    let exponent = get_number_arg(args, 1)?;
    if let (Some(VmValue::Int(b)), Some(VmValue::Int(e))) = (args.first(), args.get(1)) {
        if let Some(result) = u32::try_from(*e).ok().and_then(|e| b.checked_pow(e)) {
            return Ok(VmValue::Int(result));
        }
    }
    Ok(VmValue::Float(base.powf(exponent)))
}

fn extremum(args: &[VmValue], pick_second: fn(f64, f64) -> bool) -> LangResult<VmValue> {
    let mut best: Option<(f64, &VmValue)> = None;
    for (idx, arg) in args.iter().enumerate() {
        let value = get_number_arg(args, idx)?;
        if best.map_or(true, |(current, _)| pick_second(current, value)) {
            best = Some((value, arg));
        }
    }
    best.map(|(_, v)| v.clone())
        .ok_or_else(|| LangError::WrongArgCount { expected: 1, actual: 0 })
}

fn math_max(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    extremum(args, |current, candidate| candidate > current)
}

fn math_min(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    extremum(args, |current, candidate| candidate < current)
}

fn number_to_fixed(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let value = get_number_arg(args, 0)?;
    let digits = match args.get(1) {
        None | Some(VmValue::Undefined) => 0,
        Some(v) => v
            .as_int()
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| LangError::type_error("non-negative integer", v.type_name()))?,
    };
    Ok(VmValue::string(format!("{:.*}", digits, value)))
}

/// `toString(radix)` for integers, plain conversion otherwise
fn number_to_string(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let this = args
        .first()
        .ok_or(LangError::WrongArgCount { expected: 1, actual: 0 })?;
    match (this, args.get(1)) {
        (VmValue::Int(n), Some(VmValue::Int(radix))) if *radix != 10 => {
            let radix = u32::try_from(*radix)
                .ok()
                .filter(|r| (2..=36).contains(r))
                .ok_or_else(|| LangError::InvalidOperation(format!("invalid radix {}", radix)))?;
            Ok(VmValue::string(to_radix(*n, radix)))
        }
        _ => Ok(VmValue::string(this.to_string())),
    }
}

fn to_radix(n: i64, radix: u32) -> String {
    let mut magnitude = n.unsigned_abs();
    if magnitude == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while magnitude > 0 {
        let digit = (magnitude % radix as u64) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('?'));
        magnitude /= radix as u64;
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}
