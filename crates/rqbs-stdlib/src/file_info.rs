//! The `FileInfo` namespace
//!
//! Pure path string manipulation; nothing here touches the file system.
//! Paths always use forward slashes.

use std::sync::Arc;

use rqbs_runtime::{paths, Evaluator, ExternalRegistry, LangError, LangResult, ScopeRef, VmValue};

pub fn register(registry: &mut ExternalRegistry) {
    registry.register_function("FileInfo", "fileName", Arc::new(file_name));
    registry.register_function("FileInfo", "baseName", Arc::new(base_name));
    registry.register_function("FileInfo", "completeBaseName", Arc::new(complete_base_name));
    registry.register_function("FileInfo", "suffix", Arc::new(suffix));
    registry.register_function("FileInfo", "completeSuffix", Arc::new(complete_suffix));
    registry.register_function("FileInfo", "path", Arc::new(path));
    registry.register_function("FileInfo", "joinPaths", Arc::new(join_paths));
    registry.register_function("FileInfo", "cleanPath", Arc::new(clean_path));
    registry.register_function("FileInfo", "isAbsolutePath", Arc::new(is_absolute_path));
    registry.register_function("FileInfo", "relativePath", Arc::new(relative_path));
    registry.register_function("FileInfo", "fromNativeSeparators", Arc::new(from_native_separators));
}

fn get_path_arg(args: &[VmValue], idx: usize) -> LangResult<String> {
    match args.get(idx) {
        Some(VmValue::String(s)) => Ok(s.replace('\\', "/")),
        other => Err(LangError::type_error(
            "String",
            other.map_or("none", |v| v.type_name()),
        )),
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn file_name(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    Ok(VmValue::string(last_segment(&path)))
}

/// Up to the first dot: `baseName("a/lib.so.1")` is `lib`
fn base_name(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    let name = last_segment(&path);
    Ok(VmValue::string(name.split('.').next().unwrap_or(name)))
}

/// Up to the last dot: `completeBaseName("a/lib.so.1")` is `lib.so`
fn complete_base_name(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    let name = last_segment(&path);
    Ok(VmValue::string(name.rsplit_once('.').map_or(name, |(base, _)| base)))
}

fn suffix(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    let name = last_segment(&path);
    Ok(VmValue::string(name.rsplit_once('.').map_or("", |(_, ext)| ext)))
}

fn complete_suffix(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    let name = last_segment(&path);
    Ok(VmValue::string(name.split_once('.').map_or("", |(_, ext)| ext)))
}

/// The directory part; `"."` for bare file names
fn path(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    let dir = match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    };
    Ok(VmValue::string(dir))
}

/// Join with single slashes; empty segments are dropped
fn join_paths(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let mut joined = String::new();
    for idx in 0..args.len() {
        let segment = get_path_arg(args, idx)?;
        if segment.is_empty() {
            continue;
        }
        if joined.is_empty() {
            joined.push_str(&segment);
        } else {
            joined.truncate(joined.trim_end_matches('/').len());
            joined.push('/');
            joined.push_str(segment.trim_start_matches('/'));
        }
    }
    Ok(VmValue::string(joined))
}

fn clean_path(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    if path.is_empty() {
        return Ok(VmValue::string(""));
    }
    let cleaned = paths::to_slash_string(&paths::clean_path(std::path::Path::new(&path)));
    Ok(VmValue::string(if cleaned.is_empty() { ".".to_string() } else { cleaned }))
}

fn is_absolute_path(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let path = get_path_arg(args, 0)?;
    let windows_drive = path.len() >= 3 && path.as_bytes()[1] == b':' && path.as_bytes()[2] == b'/';
    Ok(VmValue::Boolean(path.starts_with('/') || windows_drive))
}

/// `relativePath(base, target)`: the path leading from `base` to `target`
fn relative_path(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    let base = get_path_arg(args, 0)?;
    let target = get_path_arg(args, 1)?;
    let base: Vec<&str> = base.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let target: Vec<&str> = target.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let common = base.iter().zip(&target).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = std::iter::repeat("..").take(base.len() - common).collect();
    parts.extend(&target[common..]);
    Ok(VmValue::string(parts.join("/")))
}

fn from_native_separators(args: &[VmValue], _eval: &Evaluator, _scope: &ScopeRef) -> LangResult<VmValue> {
    Ok(VmValue::string(get_path_arg(args, 0)?))
}
