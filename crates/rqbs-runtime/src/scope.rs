//! Scope chains for identifier resolution
//!
//! A scope is a linked list of frames, innermost first. Item frames resolve
//! names to properties of an item, file frames to imports, ids and file
//! information, local frames to script variables.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{LangError, LangResult};
use crate::evaluator::Evaluator;
use crate::file::{FileContext, ImportValue, ScriptModule};
use crate::paths;
use crate::pool::ItemId;
use crate::variant::VmValue;

/// Reference to a scope (shared, immutable links)
pub type ScopeRef = Arc<Scope>;

#[derive(Debug)]
pub enum Frame {
    /// Script variables and parameters; assignments update them in place
    Locals(RwLock<FxHashMap<String, VmValue>>),
    Item(ItemId),
    File(Arc<FileContext>),
    Script(Arc<ScriptModule>),
}

/// Lexical scope for variable resolution
#[derive(Debug)]
pub struct Scope {
    frame: Option<Frame>,
    parent: Option<ScopeRef>,
}

impl Scope {
    /// Create a new root scope
    pub fn new() -> ScopeRef {
        Arc::new(Self {
            frame: None,
            parent: None,
        })
    }

    fn push(parent: &ScopeRef, frame: Frame) -> ScopeRef {
        Arc::new(Self {
            frame: Some(frame),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Create a child scope with additional local bindings
    pub fn with_locals(parent: &ScopeRef, bindings: Vec<(String, VmValue)>) -> ScopeRef {
        Self::push(
            parent,
            Frame::Locals(RwLock::new(bindings.into_iter().collect())),
        )
    }

    pub fn with_item(parent: &ScopeRef, item: ItemId) -> ScopeRef {
        Self::push(parent, Frame::Item(item))
    }

    pub fn with_file(parent: &ScopeRef, file: Arc<FileContext>) -> ScopeRef {
        Self::push(parent, Frame::File(file))
    }

    /// Root scope of a script file's functions
    pub fn script(module: Arc<ScriptModule>) -> ScopeRef {
        Self::push(&Self::new(), Frame::Script(module))
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(Some(self), |s| s.parent.as_deref()).filter_map(|s| s.frame.as_ref())
    }

    /// Resolve an identifier, innermost frame first
    pub fn lookup(&self, name: &str, eval: &Evaluator<'_>) -> LangResult<Option<VmValue>> {
        for frame in self.frames() {
            let found = match frame {
                Frame::Locals(locals) => locals.read().get(name).cloned(),
                Frame::Item(item) => eval.item_member(*item, name)?,
                Frame::File(file) => Self::lookup_in_file(file, name, eval),
                Frame::Script(module) => module.function(name),
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn lookup_in_file(file: &Arc<FileContext>, name: &str, eval: &Evaluator<'_>) -> Option<VmValue> {
        if let Some(import) = file.import(name) {
            return Some(match import {
                ImportValue::Script(module) => module.as_object(),
                ImportValue::Namespace(ns) => eval.externals().namespace_object(ns),
            });
        }
        if let Some(id_value) = eval.pool().own_property(file.id_scope, name) {
            if let Some(item) = id_value.as_item() {
                return Some(VmValue::Item(item));
            }
        }
        match name {
            "filePath" => Some(VmValue::string(paths::to_slash_string(&file.path))),
            "path" => Some(VmValue::string(paths::to_slash_string(&file.dir))),
            _ => None,
        }
    }

    /// Assign to an existing local; `false` if no frame declares it
    pub fn assign(&self, name: &str, value: VmValue) -> bool {
        for frame in self.frames() {
            if let Frame::Locals(locals) = frame {
                let mut locals = locals.write();
                if let Some(slot) = locals.get_mut(name) {
                    *slot = value;
                    return true;
                }
            }
        }
        false
    }

    /// Declare a variable in the innermost local frame
    pub fn declare(&self, name: &str, value: VmValue) -> LangResult<()> {
        for frame in self.frames() {
            if let Frame::Locals(locals) = frame {
                locals.write().insert(name.to_string(), value);
                return Ok(());
            }
        }
        Err(LangError::InvalidOperation(format!(
            "cannot declare '{}' outside of a function or block",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_updates_enclosing_frame() {
        let outer = Scope::with_locals(&Scope::new(), vec![("x".into(), VmValue::Int(1))]);
        let inner = Scope::with_locals(&outer, vec![]);
        assert!(inner.assign("x", VmValue::Int(2)));
        assert!(!inner.assign("y", VmValue::Int(2)));
        inner.declare("y", VmValue::Int(3)).unwrap();
        let Some(Frame::Locals(locals)) = &outer.frame else {
            panic!("expected locals");
        };
        assert_eq!(locals.read().get("x"), Some(&VmValue::Int(2)));
        assert!(locals.read().get("y").is_none());
    }

    #[test]
    fn declare_needs_local_frame() {
        assert!(Scope::new().declare("x", VmValue::Null).is_err());
    }
}
