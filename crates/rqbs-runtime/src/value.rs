//! Property values: deferred source expressions, item references and literals
//!
//! A [`Value`] is bound to one property of one item. Values are immutable and
//! shared through [`ValuePtr`]; every modification goes through a clone
//! (`Arc::make_mut`), so prototypes and cloned items can share them freely.

use std::sync::Arc;

use bitflags::bitflags;

use rqbs_parser::{Block, Expr};

use crate::file::FileContext;
use crate::location::CodeLocation;
use crate::pool::ItemId;
use crate::variant::VmValue;

pub type ValuePtr = Arc<Value>;

bitflags! {
    /// Special names referenced by a source expression
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct SourceFlags: u32 {
        const USES_BASE = 1 << 0;
        const USES_OUTER = 1 << 1;
        const USES_ORIGINAL = 1 << 2;
    }
}

/// Parsed right-hand side of a binding
#[derive(Debug)]
pub enum SourceBody {
    Expr(Expr),
    Block(Block),
}

/// An unevaluated binding
#[derive(Debug, Clone)]
pub struct SourceValue {
    pub body: Arc<SourceBody>,
    /// The binding's source text, used to compare merged values
    pub source_code: Arc<str>,
    pub location: CodeLocation,
    pub file: Arc<FileContext>,
    pub flags: SourceFlags,
    /// The value this one overrides (the `base` of the expression)
    pub base_value: Option<ValuePtr>,
    /// Conditional values from `Properties` blocks, in priority order
    pub alternatives: Vec<Alternative>,
}

/// One conditional value of a source value
#[derive(Debug, Clone)]
pub struct Alternative {
    /// `None` for a fallback (else) alternative
    pub condition: Option<ValuePtr>,
    pub override_list_properties: Option<ValuePtr>,
    pub value: ValuePtr,
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    Source(SourceValue),
    Item(ItemId),
    Literal(VmValue),
}

#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    /// Lower-priority link of an override chain
    pub next: Option<ValuePtr>,
    /// The item whose scope the value was written in, if it differs from its owner
    pub defining_item: Option<ItemId>,
    pub created_by_properties_block: bool,
}

impl Value {
    fn with_kind(kind: ValueKind) -> ValuePtr {
        Arc::new(Value {
            kind,
            next: None,
            defining_item: None,
            created_by_properties_block: false,
        })
    }

    pub fn source(source: SourceValue) -> ValuePtr {
        Self::with_kind(ValueKind::Source(source))
    }

    pub fn item(item: ItemId) -> ValuePtr {
        Self::with_kind(ValueKind::Item(item))
    }

    pub fn literal(value: VmValue) -> ValuePtr {
        Self::with_kind(ValueKind::Literal(value))
    }

    pub fn as_source(&self) -> Option<&SourceValue> {
        match &self.kind {
            ValueKind::Source(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<ItemId> {
        match &self.kind {
            ValueKind::Item(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self.kind, ValueKind::Item(_))
    }

    /// Text used to decide whether two merged values are the same binding
    pub fn source_code(&self) -> String {
        match &self.kind {
            ValueKind::Source(s) => s.source_code.to_string(),
            ValueKind::Item(id) => format!("[item {}]", id),
            ValueKind::Literal(v) => serde_json::to_string(v).unwrap_or_else(|_| v.to_string()),
        }
    }

    pub fn location(&self) -> Option<&CodeLocation> {
        self.as_source().map(|s| &s.location)
    }

    /// Iterate over this value and all lower-priority links
    pub fn chain<'a>(self: &'a ValuePtr) -> impl Iterator<Item = &'a ValuePtr> {
        std::iter::successors(Some(self), |v| v.next.as_ref())
    }

    pub fn with_next(self: &ValuePtr, next: Option<ValuePtr>) -> ValuePtr {
        let mut copy = Arc::clone(self);
        Arc::make_mut(&mut copy).next = next;
        copy
    }

    pub fn with_defining_item(self: &ValuePtr, item: ItemId) -> ValuePtr {
        let mut copy = Arc::clone(self);
        Arc::make_mut(&mut copy).defining_item = Some(item);
        copy
    }

    /// Append `tail` after the last link of this chain
    pub fn append_to_chain(self: &ValuePtr, tail: ValuePtr) -> ValuePtr {
        let next = match &self.next {
            Some(next) => next.append_to_chain(tail),
            None => tail,
        };
        self.with_next(Some(next))
    }
}

impl SourceValue {
    pub fn uses(&self, flag: SourceFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_fallback_only(&self) -> bool {
        self.alternatives.iter().all(|a| a.condition.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(i: i64) -> ValuePtr {
        Value::literal(VmValue::Int(i))
    }

    fn chain_ints(v: &ValuePtr) -> Vec<i64> {
        v.chain()
            .map(|l| match &l.kind {
                ValueKind::Literal(VmValue::Int(i)) => *i,
                _ => panic!("unexpected link"),
            })
            .collect()
    }

    #[test]
    fn append_keeps_original_untouched() {
        let head = lit(1).with_next(Some(lit(2)));
        let appended = head.append_to_chain(lit(3));
        assert_eq!(chain_ints(&appended), vec![1, 2, 3]);
        assert_eq!(chain_ints(&head), vec![1, 2]);
    }

    #[test]
    fn chain_borrows_links_from_the_head() {
        let head = lit(1).with_next(Some(lit(2)));
        let links: Vec<&ValuePtr> = head.chain().collect();
        assert_eq!(links.len(), 2);
        assert!(Arc::ptr_eq(links[0], &head));
        assert!(Arc::ptr_eq(links[1], head.next.as_ref().unwrap()));
    }

    #[test]
    fn defining_item_is_copy_on_write() {
        let original = lit(1);
        let shared = Arc::clone(&original);
        let id = ItemId::new_for_tests(7);
        let changed = shared.with_defining_item(id);
        assert!(original.defining_item.is_none());
        assert_eq!(changed.defining_item, Some(id));
    }

    #[test]
    fn literal_source_code_is_json() {
        assert_eq!(
            Value::literal(VmValue::string_list(["a"])).source_code(),
            "[\"a\"]"
        );
    }
}
