//! Runtime value types produced by evaluation

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use rqbs_parser::{FunctionBody, Identifier};

use crate::evaluator::ExternalFn;
use crate::pool::ItemId;
use crate::scope::ScopeRef;

/// The core runtime value type
#[derive(Debug, Clone)]
pub enum VmValue {
    /// `undefined`, also the value of declared but unset properties
    Undefined,

    /// Null value
    Null,

    /// Boolean value
    Boolean(bool),

    /// 64-bit integer
    Int(i64),

    /// 64-bit floating point
    Float(f64),

    /// String (shared, immutable)
    String(Arc<str>),

    /// Immutable list
    List(Arc<Vec<VmValue>>),

    /// Plain object (preserves insertion order)
    Object(Arc<IndexMap<String, VmValue>>),

    /// Reference to an item of the pool
    Item(ItemId),

    /// Closure or external function
    Function(Arc<Function>),
}

/// A callable value
pub enum Function {
    /// Function written in the expression language
    Closure {
        name: Option<String>,
        params: Vec<Identifier>,
        body: Arc<FunctionBody>,
        scope: ScopeRef,
    },
    /// Native function, optionally bound to a receiver passed as first argument
    External {
        name: String,
        func: ExternalFn,
        this: Option<VmValue>,
    },
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Closure { name, params, .. } => f
                .debug_struct("Closure")
                .field("name", name)
                .field("params", &params.iter().map(|p| &p.node).collect::<Vec<_>>())
                .finish(),
            Function::External { name, this, .. } => f
                .debug_struct("External")
                .field("name", name)
                .field("this", this)
                .finish(),
        }
    }
}

impl VmValue {
    /// Create a string value
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        VmValue::String(s.into())
    }

    /// Create a list value
    pub fn list(items: Vec<VmValue>) -> Self {
        VmValue::List(Arc::new(items))
    }

    /// Create an object value
    pub fn object(entries: IndexMap<String, VmValue>) -> Self {
        VmValue::Object(Arc::new(entries))
    }

    /// Create a list of strings
    pub fn string_list<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> Self {
        VmValue::list(
            items
                .into_iter()
                .map(|s| VmValue::string(s.as_ref()))
                .collect(),
        )
    }

    /// Create an external function value
    pub fn external(name: impl Into<String>, func: ExternalFn) -> Self {
        VmValue::Function(Arc::new(Function::External {
            name: name.into(),
            func,
            this: None,
        }))
    }

    /// Name used for registry lookups and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            VmValue::Undefined => "Undefined",
            VmValue::Null => "Null",
            VmValue::Boolean(_) => "Boolean",
            VmValue::Int(_) | VmValue::Float(_) => "Number",
            VmValue::String(_) => "String",
            VmValue::List(_) => "List",
            VmValue::Object(_) => "Object",
            VmValue::Item(_) => "Item",
            VmValue::Function(_) => "Function",
        }
    }

    /// Result of the `typeof` operator
    pub fn typeof_name(&self) -> &'static str {
        match self {
            VmValue::Undefined => "undefined",
            VmValue::Boolean(_) => "boolean",
            VmValue::Int(_) | VmValue::Float(_) => "number",
            VmValue::String(_) => "string",
            VmValue::Function(_) => "function",
            VmValue::Null | VmValue::List(_) | VmValue::Object(_) | VmValue::Item(_) => "object",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, VmValue::Undefined)
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, VmValue::Undefined | VmValue::Null)
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            VmValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            VmValue::Int(i) => Some(*i),
            VmValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get as f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            VmValue::Float(f) => Some(*f),
            VmValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            VmValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as list
    pub fn as_list(&self) -> Option<&[VmValue]> {
        match self {
            VmValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<ItemId> {
        match self {
            VmValue::Item(id) => Some(*id),
            _ => None,
        }
    }

    /// Truthiness as used by conditions and the logical operators
    pub fn is_truthy(&self) -> bool {
        match self {
            VmValue::Undefined | VmValue::Null => false,
            VmValue::Boolean(b) => *b,
            VmValue::Int(i) => *i != 0,
            VmValue::Float(f) => *f != 0.0 && !f.is_nan(),
            VmValue::String(s) => !s.is_empty(),
            VmValue::List(_) | VmValue::Object(_) | VmValue::Item(_) | VmValue::Function(_) => {
                true
            }
        }
    }

    /// Numeric conversion used by the relational operators
    pub fn to_number(&self) -> Option<f64> {
        match self {
            VmValue::Int(i) => Some(*i as f64),
            VmValue::Float(f) => Some(*f),
            VmValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            VmValue::Null => Some(0.0),
            VmValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    trimmed.parse().ok()
                }
            }
            _ => None,
        }
    }

    /// `==` comparison: `null == undefined`, numbers compare across
    /// representations, strings compare with numbers numerically.
    pub fn loose_eq(&self, other: &VmValue) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (VmValue::String(_), VmValue::Int(_) | VmValue::Float(_))
            | (VmValue::Int(_) | VmValue::Float(_), VmValue::String(_))
            | (VmValue::Boolean(_), _)
            | (_, VmValue::Boolean(_)) => match (self.to_number(), other.to_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            _ => self.strict_eq(other),
        }
    }

    /// `===` comparison: lists, objects and functions compare by identity
    pub fn strict_eq(&self, other: &VmValue) -> bool {
        match (self, other) {
            (VmValue::List(a), VmValue::List(b)) => Arc::ptr_eq(a, b),
            (VmValue::Object(a), VmValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => self == other,
        }
    }
}

/// Number formatting following script conventions (`2.0` prints as `2`)
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for VmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmValue::Undefined => write!(f, "undefined"),
            VmValue::Null => write!(f, "null"),
            VmValue::Boolean(b) => write!(f, "{}", b),
            VmValue::Int(i) => write!(f, "{}", i),
            VmValue::Float(n) => write!(f, "{}", format_number(*n)),
            VmValue::String(s) => write!(f, "{}", s),
            VmValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{}", item)?;
                    }
                }
                Ok(())
            }
            VmValue::Object(_) => write!(f, "[object Object]"),
            VmValue::Item(id) => write!(f, "[item {}]", id),
            VmValue::Function(func) => match func.as_ref() {
                Function::Closure { name, .. } => {
                    write!(f, "function {}()", name.as_deref().unwrap_or(""))
                }
                Function::External { name, .. } => write!(f, "function {}()", name),
            },
        }
    }
}

// Structural equality, used by tests and `==` on primitive values
impl PartialEq for VmValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (VmValue::Undefined, VmValue::Undefined) => true,
            (VmValue::Null, VmValue::Null) => true,
            (VmValue::Boolean(a), VmValue::Boolean(b)) => a == b,
            (VmValue::Int(a), VmValue::Int(b)) => a == b,
            (VmValue::Float(a), VmValue::Float(b)) => a == b,
            (VmValue::Int(a), VmValue::Float(b)) | (VmValue::Float(b), VmValue::Int(a)) => {
                (*a as f64) == *b
            }
            (VmValue::String(a), VmValue::String(b)) => a == b,
            (VmValue::List(a), VmValue::List(b)) => a == b,
            (VmValue::Object(a), VmValue::Object(b)) => a == b,
            (VmValue::Item(a), VmValue::Item(b)) => a == b,
            (VmValue::Function(a), VmValue::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialOrd for VmValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (VmValue::Int(a), VmValue::Int(b)) => a.partial_cmp(b),
            (VmValue::String(a), VmValue::String(b)) => a.partial_cmp(b),
            _ => self.to_number()?.partial_cmp(&other.to_number()?),
        }
    }
}

impl From<&serde_json::Value> for VmValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => VmValue::Null,
            serde_json::Value::Bool(b) => VmValue::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => VmValue::Int(i),
                None => VmValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => VmValue::string(s.as_str()),
            serde_json::Value::Array(items) => VmValue::list(items.iter().map(VmValue::from).collect()),
            serde_json::Value::Object(entries) => VmValue::object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), VmValue::from(v)))
                    .collect(),
            ),
        }
    }
}

// Serde serialization
impl Serialize for VmValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            VmValue::Undefined | VmValue::Null => serializer.serialize_none(),
            VmValue::Boolean(b) => serializer.serialize_bool(*b),
            VmValue::Int(i) => serializer.serialize_i64(*i),
            VmValue::Float(f) => serializer.serialize_f64(*f),
            VmValue::String(s) => serializer.serialize_str(s),
            VmValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            VmValue::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            VmValue::Item(_) | VmValue::Function(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_follows_script_conversion() {
        assert_eq!(VmValue::Float(2.0).to_string(), "2");
        assert_eq!(VmValue::Float(2.5).to_string(), "2.5");
        assert_eq!(
            VmValue::list(vec![VmValue::Int(1), VmValue::Undefined, VmValue::string("a")])
                .to_string(),
            "1,,a"
        );
        assert_eq!(VmValue::Undefined.to_string(), "undefined");
    }

    #[test]
    fn truthiness() {
        assert!(!VmValue::Undefined.is_truthy());
        assert!(!VmValue::string("").is_truthy());
        assert!(!VmValue::Int(0).is_truthy());
        assert!(VmValue::list(vec![]).is_truthy());
        assert!(VmValue::string("0").is_truthy());
    }

    #[test]
    fn equality_flavours() {
        assert!(VmValue::Null.loose_eq(&VmValue::Undefined));
        assert!(!VmValue::Null.strict_eq(&VmValue::Undefined));
        assert!(VmValue::string("1").loose_eq(&VmValue::Int(1)));
        assert!(!VmValue::string("1").strict_eq(&VmValue::Int(1)));
        assert!(VmValue::Int(1).strict_eq(&VmValue::Float(1.0)));
        let list = VmValue::list(vec![VmValue::Int(1)]);
        assert!(list.strict_eq(&list.clone()));
        assert!(!list.strict_eq(&VmValue::list(vec![VmValue::Int(1)])));
    }

    #[test]
    fn serializes_undefined_as_null() {
        let value = VmValue::list(vec![VmValue::Undefined, VmValue::Int(3)]);
        assert_eq!(serde_json::to_string(&value).unwrap(), "[null,3]");
    }
}
