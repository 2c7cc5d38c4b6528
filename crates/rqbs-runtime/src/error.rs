//! Runtime error types

use thiserror::Error;

use crate::location::CodeLocation;

/// Result type for loading, building and evaluation operations
pub type LangResult<T> = Result<T, LangError>;

/// Errors raised while reading, building, merging and evaluating items
#[derive(Debug, Error)]
pub enum LangError {
    // -------------------------------------------------------------------------
    // Structural errors (abort loading of the enclosing file)
    // -------------------------------------------------------------------------
    #[error("{location}: Duplicate binding for '{name}' (previous binding at {previous})")]
    DuplicateBinding {
        name: String,
        location: CodeLocation,
        previous: CodeLocation,
    },

    #[error("{location}: The id '{id}' is not unique (first use at {previous})")]
    DuplicateId {
        id: String,
        location: CodeLocation,
        previous: CodeLocation,
    },

    #[error("{location}: id: must be followed by identifier")]
    InvalidId { location: CodeLocation },

    #[error("{location}: Unexpected item type '{name}'")]
    UnknownItemType { name: String, location: CodeLocation },

    #[error("{location}: Unknown property type '{type_name}'")]
    UnknownPropertyType {
        type_name: String,
        location: CodeLocation,
    },

    #[error("{location}: Items of type '{child}' cannot be children of '{parent}' items")]
    InvalidChildType {
        child: String,
        parent: String,
        location: CodeLocation,
    },

    #[error("{location}: Binding to non-item property '{name}'.")]
    BindingToNonItem { name: String, location: CodeLocation },

    #[error("{location}: Cannot set read-only property '{name}' (declared at {declared})")]
    ReadOnlyProperty {
        name: String,
        location: CodeLocation,
        declared: CodeLocation,
    },

    #[error("{location}: Incompatible value type in unconditional value for property '{name}'")]
    IncompatibleValueType { name: String, location: CodeLocation },

    #[error("{location}: Property '{name}' is not declared.")]
    UndeclaredProperty { name: String, location: CodeLocation },

    #[error("{location}: The property '{name}' can no longer be used. It was removed in version {removed_in}.")]
    ExpiredProperty {
        name: String,
        removed_in: String,
        location: CodeLocation,
    },

    #[error("{location}: {message}")]
    InvalidPropertiesBlock {
        message: String,
        location: CodeLocation,
    },

    #[error("Type inheritance cycle detected: {0}")]
    InheritanceCycle(String),

    #[error("{location}: {message}")]
    InvalidImport {
        message: String,
        location: CodeLocation,
    },

    // -------------------------------------------------------------------------
    // Evaluation errors (attached to the property being evaluated)
    // -------------------------------------------------------------------------
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Undefined property: {0}")]
    UndefinedProperty(String),

    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    #[error("Value assigned to property '{name}' does not have type '{expected}' (got {actual})")]
    PropertyTypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Cannot call non-function value of type {0}")]
    NotCallable(String),

    #[error("Wrong number of arguments: expected {expected}, got {actual}")]
    WrongArgCount { expected: usize, actual: usize },

    #[error("Circular reference detected while evaluating property '{0}'")]
    CircularReference(String),

    #[error("Index out of bounds: {index} (length: {length})")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Stack overflow")]
    StackOverflow,

    #[error("{0}")]
    InvalidOriginal(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // -------------------------------------------------------------------------
    // Loading errors
    // -------------------------------------------------------------------------
    #[error("Cannot read file '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Parse error in '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Dependency '{name}' not found")]
    ModuleNotFound { name: String },

    #[error("Module '{name}' is required but not present")]
    ModuleNotPresent { name: String },

    #[error("Cyclic module dependency: {0}")]
    ModuleCycle(String),

    #[error("Module '{module}' has version {version}, which is not in the range {range}")]
    VersionMismatch {
        module: String,
        version: String,
        range: String,
    },

    // -------------------------------------------------------------------------
    // Merge errors
    // -------------------------------------------------------------------------
    #[error("Conflicting scalar values for property '{property}' of module '{module}': '{first}' and '{second}'")]
    ConflictingScalar {
        module: String,
        property: String,
        first: String,
        second: String,
    },

    // -------------------------------------------------------------------------
    // Property override errors
    // -------------------------------------------------------------------------
    #[error("Unknown scope in property override '{0}'")]
    UnknownOverrideScope(String),

    #[error("Property override '{0}' refers to an undeclared property")]
    UnknownOverrideProperty(String),

    #[error("Invalid value for property override '{key}': {message}")]
    InvalidOverrideValue { key: String, message: String },

    // -------------------------------------------------------------------------
    // Item pool
    // -------------------------------------------------------------------------
    #[error("Property '{name}' of item {item} was set while its change notification was running")]
    ReentrantMutation { item: String, name: String },

    /// An error that happened while evaluating the property at `location`
    #[error("{location}: {source}")]
    AtLocation {
        location: CodeLocation,
        #[source]
        source: Box<LangError>,
    },
}

impl LangError {
    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        LangError::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an undefined variable error
    pub fn undefined_var(name: impl Into<String>) -> Self {
        LangError::UndefinedVariable(name.into())
    }

    /// Create an undefined property error
    pub fn undefined_prop(name: impl Into<String>) -> Self {
        LangError::UndefinedProperty(name.into())
    }

    /// Attach a location unless the error already carries one.
    pub fn at(self, location: &CodeLocation) -> Self {
        if self.location().is_some() || !location.is_valid() {
            return self;
        }
        LangError::AtLocation {
            location: location.clone(),
            source: Box::new(self),
        }
    }

    /// The source location this error refers to, if any
    pub fn location(&self) -> Option<&CodeLocation> {
        match self {
            LangError::DuplicateBinding { location, .. }
            | LangError::DuplicateId { location, .. }
            | LangError::InvalidId { location }
            | LangError::UnknownItemType { location, .. }
            | LangError::UnknownPropertyType { location, .. }
            | LangError::InvalidChildType { location, .. }
            | LangError::BindingToNonItem { location, .. }
            | LangError::ReadOnlyProperty { location, .. }
            | LangError::IncompatibleValueType { location, .. }
            | LangError::UndeclaredProperty { location, .. }
            | LangError::ExpiredProperty { location, .. }
            | LangError::InvalidPropertiesBlock { location, .. }
            | LangError::InvalidImport { location, .. }
            | LangError::AtLocation { location, .. } => Some(location),
            _ => None,
        }
    }

    /// The innermost error, with location wrappers removed
    pub fn root_cause(&self) -> &LangError {
        match self {
            LangError::AtLocation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_wraps_only_once() {
        let loc = CodeLocation::new("a.qbs", 3, 7);
        let other = CodeLocation::new("b.qbs", 1, 1);
        let err = LangError::undefined_var("x").at(&loc).at(&other);
        assert_eq!(err.location(), Some(&loc));
        assert!(matches!(err.root_cause(), LangError::UndefinedVariable(_)));
        assert_eq!(err.to_string(), "a.qbs:3:7: Undefined variable: x");
    }

    #[test]
    fn invalid_location_is_not_attached() {
        let err = LangError::DivisionByZero.at(&CodeLocation::default());
        assert!(err.location().is_none());
    }
}
