//! Property declarations

use std::fmt;

use bitflags::bitflags;

use crate::location::CodeLocation;

/// Declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Bool,
    Int,
    Path,
    PathList,
    String,
    StringList,
    Variant,
    VarList,
}

impl PropertyType {
    /// Parse a type name as written after `property`
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => PropertyType::Bool,
            "int" => PropertyType::Int,
            "path" => PropertyType::Path,
            "pathList" => PropertyType::PathList,
            "string" => PropertyType::String,
            "stringList" => PropertyType::StringList,
            "var" | "variant" => PropertyType::Variant,
            "varList" => PropertyType::VarList,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            PropertyType::Bool => "bool",
            PropertyType::Int => "int",
            PropertyType::Path => "path",
            PropertyType::PathList => "pathList",
            PropertyType::String => "string",
            PropertyType::StringList => "stringList",
            PropertyType::Variant => "variant",
            PropertyType::VarList => "varList",
        }
    }

    /// List-typed properties concatenate their override chains
    pub fn is_list(self) -> bool {
        matches!(
            self,
            PropertyType::PathList | PropertyType::StringList | PropertyType::VarList
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct DeclarationFlags: u32 {
        const READ_ONLY = 1 << 0;
        /// Declared by a builtin item type rather than in a file
        const BUILTIN = 1 << 1;
    }
}

/// Deprecation status of a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    /// Language version that removes (or removed) the property
    pub removal_version: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDeclaration {
    pub name: String,
    pub property_type: PropertyType,
    pub flags: DeclarationFlags,
    pub location: CodeLocation,
    pub deprecation: Option<Deprecation>,
}

impl PropertyDeclaration {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            flags: DeclarationFlags::empty(),
            location: CodeLocation::default(),
            deprecation: None,
        }
    }

    pub fn with_flags(mut self, flags: DeclarationFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_location(mut self, location: CodeLocation) -> Self {
        self.location = location;
        self
    }

    pub fn deprecated(mut self, removal_version: &str, message: &str) -> Self {
        self.deprecation = Some(Deprecation {
            removal_version: removal_version.to_string(),
            message: message.to_string(),
        });
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(DeclarationFlags::READ_ONLY)
    }

    pub fn is_list(&self) -> bool {
        self.property_type.is_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip() {
        for name in ["bool", "int", "path", "pathList", "string", "stringList", "varList"] {
            assert_eq!(PropertyType::from_name(name).unwrap().name(), name);
        }
        assert_eq!(PropertyType::from_name("var"), Some(PropertyType::Variant));
        assert_eq!(PropertyType::from_name("double"), None);
    }

    #[test]
    fn list_types() {
        assert!(PropertyType::StringList.is_list());
        assert!(!PropertyType::Variant.is_list());
    }
}
