//! rqbs runtime
//!
//! This crate turns parsed build descriptions into items, evaluates their
//! properties and unifies module instances that a product reaches on more
//! than one dependency path.

pub mod builtins;
pub mod declaration;
pub mod error;
pub mod evaluator;
pub mod file;
pub mod item;
pub mod location;
pub mod module_merger;
pub mod modules;
pub mod overrides;
pub mod paths;
pub mod pool;
pub mod project;
pub mod reader;
pub mod scope;
pub mod value;
pub mod variant;
pub mod version;

mod builder;
mod script;

pub use declaration::{DeclarationFlags, PropertyDeclaration, PropertyType};
pub use error::{LangError, LangResult};
pub use evaluator::{CacheInvalidator, Evaluator, ExternalFn, ExternalRegistry};
pub use item::{Item, ItemType, ModuleEdge};
pub use location::CodeLocation;
pub use module_merger::{ConflictPolicy, MergeOptions, MergeReport, ModuleMerger};
pub use modules::ModuleLoader;
pub use overrides::PropertyOverrides;
pub use pool::{ItemId, ItemObserver, ItemPool};
pub use project::{
    ProjectResolver, ResolveOptions, ResolvedGroup, ResolvedModule, ResolvedProduct, ResolvedProject,
};
pub use reader::ItemReader;
pub use scope::{Scope, ScopeRef};
pub use value::{Value, ValuePtr};
pub use variant::{Function, VmValue};
pub use version::{Version, VersionRange};
