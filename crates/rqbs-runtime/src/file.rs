//! Per-file context shared by every value read from one file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use rqbs_parser::{FunctionBody, FunctionDecl, Span};

use crate::location::{CodeLocation, LineIndex};
use crate::pool::ItemId;
use crate::scope::Scope;
use crate::variant::{Function, VmValue};

/// Something bound to an import alias
#[derive(Debug, Clone)]
pub enum ImportValue {
    /// A script file's functions
    Script(Arc<ScriptModule>),
    /// A namespace of the external registry
    Namespace(String),
}

/// A loaded item file
#[derive(Debug)]
pub struct FileContext {
    pub path: PathBuf,
    pub dir: PathBuf,
    display_path: Arc<str>,
    lines: LineIndex,
    /// Holds every `id:` of the file as an item-valued property
    pub id_scope: ItemId,
    /// Import aliases in declaration order
    pub imports: Vec<(String, ImportValue)>,
}

impl FileContext {
    pub fn new(
        path: impl Into<PathBuf>,
        source: &str,
        id_scope: ItemId,
        imports: Vec<(String, ImportValue)>,
    ) -> Self {
        let path = path.into();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            display_path: crate::paths::to_slash_string(&path).into(),
            path,
            dir,
            lines: LineIndex::new(source),
            id_scope,
            imports,
        }
    }

    pub fn location(&self, span: Span) -> CodeLocation {
        self.lines.location(&self.display_path, span)
    }

    pub fn display_path(&self) -> &Arc<str> {
        &self.display_path
    }

    pub fn import(&self, alias: &str) -> Option<&ImportValue> {
        self.imports
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, value)| value)
    }
}

/// Functions of an imported script file
#[derive(Debug)]
pub struct ScriptModule {
    pub path: PathBuf,
    functions: IndexMap<String, Arc<FunctionDecl>>,
}

impl ScriptModule {
    pub fn new(path: impl Into<PathBuf>, functions: Vec<FunctionDecl>) -> Self {
        Self {
            path: path.into(),
            functions: functions
                .into_iter()
                .map(|f| (f.name.node.clone(), Arc::new(f)))
                .collect(),
        }
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// A closure for the named function; its scope sees the module's other functions.
    pub fn function(self: &Arc<Self>, name: &str) -> Option<VmValue> {
        let decl = self.functions.get(name)?;
        Some(VmValue::Function(Arc::new(Function::Closure {
            name: Some(name.to_string()),
            params: decl.params.clone(),
            body: Arc::new(FunctionBody::Block(decl.body.clone())),
            scope: Scope::script(Arc::clone(self)),
        })))
    }

    /// All functions as an object, the value of the import alias
    pub fn as_object(self: &Arc<Self>) -> VmValue {
        VmValue::object(
            self.functions
                .keys()
                .filter_map(|name| Some((name.clone(), self.function(name)?)))
                .collect(),
        )
    }
}
