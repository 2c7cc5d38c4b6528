//! Item reader
//!
//! Loads item files and script files, caches their syntax trees, resolves
//! type names to files and finds module prototypes. Every call to
//! [`ItemReader::read_file`] builds a fresh item tree, so items are never
//! shared between two users of the same type.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::builder::ItemBuilder;
use crate::error::{LangError, LangResult};
use crate::evaluator::ExternalRegistry;
use crate::file::ScriptModule;
use crate::item::ItemType;
use crate::paths;
use crate::pool::{ItemId, ItemPool};

/// A parsed item file together with its text
#[derive(Debug)]
pub(crate) struct ParsedFile {
    pub source: Arc<str>,
    pub ast: rqbs_parser::File,
}

/// Type name -> file of one directory
type TypeMap = FxHashMap<String, PathBuf>;

pub struct ItemReader {
    search_paths: Vec<PathBuf>,
    externals: Arc<ExternalRegistry>,
    /// Sources registered in memory, preferred over the file system
    sources: FxHashMap<PathBuf, Arc<str>>,
    files: FxHashMap<PathBuf, Arc<ParsedFile>>,
    scripts: FxHashMap<PathBuf, Arc<ScriptModule>>,
    type_maps: FxHashMap<PathBuf, Arc<TypeMap>>,
    /// Module prototypes by qualified name; `None` if no file provides it
    modules: FxHashMap<String, Option<ItemId>>,
    /// Files whose item tree is currently being built
    inheritance_stack: Vec<PathBuf>,
}

impl ItemReader {
    pub fn new(search_paths: Vec<PathBuf>, externals: Arc<ExternalRegistry>) -> Self {
        Self {
            search_paths,
            externals,
            sources: FxHashMap::default(),
            files: FxHashMap::default(),
            scripts: FxHashMap::default(),
            type_maps: FxHashMap::default(),
            modules: FxHashMap::default(),
            inheritance_stack: Vec::new(),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
        self.type_maps.clear();
    }

    pub fn externals(&self) -> &Arc<ExternalRegistry> {
        &self.externals
    }

    /// Register file contents that do not exist on disk
    pub fn set_source(&mut self, path: impl AsRef<Path>, text: impl Into<Arc<str>>) {
        let path = normalize(path.as_ref());
        self.files.remove(&path);
        self.scripts.remove(&path);
        self.type_maps.clear();
        self.sources.insert(path, text.into());
    }

    /// Build a fresh item tree for a file and return its root item
    pub fn read_file(&mut self, pool: &mut ItemPool, path: &Path) -> LangResult<ItemId> {
        let path = normalize(path);
        if self.inheritance_stack.contains(&path) {
            let chain: Vec<String> = self
                .inheritance_stack
                .iter()
                .chain(std::iter::once(&path))
                .map(|p| paths::to_slash_string(p))
                .collect();
            return Err(LangError::InheritanceCycle(chain.join(" -> ")));
        }

        let parsed = self.parsed_file(&path)?;
        tracing::debug!(path = %path.display(), "reading item file");
        self.inheritance_stack.push(path.clone());
        let result = ItemBuilder::build(self, pool, &path, parsed);
        self.inheritance_stack.pop();
        result
    }

    fn source(&self, path: &Path) -> LangResult<Arc<str>> {
        if let Some(source) = self.sources.get(path) {
            return Ok(Arc::clone(source));
        }
        std::fs::read_to_string(path)
            .map(Arc::from)
            .map_err(|e| LangError::Io {
                path: paths::to_slash_string(path),
                message: e.to_string(),
            })
    }

    pub(crate) fn parsed_file(&mut self, path: &Path) -> LangResult<Arc<ParsedFile>> {
        if let Some(parsed) = self.files.get(path) {
            return Ok(Arc::clone(parsed));
        }
        let source = self.source(path)?;
        let ast = rqbs_parser::parse_file(&source).map_err(|e| LangError::Parse {
            path: paths::to_slash_string(path),
            message: e.to_string(),
        })?;
        let parsed = Arc::new(ParsedFile { source, ast });
        self.files.insert(path.to_path_buf(), Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Functions of a script file, parsed once per path
    pub(crate) fn script(&mut self, path: &Path) -> LangResult<Arc<ScriptModule>> {
        let path = normalize(path);
        if let Some(script) = self.scripts.get(&path) {
            return Ok(Arc::clone(script));
        }
        let source = self.source(&path)?;
        let script = rqbs_parser::parse_script(&source).map_err(|e| LangError::Parse {
            path: paths::to_slash_string(&path),
            message: e.to_string(),
        })?;
        let module = Arc::new(ScriptModule::new(path.clone(), script.functions));
        self.scripts.insert(path, Arc::clone(&module));
        Ok(module)
    }

    // =========================================================================
    // Type resolution
    // =========================================================================

    /// Directories whose item files become types of `file`: the file's own
    /// directory, its directory imports, then `imports/` of every search path
    pub(crate) fn type_directories(&self, file: &Path, imported: &[PathBuf]) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = file.parent() {
            dirs.push(dir.to_path_buf());
        }
        dirs.extend(imported.iter().cloned());
        dirs.extend(self.search_paths.iter().map(|p| p.join("imports")));
        dirs
    }

    /// Resolve a possibly dotted type name (`Foo.Bar` -> `Foo/Bar.qbs`)
    pub(crate) fn resolve_type(&mut self, name: &[String], dirs: &[PathBuf]) -> Option<PathBuf> {
        let (last, prefix) = name.split_last()?;
        for dir in dirs {
            let dir = prefix.iter().fold(normalize(dir), |d, segment| d.join(segment));
            if let Some(path) = self.type_map(&dir).get(last) {
                return Some(path.clone());
            }
        }
        None
    }

    fn type_map(&mut self, dir: &Path) -> Arc<TypeMap> {
        if let Some(map) = self.type_maps.get(dir) {
            return Arc::clone(map);
        }
        let map = Arc::new(
            self.item_files_in(dir)
                .into_iter()
                .filter_map(|path| {
                    let stem = path.file_stem()?.to_str()?.to_string();
                    Some((stem, path))
                })
                .collect::<TypeMap>(),
        );
        self.type_maps.insert(dir.to_path_buf(), Arc::clone(&map));
        map
    }

    /// `.qbs` files of a directory, on disk and in memory, sorted by name
    fn item_files_in(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .sources
            .keys()
            .filter(|p| p.parent() == Some(dir) && is_item_file(p))
            .cloned()
            .collect();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = normalize(&entry.path());
                if is_item_file(&path) && path.is_file() && !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    // =========================================================================
    // Module prototypes
    // =========================================================================

    /// The prototype item of a module, loaded once per name.
    ///
    /// Looks in `modules/<name segments>/` below `project_dir` and every
    /// search path; the first item file whose root is a `Module` wins.
    pub fn module_prototype(
        &mut self,
        pool: &mut ItemPool,
        name: &[String],
        project_dir: Option<&Path>,
    ) -> LangResult<Option<ItemId>> {
        let key = name.join(".");
        if let Some(cached) = self.modules.get(&key) {
            return Ok(*cached);
        }

        let roots: Vec<PathBuf> = project_dir
            .map(Path::to_path_buf)
            .into_iter()
            .chain(self.search_paths.iter().cloned())
            .collect();
        let mut found = None;
        'search: for root in roots {
            let dir = name
                .iter()
                .fold(normalize(&root).join("modules"), |d, segment| d.join(segment));
            for file in self.item_files_in(&dir) {
                let item = self.read_file(pool, &file)?;
                if pool.item_type(item) == ItemType::Module {
                    tracing::debug!(module = %key, path = %file.display(), "loaded module prototype");
                    found = Some(item);
                    break 'search;
                }
            }
        }
        self.modules.insert(key, found);
        Ok(found)
    }
}

fn is_item_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "qbs")
}

fn normalize(path: &Path) -> PathBuf {
    paths::clean_path(path)
}
