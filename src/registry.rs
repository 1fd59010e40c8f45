//! Resolution of node functions and wrapper constructors by name.
//!
//! User code reaches the engine through a [`FunctionLibrary`]: an ordered
//! collection of named [`LibraryModule`]s, each exporting top-level
//! functions and [`NodeWrapper`](crate::wrappers::NodeWrapper)
//! constructors, the in-process rendition of a directory of source
//! files. When a runner is built, only the names referenced by the loaded
//! sequence are resolved into the [`FunctionRegistry`]; each name must be
//! exported by exactly one module. The registry is immutable once the
//! runner finishes initialization and is safe to read concurrently.
//!
//! # Examples
//!
//! ```
//! use seqloom::registry::{FunctionLibrary, LibraryModule};
//! use serde_json::{json, Value};
//!
//! let library = FunctionLibrary::new().with_module(
//!     LibraryModule::new("greetings").function("hello", |_kwargs| async move {
//!         Ok(json!("Hello world!"))
//!     }),
//! );
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::types::Kwargs;
use crate::wrappers::{NodeWrapper, WrapperError};

/// Error type produced by user node functions.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// An executable node function.
///
/// Implemented automatically for async closures registered through
/// [`LibraryModule::function`]; implement it directly for stateful
/// callables.
#[async_trait]
pub trait NodeFunction: Send + Sync {
    async fn call(&self, kwargs: Kwargs) -> Result<Value, FunctionError>;
}

struct ClosureFunction<F>(F);

#[async_trait]
impl<F, Fut> NodeFunction for ClosureFunction<F>
where
    F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
{
    async fn call(&self, kwargs: Kwargs) -> Result<Value, FunctionError> {
        (self.0)(kwargs).await
    }
}

/// Constructor of a [`NodeWrapper`] from evaluated keyword arguments.
///
/// Implemented for any `Fn(Kwargs) -> Result<Box<dyn NodeWrapper>, WrapperError>`.
pub trait WrapperFactory: Send + Sync {
    fn construct(&self, kwargs: Kwargs) -> Result<Box<dyn NodeWrapper>, WrapperError>;
}

impl<F> WrapperFactory for F
where
    F: Fn(Kwargs) -> Result<Box<dyn NodeWrapper>, WrapperError> + Send + Sync,
{
    fn construct(&self, kwargs: Kwargs) -> Result<Box<dyn NodeWrapper>, WrapperError> {
        self(kwargs)
    }
}

/// Lookup failures of the registry.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    /// The name is not exported by any library module.
    #[error("{item_kind} `{name}` was not found in any library module")]
    #[diagnostic(
        code(seqloom::registry::not_found),
        help("Register the {item_kind} in one of the modules of the FunctionLibrary.")
    )]
    NotFound { item_kind: &'static str, name: String },

    /// The name is exported by several modules; resolution must be unambiguous.
    #[error("{item_kind} `{name}` is defined in several library modules: {modules:?}")]
    #[diagnostic(code(seqloom::registry::not_unique))]
    NotUnique {
        item_kind: &'static str,
        name: String,
        modules: Vec<String>,
    },

    /// Lookup of a name that was never registered for this run.
    #[error("{item_kind} `{name}` has not been registered")]
    #[diagnostic(code(seqloom::registry::unknown_item))]
    Unknown { item_kind: &'static str, name: String },
}

/// One named module of user code: functions plus wrapper constructors.
pub struct LibraryModule {
    name: String,
    functions: FxHashMap<String, Arc<dyn NodeFunction>>,
    wrappers: FxHashMap<String, Arc<dyn WrapperFactory>>,
}

impl LibraryModule {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: FxHashMap::default(),
            wrappers: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an async closure as a node function.
    #[must_use]
    pub fn function<F, Fut>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
    {
        self.functions
            .insert(name.into(), Arc::new(ClosureFunction(function)));
        self
    }

    /// Register a pre-built [`NodeFunction`] object.
    #[must_use]
    pub fn function_object(mut self, name: impl Into<String>, function: Arc<dyn NodeFunction>) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Register a wrapper constructor.
    #[must_use]
    pub fn wrapper<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Kwargs) -> Result<Box<dyn NodeWrapper>, WrapperError> + Send + Sync + 'static,
    {
        self.wrappers.insert(name.into(), Arc::new(factory));
        self
    }
}

/// The user-code surface handed to a runner: an ordered collection of
/// named modules.
#[derive(Default)]
pub struct FunctionLibrary {
    modules: Vec<LibraryModule>,
}

impl FunctionLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(mut self, module: LibraryModule) -> Self {
        self.modules.push(module);
        self
    }

    pub fn add_module(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }
}

/// Resolved callables for one run.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, Arc<dyn NodeFunction>>,
    wrappers: FxHashMap<String, Arc<dyn WrapperFactory>>,
}

impl FunctionRegistry {
    /// Resolve the given function names across the library modules.
    ///
    /// Every name must be exported by exactly one module: no module is a
    /// [`RegistryError::NotFound`], several are a
    /// [`RegistryError::NotUnique`].
    pub fn register_functions(
        &mut self,
        library: &FunctionLibrary,
        names: &FxHashSet<String>,
    ) -> Result<(), RegistryError> {
        for name in names {
            let resolved = resolve(library, name, "function", |module| {
                module.functions.get(name).cloned()
            })?;
            self.functions.insert(name.clone(), resolved);
        }
        Ok(())
    }

    /// Resolve the given wrapper names across the library modules.
    pub fn register_wrappers(
        &mut self,
        library: &FunctionLibrary,
        names: &FxHashSet<String>,
    ) -> Result<(), RegistryError> {
        for name in names {
            let resolved = resolve(library, name, "wrapper", |module| {
                module.wrappers.get(name).cloned()
            })?;
            self.wrappers.insert(name.clone(), resolved);
        }
        Ok(())
    }

    /// Get a previously registered function.
    pub fn function(&self, name: &str) -> Result<Arc<dyn NodeFunction>, RegistryError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown {
                item_kind: "function",
                name: name.to_string(),
            })
    }

    /// Get previously registered wrapper factories by name.
    pub fn wrappers<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<FxHashMap<String, Arc<dyn WrapperFactory>>, RegistryError> {
        let mut resolved = FxHashMap::default();
        for name in names {
            let factory = self
                .wrappers
                .get(name)
                .cloned()
                .ok_or_else(|| RegistryError::Unknown {
                    item_kind: "wrapper",
                    name: name.to_string(),
                })?;
            resolved.insert(name.to_string(), factory);
        }
        Ok(resolved)
    }
}

fn resolve<T: ?Sized>(
    library: &FunctionLibrary,
    name: &str,
    item_kind: &'static str,
    pick: impl Fn(&LibraryModule) -> Option<Arc<T>>,
) -> Result<Arc<T>, RegistryError> {
    let mut hits: Vec<(&str, Arc<T>)> = Vec::new();
    for module in &library.modules {
        if let Some(item) = pick(module) {
            hits.push((module.name(), item));
        }
    }
    match hits.len() {
        0 => Err(RegistryError::NotFound {
            item_kind,
            name: name.to_string(),
        }),
        1 => Ok(hits.remove(0).1),
        _ => Err(RegistryError::NotUnique {
            item_kind,
            name: name.to_string(),
            modules: hits.iter().map(|(module, _)| module.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn library() -> FunctionLibrary {
        FunctionLibrary::new()
            .with_module(
                LibraryModule::new("file1")
                    .function("unique_one", |_| async move { Ok(json!(1)) })
                    .function("shared", |_| async move { Ok(json!("file1")) }),
            )
            .with_module(
                LibraryModule::new("file2")
                    .function("unique_two", |_| async move { Ok(json!(2)) })
                    .function("shared", |_| async move { Ok(json!("file2")) }),
            )
    }

    fn names(names: &[&str]) -> FxHashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn resolves_unique_names() {
        let mut registry = FunctionRegistry::default();
        registry
            .register_functions(&library(), &names(&["unique_one", "unique_two"]))
            .unwrap();
        let f = registry.function("unique_one").unwrap();
        assert_eq!(f.call(Kwargs::default()).await.unwrap(), json!(1));
    }

    #[test]
    fn missing_name_is_an_existence_error() {
        let mut registry = FunctionRegistry::default();
        let err = registry
            .register_functions(&library(), &names(&["nope"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { name, .. } if name == "nope"));
    }

    #[test]
    fn duplicated_name_is_a_uniqueness_error() {
        let mut registry = FunctionRegistry::default();
        let err = registry
            .register_functions(&library(), &names(&["shared"]))
            .unwrap_err();
        match err {
            RegistryError::NotUnique { modules, .. } => {
                assert_eq!(modules.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unregistered_lookup_is_an_unknown_item_error() {
        let registry = FunctionRegistry::default();
        assert!(matches!(
            registry.function("unique_one"),
            Err(RegistryError::Unknown { .. })
        ));
        assert!(matches!(
            registry.wrappers(["w"]),
            Err(RegistryError::Unknown { .. })
        ));
    }
}
