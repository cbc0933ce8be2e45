//! Middleware discovery from the source tree.
//!
//! Middleware code is compiled in and registered under a key; the file
//! layout decides which registered modules apply to a route. The key of a
//! file is its path relative to the source root, without extension:
//!
//! ```text
//! src/
//! ├── middleware/
//! │   ├── auth.rs          key "middleware/auth"      (global)
//! │   └── logger.rs        key "middleware/logger"    (global)
//! └── routes/
//!     ├── middleware.rs    key "routes/middleware"
//!     └── admin/
//!         ├── middleware.rs  key "routes/admin/middleware"
//!         └── route.rs
//! ```
//!
//! For `routes/admin/route.rs` the request phase runs, in order: the
//! programmatic preludes, `middleware/auth`, `middleware/logger`,
//! `routes/middleware`, `routes/admin/middleware`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::middleware::{Middleware, SharedMiddleware};
use crate::pipeline::{MiddlewareStack, Phase};

/// File stem of per-directory middleware files.
pub const DIRECTORY_MIDDLEWARE_STEM: &str = "middleware";

/// The middleware exported by one file.
///
/// A file may export a single middleware (request phase) or separate
/// request- and response-phase entries.
#[derive(Clone, Default)]
pub struct MiddlewareModule {
    on_request: Option<SharedMiddleware>,
    on_response: Option<SharedMiddleware>,
}

impl MiddlewareModule {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// A module whose single middleware runs in the request phase.
    pub fn middleware(middleware: impl Middleware) -> Self {
        Self::new().on_request(middleware)
    }

    /// Sets the request-phase entry.
    #[must_use]
    pub fn on_request(mut self, middleware: impl Middleware) -> Self {
        self.on_request = Some(Arc::new(middleware));
        self
    }

    /// Sets the response-phase entry.
    #[must_use]
    pub fn on_response(mut self, middleware: impl Middleware) -> Self {
        self.on_response = Some(Arc::new(middleware));
        self
    }

    /// Returns the request-phase entry.
    pub fn request_entry(&self) -> Option<&SharedMiddleware> {
        self.on_request.as_ref()
    }

    /// Returns the response-phase entry.
    pub fn response_entry(&self) -> Option<&SharedMiddleware> {
        self.on_response.as_ref()
    }
}

impl std::fmt::Debug for MiddlewareModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareModule")
            .field("on_request", &self.on_request.as_ref().map(|m| m.name()))
            .field("on_response", &self.on_response.as_ref().map(|m| m.name()))
            .finish()
    }
}

/// Middleware modules by key.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareRegistry {
    modules: HashMap<String, MiddlewareModule>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` under `key`, e.g. `"routes/admin/middleware"`.
    pub fn register(&mut self, key: &str, module: MiddlewareModule) -> &mut Self {
        self.modules.insert(normalize_key(key), module);
        self
    }

    /// Returns the module registered under `key`.
    pub fn get(&self, key: &str) -> Option<&MiddlewareModule> {
        self.modules.get(&normalize_key(key))
    }

    /// Returns the number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn normalize_key(key: &str) -> String {
    key.replace('\\', "/").trim_matches('/').to_string()
}

/// Resolves and caches the middleware stack of route directories.
#[derive(Debug)]
pub struct MiddlewareDiscovery {
    src_root: PathBuf,
    api_root: PathBuf,
    global_dir: PathBuf,
    registry: MiddlewareRegistry,
    preludes: Vec<MiddlewareModule>,
    global: RwLock<Option<Arc<Vec<MiddlewareModule>>>>,
    stacks: DashMap<PathBuf, Arc<MiddlewareStack>>,
}

impl MiddlewareDiscovery {
    /// Creates a discovery rooted at the API directory.
    ///
    /// The source root defaults to the API directory's parent and the
    /// global middleware directory to `<source root>/middleware`.
    pub fn new(api_root: impl Into<PathBuf>, registry: MiddlewareRegistry) -> Self {
        let api_root = api_root.into();
        let src_root = api_root
            .parent()
            .map_or_else(|| api_root.clone(), Path::to_path_buf);
        let global_dir = src_root.join(DIRECTORY_MIDDLEWARE_STEM);
        Self {
            src_root,
            api_root,
            global_dir,
            registry,
            preludes: Vec::new(),
            global: RwLock::new(None),
            stacks: DashMap::new(),
        }
    }

    /// Overrides the source root used to derive keys.
    #[must_use]
    pub fn with_src_root(mut self, src_root: impl Into<PathBuf>) -> Self {
        self.src_root = src_root.into();
        self
    }

    /// Overrides the global middleware directory.
    #[must_use]
    pub fn with_global_dir(mut self, global_dir: impl Into<PathBuf>) -> Self {
        self.global_dir = global_dir.into();
        self
    }

    /// Adds a module that runs before every discovered one.
    #[must_use]
    pub fn with_prelude(mut self, module: MiddlewareModule) -> Self {
        self.preludes.push(module);
        self
    }

    /// Returns the stack for routes declared in `route_dir`.
    ///
    /// The directory walk happens once per directory; later calls are
    /// served from memory until [`invalidate`](Self::invalidate).
    pub async fn stack_for(&self, route_dir: &Path) -> Arc<MiddlewareStack> {
        let cached = self.stacks.get(route_dir).map(|s| Arc::clone(s.value()));
        if let Some(stack) = cached {
            return stack;
        }

        let global = self.global_modules().await;
        let directories = self.directory_modules(route_dir).await;

        let modules = self.preludes.iter().chain(global.iter()).chain(directories.iter());
        let mut on_request = Vec::new();
        let mut on_response = Vec::new();
        for module in modules {
            on_request.extend(module.on_request.clone());
            on_response.extend(module.on_response.clone());
        }

        let stack = Arc::new(MiddlewareStack::new(on_request, on_response));
        debug!(
            dir = %route_dir.display(),
            request = ?stack.phase(Phase::Request).names(),
            response = ?stack.phase(Phase::Response).names(),
            "resolved middleware stack"
        );
        self.stacks
            .entry(route_dir.to_path_buf())
            .or_insert(stack)
            .value()
            .clone()
    }

    /// Drops every cached stack and the global module list.
    pub fn invalidate(&self) {
        self.stacks.clear();
        *self.global.write() = None;
    }

    async fn global_modules(&self) -> Arc<Vec<MiddlewareModule>> {
        let cached = self.global.read().clone();
        if let Some(global) = cached {
            return global;
        }

        let mut modules = Vec::new();
        match list_files(&self.global_dir).await {
            Ok(files) => {
                for file in files {
                    if let Some(module) = self.lookup(&file) {
                        modules.push(module);
                    }
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.global_dir.display(), "no global middleware directory");
            }
            Err(error) => {
                warn!(dir = %self.global_dir.display(), %error, "cannot read global middleware directory");
            }
        }

        let modules = Arc::new(modules);
        *self.global.write() = Some(Arc::clone(&modules));
        modules
    }

    /// Modules from `middleware.*` files between the API root and
    /// `route_dir`, outermost first.
    async fn directory_modules(&self, route_dir: &Path) -> Vec<MiddlewareModule> {
        let mut found = Vec::new();
        let mut current = Some(route_dir);
        while let Some(dir) = current {
            if !dir.starts_with(&self.api_root) {
                break;
            }
            if let Some(file) = find_directory_middleware(dir).await {
                if let Some(module) = self.lookup(&file) {
                    found.push(module);
                }
            }
            if dir == self.api_root {
                break;
            }
            current = dir.parent();
        }
        found.reverse();
        found
    }

    fn lookup(&self, file: &Path) -> Option<MiddlewareModule> {
        let key = module_key(&self.src_root, file);
        let module = self.registry.get(&key).cloned();
        if module.is_none() {
            warn!(file = %file.display(), %key, "middleware file has no registered module");
        }
        module
    }
}

/// Derives the registry key of a middleware file.
pub fn module_key(src_root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(src_root).unwrap_or(file);
    let without_ext = relative.with_extension("");
    without_ext
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if is_file && !hidden {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

async fn find_directory_middleware(dir: &Path) -> Option<PathBuf> {
    let files = match list_files(dir).await {
        Ok(files) => files,
        Err(error) => {
            warn!(dir = %dir.display(), %error, "cannot read route directory");
            return None;
        }
    };
    files.into_iter().find(|file| {
        file.file_stem().and_then(|s| s.to_str()) == Some(DIRECTORY_MIDDLEWARE_STEM)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use std::fs;

    fn named(name: &'static str) -> impl Middleware {
        from_fn(name, |ctx, next| next.run(ctx))
    }

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_module_key() {
        let root = Path::new("/app/src");
        assert_eq!(
            module_key(root, Path::new("/app/src/routes/admin/middleware.ts")),
            "routes/admin/middleware"
        );
        assert_eq!(module_key(root, Path::new("/app/src/middleware/auth.rs")), "middleware/auth");
    }

    #[tokio::test]
    async fn test_global_then_outer_to_inner() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path();
        touch(src, "middleware/b_logger.rs");
        touch(src, "middleware/a_auth.rs");
        touch(src, "routes/middleware.rs");
        touch(src, "routes/admin/middleware.rs");
        touch(src, "routes/admin/users/route.rs");

        let mut registry = MiddlewareRegistry::new();
        registry
            .register("middleware/a_auth", MiddlewareModule::middleware(named("auth")))
            .register("middleware/b_logger", MiddlewareModule::middleware(named("logger")))
            .register("routes/middleware", MiddlewareModule::middleware(named("root")))
            .register(
                "routes/admin/middleware",
                MiddlewareModule::new()
                    .on_request(named("admin"))
                    .on_response(named("admin-out")),
            );

        let discovery = MiddlewareDiscovery::new(src.join("routes"), registry)
            .with_prelude(MiddlewareModule::new().on_response(named("compression")));
        let stack = discovery.stack_for(&src.join("routes/admin/users")).await;

        assert_eq!(
            stack.phase(Phase::Request).names(),
            vec!["auth", "logger", "root", "admin"]
        );
        assert_eq!(
            stack.phase(Phase::Response).names(),
            vec!["compression", "admin-out"]
        );
    }

    #[tokio::test]
    async fn test_stack_is_cached_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path();
        touch(src, "routes/a/route.rs");

        let discovery = MiddlewareDiscovery::new(src.join("routes"), MiddlewareRegistry::new());
        let first = discovery.stack_for(&src.join("routes/a")).await;

        // A new file is not seen until the cache is invalidated.
        let mut registry = MiddlewareRegistry::new();
        registry.register("routes/a/middleware", MiddlewareModule::middleware(named("late")));
        touch(src, "routes/a/middleware.rs");
        let second = discovery.stack_for(&src.join("routes/a")).await;
        assert!(Arc::ptr_eq(&first, &second));

        discovery.invalidate();
        let third = discovery.stack_for(&src.join("routes/a")).await;
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_unregistered_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path();
        touch(src, "middleware/ghost.rs");
        touch(src, "routes/route.rs");

        let discovery = MiddlewareDiscovery::new(src.join("routes"), MiddlewareRegistry::new());
        let stack = discovery.stack_for(&src.join("routes")).await;
        assert!(stack.phase(Phase::Request).is_empty());
    }
}
