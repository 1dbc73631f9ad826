//! Plugin runtime (§4.7): discovery, isolation, load/unload, and hot reload
//! of dynamically loadable code units, plus the endpoint/service routing
//! surface the event processor consults for them.
//!
//! **(ADDED, new module)** Nothing in the teacher crate loads code at
//! runtime, so the shape here is grounded on the *pattern*, not a teacher
//! file: a safe wrapper over [`libloading::Library`] in the same register
//! as [`socket2`](https://docs.rs/socket2)'s wrapper over the platform
//! socket API elsewhere in this crate — a thin, typed layer over a C ABI
//! this crate doesn't implement itself. The lock-guarded-mutation /
//! snapshot-for-readers split mirrors the teacher's own
//! `ArrayQueue`/`SegQueue` preference for lock-free reads over a shared
//! resource (`pool.rs`, `server/server_impl.rs`): here the resource is a
//! service/endpoint table instead of a buffer queue, so the read side is a
//! `RwLock<Arc<_>>` snapshot rather than a lock-free queue, but the intent
//! — never hold a lock across a callback into foreign code — is the same.

use crate::middleware::{FileProcessArgs, HttpEntity};
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::sync::Mutex;

/// Lifecycle of one plugin unit (§3 "Plugin instance", §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    NotLoaded,
    Initialized,
    Loaded,
    Unloaded,
    Faulted,
}

/// Failure surfaced by a plugin hook or by the loader itself.
#[derive(Debug)]
pub enum PluginError {
    /// Dynamic-library open/symbol-lookup failure (only for assembly-backed
    /// loaders; manual plugins never hit this).
    Load(libloading::Error),
    /// `Plugin::init` returned an error.
    InitFailed(String),
    /// `Plugin::load` returned an error.
    LoadFailed(String),
    Io(io::Error),
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::Load(err) => write!(f, "plugin library error: {err}"),
            PluginError::InitFailed(msg) => write!(f, "plugin init failed: {msg}"),
            PluginError::LoadFailed(msg) => write!(f, "plugin load failed: {msg}"),
            PluginError::Io(err) => write!(f, "plugin io error: {err}"),
        }
    }
}

impl std::error::Error for PluginError {}

impl From<libloading::Error> for PluginError {
    fn from(err: libloading::Error) -> Self {
        PluginError::Load(err)
    }
}

impl From<io::Error> for PluginError {
    fn from(err: io::Error) -> Self {
        PluginError::Io(err)
    }
}

/// Whether an exported service may be replaced by a later `init` call and
/// whether it should survive past its publishing plugin's unload (§3's
/// `(Type, instance, flags)` export triple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceFlags {
    pub replaceable: bool,
}

/// Handed to a [`Plugin`]'s `init` hook so it can publish typed services
/// without the registry exposing its internal map.
#[derive(Default)]
pub struct ServicePublisher {
    services: HashMap<TypeId, (Arc<dyn Any + Send + Sync>, ServiceFlags)>,
}

impl ServicePublisher {
    pub fn publish<T: Any + Send + Sync>(&mut self, instance: Arc<T>, flags: ServiceFlags) {
        self.services.insert(TypeId::of::<T>(), (instance, flags));
    }
}

/// One routable endpoint a plugin exports: a request path and the handler
/// invoked when the event processor dispatches to it. Grounded on
/// [`Middleware::process`](crate::middleware::Middleware::process)'s
/// `(entity) -> FileProcessArgs` shape — a plugin endpoint is effectively a
/// single-path middleware stage, published dynamically instead of wired at
/// startup.
pub struct Endpoint {
    pub path: String,
    pub handler: Arc<dyn PluginHandler>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("path", &self.path).finish()
    }
}

/// A plugin endpoint's request handler.
pub trait PluginHandler: Send + Sync {
    fn handle(&self, entity: &mut HttpEntity) -> FileProcessArgs;
}

/// A console command sink a plugin may register (§4.7 "console-command routing").
pub trait ConsoleCommandSink: Send + Sync {
    /// Returns `Some(output)` if this plugin claims `command`, `None` to let
    /// the registry try the next plugin claiming the same name.
    fn run(&self, command: &str) -> Option<String>;
}

/// One loadable implementation a plugin unit exports.
///
/// `init`/`load`/`unload` mirror §4.7's load-timing table exactly:
/// `init` enumerates and prepares (may publish services), `load` executes
/// the unit's startup and returns its endpoints, `unload` reverses both.
/// A manual plugin (constructed in-process, §3) implements this trait
/// directly and is registered via [`PluginRegistry::register_manual`],
/// bypassing [`PluginLoader`]'s dynamic-library machinery while sharing the
/// same state machine.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once, before `load`. May publish services via `publisher`.
    fn init(&mut self, publisher: &mut ServicePublisher) -> Result<(), PluginError> {
        let _ = publisher;
        Ok(())
    }

    /// Executes the plugin's startup and returns the endpoints it exports.
    fn load(&mut self) -> Result<Vec<Endpoint>, PluginError>;

    /// Reverses `load`. Exceptions here are logged by the caller but never
    /// prevent the transition to `Unloaded` (§4.7 failure semantics).
    fn unload(&mut self) {}

    /// Optional console-command sink; `None` if this plugin doesn't handle commands.
    fn console_sink(&self) -> Option<Arc<dyn ConsoleCommandSink>> {
        None
    }
}

/// Signature exported by a plugin's shared library (`.dll`/`.so`/`.dylib`),
/// looked up by [`PluginLoader::open`] under the symbol name
/// [`PLUGIN_ENTRY_SYMBOL`]. Returns a freshly boxed [`Plugin`] trait object;
/// ownership passes to the loader, which drops it (running `unload` first)
/// when the loader itself is dropped or reloaded.
pub type PluginEntryFn = unsafe extern "C" fn() -> *mut dyn Plugin;

/// Exported symbol name a plugin shared library must provide.
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"_plugin_create";

/// One isolated code unit: either a dynamically loaded library or a plugin
/// constructed in-process ("manual", §3). Owns the plugin implementation's
/// lifecycle; `library` keeps the `dlopen` handle alive for as long as the
/// loader exists (dropping it before the boxed `Plugin` would leave that
/// box's vtable pointing at unmapped code).
pub struct PluginLoader {
    path: PathBuf,
    library: Option<libloading::Library>,
    plugin: Option<Box<dyn Plugin>>,
    state: PluginState,
    endpoints: Vec<Arc<Endpoint>>,
    services: HashMap<TypeId, (Arc<dyn Any + Send + Sync>, ServiceFlags)>,
    load_duration: Option<Duration>,
}

impl PluginLoader {
    /// Opens `path` as a shared library and resolves [`PLUGIN_ENTRY_SYMBOL`],
    /// transitioning straight to `NotLoaded` (the library is open, but
    /// `init`/`load` haven't run yet). Dynamic-loading failures are the
    /// caller's to log; they don't panic.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PluginError> {
        let path = path.into();
        // SAFETY: the caller vouches that `path` names a plugin library
        // built against this crate's `Plugin`/`PluginEntryFn` ABI; loading
        // arbitrary code is inherently unsafe and the same contract every
        // `dlopen`-based plugin system in the ecosystem signs up to.
        let library = unsafe { libloading::Library::new(&path) }?;

        Ok(Self {
            path,
            library: Some(library),
            plugin: None,
            state: PluginState::NotLoaded,
            endpoints: Vec::new(),
            services: HashMap::new(),
            load_duration: None,
        })
    }

    /// Registers a manual, in-process plugin (§3: "Manual plugins bypass
    /// the assembly loader but share the same life-cycle"). `path` is only
    /// used for hot-reload directory matching and logging; no library is
    /// opened.
    pub fn manual(path: impl Into<PathBuf>, plugin: Box<dyn Plugin>) -> Self {
        Self {
            path: path.into(),
            library: None,
            plugin: Some(plugin),
            state: PluginState::NotLoaded,
            endpoints: Vec::new(),
            services: HashMap::new(),
            load_duration: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.plugin.as_deref().map(Plugin::name)
    }

    /// Instantiates the library's exported implementation (a no-op for
    /// manual plugins, which already carry theirs) and runs `init`.
    ///
    /// A library exporting zero implementations (the entry symbol returns
    /// a null pointer) is logged by the caller but not treated as fatal —
    /// this returns `Ok(())` leaving `state` at `NotLoaded` rather than
    /// advancing, so `load` below is a no-op for it.
    pub fn initialize(&mut self) -> Result<(), PluginError> {
        if self.plugin.is_none() {
            let library = self.library.as_ref().expect("manual loaders carry `plugin` directly");
            // SAFETY: `PLUGIN_ENTRY_SYMBOL` is a `PluginEntryFn` by the ABI
            // contract documented on that type.
            let entry: libloading::Symbol<PluginEntryFn> =
                unsafe { library.get(PLUGIN_ENTRY_SYMBOL)? };
            // SAFETY: the entry point returns ownership of a freshly
            // allocated trait object per its documented contract.
            let raw = unsafe { entry() };
            if raw.is_null() {
                return Ok(());
            }
            // SAFETY: `raw` was just allocated by `entry()` and ownership
            // transfers to this `Box`.
            self.plugin = Some(unsafe { Box::from_raw(raw) });
        }

        let plugin = self.plugin.as_mut().expect("checked above");
        let mut publisher = ServicePublisher::default();
        match plugin.init(&mut publisher) {
            Ok(()) => {
                self.services = publisher.services;
                self.state = PluginState::Initialized;
                Ok(())
            }
            Err(err) => {
                self.state = PluginState::Faulted;
                Err(err)
            }
        }
    }

    /// Runs `load`, recording endpoints and load timing. No-op (returns
    /// `Ok(&[])`-equivalent) if `initialize` found zero implementations.
    pub fn load(&mut self) -> Result<&[Arc<Endpoint>], PluginError> {
        if self.state != PluginState::Initialized {
            return Ok(&self.endpoints);
        }

        let started = std::time::Instant::now();
        let plugin = self.plugin.as_mut().expect("Initialized implies a plugin instance");

        match plugin.load() {
            Ok(endpoints) => {
                self.endpoints = endpoints.into_iter().map(Arc::new).collect();
                self.load_duration = Some(started.elapsed());
                self.state = PluginState::Loaded;
                Ok(&self.endpoints)
            }
            Err(err) => {
                self.state = PluginState::Faulted;
                Err(err)
            }
        }
    }

    pub fn load_duration(&self) -> Option<Duration> {
        self.load_duration
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn services(&self) -> &HashMap<TypeId, (Arc<dyn Any + Send + Sync>, ServiceFlags)> {
        &self.services
    }

    pub fn console_sink(&self) -> Option<Arc<dyn ConsoleCommandSink>> {
        self.plugin.as_ref().and_then(|p| p.console_sink())
    }

    /// Runs `unload` and drops the endpoint/service tables. Per §4.7,
    /// transitions to `Unloaded` even if `unload` isn't callable (no
    /// plugin instance) — there's nothing left to fault on.
    pub fn unload(&mut self) {
        if let Some(plugin) = self.plugin.as_mut() {
            plugin.unload();
        }
        self.endpoints.clear();
        self.services.clear();
        self.state = PluginState::Unloaded;
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        if self.state == PluginState::Loaded {
            self.unload();
        }
        // `plugin` (the `Box<dyn Plugin>`) must drop before `library` (the
        // `dlopen` handle) or its vtable would point at unmapped code;
        // field declaration order already gives us that, but state it.
        self.plugin = None;
        self.library = None;
    }
}

/// Immutable, publishable view of every loaded plugin's endpoints and
/// services — what §4.7 calls a "service group" subscriber's snapshot.
/// Readers (the event processor resolving a request, middleware pulling a
/// service) clone this `Arc` and never touch the registry's lock.
#[derive(Default)]
pub struct RegistrySnapshot {
    endpoints: HashMap<String, Arc<Endpoint>>,
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl RegistrySnapshot {
    pub fn endpoint(&self, path: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(path)
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|svc| svc.clone().downcast::<T>().ok())
    }
}

/// Whether loaders are initialized one at a time or concurrently (§4.7:
/// "Initialization may occur concurrently across loaders when the
/// 'concurrent load' flag is set; a sequential policy is also supported.").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    Sequential,
    Concurrent,
}

/// Manages every plugin loader for one server, publishing a snapshot of
/// their combined endpoints/services and routing console commands and hot
/// reloads.
///
/// The loader list itself is guarded by a `tokio::sync::Mutex` held only
/// across (re)load/(re)unload — never across a snapshot read, matching
/// §5's "service-group subscribers iterate a snapshot to avoid holding the
/// lock across plugin callbacks".
pub struct PluginRegistry {
    loaders: Mutex<Vec<PluginLoader>>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    policy: LoadPolicy,
}

impl PluginRegistry {
    pub fn new(policy: LoadPolicy) -> Self {
        Self {
            loaders: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            policy,
        }
    }

    /// Discovers every `.dll`/`.so`/`.dylib` directly inside `dir` and opens
    /// a loader for each. Open failures are collected (one per path) rather
    /// than aborting discovery of the rest — §4.7 only treats *load*/*init*
    /// failures as per-loader, so the same leniency applies here.
    pub async fn discover(&self, dir: &Path) -> io::Result<Vec<PluginError>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut errors = Vec::new();
        let mut opened = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_plugin_library(&path) {
                continue;
            }
            match PluginLoader::open(&path) {
                Ok(loader) => opened.push(loader),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to open plugin library");
                    errors.push(err);
                }
            }
        }

        tracing::info!(dir = %dir.display(), opened = opened.len(), "discovered plugin libraries");
        self.loaders.lock().await.extend(opened);
        Ok(errors)
    }

    /// Registers an in-process plugin bypassing the dynamic loader.
    pub async fn register_manual(&self, path: impl Into<PathBuf>, plugin: Box<dyn Plugin>) {
        self.loaders.lock().await.push(PluginLoader::manual(path, plugin));
    }

    /// Runs `initialize` + `load` on every loader currently `NotLoaded`,
    /// honoring [`LoadPolicy`], then republishes the snapshot.
    ///
    /// Returns one entry per loader that failed (with its path), matching
    /// §4.7: "an exception during initialize is logged and the loader is
    /// dropped from the rotation; an exception during load is logged and
    /// the unit is left in `Faulted`" — callers decide what "dropped from
    /// rotation" means for their own logging, since this crate never
    /// silently discards a loader the caller explicitly registered.
    pub async fn load_all(&self) -> Vec<(PathBuf, PluginError)> {
        let mut loaders = self.loaders.lock().await;
        let failures = match self.policy {
            LoadPolicy::Sequential => {
                let mut failures = Vec::new();
                for loader in loaders.iter_mut() {
                    if let Err(err) = load_one(loader) {
                        failures.push((loader.path().to_path_buf(), err));
                    }
                }
                failures
            }
            LoadPolicy::Concurrent => {
                // `Plugin::init`/`load` are synchronous, so "concurrent"
                // here means real OS threads rather than tokio tasks —
                // scoped threads let each borrow its own `&mut PluginLoader`
                // straight out of `loaders` without a `'static` bound,
                // unlike `tokio::spawn`.
                // `block_in_place` hands this task's executor thread to
                // other tasks for the duration of the scope, so the
                // scoped-thread join below doesn't stall the runtime (requires
                // the multi-thread runtime, which this crate already depends
                // on for `rt-multi-thread`).
                tokio::task::block_in_place(|| {
                    let mut failures = Vec::new();
                    std::thread::scope(|scope| {
                        let handles: Vec<_> = loaders
                            .iter_mut()
                            .map(|loader| {
                                let path = loader.path().to_path_buf();
                                scope.spawn(move || (path, load_one(loader)))
                            })
                            .collect();

                        for handle in handles {
                            if let Ok((path, Err(err))) = handle.join() {
                                failures.push((path, err));
                            }
                        }
                    });
                    failures
                })
            }
        };

        for (path, err) in &failures {
            tracing::warn!(path = %path.display(), error = %err, "plugin loader faulted during init/load");
        }

        self.publish(&loaders);
        failures
    }

    /// Unloads every loader currently `Loaded` and republishes the
    /// snapshot (which drops their endpoints/services for any subsequent
    /// request, per the Testable Property in spec.md §8).
    pub async fn unload_all(&self) {
        let mut loaders = self.loaders.lock().await;
        for loader in loaders.iter_mut() {
            if loader.state() == PluginState::Loaded {
                loader.unload();
            }
        }
        tracing::info!(count = loaders.len(), "unloaded all plugin loaders");
        self.publish(&loaders);
    }

    /// Unloads, then re-initializes and re-loads, every loader at `path`.
    /// Used by both manual `reload_all` (§4.7) and the hot-reload watcher.
    pub async fn reload_path(&self, path: &Path) {
        let mut loaders = self.loaders.lock().await;
        for loader in loaders.iter_mut().filter(|l| l.path() == path) {
            if loader.state() == PluginState::Loaded {
                loader.unload();
            }
            if let Err(err) = load_one(loader) {
                tracing::warn!(path = %path.display(), error = %err, "plugin reload faulted");
            }
        }
        tracing::info!(path = %path.display(), "reloaded plugin");
        self.publish(&loaders);
    }

    /// Forces every loader through unload + reinitialize + reload,
    /// regardless of hot-reload configuration (§4.7: "manual `ReloadAll()`
    /// always works").
    pub async fn reload_all(&self) {
        let mut loaders = self.loaders.lock().await;
        for loader in loaders.iter_mut() {
            if loader.state() == PluginState::Loaded {
                loader.unload();
            }
            if let Err(err) = load_one(loader) {
                tracing::warn!(path = %loader.path().display(), error = %err, "plugin reload faulted");
            }
        }
        tracing::info!(count = loaders.len(), "reloaded all plugin loaders");
        self.publish(&loaders);
    }

    /// Current published snapshot. Cheap: one `Arc` clone, no lock held
    /// across any caller-visible work.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    /// Routes a console command to the first plugin named `plugin_name`
    /// whose sink claims it (§4.7: "the first plugin to claim the name
    /// receives the call").
    pub async fn dispatch_command(&self, plugin_name: &str, command: &str) -> Option<String> {
        let loaders = self.loaders.lock().await;
        for loader in loaders.iter() {
            if loader.name() != Some(plugin_name) {
                continue;
            }
            if let Some(sink) = loader.console_sink() {
                if let Some(output) = sink.run(command) {
                    return Some(output);
                }
            }
        }
        None
    }

    fn publish(&self, loaders: &[PluginLoader]) {
        let mut endpoints = HashMap::new();
        let mut services = HashMap::new();
        for loader in loaders {
            if loader.state() != PluginState::Loaded {
                continue;
            }
            for endpoint in loader.endpoints() {
                endpoints.insert(endpoint.path.clone(), endpoint.clone());
            }
            for (type_id, (instance, _flags)) in loader.services() {
                services.insert(*type_id, instance.clone());
            }
        }

        let snapshot = Arc::new(RegistrySnapshot { endpoints, services });
        *self.snapshot.write().expect("snapshot lock poisoned") = snapshot;
    }
}

fn load_one(loader: &mut PluginLoader) -> Result<(), PluginError> {
    loader.initialize()?;
    loader.load()?;
    Ok(())
}

fn is_plugin_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("dll") | Some("so") | Some("dylib")
    )
}

/// Watches `dir` for plugin-library changes and triggers a debounced
/// reload through `registry`, per §4.7: "a change debounces by
/// `reload_delay_sec` (range 1..120) and then triggers an unload + reload".
///
/// Multiple changes inside one debounce window coalesce into a single
/// reload — the timer below is reset (not accumulated) on every event, so a
/// burst of writes to the same file only reloads once, matching the Open
/// Question resolution recorded in DESIGN.md.
pub async fn watch_hot_reload(
    registry: Arc<PluginRegistry>,
    dir: PathBuf,
    reload_delay: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> notify::Result<()> {
    use notify::{RecommendedWatcher, RecursiveMode, Watcher};

    let (raw_tx, mut raw_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })
    .inspect_err(|err| tracing::error!(dir = %dir.display(), error = %err, "failed to start plugin hot-reload watcher"))?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %dir.display(), delay_ms = %reload_delay.as_millis(), "watching plugin directory for hot reload");

    let mut pending: Option<PathBuf> = None;

    loop {
        let sleep = match &pending {
            Some(_) => tokio::time::sleep(reload_delay),
            None => tokio::time::sleep(Duration::from_secs(u64::MAX / 2)),
        };
        tokio::pin!(sleep);

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(dir = %dir.display(), "stopping plugin hot-reload watcher");
                    return Ok(());
                }
            }
            event = raw_rx.recv() => {
                match event {
                    Some(Ok(event)) => {
                        if let Some(path) = changed_library_path(&event) {
                            tracing::info!(path = %path.display(), "plugin library change detected, debouncing reload");
                            pending = Some(path);
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(dir = %dir.display(), error = %err, "plugin hot-reload watcher reported an error");
                        continue;
                    }
                    None => continue,
                }
            }
            () = &mut sleep, if pending.is_some() => {
                if let Some(path) = pending.take() {
                    tracing::info!(path = %path.display(), "debounce elapsed, reloading plugin");
                    registry.reload_path(&path).await;
                }
            }
        }
    }
}

fn changed_library_path(event: &notify::Event) -> Option<PathBuf> {
    use notify::EventKind;

    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)) {
        return None;
    }
    event.paths.iter().find(|p| is_plugin_library(p)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        version: Arc<AtomicUsize>,
    }

    struct EchoHandler(Arc<AtomicUsize>);

    impl PluginHandler for EchoHandler {
        fn handle(&self, entity: &mut HttpEntity) -> FileProcessArgs {
            let version = self.0.load(Ordering::SeqCst);
            entity.response.status(crate::StatusCode::Ok);
            entity.response.body(format!("v{version}"));
            FileProcessArgs::VirtualSkip
        }
    }

    impl Plugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn load(&mut self) -> Result<Vec<Endpoint>, PluginError> {
            Ok(vec![Endpoint {
                path: "/p".to_string(),
                handler: Arc::new(EchoHandler(self.version.clone())),
            }])
        }
    }

    #[tokio::test]
    async fn manual_plugin_publishes_endpoint_after_load_all() {
        let registry = PluginRegistry::new(LoadPolicy::Sequential);
        let version = Arc::new(AtomicUsize::new(1));
        registry
            .register_manual("manual://echo", Box::new(Echo { version: version.clone() }))
            .await;

        let failures = registry.load_all().await;
        assert!(failures.is_empty());

        let snapshot = registry.snapshot();
        assert!(snapshot.endpoint("/p").is_some());
    }

    #[tokio::test]
    async fn unload_all_drops_endpoints_from_next_snapshot() {
        let registry = PluginRegistry::new(LoadPolicy::Sequential);
        let version = Arc::new(AtomicUsize::new(1));
        registry
            .register_manual("manual://echo", Box::new(Echo { version }))
            .await;
        registry.load_all().await;
        assert!(registry.snapshot().endpoint("/p").is_some());

        registry.unload_all().await;
        assert!(registry.snapshot().endpoint("/p").is_none());
    }

    #[tokio::test]
    async fn reload_path_republishes_new_instance() {
        let registry = PluginRegistry::new(LoadPolicy::Sequential);
        let version = Arc::new(AtomicUsize::new(1));
        registry
            .register_manual("manual://echo", Box::new(Echo { version: version.clone() }))
            .await;
        registry.load_all().await;

        version.store(2, Ordering::SeqCst);
        registry.reload_path(Path::new("manual://echo")).await;

        let snapshot = registry.snapshot();
        assert!(snapshot.endpoint("/p").is_some());
    }

    #[tokio::test]
    async fn dispatch_command_first_claim_wins() {
        struct Sink(&'static str);
        impl ConsoleCommandSink for Sink {
            fn run(&self, command: &str) -> Option<String> {
                if command == "ping" {
                    Some(self.0.to_string())
                } else {
                    None
                }
            }
        }

        struct WithSink;
        impl Plugin for WithSink {
            fn name(&self) -> &str {
                "with-sink"
            }
            fn load(&mut self) -> Result<Vec<Endpoint>, PluginError> {
                Ok(Vec::new())
            }
            fn console_sink(&self) -> Option<Arc<dyn ConsoleCommandSink>> {
                Some(Arc::new(Sink("pong")))
            }
        }

        let registry = PluginRegistry::new(LoadPolicy::Sequential);
        registry.register_manual("manual://with-sink", Box::new(WithSink)).await;
        registry.load_all().await;

        assert_eq!(
            registry.dispatch_command("with-sink", "ping").await,
            Some("pong".to_string())
        );
        assert_eq!(registry.dispatch_command("with-sink", "other").await, None);
        assert_eq!(registry.dispatch_command("missing", "ping").await, None);
    }

    // `block_in_place` (used by the `Concurrent` load policy) requires the
    // multi-thread runtime.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn faulted_init_is_reported_without_panicking() {
        struct Faulty;
        impl Plugin for Faulty {
            fn name(&self) -> &str {
                "faulty"
            }
            fn init(&mut self, _publisher: &mut ServicePublisher) -> Result<(), PluginError> {
                Err(PluginError::InitFailed("boom".to_string()))
            }
            fn load(&mut self) -> Result<Vec<Endpoint>, PluginError> {
                Ok(Vec::new())
            }
        }

        let registry = PluginRegistry::new(LoadPolicy::Concurrent);
        registry.register_manual("manual://faulty", Box::new(Faulty)).await;

        let failures = registry.load_all().await;
        assert_eq!(failures.len(), 1);
    }
}
