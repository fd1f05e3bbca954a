//! The domain supervisor.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use isolate_core::config::IsolateConfig;
use isolate_core::error::{BoundarySite, LifecycleError, Result};
use isolate_core::id::DomainId;
use isolate_core::traits::{LineSink, OwnershipRegistry, Resolver};
use isolate_core::types::{Code, DomainState, FailureRecord};

use crate::context::DomainContext;
use crate::domain::{Domain, Lifecycle};
use crate::hooks::ShutdownHooks;
use crate::marshal::proxy::{Bound, ExportTicket, ExportedTarget};
use crate::marshal::{BoundaryProxy, Exportable, Marshaler, Portable, Reconstruct, Side};
use crate::namespace::{Bundle, HostNamespace, LoaderPolicy, NamespaceLoader};
use crate::properties::{Properties, NAME_PROPERTY};
use crate::sink::StderrSink;
use crate::threads::{ThreadDoom, ThreadGroup};
use crate::weaver;
use crate::worker::{self, Task, WorkUnit};

/// Supervisor of one isolation domain.
///
/// Cloning the handle does not clone the domain; every clone talks to the
/// same worker.
///
/// # Examples
///
/// ```no_run
/// use isolate_runtime::{DomainContext, Isolate, Task};
/// use isolate_core::TaskError;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Greet(String);
///
/// impl Task for Greet {
///     type Output = String;
///
///     fn run(self, ctx: &DomainContext) -> Result<String, TaskError> {
///         Ok(format!("{} from {}", self.0, ctx.name()))
///     }
/// }
///
/// let isolate = Isolate::new("alpha", ["acme::"]);
/// isolate.start().unwrap();
/// assert_eq!(isolate.submit(Greet("hello".into())).unwrap(), "hello from alpha");
/// isolate.stop().unwrap();
/// ```
#[derive(Clone)]
pub struct Isolate {
    domain: Arc<Domain>,
}

impl Isolate {
    /// Create a domain owning `owned_prefixes`, with default collaborators.
    pub fn new<I, S>(name: impl Into<String>, owned_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(name).owned_prefixes(owned_prefixes).assemble()
    }

    /// Start configuring a domain.
    pub fn builder(name: impl Into<String>) -> IsolateBuilder {
        IsolateBuilder::new(name)
    }

    pub(crate) fn from_domain(domain: Arc<Domain>) -> Self {
        Self { domain }
    }

    /// The domain the current thread belongs to, if any.
    pub fn current() -> Option<Isolate> {
        DomainContext::current().map(|ctx| ctx.isolate())
    }

    /// Spawn the worker and start accepting work.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The domain is running.
    /// * `Err(LifecycleError::AlreadyStarted)` - If the domain was started
    ///   before, including domains that have since been stopped.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.domain.lifecycle.lock();
        if lifecycle.state != DomainState::Created {
            return Err(LifecycleError::AlreadyStarted(self.name()).into());
        }

        let (queue, work) = crossbeam_channel::bounded::<WorkUnit>(0);
        let thread_name = format!("isolate-{}", self.name());
        let (control, _handle) = self
            .domain
            .threads
            .spawn(&self.domain, thread_name, move |ctx| worker::run_loop(ctx, work))?;

        lifecycle.queue = Some(queue);
        lifecycle.worker = Some(control);
        lifecycle.state = DomainState::Running;
        info!(domain = %self.name(), id = %self.domain.id, "Domain started");
        Ok(())
    }

    /// Run `task` in the domain and wait for its result.
    ///
    /// The task is copied into the domain, its output is copied back out.
    ///
    /// # Returns
    ///
    /// * `Ok(T::Output)` - A host copy of the result.
    /// * `Err(Error::Boundary)` - The task failed or panicked.
    /// * `Err(LifecycleError::NotRunning)` - The domain is not running.
    /// * `Err(LifecycleError::Stopped)` - The domain was torn down while
    ///   the caller was waiting.
    #[track_caller]
    pub fn submit<T>(&self, task: T) -> Result<T::Output>
    where
        T: Task + Portable,
        T::Output: Portable,
    {
        let caller = Location::caller();
        let inside = self.domain.marshaler.copy_into(&task)?.into_inner();
        self.complete::<T>(caller, inside)
    }

    /// Like [`submit`](Self::submit), copying the task field by field.
    #[track_caller]
    pub fn submit_captured<T>(&self, task: T) -> Result<T::Output>
    where
        T: Task + Reconstruct,
        T::Output: Portable,
    {
        let caller = Location::caller();
        let inside = self.domain.marshaler.copy_captured_into(&task)?.into_inner();
        self.complete::<T>(caller, inside)
    }

    fn complete<T>(&self, caller: &'static Location<'static>, inside: T) -> Result<T::Output>
    where
        T: Task,
        T::Output: Portable,
    {
        let reply = self.run_job(caller, BoundarySite::Exec, move |ctx| {
            let output = worker::execute(inside, ctx)?;
            ctx.marshaler()
                .encode(&output, Side::Domain)
                .map_err(|e| FailureRecord::from_error(&e))
        })?;
        Ok(self.domain.marshaler.decode::<T::Output>(reply, Side::Host)?.into_inner())
    }

    /// Run `task` without a result.
    ///
    /// Returns once the task has finished; its failures are logged to the
    /// domain output instead of being returned.
    pub fn dispatch<T: Task + Portable>(&self, task: T) -> Result<()> {
        let inside = self.domain.marshaler.copy_into(&task)?.into_inner();
        self.handoff(WorkUnit::Detached(Box::new(move |ctx: &DomainContext| {
            worker::execute(inside, ctx).map(|_| ())
        })))?;
        self.handoff(WorkUnit::Noop)
    }

    /// Run `task` and keep its output inside the domain.
    ///
    /// # Returns
    ///
    /// A proxy forwarding calls to the live output object.
    #[track_caller]
    pub fn export<T>(&self, task: T) -> Result<BoundaryProxy>
    where
        T: Task + Portable,
        T::Output: Exportable,
    {
        let caller = Location::caller();
        let inside = self.domain.marshaler.copy_into(&task)?.into_inner();
        let ticket = ExportTicket::prepare::<T::Output>(&self.domain.marshaler)?;
        let id = ticket.id;
        let params = ticket.params();

        self.run_job(caller, BoundarySite::Exec, move |ctx| {
            let object = worker::execute(inside, ctx)?;
            let target: Box<dyn ExportedTarget> = Box::new(Bound::new(object, params));
            ctx.domain().exports.insert(id, Arc::new(Mutex::new(target)));
            Ok(())
        })?;

        debug!(domain = %self.name(), export = %id, target = ticket.target_type, "Exported object");
        Ok(BoundaryProxy::new(self.clone(), ticket))
    }

    /// Hand `job` to the worker and wait for what it delivers.
    pub(crate) fn run_job<R, F>(&self, caller: &'static Location<'static>, site: BoundarySite, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&DomainContext) -> std::result::Result<R, FailureRecord> + Send + 'static,
    {
        let (slot, result) = crossbeam_channel::bounded(1);
        self.handoff(WorkUnit::Job(Box::new(move |ctx: &DomainContext| {
            // Panics outside the task body, such as while encoding the
            // output, must still reach the caller.
            let delivered = match panic::catch_unwind(AssertUnwindSafe(|| job(ctx))) {
                Ok(delivered) => delivered,
                Err(payload) if payload.is::<ThreadDoom>() => panic::resume_unwind(payload),
                Err(payload) => Err(weaver::panic_record(payload.as_ref())),
            };
            let _ = slot.send(delivered);
        })))?;

        match self.await_result(result)? {
            Ok(value) => Ok(value),
            Err(record) => {
                let failure = weaver::weave(
                    record,
                    site,
                    &self.name(),
                    caller,
                    self.domain.config.capture_backtrace,
                );
                Err(failure.into())
            }
        }
    }

    /// Offer `unit` to the worker until it is accepted.
    fn handoff(&self, unit: WorkUnit) -> Result<()> {
        let queue = {
            let lifecycle = self.domain.lifecycle.lock();
            match (&lifecycle.queue, lifecycle.state.accepts_work()) {
                (Some(queue), true) => queue.clone(),
                _ => return Err(LifecycleError::NotRunning(self.name()).into()),
            }
        };

        let config = &self.domain.config;
        let mut unit = unit;
        for attempt in 1..=config.handoff_attempts {
            match queue.send_timeout(unit, config.handoff_poll()) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if !self.state().accepts_work() {
                        return Err(LifecycleError::NotRunning(self.name()).into());
                    }
                    debug!(domain = %self.name(), attempt, "Worker busy, retrying hand-off");
                    unit = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(LifecycleError::Stopped(self.name()).into());
                }
            }
        }

        Err(LifecycleError::HandoffTimeout {
            domain: self.name(),
            waited_ms: config.handoff_poll_ms * u64::from(config.handoff_attempts),
        }
        .into())
    }

    /// Block until the result slot is filled or the domain dies.
    fn await_result<R>(&self, result: Receiver<R>) -> Result<R> {
        let poll = self.domain.config.result_poll();
        loop {
            match result.recv_timeout(poll) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => {
                    if self.state() == DomainState::Stopped {
                        // The worker may have delivered just before it went away.
                        return result
                            .try_recv()
                            .map_err(|_| LifecycleError::Stopped(self.name()).into());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LifecycleError::Stopped(self.name()).into());
                }
            }
        }
    }

    pub(crate) fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn id(&self) -> DomainId {
        self.domain.id
    }

    pub fn name(&self) -> String {
        self.domain.name()
    }

    pub fn state(&self) -> DomainState {
        self.domain.state()
    }

    pub fn config(&self) -> &IsolateConfig {
        &self.domain.config
    }

    /// The domain namespace.
    pub fn loader(&self) -> &Arc<NamespaceLoader> {
        &self.domain.loader
    }

    pub fn marshaler(&self) -> &Marshaler {
        &self.domain.marshaler
    }

    /// Shutdown hooks tasks of this domain register with.
    pub fn hooks(&self) -> &Arc<ShutdownHooks> {
        &self.domain.hooks
    }

    /// Rename the domain.
    ///
    /// Output lines get the new prefix right away. The worker keeps its
    /// OS thread name; its logical name and later threads use the new one.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let old = std::mem::replace(&mut *self.domain.name.write(), name.clone());
        self.domain.loader.rename(&name);
        self.domain.properties.set(NAME_PROPERTY, name.clone());
        if let Some(worker) = &self.domain.lifecycle.lock().worker {
            worker.rename(&format!("isolate-{}", name));
        }
        info!(old = %old, new = %name, "Domain renamed");
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.domain.properties.get(key)
    }

    /// Set a domain property. Fails with `NotRunning` once stopped.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.domain.properties.set(key, value);
        Ok(())
    }

    pub fn set_properties<I, K, V>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.ensure_open()?;
        self.domain.properties.set_all(values);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.domain.properties.is_closed() {
            Err(LifecycleError::NotRunning(self.name()).into())
        } else {
            Ok(())
        }
    }

    /// A copy of every domain property.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.domain.properties.snapshot()
    }

    /// Always delegate `name` to the host.
    pub fn exclude(&self, name: impl Into<String>) {
        self.domain.loader.exclude(name);
    }

    /// Search `bundle` before the host resource path.
    pub fn add_location(&self, bundle: Bundle) {
        self.domain.loader.add_location(bundle);
    }

    /// Never take definitions from locations starting with `prefix`.
    pub fn forbid_location(&self, prefix: impl Into<String>) {
        self.domain.loader.forbid_location(prefix);
    }

    /// Resolve `name` in the domain namespace.
    pub fn resolve(&self, name: &str) -> Result<Arc<Code>> {
        self.domain.loader.resolve(name)
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.domain.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`Isolate`].
pub struct IsolateBuilder {
    name: String,
    policy: LoaderPolicy,
    host: Option<Arc<dyn Resolver>>,
    sink: Option<Arc<dyn LineSink>>,
    config: IsolateConfig,
    properties: BTreeMap<String, String>,
    inherit_env: bool,
    hooks: Option<Arc<ShutdownHooks>>,
    registries: Vec<Arc<dyn OwnershipRegistry>>,
}

impl IsolateBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: LoaderPolicy::default(),
            host: None,
            sink: None,
            config: IsolateConfig::default(),
            properties: BTreeMap::new(),
            inherit_env: false,
            hooks: None,
            registries: Vec::new(),
        }
    }

    /// Own every name starting with one of `prefixes`.
    pub fn owned_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.owned_prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Always delegate `name` to the host.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.policy.excludes.insert(name.into());
        self
    }

    /// Search `bundle` before the host resource path.
    pub fn location(mut self, bundle: Bundle) -> Self {
        self.policy.extra_locations.push(Arc::new(bundle));
        self
    }

    /// Never take definitions from locations starting with `prefix`.
    pub fn forbid_location(mut self, prefix: impl Into<String>) -> Self {
        self.policy.forbidden.push(prefix.into());
        self
    }

    /// Delegate to `host` instead of the shared host namespace.
    pub fn host(mut self, host: Arc<dyn Resolver>) -> Self {
        self.host = Some(host);
        self
    }

    /// Send output lines to `sink` instead of standard error.
    pub fn sink(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(mut self, config: IsolateConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Seed the properties with a copy of the process environment.
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Use `hooks` instead of the process-wide shutdown hooks.
    pub fn hooks(mut self, hooks: Arc<ShutdownHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Revoke entries owned by the domain from `registry` on teardown.
    pub fn registry(mut self, registry: Arc<dyn OwnershipRegistry>) -> Self {
        self.registries.push(registry);
        self
    }

    /// Validate the configuration and create the domain.
    pub fn build(self) -> Result<Isolate> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> Isolate {
        let id = DomainId::new();
        let host = self.host.unwrap_or_else(|| HostNamespace::shared() as Arc<dyn Resolver>);
        let loader = Arc::new(NamespaceLoader::new(id, self.name.clone(), host, self.policy));
        let hooks = self.hooks.unwrap_or_else(ShutdownHooks::global);

        let mut seed = BTreeMap::new();
        if self.inherit_env {
            seed.extend(std::env::vars());
        }
        seed.extend(self.properties);

        let mut registries: Vec<Arc<dyn OwnershipRegistry>> = Vec::with_capacity(self.registries.len() + 1);
        registries.push(hooks.clone());
        registries.extend(self.registries);

        let domain = Domain {
            id,
            name: RwLock::new(self.name.clone()),
            config: self.config,
            marshaler: Marshaler::new(loader.clone()),
            loader,
            properties: Properties::seeded(seed, &self.name),
            sink: self.sink.unwrap_or_else(|| Arc::new(StderrSink)),
            hooks,
            registries,
            threads: ThreadGroup::new(),
            exports: DashMap::new(),
            lifecycle: Mutex::new(Lifecycle::new()),
        };
        debug!(domain = %self.name, %id, "Domain created");
        Isolate::from_domain(Arc::new(domain))
    }
}
