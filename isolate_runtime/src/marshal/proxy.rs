//! Boundary proxies for objects that stay inside a domain.
//!
//! An exported object never leaves its domain. The host receives a
//! [`BoundaryProxy`] whose forwarding table maps every method of the
//! object's interface closure to a handler; each call copies its argument
//! in, runs on the domain worker against the live object and copies the
//! result out.

use std::any::type_name;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;

use isolate_core::error::{BoundarySite, MarshalError, Result, TaskError};
use isolate_core::id::ExportId;
use isolate_core::types::{Code, FailureRecord, Frame};

use super::{Envelope, Marshaler, Portable, Side};
use crate::context::DomainContext;
use crate::isolate::Isolate;
use crate::threads::ThreadDoom;
use crate::weaver::panic_record;

/// A named set of methods an exported object offers.
///
/// Interfaces are declared as statics:
///
/// ```
/// use isolate_runtime::marshal::Interface;
///
/// static READER: Interface = Interface::new("Reader", &["get"], &[]);
/// static COUNTER: Interface = Interface::new("Counter", &["increment"], &[&READER]);
///
/// let names: Vec<&str> = Interface::closure(&[&COUNTER]).iter().map(|i| i.name).collect();
/// assert_eq!(names, vec!["Counter", "Reader"]);
/// ```
#[derive(Debug)]
pub struct Interface {
    /// Interface name.
    pub name: &'static str,

    /// Methods declared directly on this interface.
    pub methods: &'static [&'static str],

    /// Interfaces this one extends.
    pub extends: &'static [&'static Interface],
}

impl Interface {
    pub const fn new(
        name: &'static str,
        methods: &'static [&'static str],
        extends: &'static [&'static Interface],
    ) -> Self {
        Self { name, methods, extends }
    }

    /// `roots` and everything they extend, transitively, each once.
    pub fn closure(roots: &[&'static Interface]) -> Vec<&'static Interface> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut pending: Vec<&'static Interface> = roots.iter().rev().copied().collect();

        while let Some(interface) = pending.pop() {
            if !seen.insert(interface.name) {
                continue;
            }
            ordered.push(interface);
            pending.extend(interface.extends.iter().rev().copied());
        }
        ordered
    }
}

type Handler<T> =
    Box<dyn Fn(&mut T, &Marshaler, Envelope, &Code) -> std::result::Result<Envelope, FailureRecord> + Send + Sync>;

struct MethodEntry<T> {
    name: &'static str,
    param_type: &'static str,
    return_type: &'static str,
    handler: Handler<T>,
}

/// Handlers of an exportable type, built with [`method`](Self::method).
pub struct MethodTable<T> {
    entries: Vec<MethodEntry<T>>,
}

impl<T: 'static> MethodTable<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add a method taking `A` and returning `R`.
    ///
    /// Methods without arguments take `()`.
    pub fn method<A, R, F>(mut self, name: &'static str, f: F) -> Self
    where
        A: Portable,
        R: Portable,
        F: Fn(&mut T, A) -> std::result::Result<R, TaskError> + Send + Sync + 'static,
    {
        let handler: Handler<T> = Box::new(move |target, marshaler, args, expected| {
            let arg = marshaler
                .decode::<A>(args, Side::Domain)
                .map_err(|e| FailureRecord::from_error(&e))?;
            marshaler
                .ensure_compatible(&arg, expected)
                .map_err(|e| FailureRecord::from_error(&e))?;
            let output = f(target, arg.into_inner())
                .map_err(|e| e.with_frame(Frame::new(type_name::<T>(), name)).into_record())?;
            marshaler
                .encode(&output, Side::Domain)
                .map_err(|e| FailureRecord::from_error(&e))
        });
        self.entries.push(MethodEntry {
            name,
            param_type: A::type_name(),
            return_type: R::type_name(),
            handler,
        });
        self
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: 'static> Default for MethodTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An object that can stay in a domain behind a [`BoundaryProxy`].
pub trait Exportable: Send + Sized + 'static {
    /// Interfaces the object implements directly.
    fn interfaces() -> Vec<&'static Interface>;

    /// Handlers for every method of the interface closure.
    fn methods() -> MethodTable<Self>;
}

/// A live exported object as seen by the worker.
pub(crate) trait ExportedTarget: Send {
    fn invoke(
        &mut self,
        index: usize,
        ctx: &DomainContext,
        args: Envelope,
    ) -> std::result::Result<Envelope, FailureRecord>;
}

pub(crate) struct Bound<O> {
    object: O,
    table: MethodTable<O>,
    params: Vec<Arc<Code>>,
}

impl<O: Exportable> Bound<O> {
    pub(crate) fn new(object: O, params: Vec<Arc<Code>>) -> Self {
        Self {
            object,
            table: O::methods(),
            params,
        }
    }
}

impl<O: Exportable> ExportedTarget for Bound<O> {
    fn invoke(
        &mut self,
        index: usize,
        ctx: &DomainContext,
        args: Envelope,
    ) -> std::result::Result<Envelope, FailureRecord> {
        let (Some(entry), Some(expected)) = (self.table.entries.get(index), self.params.get(index)) else {
            return Err(FailureRecord::from_error(&MarshalError::UnknownMethod(format!(
                "{}#{}",
                type_name::<O>(),
                index
            ))));
        };
        let object = &mut self.object;
        let marshaler = ctx.marshaler();

        match panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(object, marshaler, args, expected))) {
            Ok(result) => result,
            Err(payload) if payload.is::<ThreadDoom>() => panic::resume_unwind(payload),
            Err(payload) => {
                let mut record = panic_record(payload.as_ref());
                record.frames.push(Frame::new(type_name::<O>(), entry.name));
                Err(record)
            }
        }
    }
}

/// What the host knows about an exported object.
#[derive(Debug)]
pub struct ExportTicket {
    /// Key of the live object inside the domain.
    pub id: ExportId,

    /// Type name of the exported object.
    pub target_type: &'static str,

    /// Names of the interface closure, in declaration order.
    pub interfaces: Vec<&'static str>,

    /// `Interface.method` to handler index.
    forwarding: Vec<(String, usize)>,

    /// Parameter definitions, by handler index.
    params: Vec<Arc<Code>>,

    /// Return definitions, by handler index.
    returns: Vec<Arc<Code>>,
}

impl ExportTicket {
    /// Build the forwarding table for `O` and resolve every parameter and
    /// return type through the domain namespace.
    pub(crate) fn prepare<O: Exportable>(marshaler: &Marshaler) -> Result<Self> {
        let table = O::methods();
        let closure = Interface::closure(&O::interfaces());

        let mut forwarding = Vec::new();
        for interface in &closure {
            for &method in interface.methods {
                let index = table.position(method).ok_or_else(|| MarshalError::MissingMethod {
                    interface: interface.name.to_string(),
                    method: method.to_string(),
                })?;
                forwarding.push((format!("{}.{}", interface.name, method), index));
            }
        }

        let mut params = Vec::with_capacity(table.len());
        let mut returns = Vec::with_capacity(table.len());
        for entry in &table.entries {
            params.push(marshaler.resolve(entry.param_type, Side::Domain)?);
            returns.push(marshaler.resolve(entry.return_type, Side::Domain)?);
        }

        Ok(Self {
            id: ExportId::new(),
            target_type: type_name::<O>(),
            interfaces: closure.iter().map(|i| i.name).collect(),
            forwarding,
            params,
            returns,
        })
    }

    /// Handler index for `method`, given as `Interface.method` or as a
    /// bare method name (first interface wins).
    pub fn lookup(&self, method: &str) -> Result<usize> {
        let qualified = self.forwarding.iter().find(|(name, _)| name == method);
        let bare = || {
            self.forwarding
                .iter()
                .find(|(name, _)| name.rsplit_once('.').is_some_and(|(_, m)| m == method))
        };
        qualified
            .or_else(bare)
            .map(|(_, index)| *index)
            .ok_or_else(|| MarshalError::UnknownMethod(method.to_string()).into())
    }

    /// Qualified names of every forwarded method.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.forwarding.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn params(&self) -> Vec<Arc<Code>> {
        self.params.clone()
    }

    /// Definition the result of `method` is resolved under in the domain.
    pub fn return_code(&self, method: &str) -> Result<Arc<Code>> {
        let index = self.lookup(method)?;
        self.returns
            .get(index)
            .cloned()
            .ok_or_else(|| MarshalError::UnknownMethod(method.to_string()).into())
    }
}

/// Host-side handle to an object living in a domain.
#[derive(Clone)]
pub struct BoundaryProxy {
    isolate: Isolate,
    ticket: Arc<ExportTicket>,
}

impl BoundaryProxy {
    pub(crate) fn new(isolate: Isolate, ticket: ExportTicket) -> Self {
        Self {
            isolate,
            ticket: Arc::new(ticket),
        }
    }

    pub fn ticket(&self) -> &ExportTicket {
        &self.ticket
    }

    /// Whether the exported object implements `interface`.
    pub fn implements(&self, interface: &str) -> bool {
        self.ticket.interfaces.contains(&interface)
    }

    /// Call `method` on the live object.
    ///
    /// # Arguments
    ///
    /// * `method` - `Interface.method`, or a bare method name.
    /// * `args` - The argument, copied into the domain.
    ///
    /// # Returns
    ///
    /// * `Ok(R)` - A host copy of the method's result.
    /// * `Err(Error::Boundary)` - The method failed; the failure is woven
    ///   with a `<proxy>` boundary frame.
    /// * `Err(Error::Lifecycle)` - The domain is no longer running.
    #[track_caller]
    pub fn call<A: Portable, R: Portable>(&self, method: &str, args: &A) -> Result<R> {
        let caller = Location::caller();
        let index = self.ticket.lookup(method)?;
        let marshaler = self.isolate.marshaler();
        let envelope = marshaler.encode(args, Side::Host)?;
        let id = self.ticket.id;
        let site = BoundarySite::Proxy {
            target: self.ticket.target_type.to_string(),
        };

        let reply = self.isolate.run_job(caller, site, move |ctx| {
            let slot = ctx
                .domain()
                .exports
                .get(&id)
                .map(|slot| slot.value().clone())
                .ok_or_else(|| FailureRecord::new("isolate_runtime::ExportRevoked", format!("export {} is gone", id)))?;
            let mut target = slot.lock();
            target.invoke(index, ctx, envelope)
        })?;

        Ok(marshaler.decode::<R>(reply, Side::Host)?.into_inner())
    }
}

impl fmt::Debug for BoundaryProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryProxy")
            .field("domain", &self.isolate.name())
            .field("target", &self.ticket.target_type)
            .field("interfaces", &self.ticket.interfaces)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{HostNamespace, LoaderPolicy, NamespaceLoader};
    use isolate_core::id::DomainId;

    static READER: Interface = Interface::new("Reader", &["get"], &[]);
    static RESETTABLE: Interface = Interface::new("Resettable", &["reset"], &[&READER]);
    static COUNTER: Interface = Interface::new("Counter", &["increment"], &[&READER, &RESETTABLE]);

    struct Tally(u64);

    impl Exportable for Tally {
        fn interfaces() -> Vec<&'static Interface> {
            vec![&COUNTER]
        }

        fn methods() -> MethodTable<Self> {
            MethodTable::new()
                .method("increment", |t: &mut Tally, by: u64| {
                    t.0 += by;
                    Ok(t.0)
                })
                .method("get", |t: &mut Tally, _: ()| Ok(t.0))
                .method("reset", |t: &mut Tally, _: ()| {
                    t.0 = 0;
                    Ok(())
                })
        }
    }

    struct Incomplete;

    impl Exportable for Incomplete {
        fn interfaces() -> Vec<&'static Interface> {
            vec![&READER]
        }

        fn methods() -> MethodTable<Self> {
            MethodTable::new()
        }
    }

    fn marshaler() -> Marshaler {
        let loader = NamespaceLoader::new(
            DomainId::new(),
            "alpha",
            Arc::new(HostNamespace::new()),
            LoaderPolicy::default(),
        );
        Marshaler::new(Arc::new(loader))
    }

    #[test]
    fn test_interface_closure_dedups() {
        let names: Vec<&str> = Interface::closure(&[&COUNTER]).iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Counter", "Reader", "Resettable"]);
    }

    #[test]
    fn test_ticket_forwarding() {
        let ticket = ExportTicket::prepare::<Tally>(&marshaler()).unwrap();
        let methods: Vec<&str> = ticket.methods().collect();
        assert_eq!(methods, vec!["Counter.increment", "Reader.get", "Resettable.reset"]);
        assert_eq!(ticket.lookup("Reader.get").unwrap(), 1);
        assert_eq!(ticket.lookup("reset").unwrap(), 2);
        assert!(ticket.lookup("explode").is_err());
        assert_eq!(ticket.return_code("get").unwrap().name(), "u64");
    }

    #[test]
    fn test_missing_method_rejected() {
        let err = ExportTicket::prepare::<Incomplete>(&marshaler()).unwrap_err();
        assert!(matches!(
            err,
            isolate_core::Error::Marshal(MarshalError::MissingMethod { .. })
        ));
    }
}
