//! Objects that stay inside a domain behind a boundary proxy.

use std::sync::Arc;

use isolate_core::error::{BoundarySite, MarshalError};
use isolate_core::{Error, IsolateConfig, TaskError};
use isolate_runtime::*;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// Initialize tracing for tests
fn init_tracing() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn domain(name: &str) -> Isolate {
    let config = IsolateConfig {
        handoff_poll_ms: 20,
        result_poll_ms: 20,
        stop_handoff_timeout_ms: 50,
        teardown_pause_ms: 2,
        capture_backtrace: false,
        ..Default::default()
    };
    let isolate = Isolate::builder(name)
        .config(config)
        .sink(Arc::new(MemorySink::new()))
        .hooks(Arc::new(ShutdownHooks::new()))
        .build()
        .unwrap();
    isolate.start().unwrap();
    isolate
}

static READER: Interface = Interface::new("Reader", &["get"], &[]);
static COUNTER: Interface = Interface::new("Counter", &["increment", "reset", "split"], &[&READER]);

/// Lives in the domain; the host only ever sees copies of its results.
struct Counter {
    owner: String,
    value: u64,
}

impl Exportable for Counter {
    fn interfaces() -> Vec<&'static Interface> {
        vec![&COUNTER]
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method("increment", |c: &mut Counter, by: u64| {
                c.value += by;
                Ok(c.value)
            })
            .method("get", |c: &mut Counter, _: ()| Ok((c.owner.clone(), c.value)))
            .method("reset", |c: &mut Counter, _: ()| {
                c.value = 0;
                Ok(())
            })
            .method("split", |c: &mut Counter, parts: u64| {
                if parts == 0 {
                    return Err(TaskError::msg("cannot split into zero parts"));
                }
                Ok(c.value / parts)
            })
    }
}

#[derive(Serialize, Deserialize)]
struct MakeCounter {
    start: u64,
}

impl Task for MakeCounter {
    type Output = Counter;

    fn run(self, ctx: &DomainContext) -> Result<Counter, TaskError> {
        Ok(Counter {
            owner: ctx.name(),
            value: self.start,
        })
    }
}

#[test]
fn test_proxy_forwards_to_live_object() {
    init_tracing();
    let isolate = domain("counting");
    let proxy = isolate.export(MakeCounter { start: 10 }).unwrap();

    assert!(proxy.implements("Counter"));
    assert!(proxy.implements("Reader"));
    assert!(!proxy.implements("Writer"));

    assert_eq!(proxy.call::<u64, u64>("increment", &5).unwrap(), 15);
    assert_eq!(proxy.call::<u64, u64>("Counter.increment", &1).unwrap(), 16);

    let (owner, value): (String, u64) = proxy.call("Reader.get", &()).unwrap();
    assert_eq!(owner, "counting");
    assert_eq!(value, 16);

    proxy.call::<(), ()>("reset", &()).unwrap();
    assert_eq!(proxy.call::<(), (String, u64)>("get", &()).unwrap().1, 0);

    // Clones share the same object.
    let other = proxy.clone();
    other.call::<u64, u64>("increment", &3).unwrap();
    assert_eq!(proxy.call::<(), (String, u64)>("get", &()).unwrap().1, 3);

    isolate.stop().unwrap();
}

#[test]
fn test_separate_exports_are_separate_objects() {
    init_tracing();
    let isolate = domain("pair");
    let first = isolate.export(MakeCounter { start: 1 }).unwrap();
    let second = isolate.export(MakeCounter { start: 100 }).unwrap();

    first.call::<u64, u64>("increment", &1).unwrap();
    assert_eq!(first.call::<(), (String, u64)>("get", &()).unwrap().1, 2);
    assert_eq!(second.call::<(), (String, u64)>("get", &()).unwrap().1, 100);
    assert_ne!(first.ticket().id, second.ticket().id);

    isolate.stop().unwrap();
}

#[test]
fn test_method_failure_crosses_as_proxy_boundary() {
    init_tracing();
    let isolate = domain("splitter");
    let proxy = isolate.export(MakeCounter { start: 9 }).unwrap();

    let err = proxy.call::<u64, u64>("split", &0).unwrap_err();
    let failure = err.as_boundary().unwrap();
    assert_eq!(failure.cause().message, "cannot split into zero parts");
    assert!(matches!(failure.site(), BoundarySite::Proxy { target } if target.ends_with("Counter")));
    assert_eq!(failure.boundary_frame().unwrap().function, "<proxy>");
    assert!(failure
        .frames()
        .iter()
        .any(|f| f.owner.ends_with("Counter") && f.function == "split"));

    // The object is still usable.
    assert_eq!(proxy.call::<u64, u64>("split", &3).unwrap(), 3);

    isolate.stop().unwrap();
}

#[test]
fn test_unknown_method_is_rejected() {
    init_tracing();
    let isolate = domain("strict");
    let proxy = isolate.export(MakeCounter { start: 0 }).unwrap();

    let err = proxy.call::<(), ()>("explode", &()).unwrap_err();
    assert!(matches!(err, Error::Marshal(MarshalError::UnknownMethod(_))));

    isolate.stop().unwrap();
}

#[test]
fn test_proxy_after_stop_is_not_running() {
    init_tracing();
    let isolate = domain("gone");
    let proxy = isolate.export(MakeCounter { start: 0 }).unwrap();
    isolate.stop().unwrap();

    assert!(proxy.call::<u64, u64>("increment", &1).unwrap_err().is_not_running());
}

static WRITER: Interface = Interface::new("Writer", &["put"], &[]);

struct ReadOnly;

impl Exportable for ReadOnly {
    fn interfaces() -> Vec<&'static Interface> {
        vec![&WRITER]
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
    }
}

#[derive(Serialize, Deserialize)]
struct MakeReadOnly;

impl Task for MakeReadOnly {
    type Output = ReadOnly;

    fn run(self, _ctx: &DomainContext) -> Result<ReadOnly, TaskError> {
        Ok(ReadOnly)
    }
}

#[test]
fn test_missing_method_fails_export() {
    init_tracing();
    let isolate = domain("incomplete");

    let err = isolate.export(MakeReadOnly).unwrap_err();
    assert!(matches!(
        err,
        Error::Marshal(MarshalError::MissingMethod { ref interface, ref method })
            if interface == "Writer" && method == "put"
    ));

    isolate.stop().unwrap();
}
