//! Isolation and ordering of work inside a domain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use isolate_core::{IsolateConfig, TaskError};
use isolate_runtime::*;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// Initialize tracing for tests
fn init_tracing() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn quick_domain(name: &str) -> Isolate {
    let config = IsolateConfig {
        handoff_poll_ms: 20,
        result_poll_ms: 20,
        stop_handoff_timeout_ms: 50,
        teardown_pause_ms: 2,
        ..Default::default()
    };
    Isolate::builder(name)
        .config(config)
        .sink(Arc::new(MemorySink::new()))
        .hooks(Arc::new(ShutdownHooks::new()))
        .build()
        .unwrap()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Basket {
    items: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct AddItem {
    basket: Basket,
    item: String,
}

impl Task for AddItem {
    type Output = Basket;

    fn run(mut self, _ctx: &DomainContext) -> Result<Basket, TaskError> {
        self.basket.items.push(self.item);
        Ok(self.basket)
    }
}

#[test]
fn test_values_are_copied_both_ways() {
    init_tracing();
    let isolate = quick_domain("copies");
    isolate.start().unwrap();

    let basket = Basket {
        items: vec!["bread".to_string()],
    };
    let mut filled = isolate
        .submit(AddItem {
            basket: basket.clone(),
            item: "milk".to_string(),
        })
        .unwrap();

    assert_eq!(basket.items, vec!["bread"]);
    assert_eq!(filled.items, vec!["bread", "milk"]);

    // Mutating the returned copy leaves nothing behind in the domain.
    filled.items.clear();
    let again = isolate
        .submit(AddItem {
            basket: basket.clone(),
            item: "eggs".to_string(),
        })
        .unwrap();
    assert_eq!(again.items, vec!["bread", "eggs"]);

    assert!(isolate.stop().unwrap().is_complete());
}

#[derive(Serialize, Deserialize)]
struct Remember {
    key: String,
    value: String,
}

impl Task for Remember {
    type Output = Option<String>;

    fn run(self, ctx: &DomainContext) -> Result<Option<String>, TaskError> {
        let previous = ctx.property(&self.key);
        ctx.set_property(self.key, self.value);
        Ok(previous)
    }
}

#[test]
fn test_properties_are_domain_local() {
    init_tracing();
    let alpha = quick_domain("alpha");
    let beta = quick_domain("beta");
    alpha.start().unwrap();
    beta.start().unwrap();

    let key = "isolation.test.color";
    let before = alpha
        .submit(Remember {
            key: key.to_string(),
            value: "red".to_string(),
        })
        .unwrap();
    assert_eq!(before, None);

    assert_eq!(alpha.property(key).as_deref(), Some("red"));
    assert_eq!(beta.property(key), None);
    assert!(std::env::var(key).is_err());

    let seen_by_beta = beta
        .submit(Remember {
            key: key.to_string(),
            value: "blue".to_string(),
        })
        .unwrap();
    assert_eq!(seen_by_beta, None);
    assert_eq!(alpha.property(key).as_deref(), Some("red"));

    alpha.stop().unwrap();
    beta.stop().unwrap();
}

static ACTIVE: AtomicUsize = AtomicUsize::new(0);
static MAX_ACTIVE: AtomicUsize = AtomicUsize::new(0);

#[derive(Serialize, Deserialize)]
struct Probe;

impl Task for Probe {
    type Output = ();

    fn run(self, _ctx: &DomainContext) -> Result<(), TaskError> {
        let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
        MAX_ACTIVE.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        ACTIVE.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_units_never_overlap() {
    init_tracing();
    let isolate = quick_domain("serial");
    isolate.start().unwrap();

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let isolate = isolate.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    isolate.submit(Probe).unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert_eq!(MAX_ACTIVE.load(Ordering::SeqCst), 1);
    assert_eq!(ACTIVE.load(Ordering::SeqCst), 0);
    isolate.stop().unwrap();
}

static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

#[derive(Serialize, Deserialize)]
struct Ticket(u32);

impl Task for Ticket {
    type Output = (u32, usize);

    fn run(self, _ctx: &DomainContext) -> Result<(u32, usize), TaskError> {
        Ok((self.0, SEQUENCE.fetch_add(1, Ordering::SeqCst)))
    }
}

#[test]
fn test_units_run_in_acceptance_order() {
    init_tracing();
    let isolate = quick_domain("ordered");
    isolate.start().unwrap();

    let results: Vec<(u32, usize)> = (0..5).map(|n| isolate.submit(Ticket(n)).unwrap()).collect();
    for pair in results.windows(2) {
        assert!(pair[0].1 < pair[1].1);
    }
    assert_eq!(results.iter().map(|r| r.0).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

    isolate.stop().unwrap();
}

#[test]
fn test_dispatch_waits_for_completion() {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let isolate = Isolate::builder("fire")
        .sink(sink.clone())
        .hooks(Arc::new(ShutdownHooks::new()))
        .build()
        .unwrap();
    isolate.start().unwrap();

    #[derive(Serialize, Deserialize)]
    struct Shout(String);

    impl Task for Shout {
        type Output = ();

        fn run(self, ctx: &DomainContext) -> Result<(), TaskError> {
            thread::sleep(Duration::from_millis(20));
            ctx.println(&self.0);
            Ok(())
        }
    }

    isolate.dispatch(Shout("done".to_string())).unwrap();
    assert_eq!(sink.lines_for("fire"), vec!["done"]);

    isolate.stop().unwrap();
}

#[derive(Serialize, Deserialize)]
struct Measure {
    samples: Vec<f64>,
    scale: u128,
}

impl Task for Measure {
    type Output = (f64, f64, u128);

    fn run(self, _ctx: &DomainContext) -> Result<Self::Output, TaskError> {
        let ratio = self.samples.iter().sum::<f64>() / 0.0;
        Ok((ratio, f64::NAN, self.scale))
    }
}

#[test]
fn test_non_finite_and_wide_values_cross_both_ways() {
    init_tracing();
    let isolate = quick_domain("numeric");
    isolate.start().unwrap();

    let (ratio, missing, scale) = isolate
        .submit(Measure {
            samples: vec![1.5, f64::INFINITY],
            scale: u128::MAX,
        })
        .unwrap();
    assert_eq!(ratio, f64::INFINITY);
    assert!(missing.is_nan());
    assert_eq!(scale, u128::MAX);

    isolate.stop().unwrap();
}
