use parking_lot::Mutex;
use rayon::prelude::*;
use rpool::*;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Create,
    Activate,
    Deactivate,
    Destroy,
}

#[derive(Debug)]
struct Probe {
    serial: usize,
    uses: usize,
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<(usize, Event)>>>,
    next: Arc<AtomicUsize>,
}

impl Recorder {
    fn count(&self, event: Event) -> usize {
        self.events.lock().iter().filter(|(_, e)| *e == event).count()
    }

    fn history(&self, serial: usize) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(s, _)| *s == serial)
            .map(|(_, e)| *e)
            .collect()
    }

    fn created(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

impl ResourceManager<Probe> for Recorder {
    fn create(&self) -> Probe {
        let serial = self.next.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push((serial, Event::Create));
        Probe { serial, uses: 0 }
    }

    fn activate(&self, obj: &mut Probe) {
        self.events.lock().push((obj.serial, Event::Activate));
    }

    fn deactivate(&self, obj: &mut Probe) {
        self.events.lock().push((obj.serial, Event::Deactivate));
    }

    fn destroy(&self, obj: Probe) {
        self.events.lock().push((obj.serial, Event::Destroy));
    }
}

fn pool(initial_size: usize, max_size: usize) -> (ResourcePool<Recorder, Probe>, Recorder) {
    let recorder = Recorder::default();
    let pool =
        ResourcePool::new(PoolConfig::new(initial_size, max_size), recorder.clone()).unwrap();
    (pool, recorder)
}

#[test]
fn test_new_prefills() {
    let (pool, recorder) = pool(2, 3);
    assert_eq!(recorder.created(), 2);
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.cap(), 3);
}

#[test]
fn test_new_rejects_zero_capacity() {
    let result = ResourcePool::new(PoolConfig::new(0, 0), Recorder::default());
    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
}

#[test]
fn test_return_while_locked_is_refused() {
    let (pool, recorder) = pool(1, 2);
    let lease = pool.acquire().unwrap();
    let id = lease.id();

    let mut guard = lease.lock().unwrap();
    guard.uses += 1;
    assert_eq!(lease.request_return(), Err(PoolError::Busy { id }));
    drop(guard);

    assert!(lease.is_active());
    assert_eq!(pool.active(), 1);
    assert_eq!(recorder.count(Event::Deactivate), 0);

    lease.request_return().unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.active(), 0);
    assert_eq!(recorder.count(Event::Deactivate), 1);
}

#[test]
fn test_activation_panic_leaves_instance_active() {
    let failing = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&failing);
    let manager = Callbacks::new(Vec::<u8>::new).on_activate(move |_| {
        if flag.load(Ordering::SeqCst) {
            panic!("activation failed");
        }
    });
    let pool = ResourcePool::new(PoolConfig::new(1, 2), manager).unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| pool.acquire()));
    assert!(result.is_err());
    assert_eq!(pool.active(), 1);
    assert_eq!(pool.len(), 0);

    failing.store(false, Ordering::SeqCst);
    let lease = pool.acquire().unwrap();
    assert!(lease.is_active());
    assert_eq!(pool.active(), 2);
    assert_eq!(pool.stats().created, 2);
}

#[test]
fn test_full_lifecycle() {
    let (pool, recorder) = pool(2, 3);

    let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(recorder.created(), 3);
    assert_eq!(leases[0].lock().unwrap().serial, 0);
    assert_eq!(leases[1].lock().unwrap().serial, 1);
    assert_eq!(pool.len(), 0);

    for lease in &leases {
        lease.request_return().unwrap();
    }
    assert_eq!(pool.len(), 3);
    assert_eq!(recorder.count(Event::Deactivate), 3);
    assert_eq!(recorder.count(Event::Destroy), 0);

    let extra: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(recorder.created(), 4);
    for lease in &extra {
        lease.request_return().unwrap();
    }
    assert_eq!(pool.len(), 3);
    assert_eq!(recorder.count(Event::Destroy), 1);

    assert_eq!(pool.dispose(), Ok(3));
    assert_eq!(recorder.count(Event::Destroy), 4);
    assert!(matches!(pool.acquire(), Err(PoolError::Disposed)));
}

#[test]
fn test_double_return_is_rejected() {
    let (pool, recorder) = pool(1, 2);
    let lease = pool.acquire().unwrap();
    let id = lease.id();

    lease.request_return().unwrap();
    assert_eq!(lease.request_return(), Err(PoolError::NotActive { id }));
    assert!(matches!(lease.lock(), Err(PoolError::NotActive { .. })));
    assert_eq!(recorder.count(Event::Deactivate), 1);
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_callbacks_manager() {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&destroyed);
    let manager = Callbacks::new(Vec::<u8>::new)
        .on_activate(|buf| buf.push(1))
        .on_deactivate(|buf| buf.clear())
        .on_destroy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let pool = ResourcePool::new(PoolConfig::new(1, 1), manager).unwrap();

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    assert_eq!(*first.lock().unwrap(), [1]);
    first.request_return().unwrap();
    second.request_return().unwrap();

    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    drop(pool);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_lease_outlives_pool() {
    let (pool, recorder) = pool(1, 1);
    let lease = pool.acquire().unwrap();
    drop(pool);
    assert_eq!(lease.request_return(), Err(PoolError::Disposed));
    assert_eq!(recorder.count(Event::Deactivate), 0);
}

#[test]
fn test_detached_return_is_noop() {
    let lease = Pooled::detached(String::from("free"));
    assert_eq!(lease.request_return(), Ok(()));
    assert_eq!(lease.lock().unwrap().as_str(), "free");
}

#[test]
fn test_parallel_churn() {
    let max_size = 8;
    let (pool, recorder) = pool(4, max_size);

    (0..2000).into_par_iter().for_each(|_| {
        let lease = pool.acquire().unwrap();
        lease.lock().unwrap().uses += 1;
        assert!(pool.len() <= max_size);
        lease.request_return().unwrap();
    });

    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert!(stats.idle <= max_size);
    assert_eq!(stats.created - stats.destroyed, stats.idle);
    assert_eq!(recorder.count(Event::Activate), 2000);
    assert_eq!(recorder.count(Event::Deactivate), 2000);

    for serial in 0..recorder.created() {
        let history = recorder.history(serial);
        let activations = history.iter().filter(|e| **e == Event::Activate).count();
        let deactivations = history.iter().filter(|e| **e == Event::Deactivate).count();
        assert_eq!(activations, deactivations, "{history:?}");
        for pair in history.windows(2) {
            assert_ne!(pair[0], pair[1], "{history:?}");
        }
    }
}

#[test]
fn test_leases_move_between_threads() {
    let (pool, recorder) = pool(0, 4);
    let leases: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();

    leases.into_par_iter().for_each(|lease| {
        lease.lock().unwrap().uses += 1;
    });

    assert_eq!(pool.len(), 4);
    assert_eq!(pool.active(), 0);
    assert_eq!(recorder.count(Event::Deactivate), 4);
}
