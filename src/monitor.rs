// **************************************************************************
// Copyright (c) 2024 usbmonitor contributors All Rights Reserved.
//
// This file is part of usbmonitor
// **************************************************************************

//! Background polling of the device universe with connect/disconnect callbacks.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::attributes::DeviceAttributes;
use crate::backend::{platform_enumerator, DeviceEnumerator};
use crate::diff::{diff, DeviceChanges};
use crate::error::{MonitorError, MonitorResult};
use crate::filter::DeviceFilter;
use crate::snapshot::{self, DeviceSnapshot};

/// Polling period used when none is given.
pub const DEFAULT_CHECK_EVERY: Duration = Duration::from_millis(500);

const WORKER_THREAD_NAME: &str = "usb-monitor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Time between two polls. Must be non-zero.
    pub check_every: Duration,
}

impl MonitorOptions {
    pub fn new(check_every: Duration) -> MonitorResult<Self> {
        let options = Self { check_every };
        options.validate()?;
        Ok(options)
    }

    pub fn from_seconds(seconds: f64) -> MonitorResult<Self> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(MonitorError::InvalidInterval { seconds });
        }
        Self::new(Duration::from_secs_f64(seconds))
    }

    fn validate(&self) -> MonitorResult<()> {
        if self.check_every.is_zero() {
            return Err(MonitorError::InvalidInterval {
                seconds: self.check_every.as_secs_f64(),
            });
        }
        Ok(())
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            check_every: DEFAULT_CHECK_EVERY,
        }
    }
}

/// Receives `(device_id, attributes)` for a connected or disconnected device.
///
/// Implemented for every `Fn(&str, &DeviceAttributes) + Send + Sync` closure.
/// A callback that panics is reported and skipped, it never stops monitoring.
pub trait DeviceCallback: Send + Sync {
    fn call(&self, device_id: &str, attributes: &DeviceAttributes);
}

impl<F> DeviceCallback for F
where
    F: Fn(&str, &DeviceAttributes) + Send + Sync,
{
    fn call(&self, device_id: &str, attributes: &DeviceAttributes) {
        self(device_id, attributes)
    }
}

/// Optional connect and disconnect callbacks.
#[derive(Clone, Default)]
pub struct DeviceHandlers {
    on_connect: Option<Arc<dyn DeviceCallback>>,
    on_disconnect: Option<Arc<dyn DeviceCallback>>,
}

impl DeviceHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, callback: impl DeviceCallback + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect(mut self, callback: impl DeviceCallback + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Report every removed device, then every added one.
    pub fn dispatch(&self, changes: &DeviceChanges) {
        if let Some(callback) = &self.on_disconnect {
            for (id, attrs) in &changes.removed {
                invoke(callback.as_ref(), "disconnect", id, attrs);
            }
        }
        if let Some(callback) = &self.on_connect {
            for (id, attrs) in &changes.added {
                invoke(callback.as_ref(), "connect", id, attrs);
            }
        }
    }
}

impl fmt::Debug for DeviceHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

fn invoke(callback: &dyn DeviceCallback, event: &str, id: &str, attrs: &DeviceAttributes) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback.call(id, attrs))) {
        let failure = MonitorError::CallbackFailure {
            device_id: id.to_owned(),
            message: panic_message(panic.as_ref()),
        };
        tracing::error!(event, "{}", failure);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
}

/// Every critical section leaves its data consistent, so a poisoned lock is
/// still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the caller and the polling thread.
struct Shared {
    enumerator: Box<dyn DeviceEnumerator>,
    filter: Option<DeviceFilter>,
    last_check: Mutex<DeviceSnapshot>,
    /// Held by a polling thread for a whole tick, so a thread still draining
    /// after a stop never dispatches alongside its replacement.
    tick: Mutex<()>,
}

impl Shared {
    fn snapshot(&self) -> MonitorResult<DeviceSnapshot> {
        let records = self.enumerator.enumerate()?;
        Ok(snapshot::build(
            &records,
            self.filter.as_ref(),
            self.enumerator.platform(),
        ))
    }

    fn changes_from_last_check(&self, update_last_check: bool) -> MonitorResult<DeviceChanges> {
        // Held across enumeration so concurrent callers diff against a settled reference.
        let mut last_check = lock(&self.last_check);
        let current = self.snapshot()?;
        let changes = diff(&last_check, &current);
        if update_last_check {
            *last_check = current;
        }
        Ok(changes)
    }

    fn check_changes(&self, handlers: &DeviceHandlers, update_last_check: bool) -> MonitorResult<()> {
        let changes = self.changes_from_last_check(update_last_check)?;
        if !changes.is_empty() {
            tracing::debug!(
                removed = changes.removed.len(),
                added = changes.added.len(),
                "USB devices changed"
            );
        }
        handlers.dispatch(&changes);
        Ok(())
    }
}

struct Worker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    active: Option<Worker>,
    /// Stopped threads that have not been joined yet.
    draining: Vec<JoinHandle<()>>,
}

fn poll_loop(
    shared: Arc<Shared>,
    handlers: DeviceHandlers,
    check_every: Duration,
    stop: mpsc::Receiver<()>,
) {
    tracing::debug!(?check_every, "USB monitor thread started");
    loop {
        match stop.recv_timeout(check_every) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        let _tick = lock(&shared.tick);
        match panic::catch_unwind(AssertUnwindSafe(|| shared.check_changes(&handlers, true))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("USB device poll failed, retrying in {:?}: {}", check_every, e)
            }
            Err(panic) => tracing::error!(
                "USB device poll panicked, retrying in {:?}: {}",
                check_every,
                panic_message(panic.as_ref())
            ),
        }
    }
    tracing::debug!("USB monitor thread exiting");
}

/// Watches the attached USB devices and reports connections and disconnections.
///
/// Each instance owns its filter, its reference snapshot and at most one polling
/// thread. All methods take `&self`, so a monitor can be shared between threads.
pub struct UsbMonitor {
    shared: Arc<Shared>,
    on_start_devices: DeviceSnapshot,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl UsbMonitor {
    /// Monitor every USB device using the enumerator of the current platform.
    pub fn new() -> MonitorResult<Self> {
        Self::with_enumerator(platform_enumerator()?, None)
    }

    /// Monitor only devices matching `filter`.
    pub fn with_filter(filter: DeviceFilter) -> MonitorResult<Self> {
        Self::with_enumerator(platform_enumerator()?, Some(filter))
    }

    /// Monitor the devices reported by `enumerator`. Fails if the initial
    /// enumeration fails.
    pub fn with_enumerator(
        enumerator: Box<dyn DeviceEnumerator>,
        filter: Option<DeviceFilter>,
    ) -> MonitorResult<Self> {
        let shared = Shared {
            enumerator,
            filter,
            last_check: Mutex::new(DeviceSnapshot::new()),
            tick: Mutex::new(()),
        };
        let on_start_devices = shared.snapshot()?;
        *lock(&shared.last_check) = on_start_devices.clone();
        tracing::debug!(devices = on_start_devices.len(), "USB monitor created");

        Ok(Self {
            shared: Arc::new(shared),
            on_start_devices,
            running: AtomicBool::new(false),
            lifecycle: Mutex::default(),
        })
    }

    /// Devices present when the monitor was created.
    pub fn on_start_devices(&self) -> &DeviceSnapshot {
        &self.on_start_devices
    }

    pub fn filter(&self) -> Option<&DeviceFilter> {
        self.shared.filter.as_ref()
    }

    /// Reference snapshot the next check is compared against.
    pub fn last_check_devices(&self) -> DeviceSnapshot {
        lock(&self.shared.last_check).clone()
    }

    /// Never blocks, so it may be called from a callback.
    pub fn state(&self) -> MonitorState {
        if self.running.load(Ordering::SeqCst) {
            MonitorState::Running
        } else {
            MonitorState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    /// Enumerate the devices now, bypassing the reference snapshot.
    pub fn get_current_available_devices(&self) -> MonitorResult<DeviceSnapshot> {
        self.shared.snapshot()
    }

    /// Compare the devices present now with the reference snapshot. The
    /// reference is replaced by the new snapshot when `update_last_check_devices`
    /// is set.
    pub fn changes_from_last_check(
        &self,
        update_last_check_devices: bool,
    ) -> MonitorResult<DeviceChanges> {
        self.shared.changes_from_last_check(update_last_check_devices)
    }

    /// [`changes_from_last_check`](Self::changes_from_last_check), then report
    /// the changes to `handlers`.
    pub fn check_changes(
        &self,
        handlers: &DeviceHandlers,
        update_last_check_devices: bool,
    ) -> MonitorResult<()> {
        self.shared
            .check_changes(handlers, update_last_check_devices)
    }

    /// Start polling on a background thread. Devices already attached are not
    /// reported. Does nothing if the monitor is already running.
    pub fn start_monitoring(
        &self,
        handlers: DeviceHandlers,
        options: MonitorOptions,
    ) -> MonitorResult<()> {
        options.validate()?;

        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.active.is_some() {
            tracing::debug!("USB monitor is already running");
            return Ok(());
        }
        lifecycle.draining.retain(|handle| !handle.is_finished());

        match self.shared.snapshot() {
            Ok(devices) => *lock(&self.shared.last_check) = devices,
            Err(e) => tracing::warn!("Keeping previous device reference: {}", e),
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || poll_loop(shared, handlers, options.check_every, stop_rx))
            .map_err(|source| MonitorError::WorkerSpawn { source })?;

        lifecycle.active = Some(Worker {
            stop: stop_tx,
            handle,
        });
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!(check_every = ?options.check_every, "USB monitor started");
        Ok(())
    }

    /// Stop polling, blocking until the background thread has exited.
    ///
    /// From a callback this only signals the thread, which exits once the
    /// current tick has been dispatched.
    pub fn stop_monitoring(&self, warn_if_was_stopped: bool) {
        let (active, mut handles) = {
            let mut lifecycle = lock(&self.lifecycle);
            self.running.store(false, Ordering::SeqCst);
            (lifecycle.active.take(), mem::take(&mut lifecycle.draining))
        };

        let was_running = active.is_some();
        match active {
            Some(Worker { stop, handle }) => {
                // The thread may already be gone; nothing left to signal then.
                let _ = stop.send(());
                handles.push(handle);
            }
            None if warn_if_was_stopped => {
                tracing::warn!("USB monitor can not be stopped because it is not running");
            }
            None => {}
        }

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                tracing::debug!("USB monitor stop requested from its own thread");
                lock(&self.lifecycle).draining.push(handle);
            } else if handle.join().is_err() {
                tracing::error!("USB monitor thread panicked");
            }
        }
        if was_running {
            tracing::debug!("USB monitor stopped");
        }
    }
}

impl fmt::Debug for UsbMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbMonitor")
            .field("platform", &self.shared.enumerator.platform())
            .field("filter", &self.shared.filter)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for UsbMonitor {
    fn drop(&mut self) {
        self.stop_monitoring(false);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attributes::AttributeKey;
    use crate::normalize::{Platform, RawDeviceRecord};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Weak;
    use std::time::Instant;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts WARN events emitted on the current thread.
    #[derive(Clone, Default)]
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings(f: impl FnOnce()) -> usize {
        let counter = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, f);
        counter.0.load(Ordering::SeqCst)
    }

    fn shared_monitor(enumerator: &ScriptedEnumerator) -> Arc<UsbMonitor> {
        Arc::new(UsbMonitor::with_enumerator(Box::new(enumerator.clone()), None).unwrap())
    }

    /// Enumerator whose device list the test edits between polls.
    #[derive(Clone, Default)]
    struct ScriptedEnumerator {
        devices: Arc<Mutex<Vec<RawDeviceRecord>>>,
        unreachable: Arc<AtomicBool>,
        panicking: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedEnumerator {
        fn set(&self, devices: &[(&str, &str)]) {
            *self.devices.lock().unwrap() = devices
                .iter()
                .map(|(devname, vendor_id)| {
                    [
                        ("DEVNAME", *devname),
                        ("ID_VENDOR_ID", *vendor_id),
                        ("ID_MODEL", "Test device"),
                    ]
                    .into_iter()
                    .collect()
                })
                .collect();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DeviceEnumerator for ScriptedEnumerator {
        fn platform(&self) -> Platform {
            Platform::Linux
        }

        fn enumerate(&self) -> MonitorResult<Vec<RawDeviceRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panicking.load(Ordering::SeqCst) {
                panic!("enumerator bug");
            }
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(MonitorError::enumeration(Platform::Linux, "udev unreachable"));
            }
            Ok(self.devices.lock().unwrap().clone())
        }
    }

    fn monitor(devices: &[(&str, &str)]) -> (UsbMonitor, ScriptedEnumerator) {
        let enumerator = ScriptedEnumerator::default();
        enumerator.set(devices);
        let monitor = UsbMonitor::with_enumerator(Box::new(enumerator.clone()), None).unwrap();
        (monitor, enumerator)
    }

    type Events = Arc<Mutex<Vec<String>>>;

    fn recording_handlers() -> (DeviceHandlers, Events) {
        let events = Events::default();
        let (connected, disconnected) = (events.clone(), events.clone());
        let handlers = DeviceHandlers::new()
            .on_connect(move |id: &str, _: &DeviceAttributes| {
                connected.lock().unwrap().push(format!("connect {}", id))
            })
            .on_disconnect(move |id: &str, _: &DeviceAttributes| {
                disconnected.lock().unwrap().push(format!("disconnect {}", id))
            });
        (handlers, events)
    }

    fn wait_for(events: &Events, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while events.lock().unwrap().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        events.lock().unwrap().clone()
    }

    fn fast() -> MonitorOptions {
        MonitorOptions::new(Duration::from_millis(10)).unwrap()
    }

    #[test]
    fn test_changes_from_last_check() {
        let (monitor, enumerator) = monitor(&[]);
        enumerator.set(&[("/dev/1", "046d")]);

        let (removed, added) = monitor.changes_from_last_check(true).unwrap().into_parts();
        assert!(removed.is_empty());
        assert_eq!(added.ids().collect::<Vec<_>>(), ["/dev/1"]);
        assert_eq!(
            added.get("/dev/1").unwrap().text(AttributeKey::VendorId),
            "046d"
        );
        assert_eq!(
            monitor.last_check_devices(),
            monitor.get_current_available_devices().unwrap()
        );
        assert!(monitor.changes_from_last_check(true).unwrap().is_empty());
    }

    #[test]
    fn test_changes_without_update() {
        let (monitor, enumerator) = monitor(&[("/dev/1", "046d")]);
        enumerator.set(&[]);

        for _ in 0..2 {
            let changes = monitor.changes_from_last_check(false).unwrap();
            assert!(changes.removed.contains("/dev/1"));
            assert!(changes.added.is_empty());
        }
        assert!(monitor.last_check_devices().contains("/dev/1"));
    }

    #[test]
    fn test_unchanged_device_not_reported() {
        let (monitor, _enumerator) = monitor(&[("/dev/1", "046d")]);
        assert!(monitor.changes_from_last_check(true).unwrap().is_empty());
        assert_eq!(monitor.on_start_devices().len(), 1);
    }

    #[test]
    fn test_current_devices_idempotent() {
        let (monitor, _enumerator) = monitor(&[("/dev/1", "046d"), ("/dev/2", "0781")]);
        let first = monitor.get_current_available_devices().unwrap();
        let second = monitor.get_current_available_devices().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_constructor_filter() {
        let enumerator = ScriptedEnumerator::default();
        enumerator.set(&[("/dev/1", "046d"), ("/dev/2", "0781")]);
        let filter = DeviceFilter::new([[("ID_VENDOR_ID", "0781")]]).unwrap();
        let monitor = UsbMonitor::with_enumerator(Box::new(enumerator), Some(filter)).unwrap();

        let devices = monitor.get_current_available_devices().unwrap();
        assert_eq!(devices.ids().collect::<Vec<_>>(), ["/dev/2"]);
    }

    #[test]
    fn test_check_changes_reports_removals_first() {
        let (monitor, enumerator) = monitor(&[("/dev/2", "046d")]);
        let (handlers, events) = recording_handlers();

        enumerator.set(&[("/dev/1", "046d")]);
        monitor.check_changes(&handlers, true).unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            ["disconnect /dev/2", "connect /dev/1"]
        );
    }

    #[test]
    fn test_callback_panic_is_isolated() {
        let (monitor, enumerator) = monitor(&[]);
        let seen = Events::default();
        let seen2 = seen.clone();
        let handlers = DeviceHandlers::new().on_connect(move |id: &str, _: &DeviceAttributes| {
            if id == "/dev/1" {
                panic!("callback failure");
            }
            seen2.lock().unwrap().push(id.to_owned());
        });

        enumerator.set(&[("/dev/1", "046d"), ("/dev/2", "046d")]);
        monitor.check_changes(&handlers, true).unwrap();
        assert_eq!(*seen.lock().unwrap(), ["/dev/2"]);
    }

    #[test]
    fn test_monitoring_reports_events() {
        let (monitor, enumerator) = monitor(&[("/dev/1", "046d")]);
        let (handlers, events) = recording_handlers();

        monitor.start_monitoring(handlers, fast()).unwrap();
        assert_eq!(monitor.state(), MonitorState::Running);

        enumerator.set(&[("/dev/1", "046d"), ("/dev/2", "0781")]);
        assert_eq!(wait_for(&events, 1), ["connect /dev/2"]);

        enumerator.set(&[("/dev/2", "0781")]);
        assert_eq!(
            wait_for(&events, 2),
            ["connect /dev/2", "disconnect /dev/1"]
        );

        monitor.stop_monitoring(true);
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[test]
    fn test_remove_then_readd() {
        let (monitor, enumerator) = monitor(&[("/dev/1", "046d")]);
        let (handlers, events) = recording_handlers();
        monitor.start_monitoring(handlers, fast()).unwrap();

        enumerator.set(&[]);
        wait_for(&events, 1);
        enumerator.set(&[("/dev/1", "046d")]);
        assert_eq!(
            wait_for(&events, 2),
            ["disconnect /dev/1", "connect /dev/1"]
        );
        monitor.stop_monitoring(true);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let (monitor, enumerator) = monitor(&[]);
        let (handlers, events) = recording_handlers();

        monitor.start_monitoring(handlers.clone(), fast()).unwrap();
        monitor.start_monitoring(handlers, fast()).unwrap();
        assert!(monitor.is_running());

        enumerator.set(&[("/dev/1", "046d")]);
        wait_for(&events, 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*events.lock().unwrap(), ["connect /dev/1"]);

        monitor.stop_monitoring(true);
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_start_does_not_report_existing_devices() {
        let (monitor, enumerator) = monitor(&[]);
        // Attached after construction but before start.
        enumerator.set(&[("/dev/1", "046d")]);
        let (handlers, events) = recording_handlers();

        monitor.start_monitoring(handlers, fast()).unwrap();
        thread::sleep(Duration::from_millis(50));
        monitor.stop_monitoring(true);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_when_stopped() {
        let (monitor, _enumerator) = monitor(&[]);
        assert_eq!(count_warnings(|| monitor.stop_monitoring(true)), 1);
        assert_eq!(count_warnings(|| monitor.stop_monitoring(false)), 0);
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[test]
    fn test_stop_running_does_not_warn() {
        let (monitor, _enumerator) = monitor(&[]);
        monitor
            .start_monitoring(DeviceHandlers::new(), fast())
            .unwrap();
        assert_eq!(count_warnings(|| monitor.stop_monitoring(true)), 0);
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[test]
    fn test_callback_queries_state_during_stop() {
        let enumerator = ScriptedEnumerator::default();
        let monitor = shared_monitor(&enumerator);
        let weak: Weak<UsbMonitor> = Arc::downgrade(&monitor);
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let handlers = DeviceHandlers::new().on_connect(move |_: &str, _: &DeviceAttributes| {
            let _ = lock(&entered_tx).send(());
            thread::sleep(Duration::from_millis(100));
            if let Some(monitor) = weak.upgrade() {
                let _ = monitor.is_running();
                let _ = monitor.state();
            }
        });
        monitor.start_monitoring(handlers, fast()).unwrap();

        enumerator.set(&[("/dev/1", "046d")]);
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let stopper = Arc::clone(&monitor);
        thread::spawn(move || {
            stopper.stop_monitoring(true);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_restart_after_stop_in_callback_is_serialized() {
        let enumerator = ScriptedEnumerator::default();
        let monitor = shared_monitor(&enumerator);
        let weak: Weak<UsbMonitor> = Arc::downgrade(&monitor);
        let events = Events::default();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let handlers = {
            let (events, in_flight, max_in_flight) =
                (events.clone(), in_flight.clone(), max_in_flight.clone());
            DeviceHandlers::new().on_connect(move |id: &str, _: &DeviceAttributes| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                if id == "/dev/1" {
                    if let Some(monitor) = weak.upgrade() {
                        monitor.stop_monitoring(true);
                    }
                    thread::sleep(Duration::from_millis(200));
                }
                events.lock().unwrap().push(format!("connect {}", id));
                in_flight.fetch_sub(1, Ordering::SeqCst);
            })
        };
        monitor.start_monitoring(handlers.clone(), fast()).unwrap();

        enumerator.set(&[("/dev/1", "046d")]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(monitor.state(), MonitorState::Stopped);

        monitor.start_monitoring(handlers, fast()).unwrap();
        enumerator.set(&[("/dev/1", "046d"), ("/dev/3", "0781")]);
        assert_eq!(
            wait_for(&events, 2),
            ["connect /dev/1", "connect /dev/3"]
        );
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        monitor.stop_monitoring(true);
    }

    #[test]
    fn test_enumerator_panic_does_not_stop_loop() {
        let (monitor, enumerator) = monitor(&[]);
        let (handlers, events) = recording_handlers();
        monitor.start_monitoring(handlers, fast()).unwrap();

        enumerator.panicking.store(true, Ordering::SeqCst);
        let calls = enumerator.calls();
        while enumerator.calls() < calls + 3 {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(monitor.is_running());
        enumerator.set(&[("/dev/1", "046d")]);
        enumerator.panicking.store(false, Ordering::SeqCst);

        assert_eq!(wait_for(&events, 1), ["connect /dev/1"]);
        monitor.stop_monitoring(true);
    }

    #[test]
    fn test_stop_waits_for_thread() {
        let (monitor, enumerator) = monitor(&[]);
        monitor
            .start_monitoring(DeviceHandlers::new(), fast())
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        monitor.stop_monitoring(true);

        let calls = enumerator.calls();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(enumerator.calls(), calls);
    }

    #[test]
    fn test_restart_after_stop() {
        let (monitor, enumerator) = monitor(&[]);
        let (handlers, events) = recording_handlers();

        monitor.start_monitoring(handlers.clone(), fast()).unwrap();
        monitor.stop_monitoring(true);
        monitor.start_monitoring(handlers, fast()).unwrap();

        enumerator.set(&[("/dev/1", "046d")]);
        assert_eq!(wait_for(&events, 1), ["connect /dev/1"]);
    }

    #[test]
    fn test_enumeration_failure_does_not_stop_loop() {
        let (monitor, enumerator) = monitor(&[]);
        let (handlers, events) = recording_handlers();
        monitor.start_monitoring(handlers, fast()).unwrap();

        enumerator.unreachable.store(true, Ordering::SeqCst);
        let calls = enumerator.calls();
        while enumerator.calls() < calls + 3 {
            thread::sleep(Duration::from_millis(5));
        }
        enumerator.set(&[("/dev/1", "046d")]);
        enumerator.unreachable.store(false, Ordering::SeqCst);

        assert_eq!(wait_for(&events, 1), ["connect /dev/1"]);
        assert!(monitor.is_running());
    }

    #[test]
    fn test_drop_stops_thread() {
        let (monitor, enumerator) = monitor(&[]);
        monitor
            .start_monitoring(DeviceHandlers::new(), fast())
            .unwrap();
        drop(monitor);

        let calls = enumerator.calls();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(enumerator.calls(), calls);
    }

    #[test]
    fn test_invalid_interval() {
        for seconds in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                MonitorOptions::from_seconds(seconds),
                Err(MonitorError::InvalidInterval { .. })
            ));
        }
        assert_eq!(
            MonitorOptions::from_seconds(0.5).unwrap(),
            MonitorOptions::default()
        );

        let (monitor, _enumerator) = monitor(&[]);
        let zero = MonitorOptions {
            check_every: Duration::ZERO,
        };
        assert!(matches!(
            monitor.start_monitoring(DeviceHandlers::new(), zero),
            Err(MonitorError::InvalidInterval { .. })
        ));
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[test]
    fn test_constructor_enumeration_failure() {
        let enumerator = ScriptedEnumerator::default();
        enumerator.unreachable.store(true, Ordering::SeqCst);
        assert!(matches!(
            UsbMonitor::with_enumerator(Box::new(enumerator), None),
            Err(MonitorError::Enumeration { .. })
        ));
    }
}
