//! Cooperative stop protocol
//!
//! A host stop request and the forwarder's SIGTERM handler installation
//! can arrive in either order; whichever comes second fires the handler.
//! The handler runs at most once per start cycle, and always outside the
//! stop mutex so it is free to touch the queues or the bridge.

use std::sync::{Arc, Mutex};

/// Termination handler installed by the forwarder. A closure rather than
/// a bare fn because the ported forwarder's handler closes over its own
/// exit flags.
pub type SigHandler = Arc<dyn Fn(libc::c_int) + Send + Sync>;

#[derive(Default)]
struct StopState {
    handler: Option<SigHandler>,
    handler_called: bool,
    stop_requested: bool,

    /// Status carried out of a worker thread that exited the forwarder
    exit_status: Option<i32>,
}

#[derive(Default)]
pub(crate) struct StopCoordinator {
    state: Mutex<StopState>,
}

impl StopCoordinator {
    /// Record a newly installed handler and/or a stop request, and fire
    /// the handler once both sides have arrived.
    pub fn check_stop(&self, handler: Option<SigHandler>, request_stop: bool) {
        self.update(handler, request_stop, None);
    }

    /// A worker thread left the forwarder with `status`: remember the
    /// status and turn the exit into a stop request for the other
    /// threads.
    pub fn worker_exit(&self, status: i32) {
        self.update(None, true, Some(status));
    }

    fn update(&self, handler: Option<SigHandler>, request_stop: bool, status: Option<i32>) {
        let fire = {
            let mut s = self.state.lock().unwrap();

            if let Some(handler) = handler {
                s.handler = Some(handler);
            }
            if request_stop {
                s.stop_requested = true;
            }
            if let Some(status) = status {
                // First worker exit wins.
                s.exit_status.get_or_insert(status);
            }

            if s.stop_requested && !s.handler_called {
                let cloned = s.handler.as_ref().map(Arc::clone);
                if cloned.is_some() {
                    s.handler_called = true;
                }
                cloned
            } else {
                None
            }
        };

        if let Some(handler) = fire {
            log::debug!("delivering SIGTERM to the forwarder's handler");
            handler(libc::SIGTERM);
        }
    }

    /// True once the forwarder's handler has run. The sleep and read
    /// shims poll this to wind their loops down promptly.
    pub fn handler_called(&self) -> bool {
        self.state.lock().unwrap().handler_called
    }

    /// Status recorded by a worker-thread exit, if any happened.
    pub fn exit_status(&self) -> Option<i32> {
        self.state.lock().unwrap().exit_status
    }

    /// Forget the handler, any pending request and any recorded status.
    pub fn reset(&self) {
        *self.state.lock().unwrap() = StopState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(calls: &Arc<AtomicUsize>) -> SigHandler {
        let calls = Arc::clone(calls);
        Arc::new(move |signum| {
            assert_eq!(signum, libc::SIGTERM);
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_handler_fires_once() {
        let stop = StopCoordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));

        stop.check_stop(Some(counting_handler(&calls)), false);
        assert!(!stop.handler_called());

        stop.check_stop(None, true);
        stop.check_stop(None, true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(stop.handler_called());
    }

    #[test]
    fn test_stop_before_install_is_remembered() {
        let stop = StopCoordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));

        stop.check_stop(None, true);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        stop.check_stop(Some(counting_handler(&calls)), false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_worker_exit_status_wins() {
        let stop = StopCoordinator::default();
        stop.worker_exit(7);
        stop.worker_exit(9);
        assert_eq!(stop.exit_status(), Some(7));
    }

    #[test]
    fn test_reset_allows_another_cycle() {
        let stop = StopCoordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));

        stop.check_stop(Some(counting_handler(&calls)), true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        stop.reset();
        assert!(!stop.handler_called());
        assert_eq!(stop.exit_status(), None);

        stop.check_stop(Some(counting_handler(&calls)), true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
