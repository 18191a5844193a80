//! Ordered registry of reconnect hooks.

use crate::executor::HookResult;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

type Hook<E> = Arc<dyn Fn(&E) -> HookResult + Send + Sync>;

/// Reconnect observers in registration order.
///
/// A failing or panicking hook is logged and skipped; the remaining hooks
/// still run.
pub struct HookRegistry<E> {
    hooks: RwLock<Vec<Hook<E>>>,
}

impl<E> HookRegistry<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Appends a hook. Duplicates are kept.
    pub fn register<H>(&self, hook: H)
    where
        H: Fn(&E) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    /// Returns true if no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Calls every hook with `source` and returns how many failed.
    pub fn notify(&self, source: &E) -> u64 {
        // Snapshot so a hook may register further hooks.
        let hooks: Vec<Hook<E>> = self.hooks.read().clone();
        let mut failures = 0;
        for (position, hook) in hooks.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| hook(source))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    failures += 1;
                    warn!(hook = position, %error, "reconnect hook failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(hook = position, "reconnect hook panicked");
                }
            }
        }
        failures
    }
}

impl<E> Default for HookRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn hooks_run_in_order() {
        let registry: HookRegistry<Mutex<Vec<u32>>> = HookRegistry::new();
        for n in 1..=3 {
            registry.register(move |log: &Mutex<Vec<u32>>| {
                log.lock().push(n);
                Ok(())
            });
        }
        let log = Mutex::new(Vec::new());
        assert_eq!(registry.notify(&log), 0);
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn failures_are_isolated() {
        let registry: HookRegistry<Mutex<Vec<&'static str>>> = HookRegistry::new();
        registry.register(|_: &Mutex<Vec<&'static str>>| Err("boom".into()));
        registry.register(|_: &Mutex<Vec<&'static str>>| panic!("hook panic"));
        registry.register(|log: &Mutex<Vec<&'static str>>| {
            log.lock().push("last");
            Ok(())
        });
        let log = Mutex::new(Vec::new());
        assert_eq!(registry.notify(&log), 2);
        assert_eq!(*log.lock(), vec!["last"]);
    }

    #[test]
    fn duplicates_are_kept() {
        let registry: HookRegistry<()> = HookRegistry::new();
        let hook = |_: &()| -> HookResult { Ok(()) };
        registry.register(hook);
        registry.register(hook);
        assert_eq!(registry.len(), 2);
    }
}
