//! Registered observer callbacks.
//!
//! Callbacks are user code: an error or panic is logged and counted, and the
//! invoking evaluation or cycle carries on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::metrics::CallbackMetrics;

pub type Callback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

pub struct CallbackList<T: ?Sized> {
    /// Label used in logs and the callback error metric
    kind: &'static str,
    callbacks: ArcSwap<Vec<Callback<T>>>,
}

impl<T: ?Sized> CallbackList<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            callbacks: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn register<F>(&self, callback: F)
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        self.callbacks.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&callback));
            next
        });
    }

    pub fn len(&self) -> usize {
        self.callbacks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every callback in registration order. Returns how many failed.
    pub fn invoke(&self, value: &T) -> usize {
        let callbacks = self.callbacks.load_full();
        let mut failures = 0;

        for callback in callbacks.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(value)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    CallbackMetrics::record_error(self.kind);
                    tracing::warn!(callback = self.kind, error = %e, "Callback failed");
                }
                Err(_) => {
                    failures += 1;
                    CallbackMetrics::record_error(self.kind);
                    tracing::error!(callback = self.kind, "Callback panicked");
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_failures_do_not_stop_later_callbacks() {
        let list: CallbackList<u32> = CallbackList::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        list.register(|_| anyhow::bail!("boom"));
        list.register(|_| panic!("callback panic"));
        let seen_clone = Arc::clone(&seen);
        list.register(move |v| {
            seen_clone.fetch_add(*v as usize, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(list.len(), 3);
        assert_eq!(list.invoke(&7), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
