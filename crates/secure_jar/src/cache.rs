use std::sync::{Mutex, OnceLock, PoisonError};

/// A value computed on first access and kept for the owner's lifetime.
///
/// Concurrent first accesses run the initializer once; the others block and
/// then see its result. A failed initializer leaves the cache empty so the
/// next access retries.
pub struct LazyCache<T> {
    value: OnceLock<T>,
    init: Mutex<()>,
}

impl<T> LazyCache<T> {
    pub const fn new() -> Self {
        Self {
            value: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub fn get_or_try_init<E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let value = f()?;
        Ok(self.value.get_or_init(|| value))
    }
}

impl<T> Default for LazyCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LazyCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LazyCache").field(&self.value.get()).finish()
    }
}
