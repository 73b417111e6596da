use parking_lot::Mutex;
use url::Url;

/// The page location and its history entry.
pub trait Location: Send + Sync + 'static {
    /// Current URL, including query and fragment.
    fn href(&self) -> Url;

    /// Replaces the current history entry without navigating
    /// (`history.replaceState`).
    fn replace(&self, url: &Url);
}

/// Location held in memory, recording every history write.
#[derive(Debug)]
pub struct MemoryLocation {
    inner: Mutex<History>,
}

#[derive(Debug)]
struct History {
    current: Url,
    entries: usize,
    replacements: usize,
}

impl MemoryLocation {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            inner: Mutex::new(History {
                current: url,
                entries: 1,
                replacements: 0,
            }),
        }
    }

    /// Simulates a navigation to `url` (a new history entry).
    pub fn navigate(&self, url: Url) {
        let mut history = self.inner.lock();
        history.current = url;
        history.entries += 1;
    }

    /// Number of history entries created.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.inner.lock().entries
    }

    /// Number of `replace` calls.
    #[must_use]
    pub fn replacements(&self) -> usize {
        self.inner.lock().replacements
    }
}

impl Location for MemoryLocation {
    fn href(&self) -> Url {
        self.inner.lock().current.clone()
    }

    fn replace(&self, url: &Url) {
        let mut history = self.inner.lock();
        history.current = url.clone();
        history.replacements += 1;
    }
}
