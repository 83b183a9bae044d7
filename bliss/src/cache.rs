use lru::LruCache;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use tracing::debug;

pub type OnEvict<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

/// A bounded least-recently-used cache shared by every request.  Values are constructed
/// outside of the lock, so two callers racing on a cold key may both construct; the first
/// insert wins and the loser's value is handed to the eviction callback.
pub struct ResourceCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    name: &'static str,
    entries: Mutex<LruCache<K, V>>,
    on_evict: Option<OnEvict<K, V>>,
}

impl<K, V> ResourceCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            on_evict: None,
        }
    }

    pub fn with_eviction<F>(mut self, on_evict: F) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        self.on_evict = Some(Box::new(on_evict));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// returns the value and marks it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// membership test that does not touch recency
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    /// keys from most to least recently used
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn insert(&self, key: K, value: V) {
        let evicted = self.entries.lock().push(key, value);
        if let Some((key, value)) = evicted {
            self.evicted(key, value);
        }
    }

    pub fn get_or_create<F, E>(&self, key: &K, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let created = create()?;

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key).cloned() {
            drop(entries);
            // lost the race
            self.evicted(key.clone(), created);
            return Ok(existing);
        }
        let evicted = entries.push(key.clone(), created.clone());
        drop(entries);

        if let Some((key, value)) = evicted {
            self.evicted(key, value);
        }
        Ok(created)
    }

    fn evicted(&self, key: K, value: V) {
        debug!("{} cache evicted {:?}", self.name, key);
        if let Some(on_evict) = self.on_evict.as_ref() {
            on_evict(key, value);
        }
    }
}
