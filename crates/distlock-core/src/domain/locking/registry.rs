//! Mechanism registration and startup-time selection
//!
//! Applications register every mechanism they ship with, in priority order,
//! and resolve exactly one of them once at startup. The resolved
//! [`DistributedLocking`] is then passed to whatever needs locking.

use super::guard::LockHandle;
use super::mechanism::LockMechanism;
use super::memory::{InMemoryLockMechanism, IN_MEMORY_MECHANISM};
use super::scope::LockScope;
use super::types::{LockConfig, LockError, LockId, LockResult};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Factory producing a mechanism from the runtime configuration
pub type MechanismFactory = Box<dyn Fn(&LockConfig) -> Arc<dyn LockMechanism> + Send + Sync>;

/// Ordered set of named mechanism factories
#[derive(Default)]
pub struct MechanismRegistry {
    entries: Vec<(String, MechanismFactory)>,
}

impl MechanismRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the in-memory mechanism
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(IN_MEMORY_MECHANISM, |config| {
            Arc::new(InMemoryLockMechanism::new(config.clone())) as Arc<dyn LockMechanism>
        });
        registry
    }

    /// Add a named mechanism factory.
    ///
    /// Registering a name twice replaces the earlier factory but keeps its
    /// position in the selection order.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&LockConfig) -> Arc<dyn LockMechanism> + Send + Sync + 'static,
    {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            warn!(mechanism = %name, "Lock mechanism registered twice, replacing factory");
            entry.1 = Box::new(factory);
        } else {
            self.entries.push((name, Box::new(factory)));
        }
        self
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Check whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve and instantiate the single active mechanism.
    ///
    /// With a configured name, only that mechanism is instantiated; an unknown
    /// name is a configuration error and never falls back to another one.
    /// Without one, the first registered mechanism wins.
    pub fn build(
        &self,
        configured: Option<&str>,
        config: &LockConfig,
    ) -> LockResult<Arc<dyn LockMechanism>> {
        let (name, factory) = match configured {
            Some(wanted) => self
                .entries
                .iter()
                .find(|(n, _)| n == wanted)
                .ok_or_else(|| {
                    let registered = self.names().join(", ");
                    error!(
                        mechanism = %wanted,
                        registered = %registered,
                        "Configured lock mechanism is not registered"
                    );
                    LockError::Configuration {
                        name: wanted.to_string(),
                        registered,
                    }
                })?,
            None => self.entries.first().ok_or(LockError::NoMechanismRegistered)?,
        };

        let mechanism = factory(config);
        info!(
            mechanism = %name,
            configured = configured.is_some(),
            "Selected distributed lock mechanism"
        );
        Ok(mechanism)
    }
}

impl fmt::Debug for MechanismRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MechanismRegistry")
            .field("mechanisms", &self.names())
            .finish()
    }
}

/// The active lock mechanism of a process, resolved once at startup.
///
/// Cheap to clone; every clone shares the same mechanism instance.
#[derive(Debug, Clone)]
pub struct DistributedLocking {
    mechanism: Arc<dyn LockMechanism>,
    config: LockConfig,
}

impl DistributedLocking {
    /// Resolve the active mechanism from a registry
    pub fn build(
        registry: &MechanismRegistry,
        configured: Option<&str>,
        config: LockConfig,
    ) -> LockResult<Self> {
        let mechanism = registry.build(configured, &config)?;
        Ok(Self { mechanism, config })
    }

    /// Wrap an already constructed mechanism
    pub fn from_mechanism(mechanism: Arc<dyn LockMechanism>, config: LockConfig) -> Self {
        Self { mechanism, config }
    }

    /// The active mechanism
    pub fn mechanism(&self) -> &Arc<dyn LockMechanism> {
        &self.mechanism
    }

    /// Name of the active mechanism
    pub fn name(&self) -> &str {
        self.mechanism.name()
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire shared access through the active mechanism
    pub async fn read_lock(
        &self,
        lock_id: LockId,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle> {
        self.mechanism.read_lock(lock_id, timeout).await
    }

    /// Acquire exclusive access through the active mechanism
    pub async fn write_lock(
        &self,
        lock_id: LockId,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle> {
        self.mechanism.write_lock(lock_id, timeout).await
    }

    /// Start a new root lock scope on the active mechanism
    pub fn scope(&self) -> LockScope {
        LockScope::new(self.mechanism.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct NamedMechanism {
        name: &'static str,
        inner: InMemoryLockMechanism,
    }

    #[async_trait]
    impl LockMechanism for NamedMechanism {
        fn name(&self) -> &str {
            self.name
        }

        async fn read_lock(
            &self,
            lock_id: LockId,
            timeout: Option<Duration>,
        ) -> LockResult<LockHandle> {
            self.inner.read_lock(lock_id, timeout).await
        }

        async fn write_lock(
            &self,
            lock_id: LockId,
            timeout: Option<Duration>,
        ) -> LockResult<LockHandle> {
            self.inner.write_lock(lock_id, timeout).await
        }
    }

    fn register_named(
        registry: &mut MechanismRegistry,
        name: &'static str,
        built: &Arc<AtomicUsize>,
    ) {
        let built = built.clone();
        registry.register(name, move |config| {
            built.fetch_add(1, Ordering::SeqCst);
            Arc::new(NamedMechanism {
                name,
                inner: InMemoryLockMechanism::new(config.clone()),
            }) as Arc<dyn LockMechanism>
        });
    }

    #[test]
    fn test_first_registered_wins_without_configuration() {
        for _ in 0..3 {
            let foo_built = Arc::new(AtomicUsize::new(0));
            let bar_built = Arc::new(AtomicUsize::new(0));
            let mut registry = MechanismRegistry::new();
            register_named(&mut registry, "Foo", &foo_built);
            register_named(&mut registry, "Bar", &bar_built);

            let mechanism = registry
                .build(None, &LockConfig::default())
                .expect("Failed to build mechanism");

            assert_eq!(mechanism.name(), "Foo");
            assert_eq!(foo_built.load(Ordering::SeqCst), 1);
            assert_eq!(bar_built.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_configured_name_selects_only_that_mechanism() {
        let foo_built = Arc::new(AtomicUsize::new(0));
        let bar_built = Arc::new(AtomicUsize::new(0));
        let mut registry = MechanismRegistry::new();
        register_named(&mut registry, "Foo", &foo_built);
        register_named(&mut registry, "Bar", &bar_built);

        let mechanism = registry
            .build(Some("Bar"), &LockConfig::default())
            .expect("Failed to build mechanism");

        assert_eq!(mechanism.name(), "Bar");
        assert_eq!(foo_built.load(Ordering::SeqCst), 0);
        assert_eq!(bar_built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_name_is_a_configuration_error() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut registry = MechanismRegistry::new();
        register_named(&mut registry, "Foo", &built);

        let err = registry
            .build(Some("Unknown"), &LockConfig::default())
            .expect_err("Unknown mechanism must not build");

        assert!(matches!(err, LockError::Configuration { ref name, .. } if name == "Unknown"));
        assert!(err.to_string().contains("Unknown"));
        assert!(err.to_string().contains("Foo"));
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_registry() {
        let registry = MechanismRegistry::new();
        let err = registry.build(None, &LockConfig::default()).unwrap_err();
        assert!(matches!(err, LockError::NoMechanismRegistered));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_re_registration_keeps_position() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));
        let mut registry = MechanismRegistry::new();
        register_named(&mut registry, "Foo", &first);
        register_named(&mut registry, "Bar", &other);
        register_named(&mut registry, "Foo", &second);

        assert_eq!(registry.names(), vec!["Foo", "Bar"]);
        let mechanism = registry.build(None, &LockConfig::default()).unwrap();
        assert_eq!(mechanism.name(), "Foo");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_defaults_register_in_memory() {
        let registry = MechanismRegistry::with_defaults();
        assert!(registry.contains(IN_MEMORY_MECHANISM));
        assert_eq!(registry.len(), 1);
        assert!(format!("{:?}", registry).contains("InMemory"));
    }

    #[tokio::test]
    async fn test_distributed_locking_uses_active_mechanism() {
        let locking = DistributedLocking::build(
            &MechanismRegistry::with_defaults(),
            None,
            LockConfig::default(),
        )
        .expect("Failed to build locking");

        assert_eq!(locking.name(), IN_MEMORY_MECHANISM);

        let clone = locking.clone();
        let held = locking.write_lock(LockId(5), None).await.unwrap();
        let blocked = clone.read_lock(LockId(5), Some(Duration::ZERO)).await;
        assert!(blocked.is_err());

        drop(held);
        let granted = clone.read_lock(LockId(5), Some(Duration::ZERO)).await;
        assert!(granted.is_ok());
    }
}
