//! Distlock Core Integration Tests

use async_trait::async_trait;
use distlock_core::{
    Error,
    config::LockingConfig,
    domain::locking::{
        DistributedLocking, InMemoryLockMechanism, LockConfig, LockError, LockHandle, LockId,
        LockMechanism, LockResult, MechanismRegistry, well_known,
    },
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Foo(InMemoryLockMechanism);

#[derive(Debug)]
struct Bar(InMemoryLockMechanism);

macro_rules! delegate_mechanism {
    ($ty:ident) => {
        #[async_trait]
        impl LockMechanism for $ty {
            fn name(&self) -> &str {
                stringify!($ty)
            }

            async fn read_lock(
                &self,
                lock_id: LockId,
                timeout: Option<Duration>,
            ) -> LockResult<LockHandle> {
                self.0.read_lock(lock_id, timeout).await
            }

            async fn write_lock(
                &self,
                lock_id: LockId,
                timeout: Option<Duration>,
            ) -> LockResult<LockHandle> {
                self.0.write_lock(lock_id, timeout).await
            }
        }
    };
}

delegate_mechanism!(Foo);
delegate_mechanism!(Bar);

fn foo_bar_registry() -> MechanismRegistry {
    let mut registry = MechanismRegistry::new();
    registry
        .register("Foo", |config| {
            Arc::new(Foo(InMemoryLockMechanism::new(config.clone()))) as Arc<dyn LockMechanism>
        })
        .register("Bar", |config| {
            Arc::new(Bar(InMemoryLockMechanism::new(config.clone()))) as Arc<dyn LockMechanism>
        });
    registry
}

#[tokio::test]
async fn test_foo_bar_baz_selection() {
    let registry = foo_bar_registry();

    let locking = DistributedLocking::build(&registry, None, LockConfig::default())
        .expect("Failed to build default mechanism");
    assert_eq!(locking.name(), "Foo");
    assert!(format!("{:?}", locking.mechanism()).starts_with("Foo("));

    let locking = DistributedLocking::build(&registry, Some("Bar"), LockConfig::default())
        .expect("Failed to build configured mechanism");
    assert_eq!(locking.name(), "Bar");
    assert!(format!("{:?}", locking.mechanism()).starts_with("Bar("));

    let err = DistributedLocking::build(&registry, Some("Baz"), LockConfig::default())
        .expect_err("Baz was never registered");
    assert!(matches!(err, LockError::Configuration { .. }));
    assert!(err.to_string().contains("Baz"));
}

#[tokio::test]
async fn test_config_driven_selection() {
    let registry = foo_bar_registry();

    let mut config = LockingConfig::from_toml_str("mechanism = \"Bar\"\nwrite_timeout_ms = 20")
        .expect("Failed to parse config");
    let locking = DistributedLocking::from_config(&registry, &config).unwrap();
    assert_eq!(locking.name(), "Bar");
    assert_eq!(locking.config().default_write_timeout, Duration::from_millis(20));

    config.apply_overrides_from(|key| (key == "DISTLOCK_MECHANISM").then(|| "Baz".to_string()));
    let err = DistributedLocking::from_config(&registry, &config).unwrap_err();
    assert!(matches!(err, Error::Lock(LockError::Configuration { .. })));
    assert!(err.to_string().contains("Baz"));
}

#[tokio::test(start_paused = true)]
async fn test_shared_locking_across_components() {
    let locking = DistributedLocking::build(
        &MechanismRegistry::with_defaults(),
        None,
        LockConfig::default().with_write_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let publisher = locking.clone();
    let scope = locking.scope();
    scope
        .eager_write_lock(None, &[well_known::SCHEDULED_PUBLISHING])
        .await
        .unwrap();

    let err = publisher
        .write_lock(well_known::SCHEDULED_PUBLISHING, None)
        .await
        .expect_err("Scope holds the lock");
    assert!(err.is_timeout());

    drop(scope);
    let handle = publisher
        .write_lock(well_known::SCHEDULED_PUBLISHING, None)
        .await
        .expect("Lock is free after the scope ends");
    assert!(handle.is_held());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_ids_do_not_block() {
    let locking = DistributedLocking::build(
        &MechanismRegistry::with_defaults(),
        None,
        LockConfig::default(),
    )
    .unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let locking = locking.clone();
            tokio::spawn(async move {
                let handle = locking
                    .write_lock(LockId(i), Some(Duration::from_millis(500)))
                    .await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                drop(handle);
                Ok::<_, LockError>(())
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("task panicked").expect("Distinct ids must not contend");
    }
}
