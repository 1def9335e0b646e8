//! Handler construction.

use dashmap::DashMap;
use std::sync::Arc;

use super::definition::{HandlerId, HandlerRef};
use super::job::Job;

/// Produces handler instances by reference. `None` means the handler was not
/// registered and the caller should fall back to [`HandlerRef::construct`].
pub trait JobFactory: Send + Sync + 'static {
    fn create(&self, handler: &HandlerRef) -> Option<Arc<dyn Job>>;
}

enum Provider {
    Singleton(Arc<dyn Job>),
    Transient(Arc<dyn Fn() -> Arc<dyn Job> + Send + Sync>),
}

/// Factory backed by providers registered per handler identity.
///
/// Two references with the same display name but different identities (two
/// closures both called "report") resolve to their own providers.
#[derive(Default)]
pub struct JobFactoryRegistry {
    providers: DashMap<HandlerId, Provider>,
}

impl JobFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a fresh instance for every run via the reference's
    /// constructor, replacing any provider registered for the same handler.
    pub fn register(&self, handler: &HandlerRef) {
        let constructor = handler.clone();
        self.providers.insert(
            handler.id(),
            Provider::Transient(Arc::new(move || constructor.construct())),
        );
    }

    /// Share one instance across all runs of `handler`.
    pub fn register_singleton(&self, handler: &HandlerRef, job: Arc<dyn Job>) {
        self.providers.insert(handler.id(), Provider::Singleton(job));
    }

    /// Construct per run of `handler` with `factory`.
    pub fn register_transient<F>(&self, handler: &HandlerRef, factory: F)
    where
        F: Fn() -> Arc<dyn Job> + Send + Sync + 'static,
    {
        self.providers
            .insert(handler.id(), Provider::Transient(Arc::new(factory)));
    }

    pub fn is_registered(&self, handler: &HandlerRef) -> bool {
        self.providers.contains_key(&handler.id())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl JobFactory for JobFactoryRegistry {
    fn create(&self, handler: &HandlerRef) -> Option<Arc<dyn Job>> {
        self.providers.get(&handler.id()).map(|provider| match &*provider {
            Provider::Singleton(job) => job.clone(),
            Provider::Transient(factory) => factory(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobContext, JobResult};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Probe;

    #[async_trait]
    impl Job for Probe {
        async fn run(&self, _ctx: &JobContext) -> JobResult {
            Ok(())
        }
    }

    #[test]
    fn test_unregistered_returns_none() {
        let factory = JobFactoryRegistry::new();
        assert!(factory.create(&HandlerRef::of::<Probe>()).is_none());
    }

    #[test]
    fn test_singleton_shares_instance() {
        let factory = JobFactoryRegistry::new();
        let handler = HandlerRef::of::<Probe>();
        factory.register_singleton(&handler, Arc::new(Probe));

        let a = factory.create(&handler).unwrap();
        let b = factory.create(&handler).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_transient_constructs_each_time() {
        let factory = JobFactoryRegistry::new();
        let handler = HandlerRef::of::<Probe>();
        factory.register(&handler);

        assert!(factory.is_registered(&handler));
        let a = factory.create(&handler).unwrap();
        let b = factory.create(&handler).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_same_name_resolves_by_identity() {
        let factory = JobFactoryRegistry::new();
        let registered = HandlerRef::from_fn("report", |_ctx| async { Ok(()) });
        let other = HandlerRef::from_fn("report", |_ctx| async {
            Err(crate::jobs::JobError::fatal("other"))
        });
        factory.register(&registered);

        assert!(factory.is_registered(&registered));
        assert!(!factory.is_registered(&other));
        assert!(factory.create(&other).is_none());

        factory.register(&other);
        let job = factory.create(&other).unwrap();
        let run = crate::jobs::JobRun::instant(
            other.clone(),
            None,
            crate::jobs::JobPriority::Normal,
            chrono::Utc::now(),
        );
        let ctx = JobContext::new(&run, tokio_util::sync::CancellationToken::new());
        assert!(job.run(&ctx).await.is_err());
        assert_eq!(factory.len(), 2);
    }
}
