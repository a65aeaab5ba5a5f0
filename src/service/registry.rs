//! Name → proxy registry.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::ServiceError;
use crate::proxy::{Dialer, Proxy};

/// Concurrent map from proxy name to proxy.
///
/// Inserts are check-and-set on a single shard entry, so two concurrent
/// registrations of one name can never both succeed.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: DashMap<String, Arc<dyn Proxy>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `proxy` under its name unless the name is taken.
    pub fn add(&self, proxy: Arc<dyn Proxy>) -> Result<(), ServiceError> {
        match self.proxies.entry(proxy.name().to_string()) {
            Entry::Occupied(entry) => Err(ServiceError::AlreadyExists {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(proxy);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Proxy>, ServiceError> {
        self.proxies
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| ServiceError::InvalidProxy {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.proxies.contains_key(name)
    }

    /// Snapshot of all registered proxies, in no particular order.
    pub fn list(&self) -> Vec<Arc<dyn Proxy>> {
        self.proxies.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn bind_dialer(&self, name: &str, dialer: Arc<dyn Dialer>) -> Result<(), ServiceError> {
        // The shard guard is released before calling into the proxy.
        let proxy = self.lookup(name)?;
        proxy.bind(dialer)?;
        Ok(())
    }

    pub fn unbind_dialer(&self, name: &str, dialer: &Arc<dyn Dialer>) -> Result<(), ServiceError> {
        let proxy = self.lookup(name)?;
        proxy.unbind(dialer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::proxy::{BoxConn, Traffic};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubProxy {
        name: String,
        binds: AtomicUsize,
    }

    impl StubProxy {
        fn named(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl Proxy for StubProxy {
        fn name(&self) -> &str {
            &self.name
        }

        async fn accept(&self) -> Result<BoxConn, ProxyError> {
            Err(ProxyError::Closed)
        }

        fn close(&self) -> Result<(), ProxyError> {
            Ok(())
        }

        fn bind(&self, _dialer: Arc<dyn Dialer>) -> Result<(), ProxyError> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unbind(&self, dialer: &Arc<dyn Dialer>) -> Result<(), ProxyError> {
            Err(ProxyError::DialerNotBound {
                id: dialer.id().to_string(),
            })
        }

        async fn handle(&self, _conn: BoxConn, _traffic: Arc<dyn Traffic>) -> Result<(), ProxyError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StubDialer;

    #[async_trait]
    impl Dialer for StubDialer {
        fn id(&self) -> &str {
            "stub"
        }

        async fn dial(&self) -> Result<BoxConn, ProxyError> {
            Err(ProxyError::Closed)
        }
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = ProxyRegistry::new();
        let first = StubProxy::named("a");
        registry.add(first.clone()).unwrap();

        let err = registry.add(StubProxy::named("a")).unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists { ref name } if name == "a"));
        assert_eq!(registry.len(), 1);

        // The first entry is still the one registered.
        let dialer: Arc<dyn Dialer> = Arc::new(StubDialer);
        registry.bind_dialer("a", dialer).unwrap();
        assert_eq!(first.binds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_name_is_invalid() {
        let registry = ProxyRegistry::new();
        let dialer: Arc<dyn Dialer> = Arc::new(StubDialer);

        assert!(matches!(registry.lookup("x"), Err(ServiceError::InvalidProxy { .. })));
        assert!(matches!(
            registry.bind_dialer("x", dialer.clone()),
            Err(ServiceError::InvalidProxy { .. })
        ));
        assert!(matches!(
            registry.unbind_dialer("x", &dialer),
            Err(ServiceError::InvalidProxy { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn proxy_errors_are_surfaced() {
        let registry = ProxyRegistry::new();
        registry.add(StubProxy::named("a")).unwrap();
        let dialer: Arc<dyn Dialer> = Arc::new(StubDialer);

        let err = registry.unbind_dialer("a", &dialer).unwrap_err();
        assert!(matches!(err, ServiceError::Proxy(ProxyError::DialerNotBound { .. })));
    }

    #[test]
    fn concurrent_adds_admit_one_winner() {
        let registry = Arc::new(ProxyRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.add(StubProxy::named("same")).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.list().len(), 1);
    }
}
