// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique job ID
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub mod mocks {
    use super::IdProvider;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential ids (job-1, job-2, ...) for deterministic tests
    pub struct SeqIdProvider {
        counter: AtomicU64,
    }

    impl SeqIdProvider {
        pub fn new() -> Self {
            Self {
                counter: AtomicU64::new(1),
            }
        }
    }

    impl Default for SeqIdProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl IdProvider for SeqIdProvider {
        fn generate_id(&self) -> String {
            format!("job-{}", self.counter.fetch_add(1, Ordering::SeqCst))
        }
    }
}
