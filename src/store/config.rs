/// What an intercepted action does after its body fails synchronously.
///
/// Error hooks fire in both cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncErrorPolicy {
    /// Re-raise the failure as [`StoreError::Action`](super::StoreError::Action),
    /// matching how asynchronous failures behave.
    #[default]
    Propagate,
    /// Swallow the failure and complete with `Value::Null`.
    Swallow,
}

/// Per-container settings.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    pub sync_errors: SyncErrorPolicy,
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_errors(mut self, policy: SyncErrorPolicy) -> Self {
        self.sync_errors = policy;
        self
    }
}
