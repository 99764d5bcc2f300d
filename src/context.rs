//! Shared state threaded through every analysis phase
//!
//! Caches and configuration travel through this context instead of ambient
//! globals so tests can run many independent analyses side by side.

use std::sync::Arc;

use crate::classfile::TypeRef;
use crate::config::AnalysisConfig;
use crate::host::HostRuntime;
use crate::policy::PolicyStore;
use crate::report::DiagnosticsSink;

pub struct AnalysisContext {
    pub config: AnalysisConfig,
    pub host: Arc<dyn HostRuntime>,
    pub policy: PolicyStore,
    pub diag: DiagnosticsSink,
}

impl AnalysisContext {
    pub fn new(host: Arc<dyn HostRuntime>, config: AnalysisConfig) -> Self {
        Self {
            config,
            host,
            policy: PolicyStore::new(),
            diag: DiagnosticsSink::new(),
        }
    }

    pub fn class_name(&self, class: TypeRef) -> Arc<str> {
        self.host.class_name(class)
    }
}
