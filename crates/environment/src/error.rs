use thiserror::Error;

use crate::component::ComponentKind;

#[derive(Debug)]
pub struct ComponentFailure {
    pub kind: ComponentKind,
    pub error: anyhow::Error,
}

/// Every component that failed during one start or stop sweep.
#[derive(Debug, Error)]
#[error("{} component(s) failed: {}", .failures.len(), describe(.failures))]
pub struct ComponentFailures {
    pub failures: Vec<ComponentFailure>,
}

impl ComponentFailures {
    pub fn kinds(&self) -> Vec<ComponentKind> {
        self.failures.iter().map(|failure| failure.kind).collect()
    }
}

fn describe(failures: &[ComponentFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{}: {:#}", failure.kind, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}
