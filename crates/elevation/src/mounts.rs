use std::path::{Path, PathBuf};

/// Bind-mount points created by one privileged launch, kept until teardown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MountLedger {
    points: Vec<PathBuf>,
}

impl MountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `point`; a point already recorded is not duplicated.
    pub fn record(&mut self, point: PathBuf) {
        if !self.points.contains(&point) {
            self.points.push(point);
        }
    }

    pub fn points(&self) -> &[PathBuf] {
        &self.points
    }

    pub fn contains(&self, point: &Path) -> bool {
        self.points.iter().any(|existing| existing == point)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn drain(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.points)
    }
}
