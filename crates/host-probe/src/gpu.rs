use std::fs;
use std::path::PathBuf;

pub const UNKNOWN_RENDERER: &str = "unknown";

/// Reads the GPU model from the first sysfs node that reports one.
#[derive(Debug, Clone)]
pub struct GpuProbe {
    pub model_files: Vec<PathBuf>,
    pub drm_uevent: PathBuf,
}

impl Default for GpuProbe {
    fn default() -> Self {
        Self {
            model_files: vec![
                PathBuf::from("/sys/kernel/gpu/gpu_model"),
                PathBuf::from("/sys/class/kgsl/kgsl-3d0/gpu_model"),
                PathBuf::from("/sys/class/misc/mali0/device/gpuinfo"),
            ],
            drm_uevent: PathBuf::from("/sys/class/drm/card0/device/uevent"),
        }
    }
}

impl GpuProbe {
    pub fn renderer(&self) -> String {
        for path in &self.model_files {
            if let Ok(contents) = fs::read_to_string(path) {
                let model = contents.trim();
                if !model.is_empty() {
                    return model.to_string();
                }
            }
        }
        fs::read_to_string(&self.drm_uevent)
            .ok()
            .and_then(|contents| renderer_from_uevent(&contents))
            .unwrap_or_else(|| UNKNOWN_RENDERER.to_string())
    }
}

/// Maps the DRM driver name to a renderer family.
pub fn renderer_from_uevent(contents: &str) -> Option<String> {
    let driver = contents
        .lines()
        .find_map(|line| line.strip_prefix("DRIVER="))?
        .trim();
    let family = match driver {
        "panfrost" | "panthor" | "mali" | "mali_kbase" => format!("Mali ({driver})"),
        "msm" | "msm_drm" => format!("Adreno ({driver})"),
        other => other.to_string(),
    };
    Some(family)
}
