//! Multimodal model detection.

use std::path::{Path, PathBuf};

use super::LoadOptions;

/// Accelerator layers for text-only models.
pub const TEXT_GPU_LAYERS: u32 = 32;
/// Accelerator layers when a visual projector shares the budget.
pub const VISION_GPU_LAYERS: u32 = 20;

/// Whether the identifier names a vision-language model.
pub fn is_vision_model(model: &str) -> bool {
    model.contains("VL") || model.contains("Vision")
}

/// Find a `*mmproj*.gguf` projector next to the model file.
///
/// Picks the lexically first match so repeated loads are deterministic.
pub fn find_vision_projector(model_path: &Path) -> Option<PathBuf> {
    let dir = match model_path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "cannot scan for vision projector");
            return None;
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.contains("mmproj") && name.ends_with(".gguf"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Decide how to load `model`, attaching a projector when one is available.
pub fn plan_load(model: &str) -> LoadOptions {
    let vision_projector = if is_vision_model(model) {
        find_vision_projector(Path::new(model))
    } else {
        None
    };

    if let Some(projector) = &vision_projector {
        tracing::info!(projector = %projector.display(), "attaching vision projector");
    }

    LoadOptions {
        model: model.to_string(),
        gpu_layers: if vision_projector.is_some() {
            VISION_GPU_LAYERS
        } else {
            TEXT_GPU_LAYERS
        },
        vision_projector,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_vision_model() {
        assert!(is_vision_model("/models/Qwen2-VL-7B.gguf"));
        assert!(is_vision_model("llama-3.2-Vision-11b.gguf"));
        assert!(!is_vision_model("/models/mistral-7b.gguf"));
        // Case sensitive, as "vl" appears inside ordinary words.
        assert!(!is_vision_model("/models/novella-7b.gguf"));
    }

    #[test]
    fn test_plan_load_text_model() {
        let options = plan_load("/models/mistral-7b.gguf");
        assert_eq!(options.gpu_layers, TEXT_GPU_LAYERS);
        assert!(options.vision_projector.is_none());
    }

    #[test]
    fn test_plan_load_vision_model_with_projector() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("Qwen2-VL-7B-Q4.gguf");
        std::fs::write(&model, b"").unwrap();
        std::fs::write(dir.path().join("mmproj-Qwen2-VL-f16.gguf"), b"").unwrap();
        std::fs::write(dir.path().join("mmproj-notes.txt"), b"").unwrap();

        let options = plan_load(model.to_str().unwrap());
        assert_eq!(options.gpu_layers, VISION_GPU_LAYERS);
        assert_eq!(
            options.vision_projector,
            Some(dir.path().join("mmproj-Qwen2-VL-f16.gguf"))
        );
    }

    #[test]
    fn test_plan_load_vision_model_without_projector() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("Qwen2-VL-7B-Q4.gguf");
        std::fs::write(&model, b"").unwrap();

        let options = plan_load(model.to_str().unwrap());
        assert_eq!(options.gpu_layers, TEXT_GPU_LAYERS);
        assert!(options.vision_projector.is_none());
    }

    #[test]
    fn test_find_projector_missing_dir() {
        assert!(find_vision_projector(Path::new("/definitely/not/here/model-VL.gguf")).is_none());
    }
}
