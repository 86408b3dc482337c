use std::path::Path;

use crate::shared::geometry::Size;

/// Return the preferred ONNX execution providers for the current platform.
///
/// Falls back to CPU if the platform-specific provider is unavailable.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Loads an ONNX model with the platform's preferred execution providers.
pub fn load_session(
    model_path: &Path,
) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    let session = ort::session::Session::builder()?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(model_path)?;
    log::info!("Loaded ONNX model {}", model_path.display());
    Ok(session)
}

/// Reads the spatial input size from an NCHW model input (`[N, C, H, W]`).
///
/// Returns `None` for dynamic or non-image inputs.
pub fn nchw_input_size(session: &ort::session::Session) -> Option<Size> {
    session.inputs().first().and_then(|input| {
        if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
            if shape.len() >= 4 && shape[2] > 0 && shape[3] > 0 {
                Some(Size::new(shape[3] as u32, shape[2] as u32))
            } else {
                None
            }
        } else {
            None
        }
    })
}
