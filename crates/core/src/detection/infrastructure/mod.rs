pub mod math;
pub mod onnx_age_gender_provider;
pub mod onnx_blazeface_detector;
pub mod onnx_descriptor_provider;
pub mod onnx_expression_provider;
pub mod onnx_session;
pub mod tensor;
