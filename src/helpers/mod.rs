pub mod karbon;
pub mod output;
