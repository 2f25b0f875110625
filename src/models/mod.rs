pub mod karbon;
pub mod report;
