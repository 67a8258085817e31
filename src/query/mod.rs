pub mod partition;
pub mod window;
