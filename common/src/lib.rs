pub mod annotation;
pub mod config;
pub mod detection;
pub mod frame;
