pub mod atomic_write;
pub mod clipboard;
pub mod data_dir;
pub mod debounce;
pub mod log_buffer;
pub mod sos;
