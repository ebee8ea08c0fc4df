pub mod messaging;
pub mod config;
pub mod mapping;
pub mod console;
pub mod test_util;
