pub mod console;
pub mod reply;
