pub mod batch;
pub mod deploy;
pub mod dispatcher;
pub mod files;
pub mod ssh;
