pub mod archive;
pub mod fs_atomic;
pub mod listing;
pub mod paths;
pub mod remote_path;
pub mod shell;
pub mod text;
