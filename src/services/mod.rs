pub mod inventory;
pub mod logger;
pub mod registry;
pub mod remote;
pub mod settings;
pub mod token_cache;
