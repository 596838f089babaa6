pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_SSH_CONNECT_MS: u64 = 10_000;
    pub const TIMEOUT_SSH_EXEC_DEFAULT_MS: u64 = 45_000;
    pub const TIMEOUT_SSH_CLOSE_GRACE_MS: u64 = 2_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
}

pub mod limits {
    pub const ERROR_DISPLAY_BYTES: usize = 800;
    pub const MAX_CAPTURE_BYTES: usize = 256 * 1024;
    pub const MAX_NAME_BYTES: usize = 255;
    pub const MAX_PATH_BYTES: usize = 4096;
    pub const PEEK_BYTES: usize = 3 * 1024;
    pub const MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;
    pub const SEARCH_LIMIT: usize = 30;
    pub const SEARCH_MAX_DEPTH: usize = 6;
    pub const BATCH_FAILURES_SHOWN: usize = 10;
    pub const PAGE_SIZE: usize = 20;
}

pub mod tokens {
    pub const PAYLOAD_BUDGET_BYTES: usize = 60;
    pub const DIGEST_CHARS: usize = 16;
    pub const TOKEN_PREFIX: char = '#';
    pub const DEFAULT_CAPACITY: usize = 4096;
    pub const DEFAULT_TTL_MS: u64 = 6 * 60 * 60_000;
}

pub mod deploy {
    pub const DEFAULT_ROOT: &str = "/opt/hostdeck";
    pub const UPLOAD_DIR: &str = ".uploads";
    pub const EXTERNAL_PORT: u16 = 8080;
    pub const IMAGE_INTERNAL_PORT: u16 = 80;
    pub const UNIT_DIR: &str = "/etc/systemd/system";
    pub const NAME_PREFIX: &str = "hostdeck-";
    pub const NODE_PORT: u16 = 3000;
    pub const PYTHON_PORT: u16 = 8000;
    pub const GO_PORT: u16 = 8080;
    pub const JAVA_PORT: u16 = 8080;
}
