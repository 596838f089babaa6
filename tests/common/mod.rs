#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use hostdeck::app::App;
use hostdeck::errors::OpError;
use hostdeck::services::inventory::{HostAuth, HostInventory, HostRecord, MemoryInventory};
use hostdeck::services::logger::{LogLevel, Logger};
use hostdeck::services::remote::{CommandOutput, RemoteExecutor};
use hostdeck::services::settings::Settings;
use hostdeck::utils::shell::RemoteCommand;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const OPERATOR: &str = "op-1";
pub const HOST: &str = "web-1";

#[derive(Clone)]
enum Scripted {
    Output(CommandOutput),
    Fail(OpError),
}

struct Rule {
    needle: String,
    reply: Scripted,
    uses_left: Option<usize>,
}

/// In-memory [`RemoteExecutor`]. Commands are matched by substring against
/// the rendered command line; the most recently added rule wins. Anything
/// unmatched exits 0 with no output.
#[derive(Default)]
pub struct FakeExecutor {
    rules: StdMutex<Vec<Rule>>,
    calls: StdMutex<Vec<String>>,
    files: StdMutex<HashMap<String, Bytes>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, needle: &str, reply: Scripted, uses_left: Option<usize>) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            reply,
            uses_left,
        });
    }

    pub fn on(&self, needle: &str, stdout: &str) {
        self.push(
            needle,
            Scripted::Output(CommandOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                exit_status: 0,
            }),
            None,
        );
    }

    pub fn on_exit(&self, needle: &str, exit_status: i32, stderr: &str) {
        self.push(
            needle,
            Scripted::Output(CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                exit_status,
            }),
            None,
        );
    }

    pub fn on_error(&self, needle: &str, err: OpError) {
        self.push(needle, Scripted::Fail(err), None);
    }

    pub fn on_error_once(&self, needle: &str, err: OpError) {
        self.push(needle, Scripted::Fail(err), Some(1));
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::copy_from_slice(data));
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Most `run` calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, line: &str) -> Result<CommandOutput, OpError> {
        self.calls.lock().unwrap().push(line.to_string());
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut().rev() {
            if rule.uses_left == Some(0) || !line.contains(&rule.needle) {
                continue;
            }
            if let Some(left) = rule.uses_left.as_mut() {
                *left -= 1;
            }
            return match &rule.reply {
                Scripted::Output(output) => Ok(output.clone()),
                Scripted::Fail(err) => Err(err.clone()),
            };
        }
        Ok(CommandOutput::default())
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn run(&self, _host: &str, command: &RemoteCommand) -> Result<CommandOutput, OpError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let result = self.respond(&command.render());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn upload(&self, _host: &str, remote_path: &str, data: Bytes) -> Result<(), OpError> {
        self.respond(&format!("upload {}", remote_path))?;
        self.files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), data);
        Ok(())
    }

    async fn download(&self, _host: &str, remote_path: &str) -> Result<Bytes, OpError> {
        self.respond(&format!("download {}", remote_path))?;
        self.file(remote_path)
            .ok_or_else(|| OpError::not_found(format!("No such file: {}", remote_path)))
    }
}

pub fn quiet_logger() -> Logger {
    Logger::with_level("test", LogLevel::Error)
}

pub fn host_record(id: &str) -> HostRecord {
    HostRecord {
        id: id.to_string(),
        label: None,
        address: "127.0.0.1".to_string(),
        port: 22,
        username: "deploy".to_string(),
        auth: HostAuth::Password {
            password: "secret".to_string(),
        },
        host_key_sha256: None,
    }
}

pub fn test_settings() -> Settings {
    Settings {
        page_size: 50,
        ..Settings::default()
    }
}

pub struct Harness {
    pub app: App,
    pub executor: Arc<FakeExecutor>,
    pub inventory: Arc<MemoryInventory>,
}

pub fn harness_with(settings: Settings) -> Harness {
    let executor = FakeExecutor::new();
    let inventory = Arc::new(MemoryInventory::new(vec![host_record(HOST)]));
    let app = App::with_parts(
        quiet_logger(),
        settings,
        inventory.clone() as Arc<dyn HostInventory>,
        executor.clone() as Arc<dyn RemoteExecutor>,
    );
    Harness {
        app,
        executor,
        inventory,
    }
}

pub fn harness() -> Harness {
    harness_with(test_settings())
}

pub const SRV_LISTING: &str = "total 20
drwxr-xr-x  4 deploy deploy 4096 Mar  3 09:15 .
drwxr-xr-x 12 root   root   4096 Jan 11  2022 ..
-rw-r--r--  1 deploy deploy  120 Mar  3 09:15 a.txt
-rw-r--r--  1 deploy deploy  300 Mar  3 09:16 b.txt
drwxr-xr-x  2 deploy deploy 4096 Feb 28 18:02 logs
";

/// Opens a file session on `/srv` for [`OPERATOR`].
pub async fn open_srv(h: &Harness) {
    h.executor.on("pwd", "/srv\n");
    h.executor.on("ls -la -- /srv", SRV_LISTING);
    let reply = h.app.dispatcher.on_action(OPERATOR, &format!("fs:host:{}", HOST)).await;
    assert!(reply.text.contains("web-1:/srv"), "unexpected reply: {}", reply.text);
}
