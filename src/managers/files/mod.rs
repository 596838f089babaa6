//! Remote file sessions: browsing, selection, single-item operations and
//! the text/upload steps that complete them.

pub mod session;
mod view;

use crate::constants::limits::{PEEK_BYTES, SEARCH_MAX_DEPTH};
use crate::errors::{OpError, OpErrorKind};
use crate::managers::batch::{BatchAction, BatchEngine, BatchSummary};
use crate::services::inventory::HostInventory;
use crate::services::logger::Logger;
use crate::services::registry::OperatorRegistry;
use crate::services::remote::{run_read_only, RemoteExecutor};
use crate::services::settings::Settings;
use crate::transport::reply::Reply;
use crate::utils::archive::{add_to_zip, ArchiveFormat};
use crate::utils::listing::{format_size, parse_listing, parse_search_output, RemoteEntry};
use crate::utils::remote_path;
use crate::utils::shell::RemoteCommand;
use crate::utils::text::lossy;
use bytes::Bytes;
use session::{FileMode, NamePurpose, Session, Sources, TransferOp};
use std::sync::Arc;

const MAX_QUERY_CHARS: usize = 100;

pub struct FileFlowManager {
    logger: Logger,
    settings: Arc<Settings>,
    executor: Arc<dyn RemoteExecutor>,
    inventory: Arc<dyn HostInventory>,
    batch: BatchEngine,
    sessions: OperatorRegistry<Session>,
}

fn absolute_arg(arg: &str) -> Result<String, OpError> {
    if !arg.starts_with('/') {
        return Err(OpError::validation(format!("Expected an absolute path, got '{}'", arg)));
    }
    Ok(remote_path::normalize(arg))
}

fn zip_name(raw: &str) -> Result<String, OpError> {
    let name = remote_path::validate_name(raw)?;
    if name.to_lowercase().ends_with(".zip") {
        Ok(name)
    } else {
        Ok(format!("{}.zip", name))
    }
}

fn search_query(raw: &str) -> Result<String, OpError> {
    let query = raw.trim();
    if query.is_empty() {
        return Err(OpError::validation("Search text must not be empty"));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(OpError::validation(format!(
            "Search text is longer than {} characters",
            MAX_QUERY_CHARS
        )));
    }
    if query.contains('/') || query.chars().any(|c| c.is_control()) {
        return Err(OpError::validation(
            "Search text must be part of a name, without '/' or control characters",
        ));
    }
    Ok(query.to_string())
}

impl FileFlowManager {
    pub fn new(
        logger: Logger,
        settings: Arc<Settings>,
        executor: Arc<dyn RemoteExecutor>,
        inventory: Arc<dyn HostInventory>,
    ) -> Self {
        let logger = logger.child("files");
        let batch = BatchEngine::new(logger.clone(), executor.clone(), settings.batch_concurrency);
        Self {
            logger,
            settings,
            executor,
            inventory,
            batch,
            sessions: OperatorRegistry::new(),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Copy of the operator's session, if one is open.
    pub async fn session(&self, operator: &str) -> Option<Session> {
        let slot = self.sessions.get(operator)?;
        let session = slot.lock().await;
        Some(session.clone())
    }

    pub async fn hosts_menu(&self) -> Reply {
        match self.inventory.hosts().await {
            Ok(hosts) => view::hosts(&hosts),
            Err(err) => view::error(None, &err),
        }
    }

    /// Handles an `fs:` action with the prefix already stripped.
    pub async fn handle_action(&self, operator: &str, action: &str) -> Reply {
        let (verb, arg) = action.split_once(':').unwrap_or((action, ""));
        match verb {
            "hosts" => return self.hosts_menu().await,
            "host" => {
                return match self.open_host(operator, arg).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        self.log_failure(operator, verb, &err);
                        view::error(None, &err)
                    }
                }
            }
            _ => {}
        }
        let slot = match self.sessions.get(operator) {
            Some(slot) => slot,
            None => {
                return Reply::text("No file session is open. Pick a host first.")
                    .button("Hosts", "fs:hosts")
            }
        };
        let mut session = slot.lock().await;
        let result = self.dispatch(&mut session, verb, arg).await;
        self.settle(&mut session, verb, result)
    }

    /// Text input for the current step; `None` when the session is not
    /// waiting for text.
    pub async fn handle_text(&self, operator: &str, text: &str) -> Option<Reply> {
        let slot = self.sessions.get(operator)?;
        let mut session = slot.lock().await;
        let mode = session.mode().clone();
        let step = mode.label();
        let result = match mode {
            FileMode::AwaitingDestination { op, sources } => {
                self.complete_transfer(&mut session, op, sources, text).await
            }
            FileMode::AwaitingName(purpose) => self.complete_name(&mut session, purpose, text).await,
            FileMode::AwaitingSearchQuery => self.complete_search(&mut session, text).await,
            _ => return None,
        };
        Some(self.settle(&mut session, step, result))
    }

    pub async fn handle_upload(&self, operator: &str, name: &str, data: Bytes) -> Option<Reply> {
        let slot = self.sessions.get(operator)?;
        let mut session = slot.lock().await;
        if !session.mode().expects_upload() {
            return None;
        }
        let result = self.complete_upload(&mut session, name, data).await;
        Some(self.settle(&mut session, "upload", result))
    }

    fn log_failure(&self, operator: &str, step: &str, err: &OpError) {
        self.logger.warn(
            "File step failed",
            Some(&serde_json::json!({
                "operator": operator,
                "step": step,
                "kind": err.kind,
                "error": err.message,
            })),
        );
    }

    /// Input problems and transport failures keep the current mode so the
    /// operator can retry; anything else drops back to browsing.
    fn settle(&self, session: &mut Session, step: &str, result: Result<Reply, OpError>) -> Reply {
        match result {
            Ok(reply) => reply,
            Err(err) => {
                self.log_failure(&session.operator, step, &err);
                let keep = matches!(err.kind, OpErrorKind::Validation | OpErrorKind::NotFound)
                    || err.is_transport();
                if !keep {
                    session.cancel();
                }
                view::error(Some(session), &err)
            }
        }
    }

    async fn list_dir(&self, host: &str, dir: &str) -> Result<Vec<RemoteEntry>, OpError> {
        let command = RemoteCommand::new("ls")
            .env("LC_ALL", "C")
            .arg("-la")
            .path(dir);
        let output = run_read_only(&*self.executor, host, &command)
            .await?
            .into_result("List directory")?;
        Ok(parse_listing(&output.stdout_text()))
    }

    async fn open_host(&self, operator: &str, host_id: &str) -> Result<Reply, OpError> {
        let host = self.inventory.host(host_id).await?;
        let home = match run_read_only(&*self.executor, &host.id, &RemoteCommand::new("pwd")).await? {
            output if output.success() && output.stdout_text().trim().starts_with('/') => {
                output.stdout_text().trim().to_string()
            }
            _ => "/".to_string(),
        };
        let entries = self.list_dir(&host.id, &home).await?;
        let mut session = Session::new(operator, &host.id, &home);
        session.show_dir(&home, entries);
        let reply = view::listing(&session, self.settings.page_size, None);
        self.sessions.insert(operator, session);
        self.logger.info(
            "File session opened",
            Some(&serde_json::json!({"operator": operator, "host": host.id, "cwd": home})),
        );
        Ok(reply)
    }

    async fn change_dir(&self, session: &mut Session, dir: &str) -> Result<Reply, OpError> {
        let entries = self.list_dir(&session.host, dir).await?;
        session.show_dir(dir, entries);
        Ok(view::listing(session, self.settings.page_size, None))
    }

    /// Re-lists the current directory and returns to browsing.
    async fn reload(&self, session: &mut Session, notice: &str) -> Result<Reply, OpError> {
        let cwd = session.cwd.clone();
        let entries = self.list_dir(&session.host, &cwd).await?;
        session.show_dir(&cwd, entries);
        Ok(view::listing(session, self.settings.page_size, Some(notice)))
    }

    fn current_entry(&self, session: &Session, arg: &str) -> Result<RemoteEntry, OpError> {
        let path = absolute_arg(arg)?;
        session.entry_at(&path).cloned().ok_or_else(|| {
            OpError::not_found(format!("{} is not in the current listing", path))
                .with_hint("Refresh the listing and try again.")
        })
    }

    async fn run_step(&self, host: &str, step: &str, command: RemoteCommand) -> Result<(), OpError> {
        self.executor.run(host, &command).await?.into_result(step)?;
        Ok(())
    }

    async fn exists(&self, host: &str, path: &str) -> Result<bool, OpError> {
        let command = RemoteCommand::new("test").arg("-e").arg(path);
        Ok(run_read_only(&*self.executor, host, &command).await?.success())
    }

    async fn is_dir(&self, host: &str, path: &str) -> Result<bool, OpError> {
        let command = RemoteCommand::new("test").arg("-d").arg(path);
        Ok(run_read_only(&*self.executor, host, &command).await?.success())
    }

    async fn dispatch(&self, session: &mut Session, verb: &str, arg: &str) -> Result<Reply, OpError> {
        let page_size = self.settings.page_size;
        match verb {
            "ls" => {
                let cwd = session.cwd.clone();
                let entries = self.list_dir(&session.host, &cwd).await?;
                if *session.mode() == FileMode::Selecting {
                    session.set_entries(entries);
                } else {
                    session.show_dir(&cwd, entries);
                }
                Ok(view::listing(session, page_size, None))
            }
            "cd" | "go" => {
                let dir = absolute_arg(arg)?;
                self.change_dir(session, &dir).await
            }
            "up" => {
                let dir = remote_path::parent(&session.cwd);
                self.change_dir(session, &dir).await
            }
            "page" => {
                let page = arg
                    .parse::<usize>()
                    .map_err(|_| OpError::validation(format!("Bad page number: {}", arg)))?;
                session.set_page(page, page_size);
                Ok(view::listing(session, page_size, None))
            }
            "entry" => {
                let entry = self.current_entry(session, arg)?;
                Ok(view::entry_detail(session, &entry))
            }
            "reveal" => {
                let path = absolute_arg(arg)?;
                let dir = remote_path::parent(&path);
                let entries = self.list_dir(&session.host, &dir).await?;
                session.show_dir(&dir, entries);
                let entry = self.current_entry(session, &path)?;
                Ok(view::entry_detail(session, &entry))
            }
            "get" => self.download(session, arg).await,
            "peek" => self.peek(session, arg).await,
            "rename" => {
                let entry = self.current_entry(session, arg)?;
                let path = remote_path::join(&session.cwd, &entry.name);
                session.enter(FileMode::AwaitingName(NamePurpose::Rename {
                    path,
                    old_name: entry.name.clone(),
                }));
                Ok(view::prompt(format!("Send the new name for {}", entry.name)))
            }
            "copy" | "move" => {
                let entry = self.current_entry(session, arg)?;
                let op = if verb == "copy" { TransferOp::Copy } else { TransferOp::Move };
                session.enter(FileMode::AwaitingDestination {
                    op,
                    sources: Sources::Single(remote_path::join(&session.cwd, &entry.name)),
                });
                Ok(view::prompt(format!(
                    "{} {}: send the destination directory (absolute, or relative to {})",
                    op.label(),
                    entry.name,
                    session.cwd
                )))
            }
            "zip" => {
                let entry = self.current_entry(session, arg)?;
                session.enter(FileMode::AwaitingName(NamePurpose::Archive {
                    sources: Sources::Single(remote_path::join(&session.cwd, &entry.name)),
                }));
                Ok(view::prompt(format!(
                    "Send a name for the archive of {} (.zip is added if missing)",
                    entry.name
                )))
            }
            "unzip" => self.extract(session, arg).await,
            "rm" => {
                let entry = self.current_entry(session, arg)?;
                let path = remote_path::join(&session.cwd, &entry.name);
                Ok(view::confirm(
                    format!("Delete {}? This cannot be undone.", path),
                    "Delete",
                    view::action("rm!", &path),
                ))
            }
            "rm!" => {
                let entry = self.current_entry(session, arg)?;
                let path = remote_path::join(&session.cwd, &entry.name);
                self.run_step(&session.host, "Delete", RemoteCommand::new("rm").arg("-rf").path(&path))
                    .await?;
                self.logger.info(
                    "Deleted entry",
                    Some(&serde_json::json!({"host": session.host, "path": path})),
                );
                self.reload(session, &format!("Deleted {}", entry.name)).await
            }
            "mkdir" => {
                session.enter(FileMode::AwaitingName(NamePurpose::NewFolder));
                Ok(view::prompt(format!("Send a name for the new folder in {}", session.cwd)))
            }
            "upload" => {
                session.enter(FileMode::AwaitingUpload);
                Ok(view::prompt(format!("Send a file to upload into {}", session.cwd)))
            }
            "search" => {
                session.enter(FileMode::AwaitingSearchQuery);
                Ok(view::prompt(format!("Send part of a name to search for under {}", session.cwd)))
            }
            "select" => {
                session.enter(FileMode::Selecting);
                Ok(view::listing(session, page_size, None))
            }
            "pick" => {
                let path = absolute_arg(arg)?;
                if session.entry_at(&path).is_none() {
                    return Err(OpError::not_found(format!("{} is not in the current listing", path)));
                }
                session.toggle(&path)?;
                Ok(view::listing(session, page_size, None))
            }
            "all" => {
                session.select_all()?;
                Ok(view::listing(session, page_size, None))
            }
            "none" => {
                session.clear_selection();
                Ok(view::listing(session, page_size, None))
            }
            "batch" => {
                self.require_selection(session, 1)?;
                Ok(view::batch_menu(session.selection().len()))
            }
            "bdel" => {
                let count = self.require_selection(session, 1)?;
                Ok(view::confirm(
                    format!("Delete {} selected item(s)? This cannot be undone.", count),
                    "Delete all",
                    view::action("bdel!", ""),
                ))
            }
            "bdel!" => {
                let summary = self.batch.run_for_session(session, &BatchAction::Delete).await?;
                self.after_batch(session, &summary).await
            }
            "bcopy" | "bmove" => {
                let count = self.require_selection(session, 1)?;
                let op = if verb == "bcopy" { TransferOp::Copy } else { TransferOp::Move };
                session.enter(FileMode::AwaitingDestination {
                    op,
                    sources: Sources::Selection,
                });
                Ok(view::prompt(format!(
                    "{} {} item(s): send the destination directory",
                    op.label(),
                    count
                )))
            }
            "bzip" => {
                let count = self.require_selection(session, 2)?;
                session.enter(FileMode::AwaitingName(NamePurpose::Archive {
                    sources: Sources::Selection,
                }));
                Ok(view::prompt(format!(
                    "Send a name for the archive of {} item(s)",
                    count
                )))
            }
            "cancel" => {
                session.cancel();
                Ok(view::listing(session, page_size, Some("Cancelled.")))
            }
            other => Err(OpError::validation(format!("Unknown file action: {}", other))),
        }
    }

    fn require_selection(&self, session: &Session, min: usize) -> Result<usize, OpError> {
        let count = session.selection().len();
        if count == 0 {
            return Err(OpError::validation("Nothing is selected"));
        }
        if count < min {
            return Err(OpError::validation(format!("Select at least {} items", min)));
        }
        Ok(count)
    }

    async fn after_batch(&self, session: &mut Session, summary: &BatchSummary) -> Result<Reply, OpError> {
        self.reload(session, &summary.render()).await
    }

    async fn download(&self, session: &mut Session, arg: &str) -> Result<Reply, OpError> {
        let entry = self.current_entry(session, arg)?;
        if entry.is_dir() {
            return Err(OpError::validation("Directories cannot be downloaded; archive it first"));
        }
        if entry.size > self.settings.max_download_bytes {
            return Err(OpError::validation(format!(
                "{} is {}, larger than the {} download limit",
                entry.name,
                format_size(entry.size),
                format_size(self.settings.max_download_bytes)
            )));
        }
        let path = remote_path::join(&session.cwd, &entry.name);
        let data = self.executor.download(&session.host, &path).await?;
        Ok(Reply::text(format!("{} ({})", entry.name, format_size(data.len() as u64)))
            .attach(entry.name.clone(), data)
            .button("Back", view::action("ls", "")))
    }

    async fn peek(&self, session: &mut Session, arg: &str) -> Result<Reply, OpError> {
        let entry = self.current_entry(session, arg)?;
        if entry.is_dir() {
            return Err(OpError::validation("Cannot preview a directory"));
        }
        let path = remote_path::join(&session.cwd, &entry.name);
        let command = RemoteCommand::new("head")
            .arg("-c")
            .arg(PEEK_BYTES.to_string())
            .path(&path);
        let output = run_read_only(&*self.executor, &session.host, &command)
            .await?
            .into_result("Preview")?;
        let text = if output.stdout.contains(&0) {
            "(binary content, preview unavailable)".to_string()
        } else if output.stdout.is_empty() {
            "(empty file)".to_string()
        } else {
            lossy(&output.stdout)
        };
        Ok(Reply::text(format!("{}:\n\n{}", entry.name, text))
            .button("Back", view::action("entry", &path)))
    }

    async fn extract(&self, session: &mut Session, arg: &str) -> Result<Reply, OpError> {
        let entry = self.current_entry(session, arg)?;
        let format = ArchiveFormat::require(&entry.name)?;
        let archive = remote_path::join(&session.cwd, &entry.name);
        let target = remote_path::join(&session.cwd, &format.stem(&entry.name));
        self.run_step(&session.host, "Extract", format.extract_command(&archive, &target))
            .await?;
        self.reload(session, &format!("Extracted {} into {}", entry.name, target))
            .await
    }

    async fn complete_transfer(
        &self,
        session: &mut Session,
        op: TransferOp,
        sources: Sources,
        text: &str,
    ) -> Result<Reply, OpError> {
        let dest = remote_path::resolve_destination(&session.cwd, text)?;
        if !self.is_dir(&session.host, &dest).await? {
            return Err(OpError::validation(format!("{} is not an existing directory", dest)));
        }
        match sources {
            Sources::Single(path) => {
                if dest == path || dest.starts_with(&format!("{}/", path)) {
                    return Err(OpError::validation("Destination is inside the source"));
                }
                let command = match op {
                    TransferOp::Copy => RemoteCommand::new("cp").arg("-r").paths([&path, &dest]),
                    TransferOp::Move => RemoteCommand::new("mv").paths([&path, &dest]),
                };
                self.run_step(&session.host, op.label(), command).await?;
                let notice = format!("{} {} to {}", op.label(), remote_path::file_name(&path), dest);
                self.reload(session, &notice).await
            }
            Sources::Selection => {
                let action = match op {
                    TransferOp::Copy => BatchAction::CopyTo(dest),
                    TransferOp::Move => BatchAction::MoveTo(dest),
                };
                let summary = self.batch.run_for_session(session, &action).await?;
                self.after_batch(session, &summary).await
            }
        }
    }

    async fn complete_name(
        &self,
        session: &mut Session,
        purpose: NamePurpose,
        text: &str,
    ) -> Result<Reply, OpError> {
        match purpose {
            NamePurpose::Rename { path, old_name } => {
                let name = remote_path::validate_name(text)?;
                if name == old_name {
                    return Err(OpError::validation("The new name is the same as the old one"));
                }
                let target = remote_path::join(&remote_path::parent(&path), &name);
                if self.exists(&session.host, &target).await? {
                    return Err(OpError::validation(format!("{} already exists", name)));
                }
                self.run_step(&session.host, "Rename", RemoteCommand::new("mv").paths([&path, &target]))
                    .await?;
                self.reload(session, &format!("Renamed {} to {}", old_name, name))
                    .await
            }
            NamePurpose::NewFolder => {
                let name = remote_path::validate_name(text)?;
                let target = remote_path::join(&session.cwd, &name);
                self.run_step(&session.host, "Create folder", RemoteCommand::new("mkdir").path(&target))
                    .await?;
                self.reload(session, &format!("Created {}", name)).await
            }
            NamePurpose::Archive { sources } => {
                let archive = zip_name(text)?;
                let target = remote_path::join(&session.cwd, &archive);
                if self.exists(&session.host, &target).await? {
                    return Err(OpError::validation(format!("{} already exists", archive)));
                }
                match sources {
                    Sources::Single(path) => {
                        let command = add_to_zip(&session.cwd, &archive, &path);
                        self.run_step(&session.host, "Archive", command).await?;
                        self.reload(session, &format!("Created {}", archive)).await
                    }
                    Sources::Selection => {
                        let action = BatchAction::Archive {
                            dir: session.cwd.clone(),
                            archive,
                        };
                        let summary = self.batch.run_for_session(session, &action).await?;
                        self.after_batch(session, &summary).await
                    }
                }
            }
        }
    }

    async fn complete_search(&self, session: &mut Session, text: &str) -> Result<Reply, OpError> {
        let query = search_query(text)?;
        let command = RemoteCommand::new("find")
            .arg(&session.cwd)
            .arg("-maxdepth")
            .arg(SEARCH_MAX_DEPTH.to_string())
            .arg("-iname")
            .arg(format!("*{}*", query))
            .arg("-printf")
            .arg("%y\\t%p\\n")
            .raw("2>/dev/null | head -n")
            .arg(self.settings.search_limit.to_string());
        let output = run_read_only(&*self.executor, &session.host, &command)
            .await?
            .into_result("Search")?;
        let hits = parse_search_output(&output.stdout_text());
        session.cancel();
        Ok(view::search_results(session, &query, &hits))
    }

    async fn complete_upload(&self, session: &mut Session, name: &str, data: Bytes) -> Result<Reply, OpError> {
        let name = remote_path::validate_name(name)?;
        let target = remote_path::join(&session.cwd, &name);
        let size = data.len() as u64;
        self.executor.upload(&session.host, &target, data).await?;
        self.logger.info(
            "Uploaded file",
            Some(&serde_json::json!({"host": session.host, "path": target, "bytes": size})),
        );
        self.reload(session, &format!("Uploaded {} ({})", name, format_size(size)))
            .await
    }
}
