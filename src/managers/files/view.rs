//! Reply rendering for file sessions. Action identifiers carry absolute
//! paths; the dispatcher compacts the long ones.

use super::session::{FileMode, Session};
use crate::errors::OpError;
use crate::services::inventory::HostRecord;
use crate::transport::reply::{Control, Reply};
use crate::utils::archive::ArchiveFormat;
use crate::utils::listing::{format_size, RemoteEntry, SearchHit};
use crate::utils::remote_path;

pub(crate) fn action(verb: &str, arg: &str) -> String {
    if arg.is_empty() {
        format!("fs:{}", verb)
    } else {
        format!("fs:{}:{}", verb, arg)
    }
}

pub(crate) fn hosts(hosts: &[HostRecord]) -> Reply {
    if hosts.is_empty() {
        return Reply::text("No hosts in the inventory.");
    }
    let mut reply = Reply::text("Choose a host:");
    for host in hosts {
        reply = reply.row(vec![
            Control::new(host.display_name(), action("host", &host.id)),
            Control::new("Deploy", format!("dep:start:{}", host.id)),
        ]);
    }
    reply
}

fn entry_row(session: &Session, entry: &RemoteEntry) -> Vec<Control> {
    let path = remote_path::join(&session.cwd, &entry.name);
    if *session.mode() == FileMode::Selecting {
        let mark = if session.is_selected(&path) { "[x]" } else { "[ ]" };
        return vec![Control::new(
            format!("{} {}", mark, entry.name),
            action("pick", &path),
        )];
    }
    if entry.is_dir() {
        vec![
            Control::new(format!("{}/", entry.name), action("cd", &path)),
            Control::new("...", action("entry", &path)),
        ]
    } else {
        vec![Control::new(
            format!("{} ({})", entry.name, format_size(entry.size)),
            action("entry", &path),
        )]
    }
}

pub(crate) fn listing(session: &Session, page_size: usize, notice: Option<&str>) -> Reply {
    let mut text = String::new();
    if let Some(notice) = notice {
        text.push_str(notice);
        text.push_str("\n\n");
    }
    let pages = session.page_count(page_size);
    text.push_str(&format!("{}:{}\n", session.host, session.cwd));
    if session.entries().is_empty() {
        text.push_str("(empty directory)");
    } else {
        text.push_str(&format!(
            "{} entries, page {}/{}",
            session.entries().len(),
            session.page + 1,
            pages
        ));
    }
    let selecting = *session.mode() == FileMode::Selecting;
    if selecting {
        text.push_str(&format!("\nSelected: {}", session.selection().len()));
    }

    let mut reply = Reply::text(text);
    for entry in session.page_entries(page_size) {
        reply = reply.row(entry_row(session, entry));
    }

    let mut paging = Vec::new();
    if session.page > 0 {
        paging.push(Control::new("« Prev", action("page", &(session.page - 1).to_string())));
    }
    if session.page + 1 < pages {
        paging.push(Control::new("Next »", action("page", &(session.page + 1).to_string())));
    }
    reply = reply.row(paging);

    if selecting {
        return reply
            .row(vec![
                Control::new("Select all", action("all", "")),
                Control::new("Clear", action("none", "")),
            ])
            .row(vec![
                Control::new(
                    format!("Actions ({})", session.selection().len()),
                    action("batch", ""),
                ),
                Control::new("Done", action("cancel", "")),
            ]);
    }

    let mut nav = Vec::new();
    if session.cwd != "/" {
        nav.push(Control::new("Up", action("up", "")));
    }
    nav.push(Control::new("Refresh", action("ls", "")));
    reply
        .row(nav)
        .row(vec![
            Control::new("Upload", action("upload", "")),
            Control::new("New folder", action("mkdir", "")),
            Control::new("Search", action("search", "")),
        ])
        .row(vec![
            Control::new("Select", action("select", "")),
            Control::new("Hosts", action("hosts", "")),
        ])
}

pub(crate) fn entry_detail(session: &Session, entry: &RemoteEntry) -> Reply {
    let path = remote_path::join(&session.cwd, &entry.name);
    let kind = if entry.is_dir() { "directory" } else { "file" };
    let mut lines = vec![
        entry.name.clone(),
        format!("Type: {}", kind),
        format!("Modified: {}", entry.modified),
        format!("Permissions: {}", entry.permissions),
        format!("Owner: {}:{}", entry.owner, entry.group),
        format!("Path: {}", path),
    ];
    if !entry.is_dir() {
        lines.insert(2, format!("Size: {}", format_size(entry.size)));
    }

    let mut reply = Reply::text(lines.join("\n"));
    if entry.is_dir() {
        reply = reply.button("Open", action("cd", &path));
    } else {
        reply = reply.row(vec![
            Control::new("Download", action("get", &path)),
            Control::new("Preview", action("peek", &path)),
        ]);
    }
    reply = reply
        .row(vec![
            Control::new("Rename", action("rename", &path)),
            Control::new("Copy", action("copy", &path)),
            Control::new("Move", action("move", &path)),
        ])
        .row(vec![
            Control::new("Archive", action("zip", &path)),
            Control::new("Delete", action("rm", &path)),
        ]);
    if !entry.is_dir() && ArchiveFormat::detect(&entry.name).is_some() {
        reply = reply.button("Extract here", action("unzip", &path));
    }
    reply.button("Back", action("ls", ""))
}

pub(crate) fn prompt(text: impl Into<String>) -> Reply {
    Reply::text(text).button("Cancel", action("cancel", ""))
}

pub(crate) fn confirm(text: impl Into<String>, confirm_label: &str, confirm_action: String) -> Reply {
    Reply::text(text).row(vec![
        Control::new(confirm_label, confirm_action),
        Control::new("Cancel", action("ls", "")),
    ])
}

pub(crate) fn batch_menu(count: usize) -> Reply {
    Reply::text(format!("{} item(s) selected. Choose an action:", count))
        .row(vec![
            Control::new("Delete", action("bdel", "")),
            Control::new("Archive", action("bzip", "")),
        ])
        .row(vec![
            Control::new("Copy to...", action("bcopy", "")),
            Control::new("Move to...", action("bmove", "")),
        ])
        .button("Back", action("ls", ""))
}

pub(crate) fn search_results(session: &Session, query: &str, hits: &[SearchHit]) -> Reply {
    if hits.is_empty() {
        return Reply::text(format!("No matches for '{}' under {}", query, session.cwd))
            .button("Back", action("ls", ""));
    }
    let mut reply = Reply::text(format!(
        "{} match(es) for '{}' under {}",
        hits.len(),
        query,
        session.cwd
    ));
    for hit in hits {
        let path = hit.path();
        let shown = path
            .strip_prefix(&session.cwd)
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(&path)
            .to_string();
        reply = if hit.entry.is_dir() {
            reply.button(format!("{}/", shown), action("cd", &path))
        } else {
            reply.button(shown, action("reveal", &path))
        };
    }
    reply.button("Back", action("ls", ""))
}

pub(crate) fn error(session: Option<&Session>, err: &OpError) -> Reply {
    let mut reply = Reply::text(err.operator_text());
    match session {
        Some(session) if session.mode().expects_text() || session.mode().expects_upload() => {
            reply.text.push_str("\nSend it again or cancel.");
            reply = reply.button("Cancel", action("cancel", ""));
        }
        Some(_) => {
            reply = reply.button("Back to listing", action("ls", ""));
        }
        None => {
            reply = reply.button("Hosts", action("hosts", ""));
        }
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::listing::parse_listing_in_year;

    fn session(mode: FileMode) -> Session {
        let mut s = Session::new("1", "web-1", "/srv");
        s.show_dir(
            "/srv",
            parse_listing_in_year(
                "drwxr-xr-x 2 a a 4096 Mar  3 09:15 logs\n-rw-r--r-- 1 a a 2048 Mar  3 09:15 app.zip",
                2026,
            ),
        );
        s.enter(mode);
        s
    }

    #[test]
    fn browsing_listing_links_directories_and_files() {
        let reply = listing(&session(FileMode::Browsing), 20, None);
        assert_eq!(reply.action_for("logs/"), Some("fs:cd:/srv/logs"));
        assert_eq!(reply.action_for("app.zip (2.0 KiB)"), Some("fs:entry:/srv/app.zip"));
        assert_eq!(reply.action_for("Up"), Some("fs:up"));
    }

    #[test]
    fn selecting_listing_uses_pick_actions() {
        let reply = listing(&session(FileMode::Selecting), 20, None);
        assert_eq!(reply.action_for("[ ] logs"), Some("fs:pick:/srv/logs"));
        assert_eq!(reply.action_for("Actions (0)"), Some("fs:batch"));
    }

    #[test]
    fn archive_detail_offers_extract() {
        let s = session(FileMode::Browsing);
        let entry = s.entry_at("/srv/app.zip").unwrap().clone();
        let reply = entry_detail(&s, &entry);
        assert_eq!(reply.action_for("Extract here"), Some("fs:unzip:/srv/app.zip"));
        assert!(reply.text.contains("Size: 2.0 KiB"));
    }
}
