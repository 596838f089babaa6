mod common;
use common::{harness, open_srv, OPERATOR};

use bytes::Bytes;
use hostdeck::errors::OpError;
use hostdeck::managers::files::session::{FileMode, NamePurpose};
use hostdeck::services::token_cache::TokenCache;

#[tokio::test]
async fn opening_a_host_lists_its_home_directory() {
    let h = harness();
    open_srv(&h).await;

    let session = h.app.dispatcher.files().session(OPERATOR).await.expect("session");
    assert_eq!(session.cwd, "/srv");
    assert_eq!(session.entries().len(), 3);
    assert_eq!(session.mode(), &FileMode::Browsing);
    assert!(h.executor.ran("LC_ALL=C ls -la -- /srv"));
}

#[tokio::test]
async fn toggling_an_entry_twice_leaves_selection_unchanged() {
    let h = harness();
    open_srv(&h).await;
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "fs:select").await;
    d.on_action(OPERATOR, "fs:pick:/srv/a.txt").await;
    let before = d.files().session(OPERATOR).await.unwrap().selection().clone();

    d.on_action(OPERATOR, "fs:pick:/srv/b.txt").await;
    let reply = d.on_action(OPERATOR, "fs:pick:/srv/b.txt").await;

    let after = d.files().session(OPERATOR).await.unwrap().selection().clone();
    assert_eq!(before, after);
    assert_eq!(reply.action_for("Actions (1)"), Some("fs:batch"));
}

#[tokio::test]
async fn batch_delete_reports_partial_failure_and_returns_to_browsing() {
    let h = harness();
    open_srv(&h).await;
    h.executor.on_exit("rm -rf -- /srv/b.txt", 1, "rm: cannot remove '/srv/b.txt': Permission denied");
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "fs:select").await;
    d.on_action(OPERATOR, "fs:all").await;
    let confirm = d.on_action(OPERATOR, "fs:bdel").await;
    assert_eq!(confirm.action_for("Delete all"), Some("fs:bdel!"));

    let reply = d.on_action(OPERATOR, "fs:bdel!").await;
    assert!(reply.text.contains("Delete: 2 succeeded, 1 failed"), "{}", reply.text);
    assert!(reply.text.contains("/srv/b.txt: Delete failed (exit 1)"));
    assert_eq!(h.executor.count("rm -rf -- "), 3);

    let session = d.files().session(OPERATOR).await.unwrap();
    assert_eq!(session.mode(), &FileMode::Browsing);
    assert!(session.selection().is_empty());
}

#[tokio::test]
async fn text_outside_a_text_step_is_ignored() {
    let h = harness();
    open_srv(&h).await;
    assert!(h.app.dispatcher.on_text(OPERATOR, "hello").await.is_none());
    assert!(h.app.dispatcher.on_text("someone-else", "hello").await.is_none());
}

#[tokio::test]
async fn invalid_name_keeps_the_prompt_and_skips_remote_calls() {
    let h = harness();
    open_srv(&h).await;
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "fs:mkdir").await;
    let reply = d.on_text(OPERATOR, "a/b").await.expect("reply");
    assert!(reply.text.starts_with("Error: Name must not contain '/'"));
    assert_eq!(reply.action_for("Cancel"), Some("fs:cancel"));
    assert!(!h.executor.ran("mkdir"));

    let session = d.files().session(OPERATOR).await.unwrap();
    assert_eq!(session.mode(), &FileMode::AwaitingName(NamePurpose::NewFolder));

    let reply = d.on_text(OPERATOR, "reports").await.expect("reply");
    assert!(reply.text.starts_with("Created reports"));
    assert!(h.executor.ran("mkdir -- /srv/reports"));
}

#[tokio::test]
async fn rename_checks_for_collisions_then_moves() {
    let h = harness();
    open_srv(&h).await;
    h.executor.on_exit("test -e /srv/c.txt", 1, "");
    let d = &h.app.dispatcher;

    let detail = d.on_action(OPERATOR, "fs:entry:/srv/a.txt").await;
    assert_eq!(detail.action_for("Rename"), Some("fs:rename:/srv/a.txt"));

    d.on_action(OPERATOR, "fs:rename:/srv/a.txt").await;
    let taken = d.on_text(OPERATOR, "b.txt").await.expect("reply");
    assert!(taken.text.contains("b.txt already exists"));

    let reply = d.on_text(OPERATOR, "c.txt").await.expect("reply");
    assert!(reply.text.starts_with("Renamed a.txt to c.txt"));
    assert!(h.executor.ran("mv -- /srv/a.txt /srv/c.txt"));
}

#[tokio::test]
async fn starting_a_new_flow_overwrites_the_pending_one() {
    let h = harness();
    open_srv(&h).await;
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "fs:select").await;
    d.on_action(OPERATOR, "fs:pick:/srv/a.txt").await;
    d.on_action(OPERATOR, "fs:rename:/srv/b.txt").await;
    d.on_action(OPERATOR, "fs:search").await;

    let session = d.files().session(OPERATOR).await.unwrap();
    assert_eq!(session.mode(), &FileMode::AwaitingSearchQuery);
    assert!(session.selection().is_empty());
}

#[tokio::test]
async fn channel_loss_keeps_the_session_for_a_retry() {
    let h = harness();
    open_srv(&h).await;
    h.executor.on_error_once("ls -la -- /srv/logs", OpError::channel_dead("socket closed"));
    let d = &h.app.dispatcher;

    let reply = d.on_action(OPERATOR, "fs:cd:/srv/logs").await;
    assert!(reply.text.contains("try the last step again"));
    assert_eq!(d.files().session(OPERATOR).await.unwrap().cwd, "/srv");

    let reply = d.on_action(OPERATOR, "fs:cd:/srv/logs").await;
    assert!(reply.text.contains("web-1:/srv/logs"));
}

#[tokio::test]
async fn oversized_actions_are_tokenized_and_resolve_back() {
    let h = harness();
    let long = "quarterly-financial-reports-archive-for-the-entire-organization";
    let listing = format!(
        "total 4\ndrwxr-xr-x 2 deploy deploy 4096 Mar  3 09:15 {}\n",
        long
    );
    h.executor.on("pwd", "/srv\n");
    h.executor.on("ls -la -- /srv", &listing);
    let d = &h.app.dispatcher;

    let reply = d.on_action(OPERATOR, "fs:host:web-1").await;
    let token = reply.action_for(&format!("{}/", long)).expect("dir control").to_string();
    assert!(TokenCache::is_token(&token), "expected a token, got {}", token);
    assert!(reply.actions().all(|a| a.len() <= h.app.tokens.budget()));

    h.executor.on(&format!("ls -la -- /srv/{}", long), "total 0\n");
    let reply = d.on_action(OPERATOR, &token).await;
    assert!(reply.text.contains(&format!("/srv/{}", long)));
    assert!(reply.text.contains("(empty directory)"));
}

#[tokio::test]
async fn unknown_token_is_reported_as_expired() {
    let h = harness();
    let reply = h.app.dispatcher.on_action(OPERATOR, "#0123456789abcdef").await;
    assert!(
        reply.text.starts_with("Error: This button has expired or is unknown\nStart again"),
        "{}",
        reply.text
    );
    assert_eq!(reply.action_for("Hosts"), Some("fs:hosts"));
}

#[tokio::test]
async fn upload_lands_in_the_current_directory() {
    let h = harness();
    open_srv(&h).await;
    let d = &h.app.dispatcher;

    assert!(d.on_upload(OPERATOR, "notes.txt", Bytes::from_static(b"hi")).await.is_none());

    d.on_action(OPERATOR, "fs:upload").await;
    let reply = d
        .on_upload(OPERATOR, "notes.txt", Bytes::from_static(b"hi"))
        .await
        .expect("reply");
    assert!(reply.text.starts_with("Uploaded notes.txt (2 B)"));
    assert_eq!(h.executor.file("/srv/notes.txt").as_deref(), Some(&b"hi"[..]));
}

#[tokio::test]
async fn download_returns_the_file_as_attachment() {
    let h = harness();
    open_srv(&h).await;
    h.executor.put_file("/srv/a.txt", b"alpha");

    let reply = h.app.dispatcher.on_action(OPERATOR, "fs:get:/srv/a.txt").await;
    let attachment = reply.attachment.expect("attachment");
    assert_eq!(attachment.file_name, "a.txt");
    assert_eq!(&attachment.data[..], b"alpha");
}

#[tokio::test]
async fn search_lists_hits_and_returns_to_browsing() {
    let h = harness();
    open_srv(&h).await;
    h.executor.on("find /srv", "f\t/srv/logs/app.log\nd\t/srv/logs/app-archive\n");
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "fs:search").await;
    let reply = d.on_text(OPERATOR, "app").await.expect("reply");
    assert!(reply.text.starts_with("2 match(es) for 'app' under /srv"));
    assert_eq!(reply.action_for("logs/app.log"), Some("fs:reveal:/srv/logs/app.log"));
    assert_eq!(reply.action_for("logs/app-archive/"), Some("fs:cd:/srv/logs/app-archive"));
    assert!(h.executor.ran("-iname '*app*'"));
    assert_eq!(
        d.files().session(OPERATOR).await.unwrap().mode(),
        &FileMode::Browsing
    );
}

#[tokio::test]
async fn archive_of_one_item_requires_the_single_item_path() {
    let h = harness();
    open_srv(&h).await;
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "fs:select").await;
    d.on_action(OPERATOR, "fs:pick:/srv/a.txt").await;
    let reply = d.on_action(OPERATOR, "fs:bzip").await;
    assert!(reply.text.contains("Select at least 2 items"));

    h.executor.on_exit("test -e /srv/a.zip", 1, "");
    d.on_action(OPERATOR, "fs:zip:/srv/a.txt").await;
    let reply = d.on_text(OPERATOR, "a").await.expect("reply");
    assert!(reply.text.starts_with("Created a.zip"), "{}", reply.text);
    assert!(h.executor.ran("cd /srv && zip -r -q ./a.zip ./a.txt"));
}

#[tokio::test]
async fn archive_name_that_looks_like_an_option_is_refused() {
    let h = harness();
    open_srv(&h).await;
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "fs:zip:/srv/a.txt").await;
    let reply = d.on_text(OPERATOR, "-TT=id").await.expect("reply");

    assert!(reply.text.starts_with("Error: Name must not start with '-'"), "{}", reply.text);
    assert!(!h.executor.ran("zip"));
    let session = d.files().session(OPERATOR).await.unwrap();
    assert!(matches!(
        session.mode(),
        FileMode::AwaitingName(NamePurpose::Archive { .. })
    ));
}
