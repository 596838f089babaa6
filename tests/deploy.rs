mod common;
use common::{harness, Harness, HOST, OPERATOR};

use bytes::Bytes;
use hostdeck::managers::deploy::detect::ProjectType;
use hostdeck::managers::deploy::job::{DeployMode, SourceKind, Stage};
use hostdeck::managers::deploy::DeployFlow;
use hostdeck::services::inventory::{HostInventory, UnitKind};
use hostdeck::transport::reply::Reply;

const WORKDIR: &str = "/opt/hostdeck/shop";

/// Picks a repository source and sends `url`; the checkout is fresh.
async fn start_repo(h: &Harness, url: &str) -> Reply {
    h.executor.on_exit("test -d /opt/hostdeck/shop/.git", 1, "");
    let d = &h.app.dispatcher;
    let menu = d.on_action(OPERATOR, &format!("dep:start:{}", HOST)).await;
    assert_eq!(menu.action_for("Git repository"), Some("dep:src:repo"));
    d.on_action(OPERATOR, "dep:src:repo").await;
    d.on_text(OPERATOR, url).await.expect("locator reply")
}

async fn stage(h: &Harness) -> Option<Stage> {
    h.app.dispatcher.deploy().job(OPERATOR).await.map(|job| job.stage())
}

#[tokio::test]
async fn manifest_only_repository_is_detected_and_offered_install() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "package.json\n");

    let reply = start_repo(&h, "https://github.com/acme/shop.git").await;

    assert!(h.executor.ran("git clone --depth 1 -- https://github.com/acme/shop.git /opt/hostdeck/shop"));
    assert!(reply.text.contains("Project type: Node.js"), "{}", reply.text);
    assert_eq!(reply.action_for("Install dependencies and deploy"), Some("dep:install"));
    assert_eq!(reply.action_for("Deploy without installing"), Some("dep:configure"));
    assert!(reply.action_for("Build and run container").is_none());

    let job = h.app.dispatcher.deploy().job(OPERATOR).await.expect("job");
    assert_eq!(job.stage(), Stage::AwaitingDecision);
    let descriptor = job.descriptor.expect("descriptor");
    assert_eq!(descriptor.project_type, ProjectType::NodeJs);
    assert!(descriptor.entry_points.is_empty());
}

#[tokio::test]
async fn existing_checkout_is_refreshed_to_the_requested_ref() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "go.mod\nmain.go\n");
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "dep:start:web-1").await;
    d.on_action(OPERATOR, "dep:src:repo").await;
    let reply = d
        .on_text(OPERATOR, "https://github.com/acme/shop/tree/release")
        .await
        .expect("reply");

    assert!(reply.text.contains("@ release"));
    assert!(h.executor.ran("git -C /opt/hostdeck/shop fetch --depth 1 origin release"));
    assert!(!h.executor.ran("git clone"));
}

#[tokio::test]
async fn partial_install_failure_stays_at_installing() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "package.json\nrequirements.txt\napp.py\n");
    h.executor.on_exit("pip install", 1, "ERROR: No matching distribution found for flask==99");
    start_repo(&h, "https://github.com/acme/shop.git").await;

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:install").await;

    assert!(reply.text.contains("ok   package.json"), "{}", reply.text);
    assert!(reply.text.contains("FAIL requirements.txt: exit 1: ERROR: No matching distribution"));
    assert_eq!(reply.action_for("Retry install"), Some("dep:install"));
    assert!(h.executor.ran("cd /opt/hostdeck/shop && npm install"));
    assert!(!h.executor.ran("systemctl"));

    let job = h.app.dispatcher.deploy().job(OPERATOR).await.expect("job");
    assert_eq!(job.stage(), Stage::Installing);
    assert_eq!(job.install_outcomes.len(), 2);
    assert!(!job.install_ok());
}

#[tokio::test]
async fn cancel_during_install_drops_the_flow() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "package.json\n");
    h.executor.on_exit("npm install", 1, "npm ERR! network");
    start_repo(&h, "https://github.com/acme/shop.git").await;
    h.app.dispatcher.on_action(OPERATOR, "dep:install").await;

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:cancel").await;

    assert!(reply.text.starts_with("Deployment cancelled at installing."));
    assert!(reply.text.contains("/opt/hostdeck/shop stays on the host"));
    assert!(h.app.dispatcher.deploy().flow(OPERATOR).await.is_none());
    assert_eq!(h.app.dispatcher.deploy().active_flows(), 0);
}

#[tokio::test]
async fn native_deployment_installs_writes_unit_and_registers() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "package.json\nserver.js\n");
    h.executor.on("systemctl is-active", "active\n");
    start_repo(&h, "https://github.com/acme/shop.git").await;

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:install").await;

    assert!(
        reply.text.contains("hostdeck-shop is running; the service listens on port 3000"),
        "{}",
        reply.text
    );
    assert!(h.executor.ran("systemctl daemon-reload && systemctl enable --now hostdeck-shop.service"));
    let unit = h
        .executor
        .file("/etc/systemd/system/hostdeck-shop.service")
        .expect("unit file");
    let unit = String::from_utf8_lossy(&unit);
    assert!(unit.contains("ExecStart=/usr/bin/env node server.js"));
    assert!(unit.contains(&format!("WorkingDirectory={}", WORKDIR)));

    let units = h.inventory.units(HOST).await.unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].name, "hostdeck-shop");
    assert_eq!(units[0].kind, UnitKind::Service);
    assert_eq!(units[0].port, 3000);
    assert!(h.app.dispatcher.deploy().flow(OPERATOR).await.is_none());
}

#[tokio::test]
async fn image_source_is_pulled_and_run() {
    let h = harness();
    h.executor.on("docker inspect", "true\n");
    let d = &h.app.dispatcher;

    d.on_action(OPERATOR, "dep:start:web-1").await;
    d.on_action(OPERATOR, "dep:src:image").await;
    let decision = d.on_text(OPERATOR, "nginx:1.27").await.expect("reply");
    assert_eq!(decision.action_for("Run container"), Some("dep:pull"));
    assert!(decision.action_for("Install dependencies and deploy").is_none());

    let reply = d.on_action(OPERATOR, "dep:pull").await;
    assert!(reply.text.contains("hostdeck-nginx is running"), "{}", reply.text);
    assert!(h.executor.ran("docker pull nginx:1.27"));
    assert!(h.executor.ran("--name hostdeck-nginx -p 8080:80 nginx:1.27"));

    let units = h.inventory.units(HOST).await.unwrap();
    assert_eq!(units[0].kind, UnitKind::Container);
    assert_eq!(units[0].port, 8080);
    assert_eq!(units[0].source, "nginx:1.27");
}

#[tokio::test]
async fn unsupported_archive_keeps_waiting_for_an_upload() {
    let h = harness();
    let d = &h.app.dispatcher;
    d.on_action(OPERATOR, "dep:start:web-1").await;
    d.on_action(OPERATOR, "dep:src:archive").await;

    let reply = d
        .on_upload(OPERATOR, "site.rar", Bytes::from_static(b"Rar!"))
        .await
        .expect("reply");

    assert!(reply.text.contains("Unsupported archive format"));
    assert!(h.executor.calls().is_empty());
    match d.deploy().flow(OPERATOR).await {
        Some(DeployFlow::AwaitingLocator { kind, .. }) => assert_eq!(kind, SourceKind::Archive),
        other => panic!("unexpected flow: {:?}", other),
    }
}

#[tokio::test]
async fn archive_with_single_top_directory_is_detected_inside_it() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "shop-main/\n");
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop/shop-main", "go.mod\nmain.go\n");
    let d = &h.app.dispatcher;
    d.on_action(OPERATOR, "dep:start:web-1").await;
    d.on_action(OPERATOR, "dep:src:archive").await;

    let reply = d
        .on_upload(OPERATOR, "shop.zip", Bytes::from_static(b"PK"))
        .await
        .expect("reply");

    assert!(reply.text.contains("Project type: Go"), "{}", reply.text);
    assert_eq!(
        h.executor.file("/opt/hostdeck/.uploads/shop.zip").as_deref(),
        Some(&b"PK"[..])
    );
    assert!(h.executor.ran(
        "mkdir -p -- /opt/hostdeck/shop && unzip -o -q /opt/hostdeck/.uploads/shop.zip -d /opt/hostdeck/shop"
    ));
    let job = d.deploy().job(OPERATOR).await.expect("job");
    assert_eq!(job.workdir, "/opt/hostdeck/shop/shop-main");
    assert_eq!(job.descriptor.unwrap().entry_points, vec!["main.go".to_string()]);
    assert!(job.upload.is_none());
}

#[tokio::test]
async fn failed_clone_fails_the_job_until_acknowledged() {
    let h = harness();
    h.executor.on_exit("git clone", 128, "fatal: repository not found");

    let reply = start_repo(&h, "https://github.com/acme/shop.git").await;

    assert!(reply.text.contains("Error: Fetch source failed (exit 128): fatal: repository not found"));
    assert_eq!(reply.action_for("OK"), Some("dep:ack"));
    assert_eq!(stage(&h).await, Some(Stage::Failed));

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:ack").await;
    assert!(reply.text.starts_with("Deployment closed."));
    assert!(h.app.dispatcher.deploy().flow(OPERATOR).await.is_none());
}

#[tokio::test]
async fn inactive_service_fails_verification_with_guidance() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "package.json\nindex.js\n");
    h.executor.on("systemctl is-active", "failed\n");
    start_repo(&h, "https://github.com/acme/shop.git").await;

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:configure").await;

    assert!(reply.text.contains("journalctl -u hostdeck-shop.service"), "{}", reply.text);
    assert!(!h.executor.ran("npm install"));
    let job = h.app.dispatcher.deploy().job(OPERATOR).await.expect("job");
    assert_eq!(job.stage(), Stage::Failed);
    assert_eq!(job.mode, Some(DeployMode::NativeService));
    assert!(h.inventory.units(HOST).await.unwrap().is_empty());
}

#[tokio::test]
async fn container_build_requires_a_dockerfile() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "package.json\n");
    start_repo(&h, "https://github.com/acme/shop.git").await;

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:docker").await;

    assert!(reply.text.contains("No Dockerfile at the project root"));
    assert_eq!(stage(&h).await, Some(Stage::AwaitingDecision));
    assert!(!h.executor.ran("docker build"));
}

#[tokio::test]
async fn failed_image_build_stops_before_running_a_container() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "Dockerfile\npackage.json\nserver.js\n");
    h.executor.on_exit("docker build", 1, "failed to solve: npm ci exited 1");
    let decision = start_repo(&h, "https://github.com/acme/shop.git").await;
    assert_eq!(decision.action_for("Build and run container"), Some("dep:docker"));

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:docker").await;

    assert!(
        reply.text.contains("Error: Build image failed (exit 1): failed to solve"),
        "{}",
        reply.text
    );
    assert!(h.executor.ran("docker build -t hostdeck-shop /opt/hostdeck/shop"));
    assert!(!h.executor.ran("docker run"));
    assert_eq!(stage(&h).await, Some(Stage::Failed));
    assert!(h.inventory.units(HOST).await.unwrap().is_empty());
}

#[tokio::test]
async fn built_image_runs_on_the_published_port() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "Dockerfile\npackage.json\nserver.js\n");
    h.executor.on("docker inspect", "true\n");
    start_repo(&h, "https://github.com/acme/shop.git").await;

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:docker").await;

    assert!(reply.text.contains("port 8080 on the host is published"), "{}", reply.text);
    assert!(h.executor.ran("--name hostdeck-shop -p 8080:3000 hostdeck-shop"));
    assert!(!h.executor.ran("npm install"));
    let units = h.inventory.units(HOST).await.unwrap();
    assert_eq!(units[0].kind, UnitKind::Container);
    assert_eq!(units[0].port, 8080);
}

#[tokio::test]
async fn failed_pull_skips_the_run_step() {
    let h = harness();
    h.executor.on_exit("docker pull", 1, "manifest for nginx:9.9 not found");
    let d = &h.app.dispatcher;
    d.on_action(OPERATOR, "dep:start:web-1").await;
    d.on_action(OPERATOR, "dep:src:image").await;
    d.on_text(OPERATOR, "nginx:9.9").await.expect("reply");

    let reply = d.on_action(OPERATOR, "dep:pull").await;

    assert!(
        reply.text.contains("Error: Pull image failed (exit 1): manifest for nginx:9.9 not found"),
        "{}",
        reply.text
    );
    assert!(!h.executor.ran("docker run"));
    assert_eq!(reply.action_for("OK"), Some("dep:ack"));
    assert_eq!(stage(&h).await, Some(Stage::Failed));
}

#[tokio::test]
async fn starting_again_replaces_a_pending_flow() {
    let h = harness();
    let d = &h.app.dispatcher;
    d.on_action(OPERATOR, "dep:start:web-1").await;
    d.on_action(OPERATOR, "dep:src:image").await;

    let reply = d.on_action(OPERATOR, "dep:start:web-1").await;

    assert!(reply.text.starts_with("Deploy to web-1"));
    assert!(matches!(
        d.deploy().flow(OPERATOR).await,
        Some(DeployFlow::ChoosingSource { .. })
    ));
    assert!(d.on_text(OPERATOR, "nginx:1.27").await.is_none());
}

#[tokio::test]
async fn unknown_project_gets_manual_instructions() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "README.md\ndocs/\n");
    let decision = start_repo(&h, "https://github.com/acme/shop.git").await;
    assert!(decision.action_for("Deploy without installing").is_none());
    assert_eq!(decision.action_for("Manual instructions"), Some("dep:manual"));

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:manual").await;

    assert!(reply.text.contains("Manual setup:\n1. cd /opt/hostdeck/shop"), "{}", reply.text);
    assert!(reply.text.contains("No known project markers"));
    assert!(h.app.dispatcher.deploy().flow(OPERATOR).await.is_none());
    assert!(h.inventory.units(HOST).await.unwrap().is_empty());
}

#[tokio::test]
async fn transport_loss_during_fetch_keeps_the_stage_for_retry() {
    let h = harness();
    h.executor.on("ls -1Ap -- /opt/hostdeck/shop", "package.json\n");
    h.executor.on_error_once(
        "git clone",
        hostdeck::errors::OpError::channel_dead("connection reset"),
    );

    let reply = start_repo(&h, "https://github.com/acme/shop.git").await;
    assert_eq!(reply.action_for("Retry"), Some("dep:retry"));
    assert_eq!(stage(&h).await, Some(Stage::Acquiring));

    let reply = h.app.dispatcher.on_action(OPERATOR, "dep:retry").await;
    assert!(reply.text.contains("Project type: Node.js"), "{}", reply.text);
    assert_eq!(stage(&h).await, Some(Stage::AwaitingDecision));
}
