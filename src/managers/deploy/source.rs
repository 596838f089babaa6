//! Locator parsing and source acquisition commands.

use super::job::{SourceKind, SourceSpec};
use crate::constants::deploy::UPLOAD_DIR;
use crate::errors::OpError;
use crate::utils::archive::ArchiveFormat;
use crate::utils::remote_path;
use crate::utils::shell::RemoteCommand;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

const MAX_PROJECT_CHARS: usize = 40;
const MAX_LOCATOR_BYTES: usize = 1024;

static SCP_LIKE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[A-Za-z0-9._/~-]+$").expect("scp regex")
});
static GIT_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("git ref regex"));
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._/-]*(:[A-Za-z0-9._-]+)?(@sha256:[a-f0-9]{64})?$")
        .expect("image regex")
});

/// Lowercase `[a-z0-9-]` name used for the work directory, unit and
/// container.
pub fn project_slug(raw: &str) -> String {
    let mut slug = String::new();
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(MAX_PROJECT_CHARS).collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "app".to_string()
    } else {
        slug
    }
}

fn check_locator(raw: &str) -> Result<&str, OpError> {
    let locator = raw.trim();
    if locator.is_empty() {
        return Err(OpError::validation("Locator must not be empty"));
    }
    if locator.len() > MAX_LOCATOR_BYTES || locator.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(OpError::validation("Locator must be a single line without spaces"));
    }
    if locator.starts_with('-') {
        return Err(OpError::validation("Locator must not start with '-'"));
    }
    Ok(locator)
}

fn check_ref(git_ref: &str) -> Result<String, OpError> {
    if !GIT_REF_RE.is_match(git_ref) || git_ref.contains("..") {
        return Err(OpError::validation(format!("Invalid branch or tag: {}", git_ref)));
    }
    Ok(git_ref.to_string())
}

fn repo_name(path: &str) -> String {
    let last = path.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or("");
    project_slug(last.trim_end_matches(".git"))
}

/// Parses `url`, `url#ref` and `https://host/org/repo/tree/<ref>`.
pub fn parse_repository(raw: &str) -> Result<(SourceSpec, String), OpError> {
    let locator = check_locator(raw)?;
    let (base, mut git_ref) = match locator.split_once('#') {
        Some((base, r)) if !r.is_empty() => (base, Some(check_ref(r)?)),
        Some((base, _)) => (base, None),
        None => (locator, None),
    };

    if SCP_LIKE_RE.is_match(base) {
        let project = repo_name(base);
        return Ok((
            SourceSpec {
                kind: SourceKind::Repository,
                locator: base.to_string(),
                git_ref,
            },
            project,
        ));
    }

    let mut url = Url::parse(base)
        .map_err(|err| OpError::validation(format!("Not a repository URL ({}): {}", err, base)))?;
    if !matches!(url.scheme(), "https" | "http" | "ssh" | "git") {
        return Err(OpError::validation(format!("Unsupported URL scheme: {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(OpError::validation("Repository URL has no host"));
    }
    if git_ref.is_none() {
        let path = url.path().to_string();
        if let Some((repo, tree_ref)) = path.split_once("/tree/") {
            let tree_ref = tree_ref.trim_end_matches('/');
            if !tree_ref.is_empty() {
                git_ref = Some(check_ref(tree_ref)?);
                url.set_path(repo);
            }
        }
    }
    url.set_fragment(None);
    let project = repo_name(url.path());
    Ok((
        SourceSpec {
            kind: SourceKind::Repository,
            locator: url.to_string(),
            git_ref,
        },
        project,
    ))
}

pub fn parse_image(raw: &str) -> Result<(SourceSpec, String), OpError> {
    let locator = check_locator(raw)?;
    if !IMAGE_RE.is_match(locator) {
        return Err(OpError::validation(format!("Not a container image reference: {}", locator))
            .with_hint("Example: nginx:1.27 or ghcr.io/org/app:latest"));
    }
    let last = locator.rsplit('/').next().unwrap_or(locator);
    let name = last.split(['@', ':']).next().unwrap_or(last);
    Ok((
        SourceSpec {
            kind: SourceKind::Image,
            locator: locator.to_string(),
            git_ref: None,
        },
        project_slug(name),
    ))
}

pub fn parse_archive_name(raw: &str) -> Result<(SourceSpec, String, ArchiveFormat), OpError> {
    let name = remote_path::validate_name(raw)?;
    let format = ArchiveFormat::require(&name)?;
    let project = project_slug(&format.stem(&name));
    Ok((
        SourceSpec {
            kind: SourceKind::Archive,
            locator: name,
            git_ref: None,
        },
        project,
        format,
    ))
}

pub fn checkout_probe(workdir: &str) -> RemoteCommand {
    RemoteCommand::new("test").arg("-d").arg(remote_path::join(workdir, ".git"))
}

pub fn clone_command(root: &str, workdir: &str, source: &SourceSpec) -> RemoteCommand {
    let mut clone = RemoteCommand::new("git").args(["clone", "--depth", "1"]);
    if let Some(git_ref) = &source.git_ref {
        clone = clone.arg("--branch").arg(git_ref);
    }
    RemoteCommand::new("mkdir")
        .arg("-p")
        .path(root)
        .and_then(clone.paths([source.locator.as_str(), workdir]))
}

/// Brings an existing checkout to the requested ref, discarding local edits.
pub fn refresh_command(workdir: &str, source: &SourceSpec) -> RemoteCommand {
    let target = source.git_ref.as_deref().unwrap_or("HEAD");
    RemoteCommand::new("git")
        .arg("-C")
        .arg(workdir)
        .args(["fetch", "--depth", "1", "origin"])
        .arg(target)
        .and_then(
            RemoteCommand::new("git")
                .arg("-C")
                .arg(workdir)
                .args(["reset", "--hard", "FETCH_HEAD"]),
        )
}

pub fn upload_path(root: &str, file_name: &str) -> String {
    remote_path::join(&remote_path::join(root, UPLOAD_DIR), file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_selects_ref() {
        let (spec, project) = parse_repository("https://github.com/acme/Shop-API.git#release/2.1").unwrap();
        assert_eq!(spec.locator, "https://github.com/acme/Shop-API.git");
        assert_eq!(spec.git_ref.as_deref(), Some("release/2.1"));
        assert_eq!(project, "shop-api");
    }

    #[test]
    fn tree_path_selects_ref() {
        let (spec, project) = parse_repository("https://github.com/acme/site/tree/dev").unwrap();
        assert_eq!(spec.locator, "https://github.com/acme/site");
        assert_eq!(spec.git_ref.as_deref(), Some("dev"));
        assert_eq!(project, "site");
    }

    #[test]
    fn scp_style_remote_is_accepted() {
        let (spec, project) = parse_repository("git@github.com:acme/tool.git").unwrap();
        assert_eq!(spec.locator, "git@github.com:acme/tool.git");
        assert_eq!(project, "tool");
    }

    #[test]
    fn hostile_locators_are_rejected() {
        assert!(parse_repository("--upload-pack=touch /tmp/x").is_err());
        assert!(parse_repository("file:///etc").is_err());
        assert!(parse_repository("https://h/r.git#-x").is_err());
        assert!(parse_image("nginx; rm -rf /").is_err());
    }

    #[test]
    fn image_project_name_drops_registry_and_tag() {
        let (_, project) = parse_image("ghcr.io/acme/web-app:1.4").unwrap();
        assert_eq!(project, "web-app");
    }

    #[test]
    fn clone_with_ref_renders_branch_flag() {
        let (spec, _) = parse_repository("https://example.com/a/b.git#main").unwrap();
        assert_eq!(
            clone_command("/opt/hostdeck", "/opt/hostdeck/b", &spec).render(),
            "mkdir -p -- /opt/hostdeck && git clone --depth 1 --branch main -- https://example.com/a/b.git /opt/hostdeck/b"
        );
    }

    #[test]
    fn slug_is_bounded_and_never_empty() {
        assert_eq!(project_slug("My App!!"), "my-app");
        assert_eq!(project_slug("***"), "app");
        assert!(project_slug(&"x".repeat(100)).len() <= MAX_PROJECT_CHARS);
    }
}
