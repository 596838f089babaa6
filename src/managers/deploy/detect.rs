use crate::constants::deploy::{GO_PORT, IMAGE_INTERNAL_PORT, JAVA_PORT, NODE_PORT, PYTHON_PORT};
use crate::utils::shell::RemoteCommand;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    NodeJs,
    Python,
    Go,
    Java,
    ContainerImage,
    Unknown,
}

impl ProjectType {
    pub fn label(self) -> &'static str {
        match self {
            ProjectType::NodeJs => "Node.js",
            ProjectType::Python => "Python",
            ProjectType::Go => "Go",
            ProjectType::Java => "Java (Maven)",
            ProjectType::ContainerImage => "container image",
            ProjectType::Unknown => "unknown",
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            ProjectType::NodeJs => Some(NODE_PORT),
            ProjectType::Python => Some(PYTHON_PORT),
            ProjectType::Go => Some(GO_PORT),
            ProjectType::Java => Some(JAVA_PORT),
            ProjectType::ContainerImage => Some(IMAGE_INTERNAL_PORT),
            ProjectType::Unknown => None,
        }
    }

    fn entry_candidates(self) -> &'static [&'static str] {
        match self {
            ProjectType::NodeJs => &["server.js", "index.js", "app.js", "main.js"],
            ProjectType::Python => &["app.py", "main.py", "wsgi.py", "server.py", "run.py", "manage.py"],
            ProjectType::Go => &["main.go"],
            _ => &[],
        }
    }

    fn source_extension(self) -> Option<&'static str> {
        match self {
            ProjectType::NodeJs => Some(".js"),
            ProjectType::Python => Some(".py"),
            ProjectType::Go => Some(".go"),
            _ => None,
        }
    }
}

const SCRIPT_RUNTIMES: [ProjectType; 3] = [ProjectType::NodeJs, ProjectType::Python, ProjectType::Go];

/// A dependency manifest the installer knows how to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Manifest {
    PackageJson,
    Requirements,
    Pipfile,
    GoMod,
    PomXml,
}

/// Detection order; the first manifest found decides the project type.
const MANIFESTS: [Manifest; 5] = [
    Manifest::PackageJson,
    Manifest::Requirements,
    Manifest::Pipfile,
    Manifest::GoMod,
    Manifest::PomXml,
];

const BUILD_RECIPE: &str = "Dockerfile";

impl Manifest {
    pub fn file_name(self) -> &'static str {
        match self {
            Manifest::PackageJson => "package.json",
            Manifest::Requirements => "requirements.txt",
            Manifest::Pipfile => "Pipfile",
            Manifest::GoMod => "go.mod",
            Manifest::PomXml => "pom.xml",
        }
    }

    pub fn project_type(self) -> ProjectType {
        match self {
            Manifest::PackageJson => ProjectType::NodeJs,
            Manifest::Requirements | Manifest::Pipfile => ProjectType::Python,
            Manifest::GoMod => ProjectType::Go,
            Manifest::PomXml => ProjectType::Java,
        }
    }

    pub fn install_command(self) -> RemoteCommand {
        match self {
            Manifest::PackageJson => RemoteCommand::new("npm").arg("install"),
            Manifest::Requirements => RemoteCommand::new("python3")
                .args(["-m", "pip", "install", "-r"])
                .arg(self.file_name()),
            Manifest::Pipfile => RemoteCommand::new("pipenv").arg("install"),
            Manifest::GoMod => RemoteCommand::new("go").args(["mod", "download"]),
            Manifest::PomXml => RemoteCommand::new("mvn").args(["-q", "-DskipTests", "package"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDescriptor {
    pub project_type: ProjectType,
    pub manifests: Vec<Manifest>,
    pub entry_points: Vec<String>,
    pub suggested_port: Option<u16>,
    pub has_build_recipe: bool,
}

impl ProjectDescriptor {
    pub fn image() -> Self {
        Self {
            project_type: ProjectType::ContainerImage,
            manifests: Vec::new(),
            entry_points: Vec::new(),
            suggested_port: ProjectType::ContainerImage.default_port(),
            has_build_recipe: false,
        }
    }

    /// Whether a native service can be started without further input.
    pub fn can_run_natively(&self) -> bool {
        match self.project_type {
            ProjectType::NodeJs | ProjectType::Java => true,
            ProjectType::Go => true,
            ProjectType::Python => !self.entry_points.is_empty(),
            ProjectType::ContainerImage | ProjectType::Unknown => false,
        }
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Project type: {}", self.project_type.label())];
        if !self.manifests.is_empty() {
            let names: Vec<&str> = self.manifests.iter().map(|m| m.file_name()).collect();
            lines.push(format!("Dependencies: {}", names.join(", ")));
        }
        if !self.entry_points.is_empty() {
            lines.push(format!("Entry points: {}", self.entry_points.join(", ")));
        }
        if let Some(port) = self.suggested_port {
            lines.push(format!("Suggested port: {}", port));
        }
        if self.has_build_recipe {
            lines.push(format!("Build recipe: {}", BUILD_RECIPE));
        }
        lines.join("\n")
    }
}

/// Lists the top level of a project directory, one name per line with a
/// trailing `/` on directories.
pub fn listing_command(workdir: &str) -> RemoteCommand {
    RemoteCommand::new("ls").arg("-1Ap").path(workdir)
}

/// Classifies a project from its top-level names.
pub fn detect_from_names<S: AsRef<str>>(names: &[S]) -> ProjectDescriptor {
    let files: Vec<&str> = names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty() && !n.ends_with('/'))
        .collect();
    let has = |name: &str| files.iter().any(|f| *f == name);

    let manifests: Vec<Manifest> = MANIFESTS.iter().copied().filter(|m| has(m.file_name())).collect();
    let by_extension = |t: &ProjectType| {
        t.source_extension()
            .map(|ext| files.iter().any(|f| f.ends_with(ext) && f.len() > ext.len()))
            .unwrap_or(false)
    };
    let project_type = match manifests.first() {
        Some(first) => first.project_type(),
        None => SCRIPT_RUNTIMES
            .into_iter()
            .find(|t| t.entry_candidates().iter().any(|c| has(c)))
            .or_else(|| SCRIPT_RUNTIMES.into_iter().find(by_extension))
            .unwrap_or(ProjectType::Unknown),
    };
    let mut entry_points: Vec<String> = project_type
        .entry_candidates()
        .iter()
        .filter(|c| has(c))
        .map(|c| c.to_string())
        .collect();
    // Without a manifest, a lone source file is the best guess at an entry.
    if entry_points.is_empty() && manifests.is_empty() {
        if let Some(ext) = project_type.source_extension() {
            let mut sources: Vec<&str> = files.iter().copied().filter(|f| f.ends_with(ext)).collect();
            sources.sort_unstable();
            if sources.len() == 1 {
                entry_points.push(sources[0].to_string());
            }
        }
    }

    ProjectDescriptor {
        project_type,
        manifests,
        entry_points,
        suggested_port: project_type.default_port(),
        has_build_recipe: has(BUILD_RECIPE),
    }
}

pub fn detect_from_listing(raw: &str) -> ProjectDescriptor {
    let names: Vec<&str> = raw.lines().collect();
    detect_from_names(&names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_json_alone_is_a_node_project() {
        let d = detect_from_names(&["package.json"]);
        assert_eq!(d.project_type, ProjectType::NodeJs);
        assert_eq!(d.manifests, vec![Manifest::PackageJson]);
        assert!(d.entry_points.is_empty());
        assert_eq!(d.suggested_port, Some(NODE_PORT));
        assert!(!d.has_build_recipe);
    }

    #[test]
    fn python_with_dockerfile_and_entry_point() {
        let d = detect_from_listing("Dockerfile\napp.py\nrequirements.txt\nstatic/\n");
        assert_eq!(d.project_type, ProjectType::Python);
        assert_eq!(d.entry_points, vec!["app.py".to_string()]);
        assert!(d.has_build_recipe);
        assert!(d.can_run_natively());
    }

    #[test]
    fn entry_point_without_manifest_infers_runtime() {
        let d = detect_from_names(&["main.go", "README.md"]);
        assert_eq!(d.project_type, ProjectType::Go);
        assert!(d.manifests.is_empty());
    }

    #[test]
    fn lone_script_is_taken_as_entry_point() {
        let d = detect_from_names(&["worker.py", "README.md"]);
        assert_eq!(d.project_type, ProjectType::Python);
        assert_eq!(d.entry_points, vec!["worker.py".to_string()]);
        assert!(d.can_run_natively());

        let d = detect_from_names(&["a.py", "b.py"]);
        assert_eq!(d.project_type, ProjectType::Python);
        assert!(d.entry_points.is_empty());
    }

    #[test]
    fn directories_named_like_manifests_are_ignored() {
        let d = detect_from_names(&["package.json/", "notes.txt"]);
        assert_eq!(d.project_type, ProjectType::Unknown);
        assert_eq!(d.suggested_port, None);
        assert!(!d.can_run_natively());
    }

    #[test]
    fn pipfile_install_uses_pipenv() {
        assert_eq!(Manifest::Pipfile.install_command().render(), "pipenv install");
        assert_eq!(
            Manifest::Requirements.install_command().render(),
            "python3 -m pip install -r requirements.txt"
        );
    }
}
