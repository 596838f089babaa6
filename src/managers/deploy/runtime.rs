//! Service-manager units, container commands and manual instructions.

use super::detect::{ProjectDescriptor, ProjectType};
use crate::constants::deploy::{NAME_PREFIX, UNIT_DIR};
use crate::utils::remote_path;
use crate::utils::shell::{quote, RemoteCommand};

pub fn unit_name(project: &str) -> String {
    format!("{}{}", NAME_PREFIX, project)
}

pub fn unit_path(project: &str) -> String {
    remote_path::join(UNIT_DIR, &format!("{}.service", unit_name(project)))
}

/// Command line that starts the project in the foreground, if one can be
/// derived from the descriptor.
pub fn exec_line(descriptor: &ProjectDescriptor) -> Option<String> {
    let entry = descriptor.entry_points.first();
    match descriptor.project_type {
        ProjectType::NodeJs => Some(match entry {
            Some(entry) => format!("/usr/bin/env node {}", entry),
            None => "/usr/bin/env npm start".to_string(),
        }),
        ProjectType::Python => entry.map(|entry| format!("/usr/bin/env python3 {}", entry)),
        ProjectType::Go => Some(match entry {
            Some(entry) => format!("/usr/bin/env go run {}", entry),
            None => "/usr/bin/env go run .".to_string(),
        }),
        ProjectType::Java => Some("/bin/sh -c 'exec java -jar target/*.jar'".to_string()),
        ProjectType::ContainerImage | ProjectType::Unknown => None,
    }
}

pub fn render_unit(project: &str, workdir: &str, exec: &str, port: u16) -> String {
    format!(
        "[Unit]\n\
         Description=hostdeck deployment {project}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         WorkingDirectory={workdir}\n\
         ExecStart={exec}\n\
         Environment=PORT={port}\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        project = project,
        workdir = workdir,
        exec = exec,
        port = port,
    )
}

pub fn enable_service(project: &str) -> RemoteCommand {
    RemoteCommand::new("systemctl")
        .arg("daemon-reload")
        .and_then(
            RemoteCommand::new("systemctl")
                .args(["enable", "--now"])
                .arg(format!("{}.service", unit_name(project))),
        )
}

pub fn service_state(project: &str) -> RemoteCommand {
    RemoteCommand::new("systemctl")
        .arg("is-active")
        .arg(format!("{}.service", unit_name(project)))
}

pub fn build_image(project: &str, workdir: &str) -> RemoteCommand {
    RemoteCommand::new("docker")
        .args(["build", "-t"])
        .arg(unit_name(project))
        .arg(workdir)
}

pub fn pull_image(image: &str) -> RemoteCommand {
    RemoteCommand::new("docker").arg("pull").arg(image)
}

/// Replaces any container of the same name, then starts `image` detached
/// with `external:internal` published.
pub fn run_container(project: &str, image: &str, external: u16, internal: u16) -> RemoteCommand {
    let name = unit_name(project);
    RemoteCommand::new("docker")
        .args(["rm", "-f"])
        .arg(&name)
        .raw(">/dev/null 2>&1 || true")
        .and_then(
            RemoteCommand::new("docker")
                .args(["run", "-d", "--restart", "unless-stopped", "--name"])
                .arg(&name)
                .arg("-p")
                .arg(format!("{}:{}", external, internal))
                .arg(image),
        )
}

pub fn container_state(project: &str) -> RemoteCommand {
    RemoteCommand::new("docker")
        .args(["inspect", "-f", "{{.State.Running}}"])
        .arg(unit_name(project))
}

/// Step-by-step instructions for setting the project up by hand.
pub fn manual_instructions(
    descriptor: Option<&ProjectDescriptor>,
    workdir: &str,
    image: Option<&str>,
    external_port: u16,
) -> String {
    let mut lines = vec!["Manual setup:".to_string()];
    let mut step = |text: String| {
        let n = lines.len();
        lines.push(format!("{}. {}", n, text));
    };
    if let Some(image) = image {
        step(format!("docker pull {}", quote(image)));
        step(format!(
            "docker run -d -p {}:<container port> {}",
            external_port,
            quote(image)
        ));
        return lines.join("\n");
    }
    step(format!("cd {}", quote(workdir)));
    match descriptor {
        Some(d) if d.project_type != ProjectType::Unknown => {
            for manifest in &d.manifests {
                step(manifest.install_command().render());
            }
            match exec_line(d) {
                Some(exec) => step(format!(
                    "PORT={} {}",
                    d.suggested_port.unwrap_or(external_port),
                    exec
                )),
                None => step("Start the application with its usual entry point".to_string()),
            }
            if d.has_build_recipe {
                step(format!(
                    "Or build a container: docker build -t app . && docker run -d -p {}:<port> app",
                    external_port
                ));
            }
        }
        _ => {
            step("No known project markers were found; inspect the files".to_string());
            step("Install the dependencies the project documents".to_string());
            step(format!("Start it listening on port {}", external_port));
        }
    }
    lines.join("\n")
}
