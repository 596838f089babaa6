use crate::errors::OpError;
use crate::utils::remote_path;
use crate::utils::shell::RemoteCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
}

const SUFFIXES: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::TarGz),
    (".tgz", ArchiveFormat::TarGz),
    (".tar.bz2", ArchiveFormat::TarBz2),
    (".tbz2", ArchiveFormat::TarBz2),
    (".tar", ArchiveFormat::Tar),
    (".zip", ArchiveFormat::Zip),
];

impl ArchiveFormat {
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.to_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.ends_with(suffix) && lower.len() > suffix.len())
            .map(|(_, format)| *format)
    }

    /// Like [`detect`](Self::detect) but rejects unknown extensions.
    pub fn require(file_name: &str) -> Result<Self, OpError> {
        Self::detect(file_name).ok_or_else(|| {
            OpError::validation(format!("Unsupported archive format: {}", file_name))
                .with_hint("Supported: .zip, .tar, .tar.gz, .tgz, .tar.bz2, .tbz2")
        })
    }

    /// File name without the archive suffix.
    pub fn stem(self, file_name: &str) -> String {
        let lower = file_name.to_lowercase();
        for (suffix, format) in SUFFIXES {
            if *format == self && lower.ends_with(suffix) {
                return file_name[..file_name.len() - suffix.len()].to_string();
            }
        }
        file_name.to_string()
    }

    pub fn extract_command(self, archive: &str, target_dir: &str) -> RemoteCommand {
        let mkdir = RemoteCommand::new("mkdir").arg("-p").path(target_dir);
        let extract = match self {
            ArchiveFormat::Zip => RemoteCommand::new("unzip")
                .args(["-o", "-q"])
                .arg(archive)
                .arg("-d")
                .arg(target_dir),
            ArchiveFormat::Tar => tar("-xf", archive, target_dir),
            ArchiveFormat::TarGz => tar("-xzf", archive, target_dir),
            ArchiveFormat::TarBz2 => tar("-xjf", archive, target_dir),
        };
        mkdir.and_then(extract)
    }
}

/// Adds `item` (a path inside `dir`) to the zip file `archive` in `dir`.
/// Both are passed as `./name` so zip never reads them as options.
pub fn add_to_zip(dir: &str, archive: &str, item: &str) -> RemoteCommand {
    RemoteCommand::new("zip")
        .args(["-r", "-q"])
        .arg(format!("./{}", archive))
        .arg(format!("./{}", remote_path::file_name(item)))
        .in_dir(dir)
}

fn tar(flags: &str, archive: &str, target_dir: &str) -> RemoteCommand {
    RemoteCommand::new("tar")
        .arg(flags)
        .arg(archive)
        .arg("-C")
        .arg(target_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_longest_suffix() {
        assert_eq!(ArchiveFormat::detect("app.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("APP.TGZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("a.tar.bz2"), Some(ArchiveFormat::TarBz2));
        assert_eq!(ArchiveFormat::detect("a.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::detect("site.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect("site.rar"), None);
        assert_eq!(ArchiveFormat::detect(".zip"), None);
    }

    #[test]
    fn stem_strips_the_matched_suffix() {
        assert_eq!(ArchiveFormat::TarGz.stem("shop.tar.gz"), "shop");
        assert_eq!(ArchiveFormat::Zip.stem("Shop.ZIP"), "Shop");
    }

    #[test]
    fn unsupported_extension_is_a_validation_error() {
        let err = ArchiveFormat::require("payload.7z").unwrap_err();
        assert_eq!(err.kind, crate::errors::OpErrorKind::Validation);
    }

    #[test]
    fn zip_operands_cannot_be_read_as_options() {
        assert_eq!(
            add_to_zip("/srv", "-TT=id.zip", "/srv/-v").render(),
            "cd /srv && zip -r -q ./-TT=id.zip ./-v"
        );
    }

    #[test]
    fn extract_command_creates_target_first() {
        let cmd = ArchiveFormat::TarGz.extract_command("/opt/u/a.tgz", "/opt/a");
        assert_eq!(
            cmd.render(),
            "mkdir -p -- /opt/a && tar -xzf /opt/u/a.tgz -C /opt/a"
        );
    }
}
