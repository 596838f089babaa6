//! Typed builder for remote shell commands.
//!
//! Every operator-supplied value goes through [`quote`] exactly once, here.
//! Call sites never splice names or paths into command strings by hand.

use std::fmt;

/// POSIX single-quote quoting. Safe for any byte sequence without NUL.
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Part {
    Quoted(String),
    Raw(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Simple {
    env: Vec<(String, String)>,
    parts: Vec<Part>,
}

/// A command line: one or more simple commands joined with `&&`, optionally
/// run from a working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCommand {
    cwd: Option<String>,
    chain: Vec<Simple>,
}

impl RemoteCommand {
    pub fn new(program: &str) -> Self {
        Self {
            cwd: None,
            chain: vec![Simple {
                env: Vec::new(),
                parts: vec![Part::Raw(program.to_string())],
            }],
        }
    }

    fn current(&mut self) -> &mut Simple {
        let last = self.chain.len() - 1;
        &mut self.chain[last]
    }

    pub fn arg(mut self, value: impl AsRef<str>) -> Self {
        self.current()
            .parts
            .push(Part::Quoted(value.as_ref().to_string()));
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self = self.arg(value);
        }
        self
    }

    /// Ends option parsing before the given paths.
    pub fn paths<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.raw("--").args(values)
    }

    pub fn path(self, value: impl AsRef<str>) -> Self {
        self.paths([value])
    }

    pub fn raw(mut self, fragment: &str) -> Self {
        self.current().parts.push(Part::Raw(fragment.to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.current().env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn and_then(mut self, next: RemoteCommand) -> Self {
        self.chain.extend(next.chain);
        self
    }

    pub fn in_dir(mut self, dir: impl AsRef<str>) -> Self {
        self.cwd = Some(dir.as_ref().to_string());
        self
    }

    pub fn render(&self) -> String {
        let mut segments = Vec::new();
        if let Some(cwd) = &self.cwd {
            segments.push(format!("cd {}", quote(cwd)));
        }
        for simple in &self.chain {
            let mut words: Vec<String> = simple
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, quote(v)))
                .collect();
            for part in &simple.parts {
                words.push(match part {
                    Part::Quoted(value) => quote(value),
                    Part::Raw(value) => value.clone(),
                });
            }
            segments.push(words.join(" "));
        }
        segments.join(" && ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_leaves_plain_words_alone() {
        assert_eq!(quote("report-2024.txt"), "report-2024.txt");
        assert_eq!(quote("/var/www"), "/var/www");
    }

    #[test]
    fn quote_escapes_single_quotes_and_metacharacters() {
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote("a b; rm -rf /"), "'a b; rm -rf /'");
        assert_eq!(quote("$(id)"), "'$(id)'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn renders_chain_with_cwd_and_env() {
        let cmd = RemoteCommand::new("ls")
            .arg("-la")
            .path("/srv/my files")
            .env("LC_ALL", "C")
            .and_then(RemoteCommand::new("echo").arg("done"))
            .in_dir("/tmp");
        assert_eq!(
            cmd.render(),
            "cd /tmp && LC_ALL=C ls -la -- '/srv/my files' && echo done"
        );
    }
}
