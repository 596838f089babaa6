//! Parsing of `ls -la` and `find -printf` output into [`RemoteEntry`] rows.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([bcdlps-][rwxsStTl-]{9})[.+@]?\s+\d+\s+(\S+)\s+(\S+)\s+(\d+)\s+([A-Z][a-z]{2}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4})|\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2})\s(.+)$",
    )
    .expect("listing regex")
});

static RECENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][a-z]{2})\s+(\d{1,2})\s+(\d{1,2}):(\d{2})$").expect("recent regex")
});

static OLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][a-z]{2})\s+(\d{1,2})\s+(\d{4})$").expect("older regex"));

static ISO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})\s+(\d{2}):(\d{2})$").expect("iso regex")
});

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Modified {
    At(NaiveDateTime),
    Date(NaiveDate),
    Unknown,
}

impl fmt::Display for Modified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modified::At(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M")),
            Modified::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Modified::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Modified,
    pub permissions: String,
    pub owner: String,
    pub group: String,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub dir: String,
    pub entry: RemoteEntry,
}

impl SearchHit {
    pub fn path(&self) -> String {
        crate::utils::remote_path::join(&self.dir, &self.entry.name)
    }
}

/// Parses `ls -la` output, assuming the current local year for recent files.
pub fn parse_listing(raw: &str) -> Vec<RemoteEntry> {
    parse_listing_in_year(raw, chrono::Local::now().year())
}

/// Parses `ls -la` output. Lines that do not match the long-format layout
/// are skipped.
pub fn parse_listing_in_year(raw: &str, current_year: i32) -> Vec<RemoteEntry> {
    raw.lines()
        .filter_map(|line| parse_line(line.trim_end_matches('\r'), current_year))
        .collect()
}

fn parse_line(line: &str, current_year: i32) -> Option<RemoteEntry> {
    let caps = LINE_RE.captures(line)?;
    let permissions = caps.get(1)?.as_str().to_string();
    let kind = if permissions.starts_with('d') {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    let mut name = caps.get(6)?.as_str();
    if permissions.starts_with('l') {
        if let Some(idx) = name.find(" -> ") {
            name = &name[..idx];
        }
    }
    let name = sanitize_name(name);
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    let size = if kind == EntryKind::Directory {
        0
    } else {
        caps.get(4)?.as_str().parse::<u64>().unwrap_or(0)
    };
    Some(RemoteEntry {
        name,
        kind,
        size,
        modified: parse_timestamp(caps.get(5)?.as_str(), current_year),
        permissions,
        owner: caps.get(2)?.as_str().to_string(),
        group: caps.get(3)?.as_str().to_string(),
    })
}

fn month_number(abbrev: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == abbrev)
        .map(|idx| idx as u32 + 1)
}

fn parse_timestamp(raw: &str, current_year: i32) -> Modified {
    if let Some(caps) = RECENT_RE.captures(raw) {
        let date = month_number(&caps[1]).and_then(|month| {
            NaiveDate::from_ymd_opt(current_year, month, caps[2].parse().ok()?)
        });
        let time = date.and_then(|d| d.and_hms_opt(caps[3].parse().ok()?, caps[4].parse().ok()?, 0));
        return time.map(Modified::At).unwrap_or(Modified::Unknown);
    }
    if let Some(caps) = OLDER_RE.captures(raw) {
        let date = month_number(&caps[1]).and_then(|month| {
            NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[2].parse().ok()?)
        });
        return date.map(Modified::Date).unwrap_or(Modified::Unknown);
    }
    if let Some(caps) = ISO_RE.captures(raw) {
        let ts = NaiveDate::from_ymd_opt(
            caps[1].parse().unwrap_or(0),
            caps[2].parse().unwrap_or(0),
            caps[3].parse().unwrap_or(0),
        )
        .and_then(|d| d.and_hms_opt(caps[4].parse().ok()?, caps[5].parse().ok()?, 0));
        return ts.map(Modified::At).unwrap_or(Modified::Unknown);
    }
    Modified::Unknown
}

pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && *c != '/')
        .collect()
}

/// Parses `find <dir> -printf '%y\t%p\n'` output.
pub fn parse_search_output(raw: &str) -> Vec<SearchHit> {
    raw.lines()
        .filter_map(|line| {
            let (kind, path) = line.split_once('\t')?;
            let path = path.trim_end_matches('\r');
            if !path.starts_with('/') || path == "/" {
                return None;
            }
            let name = sanitize_name(crate::utils::remote_path::file_name(path));
            if name.is_empty() {
                return None;
            }
            Some(SearchHit {
                dir: crate::utils::remote_path::parent(path),
                entry: RemoteEntry {
                    name,
                    kind: if kind.trim() == "d" {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    },
                    size: 0,
                    modified: Modified::Unknown,
                    permissions: String::new(),
                    owner: String::new(),
                    group: String::new(),
                },
            })
        })
        .collect()
}

/// Directories first, then case-insensitive name order.
pub fn sort_for_display(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| match (a.is_dir(), b.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    });
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
