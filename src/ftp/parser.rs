//! MLSD and Unix LIST line decoders.
//!
//! MLSD (RFC 3659): `fact1=val1;fact2=val2; name` with case-insensitive
//! fact keys. LIST: classic `ls -l` lines. Windows/IIS output is not
//! supported; servers modern enough to matter either speak MLSD or emit
//! the Unix format.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::ftp::types::{FtpNode, NodeKind};

// ─── MLSD ────────────────────────────────────────────────────────────

/// Decode one MLSD fact line. Returns `None` when the line has no
/// fact/name separator.
pub fn parse_mlsd_line(line: &str) -> Option<FtpNode> {
    let (facts, name) = line.trim_start().split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind_value = String::new();
    let mut size = 0u64;
    let mut modified = DateTime::UNIX_EPOCH;

    for fact in facts.split(';') {
        if fact.is_empty() {
            continue;
        }
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => kind_value = value.to_ascii_lowercase(),
            "size" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_mlsd_time(value).unwrap_or(DateTime::UNIX_EPOCH),
            _ => {}
        }
    }

    let kind = match kind_value.as_str() {
        "dir" => NodeKind::Directory,
        "file" => NodeKind::File,
        _ => NodeKind::SymbolicLink,
    };

    Some(FtpNode {
        name: name.to_string(),
        kind,
        size,
        modified,
    })
}

/// Parse an MLSD/MDTM timestamp: `YYYYMMDDHHMMSS` with an optional
/// `.fraction`, always UTC.
pub(crate) fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let base = if s.len() >= 14 { &s[..14] } else { s };
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix LIST ───────────────────────────────────────────────────────

lazy_static! {
    static ref UNIX_LINE: Regex = Regex::new(
        r"(?x)
        ^([dl-])[rwxsStT-]{9}\S*\s+     # type flag + permission bits
        \d+\s+                          # link count
        \S+\s+                          # owner
        \S+\s+                          # group
        (\d+)\s+                        # size
        (\w{3}\s+\d{1,2}\s+[\d:]+)\s+   # date, three fields
        (.+)$                           # name, possibly with -> target
        ",
    )
    .unwrap();
}

/// Decode one Unix-style `LIST` line. Returns `None` for lines that do
/// not match the `ls -l` shape (totals line, unsupported node types).
pub fn parse_list_line(line: &str) -> Option<FtpNode> {
    let caps = UNIX_LINE.captures(line)?;

    let kind = match caps.get(1)?.as_str() {
        "d" => NodeKind::Directory,
        "l" => NodeKind::SymbolicLink,
        _ => NodeKind::File,
    };
    let size = caps.get(2)?.as_str().parse().unwrap_or(0);
    let modified = parse_list_date(caps.get(3)?.as_str()).unwrap_or(DateTime::UNIX_EPOCH);

    let mut name = caps.get(4)?.as_str();
    if kind == NodeKind::SymbolicLink {
        if let Some(pos) = name.find(" -> ") {
            name = &name[..pos];
        }
    }

    Some(FtpNode {
        name: name.to_string(),
        kind,
        size,
        modified,
    })
}

/// Parse the LIST date: `Jan  1 12:00` (year implied) or `Jan  1  2025`.
fn parse_list_date(s: &str) -> Option<DateTime<Utc>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Ok(dt) = NaiveDateTime::parse_from_str(
        &format!("{} {}", Utc::now().format("%Y"), normalised),
        "%Y %b %d %H:%M",
    ) {
        return Some(Utc.from_utc_datetime(&dt));
    }

    if let Ok(date) = NaiveDate::parse_from_str(&normalised, "%b %d %Y") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mlsd_file() {
        let node =
            parse_mlsd_line("type=file;size=1024;modify=20260101120000; example.bin").unwrap();
        assert_eq!(node.name, "example.bin");
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.size, 1024);
        assert_eq!(
            node.modified,
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn mlsd_dir() {
        let node = parse_mlsd_line("type=dir;modify=20250525083610; pub").unwrap();
        assert_eq!(node.kind, NodeKind::Directory);
        assert_eq!(node.size, 0);
    }

    #[test]
    fn mlsd_cdir_and_pdir_are_links() {
        // Anything that is not exactly dir/file decodes as a link.
        let cdir = parse_mlsd_line("type=cdir;modify=20250525083610; .").unwrap();
        let pdir = parse_mlsd_line("type=pdir; ..").unwrap();
        assert_eq!(cdir.kind, NodeKind::SymbolicLink);
        assert_eq!(pdir.kind, NodeKind::SymbolicLink);
    }

    #[test]
    fn mlsd_keys_are_case_insensitive() {
        let node = parse_mlsd_line("Type=DIR;Size=5; logs").unwrap();
        assert_eq!(node.kind, NodeKind::Directory);
        assert_eq!(node.size, 5);
    }

    #[test]
    fn mlsd_missing_size_is_zero() {
        let node = parse_mlsd_line("type=file;modify=20260101120000; empty").unwrap();
        assert_eq!(node.size, 0);
    }

    #[test]
    fn mlsd_bad_modify_is_epoch() {
        let node = parse_mlsd_line("type=file;modify=not-a-date; odd").unwrap();
        assert_eq!(node.modified, DateTime::UNIX_EPOCH);
        let node = parse_mlsd_line("type=file; no-modify").unwrap();
        assert_eq!(node.modified, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn mlsd_fractional_modify() {
        let node = parse_mlsd_line("type=file;modify=20260101120000.123; f").unwrap();
        assert_eq!(
            node.modified,
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn mlsd_name_keeps_spaces() {
        let node = parse_mlsd_line("type=file;size=3; my file.txt").unwrap();
        assert_eq!(node.name, "my file.txt");
    }

    #[test]
    fn mlsd_without_separator_is_none() {
        assert!(parse_mlsd_line("type=file;size=3;").is_none());
    }

    #[test]
    fn list_file() {
        let node = parse_list_line("-rw-r--r--   1 user group  1234 Jan  1 12:00 readme.txt")
            .unwrap();
        assert_eq!(node.name, "readme.txt");
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.size, 1234);
    }

    #[test]
    fn list_dir() {
        let node = parse_list_line("drwxr-xr-x   2 root root  4096 Mar  1 09:30 subdir").unwrap();
        assert_eq!(node.kind, NodeKind::Directory);
        assert_eq!(node.name, "subdir");
    }

    #[test]
    fn list_symlink_strips_target() {
        let node =
            parse_list_line("lrwxrwxrwx   1 root root    22 Jan  5 08:00 link -> /var/target")
                .unwrap();
        assert_eq!(node.kind, NodeKind::SymbolicLink);
        assert_eq!(node.name, "link");
    }

    #[test]
    fn list_year_form_date() {
        let node = parse_list_line("-rw-r--r--   1 user group  10 Jan  1  2025 old.txt").unwrap();
        assert_eq!(
            node.modified,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn list_name_keeps_spaces() {
        let node =
            parse_list_line("-rw-r--r--   1 user group  9 Jan  1 12:00 two words.txt").unwrap();
        assert_eq!(node.name, "two words.txt");
    }

    #[test]
    fn list_totals_line_is_none() {
        assert!(parse_list_line("total 52").is_none());
    }
}
