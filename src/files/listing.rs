//! `ls -la` output normalizer
//!
//! Turns the text of a long listing into [`DirectoryEntry`] values. Names are
//! rebuilt from whitespace-split fields, so runs of spaces inside a name
//! collapse to one.

use super::{DirectoryEntry, EntryKind};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};

/// Parse a long listing. Entry paths are the bare names.
pub fn parse_listing(raw: &str) -> Vec<DirectoryEntry> {
    parse_listing_at(raw, Utc::now())
}

/// Same as [`parse_listing`], with `now` used for year inference and as the
/// placeholder timestamp when a line carries no date.
pub fn parse_listing_at(raw: &str, now: DateTime<Utc>) -> Vec<DirectoryEntry> {
    raw.lines()
        .skip(1)
        .filter_map(|line| parse_line(line, now))
        .collect()
}

fn parse_line(line: &str, now: DateTime<Utc>) -> Option<DirectoryEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }

    let perms = fields[0];
    // `ls -L` could not stat the entry
    if perms.contains('?') {
        return None;
    }

    // Device nodes print `major, minor` where the size goes; their stat size is 0
    let device = fields[4].ends_with(',');
    let date_at = if device { 6 } else { 5 };
    let (name_start, modified) = if fields.len() > date_at + 3 {
        (
            date_at + 3,
            parse_timestamp(fields[date_at], fields[date_at + 1], fields[date_at + 2], now),
        )
    } else if !device {
        (5, None)
    } else {
        return None;
    };

    let mut name = fields[name_start..].join(" ");
    if perms.starts_with('l') {
        if let Some((link, _target)) = name.split_once(" -> ") {
            name = link.to_string();
        }
    }
    if name == "." || name == ".." {
        return None;
    }

    let kind = if perms.starts_with('d') {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    let size = match kind {
        EntryKind::Folder => None,
        EntryKind::File if device => Some(0),
        EntryKind::File => fields[4].parse::<u64>().ok(),
    };

    Some(DirectoryEntry {
        path: name.clone(),
        name,
        kind,
        size,
        modified: modified.unwrap_or(now),
    })
}

/// `Mon DD HH:MM` (current year, or last year if that lands in the future)
/// or `Mon DD YYYY`.
fn parse_timestamp(month: &str, day: &str, clock_or_year: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if clock_or_year.contains(':') {
        let at_year = |year: i32| {
            NaiveDateTime::parse_from_str(
                &format!("{} {} {} {}", month, day, year, clock_or_year),
                "%b %d %Y %H:%M",
            )
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
        };
        match at_year(now.year()) {
            Some(ts) if ts <= now + Duration::days(1) => Some(ts),
            _ => at_year(now.year() - 1),
        }
    } else {
        NaiveDateTime::parse_from_str(
            &format!("{} {} {} 00:00", month, day, clock_or_year),
            "%b %d %Y %H:%M",
        )
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_short_layout() {
        let raw = "total 16\n\
                   drwxr-xr-x  2 user user 4096 file1\n\
                   -rw-r--r--  1 user user  123 notes.txt\n";
        let entries = parse_listing_at(raw, fixed_now());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "file1");
        assert_eq!(entries[0].kind, EntryKind::Folder);
        assert_eq!(entries[0].size, None);
        assert_eq!(entries[0].modified, fixed_now());
        assert_eq!(entries[1].name, "notes.txt");
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].size, Some(123));
        assert_eq!(entries[1].path, "notes.txt");
    }

    #[test]
    fn test_summary_only() {
        assert!(parse_listing("total 0").is_empty());
        assert!(parse_listing("").is_empty());
    }

    #[test]
    fn test_full_layout_with_dates() {
        let raw = "total 24\n\
                   drwxr-xr-x  5 root root  4096 Jun  1 08:30 .\n\
                   drwxr-xr-x 20 root root  4096 Jan  3  2023 ..\n\
                   -rw-r--r--  1 root root   512 Jun  1 08:30 app.log\n\
                   -rw-r--r--  1 root root  2048 Dec 24 18:05 holiday.txt\n\
                   drwx------  2 root root  4096 Jan  3  2023 archive\n";
        let entries = parse_listing_at(raw, fixed_now());

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["app.log", "holiday.txt", "archive"]);
        assert_eq!(
            entries[0].modified,
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()
        );
        // December is in the future relative to June, so it belongs to last year
        assert_eq!(
            entries[1].modified,
            Utc.with_ymd_and_hms(2023, 12, 24, 18, 5, 0).unwrap()
        );
        assert_eq!(
            entries[2].modified,
            Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_symlink_and_spaced_names() {
        let raw = "total 8\n\
                   lrwxrwxrwx 1 u g   11 Jun  1 08:30 current -> releases/42\n\
                   -rw-r--r-- 1 u g    7 Jun  1 08:30 my   report.txt\n";
        let entries = parse_listing_at(raw, fixed_now());

        assert_eq!(entries[0].name, "current");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].name, "my report.txt");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let raw = "total 8\n\n\
                   ls: cannot read\n\
                   -rw-r--r-- 1 u g 9 ok.txt\n";
        let entries = parse_listing_at(raw, fixed_now());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ok.txt");
    }

    #[test]
    fn test_device_nodes_keep_their_names() {
        let raw = "total 0\n\
                   crw-rw-rw-  1 root root   1,   3 Jun  1 08:30 null\n\
                   brw-rw----  1 root disk 259,   0 Jan  3  2023 nvme0n1\n\
                   -rw-r--r--  1 root root      42 Jun  1 08:30 plain\n";
        let entries = parse_listing_at(raw, fixed_now());

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["null", "nvme0n1", "plain"]);
        assert_eq!(entries[0].size, Some(0));
        assert_eq!(
            entries[0].modified,
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()
        );
        assert_eq!(
            entries[1].modified,
            Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap()
        );
        assert_eq!(entries[2].size, Some(42));
    }

    #[test]
    fn test_unstatable_entries_skipped() {
        let raw = "total 4\n\
                   l????????? ? ? ? ?            ? stale\n\
                   -rw-r--r-- 1 u g 9 Jun  1 08:30 ok.txt\n";
        let entries = parse_listing_at(raw, fixed_now());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ok.txt");
    }

    #[test]
    fn test_unparseable_size_is_none() {
        let raw = "total 0\nc--------- 1 u g 4,1 Jun  1 08:30 tty1\n";
        let entries = parse_listing_at(raw, fixed_now());
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, None);
    }
}
