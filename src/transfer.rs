//! Plaintext export and import of entries
//!
//! The text form is UTF-8, one entry per line, columns separated by tabs.
//! The first line names the columns:
//!
//! ```text
//! Group	Title	Username	Password	Notes	Created	Modified
//! ```
//!
//! Tabs, line breaks and backslashes inside a field are written as `\t`,
//! `\n`, `\r` and `\\`. Timestamps are Unix seconds, or empty.
//!
//! On import the header decides which column holds which field; unknown
//! columns are ignored and only `Title` and `Password` are required. Lines
//! that cannot be understood are skipped and counted, never fatal.

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::record::Entry;
use crate::store::RecordStore;
use std::io::{BufRead, Write};
use time::OffsetDateTime;
use zeroize::{Zeroize, Zeroizing};

pub const COLUMNS: [&str; 7] = [
    "Group", "Title", "Username", "Password", "Notes", "Created", "Modified",
];

const GROUP: usize = 0;
const TITLE: usize = 1;
const USER: usize = 2;
const PASSWORD: usize = 3;
const NOTES: usize = 4;
const CREATED: usize = 5;
const MODIFIED: usize = 6;

/// Entries read from a text file, not yet added anywhere.
#[derive(Debug, Default)]
pub struct ParsedText {
    pub entries: Vec<Entry>,
    /// Lines that were blank or could not be turned into an entry.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Write the header line and one line per entry to `out`.
///
/// Returns the number of entries written. Every entry is checked before
/// anything is written, so a password that is not UTF-8 leaves `out`
/// untouched.
pub fn export_text<'a, I>(entries: I, out: &mut dyn Write) -> Result<usize>
where
    I: IntoIterator<Item = &'a Entry>,
{
    let entries: Vec<&Entry> = entries.into_iter().collect();
    if let Some(bad) = entries.iter().find(|e| e.password_str().is_none()) {
        return Err(VaultError::new(
            ErrorCategory::User,
            ErrorKind::InvalidText,
            format!("password of {} is not valid UTF-8", bad.key()),
        ));
    }

    let mut text = Zeroizing::new(COLUMNS.join("\t"));
    text.push('\n');
    for entry in &entries {
        let fields = [
            entry.group.as_str(),
            entry.title.as_str(),
            entry.user.as_str(),
            entry.password_str().unwrap_or_default(),
            entry.notes.as_str(),
        ];
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                text.push('\t');
            }
            escape_into(field, &mut text);
        }
        for stamp in [entry.created(), entry.modified()] {
            text.push('\t');
            if let Some(t) = stamp {
                text.push_str(&t.unix_timestamp().to_string());
            }
        }
        text.push('\n');
    }

    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| {
            VaultError::with_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to write exported entries",
                e,
            )
        })?;
    tracing::info!(entries = entries.len(), "exported entries as text");
    Ok(entries.len())
}

/// Parse the text form from `input`.
///
/// A non-empty `group_prefix` is put in front of every imported group,
/// separated by a dot, or becomes the group of entries that have none.
pub fn read_text(input: &mut dyn BufRead, group_prefix: &str) -> Result<ParsedText> {
    let mut line = Zeroizing::new(Vec::new());
    if read_line(input, &mut line)? == 0 {
        return Err(text_error("import file is empty"));
    }
    let header = std::str::from_utf8(&line)
        .map_err(|_| text_error("import header is not valid UTF-8"))?;
    let offsets = column_offsets(header);
    if offsets[TITLE].is_none() || offsets[PASSWORD].is_none() {
        return Err(text_error(
            "import header needs at least the Title and Password columns",
        ));
    }

    let mut parsed = ParsedText::default();
    let mut number = 1usize;
    loop {
        line.zeroize();
        if read_line(input, &mut line)? == 0 {
            break;
        }
        number += 1;
        match parse_line(&line, &offsets, group_prefix) {
            Ok(entry) => parsed.entries.push(entry),
            Err(reason) => {
                tracing::warn!(line = number, reason, "skipped import line");
                parsed.skipped += 1;
            }
        }
    }
    tracing::debug!(
        entries = parsed.entries.len(),
        skipped = parsed.skipped,
        "parsed import text"
    );
    Ok(parsed)
}

/// Parse `input` and add every entry to `store`, renaming titles that
/// would duplicate an existing (group, title, user).
pub fn import_text(
    store: &mut RecordStore,
    input: &mut dyn BufRead,
    group_prefix: &str,
) -> Result<ImportSummary> {
    let parsed = read_text(input, group_prefix)?;
    let summary = ImportSummary {
        imported: parsed.entries.len(),
        skipped: parsed.skipped,
    };
    for mut entry in parsed.entries {
        retitle(store, &mut entry);
        store.add(entry);
    }
    Ok(summary)
}

/// Give `entry` a title that is free in `store`.
pub(crate) fn retitle(store: &RecordStore, entry: &mut Entry) {
    let title = store.unique_title(&entry.group, &entry.title, &entry.user);
    if title != entry.title {
        tracing::debug!(from = %entry.title, to = %title, "renamed imported entry");
        entry.title.zeroize();
        entry.title = title;
    }
}

fn text_error(msg: &str) -> VaultError {
    VaultError::new(ErrorCategory::User, ErrorKind::InvalidText, msg)
}

/// Read one line without its line ending. Returns the bytes consumed.
fn read_line(input: &mut dyn BufRead, line: &mut Vec<u8>) -> Result<usize> {
    let n = input.read_until(b'\n', line).map_err(|e| {
        VaultError::with_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to read import text",
            e,
        )
    })?;
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(n)
}

fn column_offsets(header: &str) -> [Option<usize>; COLUMNS.len()] {
    let mut offsets = [None; COLUMNS.len()];
    for (pos, name) in header.split('\t').enumerate() {
        let field = COLUMNS.iter().position(|c| c.eq_ignore_ascii_case(name.trim()));
        if let Some(field) = field.filter(|&f| offsets[f].is_none()) {
            offsets[field] = Some(pos);
        }
    }
    offsets
}

fn parse_line(
    line: &[u8],
    offsets: &[Option<usize>; COLUMNS.len()],
    group_prefix: &str,
) -> std::result::Result<Entry, &'static str> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Err("blank line");
    }
    let line = std::str::from_utf8(line).map_err(|_| "not valid UTF-8")?;
    let columns: Vec<&str> = line.split('\t').collect();

    let mut fields: [Zeroizing<String>; COLUMNS.len()] = Default::default();
    for (field, offset) in offsets.iter().enumerate() {
        if let Some(pos) = *offset {
            let raw = columns.get(pos).ok_or("missing columns")?;
            unescape_into(raw, &mut fields[field]).ok_or("bad escape sequence")?;
        }
    }
    if fields[TITLE].is_empty() {
        return Err("empty title");
    }
    if fields[PASSWORD].is_empty() {
        return Err("empty password");
    }
    let created = parse_timestamp(&fields[CREATED]).ok_or("bad created time")?;
    let modified = parse_timestamp(&fields[MODIFIED]).ok_or("bad modified time")?;

    let group = match (group_prefix.is_empty(), fields[GROUP].is_empty()) {
        (true, _) => fields[GROUP].as_str().to_owned(),
        (false, true) => group_prefix.to_owned(),
        (false, false) => format!("{}.{}", group_prefix, fields[GROUP].as_str()),
    };
    let mut entry = Entry::new(
        group,
        fields[TITLE].as_str(),
        fields[USER].as_str(),
        fields[PASSWORD].as_str(),
        fields[NOTES].as_str(),
    );
    entry.set_created(created);
    entry.set_modified(modified);
    Ok(entry)
}

/// `Some(None)` for an empty field, `None` when it is not a timestamp.
fn parse_timestamp(field: &str) -> Option<Option<OffsetDateTime>> {
    if field.is_empty() {
        return Some(None);
    }
    let secs = field.parse::<i64>().ok()?;
    OffsetDateTime::from_unix_timestamp(secs).ok().map(Some)
}

fn escape_into(field: &str, out: &mut String) {
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

fn unescape_into(field: &str, out: &mut String) -> Option<()> {
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            't' => out.push('\t'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EntryKey;
    use std::io::Cursor;

    const HEADER: &str = "Group\tTitle\tUsername\tPassword\tNotes\tCreated\tModified\n";

    fn sample() -> Vec<Entry> {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        vec![
            Entry::new("Work", "git", "alice", "s3cr3t", "").with_created(t),
            Entry::new("", "mail", "bob", "tab\there", "line one\nline two\\end")
                .with_created(t)
                .with_modified(t),
        ]
    }

    fn export(entries: &[Entry]) -> String {
        let mut out = Vec::new();
        export_text(entries, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_export_layout() {
        let text = export(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(format!("{}\n", lines[0]), HEADER);
        assert_eq!(lines[1], "Work\tgit\talice\ts3cr3t\t\t1700000000\t");
        assert_eq!(
            lines[2],
            "\tmail\tbob\ttab\\there\tline one\\nline two\\\\end\t1700000000\t1700000000"
        );
    }

    #[test]
    fn test_export_then_import_keeps_fields() {
        let text = export(&sample());
        let parsed = read_text(&mut Cursor::new(text), "").unwrap();
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.entries, sample());
    }

    #[test]
    fn test_export_rejects_binary_password() {
        let entries = vec![Entry::new("", "t", "u", vec![0xffu8, 0xfe], "")];
        let mut out = Vec::new();
        let err = export_text(&entries, &mut out).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidText);
        assert!(out.is_empty());
    }

    #[test]
    fn test_import_skips_bad_lines() {
        let text = format!(
            "{}{}{}{}{}{}{}",
            HEADER,
            "Work\tgit\talice\ts3cr3t\t\t\t\n",
            "\n",
            "Work\tnopass\talice\t\t\t\t\n",
            "Work\tshort\n",
            "Work\tescape\talice\tpw\\q\t\t\t\n",
            "Home\trouter\tadmin\tpw\tnotes\tyesterday\t\r\n",
        );
        let parsed = read_text(&mut Cursor::new(text), "").unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.skipped, 5);
        assert_eq!(parsed.entries[0].key(), EntryKey::new("Work", "git", "alice"));
    }

    #[test]
    fn test_import_uses_header_order() {
        let text = "password\tTITLE\tColour\n hunter2\tmail\tblue\n";
        let parsed = read_text(&mut Cursor::new(text), "").unwrap();
        assert_eq!(parsed.entries.len(), 1);
        let entry = &parsed.entries[0];
        assert_eq!(entry.title, "mail");
        assert_eq!(entry.password_str(), Some(" hunter2"));
        assert!(entry.group.is_empty() && entry.user.is_empty());
        assert!(entry.created().is_none());
    }

    #[test]
    fn test_import_requires_title_and_password_columns() {
        let err = read_text(&mut Cursor::new("Group\tTitle\n"), "").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidText);
        let err = read_text(&mut Cursor::new(""), "").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidText);
    }

    #[test]
    fn test_import_group_prefix() {
        let text = format!("{}Work\tgit\t\tpw\t\t\t\n\tmail\t\tpw\t\t\t\n", HEADER);
        let parsed = read_text(&mut Cursor::new(text), "Imported").unwrap();
        assert_eq!(parsed.entries[0].group, "Imported.Work");
        assert_eq!(parsed.entries[1].group, "Imported");
    }

    #[test]
    fn test_import_renames_duplicates() {
        let mut store = RecordStore::new();
        store.add(Entry::new("Work", "git", "alice", "old", ""));
        let text = format!(
            "{}Work\tgit\talice\tnew\t\t\t\nWork\tgit\talice\tnewer\t\t\t\n",
            HEADER
        );

        let summary = import_text(&mut store, &mut Cursor::new(text), "").unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 0 });
        let titles: Vec<_> = store.iter().map(|e| e.title.clone()).collect();
        assert_eq!(titles, ["git", "git (1)", "git (2)"]);
        assert_eq!(
            store.find(&EntryKey::new("Work", "git (2)", "alice")).unwrap().password_str(),
            Some("newer")
        );
    }
}
