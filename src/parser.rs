//! Result Parser
//!
//! Turns the text printed by `global` into file-grouped match records. Two
//! layouts exist:
//!
//! - `ctags-x` records, one per line: `tag line file snippet...`
//! - plain lists, one path (or symbol name) per line
//!
//! The output format is not formally specified, so parsing is best effort:
//! a line that does not fit the layout is dropped and parsing goes on with
//! the next one.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::command::{Command, CommandKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMatch {
    pub line: u32,
    pub snippet: String,
}

/// All contiguous matches in one file. Empty `matches` for path listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMatches {
    pub file: String,
    pub matches: Vec<LineMatch>,
}

impl FileMatches {
    fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            matches: Vec::new(),
        }
    }
}

/// Parsed result of one query, rooted at the project it ran against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSet {
    pub name: String,
    pub kind: CommandKind,
    pub tag: String,
    pub project: PathBuf,
    pub files: Vec<FileMatches>,
}

impl MatchSet {
    pub fn from_command(command: &Command) -> Self {
        Self {
            name: command.name().to_string(),
            kind: command.kind(),
            tag: command.tag().to_string(),
            project: command.db_root().map(PathBuf::from).unwrap_or_default(),
            files: parse(command.kind(), command.output(), command.tag()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of line matches, or of listed entries for plain lists.
    pub fn len(&self) -> usize {
        self.files.iter().map(|f| f.matches.len().max(1)).sum()
    }
}

impl fmt::Display for MatchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\" in \"{}\"", self.name, self.tag, self.project.display())?;
        for file in &self.files {
            write!(f, "\n\t{}", file.file)?;
            for m in &file.matches {
                write!(f, "\n\t\tline {}:\t{}", m.line, m.snippet)?;
            }
        }
        Ok(())
    }
}

/// Parses the output of a `kind` query made with `tag`.
pub fn parse(kind: CommandKind, raw: &str, tag: &str) -> Vec<FileMatches> {
    if kind.lists_lines() {
        parse_lines(raw)
    } else {
        parse_matches(raw, tag)
    }
}

fn physical_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(['\n', '\r'])
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Cursor over the fields of one record.
struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str) -> Self {
        let mut fields = Self { rest: line };
        fields.skip_blanks();
        fields
    }

    fn skip_blanks(&mut self) {
        self.rest = self.rest.trim_start_matches(is_blank);
    }

    fn is_done(&self) -> bool {
        self.rest.is_empty()
    }

    /// Skips the leading tag field.
    ///
    /// The tag may itself contain blanks (grep patterns), so its known text
    /// is stripped when the record starts with it. Otherwise (regex or
    /// prefix queries print the matched name) one token is skipped.
    fn skip_tag(&mut self, tag: &str) {
        let head = self.rest.get(..tag.len());
        let after = self.rest.get(tag.len()..).and_then(|s| s.chars().next());
        let has_tag = !tag.is_empty()
            && head.is_some_and(|h| h.eq_ignore_ascii_case(tag))
            && after.is_some_and(is_blank);

        if has_tag {
            self.rest = &self.rest[tag.len()..];
        } else {
            self.token();
        }
        self.skip_blanks();
    }

    fn token(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest.find(is_blank).unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        self.skip_blanks();
        Some(token)
    }

    fn remainder(self) -> &'a str {
        self.rest
    }
}

/// Parses `tag line file snippet` records.
///
/// A new file group starts whenever the file differs from the previous
/// record's file. Output that interleaves files therefore yields repeated
/// groups for the same file; emission order is kept as is.
pub fn parse_matches(raw: &str, tag: &str) -> Vec<FileMatches> {
    let mut files: Vec<FileMatches> = Vec::new();

    for (idx, line) in physical_lines(raw).enumerate() {
        let mut fields = Fields::new(line);
        if fields.is_done() {
            continue;
        }
        fields.skip_tag(tag);

        let Some(line_no) = fields.token().and_then(|t| t.parse::<u32>().ok()) else {
            tracing::debug!("Skipping malformed line {}: missing line number", idx + 1);
            continue;
        };
        let Some(file) = fields.token() else {
            tracing::debug!("Skipping malformed line {}: missing file", idx + 1);
            continue;
        };
        let snippet = fields.remainder();

        let same_file = files.last().is_some_and(|last| last.file == file);
        if !same_file {
            files.push(FileMatches::new(file));
        }
        if let Some(group) = files.last_mut() {
            group.matches.push(LineMatch {
                line: line_no,
                snippet: snippet.to_string(),
            });
        }
    }

    files
}

/// Parses one entry per line, ignoring blank lines.
pub fn parse_lines(raw: &str) -> Vec<FileMatches> {
    physical_lines(raw)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(FileMatches::new)
        .collect()
}

/// Sorted, de-duplicated symbol names from `global -c` output.
pub fn completions(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = physical_lines(raw)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(line: u32, snippet: &str) -> LineMatch {
        LineMatch {
            line,
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn test_groups_contiguous_files() {
        let raw = "foo 10 src/a.c some code\nfoo 11 src/a.c more code\nfoo 3 src/b.c other\n";
        let files = parse(CommandKind::FindDefinition, raw, "foo");

        assert_eq!(
            files,
            vec![
                FileMatches {
                    file: "src/a.c".into(),
                    matches: vec![m(10, "some code"), m(11, "more code")],
                },
                FileMatches {
                    file: "src/b.c".into(),
                    matches: vec![m(3, "other")],
                },
            ]
        );
    }

    #[test]
    fn test_blank_lines_and_leading_whitespace() {
        let padded = parse_matches("\n\n foo 1 x.c y\n\n", "foo");
        let plain = parse_matches("foo 1 x.c y\n", "foo");
        assert_eq!(padded, plain);
        assert_eq!(plain[0].matches, vec![m(1, "y")]);
    }

    #[test]
    fn test_crlf_and_tabs() {
        let raw = "foo\t\t7   src/a.c\tint  foo(void);\r\nfoo 9 src/a.c   return 0;\r\n";
        let files = parse_matches(raw, "foo");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].matches, vec![m(7, "int  foo(void);"), m(9, "return 0;")]);
    }

    #[test]
    fn test_interleaved_files_repeat_headings() {
        let raw = "foo 1 a.c x\nfoo 2 b.c y\nfoo 3 a.c z\n";
        let files = parse_matches(raw, "foo");
        let names: Vec<_> = files.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(names, vec!["a.c", "b.c", "a.c"]);
    }

    #[test]
    fn test_tag_with_spaces() {
        let raw = "hello world 4 doc/readme.txt say hello world twice\n";
        let files = parse(CommandKind::Grep, raw, "hello world");
        assert_eq!(files[0].file, "doc/readme.txt");
        assert_eq!(files[0].matches, vec![m(4, "say hello world twice")]);
    }

    #[test]
    fn test_case_insensitive_and_regex_tags() {
        let files = parse_matches("Main 12 main.c int Main()\n", "main");
        assert_eq!(files[0].matches, vec![m(12, "int Main()")]);

        let files = parse_matches("get_name 5 a.c x\nget_id 6 a.c y\n", "get_.*");
        assert_eq!(files[0].matches, vec![m(5, "x"), m(6, "y")]);
    }

    #[test]
    fn test_empty_snippet() {
        let files = parse_matches("foo 3 a.c\n", "foo");
        assert_eq!(files[0].matches, vec![m(3, "")]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let raw = "foo notanumber a.c x\nfoo 12\nfoo\nfoo 2 b.c ok\n";
        let files = parse_matches(raw, "foo");
        assert_eq!(
            files,
            vec![FileMatches {
                file: "b.c".into(),
                matches: vec![m(2, "ok")],
            }]
        );
    }

    #[test]
    fn test_file_list() {
        let files = parse(CommandKind::FindFile, "a/b.c\n\nc/d.c\n", "b");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], FileMatches::new("a/b.c"));
        assert!(files[1].matches.is_empty());
    }

    #[test]
    fn test_file_list_trims_and_handles_cr() {
        let files = parse_lines("  a.c  \r\n\r\n\tb.c\r\n");
        let names: Vec<_> = files.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(names, vec!["a.c", "b.c"]);
    }

    #[test]
    fn test_completions() {
        assert_eq!(
            completions("get_name\nget_id\n\nget_name\n"),
            vec!["get_id".to_string(), "get_name".to_string()]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_matches("", "foo").is_empty());
        assert!(parse_matches(" \n\t\r\n", "foo").is_empty());
        assert!(parse_lines("").is_empty());
    }

    #[test]
    fn test_render_text() {
        let set = MatchSet {
            name: "Find Reference".into(),
            kind: CommandKind::FindReference,
            tag: "foo".into(),
            project: PathBuf::from("/p"),
            files: parse_matches("foo 1 a.c x\nfoo 2 a.c y\n", "foo"),
        };
        assert_eq!(
            set.to_string(),
            "Find Reference \"foo\" in \"/p\"\n\ta.c\n\t\tline 1:\tx\n\t\tline 2:\ty"
        );
        assert_eq!(set.len(), 2);
    }
}
