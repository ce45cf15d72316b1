// proposal-apply-rs/src/patch.rs
// Unified diff parsing and application.
//
// Hunks are matched at their declared position first, then at the nearest
// offset where every context and removed line matches exactly. There is no
// fuzz: a hunk either matches byte-for-byte or the patch fails.

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
    /// The old side's last line carries no trailing newline.
    pub old_missing_newline: bool,
    /// The new side's last line carries no trailing newline.
    pub new_missing_newline: bool,
}

impl Hunk {
    /// Pre-image lines (context and removals).
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// Post-image lines (context and additions).
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }

    fn mark_missing_newline(&mut self) {
        match self.lines.last() {
            Some(HunkLine::Remove(_)) => self.old_missing_newline = true,
            Some(HunkLine::Add(_)) => self.new_missing_newline = true,
            Some(HunkLine::Context(_)) => {
                self.old_missing_newline = true;
                self.new_missing_newline = true;
            }
            None => {}
        }
    }
}

/// The diff of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// `None` when the old side is `/dev/null`.
    pub old_path: Option<String>,
    /// `None` when the new side is `/dev/null`.
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
    /// Raw text of this file section.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("malformed diff at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("diff contains no file sections")]
    Empty,

    #[error("file section for {0} has no hunks")]
    NoHunks(String),

    #[error("hunk {hunk} does not match the file (declared at line {line})")]
    HunkMismatch { hunk: usize, line: usize },

    #[error("target already exists")]
    TargetExists,

    #[error("target does not exist")]
    TargetMissing,

    #[error("deletion leaves {0} line(s) behind")]
    DeleteNotEmpty(usize),
}

impl FilePatch {
    /// Path the change is about: the new side, or the old side for deletions.
    pub fn target_path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }

    pub fn is_creation(&self) -> bool {
        self.old_path.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.new_path.is_none()
    }

    /// Apply against the current content (`None` when the file is absent).
    /// Returns the new content, or `None` when the file must be removed.
    pub fn apply(&self, original: Option<&str>) -> Result<Option<String>, PatchError> {
        if self.is_creation() {
            if original.is_some() {
                return Err(PatchError::TargetExists);
            }
        } else if original.is_none() {
            return Err(PatchError::TargetMissing);
        }

        let (mut lines, mut trailing_newline) = split_lines(original.unwrap_or(""));
        let mut min_pos = 0usize;
        let mut delta: isize = 0;

        for (index, hunk) in self.hunks.iter().enumerate() {
            let old = hunk.old_lines();
            let new: Vec<String> = hunk.new_lines().into_iter().map(str::to_string).collect();

            // A zero-length old side names the line *after which* to insert.
            let declared = if hunk.old_len == 0 {
                hunk.old_start
            } else {
                hunk.old_start.saturating_sub(1)
            };
            let expected = (declared as isize + delta).max(min_pos as isize) as usize;

            let pos = find_hunk(&lines, &old, expected, min_pos).ok_or(PatchError::HunkMismatch {
                hunk: index + 1,
                line: declared + 1,
            })?;

            let end = pos + old.len();
            let touches_end = end == lines.len();
            let new_len = new.len();
            lines.splice(pos..end, new);

            if touches_end {
                trailing_newline = !hunk.new_missing_newline;
            }
            delta += new_len as isize - old.len() as isize;
            min_pos = pos + new_len;
        }

        if self.is_deletion() {
            if !lines.is_empty() {
                return Err(PatchError::DeleteNotEmpty(lines.len()));
            }
            return Ok(None);
        }

        Ok(Some(join_lines(&lines, trailing_newline)))
    }
}

/// Parse every file section of a unified diff. Leading noise (`diff --git`,
/// `index`, mode lines) is skipped.
pub fn parse_unified_diff(text: &str) -> Result<Vec<FilePatch>, PatchError> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut patches = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        let is_header = line.starts_with("--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "));
        if !is_header {
            if line.starts_with("@@") {
                return Err(PatchError::Malformed {
                    line: i + 1,
                    message: "hunk outside of a file section".to_string(),
                });
            }
            i += 1;
            continue;
        }

        let section_start = i;
        let old_path = header_path(&line[4..]);
        let new_path = header_path(&lines[i + 1][4..]);
        match (&old_path, &new_path) {
            (None, None) => {
                return Err(PatchError::Malformed {
                    line: i + 1,
                    message: "both sides are /dev/null".to_string(),
                })
            }
            (Some(p), _) | (None, Some(p)) if p.is_empty() => {
                return Err(PatchError::Malformed {
                    line: i + 1,
                    message: "empty path in file header".to_string(),
                })
            }
            _ => {}
        }
        i += 2;

        let mut hunks = Vec::new();
        while i < lines.len() && lines[i].starts_with("@@") {
            let (hunk, next) = parse_hunk(&lines, i)?;
            hunks.push(hunk);
            i = next;
        }

        // An empty new file has no hunks; anything else must change something.
        if hunks.is_empty() && old_path.is_some() {
            let path = new_path.or(old_path).unwrap_or_default();
            return Err(PatchError::NoHunks(path));
        }

        let mut section = lines[section_start..i].join("\n");
        section.push('\n');
        patches.push(FilePatch {
            old_path,
            new_path,
            hunks,
            text: section,
        });
    }

    if patches.is_empty() {
        return Err(PatchError::Empty);
    }
    Ok(patches)
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), PatchError> {
    let header = lines[start];
    let (old_start, old_len, new_start, new_len) =
        parse_hunk_header(header).ok_or_else(|| PatchError::Malformed {
            line: start + 1,
            message: format!("bad hunk header '{}'", header.trim_end()),
        })?;

    let mut hunk = Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        lines: Vec::new(),
        old_missing_newline: false,
        new_missing_newline: false,
    };

    let (mut old_seen, mut new_seen) = (0usize, 0usize);
    let mut i = start + 1;

    while old_seen < old_len || new_seen < new_len {
        let Some(line) = lines.get(i) else {
            return Err(PatchError::Malformed {
                line: i,
                message: "hunk ends before its declared length".to_string(),
            });
        };

        match line.as_bytes().first() {
            Some(b' ') => {
                hunk.lines.push(HunkLine::Context(line[1..].to_string()));
                old_seen += 1;
                new_seen += 1;
            }
            // Blank context line whose leading space was stripped by an editor.
            None | Some(b'\r') => {
                hunk.lines.push(HunkLine::Context(line.to_string()));
                old_seen += 1;
                new_seen += 1;
            }
            Some(b'-') => {
                hunk.lines.push(HunkLine::Remove(line[1..].to_string()));
                old_seen += 1;
            }
            Some(b'+') => {
                hunk.lines.push(HunkLine::Add(line[1..].to_string()));
                new_seen += 1;
            }
            Some(b'\\') => hunk.mark_missing_newline(),
            _ => {
                return Err(PatchError::Malformed {
                    line: i + 1,
                    message: format!("unexpected line in hunk: '{}'", line.trim_end()),
                })
            }
        }

        if old_seen > old_len || new_seen > new_len {
            return Err(PatchError::Malformed {
                line: i + 1,
                message: "hunk is longer than its header declares".to_string(),
            });
        }
        i += 1;
    }

    if lines.get(i).is_some_and(|l| l.starts_with('\\')) {
        hunk.mark_missing_newline();
        i += 1;
    }

    Ok((hunk, i))
}

/// `@@ -l[,s] +l[,s] @@ [section]`
fn parse_hunk_header(header: &str) -> Option<(usize, usize, usize, usize)> {
    let rest = header.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let mut ranges = rest[..end].split_whitespace();
    let (old_start, old_len) = parse_range(ranges.next()?.strip_prefix('-')?)?;
    let (new_start, new_len) = parse_range(ranges.next()?.strip_prefix('+')?)?;
    Some((old_start, old_len, new_start, new_len))
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Path from a `---`/`+++` header, `None` for `/dev/null`.
fn header_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    let raw = strip_timestamp(raw);
    if raw == "/dev/null" {
        return None;
    }
    let path = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(path.to_string())
}

/// Drop a space-separated `YYYY-...` timestamp after the path.
fn strip_timestamp(raw: &str) -> &str {
    for (idx, _) in raw.match_indices(' ') {
        let tail = raw[idx + 1..].as_bytes();
        if tail.len() >= 5 && tail[..4].iter().all(u8::is_ascii_digit) && tail[4] == b'-' {
            return raw[..idx].trim_end();
        }
    }
    raw
}

fn find_hunk(lines: &[String], old: &[&str], expected: usize, min_pos: usize) -> Option<usize> {
    let fits = |pos: usize| {
        pos >= min_pos
            && pos + old.len() <= lines.len()
            && lines[pos..pos + old.len()]
                .iter()
                .zip(old)
                .all(|(have, want)| have.as_str() == *want)
    };

    if fits(expected) {
        return Some(expected);
    }
    for offset in 1..=lines.len() + 1 {
        if let Some(before) = expected.checked_sub(offset) {
            if fits(before) {
                return Some(before);
            }
        }
        if fits(expected + offset) {
            return Some(expected + offset);
        }
    }
    None
}

fn split_lines(content: &str) -> (Vec<String>, bool) {
    if content.is_empty() {
        return (Vec::new(), true);
    }
    let trailing_newline = content.ends_with('\n');
    let body = content.strip_suffix('\n').unwrap_or(content);
    (body.split('\n').map(str::to_string).collect(), trailing_newline)
}

fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}
