//! The file and grep picker.
//!
//! File enumeration is delegated to whichever of `fd`, `rg` or `find` is
//! installed; its stdout is pumped into the event loop's lap and indexed up
//! to a fixed cap. Queries score the index with a small fuzzy matcher that
//! strongly prefers basename hits, recently used files and boundary-aligned
//! matches. Grep shells out to ripgrep per query.

use log::{debug, warn};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// The index stops growing past this many paths.
pub const MAX_INDEXED_PATHS: usize = 50_000;
/// Result lists are capped before they go back to the editor.
const MAX_RESULTS: usize = 50;
/// Grep output beyond this is discarded.
const MAX_GREP_OUTPUT: usize = 256 * 1024;
/// How many recently-used entries are worth remembering.
const MAX_MRU: usize = 100;

const MRU_BOOST: i64 = 5000;

pub struct Picker {
    cwd: PathBuf,
    index: Vec<String>,
    mru: Vec<String>,
    scan_rx: Option<UnboundedReceiver<String>>,
    scan_child: Option<Child>,
}

impl Picker {
    pub fn new() -> Self {
        Self {
            cwd: PathBuf::from("."),
            index: Vec::new(),
            mru: Vec::new(),
            scan_rx: None,
            scan_child: None,
        }
    }

    /// Starts (or restarts) the file index scan rooted at `cwd`.
    pub fn init(&mut self, cwd: PathBuf, recent_files: Option<Vec<String>>) {
        self.close();
        self.cwd = cwd;
        if let Some(recent) = recent_files {
            self.set_mru(recent);
        }

        match spawn_scanner(&self.cwd) {
            Ok((child, rx)) => {
                self.scan_child = Some(child);
                self.scan_rx = Some(rx);
            }
            Err(err) => warn!("file scan unavailable: {}", err),
        }
    }

    pub fn close(&mut self) {
        if let Some(mut child) = self.scan_child.take() {
            let _ = child.start_kill();
        }
        self.scan_rx = None;
        self.index.clear();
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_rx.is_some()
    }

    /// One step of the scanner; `None` means the stream finished.
    pub async fn scan_recv(&mut self) -> Option<String> {
        match &mut self.scan_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn scan_done(&mut self) {
        self.scan_rx = None;
        self.scan_child = None;
        debug!("file scan finished with {} paths", self.index.len());
    }

    pub fn push_path(&mut self, path: String) {
        if self.index.len() < MAX_INDEXED_PATHS {
            self.index.push(path);
        }
    }

    pub fn set_mru(&mut self, recent: Vec<String>) {
        self.mru = recent;
        self.mru.truncate(MAX_MRU);
    }

    /// A file the editor just opened jumps to the front of the MRU list.
    pub fn note_open(&mut self, path: &str) {
        self.mru.retain(|entry| entry != path);
        self.mru.insert(0, path.to_string());
        self.mru.truncate(MAX_MRU);
    }

    /// Drains whatever the scanner produced so far into the index.
    pub fn drain_scan(&mut self) {
        if let Some(rx) = &mut self.scan_rx {
            while let Ok(path) = rx.try_recv() {
                if self.index.len() >= MAX_INDEXED_PATHS {
                    break;
                }
                self.index.push(path);
            }
        }
    }

    pub fn file_query(&mut self, query: &str) -> Value {
        self.drain_scan();

        if query.is_empty() {
            let items: Vec<Value> = self
                .mru
                .iter()
                .take(MAX_RESULTS)
                .map(|path| json!({ "file": path }))
                .collect();
            return Value::Array(items);
        }

        // until the scan has produced anything, the MRU list is the index
        let candidates = if self.index.is_empty() {
            &self.mru
        } else {
            &self.index
        };

        let mut scored: Vec<(i64, &String)> = candidates
            .iter()
            .filter_map(|path| {
                let mut score = score_path(query, path)?;
                if self.mru.iter().any(|entry| entry.ends_with(path.as_str())) {
                    score += MRU_BOOST;
                }
                Some((score, path))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(a.1.len().cmp(&b.1.len()))
                .then(a.1.cmp(b.1))
        });

        let items: Vec<Value> = scored
            .iter()
            .take(MAX_RESULTS)
            .map(|(score, path)| json!({ "file": path, "score": score }))
            .collect();
        Value::Array(items)
    }

    /// Synchronous ripgrep invocation; bounded by ripgrep's own caps plus an
    /// output ceiling, so an inline wait is acceptable.
    pub fn grep_query(&self, query: &str) -> Value {
        if query.is_empty() {
            return Value::Array(Vec::new());
        }

        let output = std::process::Command::new("rg")
            .args([
                "--vimgrep",
                "--max-count",
                "5",
                "--max-columns",
                "200",
                "--max-filesize",
                "1M",
                "--",
                query,
            ])
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .output();

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                warn!("rg failed: {}", err);
                return Value::Array(Vec::new());
            }
        };

        let mut stdout = output.stdout;
        stdout.truncate(MAX_GREP_OUTPUT);
        let text = String::from_utf8_lossy(&stdout);

        let items: Vec<Value> = text
            .lines()
            .filter_map(parse_grep_line)
            .take(MAX_RESULTS)
            .collect();
        Value::Array(items)
    }
}

/// `path:line:column:text`, as emitted by `rg --vimgrep`.
fn parse_grep_line(line: &str) -> Option<Value> {
    let mut parts = line.splitn(4, ':');
    let file = parts.next()?;
    let line_number: u64 = parts.next()?.parse().ok()?;
    let column: u64 = parts.next()?.parse().ok()?;
    let text = parts.next()?;
    Some(json!({
        "file": file,
        "line": line_number,
        "column": column,
        "text": text.trim_end(),
    }))
}

fn spawn_scanner(cwd: &std::path::Path) -> anyhow::Result<(Child, UnboundedReceiver<String>)> {
    let mut command = if which::which("fd").is_ok() {
        let mut command = Command::new("fd");
        command.args(["--type", "f"]);
        command
    } else if which::which("rg").is_ok() {
        let mut command = Command::new("rg");
        command.arg("--files");
        command
    } else {
        let mut command = Command::new("find");
        command.args([".", "-type", "f"]);
        command
    };

    let mut child = command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take().expect("Failed to open stdout");
    let (tx, rx) = unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let path = line.strip_prefix("./").unwrap_or(&line).to_string();
            if path.is_empty() || tx.send(path).is_err() {
                break;
            }
        }
    });

    Ok((child, rx))
}

// -------------------------------------------------------------------------------------------
// Scoring
// -------------------------------------------------------------------------------------------

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_boundary(c: char) -> bool {
    matches!(c, '/' | '_' | '-' | '.')
}

/// Fuzzy score of `query` against `path`; `None` when `query` is not a
/// subsequence of `path`. Higher is better.
pub fn score_path(query: &str, path: &str) -> Option<i64> {
    let name = basename(path);

    if name == query {
        return Some(10_000);
    }
    if name.starts_with(query) {
        return Some(5_000 + query.len() as i64);
    }
    if name.to_lowercase().starts_with(&query.to_lowercase()) {
        return Some(2_000 + query.len() as i64);
    }

    subsequence_score(query, path)
}

fn subsequence_score(query: &str, path: &str) -> Option<i64> {
    let basename_start = path.len() - basename(path).len();
    let mut score: i64 = 0;
    let mut first_match: Option<usize> = None;
    let mut previous_match: Option<usize> = None;
    let mut previous_char: Option<char> = None;

    let mut pattern = query.chars().peekable();
    for (position, c) in path.char_indices() {
        let Some(&wanted) = pattern.peek() else {
            break;
        };
        if c.to_lowercase().eq(wanted.to_lowercase()) {
            pattern.next();

            if previous_match == Some(position.saturating_sub(c.len_utf8())) && position > 0 {
                score += 100;
            }
            if previous_char.is_some_and(is_boundary) {
                score += 80;
            }
            if previous_char.is_some_and(|prev| prev.is_lowercase()) && c.is_uppercase() {
                score += 60;
            }
            if position == basename_start {
                score += 150;
            }
            if first_match.is_none() {
                first_match = Some(position);
            }
            previous_match = Some(position);
        }
        previous_char = Some(c);
    }

    if pattern.peek().is_some() {
        return None;
    }

    score -= first_match.unwrap_or(0).min(50) as i64;
    Some(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_basename_beats_everything() {
        assert_eq!(score_path("main.rs", "src/main.rs"), Some(10_000));
    }

    #[test]
    fn basename_prefix_tiers() {
        assert_eq!(score_path("main", "src/main.rs"), Some(5_004));
        assert_eq!(score_path("MAIN", "src/main.rs"), Some(2_004));
    }

    #[test]
    fn non_subsequence_is_rejected() {
        assert_eq!(score_path("zzz", "src/main.rs"), None);
    }

    #[test]
    fn boundary_matches_score_higher_than_scattered_ones() {
        // both match "mo" as a subsequence; the boundary-aligned hit wins
        let aligned = score_path("mo", "src/map_order.rs").unwrap();
        let scattered = score_path("mo", "src/chromatogram.rs").unwrap();
        assert!(aligned > scattered, "{} <= {}", aligned, scattered);
    }

    #[test]
    fn main_prefers_source_over_test_file() {
        let source = score_path("main", "src/main.rs").unwrap();
        let test_file = score_path("main", "tests/main_test.rs").unwrap();
        assert!(source >= test_file);

        // at equal score, the shorter path sorts first
        let mut picker = Picker::new();
        picker.index = vec!["tests/main_test.rs".into(), "src/main.rs".into()];
        let results = picker.file_query("main");
        assert_eq!(results[0]["file"], "src/main.rs");
    }

    #[test]
    fn mru_entries_are_boosted() {
        let mut picker = Picker::new();
        picker.index = vec!["src/alpha.rs".into(), "src/omega.rs".into()];
        picker.set_mru(vec!["src/omega.rs".into()]);

        let results = picker.file_query("rs");
        assert_eq!(results[0]["file"], "src/omega.rs");
    }

    #[test]
    fn query_before_any_scan_output_falls_back_to_mru() {
        let mut picker = Picker::new();
        picker.set_mru(vec!["/repo/src/main.rs".into(), "/repo/notes.txt".into()]);

        let results = picker.file_query("main");
        assert_eq!(results.as_array().unwrap().len(), 1);
        assert_eq!(results[0]["file"], "/repo/src/main.rs");
    }

    #[test]
    fn empty_query_returns_the_mru_list() {
        let mut picker = Picker::new();
        picker.index = vec!["a.rs".into(), "b.rs".into()];
        picker.set_mru(vec!["b.rs".into()]);

        let results = picker.file_query("");
        assert_eq!(results.as_array().unwrap().len(), 1);
        assert_eq!(results[0]["file"], "b.rs");
    }

    #[test]
    fn grep_lines_parse_vimgrep_format() {
        let item = parse_grep_line("src/main.rs:10:5:    let port = 80;").unwrap();
        assert_eq!(item["file"], "src/main.rs");
        assert_eq!(item["line"], 10);
        assert_eq!(item["column"], 5);
        assert_eq!(item["text"], "    let port = 80;");
    }
}
