// SPDX-License-Identifier: MIT

//! Bash file-op inference (spec §4.2).
//!
//! Extracts likely file paths from a shell command string by pattern
//! matching, never by resolving paths or touching the filesystem. Grounded
//! on the `Bash` tool_use extraction in the teacher's session-log parser
//! (`adapters/src/agent/log_entry.rs`), generalized into the three
//! read/write/delete categories the spec enumerates.

use regex::Regex;
use std::sync::LazyLock;

/// De-duplicated, order-preserving file paths inferred from one shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferredFileOps {
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    pub deletes: Vec<String>,
}

#[allow(clippy::expect_used)]
static SHELL_WRAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^\s*(?:/bin/|/usr/bin/)?(?:sh|bash)\s+(?:-\S+\s+)*(?:"(.*)"|'(.*)')\s*$"#)
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static WRITE_REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:cat|echo|printf)\b.*?>{1,2}\s*(\S+)\s*$").expect("constant regex is valid")
});
#[allow(clippy::expect_used)]
static TEE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^tee\b(.*)$").expect("constant regex is valid"));
#[allow(clippy::expect_used)]
static SED_I: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sed\s+-i\S*\b").expect("constant regex is valid"));
#[allow(clippy::expect_used)]
static SED_N: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sed\s+-n\b").expect("constant regex is valid"));
#[allow(clippy::expect_used)]
static HEAD_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:head|tail)\b(.*)$").expect("constant regex is valid"));
#[allow(clippy::expect_used)]
static BARE_CAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cat\s+(\S+)\s*$").expect("constant regex is valid"));
#[allow(clippy::expect_used)]
static RM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rm\b(.*)$").expect("constant regex is valid"));
#[allow(clippy::expect_used)]
static SEGMENT_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&&|\|\||[;|\n]").expect("constant regex is valid"));

/// A path is never synthesized from a flag-looking token (spec §8 boundary case).
fn is_flag(token: &str) -> bool {
    token.starts_with('-')
}

fn last_token(segment: &str) -> Option<&str> {
    segment.split_whitespace().last()
}

fn push_unique(list: &mut Vec<String>, path: &str) {
    let path = path.trim();
    if path.is_empty() || is_flag(path) {
        return;
    }
    if !list.iter().any(|p| p == path) {
        list.push(path.to_string());
    }
}

/// Unwrap one level of `sh -c "…"` / `bash -lc '…'` wrapping, if present.
fn unwrap_shell(command: &str) -> &str {
    let Some(caps) = SHELL_WRAP.captures(command) else {
        return command;
    };
    match caps.get(1).or_else(|| caps.get(2)) {
        Some(m) => &command[m.start()..m.end()],
        None => command,
    }
}

/// Infer read/write/delete file paths from a single shell command.
pub fn infer_file_ops(command: &str) -> InferredFileOps {
    let unwrapped = unwrap_shell(command);
    let mut ops = InferredFileOps::default();

    for raw_segment in SEGMENT_SPLIT.split(unwrapped) {
        let segment = raw_segment.trim();
        if segment.is_empty() {
            continue;
        }
        classify_segment(segment, &mut ops);
    }
    ops
}

fn classify_segment(segment: &str, ops: &mut InferredFileOps) {
    // Writes, checked before bare-cat reads so `cat x > y` counts as a write.
    if let Some(caps) = WRITE_REDIRECT.captures(segment) {
        push_unique(&mut ops.writes, &caps[1]);
        return;
    }
    if let Some(caps) = TEE.captures(segment) {
        for tok in caps[1].split_whitespace() {
            push_unique(&mut ops.writes, tok);
        }
        return;
    }
    if SED_I.is_match(segment) {
        if let Some(path) = last_token(segment) {
            push_unique(&mut ops.writes, path);
        }
        return;
    }

    // Reads.
    if SED_N.is_match(segment) {
        if let Some(path) = last_token(segment) {
            push_unique(&mut ops.reads, path);
        }
        return;
    }
    if let Some(caps) = HEAD_TAIL.captures(segment) {
        if let Some(path) = caps[1].split_whitespace().last() {
            push_unique(&mut ops.reads, path);
        }
        return;
    }
    if let Some(caps) = BARE_CAT.captures(segment) {
        push_unique(&mut ops.reads, &caps[1]);
        return;
    }

    // Deletes.
    if let Some(caps) = RM.captures(segment) {
        for tok in caps[1].split_whitespace() {
            push_unique(&mut ops.deletes, tok);
        }
    }
}
