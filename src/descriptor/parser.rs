//! Line-oriented descriptor parser.

use std::collections::BTreeMap;

use thiserror::Error;

use super::{Descriptor, Step, Verify, VerifyKind};
use crate::base::BaseRef;

/// A descriptor syntax or semantic error, tagged with its 1-based line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// One logical instruction after joining `\` continuations.
struct Instruction {
    line: usize,
    keyword: String,
    args: String,
}

pub(super) fn parse(text: &str) -> Result<Descriptor, ParseError> {
    let mut base: Option<BaseRef> = None;
    let mut maintainer = None;
    let mut labels = BTreeMap::new();
    let mut env = Vec::new();
    let mut steps = Vec::new();
    let mut verify: Option<(Verify, VerifyKind)> = None;
    // Relative image paths resolve against this, like WORKDIR in a Dockerfile.
    let mut workdir = String::from("/");
    let mut last_line = 1;

    for ins in instructions(text) {
        let line = ins.line;
        last_line = line;
        let fail = |message: String| ParseError::new(line, message);

        if verify.is_some() {
            return Err(fail(
                "the verification command must be the last instruction".to_string(),
            ));
        }
        if base.is_none() && ins.keyword != "FROM" {
            return Err(fail(format!(
                "FROM must be the first instruction, found {}",
                ins.keyword
            )));
        }

        match ins.keyword.as_str() {
            "FROM" => {
                if base.is_some() {
                    return Err(fail("only one FROM is supported".to_string()));
                }
                let words = words(&ins.args).map_err(fail)?;
                let [reference] = words.as_slice() else {
                    return Err(fail("FROM takes exactly one base reference".to_string()));
                };
                base = Some(reference.parse().map_err(|e| fail(format!("{}", e)))?);
            }
            "MAINTAINER" => {
                if ins.args.is_empty() {
                    return Err(fail("MAINTAINER needs a value".to_string()));
                }
                maintainer = Some(ins.args.clone());
            }
            "LABEL" => {
                for (key, value) in pairs(&ins.args).map_err(fail)? {
                    if key == "maintainer" {
                        maintainer = Some(value);
                    } else {
                        labels.insert(key, value);
                    }
                }
            }
            "ENV" => env.extend(env_pairs(&ins.args).map_err(fail)?),
            "RUN" => match mkdir_paths(&ins.args).map_err(fail)? {
                Some(paths) => {
                    for path in paths {
                        let path = image_path(&workdir, &path, false).map_err(fail)?;
                        steps.push(Step::MakeDir(path));
                    }
                }
                None => verify = Some((command(&ins.args).map_err(fail)?, VerifyKind::Run)),
            },
            "CMD" => verify = Some((command(&ins.args).map_err(fail)?, VerifyKind::Cmd)),
            "ADD" | "COPY" => {
                let mut words = if ins.args.starts_with('[') {
                    serde_json::from_str::<Vec<String>>(&ins.args)
                        .map_err(|e| fail(format!("invalid {} array: {}", ins.keyword, e)))?
                } else {
                    words(&ins.args).map_err(fail)?
                };
                if let Some(flag) = words.iter().find(|w| w.starts_with("--")) {
                    return Err(fail(format!("unsupported {} flag {}", ins.keyword, flag)));
                }
                if words.len() < 2 {
                    return Err(fail(format!(
                        "{} needs at least one source and a destination",
                        ins.keyword
                    )));
                }
                let dest = words.pop().unwrap_or_default();
                let dest = image_path(&workdir, &dest, true).map_err(fail)?;
                let sources = words
                    .iter()
                    .map(|s| context_path(s))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(fail)?;
                steps.push(Step::Copy { sources, dest });
            }
            "WORKDIR" => {
                if ins.args.is_empty() {
                    return Err(fail("WORKDIR needs a path".to_string()));
                }
                let path = if ins.args.starts_with('"') {
                    serde_json::from_str::<String>(&ins.args)
                        .map_err(|e| fail(format!("invalid quoted WORKDIR: {}", e)))?
                } else {
                    ins.args.clone()
                };
                workdir = image_path(&workdir, &path, false).map_err(fail)?;
                steps.push(Step::Workdir(workdir.clone()));
            }
            other => return Err(fail(format!("unsupported instruction {}", other))),
        }
    }

    let base = base.ok_or_else(|| ParseError::new(1, "descriptor has no FROM instruction"))?;
    let (verify, verify_kind) = verify.ok_or_else(|| {
        ParseError::new(
            last_line,
            "descriptor has no verification command (RUN or CMD as the last instruction)",
        )
    })?;

    Ok(Descriptor {
        base,
        maintainer,
        labels,
        env,
        steps,
        verify,
        verify_kind,
    })
}

fn instructions(text: &str) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (body, continues) = match trimmed.strip_suffix('\\') {
            Some(body) => (body.trim_end(), true),
            None => (trimmed, false),
        };

        let (line, mut joined) = pending.take().unwrap_or((idx + 1, String::new()));
        if !joined.is_empty() {
            joined.push(' ');
        }
        joined.push_str(body);

        if continues {
            pending = Some((line, joined));
        } else {
            out.push(split_instruction(line, &joined));
        }
    }

    if let Some((line, joined)) = pending {
        out.push(split_instruction(line, &joined));
    }
    out
}

fn split_instruction(line: usize, text: &str) -> Instruction {
    let (keyword, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    Instruction {
        line,
        keyword: keyword.to_ascii_uppercase(),
        args: args.trim().to_string(),
    }
}

/// Split on whitespace, honoring quotes and backslash escapes.
fn words(text: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(other) => current.push(other),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(other) => current.push(other),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    out.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        out.push(current);
    }
    Ok(out)
}

fn pairs(text: &str) -> Result<Vec<(String, String)>, String> {
    let words = words(text)?;
    if words.is_empty() {
        return Err("expected key=value pairs".to_string());
    }
    words
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(format!("expected key=value, found '{}'", word)),
        })
        .collect()
}

/// `ENV k=v ...`, or the legacy single-pair `ENV k value with spaces`.
fn env_pairs(text: &str) -> Result<Vec<(String, String)>, String> {
    let first = text.split_whitespace().next().unwrap_or_default();
    if first.contains('=') {
        return pairs(text);
    }
    match text.split_once(char::is_whitespace) {
        Some((key, value)) => Ok(vec![(key.to_string(), value.trim().to_string())]),
        None => Err(format!("ENV {} has no value", text)),
    }
}

/// Paths of a plain `mkdir [-p] path...` command, or None for anything else.
fn mkdir_paths(text: &str) -> Result<Option<Vec<String>>, String> {
    const SHELL_META: &[char] = &['&', ';', '|', '<', '>', '`', '$', '(', ')'];
    if text.starts_with('[') || text.contains(SHELL_META) {
        return Ok(None);
    }

    let words = words(text)?;
    let Some((program, rest)) = words.split_first() else {
        return Ok(None);
    };
    if program != "mkdir" {
        return Ok(None);
    }

    let mut paths = Vec::new();
    for word in rest {
        match word.as_str() {
            "-p" | "--parents" => {}
            flag if flag.starts_with('-') => return Ok(None),
            path => paths.push(path.to_string()),
        }
    }
    Ok(if paths.is_empty() { None } else { Some(paths) })
}

fn command(text: &str) -> Result<Verify, String> {
    if text.starts_with('[') {
        let argv: Vec<String> =
            serde_json::from_str(text).map_err(|e| format!("invalid exec form: {}", e))?;
        if argv.is_empty() || argv[0].is_empty() {
            return Err("exec form needs a program".to_string());
        }
        return Ok(Verify::Exec(argv));
    }
    if text.is_empty() {
        return Err("empty verification command".to_string());
    }
    Ok(Verify::Shell(text.to_string()))
}

/// Normalize an in-image path to an absolute path without `.` or `..`.
fn image_path(workdir: &str, path: &str, keep_trailing_slash: bool) -> Result<String, String> {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir, path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(format!("path {} escapes the image root", path));
                }
            }
            part => parts.push(part),
        }
    }

    let mut out = format!("/{}", parts.join("/"));
    if keep_trailing_slash && path.ends_with('/') && out != "/" {
        out.push('/');
    }
    Ok(out)
}

/// Normalize a build-context path; `.` is the whole context.
fn context_path(path: &str) -> Result<String, String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(format!("source {} is outside the build context", path));
                }
            }
            part => parts.push(part),
        }
    }
    Ok(if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    })
}
