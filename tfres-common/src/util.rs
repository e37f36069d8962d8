//! Shared utilities for tfres.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
            end += char_len;
            continue;
        }

        if c == '\\' {
            escaped = true;
            end += char_len;
            continue;
        }

        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            end += char_len;
            continue;
        }

        if c == '"' || c == '\'' {
            in_quote = Some(c);
            end += char_len;
            continue;
        }

        if c.is_whitespace() {
            break;
        }

        end += char_len;
    }
    end
}

/// Variable name fragments whose values never reach the logs.
const SENSITIVE_NAME_PARTS: &[&str] = &[
    "SECRET", "TOKEN", "PASSWORD", "PASS", "PRIVATE_KEY", "ROLE_ID", "ACCESS_KEY",
];

/// Whether an environment variable name looks like it carries a credential.
pub fn is_sensitive_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_NAME_PARTS.iter().any(|part| upper.contains(part))
}

/// Mask `NAME=value` pairs whose name looks sensitive in a rendered command
/// line before logging it.
pub fn mask_sensitive(cmd: &str) -> String {
    let mut result = String::with_capacity(cmd.len());
    let mut rest = cmd;

    while let Some(eq) = rest.find('=') {
        let name_start = rest[..eq]
            .rfind(|c: char| c.is_whitespace())
            .map_or(0, |i| i + 1);
        let name = &rest[name_start..eq];
        let value_start = eq + 1;
        let value_end = value_start + find_value_end(&rest[value_start..]);

        result.push_str(&rest[..value_start]);
        if is_sensitive_name(name) {
            result.push_str("***");
        } else {
            result.push_str(&rest[value_start..value_end]);
        }
        rest = &rest[value_end..];
    }
    result.push_str(rest);
    result
}

/// Render an invocation as a copy-pasteable shell line, env overrides first.
pub fn render_command(env: &BTreeMap<String, String>, argv: &[String]) -> String {
    env.iter()
        .map(|(k, v)| format!("{k}={}", shell_escape::escape(v.as_str().into())))
        .chain(
            argv.iter()
                .map(|arg| shell_escape::escape(arg.as_str().into()).to_string()),
        )
        .collect::<Vec<_>>()
        .join(" ")
}

/// Join `rel` onto `base` and resolve `.`/`..` lexically, without touching
/// the filesystem. `rel` always lands under `base`, even when it starts
/// with `/`.
pub fn join_clean(base: &Path, rel: &str) -> PathBuf {
    let mut joined = base.as_os_str().to_owned();
    joined.push("/");
    joined.push(rel);
    clean_path(Path::new(&joined))
}

/// Lexically normalize a path: drop `.`, fold `..` into its parent and never
/// climb above the root.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match out.components().next_back() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    Some(Component::RootDir | Component::Prefix(_)) => {}
                    _ => out.push(".."),
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
