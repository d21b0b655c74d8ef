//! Model Output Parsing
//!
//! Language models are asked for JSON but answer with whatever they like:
//! prose around a fenced block, an array buried in an explanation, comments
//! copied from the prompt's example, trailing commas. `extract_json` tries a
//! fixed sequence of candidate slices of the text and returns the first one
//! that deserializes into the requested type.
//!
//! Structs deserialize from JSON arrays as well as objects, so answers that
//! must be an object go through `extract_json_object`, which refuses any
//! candidate that is not one. Otherwise an array nested inside the object
//! could be read as the whole answer.
//!
//! `parse_or_else` and `parse_object_or_else` are the single place the
//! fallback contract lives: callers hand them a constructor for the default
//! value and always get a `T` back.

use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Parse `text` into `T`, or build the fallback from the parse error.
pub fn parse_or_else<T, F>(text: &str, fallback: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce(CoreError) -> T,
{
    match extract_json(text) {
        Ok(value) => value,
        Err(err) => fallback(err),
    }
}

/// Like `parse_or_else`, but only a JSON object is accepted as the answer.
pub fn parse_object_or_else<T, F>(text: &str, fallback: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce(CoreError) -> T,
{
    match extract_json_object(text) {
        Ok(value) => value,
        Err(err) => fallback(err),
    }
}

/// Locate and deserialize a JSON value embedded in free-form text.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> CoreResult<T> {
    extract_with(text, |candidate| serde_json::from_str::<T>(candidate))
}

/// Locate a JSON object embedded in free-form text and deserialize it.
/// Arrays are skipped even when `T` could be built from one.
pub fn extract_json_object<T: DeserializeOwned>(text: &str) -> CoreResult<T> {
    extract_with(text, |candidate| {
        match serde_json::from_str::<Value>(candidate)? {
            object @ Value::Object(_) => serde_json::from_value::<T>(object),
            _ => Err(serde_json::Error::custom("expected a JSON object")),
        }
    })
}

fn extract_with<T, P>(text: &str, parse: P) -> CoreResult<T>
where
    P: Fn(&str) -> Result<T, serde_json::Error>,
{
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CoreError::parse("empty response"));
    }

    let mut last_error = None;
    for candidate in candidates(trimmed) {
        match parse(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
        let cleaned = strip_json_noise(candidate);
        match parse(&cleaned) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }

    Err(CoreError::parse(match last_error {
        Some(e) => format!(
            "{} (response starts with: {:?})",
            e,
            trimmed.chars().take(80).collect::<String>()
        ),
        None => "no JSON found in response".to_string(),
    }))
}

/// Candidate slices in the order they are tried: the whole text, the first
/// code fence, then the outermost `{..}` and `[..]` slices, whichever opens
/// first going first.
fn candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text];

    if let Some(fenced) = fenced_block(text) {
        out.push(fenced);
    }

    let mut slices: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (start < end).then(|| (start, &text[start..=end]))
        })
        .collect();
    slices.sort_by_key(|(start, _)| *start);
    out.extend(slices.into_iter().map(|(_, slice)| slice));

    out
}

/// Contents of the first markdown code fence, skipping a language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let content_start = after_fence.find('\n').map(|nl| nl + 1).unwrap_or(0);
    let content = &after_fence[content_start..];
    let end = content.find("```")?;
    Some(content[..end].trim())
}

/// Drop `//` line comments and trailing commas that sit outside string literals.
fn strip_json_noise(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}
