// src/tools/parser.rs
//! Tool call extraction from a captured invocation block.
//!
//! A block runs from just after the opening `calls` marker up to and
//! including the closing one. Each call inside it names a function after the
//! separator marker and carries its arguments in a fenced ```json block.

use super::markers::MarkerSet;
use super::{generate_tool_call_id, new_tool_call, ToolCall};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid json fence regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("tool separator marker not found")]
    MissingSeparator,
    #[error("no line break after the function name")]
    MissingNameTerminator,
    #[error("empty function name")]
    EmptyFunctionName,
    #[error("no fenced json argument block found")]
    MissingJsonBlock,
}

/// Extract a single tool call from `block`.
///
/// The name is the text between the separator marker and the next line
/// break; the arguments are the trimmed interior of the first ```json fence.
/// Argument syntax is not validated here. Every successful call gets a fresh
/// id, so extracting the same block twice yields two distinct records.
pub fn extract_tool_call(block: &str, markers: &MarkerSet) -> Result<ToolCall, ExtractError> {
    let sep = block
        .find(markers.tool_sep.as_str())
        .ok_or(ExtractError::MissingSeparator)?;
    let name_start = sep + markers.tool_sep.len();
    let name_len = block[name_start..]
        .find('\n')
        .ok_or(ExtractError::MissingNameTerminator)?;
    let name = block[name_start..name_start + name_len].trim();
    if name.is_empty() {
        return Err(ExtractError::EmptyFunctionName);
    }

    let arguments = JSON_FENCE
        .captures(&block[name_start + name_len..])
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .ok_or(ExtractError::MissingJsonBlock)?;

    Ok(new_tool_call(generate_tool_call_id(), name, arguments))
}

/// Split a block into its per-call segments.
///
/// Segments are delimited by the per-call begin/end markers; a segment whose
/// end marker is missing runs to the end of the block. A block without any
/// per-call begin marker is returned whole.
pub fn split_calls<'a>(block: &'a str, markers: &MarkerSet) -> Vec<&'a str> {
    let begin = markers.tool_call_begin.as_str();
    let end = markers.tool_call_end.as_str();
    let mut segments = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = block[cursor..].find(begin) {
        let start = cursor + rel + begin.len();
        match block[start..].find(end) {
            Some(end_rel) => {
                segments.push(&block[start..start + end_rel]);
                cursor = start + end_rel + end.len();
            }
            None => {
                segments.push(&block[start..]);
                break;
            }
        }
    }
    if segments.is_empty() {
        segments.push(block);
    }
    segments
}

/// Extract every tool call of a block, in order.
///
/// Segments that fail are dropped with a warning. The block fails as a whole
/// only when no segment yields a call; the first segment's error is returned.
pub fn extract_tool_calls(block: &str, markers: &MarkerSet) -> Result<Vec<ToolCall>, ExtractError> {
    let mut calls = Vec::new();
    let mut first_err = None;
    for segment in split_calls(block, markers) {
        match extract_tool_call(segment, markers) {
            Ok(call) => calls.push(call),
            Err(e) => {
                crate::log_warn!("Dropping malformed tool call segment: {}", e);
                first_err.get_or_insert(e);
            }
        }
    }
    match (calls.is_empty(), first_err) {
        (true, Some(e)) => Err(e),
        _ => Ok(calls),
    }
}
