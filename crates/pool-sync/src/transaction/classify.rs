use solana_sdk::instruction::InstructionError;
use solana_sdk::transaction::TransactionError;

use crate::errors::PoolProgramError;

const LOG_PREFIX: &str = "Program log: ";
const ERROR_MESSAGE_MARKER: &str = "Error Message: ";
const CUSTOM_ERROR_MARKER: &str = "custom program error: 0x";

/// First explicit error message emitted by a program, if any. Informational
/// lines (instruction names, invokes, compute usage) are skipped.
pub fn scrape_logs(logs: &[String]) -> Option<String> {
    logs.iter().find_map(|line| {
        let text = line.strip_prefix(LOG_PREFIX)?;
        if let Some(at) = text.find(ERROR_MESSAGE_MARKER) {
            let message = text[at + ERROR_MESSAGE_MARKER.len()..].trim().trim_end_matches('.');
            return (!message.is_empty()).then(|| message.to_string());
        }
        let message = text.strip_prefix("Error: ")?.trim();
        (!message.is_empty()).then(|| message.to_string())
    })
}

/// Custom instruction error code from a structured error or, failing that,
/// from the provider's error text.
pub fn custom_error_code(error: Option<&TransactionError>, raw: &str) -> Option<u32> {
    if let Some(TransactionError::InstructionError(_, InstructionError::Custom(code))) = error {
        return Some(*code);
    }
    let at = raw.find(CUSTOM_ERROR_MARKER)? + CUSTOM_ERROR_MARKER.len();
    let hex: String = raw[at..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u32::from_str_radix(&hex, 16).ok()
}

/// Most specific message available: program logs, then the declared error
/// catalog, then the raw error text.
pub fn classify_failure(logs: &[String], error: Option<&TransactionError>, raw: &str) -> String {
    if let Some(message) = scrape_logs(logs) {
        return message;
    }
    if let Some(known) = custom_error_code(error, raw).and_then(PoolProgramError::from_code) {
        return known.to_string();
    }
    raw.to_string()
}
