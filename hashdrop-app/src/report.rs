//! User-facing text for transfer outcomes.

use hashdrop_files::source::SourceError;
use hashdrop_files::store::Receipt;
use hashdrop_files::transfer::{SendError, SendOutcome, SendState, TransportError};

/// One-line status for a sender state.
pub fn state_label(state: SendState) -> &'static str {
    match state {
        SendState::Idle => "Ready",
        SendState::Preparing => "Preparing file...",
        SendState::Digesting => "Computing digest...",
        SendState::Sending => "Sending file to server...",
        SendState::AwaitingResponse => "Waiting for server...",
        SendState::Verified => "File sent and verified",
        SendState::IntegrityFailed => "File integrity check failed!",
        SendState::TransportError => "Connection error",
        SendState::ServerError => "Send failed",
    }
}

/// Summary shown once the receiver has answered.
pub fn outcome_message(outcome: &SendOutcome) -> String {
    let verdict = outcome.verdict();
    match outcome {
        SendOutcome::Verified(_) => {
            let mut text = format!(
                "File sent and verified.\nFile: {}\nSize: {} bytes",
                verdict.name, verdict.declared_size
            );
            if let Some(digest) = &verdict.computed_digest {
                text.push_str(&format!("\nDigest: {digest}"));
            }
            text
        }
        SendOutcome::IntegrityFailed(_) => format!(
            "Integrity check FAILED for {}.\nThe server received bytes that do not match the digest that was sent. \
             The file may have been corrupted or altered in transit.\nServer message: {}",
            verdict.name, verdict.message
        ),
    }
}

/// Explanation for a send that produced no verdict.
pub fn error_message(err: &SendError) -> String {
    match err {
        SendError::Busy => "A transfer is already in progress. Wait for it to finish.".to_string(),
        SendError::Validation(SourceError::NotSelected) => {
            "Select a file to send.".to_string()
        }
        SendError::Validation(e) => format!("Cannot send file: {e}"),
        SendError::Fatal(e) => format!("Cannot compute a secure digest: {e}"),
        SendError::Encode(e) => format!("Failed to prepare upload: {e}"),
        SendError::Transport(TransportError::Connect { endpoint, source }) => format!(
            "Could not connect to the server.\nMake sure the server is running at {endpoint}\n\nDetails: {source}"
        ),
        SendError::Transport(TransportError::Timeout { endpoint, after }) => format!(
            "The server at {endpoint} did not answer within {} seconds.",
            after.as_secs()
        ),
        SendError::Transport(e) => format!("Connection error: {e}"),
        SendError::Server { status, message } => {
            format!("Server error: {status}\n{message}")
        }
    }
}

/// One line per ledger entry.
pub fn receipt_line(receipt: &Receipt) -> String {
    format!(
        "#{:<4} {:<8} {:<9} {:>12}  {}  {}",
        receipt.id,
        if receipt.integrity_valid { "valid" } else { "INVALID" },
        if receipt.salted { "salted" } else { "unsalted" },
        receipt.declared_size,
        receipt.digest,
        receipt.name,
    )
}
