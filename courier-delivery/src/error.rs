//! Typed error handling for send attempts.
//!
//! The split that matters is between transport-class failures, which leave
//! the retry budget alone, and everything else, which spends it:
//! - [`TransportError`]: the connection or protocol layer let us down
//! - [`SendError`]: the server refused something we sent
//! - [`RenderError`]: building the per-recipient message failed
//! - [`AccountError`]: no usable outgoing account

use courier_common::PermissionError;
use courier_smtp::ClientError;
use courier_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Send failure: {0}")]
    Send(#[from] SendError),

    #[error("Render failure: {0}")]
    Render(#[from] RenderError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Infrastructure faults; the scheduler's own cadence takes care of retrying.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Server disconnected: {0}")]
    Disconnected(String),

    #[error("Recipient {recipient} refused: {code} {message}")]
    RecipientsRefused {
        recipient: String,
        code: u16,
        message: String,
    },

    #[error("Connection failed: {0}")]
    Connect(String),

    /// EHLO/HELO or STARTTLS failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Sender refused: {0}")]
    SenderRefused(String),

    #[error("Message data rejected: {0}")]
    DataRejected(String),

    #[error("Unexpected server response: {0}")]
    UnexpectedResponse(String),

    /// Raised by a registered send override
    #[error("Send override failed: {0}")]
    Override(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Could not fetch {file}: {reason}")]
    Blob { file: String, reason: String },

    #[error("Could not render print format for {doctype} {name}: {reason}")]
    PrintFormat {
        doctype: String,
        name: String,
        reason: String,
    },

    #[error("Malformed message: {0}")]
    Message(String),

    #[error("Could not build unsubscribe link: {0}")]
    UnsubscribeLink(String),
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Email account {0} not found")]
    NotFound(String),

    #[error("No outgoing email account for sender {sender}")]
    NoOutgoingAccount { sender: String },
}

impl DeliveryError {
    /// Transport-class failures degrade the status without touching the retry count
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// SMTP client failures outside a specific protocol step.
///
/// Steps that know what they were doing (RCPT, AUTH, ...) classify replies
/// themselves; this covers the connection-level leftovers.
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Io(e) => Self::Transport(TransportError::Disconnected(e.to_string())),
            ClientError::ConnectionClosed => Self::Transport(TransportError::Disconnected(
                "Connection closed unexpectedly".to_string(),
            )),
            ClientError::TlsError(msg) => Self::Transport(TransportError::Handshake(msg)),
            ClientError::Unsupported(msg) => Self::Transport(TransportError::Handshake(msg)),
            ClientError::UnexpectedResponse { code, message } => {
                Self::Send(SendError::UnexpectedResponse(format!("{code} {message}")))
            }
            ClientError::ParseError(msg) => Self::Send(SendError::UnexpectedResponse(msg)),
            ClientError::Utf8Error(e) => {
                Self::Send(SendError::UnexpectedResponse(format!("UTF-8 decoding error: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let transport: DeliveryError = TransportError::RecipientsRefused {
            recipient: "b@x.com".to_string(),
            code: 550,
            message: "User unknown".to_string(),
        }
        .into();
        assert!(transport.is_transport());

        let send: DeliveryError = SendError::DataRejected("554 spam".to_string()).into();
        assert!(!send.is_transport());

        let render: DeliveryError = RenderError::Message("no headers".to_string()).into();
        assert!(!render.is_transport());
    }

    #[test]
    fn test_client_error_conversion() {
        let err: DeliveryError = ClientError::ConnectionClosed.into();
        assert!(matches!(
            err,
            DeliveryError::Transport(TransportError::Disconnected(_))
        ));

        let err: DeliveryError = ClientError::TlsError("bad cert".to_string()).into();
        assert!(matches!(
            err,
            DeliveryError::Transport(TransportError::Handshake(_))
        ));

        let err: DeliveryError = ClientError::ParseError("garbage".to_string()).into();
        assert!(!err.is_transport());
    }

    #[test]
    fn test_error_display() {
        let err: DeliveryError = TransportError::RecipientsRefused {
            recipient: "b@x.com".to_string(),
            code: 550,
            message: "User unknown".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Transport failure: Recipient b@x.com refused: 550 User unknown"
        );
    }
}
