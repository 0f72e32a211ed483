use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Delivery state of a queue record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum QueueStatus {
    #[default]
    NotSent,
    Sending,
    Sent,
    PartiallySent,
    Error,
    PartiallyErrored,
}

impl QueueStatus {
    /// Statuses the scheduler may pick up without operator intervention
    #[must_use]
    pub const fn is_to_be_sent(self) -> bool {
        matches!(self, Self::NotSent | Self::PartiallySent)
    }

    /// No further automatic retry happens once a record lands here
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Error | Self::PartiallyErrored)
    }

    /// Only errored records can be revived by an explicit retry
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Error | Self::PartiallyErrored)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotSent => "Not Sent",
            Self::Sending => "Sending",
            Self::Sent => "Sent",
            Self::PartiallySent => "Partially Sent",
            Self::Error => "Error",
            Self::PartiallyErrored => "Partially Errored",
        }
    }
}

impl Display for QueueStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised: String = value
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalised.as_str() {
            "notsent" => Ok(Self::NotSent),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "partiallysent" => Ok(Self::PartiallySent),
            "error" => Ok(Self::Error),
            "partiallyerrored" => Ok(Self::PartiallyErrored),
            _ => Err(format!("Unknown queue status: {value}")),
        }
    }
}

/// Per-address delivery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RecipientStatus {
    #[default]
    NotSent,
    Sent,
}

impl Display for RecipientStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::NotSent => "Not Sent",
            Self::Sent => "Sent",
        })
    }
}

/// Where the full recipient list is revealed to each recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExposeRecipients {
    #[default]
    None,
    Header,
    Footer,
}
