//! `courier` command line
//!
//! Each subcommand drives one dispatcher operation against the configured
//! record store and prints a short report.

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use courier_common::{ADMINISTRATOR, NewQueueRecord, QueueId, QueueStatus, internal};
use courier_delivery::{Dispatcher, FlushSummary};

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Deliver queued email over SMTP", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file, overriding the usual search locations
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attempt delivery of a record as a background job would
    Send {
        /// Queue record to send
        id: QueueId,
    },
    /// Attempt delivery of a record in the foreground
    SendNow {
        /// Queue record to send
        id: QueueId,
    },
    /// Reset an errored record so the next flush picks it up
    Retry {
        /// Queue record to revive
        id: QueueId,
    },
    /// Send every due record in priority order
    Flush {
        /// Maximum number of records to attempt
        #[arg(long)]
        limit: Option<usize>,

        /// Keep flushing, pausing this many seconds between batches
        #[arg(long)]
        every: Option<u64>,
    },
    /// Queue a new record described by a RON file
    Enqueue {
        /// File holding a `NewQueueRecord`
        file: PathBuf,

        /// Send immediately after queueing
        #[arg(long)]
        now: bool,
    },
    /// Print a record
    Show {
        /// Queue record to print
        id: QueueId,
    },
    /// Remove a record from the queue
    Delete {
        /// Queue record to delete
        id: QueueId,

        /// Principal requesting the deletion
        #[arg(long, default_value = ADMINISTRATOR)]
        principal: String,
    },
}

fn report_status(id: &QueueId, status: Option<QueueStatus>) {
    match status {
        Some(status) => println!("{id}: {status}"),
        None => println!("{id}: not eligible to send"),
    }
}

fn report_flush(summary: &FlushSummary) {
    println!("Attempted: {}", summary.attempted());
    for (status, count) in &summary.statuses {
        println!("  {status}: {count}");
    }
    if summary.skipped > 0 {
        println!("Skipped: {}", summary.skipped);
    }
    if summary.failed > 0 {
        println!("Failed to start: {}", summary.failed);
    }
}

async fn flush_every(
    dispatcher: &Dispatcher,
    limit: Option<usize>,
    interval: Duration,
) -> anyhow::Result<()> {
    loop {
        let summary = dispatcher.flush(limit).await?;
        if summary.attempted() > 0 || summary.failed > 0 {
            report_flush(&summary);
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "CTRL+C entered, stopping flush loop");
                return Ok(());
            }
        }
    }
}

impl Commands {
    /// Run this command against `dispatcher`
    ///
    /// # Errors
    /// Returns an error if the underlying dispatcher operation fails, or the
    /// enqueue file cannot be read.
    pub async fn execute(self, dispatcher: &Dispatcher) -> anyhow::Result<()> {
        match self {
            Self::Send { id } => report_status(&id, dispatcher.send(&id, true).await?),
            Self::SendNow { id } => report_status(&id, dispatcher.send_now(&id).await?),
            Self::Retry { id } => {
                if dispatcher.retry(&id).await? {
                    println!("{id}: queued for retry");
                } else {
                    println!("{id}: only errored records can be retried");
                }
            }
            Self::Flush { limit, every } => match every {
                Some(seconds) => {
                    flush_every(dispatcher, limit, Duration::from_secs(seconds.max(1))).await?;
                }
                None => report_flush(&dispatcher.flush(limit).await?),
            },
            Self::Enqueue { file, now } => {
                let content = tokio::fs::read_to_string(&file).await.map_err(|e| {
                    anyhow::anyhow!("Failed to read {}: {e}", file.display())
                })?;
                let data: NewQueueRecord = ron::from_str(&content)?;

                let Some(id) = dispatcher.enqueue(data).await? else {
                    anyhow::bail!("{} has no recipients, nothing queued", file.display());
                };
                println!("{id}");

                if now {
                    report_status(&id, dispatcher.send_now(&id).await?);
                }
            }
            Self::Show { id } => {
                let record = dispatcher.store().get(&id).await?;
                println!(
                    "{}",
                    ron::ser::to_string_pretty(&record, ron::ser::PrettyConfig::default())?
                );
            }
            Self::Delete { id, principal } => {
                dispatcher.delete(&id, &principal).await?;
                println!("{id}: deleted");
            }
        }

        Ok(())
    }
}
