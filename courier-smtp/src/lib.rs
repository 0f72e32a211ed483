//! Async SMTP client for handing queued mail to a relay.
//!
//! ```no_run
//! use courier_smtp::{AuthMechanism, Credentials, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com").await?;
//! client.read_greeting().await?;
//! client.ehlo("courier.example.com").await?;
//! client.starttls().await?;
//! client.ehlo("courier.example.com").await?;
//! client
//!     .authenticate(&Credentials::new("user", "secret"), AuthMechanism::Plain)
//!     .await?;
//! client.mail_from("sender@example.com", None).await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data("Subject: Hello\r\n\r\nHi there").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod response;

pub use auth::{AuthMechanism, Credentials};
pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use response::{Capabilities, ReplyLine, Response};
