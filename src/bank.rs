//! Bank lookup by name.

use std::fmt;
use std::str::FromStr;

use psd2_client::{ConfigOverrides, Credentials};
use tracing::debug;

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("Unknown bank '{0}'. Supported banks: {supported}", supported = Bank::supported())]
    UnknownBank(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Integration error: {0}")]
    Integration(String),
}

impl From<psd2_client::Error> for Error {
    fn from(err: psd2_client::Error) -> Self {
        Error {
            kind: ErrorKind::Client(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sbanken")]
impl From<psd2_sbanken::Error> for Error {
    fn from(err: psd2_sbanken::Error) -> Self {
        Error {
            kind: ErrorKind::Integration(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Banks with an integration compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Bank {
    #[cfg(feature = "sbanken")]
    SBanken,
}

impl Bank {
    /// Every compiled-in bank.
    pub const ALL: &'static [Bank] = &[
        #[cfg(feature = "sbanken")]
        Bank::SBanken,
    ];

    /// Lower-case lookup name.
    pub fn name(&self) -> &'static str {
        match *self {
            #[cfg(feature = "sbanken")]
            Bank::SBanken => "sbanken",
        }
    }

    fn supported() -> String {
        Self::ALL
            .iter()
            .map(Bank::name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build the integration for this bank.
    pub async fn connect(
        self,
        credentials: Credentials,
        config: ConfigOverrides,
    ) -> Result<Integration> {
        debug!(bank = self.name(), "Connecting bank integration");
        match self {
            #[cfg(feature = "sbanken")]
            Bank::SBanken => Ok(Integration::SBanken(
                psd2_sbanken::SBanken::new(credentials, config).await?,
            )),
        }
    }
}

impl FromStr for Bank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|bank| bank.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::new(ErrorKind::UnknownBank(s.to_string())))
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A connected bank integration.
#[derive(Debug)]
#[non_exhaustive]
pub enum Integration {
    #[cfg(feature = "sbanken")]
    SBanken(psd2_sbanken::SBanken),
}

impl Integration {
    pub fn bank(&self) -> Bank {
        match *self {
            #[cfg(feature = "sbanken")]
            Integration::SBanken(_) => Bank::SBanken,
        }
    }

    /// The shared core client.
    pub fn client_mut(&mut self) -> &mut psd2_client::BankClient {
        match *self {
            #[cfg(feature = "sbanken")]
            Integration::SBanken(ref mut bank) => bank.client_mut(),
        }
    }

    #[cfg(feature = "sbanken")]
    pub fn into_sbanken(self) -> Option<psd2_sbanken::SBanken> {
        match self {
            Integration::SBanken(bank) => Some(bank),
        }
    }
}

/// Look up `bank` by name (case-insensitive) and connect it.
pub async fn connect(
    bank: &str,
    credentials: Credentials,
    config: ConfigOverrides,
) -> Result<Integration> {
    bank.parse::<Bank>()?.connect(credentials, config).await
}

#[cfg(all(test, feature = "sbanken"))]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!("SBanken".parse::<Bank>().unwrap(), Bank::SBanken);
        assert_eq!(" sbanken ".parse::<Bank>().unwrap(), Bank::SBanken);
        assert_eq!(Bank::SBanken.to_string(), "sbanken");
    }

    #[tokio::test]
    async fn test_connected_integration_exposes_core_client() {
        let mut integration = connect(
            "sbanken",
            Credentials::new("id", "secret"),
            ConfigOverrides::default().with_batch_concurrency(4),
        )
        .await
        .unwrap();

        assert_eq!(integration.bank(), Bank::SBanken);
        let client = integration.client_mut();
        assert!(client.token().is_none());
        assert_eq!(client.get_configuration().batch_concurrency, 4);
        assert!(integration.into_sbanken().is_some());
    }

    #[test]
    fn test_unknown_bank() {
        let err = "dnb".parse::<Bank>().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownBank(ref name) if name == "dnb"));
        assert!(err.to_string().contains("sbanken"));
    }
}
