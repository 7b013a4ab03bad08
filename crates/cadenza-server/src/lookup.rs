//! The outbound lookup collaborator: auth, chart, and record queries.
//!
//! The server never stores accounts, charts, or scores itself — it asks an
//! external service and acts on the answer. This module defines that seam
//! as a trait so deployments can plug in their HTTP client while tests and
//! development use an in-process stand-in.

use crate::room::{Chart, Record};

/// Language of a user's client, as an index into the locale bundles
/// (0 = en-US, 1 = zh-CN, 2 = zh-TW).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Language(pub u8);

impl Language {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "zh-CN" => Self(1),
            "zh-TW" => Self(2),
            _ => Self(0),
        }
    }
}

/// What the auth service says about a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub id: i32,
    pub name: String,
    pub lang: Language,
}

/// Errors from the lookup collaborator.
///
/// The distinction matters for logging only; either way the client gets
/// the message back as a failed acknowledgement.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The service answered and said no (bad token, unknown chart, ...).
    #[error("{0}")]
    Rejected(String),

    /// The service could not be reached or gave a malformed answer.
    #[error("lookup unavailable: {0}")]
    Unavailable(String),
}

/// Resolves tokens, charts, and play records against an external service.
///
/// Implementations must be cheap to call concurrently; the server invokes
/// them from many session tasks at once.
pub trait Lookup: Send + Sync + 'static {
    /// Validates an auth token and returns who it belongs to.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<AuthInfo, LookupError>> + Send;

    /// Resolves a chart id to its metadata.
    fn chart(
        &self,
        id: i32,
    ) -> impl std::future::Future<Output = Result<Chart, LookupError>> + Send;

    /// Fetches the play record one user just uploaded for one chart.
    fn record(
        &self,
        chart: i32,
        player: i32,
    ) -> impl std::future::Future<Output = Result<Record, LookupError>> + Send;
}

/// Development stand-in: any numeric token authenticates as that user id.
///
/// Charts and records are synthesized on demand. Never deploy this — wire
/// the real HTTP client in instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevLookup;

impl Lookup for DevLookup {
    async fn authenticate(&self, token: &str) -> Result<AuthInfo, LookupError> {
        let id: i32 = token
            .parse()
            .map_err(|_| LookupError::Rejected("invalid token".into()))?;
        Ok(AuthInfo {
            id,
            name: format!("player{id}"),
            lang: Language::default(),
        })
    }

    async fn chart(&self, id: i32) -> Result<Chart, LookupError> {
        Ok(Chart {
            id,
            name: format!("chart{id}"),
        })
    }

    async fn record(&self, chart: i32, player: i32) -> Result<Record, LookupError> {
        Ok(Record {
            player,
            chart,
            ..Record::default()
        })
    }
}
