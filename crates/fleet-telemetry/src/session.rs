// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub use reqwest::header::{HeaderMap, HeaderValue};
use std::fmt::Debug;
use std::sync::Arc;
use std::{future::Future, pin::Pin};
use tokio::sync::OnceCell;

/// Credentials and region for calls against the remote store.
///
/// `headers` are attached verbatim to every request the delivery clients make.
#[derive(Clone, Default)]
pub struct Session {
    pub region: String,
    pub headers: HeaderMap,
}

impl Session {
    #[must_use]
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("region", &self.region)
            .field("headers", &self.headers.len())
            .finish()
    }
}

pub type SessionResolverFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Option<Session>> + Send>> + Send + Sync>;

#[derive(Clone)]
pub enum SessionFactory {
    Static(Session),
    Dynamic {
        resolver_fn: SessionResolverFn,
        session: Arc<OnceCell<Session>>,
    },
}

impl SessionFactory {
    pub fn new_from_resolver(resolver_fn: SessionResolverFn) -> Self {
        Self::Dynamic {
            resolver_fn,
            session: Arc::new(OnceCell::new()),
        }
    }

    #[must_use]
    pub fn new_from_static(session: Session) -> Self {
        Self::Static(session)
    }

    /// Returns `None` when the resolver could not produce a session.
    ///
    /// Only a resolved session is cached; after a failure the next call asks
    /// the resolver again.
    pub async fn get_session(&self) -> Option<&Session> {
        match self {
            Self::Static(session) => Some(session),
            Self::Dynamic {
                resolver_fn,
                session,
            } => session
                .get_or_try_init(|| async { (resolver_fn)().await.ok_or(()) })
                .await
                .ok(),
        }
    }
}

impl Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionFactory")
    }
}
