//! Authentication for skill requests
//!
//! Inbound requests pass through an [`AuthGate`] before anything else looks at them.
//! Outbound requests to a skill are signed with [`AuthCredentials`].

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use hyper::{header::AUTHORIZATION, Request, Response, StatusCode};
use tower_layer::Layer;
use tower_service::Service;

use crate::protocol::error::SkillError;

/// Pluggable authentication provider
///
/// Receives the raw `Authorization` header value, if any, and returns the verdict.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, auth_header: Option<&str>) -> bool;
}

/// Optional authenticator guarding a transport
///
/// Without a provider every request is treated as authenticated.
#[derive(Clone, Default)]
pub struct AuthGate {
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl AuthGate {
    /// A gate that lets every request through
    pub fn open() -> Self {
        Self {
            authenticator: None,
        }
    }

    /// A gate that consults `authenticator`
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator: Some(authenticator),
        }
    }

    pub fn is_open(&self) -> bool {
        self.authenticator.is_none()
    }

    /// Check an `Authorization` header value
    pub async fn check(&self, auth_header: Option<&str>) -> Result<(), SkillError> {
        match &self.authenticator {
            None => Ok(()),
            Some(authenticator) => {
                if authenticator.authenticate(auth_header).await {
                    Ok(())
                } else {
                    tracing::warn!("Rejected unauthenticated skill request");
                    Err(SkillError::Authentication)
                }
            }
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Read the `Authorization` header of a request
pub fn authorization_header<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Layer rejecting unauthenticated HTTP requests with 401 and an empty body
#[derive(Clone, Debug)]
pub struct AuthLayer {
    gate: AuthGate,
}

impl AuthLayer {
    /// Create a new authentication layer
    pub fn new(gate: AuthGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Authentication service
#[derive(Clone, Debug)]
pub struct AuthService<S> {
    inner: S,
    gate: AuthGate,
}

impl<S> Service<Request<Bytes>> for AuthService<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = SkillError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = Response<Bytes>;
    type Error = SkillError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let gate = self.gate.clone();
        // Call the instance poll_ready readied and leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let header = authorization_header(&req);
            if gate.check(header.as_deref()).await.is_err() {
                let mut response = Response::new(Bytes::new());
                *response.status_mut() = StatusCode::UNAUTHORIZED;
                return Ok(response);
            }

            inner.call(req).await
        })
    }
}

/// Credentials used to sign requests sent to a skill
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// Bearer token authentication
    Bearer(String),

    /// API key authentication
    ApiKey { key: String, header: String },

    /// Basic HTTP authentication
    Basic { username: String, password: String },
}

impl AuthCredentials {
    /// Create bearer token credentials
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    /// Create API key credentials
    pub fn api_key(key: impl Into<String>, header: impl Into<String>) -> Self {
        Self::ApiKey {
            key: key.into(),
            header: header.into(),
        }
    }

    /// Create basic auth credentials, e.g. from an app id and password
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Get the header name and value for this credential
    pub fn to_header(&self) -> (String, String) {
        match self {
            AuthCredentials::Bearer(token) => {
                ("Authorization".to_string(), format!("Bearer {}", token))
            }
            AuthCredentials::ApiKey { key, header } => (header.clone(), key.clone()),
            AuthCredentials::Basic { username, password } => {
                let credentials = format!("{}:{}", username, password);
                let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
                ("Authorization".to_string(), format!("Basic {}", encoded))
            }
        }
    }
}
