use std::convert::Infallible;
use std::fmt;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use ddc_types::NamespaceId;

/// The caller of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".into(),
        }
    }

    pub fn bearer(token: &str) -> Self {
        let prefix: String = token.chars().take(8).collect();
        Self {
            name: format!("bearer:{prefix}"),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.name == "anonymous"
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        Ok(token.map_or_else(Identity::anonymous, Identity::bearer))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
    Admin,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
        })
    }
}

/// Per-namespace authorization, consulted by every handler.
#[async_trait]
pub trait NamespaceAccess: Send + Sync {
    async fn has_access(&self, identity: &Identity, namespace: &NamespaceId, actions: &[Action]) -> bool;
}

pub struct AllowAll;

#[async_trait]
impl NamespaceAccess for AllowAll {
    async fn has_access(&self, _identity: &Identity, _namespace: &NamespaceId, _actions: &[Action]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn identity_of(request: Request<()>) -> Identity {
        let (mut parts, _) = request.into_parts();
        Identity::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn missing_header_is_anonymous() {
        let id = identity_of(Request::new(())).await;
        assert!(id.is_anonymous());
    }

    #[tokio::test]
    async fn bearer_token_names_identity() {
        let request = Request::builder()
            .header(AUTHORIZATION, "Bearer mytoken123")
            .body(())
            .unwrap();
        let id = identity_of(request).await;
        assert_eq!(id.name, "bearer:mytoken");
    }

    #[tokio::test]
    async fn other_schemes_are_anonymous() {
        let request = Request::builder()
            .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap();
        assert!(identity_of(request).await.is_anonymous());
    }

    #[tokio::test]
    async fn allow_all_allows() {
        let ns = NamespaceId::new("ns").unwrap();
        assert!(
            AllowAll
                .has_access(&Identity::anonymous(), &ns, &[Action::Admin])
                .await
        );
    }

    #[test]
    fn action_display() {
        assert_eq!(Action::Read.to_string(), "read");
        assert_eq!(Action::Delete.to_string(), "delete");
    }
}
