use std::collections::BTreeMap;
use std::sync::Arc;

use crate::credentials::CredentialSource;

pub const AUTHORIZATION: &str = "Authorization";

/// Builds the header set attached to every private-channel authorization
/// request.
///
/// Headers are recomputed on each call so token rotation takes effect
/// immediately. Additional headers are merged after the generated
/// `Authorization` header and win on key collision.
#[derive(Clone)]
pub struct ConnectionAuthorizer {
    credentials: Arc<dyn CredentialSource>,
    additional_headers: BTreeMap<String, String>,
}

impl ConnectionAuthorizer {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        additional_headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            credentials,
            additional_headers,
        }
    }

    /// The headers for one authorization request.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if let Some(token) = self.credentials.current_token() {
            headers.insert(AUTHORIZATION.to_string(), token);
        }
        headers.extend(
            self.additional_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        headers
    }

    /// Attach the headers to an outgoing request.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        self.headers()
            .into_iter()
            .fold(request, |request, (name, value)| request.header(name, value))
    }
}

impl std::fmt::Debug for ConnectionAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAuthorizer")
            .field(
                "additional_headers",
                &self.additional_headers.keys().collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
