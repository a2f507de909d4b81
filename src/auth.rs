use reqwest::RequestBuilder;

/// Credentials for the hosted database REST API.
///
/// The project key is sent twice, as the `apikey` header and as a bearer
/// token, which is what the gateway expects from anonymous/publishable clients.
#[derive(Clone)]
pub struct SupabaseAuth {
    api_key: String,
}

impl SupabaseAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Attach the authentication headers to a request
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Key prefix safe to print in logs
    pub fn masked_key(&self) -> String {
        let visible: String = self.api_key.chars().take(8).collect();
        format!("{}…", visible)
    }

    /// Publishable keys are preferred; legacy anon keys are JWTs
    pub fn is_legacy_jwt(&self) -> bool {
        self.api_key.starts_with("eyJ")
    }
}

// Never print the key itself
impl std::fmt::Debug for SupabaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAuth")
            .field("api_key", &self.masked_key())
            .finish()
    }
}
