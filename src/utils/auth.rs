//! Provider-specific authentication headers for upstream requests.

use crate::core::providers::Provider;

/// Attach the authentication headers a provider's API expects.
///
/// Anthropic wants `x-api-key` plus a pinned `anthropic-version`; Google
/// takes the key in `x-goog-api-key`; everyone else speaks standard
/// `Authorization: Bearer`.
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    provider: Provider,
    api_key: &str,
) -> reqwest::RequestBuilder {
    match provider {
        Provider::Claude => request
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01"),
        Provider::Gemini => request.header("x-goog-api-key", api_key),
        Provider::OpenAi | Provider::Grok | Provider::DeepSeek | Provider::Perplexity => {
            request.header("Authorization", format!("Bearer {api_key}"))
        }
    }
}
