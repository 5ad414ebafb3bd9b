//! The closed set of supported upstream providers.
//!
//! Every switch over providers in the crate is an exhaustive `match` on
//! [`Provider`], so adding a seventh provider is a compile-driven change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the six supported upstream LLM APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Provider {
    OpenAi,
    Claude,
    Gemini,
    Grok,
    DeepSeek,
    Perplexity,
}

/// How a provider's completion API is spoken on the wire.
///
/// Four of the six providers expose an OpenAI-compatible surface and differ
/// only in base URL; that sharing is deliberate and part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFlavor {
    /// `{base}/chat/completions` with `Authorization: Bearer`.
    OpenAiCompatible { base_url: &'static str },
    /// Anthropic's messages API with `x-api-key` authentication.
    Anthropic { base_url: &'static str },
    /// Google's Gemini `streamGenerateContent` API.
    Gemini { base_url: &'static str },
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::OpenAi,
        Provider::Claude,
        Provider::Gemini,
        Provider::Grok,
        Provider::DeepSeek,
        Provider::Perplexity,
    ];

    /// Order in which providers are tried for auxiliary title generation.
    pub const TITLE_PRIORITY: [Provider; 6] = [
        Provider::OpenAi,
        Provider::Gemini,
        Provider::Claude,
        Provider::Perplexity,
        Provider::DeepSeek,
        Provider::Grok,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::Grok => "grok",
            Provider::DeepSeek => "deepseek",
            Provider::Perplexity => "perplexity",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Claude => "Claude",
            Provider::Gemini => "Gemini",
            Provider::Grok => "Grok",
            Provider::DeepSeek => "DeepSeek",
            Provider::Perplexity => "Perplexity",
        }
    }

    pub fn wire_flavor(self) -> WireFlavor {
        match self {
            Provider::OpenAi => WireFlavor::OpenAiCompatible {
                base_url: "https://api.openai.com/v1",
            },
            Provider::Grok => WireFlavor::OpenAiCompatible {
                base_url: "https://api.x.ai/v1",
            },
            Provider::DeepSeek => WireFlavor::OpenAiCompatible {
                base_url: "https://api.deepseek.com",
            },
            Provider::Perplexity => WireFlavor::OpenAiCompatible {
                base_url: "https://api.perplexity.ai",
            },
            Provider::Claude => WireFlavor::Anthropic {
                base_url: "https://api.anthropic.com/v1",
            },
            Provider::Gemini => WireFlavor::Gemini {
                base_url: "https://generativelanguage.googleapis.com/v1beta",
            },
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "openai" => Ok(Provider::OpenAi),
            "claude" => Ok(Provider::Claude),
            "gemini" => Ok(Provider::Gemini),
            "grok" => Ok(Provider::Grok),
            "deepseek" => Ok(Provider::DeepSeek),
            "perplexity" => Ok(Provider::Perplexity),
            _ => Err(format!("unsupported provider: {value}")),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_round_trip() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>(), Ok(provider));
        }
    }

    #[test]
    fn unknown_identifiers_are_rejected() {
        assert!("mistral".parse::<Provider>().is_err());
        assert!("OPENAI".parse::<Provider>().is_err());
        assert!("".parse::<Provider>().is_err());
    }

    #[test]
    fn openai_compatible_providers_differ_only_in_base_url() {
        let compat_bases: Vec<&str> = Provider::ALL
            .iter()
            .filter_map(|p| match p.wire_flavor() {
                WireFlavor::OpenAiCompatible { base_url } => Some(base_url),
                _ => None,
            })
            .collect();
        assert_eq!(
            compat_bases,
            vec![
                "https://api.openai.com/v1",
                "https://api.x.ai/v1",
                "https://api.deepseek.com",
                "https://api.perplexity.ai",
            ]
        );
    }

    #[test]
    fn serde_uses_canonical_identifiers() {
        let encoded = serde_json::to_string(&Provider::DeepSeek).unwrap();
        assert_eq!(encoded, "\"deepseek\"");
        let decoded: Provider = serde_json::from_str("\"perplexity\"").unwrap();
        assert_eq!(decoded, Provider::Perplexity);
    }
}
