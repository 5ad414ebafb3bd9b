//! Model catalog and label resolution.
//!
//! The UI shows human-readable model labels; upstream APIs want concrete
//! identifiers. Unknown strings pass through unchanged so user-entered
//! custom models keep working without a catalog update.

use crate::core::providers::Provider;

/// Human label to concrete identifier pairs per provider.
fn label_map(provider: Provider) -> &'static [(&'static str, &'static str)] {
    match provider {
        Provider::OpenAi => &[
            ("GPT-4 Turbo", "gpt-4-turbo"),
            ("GPT-4", "gpt-4"),
            ("GPT-3.5 Turbo", "gpt-3.5-turbo"),
        ],
        Provider::Claude => &[
            ("Claude 3 Opus", "claude-3-opus-20240229"),
            ("Claude 3 Sonnet", "claude-3-sonnet-20240229"),
            ("Claude 3 Haiku", "claude-3-haiku-20240307"),
        ],
        Provider::Gemini => &[
            ("Gemini Pro", "gemini-pro"),
            ("Gemini Pro Vision", "gemini-pro-vision"),
            ("Gemini Ultra", "gemini-ultra"),
        ],
        Provider::Grok => &[("Grok-1", "grok-1"), ("Grok-1.5", "grok-1.5")],
        Provider::DeepSeek => &[
            ("DeepSeek Coder", "deepseek-coder"),
            ("DeepSeek Chat", "deepseek-chat"),
        ],
        Provider::Perplexity => &[
            ("Perplexity Online", "sonar"),
            ("Perplexity Offline", "sonar-reasoning"),
        ],
    }
}

/// Labels offered by the catalog for a provider, in display order.
pub fn model_labels(provider: Provider) -> Vec<&'static str> {
    label_map(provider).iter().map(|(label, _)| *label).collect()
}

/// Map a user-facing label to the identifier the provider's API expects.
///
/// `None` in, `None` out: the caller has to supply its own hard default.
/// Strings outside the label map are treated as already-concrete identifiers
/// and returned unchanged.
pub fn resolve(provider: Provider, label_or_id: Option<&str>) -> Option<String> {
    let label_or_id = label_or_id?;
    let concrete = label_map(provider)
        .iter()
        .find(|(label, _)| *label == label_or_id)
        .map(|(_, id)| *id)
        .unwrap_or(label_or_id);
    Some(concrete.to_string())
}

/// Default concrete model used when a request names no model at all.
pub fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-5",
        Provider::Claude => "claude-sonnet-4-20250514",
        Provider::Gemini => "gemini-2.5-pro",
        Provider::Grok => "grok-4-latest",
        Provider::DeepSeek => "deepseek-chat",
        Provider::Perplexity => "sonar-pro",
    }
}

/// Inexpensive model used for auxiliary calls such as chat title synthesis.
pub fn small_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-5-nano",
        Provider::Claude => "claude-3-5-haiku-20241022",
        Provider::Gemini => "gemini-2.5-flash-lite",
        Provider::Grok => "grok-3-mini",
        Provider::DeepSeek => "deepseek-chat",
        Provider::Perplexity => "sonar",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_resolve_to_concrete_ids() {
        assert_eq!(
            resolve(Provider::OpenAi, Some("GPT-4 Turbo")),
            Some("gpt-4-turbo".to_string())
        );
        assert_eq!(
            resolve(Provider::Claude, Some("Claude 3 Haiku")),
            Some("claude-3-haiku-20240307".to_string())
        );
    }

    #[test]
    fn unknown_strings_pass_through_unchanged() {
        for provider in Provider::ALL {
            assert_eq!(
                resolve(provider, Some("my-custom-model")),
                Some("my-custom-model".to_string())
            );
            // A label belonging to a different provider is not resolved.
            if provider != Provider::OpenAi {
                assert_eq!(
                    resolve(provider, Some("GPT-4 Turbo")),
                    Some("GPT-4 Turbo".to_string())
                );
            }
        }
    }

    #[test]
    fn absent_input_resolves_to_absent() {
        assert_eq!(resolve(Provider::Gemini, None), None);
    }

    #[test]
    fn every_provider_has_default_and_small_models() {
        for provider in Provider::ALL {
            assert!(!default_model(provider).is_empty());
            assert!(!small_model(provider).is_empty());
            assert!(!model_labels(provider).is_empty());
        }
    }
}
