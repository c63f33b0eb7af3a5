use crate::config::ModerationSettings;
use url::Url;

/// Read-only view of a content item as seen by the eligibility rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityContext<'a> {
    pub user_id: Option<i64>,
    pub raw: &'a str,
    pub private_message: bool,
    pub read_restricted: bool,
    pub topic_trashed: bool,
}

/// Decide whether a content item is worth a remote scoring call. Shared by
/// the live hooks and the backfill scanner.
pub fn should_check_post(settings: &ModerationSettings, post: &EligibilityContext<'_>) -> bool {
    if !settings.enabled {
        return false;
    }
    if post.raw.trim().is_empty() {
        return false;
    }
    if post.private_message && !settings.check_private_message {
        return false;
    }
    // system, bot and anonymous authors
    if post.user_id.unwrap_or(0) <= 0 {
        return false;
    }
    if post.read_restricted && !settings.check_secured_categories {
        return false;
    }
    if post.topic_trashed {
        return false;
    }

    // bare links are covered by the host's link limits
    !is_single_uri(post.raw.trim())
}

fn is_single_uri(stripped: &str) -> bool {
    !stripped.chars().any(char::is_whitespace) && Url::parse(stripped).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ModerationSettings {
        ModerationSettings {
            enabled: true,
            check_private_message: false,
            check_secured_categories: false,
            ..ModerationSettings::default()
        }
    }

    fn post(raw: &str) -> EligibilityContext<'_> {
        EligibilityContext {
            user_id: Some(12),
            raw,
            ..EligibilityContext::default()
        }
    }

    #[test]
    fn test_regular_post_is_checked() {
        assert!(should_check_post(&settings(), &post("everyone is a doo-doo head!")));
    }

    #[test]
    fn test_disabled_moderation() {
        let mut settings = settings();
        settings.enabled = false;
        assert!(!should_check_post(&settings, &post("everyone is a doo-doo head!")));
    }

    #[test]
    fn test_blank_post() {
        assert!(!should_check_post(&settings(), &post("")));
        assert!(!should_check_post(&settings(), &post("  \n\t ")));
    }

    #[test]
    fn test_private_message_toggle() {
        let mut settings = settings();
        let message = EligibilityContext {
            private_message: true,
            ..post("you are awful")
        };
        assert!(!should_check_post(&settings, &message));
        settings.check_private_message = true;
        assert!(should_check_post(&settings, &message));
    }

    #[test]
    fn test_system_and_anonymous_authors() {
        for user_id in [Some(-1), Some(0), None] {
            let system = EligibilityContext {
                user_id,
                ..post("Welcome to the forum")
            };
            assert!(!should_check_post(&settings(), &system));
        }
    }

    #[test]
    fn test_secured_category_toggle() {
        let mut settings = settings();
        let secured = EligibilityContext {
            read_restricted: true,
            ..post("you are awful")
        };
        assert!(!should_check_post(&settings, &secured));
        settings.check_secured_categories = true;
        assert!(should_check_post(&settings, &secured));
    }

    #[test]
    fn test_trashed_topic() {
        let trashed = EligibilityContext {
            topic_trashed: true,
            ..post("you are awful")
        };
        assert!(!should_check_post(&settings(), &trashed));
    }

    #[test]
    fn test_single_link_posts_are_skipped() {
        assert!(!should_check_post(&settings(), &post("https://www.google.com")));
        assert!(!should_check_post(&settings(), &post("  https://www.google.com/search?q=x \n")));
        assert!(!should_check_post(&settings(), &post("mailto:admin@example.com")));
    }

    #[test]
    fn test_links_with_text_are_checked() {
        assert!(should_check_post(
            &settings(),
            &post("look at this garbage https://www.google.com")
        ));
        assert!(should_check_post(&settings(), &post("https://example.com/a is trash")));
        assert!(should_check_post(&settings(), &post("idiot")));
    }
}
