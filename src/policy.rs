use crate::config::ModerationSettings;
use crate::forum::{ModeratorActions, Post, SYSTEM_USER_ID};
use crate::response::ScoreResult;

/// True iff `score` is strictly above `threshold`.
pub fn decide(score: f64, threshold: f64) -> bool {
    score > threshold
}

/// Raise a moderator notification when the score passes the flag threshold.
/// Returns whether a flag was raised.
pub fn flag_on_scores(
    settings: &ModerationSettings,
    score: ScoreResult,
    post: &Post,
    actions: &dyn ModeratorActions,
) -> anyhow::Result<bool> {
    if !decide(score.score, settings.flag_post_min_toxicity) {
        return Ok(false);
    }
    let message = settings
        .flag_message
        .replace("{score}", &format!("{:.2}", score.score));
    actions.notify_moderators(post, SYSTEM_USER_ID, &message)?;
    Ok(true)
}

/// Submit-time warning decision: the score to show the author, if any.
pub fn warn_on_scores(settings: &ModerationSettings, score: ScoreResult) -> Option<ScoreResult> {
    decide(score.score, settings.notify_posting_min_toxicity).then_some(score)
}

/// Whether the author-facing check runs at all for a draft.
pub fn submit_check_required(
    settings: &ModerationSettings,
    private_message: bool,
    read_restricted: bool,
) -> bool {
    if !settings.enabled || !settings.notify_posting_min_toxicity_enable {
        return false;
    }
    let bypass_private = private_message && !settings.check_private_message;
    let bypass_secured = read_restricted && !settings.check_secured_categories;
    !(bypass_private || bypass_secured)
}

/// State of a draft submission going through the toxicity warning.
///
/// The composer lives in the host UI; this is the transition table it
/// follows, exported for hosts that embed the crate. The check endpoint
/// answers `CheckCompleted`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmitCheck {
    PendingCheck,
    /// Score came back over the warn threshold; waiting for the author.
    Warned(ScoreResult),
    /// Author went back to edit the draft.
    Blocked,
    /// Draft is submitted.
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmitEvent {
    /// Check endpoint answered; `Some` carries a score above the threshold.
    CheckCompleted(Option<ScoreResult>),
    /// Check endpoint could not be reached. Never blocks the post.
    CheckFailed,
    AuthorEdits,
    AuthorContinues,
}

impl SubmitCheck {
    pub fn on_event(self, event: SubmitEvent) -> SubmitCheck {
        match (self, event) {
            (SubmitCheck::PendingCheck, SubmitEvent::CheckCompleted(Some(score))) => {
                SubmitCheck::Warned(score)
            }
            (SubmitCheck::PendingCheck, SubmitEvent::CheckCompleted(None))
            | (SubmitCheck::PendingCheck, SubmitEvent::CheckFailed) => SubmitCheck::Confirmed,
            (SubmitCheck::Warned(_), SubmitEvent::AuthorEdits) => SubmitCheck::Blocked,
            (SubmitCheck::Warned(_), SubmitEvent::AuthorContinues) => SubmitCheck::Confirmed,
            (state, event) => {
                log::debug!("Ignoring {event:?} in submit state {state:?}");
                state
            }
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, SubmitCheck::Blocked | SubmitCheck::Confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forum::MemoryForum;

    fn settings() -> ModerationSettings {
        ModerationSettings {
            flag_post_min_toxicity: 0.5,
            notify_posting_min_toxicity: 0.7,
            flag_message: "Possibly uncivil ({score})".to_string(),
            ..ModerationSettings::default()
        }
    }

    fn post() -> Post {
        Post {
            id: 11,
            user_id: Some(2),
            raw: "you are a clown".to_string(),
            ..Post::default()
        }
    }

    #[test]
    fn test_decide_is_strict() {
        assert!(decide(0.51, 0.5));
        assert!(!decide(0.5, 0.5));
        assert!(!decide(0.0, 0.0));
        assert!(decide(1.0, 0.99));
    }

    #[test]
    fn test_flags_when_threshold_exceeded() {
        let forum = MemoryForum::default();
        let flagged = flag_on_scores(&settings(), ScoreResult { score: 0.99 }, &post(), &forum).unwrap();
        assert!(flagged);

        let flags = forum.flags().unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].post_id, 11);
        assert_eq!(flags[0].actor_id, SYSTEM_USER_ID);
        assert_eq!(flags[0].message, "Possibly uncivil (0.99)");
    }

    #[test]
    fn test_zero_score_never_flags() {
        let forum = MemoryForum::default();
        let flagged = flag_on_scores(&settings(), ScoreResult::default(), &post(), &forum).unwrap();
        assert!(!flagged);
        assert!(forum.flags().unwrap().is_empty());
    }

    #[test]
    fn test_warn_threshold() {
        assert_eq!(warn_on_scores(&settings(), ScoreResult { score: 0.7 }), None);
        assert_eq!(
            warn_on_scores(&settings(), ScoreResult { score: 0.9 }),
            Some(ScoreResult { score: 0.9 })
        );
    }

    #[test]
    fn test_submit_check_bypass() {
        let settings = settings();
        assert!(submit_check_required(&settings, false, false));
        assert!(!submit_check_required(&settings, true, false));
        assert!(!submit_check_required(&settings, false, true));

        let mut open = settings.clone();
        open.check_private_message = true;
        open.check_secured_categories = true;
        assert!(submit_check_required(&open, true, true));

        let mut off = settings;
        off.notify_posting_min_toxicity_enable = false;
        assert!(!submit_check_required(&off, false, false));
    }

    #[test]
    fn test_submit_flow_warned_then_continue() {
        let score = ScoreResult { score: 0.9 };
        let state = SubmitCheck::PendingCheck.on_event(SubmitEvent::CheckCompleted(Some(score)));
        assert_eq!(state, SubmitCheck::Warned(score));
        assert!(!state.is_final());

        // a second completion does not re-trigger the check
        let state = state.on_event(SubmitEvent::CheckCompleted(None));
        assert_eq!(state, SubmitCheck::Warned(score));

        assert_eq!(state.on_event(SubmitEvent::AuthorContinues), SubmitCheck::Confirmed);
        assert_eq!(state.on_event(SubmitEvent::AuthorEdits), SubmitCheck::Blocked);
    }

    #[test]
    fn test_submit_flow_failures_never_block() {
        assert_eq!(
            SubmitCheck::PendingCheck.on_event(SubmitEvent::CheckFailed),
            SubmitCheck::Confirmed
        );
        assert_eq!(
            SubmitCheck::PendingCheck.on_event(SubmitEvent::CheckCompleted(None)),
            SubmitCheck::Confirmed
        );
        assert_eq!(
            SubmitCheck::Confirmed.on_event(SubmitEvent::AuthorEdits),
            SubmitCheck::Confirmed
        );
    }
}
