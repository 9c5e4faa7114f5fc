//! Reply composition: prompt template and the outgoing draft.

/// Used as the reply body when the completion service fails.
pub const DEFAULT_FALLBACK_REPLY: &str = "I'm unable to reply right now due to an error.";

/// A reply ready to hand to the mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDraft {
    pub subject: String,
    pub body: String,
}

/// Build the completion prompt for one inbound email.
///
/// Pure string formatting: the same inputs always give the same prompt.
pub fn compose_prompt(
    sender_name: &str,
    sender_address: &str,
    subject: &str,
    body: &str,
    self_name: &str,
) -> String {
    format!(
        "Reply to this email from: {sender_name} ({sender_address}).\n\
         Subject: {subject}\n\n\
         Original message:\n{body}\n\n\
         Your reply as {self_name}:\n\
         Reply with an informational and friendly message."
    )
}

/// Wrap model output into a reply. The text is sent as-is.
pub fn format_reply(subject: &str, model_text: &str) -> ReplyDraft {
    ReplyDraft {
        subject: format!("Re: {subject}"),
        body: model_text.to_string(),
    }
}
