//! Digest email rendering.

/// Rendered subject and HTML body for one digest entry.
#[derive(Debug, Clone)]
pub struct Digest {
    pub subject: String,
    pub html: String,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders a digest for `message_count` unread messages from
/// `sender_name`. `previews` holds the most recent message bodies, newest
/// first; the body shows them oldest first.
pub fn render(
    sender_name: &str,
    conversation_subject: Option<&str>,
    message_count: i32,
    previews: &[String],
) -> Digest {
    let subject = if message_count == 1 {
        format!("New message from {sender_name}")
    } else {
        format!("{message_count} new messages from {sender_name}")
    };

    let mut html = String::new();
    html.push_str("<html><body>");
    match conversation_subject {
        Some(topic) => html.push_str(&format!(
            "<p>You have unread messages from <strong>{}</strong> about <em>{}</em>.</p>",
            escape(sender_name),
            escape(topic)
        )),
        None => html.push_str(&format!(
            "<p>You have unread messages from <strong>{}</strong>.</p>",
            escape(sender_name)
        )),
    }
    if !previews.is_empty() {
        html.push_str("<ul>");
        for preview in previews.iter().rev() {
            html.push_str(&format!("<li>{}</li>", escape(preview)));
        }
        html.push_str("</ul>");
    }
    if message_count as usize > previews.len() {
        html.push_str(&format!(
            "<p>...and {} more.</p>",
            message_count as usize - previews.len()
        ));
    }
    html.push_str("<p>Open the app to reply.</p></body></html>");

    Digest { subject, html }
}
