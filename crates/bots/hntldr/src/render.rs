//! Telegram HTML message rendering.

use serde_json::json;

use crate::hn::hn_item_url;
use crate::publisher::DisplayContent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    /// Single row of link buttons
    pub buttons: Vec<Button>,
}

impl RenderedMessage {
    /// `reply_markup` payload for the Bot API
    pub fn reply_markup(&self) -> serde_json::Value {
        let row: Vec<_> = self
            .buttons
            .iter()
            .map(|b| json!({ "text": b.text, "url": b.url }))
            .collect();
        json!({ "inline_keyboard": [row] })
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render_message(content: &DisplayContent, score: u32, comment_count: u32) -> RenderedMessage {
    let mut lines = vec![format!("<b>{}</b>", escape_html(&content.title))];
    if !content.hook.is_empty() {
        lines.push(String::new());
        lines.push(escape_html(&content.hook));
    }
    lines.push(String::new());
    lines.push(format!("<b>{score} points</b>"));

    let hn_url = hn_item_url(&content.item_id);
    let buttons = match content.url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => vec![
            Button {
                text: "Read".into(),
                url: url.to_owned(),
            },
            Button {
                text: format!("{comment_count} Comments"),
                url: hn_url,
            },
        ],
        None => vec![Button {
            text: "Read on HN".into(),
            url: hn_url,
        }],
    };

    RenderedMessage {
        text: lines.join("\n"),
        buttons,
    }
}
