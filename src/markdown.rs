// src/markdown.rs
//! Pure string transforms applied to stored message content before display.
//! No I/O, no state.

use pulldown_cmark::{html, Event, Options, Parser};

/// Markdown to HTML for assistant replies. Raw HTML embedded in the model's
/// output is demoted to text so it renders literally instead of executing.
pub fn render_markdown(content: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(content, options).map(|event| match event {
        Event::Html(raw) => Event::Text(raw),
        Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Minimal HTML escaping for user-authored text interpolated into pages.
pub fn escape_html(content: &str) -> String {
    let mut escaped = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_markdown() {
        let html = render_markdown("Some **bold** text");
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn renders_code_blocks() {
        let html = render_markdown("```\nlet x = 1;\n```");
        assert!(html.contains("<pre><code>"));
    }

    #[test]
    fn raw_html_is_neutralized() {
        let html = render_markdown("hello <script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn escape_html_covers_the_dangerous_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
        assert_eq!(escape_html("plain text"), "plain text");
    }
}
