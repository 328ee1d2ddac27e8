use std::time::Duration;

use serde_json::{Value, json};
use tracing::info;

use super::{MAX_TOOL_OUTPUT, Tool, ToolError, http, json_schema, str_arg, truncate};
use crate::Ctx;
use crate::data::is_url;

/// `scrape_website`: fetch a page and return its readable text.
#[derive(Debug, Clone)]
pub struct ScrapeWebsite {
    timeout: Duration,
    max_chars: usize,
}

impl Default for ScrapeWebsite {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_chars: MAX_TOOL_OUTPUT,
        }
    }
}

impl ScrapeWebsite {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Elements whose content is never readable text.
const SKIPPED: [&str; 4] = ["script", "style", "noscript", "svg"];

/// Tags that end a line of text.
const BLOCK: [&str; 16] = [
    "p", "div", "br", "li", "ul", "ol", "tr", "table", "h1", "h2", "h3", "h4", "h5", "h6",
    "section", "article",
];

/// Strip markup: drop scripts, styles and comments, turn block tags into line
/// breaks, decode common entities and collapse runs of whitespace.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut rest = html;
    let mut skipping: Option<&str> = None;

    while let Some(lt) = rest.find('<') {
        if skipping.is_none() {
            text.push_str(&rest[..lt]);
        }
        rest = &rest[lt..];

        if rest.starts_with("<!--") {
            rest = match rest.find("-->") {
                Some(end) => &rest[end + 3..],
                None => "",
            };
            continue;
        }
        let Some(gt) = rest.find('>') else {
            rest = "";
            break;
        };
        let tag = &rest[1..gt];
        rest = &rest[gt + 1..];

        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match skipping {
            Some(open) if closing && name == open => skipping = None,
            Some(_) => {}
            None => {
                if let Some(skip) = SKIPPED.iter().find(|s| **s == name)
                    && !closing
                    && !tag.ends_with('/')
                {
                    skipping = Some(*skip);
                } else if BLOCK.contains(&name.as_str()) {
                    text.push('\n');
                } else {
                    text.push(' ');
                }
            }
        }
    }
    if skipping.is_none() {
        text.push_str(rest);
    }

    let decoded = decode_entities(&text);
    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

impl Tool for ScrapeWebsite {
    fn name(&self) -> &str {
        "scrape_website"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its text content with markup removed."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            json!({"url": {"type": "string", "description": "Full http(s) URL of the page"}}),
            &["url"],
        )
    }

    fn call(&self, args: &Value, _ctx: &mut Ctx) -> Result<String, ToolError> {
        let url = str_arg(args, "url")?.trim();
        if !is_url(url) {
            return Err(ToolError::InvalidArgs(format!(
                "'{url}' is not an http(s) URL"
            )));
        }
        info!(url, "scraping page");
        let body = http::get_text(url, self.timeout)?;
        let text = html_to_text(&body);
        if text.is_empty() {
            return Ok(format!("No readable text found at {url}"));
        }
        Ok(truncate(&text, self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_scripts_and_comments() {
        let html = r#"<html><head><title>Rates</title><style>p { color: red }</style>
            <script>var x = "<p>nope</p>";</script></head>
            <body><!-- hidden --><h1>Fed holds</h1><p>Rates   stay at
            5.25&ndash;5.5&nbsp;%.</p><ul><li>One</li><li>Two &amp; three</li></ul></body></html>"#;
        let text = html_to_text(html);
        assert!(!text.contains("color"));
        assert!(!text.contains("nope"));
        assert!(!text.contains("hidden"));
        assert!(text.contains("Fed holds"));
        assert!(text.contains("Rates stay at"));
        assert!(text.contains("Two & three"));
        assert!(text.lines().any(|l| l == "One"));
    }

    #[test]
    fn self_closing_skipped_tag_does_not_swallow_page() {
        assert_eq!(html_to_text("<svg/><p>kept</p>"), "kept");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(html_to_text("  just   text "), "just text");
    }

    #[test]
    fn non_http_urls_are_refused() {
        let mut ctx = Ctx::new();
        let err = ScrapeWebsite::default()
            .call(&json!({"url": "file:///etc/passwd"}), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[test]
    fn unreachable_host_is_http_error() {
        let mut ctx = Ctx::new();
        let tool = ScrapeWebsite::default().with_timeout(Duration::from_secs(2));
        let err = tool.call(&json!({"url": "http://localhost:1/"}), &mut ctx).unwrap_err();
        assert!(matches!(err, ToolError::Http(_)));
    }
}
