use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{File, Image, Item, Text, Video};

static YOUTUBE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{6,})",
    )
    .expect("youtube pattern is valid")
});

static VIMEO_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.|player\.)?vimeo\.com/(?:video/)?(\d+)")
        .expect("vimeo pattern is valid")
});

/// What a fragment needs to know about the deployment it is rendered for.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub media_url: String,
}

impl RenderContext {
    pub fn new(media_url: impl Into<String>) -> Self {
        Self {
            media_url: media_url.into(),
        }
    }

    fn media(&self, path: &str) -> String {
        format!("{}{}", self.media_url, path.trim_start_matches('/'))
    }
}

impl Item {
    /// Renders the item as an HTML fragment tagged with its kind.
    pub fn render(&self, ctx: &RenderContext) -> String {
        let body = match self {
            Item::Text(text) => render_text(text),
            Item::File(file) => render_file(file, ctx),
            Item::Image(image) => render_image(image, ctx),
            Item::Video(video) => render_video(video),
        };
        let kind = self.kind();

        format!(
            r#"<div class="content content-{kind}" data-kind="{kind}">{body}</div>"#,
            kind = kind.as_str(),
            body = body
        )
    }
}

fn render_text(text: &Text) -> String {
    let paragraphs: Vec<String> = text
        .content
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.lines().map(escape_html).collect();
            format!("<p>{}</p>", lines.join("<br>"))
        })
        .collect();

    format!(
        "<h2>{}</h2>{}",
        escape_html(&text.base.title),
        paragraphs.concat()
    )
}

fn render_file(file: &File, ctx: &RenderContext) -> String {
    format!(
        r#"<p><a href="{}" class="button light">Download file</a></p>"#,
        escape_html(&ctx.media(&file.file))
    )
}

fn render_image(image: &Image, ctx: &RenderContext) -> String {
    format!(
        r#"<p><img src="{}" alt="{}"></p>"#,
        escape_html(&ctx.media(&image.file)),
        escape_html(&image.base.title)
    )
}

fn render_video(video: &Video) -> String {
    match embed_url(&video.url) {
        Some(src) => format!(
            r#"<iframe width="480" height="320" src="{}" title="{}" frameborder="0" allowfullscreen></iframe>"#,
            escape_html(&src),
            escape_html(&video.base.title)
        ),
        None => format!(
            r#"<p><a href="{}">{}</a></p>"#,
            escape_html(&video.url),
            escape_html(&video.base.title)
        ),
    }
}

/// Player URL for providers that serve an embeddable player.
pub fn embed_url(url: &str) -> Option<String> {
    if let Some(caps) = YOUTUBE_URL.captures(url) {
        return Some(format!("https://www.youtube.com/embed/{}", &caps[1]));
    }
    if let Some(caps) = VIMEO_URL.captures(url) {
        return Some(format!("https://player.vimeo.com/video/{}", &caps[1]));
    }
    None
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
