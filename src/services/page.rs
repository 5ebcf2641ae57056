use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

use crate::core::error::HelperError;
use crate::services::fetch::Transport;

const TITLE_SELECTOR: &str = "div.inside-page-hero.grid-container.grid-parent h1";
const HERO_SELECTOR: &str = ".page-hero";

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"background(?:-image)?\s*:[^;]*url\(\s*["']?([^"')]+)["']?\s*\)"#)
        .expect("valid regex")
});

/// The parts of a book page the downloader needs.
#[derive(Debug, Clone)]
pub struct BookPage {
    title: Option<String>,
    scripts: Vec<String>,
    cover_url: Option<String>,
}

impl BookPage {
    pub fn parse(html: &str, page_url: &Url) -> Self {
        let document = Html::parse_document(html);

        let title = select_first(&document, TITLE_SELECTOR)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let scripts = match Selector::parse("script") {
            Ok(selector) => document
                .select(&selector)
                .map(|el| el.text().collect::<String>())
                .collect(),
            Err(_) => Vec::new(),
        };

        let cover_url = select_first(&document, HERO_SELECTOR)
            .and_then(|el| el.value().attr("style").map(str::to_string))
            .and_then(|style| extract_css_url(&style))
            .and_then(|raw| match page_url.join(&raw) {
                Ok(url) => Some(url.to_string()),
                Err(e) => {
                    log::warn!("Ignoring cover URL {:?}: {}", raw, e);
                    None
                }
            });

        Self {
            title,
            scripts,
            cover_url,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.scripts.iter().map(String::as_str)
    }

    pub fn cover_url(&self) -> Option<&str> {
        self.cover_url.as_deref()
    }
}

/// Downloads and parses the book page at `url`.
pub async fn load_book_page<T: Transport>(transport: &T, url: &Url) -> Result<BookPage, HelperError> {
    let body = transport
        .get(url.as_str())
        .await
        .ok_or_else(|| HelperError::Page {
            url: url.to_string(),
            reason: "request failed".to_string(),
        })?;
    Ok(BookPage::parse(&String::from_utf8_lossy(&body), url))
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<scraper::ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

/// Pulls the URL out of a `background-image: url("...")` declaration.
pub fn extract_css_url(style: &str) -> Option<String> {
    CSS_URL
        .captures(style)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}
