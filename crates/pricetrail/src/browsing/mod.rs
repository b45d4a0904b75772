//! Browsing abstraction over a live, automated browser.
//!
//! Defines the `Browsing` and `Element` traits the extraction core drives.
//! Lookups are limited to id, class, tag and exact attribute matches so the
//! core never depends on a particular selector engine. The Chromium driver
//! lives in [`chromium`].

pub mod chromium;

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::BrowseError;

/// Shorthand for driver results.
pub type BrowseResult<T> = Result<T, BrowseError>;

/// How to find an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Element id.
    Id(String),
    /// A single class name.
    Class(String),
    /// Tag name.
    Tag(String),
    /// Attribute equal to a value. With `class`, this is the whole class list.
    Attribute { name: String, value: String },
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn class(class: impl Into<String>) -> Self {
        Self::Class(class.into())
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag(tag.into())
    }

    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Equivalent CSS selector.
    pub fn to_css(&self) -> String {
        match self {
            Self::Id(id) => format!("[id=\"{}\"]", css_escape(id)),
            Self::Class(class) => format!(".{}", css_escape_ident(class)),
            Self::Tag(tag) => tag.clone(),
            Self::Attribute { name, value } => format!("[{name}=\"{}\"]", css_escape(value)),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Class(class) => write!(f, ".{class}"),
            Self::Tag(tag) => write!(f, "<{tag}>"),
            Self::Attribute { name, value } => write!(f, "[{name}={value:?}]"),
        }
    }
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn css_escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    for c in ident.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// A handle to one element of the current page.
#[async_trait]
pub trait Element: Send + Sync {
    async fn click(&self) -> BrowseResult<()>;
    /// Empty an input's value.
    async fn clear(&self) -> BrowseResult<()>;
    /// Type text into the element.
    async fn send_text(&self, text: &str) -> BrowseResult<()>;
    /// Rendered text content.
    async fn text(&self) -> BrowseResult<String>;
    async fn attribute(&self, name: &str) -> BrowseResult<Option<String>>;
    /// Serialized HTML of the element itself.
    async fn outer_html(&self) -> BrowseResult<String>;
    /// First descendant matching `locator`.
    async fn find(&self, locator: &Locator) -> BrowseResult<Box<dyn Element>>;
    /// All descendants matching `locator`, in document order.
    async fn find_all(&self, locator: &Locator) -> BrowseResult<Vec<Box<dyn Element>>>;
}

/// A single automated browser session.
#[async_trait]
pub trait Browsing: Send + Sync {
    /// Load `url` and wait for the navigation to finish.
    async fn navigate(&mut self, url: &str) -> BrowseResult<()>;
    /// First element on the page matching `locator`.
    async fn find(&self, locator: &Locator) -> BrowseResult<Box<dyn Element>>;
    /// All elements on the page matching `locator`, in document order.
    async fn find_all(&self, locator: &Locator) -> BrowseResult<Vec<Box<dyn Element>>>;
    /// Release the browser. Called exactly once per session.
    async fn close(&mut self) -> BrowseResult<()>;

    /// Poll until `locator` matches or `timeout` elapses.
    ///
    /// Returns whether the element appeared. A lost session is an error.
    async fn wait_for(
        &self,
        locator: &Locator,
        timeout: Duration,
        poll: Duration,
    ) -> BrowseResult<bool> {
        let start = Instant::now();
        loop {
            match self.find(locator).await {
                Ok(_) => return Ok(true),
                Err(e @ BrowseError::SessionLost(_)) => return Err(e),
                Err(_) => {}
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Poll until any of `locators` matches. Returns the index that matched.
    async fn wait_for_any(
        &self,
        locators: &[Locator],
        timeout: Duration,
        poll: Duration,
    ) -> BrowseResult<Option<usize>> {
        let start = Instant::now();
        loop {
            for (i, locator) in locators.iter().enumerate() {
                match self.find(locator).await {
                    Ok(_) => return Ok(Some(i)),
                    Err(e @ BrowseError::SessionLost(_)) => return Err(e),
                    Err(_) => {}
                }
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
