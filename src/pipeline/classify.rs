//! Addressing-scheme classification for absolute image URLs.
//!
//! Images in a rendered quiz attempt come from three places: the site's file
//! storage (`pluginfile.php`), the STACK question type's plot cache, and
//! anywhere else on the web. Each addressing scheme is a matcher that either
//! declines the URL or extracts a structured [`ImageSource`]. Matchers are
//! tried in the order of [`MATCHERS`]; the first one that answers wins and
//! anything unclaimed is [`ImageSource::Generic`].
//!
//! A matcher may also *claim and reject* a URL. Question files served through
//! `pluginfile.php` carry two extra path segments, and a question URL without
//! them is an error rather than a generic fetch.

use crate::error::InlineError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;

static RE_PLUGINFILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<wwwroot>https?://.+)?/pluginfile\.php/(?P<contextid>[^/]+)/(?P<component>[^/]+)/(?P<filearea>[^/]+)(?:/(?P<itemid>\d+))?/(?:(?P<args>.*)/)?(?P<filename>[^/]+)$",
    )
    .unwrap()
});

static RE_PLUGINFILE_QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<wwwroot>https?://.+)?/pluginfile\.php/(?P<contextid>[^/]+)/(?P<component>[^/]+)/(?P<filearea>[^/]+)/(?P<questionbank_id>[^/]+)/(?P<question_slot>[^/]+)/(?P<itemid>\d+)/(?P<filename>[^/]+)$",
    )
    .unwrap()
});

static RE_STACKPLOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<wwwroot>https?://.+)?/question/type/stack/plot\.php/(?P<filename>[^/]+)$")
        .unwrap()
});

/// Location of a file inside the site's file storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredFileRef {
    pub contextid: i64,
    pub component: String,
    pub filearea: String,
    pub itemid: i64,
    /// Always `/`: pluginfile URLs for report images address the area root.
    pub filepath: String,
    pub filename: String,
}

/// Where the bytes of an image come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Generic `pluginfile.php` URL.
    Pluginfile(StoredFileRef),
    /// `pluginfile.php` URL of a question file (`question` or `qtype_*`).
    QuestionPluginfile {
        file: StoredFileRef,
        questionbank_id: String,
        question_slot: String,
    },
    /// Cached STACK plot, addressed by file name only.
    StackPlot { filename: String },
    /// Any other HTTP(S) URL.
    Generic { url: String },
}

impl ImageSource {
    pub fn scheme(&self) -> AddressingScheme {
        match self {
            ImageSource::Pluginfile(_) => AddressingScheme::Pluginfile,
            ImageSource::QuestionPluginfile { .. } => AddressingScheme::PluginfileQuestion,
            ImageSource::StackPlot { .. } => AddressingScheme::StackPlot,
            ImageSource::Generic { .. } => AddressingScheme::Generic,
        }
    }
}

/// The closed set of URL addressing schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressingScheme {
    Pluginfile,
    PluginfileQuestion,
    StackPlot,
    Generic,
}

impl fmt::Display for AddressingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressingScheme::Pluginfile => "PLUGINFILE",
            AddressingScheme::PluginfileQuestion => "PLUGINFILE_QUESTION",
            AddressingScheme::StackPlot => "STACKPLOT",
            AddressingScheme::Generic => "GENERIC",
        };
        f.write_str(name)
    }
}

/// A matcher declines (`None`), claims (`Some(Ok)`) or claims and rejects
/// (`Some(Err)`) an absolute URL.
pub type Matcher = fn(&str) -> Option<Result<ImageSource, InlineError>>;

/// Matchers in priority order.
pub const MATCHERS: &[Matcher] = &[match_pluginfile, match_stackplot];

/// Classify an absolute HTTP(S) URL.
pub fn classify(url: &str) -> Result<ImageSource, InlineError> {
    for matcher in MATCHERS {
        if let Some(result) = matcher(url) {
            return result;
        }
    }
    Ok(ImageSource::Generic {
        url: url.to_string(),
    })
}

fn is_question_component(component: &str) -> bool {
    component == "question" || component.starts_with("qtype_")
}

/// `pluginfile.php/<contextid>/<component>/<filearea>[/<itemid>]/.../<filename>`
pub fn match_pluginfile(url: &str) -> Option<Result<ImageSource, InlineError>> {
    let caps = RE_PLUGINFILE.captures(url)?;

    if is_question_component(&caps["component"]) {
        return Some(match_question_pluginfile(url));
    }

    let itemid = caps.name("itemid").map(|m| m.as_str());
    Some(stored_file_ref(url, &caps, itemid).map(ImageSource::Pluginfile))
}

/// `pluginfile.php/<contextid>/<component>/<filearea>/<questionbank_id>/<question_slot>/<itemid>/<filename>`
fn match_question_pluginfile(url: &str) -> Result<ImageSource, InlineError> {
    let caps = RE_PLUGINFILE_QUESTION
        .captures(url)
        .ok_or_else(|| InlineError::QuestionPatternMismatch {
            url: url.to_string(),
        })?;

    let file = stored_file_ref(url, &caps, Some(&caps["itemid"]))?;
    Ok(ImageSource::QuestionPluginfile {
        file,
        questionbank_id: caps["questionbank_id"].to_string(),
        question_slot: caps["question_slot"].to_string(),
    })
}

/// `question/type/stack/plot.php/<filename>`
pub fn match_stackplot(url: &str) -> Option<Result<ImageSource, InlineError>> {
    let caps = RE_STACKPLOT.captures(url)?;
    Some(Ok(ImageSource::StackPlot {
        filename: caps["filename"].to_string(),
    }))
}

fn stored_file_ref(
    url: &str,
    caps: &Captures<'_>,
    itemid: Option<&str>,
) -> Result<StoredFileRef, InlineError> {
    let malformed = |segment: &str| InlineError::MalformedPluginfile {
        url: url.to_string(),
        segment: segment.to_string(),
    };

    let contextid = caps["contextid"]
        .parse::<i64>()
        .map_err(|_| malformed("contextid"))?;
    let itemid = match itemid {
        Some(raw) => raw.parse::<i64>().map_err(|_| malformed("itemid"))?,
        None => 0,
    };
    // pluginfile.php percent-encodes every path segment; the store keys on
    // the plain name.
    let filename = urlencoding::decode(&caps["filename"])
        .map_err(|_| malformed("filename"))?
        .into_owned();

    Ok(StoredFileRef {
        contextid,
        component: caps["component"].to_string(),
        filearea: caps["filearea"].to_string(),
        itemid,
        filepath: "/".to_string(),
        filename,
    })
}
