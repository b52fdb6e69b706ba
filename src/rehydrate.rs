//! Report rehydration: make a rendered attempt page self-contained.
//!
//! A rendered quiz attempt references its images by URL, most of them served
//! by the site itself. Once the page is exported to PDF or archived, those
//! URLs may no longer resolve. [`Rehydrator`] walks every `<img>` in the page,
//! fetches the bytes through the channel matching the URL's addressing scheme
//! and replaces the `src` with a `data:` URI.
//!
//! Every image ends in exactly one of two states:
//!
//! * **inlined**: `src` now holds `data:<mime>;base64,<bytes>`;
//! * **failed**: `src` is untouched and the tag carries
//!   `x-debug-notice="image inlining failed"`.
//!
//! A failed image never aborts the document. The returned
//! [`RehydratedDocument`] lists one [`ImageOutcome`] per processed image so
//! callers can decide whether a partially inlined report is acceptable.

use crate::config::ArchiverConfig;
use crate::error::{ArchiverError, InlineError};
use crate::pipeline::classify::{classify, AddressingScheme, ImageSource};
use crate::pipeline::encode::{extension_of, mime_for_extension, to_data_uri};
use crate::pipeline::fetch::{
    build_image_client, fetch_generic, fetch_stored_file, read_stack_plot, FileStore,
};
use crate::pipeline::html::{self, Edit, ImgTag};
use crate::pipeline::resolve::{resolve_url, rewrite_origin, strip_query_and_fragment};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Head insertions applied by [`Rehydrator::rehydrate`] before inlining.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportOptions {
    /// Insert `<base href="<wwwroot>/">` so remaining relative links keep
    /// pointing at the site.
    pub base_href: bool,

    /// Extra CSS injected as a `<style>` element (visual cleanup of the
    /// rendered page, e.g. hiding navigation blocks).
    pub extra_css: Option<String>,
}

/// What happened to one `<img>` element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOutcome {
    /// `src` as found in the document (entities decoded).
    pub src: String,

    /// Absolute URL the image was resolved to, if resolution got that far.
    pub resolved_url: Option<String>,

    /// Addressing scheme the URL was classified as.
    pub scheme: Option<AddressingScheme>,

    /// MIME type written into the data URI.
    pub mime: Option<String>,

    /// Number of raw bytes inlined.
    pub bytes: usize,

    /// `Some` if the image was marked failed.
    pub error: Option<InlineError>,
}

impl ImageOutcome {
    fn new(src: &str) -> Self {
        Self {
            src: src.to_string(),
            resolved_url: None,
            scheme: None,
            mime: None,
            bytes: 0,
            error: None,
        }
    }

    pub fn is_inlined(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a rehydration pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehydratedDocument {
    /// The rewritten document.
    pub html: String,

    /// One entry per `<img>` with a non-empty `src`, in document order.
    pub images: Vec<ImageOutcome>,

    /// Wall-clock time spent on the pass.
    pub duration_ms: u64,
}

impl RehydratedDocument {
    pub fn inlined_count(&self) -> usize {
        self.images.iter().filter(|i| i.is_inlined()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.images.iter().filter(|i| !i.is_inlined()).count()
    }
}

/// Inlines the images of rendered report pages.
///
/// # Example
/// ```rust,no_run
/// use quiz_archiver::{ArchiverConfig, DirectoryFileStore, Rehydrator};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ArchiverConfig::builder()
///     .wwwroot("https://moodle.example.org")
///     .dataroot("/var/www/moodledata")
///     .build()?;
/// let files = Arc::new(DirectoryFileStore::new("/srv/exported-files"));
/// let rehydrator = Rehydrator::new(config, files)?;
///
/// let page = std::fs::read_to_string("attempt.html")?;
/// let doc = rehydrator.inline_images(&page).await;
/// eprintln!("{} inlined, {} failed", doc.inlined_count(), doc.failed_count());
/// # Ok(())
/// # }
/// ```
pub struct Rehydrator {
    config: ArchiverConfig,
    files: Arc<dyn FileStore>,
    http: reqwest::Client,
}

impl Rehydrator {
    pub fn new(config: ArchiverConfig, files: Arc<dyn FileStore>) -> Result<Self, ArchiverError> {
        let http = build_image_client(&config)?;
        if config.insecure_image_fetch {
            warn!("TLS verification is disabled for generic image fetches");
        }
        Ok(Self {
            config,
            files,
            http,
        })
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Apply the requested head insertions, then inline all images relative
    /// to the public web root.
    pub async fn rehydrate(&self, html: &str, options: &ReportOptions) -> RehydratedDocument {
        let mut head = String::new();
        if options.base_href {
            head.push_str(&html::base_element(&format!(
                "{}/",
                self.config.wwwroot.trim_end_matches('/')
            )));
        }
        if let Some(ref css) = options.extra_css {
            head.push_str(&html::style_element(css));
        }

        if head.is_empty() {
            self.inline_images(html).await
        } else {
            self.inline_images(&html::insert_into_head(html, &head)).await
        }
    }

    /// Inline all images, resolving relative URLs against the public web root.
    pub async fn inline_images(&self, html: &str) -> RehydratedDocument {
        self.inline_images_relative_to(html, &self.config.wwwroot)
            .await
    }

    /// Inline all images, resolving relative URLs against `base`.
    pub async fn inline_images_relative_to(&self, html: &str, base: &str) -> RehydratedDocument {
        let start = Instant::now();

        let candidates: Vec<(ImgTag, String)> = html::find_img_tags(html)
            .into_iter()
            .filter_map(|tag| {
                let src = tag.src.as_deref()?.trim().to_string();
                (!src.is_empty()).then_some((tag, src))
            })
            .collect();
        debug!("Found {} images with a source", candidates.len());

        let results: Vec<(ImgTag, ImageOutcome, Option<String>)> =
            stream::iter(candidates.into_iter().map(|(tag, src)| async move {
                let (outcome, data_uri) = self.inline_one(&src, base).await;
                (tag, outcome, data_uri)
            }))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut edits = Vec::with_capacity(results.len());
        let mut images = Vec::with_capacity(results.len());
        for (tag, outcome, data_uri) in results {
            match data_uri {
                Some(ref uri) => edits.extend(Edit::set_src(&tag, uri)),
                None => edits.extend(Edit::mark_failed(&tag, html)),
            }
            images.push(outcome);
        }

        let doc = RehydratedDocument {
            html: html::apply_edits(html, edits),
            images,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Inlined {}/{} images in {}ms",
            doc.inlined_count(),
            doc.images.len(),
            doc.duration_ms
        );
        doc
    }

    /// Run one image through the pipeline. Returns the outcome and, on
    /// success, the data URI.
    async fn inline_one(&self, src: &str, base: &str) -> (ImageOutcome, Option<String>) {
        let mut outcome = ImageOutcome::new(src);
        match self.try_inline(src, base, &mut outcome).await {
            Ok(data_uri) => (outcome, Some(data_uri)),
            Err(e) => {
                warn!("Image '{}' not inlined: {}", src, e);
                outcome.error = Some(e);
                (outcome, None)
            }
        }
    }

    async fn try_inline(
        &self,
        src: &str,
        base: &str,
        outcome: &mut ImageOutcome,
    ) -> Result<String, InlineError> {
        let url = strip_query_and_fragment(src);
        let (url, base) = self.apply_internal_host(url, base);
        let resolved = resolve_url(&url, &base);
        outcome.resolved_url = Some(resolved.clone());

        if !(resolved.starts_with("http://") || resolved.starts_with("https://")) {
            return Err(InlineError::NotHttp { url: resolved });
        }

        let extension = extension_of(&resolved);
        let mime = mime_for_extension(extension).ok_or_else(|| InlineError::DisallowedExtension {
            url: resolved.clone(),
            extension: extension.to_string(),
        })?;

        let source = classify(&resolved)?;
        outcome.scheme = Some(source.scheme());
        debug!("{} classified as {}", resolved, source.scheme());

        let bytes = match source {
            ImageSource::Pluginfile(ref file) | ImageSource::QuestionPluginfile { ref file, .. } => {
                fetch_stored_file(self.files.as_ref(), file, &resolved).await?
            }
            ImageSource::StackPlot { ref filename } => {
                read_stack_plot(&self.config.stack_plot_dir(), filename).await?
            }
            ImageSource::Generic { ref url } => fetch_generic(&self.http, url).await?,
        };

        if bytes.is_empty() {
            return Err(InlineError::EmptyContent { url: resolved });
        }

        outcome.mime = Some(mime.to_string());
        outcome.bytes = bytes.len();
        Ok(to_data_uri(mime, &bytes))
    }

    /// Point the image URL and the base at the internal host, if configured.
    fn apply_internal_host(&self, url: &str, base: &str) -> (String, String) {
        let public = self.config.wwwroot.as_str();
        match self.config.internal_host.as_deref() {
            Some(internal) => (
                rewrite_origin(url, public, internal),
                rewrite_origin(base, public, internal),
            ),
            None => (url.to_string(), base.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::StoredFileRef;
    use crate::pipeline::fetch::MemoryFileStore;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

    fn config(dataroot: &std::path::Path) -> ArchiverConfig {
        ArchiverConfig::builder()
            .wwwroot("https://moodle.test")
            .dataroot(dataroot)
            .concurrency(2)
            .build()
            .unwrap()
    }

    async fn store_with(file: StoredFileRef, bytes: &[u8]) -> Arc<MemoryFileStore> {
        let store = MemoryFileStore::new();
        store.insert(file, bytes.to_vec()).await;
        Arc::new(store)
    }

    fn intro_file(name: &str) -> StoredFileRef {
        StoredFileRef {
            contextid: 27,
            component: "mod_quiz".into(),
            filearea: "intro".into(),
            itemid: 0,
            filepath: "/".into(),
            filename: name.into(),
        }
    }

    #[tokio::test]
    async fn test_inlines_pluginfile_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(intro_file("d.png"), PNG).await;
        let r = Rehydrator::new(config(dir.path()), store).unwrap();

        let html = r#"<p>Intro <img src="/pluginfile.php/27/mod_quiz/intro/d.png?rev=3" alt="d"></p>"#;
        let doc = r.inline_images(html).await;

        let expected = format!(
            r#"<p>Intro <img src="data:image/png;base64,{}" alt="d"></p>"#,
            STANDARD.encode(PNG)
        );
        assert_eq!(doc.html, expected);
        assert_eq!(doc.inlined_count(), 1);
        assert_eq!(doc.images[0].scheme, Some(AddressingScheme::Pluginfile));
        assert_eq!(
            doc.images[0].resolved_url.as_deref(),
            Some("https://moodle.test/pluginfile.php/27/mod_quiz/intro/d.png")
        );
    }

    #[tokio::test]
    async fn test_missing_stored_file_is_marked() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rehydrator::new(config(dir.path()), Arc::new(MemoryFileStore::new())).unwrap();

        let html = r#"<img src="https://moodle.test/pluginfile.php/27/mod_quiz/intro/gone.png">"#;
        let doc = r.inline_images(html).await;
        assert_eq!(
            doc.html,
            r#"<img src="https://moodle.test/pluginfile.php/27/mod_quiz/intro/gone.png" x-debug-notice="image inlining failed">"#
        );
        assert!(matches!(
            doc.images[0].error,
            Some(InlineError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_disallowed_extension_is_never_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rehydrator::new(config(dir.path()), Arc::new(MemoryFileStore::new())).unwrap();

        for src in ["/files/script.php", "/files/IMAGE.PNG", "/files/noext"] {
            let html = format!(r#"<img src="{src}">"#);
            let doc = r.inline_images(&html).await;
            assert_eq!(
                doc.html,
                format!(r#"<img src="{src}" x-debug-notice="image inlining failed">"#)
            );
            assert!(matches!(
                doc.images[0].error,
                Some(InlineError::DisallowedExtension { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_question_url_without_slot_is_rejected_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rehydrator::new(config(dir.path()), Arc::new(MemoryFileStore::new())).unwrap();

        let html = r#"<img src="/pluginfile.php/12/question/questiontext/377/graph.png">"#;
        let doc = r.inline_images(html).await;
        assert!(matches!(
            doc.images[0].error,
            Some(InlineError::QuestionPatternMismatch { .. })
        ));
        assert_eq!(doc.images[0].scheme, None);
    }

    #[tokio::test]
    async fn test_stack_plot_is_read_from_dataroot() {
        let dir = tempfile::tempdir().unwrap();
        let plots = dir.path().join("stack").join("plots");
        std::fs::create_dir_all(&plots).unwrap();
        std::fs::write(plots.join("plot-42.svg"), b"<svg/>").unwrap();
        let r = Rehydrator::new(config(dir.path()), Arc::new(MemoryFileStore::new())).unwrap();

        let doc = r
            .inline_images(r#"<img src="/question/type/stack/plot.php/plot-42.svg">"#)
            .await;
        assert_eq!(doc.images[0].scheme, Some(AddressingScheme::StackPlot));
        assert_eq!(doc.images[0].mime.as_deref(), Some("image/svg+xml"));
        assert!(doc.html.contains("data:image/svg+xml;base64,"));
    }

    #[tokio::test]
    async fn test_second_pass_marks_data_uri_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(intro_file("d.png"), PNG).await;
        let r = Rehydrator::new(config(dir.path()), store).unwrap();

        let first = r
            .inline_images(r#"<img src="/pluginfile.php/27/mod_quiz/intro/d.png">"#)
            .await;
        let second = r.inline_images(&first.html).await;

        assert_eq!(second.failed_count(), 1);
        assert!(matches!(second.images[0].error, Some(InlineError::NotHttp { .. })));
        assert_eq!(
            second.html,
            first.html.replace('>', r#" x-debug-notice="image inlining failed">"#)
        );
    }

    #[tokio::test]
    async fn test_empty_src_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rehydrator::new(config(dir.path()), Arc::new(MemoryFileStore::new())).unwrap();

        let html = r#"<img src=""><img alt="no source">"#;
        let doc = r.inline_images(html).await;
        assert_eq!(doc.html, html);
        assert!(doc.images.is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(intro_file("empty.png"), b"").await;
        let r = Rehydrator::new(config(dir.path()), store).unwrap();

        let doc = r
            .inline_images(r#"<img src="/pluginfile.php/27/mod_quiz/intro/empty.png">"#)
            .await;
        assert!(matches!(doc.images[0].error, Some(InlineError::EmptyContent { .. })));
    }

    #[tokio::test]
    async fn test_internal_host_rewrites_public_urls_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArchiverConfig::builder()
            .wwwroot("https://moodle.test")
            .internal_host("http://moodle-app:8080")
            .dataroot(dir.path())
            .build()
            .unwrap();
        let r = Rehydrator::new(config, Arc::new(MemoryFileStore::new())).unwrap();

        let (url, base) = r.apply_internal_host(
            "https://moodle.test/pluginfile.php/1/a/b/x.png",
            "https://moodle.test/mod/quiz/review.php",
        );
        assert_eq!(url, "http://moodle-app:8080/pluginfile.php/1/a/b/x.png");
        assert_eq!(base, "http://moodle-app:8080/mod/quiz/review.php");

        let (url, _) = r.apply_internal_host("https://cdn.other/x.png", "https://moodle.test/");
        assert_eq!(url, "https://cdn.other/x.png");
    }

    #[tokio::test]
    async fn test_rehydrate_inserts_base_and_style() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rehydrator::new(config(dir.path()), Arc::new(MemoryFileStore::new())).unwrap();

        let options = ReportOptions {
            base_href: true,
            extra_css: Some(".navbar { display: none; }".into()),
        };
        let doc = r
            .rehydrate("<html><head><title>A</title></head><body>x</body></html>", &options)
            .await;
        assert_eq!(
            doc.html,
            "<html><head><base href=\"https://moodle.test/\"><style>.navbar { display: none; }</style><title>A</title></head><body>x</body></html>"
        );
    }

    #[tokio::test]
    async fn test_gt_in_attribute_before_src_still_processed() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rehydrator::new(config(dir.path()), Arc::new(MemoryFileStore::new())).unwrap();

        let html = r#"<img alt="x > y" src="/files/script.php">"#;
        let doc = r.inline_images(html).await;
        assert_eq!(doc.images.len(), 1);
        assert_eq!(
            doc.html,
            r#"<img alt="x > y" src="/files/script.php" x-debug-notice="image inlining failed">"#
        );
    }

    #[tokio::test]
    async fn test_retry_after_failure_clears_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(intro_file("d.png"), b"PNG").await;
        let r = Rehydrator::new(config(dir.path()), store).unwrap();

        let html = r#"<img src="/pluginfile.php/27/mod_quiz/intro/d.png" x-debug-notice="image inlining failed">"#;
        let doc = r.inline_images(html).await;
        assert_eq!(doc.inlined_count(), 1);
        assert_eq!(doc.html, r#"<img src="data:image/png;base64,UE5H">"#);
    }
}
