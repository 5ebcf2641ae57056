use indexmap::IndexMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::error::HelperError;
use crate::core::io::SaveTarget;
use crate::core::state::{ArchiveEntry, ChapterMap, ChapterRecord, DownloadSession, Phase};
use crate::services::fetch::{MediaClient, Transport};
use crate::services::ui::{ProgressHandle, Surface};
use crate::utils::names::file_extension;

/// Bytes fed to the deflater between progress reports.
const PROGRESS_CHUNK: usize = 256 * 1024;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub include_cover: bool,
    pub cover_url: Option<String>,
}

pub fn chapter_file_name(record: &ChapterRecord) -> String {
    format!("{}.{}", record.name, file_extension(&record.media_path))
}

/// One archive build in flight. Dropping it takes the progress surface down
/// and frees the builder for the next build.
struct ActiveSession<'a> {
    _guard: MutexGuard<'a, ()>,
    progress: Arc<dyn ProgressHandle>,
    state: DownloadSession,
}

impl<'a> ActiveSession<'a> {
    fn open(guard: MutexGuard<'a, ()>, progress: Arc<dyn ProgressHandle>, total: usize) -> Self {
        Self {
            _guard: guard,
            progress,
            state: DownloadSession::new(total),
        }
    }

    fn enter(&mut self, phase: Phase) {
        log::info!("{}", phase);
        self.state.enter(phase);
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.state.finish();
        self.progress.remove();
    }
}

pub struct ArchiveBuilder<T: Transport> {
    media: MediaClient<T>,
    target: Arc<dyn SaveTarget>,
    surface: Arc<dyn Surface>,
    compression_level: i64,
    session: Mutex<()>,
}

impl<T: Transport> ArchiveBuilder<T> {
    pub fn new(
        media: MediaClient<T>,
        target: Arc<dyn SaveTarget>,
        surface: Arc<dyn Surface>,
        compression_level: i64,
    ) -> Self {
        Self {
            media,
            target,
            surface,
            compression_level,
            session: Mutex::new(()),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// Downloads one chapter and saves it as `{name}.{ext}`.
    pub async fn download_single(&self, record: &ChapterRecord) -> Result<String, HelperError> {
        let result = match self.media.fetch_with_fallback(&record.media_path).await {
            Some(bytes) => self.target.save_as(&chapter_file_name(record), &bytes).await,
            None => Err(HelperError::ChapterDownload {
                name: record.name.clone(),
            }),
        };
        result.inspect_err(|e| self.report(e))
    }

    /// Downloads every chapter (and optionally the cover) into `{title}.zip`.
    ///
    /// Returns `Ok(None)` without doing anything while another build is running.
    /// Any fetch failure aborts the build and nothing is saved.
    pub async fn build_archive(
        &self,
        title: &str,
        chapters: &ChapterMap,
        options: &BuildOptions,
    ) -> Result<Option<String>, HelperError> {
        let Ok(guard) = self.session.try_lock() else {
            log::debug!("Archive build already in progress, ignoring request");
            return Ok(None);
        };
        let mut session = ActiveSession::open(guard, self.surface.attach_progress(), chapters.len());

        match self.run_build(&mut session, title, chapters, options).await {
            Ok(name) => Ok(Some(name)),
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    async fn run_build(
        &self,
        session: &mut ActiveSession<'_>,
        title: &str,
        chapters: &ChapterMap,
        options: &BuildOptions,
    ) -> Result<String, HelperError> {
        let mut entries = Vec::with_capacity(chapters.len() + 1);

        if options.include_cover {
            session.enter(Phase::FetchingCover);
            session.progress.set_status(&Phase::FetchingCover.to_string());
            match &options.cover_url {
                Some(url) => {
                    let bytes = self
                        .media
                        .fetch_direct(url)
                        .await
                        .ok_or_else(|| HelperError::CoverFetch { url: url.clone() })?;
                    entries.push(ArchiveEntry {
                        file_name: format!("cover.{}", file_extension(url)),
                        bytes,
                    });
                    log::info!("Zipped the cover image");
                }
                None => log::warn!("Could not find the cover image"),
            }
        }

        session.enter(Phase::FetchingChapters);
        for record in chapters {
            let percent = session.state.advance();
            session.progress.set_status(&format!(
                "{}: {}/{}",
                Phase::FetchingChapters,
                session.state.current_count,
                session.state.total_count
            ));
            session.progress.set_percent(percent);

            let bytes = self
                .media
                .fetch_with_fallback(&record.media_path)
                .await
                .ok_or_else(|| HelperError::ChapterFetch {
                    name: record.name.clone(),
                })?;
            entries.push(ArchiveEntry {
                file_name: chapter_file_name(record),
                bytes,
            });
        }

        session.enter(Phase::Compressing);
        session.progress.set_percent(0.0);
        session
            .progress
            .set_status(&format!("{}: {:.2}%", Phase::Compressing, 0.0));

        let progress = session.progress.clone();
        let level = self.compression_level;
        let archive = tokio::task::spawn_blocking(move || {
            compress_entries(&entries, level, |percent| {
                progress.set_percent(percent);
                progress.set_status(&format!("{}: {:.2}%", Phase::Compressing, percent));
            })
        })
        .await
        .map_err(|e| HelperError::Packaging(e.to_string()))??;

        let archive_name = format!("{}.zip", title);
        let saved = self.target.save_as(&archive_name, &archive).await?;
        log::info!("Archive \"{}\" is ready", saved);
        Ok(saved)
    }

    fn report(&self, error: &HelperError) {
        log::error!("{}", error);
        self.surface.alert(&error.to_string());
    }
}

/// Deflates `entries` into a zip in the given order.
///
/// A repeated file name replaces the earlier entry's content and keeps its
/// position. `on_progress` receives the share of input bytes written so far,
/// never decreasing, ending with exactly `100.0`.
pub fn compress_entries<F>(
    entries: &[ArchiveEntry],
    level: i64,
    mut on_progress: F,
) -> Result<Vec<u8>, HelperError>
where
    F: FnMut(f64),
{
    let mut unique: IndexMap<&str, &[u8]> = IndexMap::with_capacity(entries.len());
    for entry in entries {
        if unique
            .insert(entry.file_name.as_str(), entry.bytes.as_slice())
            .is_some()
        {
            log::warn!("Duplicate archive entry {}, keeping the last one", entry.file_name);
        }
    }

    let total: usize = unique.values().map(|bytes| bytes.len()).sum();
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level))
        .large_file(total > u32::MAX as usize);

    let mut zip = ZipWriter::new(Cursor::new(Vec::with_capacity(total)));
    let mut written = 0usize;

    for (file_name, bytes) in unique {
        zip.start_file(file_name, options)?;
        for chunk in bytes.chunks(PROGRESS_CHUNK) {
            zip.write_all(chunk)
                .map_err(|e| HelperError::Packaging(e.to_string()))?;
            written += chunk.len();
            on_progress(written as f64 / total as f64 * 100.0);
        }
    }

    let cursor = zip.finish()?;
    on_progress(100.0);
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fetch::tests::MockTransport;
    use crate::services::ui::tests::{Event, RecordingSurface};
    use async_trait::async_trait;
    use std::io::Read;
    use std::sync::Mutex as StdMutex;

    const PRIMARY: &str = "https://files01.example/audio/";
    const FALLBACK: &str = "https://files02.example/audio/";
    const COVER: &str = "https://tokybook.com/wp-content/cover.jpg";

    #[derive(Clone, Default)]
    struct MemoryTarget {
        saved: Arc<StdMutex<Vec<(String, Vec<u8>)>>>,
    }

    impl MemoryTarget {
        fn saved(&self) -> Vec<(String, Vec<u8>)> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SaveTarget for MemoryTarget {
        async fn save_as(&self, file_name: &str, content: &[u8]) -> Result<String, HelperError> {
            self.saved
                .lock()
                .unwrap()
                .push((file_name.to_string(), content.to_vec()));
            Ok(file_name.to_string())
        }
    }

    struct Fixture {
        transport: MockTransport,
        target: MemoryTarget,
        surface: RecordingSurface,
        builder: ArchiveBuilder<MockTransport>,
    }

    fn fixture() -> Fixture {
        let transport = MockTransport::default();
        let target = MemoryTarget::default();
        let surface = RecordingSurface::default();
        let builder = ArchiveBuilder::new(
            MediaClient::new(transport.clone(), PRIMARY, FALLBACK),
            Arc::new(target.clone()),
            Arc::new(surface.clone()),
            6,
        );
        Fixture {
            transport,
            target,
            surface,
            builder,
        }
    }

    fn record(index: u32, name: &str, media_path: &str) -> ChapterRecord {
        ChapterRecord {
            index,
            name: name.to_string(),
            media_path: media_path.to_string(),
        }
    }

    fn two_chapters() -> ChapterMap {
        vec![record(2, "Intro", "a.mp3"), record(3, "Ch1", "b.mp3")]
            .into_iter()
            .collect()
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn entry_bytes(archive: &[u8], name: &str) -> Vec<u8> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        let mut file = zip.by_name(name).unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        buf
    }

    #[tokio::test]
    async fn test_builds_archive_in_map_order() {
        let f = fixture();
        f.transport.serve(&format!("{}a.mp3", PRIMARY), b"intro audio");
        f.transport.serve(&format!("{}b.mp3", PRIMARY), b"chapter one audio");

        let saved = f
            .builder
            .build_archive("My Book", &two_chapters(), &BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(saved.as_deref(), Some("My Book.zip"));

        let files = f.target.saved();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "My Book.zip");
        assert_eq!(entry_names(&files[0].1), vec!["Intro.mp3", "Ch1.mp3"]);
        assert_eq!(entry_bytes(&files[0].1, "Ch1.mp3"), b"chapter one audio");
        assert!(f.surface.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_chapter_failure_saves_nothing() {
        let f = fixture();
        f.transport.serve(&format!("{}a.mp3", PRIMARY), b"intro audio");

        let err = f
            .builder
            .build_archive("My Book", &two_chapters(), &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::ChapterFetch { ref name } if name == "Ch1"));

        assert!(f.target.saved().is_empty());
        let alerts = f.surface.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Ch1"));
        assert_eq!(f.surface.count(|e| *e == Event::Removed), 1);
        assert!(!f.builder.is_busy());
    }

    #[tokio::test]
    async fn test_cover_first_with_fallback_chapters() {
        let f = fixture();
        f.transport.serve(COVER, b"jpeg");
        f.transport.serve(&format!("{}a.mp3", FALLBACK), b"intro audio");
        f.transport.serve(&format!("{}b.mp3", PRIMARY), b"chapter one audio");

        let options = BuildOptions {
            include_cover: true,
            cover_url: Some(COVER.to_string()),
        };
        f.builder
            .build_archive("My Book", &two_chapters(), &options)
            .await
            .unwrap();

        let files = f.target.saved();
        assert_eq!(
            entry_names(&files[0].1),
            vec!["cover.jpg", "Intro.mp3", "Ch1.mp3"]
        );
        assert_eq!(entry_bytes(&files[0].1, "Intro.mp3"), b"intro audio");
    }

    #[tokio::test]
    async fn test_cover_failure_aborts_before_chapters() {
        let f = fixture();
        f.transport.serve(&format!("{}a.mp3", PRIMARY), b"intro audio");
        f.transport.serve(&format!("{}b.mp3", PRIMARY), b"chapter one audio");

        let options = BuildOptions {
            include_cover: true,
            cover_url: Some(COVER.to_string()),
        };
        let err = f
            .builder
            .build_archive("My Book", &two_chapters(), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, HelperError::CoverFetch { .. }));
        assert_eq!(f.transport.requested(), vec![COVER.to_string()]);
        assert!(f.target.saved().is_empty());
        assert_eq!(f.surface.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_cover_url_is_skipped() {
        let f = fixture();
        f.transport.serve(&format!("{}a.mp3", PRIMARY), b"intro audio");
        f.transport.serve(&format!("{}b.mp3", PRIMARY), b"chapter one audio");

        let options = BuildOptions {
            include_cover: true,
            cover_url: None,
        };
        f.builder
            .build_archive("My Book", &two_chapters(), &options)
            .await
            .unwrap();
        assert_eq!(
            entry_names(&f.target.saved()[0].1),
            vec!["Intro.mp3", "Ch1.mp3"]
        );
    }

    #[tokio::test]
    async fn test_second_build_while_active_is_noop() {
        let f = fixture();
        let chapters = two_chapters();

        let _held = f.builder.session.try_lock().unwrap();
        assert!(f.builder.is_busy());

        let result = f
            .builder
            .build_archive("My Book", &chapters, &BuildOptions::default())
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(f.surface.count(|e| *e == Event::Attached), 0);
        assert!(f.transport.requested().is_empty());
        assert!(f.target.saved().is_empty());
    }

    #[tokio::test]
    async fn test_progress_reports() {
        let f = fixture();
        f.transport.serve(&format!("{}a.mp3", PRIMARY), &[7u8; 1024]);
        f.transport.serve(&format!("{}b.mp3", PRIMARY), &[9u8; 2048]);

        f.builder
            .build_archive("My Book", &two_chapters(), &BuildOptions::default())
            .await
            .unwrap();

        let events = f.surface.events();
        assert_eq!(events.first(), Some(&Event::Attached));
        assert_eq!(events.last(), Some(&Event::Removed));
        assert!(events.contains(&Event::Status("Fetching chapters: 1/2".to_string())));
        assert!(events.contains(&Event::Status("Fetching chapters: 2/2".to_string())));
        assert!(events.contains(&Event::Status("Creating archive: 100.00%".to_string())));

        let compress_start = events
            .iter()
            .position(|e| *e == Event::Status("Creating archive: 0.00%".to_string()))
            .unwrap();
        let percents: Vec<f64> = events[compress_start..]
            .iter()
            .filter_map(|e| match e {
                Event::Percent(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100.0));
    }

    #[tokio::test]
    async fn test_download_single() {
        let f = fixture();
        f.transport
            .serve(&format!("{}My%20Book%2F02.m4a", FALLBACK), b"m4a audio");

        let saved = f
            .builder
            .download_single(&record(2, "Intro", "My%20Book%2F02.m4a"))
            .await
            .unwrap();
        assert_eq!(saved, "Intro.m4a");
        assert_eq!(f.target.saved()[0].1, b"m4a audio");
        assert_eq!(f.surface.count(|e| *e == Event::Attached), 0);
    }

    #[tokio::test]
    async fn test_download_single_failure_is_reported() {
        let f = fixture();
        let err = f
            .builder
            .download_single(&record(3, "Ch1", "b.mp3"))
            .await
            .unwrap_err();

        assert!(matches!(err, HelperError::ChapterDownload { .. }));
        assert!(f.target.saved().is_empty());
        assert_eq!(f.surface.alerts(), vec![err.to_string()]);
    }

    #[test]
    fn test_compress_empty_reports_done() {
        let mut reported = Vec::new();
        let archive = compress_entries(&[], 6, |p| reported.push(p)).unwrap();
        assert!(entry_names(&archive).is_empty());
        assert_eq!(reported, vec![100.0]);
    }

    #[tokio::test]
    async fn test_repeated_chapter_names_share_one_entry() {
        let f = fixture();
        f.transport.serve(&format!("{}a.mp3", PRIMARY), b"first part");
        f.transport.serve(&format!("{}b.mp3", PRIMARY), b"intro audio");
        f.transport.serve(&format!("{}c.mp3", PRIMARY), b"second part");

        let chapters: ChapterMap = vec![
            record(2, "Chapter", "a.mp3"),
            record(3, "Intro", "b.mp3"),
            record(4, "Chapter", "c.mp3"),
        ]
        .into_iter()
        .collect();
        let saved = f
            .builder
            .build_archive("My Book", &chapters, &BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(saved.as_deref(), Some("My Book.zip"));

        let archive = &f.target.saved()[0].1;
        assert_eq!(entry_names(archive), vec!["Chapter.mp3", "Intro.mp3"]);
        assert_eq!(entry_bytes(archive, "Chapter.mp3"), b"second part");
        assert!(f.surface.alerts().is_empty());
    }

    #[test]
    fn test_compress_duplicate_names() {
        let entries = vec![
            ArchiveEntry {
                file_name: "Chapter.mp3".to_string(),
                bytes: vec![1; 10],
            },
            ArchiveEntry {
                file_name: "Chapter.mp3".to_string(),
                bytes: vec![2; 30],
            },
        ];
        let mut reported = Vec::new();
        let archive = compress_entries(&entries, 6, |p| reported.push(p)).unwrap();
        assert_eq!(entry_names(&archive), vec!["Chapter.mp3"]);
        assert_eq!(entry_bytes(&archive, "Chapter.mp3"), vec![2; 30]);
        assert_eq!(reported, vec![100.0, 100.0]);
    }

    #[test]
    fn test_chapter_file_name() {
        assert_eq!(chapter_file_name(&record(2, "Intro", "a.mp3")), "Intro.mp3");
        assert_eq!(
            chapter_file_name(&record(2, "Part 1.5", "x%2Fy.part.ogg")),
            "Part 1.5.ogg"
        );
    }
}
