use indexmap::map::Values;
use indexmap::IndexMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChapterRecord {
    pub index: u32,
    pub name: String,
    /// Relative media path, already URI-component encoded.
    pub media_path: String,
}

/// Chapters keyed by track number, iterated in the order they were first
/// inserted. Re-inserting an existing key replaces the record in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChapterMap {
    entries: IndexMap<u32, ChapterRecord>,
}

impl ChapterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ChapterRecord) {
        self.entries.insert(record.index, record);
    }

    pub fn remove(&mut self, index: u32) -> Option<ChapterRecord> {
        self.entries.shift_remove(&index)
    }

    pub fn get(&self, index: u32) -> Option<&ChapterRecord> {
        self.entries.get(&index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> Values<'_, u32, ChapterRecord> {
        self.entries.values()
    }
}

impl<'a> IntoIterator for &'a ChapterMap {
    type Item = &'a ChapterRecord;
    type IntoIter = Values<'a, u32, ChapterRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

impl FromIterator<ChapterRecord> for ChapterMap {
    fn from_iter<T: IntoIterator<Item = ChapterRecord>>(iter: T) -> Self {
        let mut map = ChapterMap::new();
        for record in iter {
            map.insert(record);
        }
        map
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    FetchingCover,
    FetchingChapters,
    Compressing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::FetchingCover => "Fetching the cover image",
            Phase::FetchingChapters => "Fetching chapters",
            Phase::Compressing => "Creating archive",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active(Phase),
    Finished,
}

/// Progress counters of one archive build.
#[derive(Clone, Debug)]
pub struct DownloadSession {
    pub state: SessionState,
    pub current_count: usize,
    pub total_count: usize,
}

impl DownloadSession {
    pub fn new(total_count: usize) -> Self {
        Self {
            state: SessionState::Created,
            current_count: 0,
            total_count,
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        self.state = SessionState::Active(phase);
    }

    pub fn finish(&mut self) {
        self.state = SessionState::Finished;
    }

    /// Advances the chapter counter and returns the chapter percentage.
    pub fn advance(&mut self) -> f64 {
        self.current_count += 1;
        if self.total_count == 0 {
            return 100.0;
        }
        self.current_count as f64 / self.total_count as f64 * 100.0
    }
}

#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
