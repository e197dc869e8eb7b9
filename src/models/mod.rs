mod chart;
mod cursor;
mod post;
mod song;

pub use chart::{dominant_bpm, Chart, ChartId, ChartStats};
pub use cursor::SyncCursor;
pub use post::{Post, PostAuthor, PostOrder, PostPage, PostPageEntry, PostTag};
pub use song::{BpmSegment, DifficultyInfo, DifficultyLabel, Server, SongDetail, SongSummary};

/// Version stamped on every stored document. Bump when the typed shape of a
/// stored document changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;
