pub const SCHEMA: &str = r#"
-- songs table: full catalog detail plus derived tempo
CREATE TABLE IF NOT EXISTS songs (
    id INTEGER PRIMARY KEY,
    doc TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    main_bpm REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_songs_main_bpm ON songs(main_bpm);

-- charts table: one row per confirmed song difficulty
CREATE TABLE IF NOT EXISTS charts (
    id TEXT PRIMARY KEY,
    song_id INTEGER NOT NULL,
    difficulty TEXT NOT NULL,
    doc TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_charts_song_id ON charts(song_id);

-- posts table: chart submissions plus precomputed chart statistics
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY,
    doc TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    chart_time REAL,
    chart_notes INTEGER,
    chart_main_bpm REAL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_posts_chart_notes ON posts(chart_notes);
CREATE INDEX IF NOT EXISTS idx_posts_chart_main_bpm ON posts(chart_main_bpm);

-- quarantine table: upstream documents that failed to parse
CREATE TABLE IF NOT EXISTS quarantine (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    record_id TEXT NOT NULL,
    body TEXT NOT NULL,
    reason TEXT NOT NULL,
    quarantined_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(kind, record_id)
);
"#;
