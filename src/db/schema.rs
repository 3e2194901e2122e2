pub const SCHEMA: &str = r#"
-- Videos: one row per source URL, kept even when the video is rejected
CREATE TABLE IF NOT EXISTS videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    transcript_type TEXT NOT NULL DEFAULT 'none',  -- none/manual/auto
    num_people INTEGER,
    status TEXT NOT NULL DEFAULT 'processing',     -- processing/completed/rejected
    rejection_reason TEXT,
    duration_secs REAL,
    view_count INTEGER,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status);

-- Segments: caption-aligned slices of a video that are still in the dataset
CREATE TABLE IF NOT EXISTS segments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id INTEGER NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    text TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',

    -- Face tracking: JSON {frame: {track: [x1, y1, x2, y2]}}
    frame_detections TEXT,

    -- Speech recognition
    asr_text TEXT,
    asr_confidence REAL,

    -- Synchronisation
    sync_confidence REAL,
    speaker_track INTEGER,
    av_offset INTEGER,

    -- Head pose (degrees)
    pitch REAL,
    roll REAL,
    yaw REAL,
    direction TEXT,

    -- Identity within the video, -1 when no embedding was available
    local_identity INTEGER NOT NULL DEFAULT -1,

    -- Forced alignment: JSON [[text, start, end, score], ...]
    fa_log_likelihood REAL,
    fa_alignment TEXT,

    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_segments_video ON segments(video_id);
CREATE INDEX IF NOT EXISTS idx_segments_state ON segments(state);

-- Words: aligned single-word clips re-checked by speech recognition
CREATE TABLE IF NOT EXISTS words (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    segment_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    start_secs REAL NOT NULL,
    end_secs REAL NOT NULL,
    alignment_score REAL NOT NULL,
    asr_text TEXT,
    asr_confidence REAL,
    FOREIGN KEY (segment_id) REFERENCES segments(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_words_segment ON words(segment_id);

-- Audit trail of segments removed at a gate
CREATE TABLE IF NOT EXISTS segment_rejections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id INTEGER NOT NULL,
    segment_id INTEGER NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    stage TEXT NOT NULL,
    reason TEXT NOT NULL,
    rejected_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_segment_rejections_stage ON segment_rejections(stage);
"#;

/// Additive migrations for databases created by earlier versions.
/// Failures are ignored: a column that already exists is the expected case.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE videos ADD COLUMN title TEXT",
    "CREATE INDEX IF NOT EXISTS idx_segment_rejections_video ON segment_rejections(video_id)",
];
