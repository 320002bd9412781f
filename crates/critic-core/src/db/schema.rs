/// Created unconditionally on open, before the version is read.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// Full v1 schema.
///
/// Offsets in `chunks` are 0-based. Line numbers in `commentchainlines` and
/// `codecontexts` are 1-based and inclusive.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS repositories (
        id    INTEGER PRIMARY KEY,
        name  TEXT    NOT NULL UNIQUE,
        path  TEXT    NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS users (
        id        INTEGER PRIMARY KEY,
        name      TEXT    NOT NULL UNIQUE,
        fullname  TEXT    NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS files (
        id    INTEGER PRIMARY KEY,
        path  TEXT    NOT NULL UNIQUE
    ) STRICT;

    CREATE TABLE IF NOT EXISTS changesets (
        id          INTEGER PRIMARY KEY,
        repository  INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        type        TEXT    NOT NULL
                            CHECK(type IN ('direct', 'custom', 'merge', 'conflicts')),
        parent      TEXT,
        child       TEXT    NOT NULL,
        UNIQUE (repository, type, parent, child)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS fileversions (
        changeset  INTEGER NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
        file       INTEGER NOT NULL REFERENCES files(id),
        old_sha1   TEXT    NOT NULL,
        new_sha1   TEXT    NOT NULL,
        old_mode   INTEGER,
        new_mode   INTEGER,
        PRIMARY KEY (changeset, file)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS chunks (
        id             INTEGER PRIMARY KEY,
        changeset      INTEGER NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
        file           INTEGER NOT NULL REFERENCES files(id),
        delete_offset  INTEGER NOT NULL,
        delete_count   INTEGER NOT NULL,
        insert_offset  INTEGER NOT NULL,
        insert_count   INTEGER NOT NULL,
        analysis       TEXT    NOT NULL DEFAULT '',
        whitespace     INTEGER NOT NULL DEFAULT 0
    ) STRICT;
    CREATE INDEX IF NOT EXISTS chunks_changeset_file ON chunks(changeset, file);

    CREATE TABLE IF NOT EXISTS reviews (
        id          INTEGER PRIMARY KEY,
        repository  INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        summary     TEXT    NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS reviewchangesets (
        review     INTEGER NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
        changeset  INTEGER NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
        PRIMARY KEY (review, changeset)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS commentchains (
        id            INTEGER PRIMARY KEY,
        review        INTEGER NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
        uid           INTEGER NOT NULL REFERENCES users(id),
        type          TEXT    NOT NULL CHECK(type IN ('issue', 'note')),
        state         TEXT    NOT NULL DEFAULT 'draft'
                              CHECK(state IN ('draft', 'open', 'resolved', 'addressed')),
        origin        TEXT    CHECK(origin IN ('old', 'new')),
        file          INTEGER REFERENCES files(id),
        first_commit  TEXT    NOT NULL,
        last_commit   TEXT    NOT NULL,
        closed_by     INTEGER REFERENCES users(id),
        addressed_by  TEXT
    ) STRICT;
    CREATE INDEX IF NOT EXISTS commentchains_review_file ON commentchains(review, file);

    CREATE TABLE IF NOT EXISTS commentchainlines (
        chain       INTEGER NOT NULL REFERENCES commentchains(id) ON DELETE CASCADE,
        uid         INTEGER NOT NULL REFERENCES users(id),
        state       TEXT    NOT NULL DEFAULT 'draft' CHECK(state IN ('draft', 'current')),
        sha1        TEXT    NOT NULL,
        first_line  INTEGER NOT NULL,
        last_line   INTEGER NOT NULL,
        PRIMARY KEY (chain, sha1)
    ) STRICT;
    CREATE INDEX IF NOT EXISTS commentchainlines_sha1 ON commentchainlines(sha1);

    CREATE TABLE IF NOT EXISTS comments (
        id       INTEGER PRIMARY KEY,
        chain    INTEGER NOT NULL REFERENCES commentchains(id) ON DELETE CASCADE,
        uid      INTEGER NOT NULL REFERENCES users(id),
        time     TEXT    NOT NULL,
        state    TEXT    NOT NULL DEFAULT 'draft' CHECK(state IN ('draft', 'current')),
        comment  TEXT    NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS codecontexts (
        sha1        TEXT    NOT NULL,
        context     TEXT    NOT NULL,
        first_line  INTEGER NOT NULL,
        last_line   INTEGER NOT NULL
    ) STRICT;
    CREATE INDEX IF NOT EXISTS codecontexts_sha1 ON codecontexts(sha1, first_line);
";

/// Forward-only migration; safe to run on every open.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )?;

    if version < 1 {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA_V1_SQL)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
    }

    Ok(())
}
