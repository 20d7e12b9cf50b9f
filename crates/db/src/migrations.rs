/// Schema migration applied by SQL backends.
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    pub up: &'static str,
}

/// Migrations in application order. Ids must sort in the same order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "001_titles",
        up: r#"
            CREATE TABLE IF NOT EXISTS titles (
                id          UUID PRIMARY KEY,
                title       TEXT NOT NULL CHECK (title <> ''),
                author      TEXT NOT NULL CHECK (author <> ''),
                details     TEXT NOT NULL,
                price       DOUBLE PRECISION NOT NULL CHECK (price >= 0),
                course      TEXT NOT NULL,
                branch      TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL,
                updated_at  TIMESTAMPTZ NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS titles_title_author_unique
                ON titles (lower(btrim(title)), lower(btrim(author)));
            CREATE INDEX IF NOT EXISTS titles_created_at ON titles (created_at, id);
        "#,
    },
    Migration {
        id: "002_copies",
        up: r#"
            CREATE TABLE IF NOT EXISTS copies (
                id          TEXT PRIMARY KEY,
                title_id    UUID NOT NULL REFERENCES titles (id),
                issued      BOOLEAN NOT NULL DEFAULT FALSE,
                tampered    BOOLEAN NOT NULL DEFAULT FALSE,
                created_at  TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS copies_title_id ON copies (title_id, created_at);
        "#,
    },
    Migration {
        id: "003_loans",
        up: r#"
            CREATE TABLE IF NOT EXISTS loans (
                id             UUID PRIMARY KEY,
                borrower_id    TEXT NOT NULL,
                borrower_kind  TEXT NOT NULL CHECK (borrower_kind IN ('student', 'faculty')),
                librarian_id   TEXT NOT NULL,
                copy_id        TEXT NOT NULL REFERENCES copies (id),
                issue_date     TIMESTAMPTZ NOT NULL,
                return_date    TIMESTAMPTZ,
                returned       BOOLEAN NOT NULL DEFAULT FALSE,
                remarks        TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS loans_one_open_per_copy
                ON loans (copy_id) WHERE NOT returned;
            CREATE INDEX IF NOT EXISTS loans_borrower
                ON loans (borrower_kind, borrower_id, issue_date DESC);
        "#,
    },
    Migration {
        id: "004_sequence_counters",
        up: r#"
            CREATE TABLE IF NOT EXISTS sequence_counters (
                name    TEXT PRIMARY KEY,
                prefix  CHAR(2) NOT NULL,
                number  INTEGER NOT NULL CHECK (number >= 0)
            );
        "#,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_ids_are_unique_and_ordered() {
        let ids: Vec<&str> = MIGRATIONS.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }
}
