//! The rewards ledger's own schema history, versions 1 through 14.
//!
//! Table shapes are kept as close to the historical ones as `SQLite` allows so
//! that files written by older releases migrate in place.

use rand::Rng;
use rusqlite::{Connection, params};
use tracing::info;

use super::steps::{self, Index, Rebuild, RowCopy};
use super::{Migration, MigrationSet};
use crate::errors::Result;
use crate::sqlite::schema;
use crate::value::{Value, ValueKind};

/// Highest version this release knows how to produce.
pub const LATEST_VERSION: u32 = 14;

/// Digits after the decimal point in a legacy `probi` amount.
const PROBI_DECIMALS: usize = 18;

pub(super) fn migrations() -> MigrationSet {
    MigrationSet {
        migrations: vec![
            Migration::apply(1, "publisher, activity and media tables", v1),
            Migration::apply(2, "reconcile stamp, contributions, recurring donations", v2),
            Migration::apply(3, "pending contributions", v3),
            Migration::apply(4, "activity visits", v4),
            Migration::sql(5, "activity visits floor", "UPDATE activity_info SET visits = 1 WHERE visits = 0;"),
            Migration::apply(6, "activity grouped by reconcile stamp", v6),
            Migration::apply(7, "server publisher tables", v7),
            Migration::apply(8, "contribution category renamed to type", v8),
            Migration::apply(9, "contribution queue", v9),
            Migration::apply(10, "promotions and unblinded tokens", v10),
            Migration::apply(11, "split contributions by publisher", v11),
            Migration::apply(12, "pending contribution ids", v12),
            Migration::apply(13, "promotion claim time", v13),
            Migration::sql(
                14,
                "promotion values",
                "UPDATE promotion SET approximate_value = (
                   SELECT (suggestions * 0.25) FROM promotion AS ps
                   WHERE ps.promotion_id = promotion.promotion_id);
                 UPDATE unblinded_tokens SET value = 0.25;",
            ),
        ],
    }
}

// ── Table shapes ────────────────────────────────────────────────────────────

const PUBLISHER_INFO_V1: &str = "
    publisher_id LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
    verified BOOLEAN DEFAULT 0 NOT NULL,
    excluded INTEGER DEFAULT 0 NOT NULL,
    name TEXT NOT NULL,
    favIcon TEXT NOT NULL,
    url TEXT NOT NULL,
    provider TEXT NOT NULL";

const PUBLISHER_INFO_V7: &str = "
    publisher_id LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
    excluded INTEGER DEFAULT 0 NOT NULL,
    name TEXT NOT NULL,
    favIcon TEXT NOT NULL,
    url TEXT NOT NULL,
    provider TEXT NOT NULL";

const ACTIVITY_INFO_V1: &str = "
    publisher_id LONGVARCHAR NOT NULL,
    duration INTEGER DEFAULT 0 NOT NULL,
    score DOUBLE DEFAULT 0 NOT NULL,
    percent INTEGER DEFAULT 0 NOT NULL,
    weight DOUBLE DEFAULT 0 NOT NULL,
    category INTEGER NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    CONSTRAINT fk_activity_info_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const ACTIVITY_INFO_V4: &str = "
    publisher_id LONGVARCHAR NOT NULL,
    duration INTEGER DEFAULT 0 NOT NULL,
    visits INTEGER DEFAULT 0 NOT NULL,
    score DOUBLE DEFAULT 0 NOT NULL,
    percent INTEGER DEFAULT 0 NOT NULL,
    weight DOUBLE DEFAULT 0 NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    reconcile_stamp INTEGER DEFAULT 0 NOT NULL,
    CONSTRAINT activity_unique UNIQUE (publisher_id, month, year, reconcile_stamp),
    CONSTRAINT fk_activity_info_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const ACTIVITY_INFO_V6: &str = "
    publisher_id LONGVARCHAR NOT NULL,
    duration INTEGER DEFAULT 0 NOT NULL,
    visits INTEGER DEFAULT 0 NOT NULL,
    score DOUBLE DEFAULT 0 NOT NULL,
    percent INTEGER DEFAULT 0 NOT NULL,
    weight DOUBLE DEFAULT 0 NOT NULL,
    reconcile_stamp INTEGER DEFAULT 0 NOT NULL,
    CONSTRAINT activity_unique UNIQUE (publisher_id, reconcile_stamp),
    CONSTRAINT fk_activity_info_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const ACTIVITY_INFO_INDEX: Index<'static> = Index {
    name: "activity_info_publisher_id_index",
    table: "activity_info",
    columns: "publisher_id",
};

const MEDIA_PUBLISHER_INFO: &str = "
    media_key TEXT NOT NULL PRIMARY KEY UNIQUE,
    publisher_id LONGVARCHAR NOT NULL,
    CONSTRAINT fk_media_publisher_info_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const CONTRIBUTION_INFO_V2: &str = "
    publisher_id LONGVARCHAR,
    probi TEXT DEFAULT '0' NOT NULL,
    date INTEGER NOT NULL,
    category INTEGER NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    CONSTRAINT fk_contribution_info_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const CONTRIBUTION_INFO_V8: &str = "
    publisher_id LONGVARCHAR,
    probi TEXT DEFAULT '0' NOT NULL,
    date INTEGER NOT NULL,
    type INTEGER NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    CONSTRAINT fk_contribution_info_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const CONTRIBUTION_INFO_V11: &str = "
    contribution_id TEXT NOT NULL,
    amount DOUBLE NOT NULL,
    type INTEGER NOT NULL,
    step INTEGER NOT NULL DEFAULT -1,
    retry_count INTEGER NOT NULL DEFAULT -1,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (contribution_id)";

const CONTRIBUTION_INFO_INDEX: Index<'static> = Index {
    name: "contribution_info_publisher_id_index",
    table: "contribution_info",
    columns: "publisher_id",
};

const CONTRIBUTION_INFO_PUBLISHERS: &str = "
    contribution_id TEXT NOT NULL,
    publisher_key TEXT NOT NULL,
    total_amount DOUBLE NOT NULL,
    contributed_amount DOUBLE,
    CONSTRAINT fk_contribution_info_publishers_contribution_id
      FOREIGN KEY (contribution_id) REFERENCES contribution_info (contribution_id)
      ON DELETE CASCADE,
    CONSTRAINT fk_contribution_info_publishers_publisher_id
      FOREIGN KEY (publisher_key) REFERENCES publisher_info (publisher_id)";

const CONTRIBUTION_INFO_PUBLISHERS_INDICES: [Index<'static>; 2] = [
    Index {
        name: "contribution_info_publishers_contribution_id_index",
        table: "contribution_info_publishers",
        columns: "contribution_id",
    },
    Index {
        name: "contribution_info_publishers_publisher_key_index",
        table: "contribution_info_publishers",
        columns: "publisher_key",
    },
];

const RECURRING_DONATION: &str = "
    publisher_id LONGVARCHAR NOT NULL PRIMARY KEY UNIQUE,
    amount DOUBLE DEFAULT 0 NOT NULL,
    added_date INTEGER DEFAULT 0 NOT NULL,
    CONSTRAINT fk_recurring_donation_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const RECURRING_DONATION_INDEX: Index<'static> = Index {
    name: "recurring_donation_publisher_id_index",
    table: "recurring_donation",
    columns: "publisher_id",
};

const PENDING_CONTRIBUTION_V3: &str = "
    publisher_id LONGVARCHAR NOT NULL,
    amount DOUBLE DEFAULT 0 NOT NULL,
    added_date INTEGER DEFAULT 0 NOT NULL,
    viewing_id LONGVARCHAR NOT NULL,
    category INTEGER NOT NULL,
    CONSTRAINT fk_pending_contribution_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const PENDING_CONTRIBUTION_V8: &str = "
    publisher_id LONGVARCHAR NOT NULL,
    amount DOUBLE DEFAULT 0 NOT NULL,
    added_date INTEGER DEFAULT 0 NOT NULL,
    viewing_id LONGVARCHAR NOT NULL,
    type INTEGER NOT NULL,
    CONSTRAINT fk_pending_contribution_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const PENDING_CONTRIBUTION_V12: &str = "
    pending_contribution_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    publisher_id LONGVARCHAR NOT NULL,
    amount DOUBLE DEFAULT 0 NOT NULL,
    added_date INTEGER DEFAULT 0 NOT NULL,
    viewing_id LONGVARCHAR NOT NULL,
    type INTEGER NOT NULL,
    CONSTRAINT fk_pending_contribution_publisher_id
      FOREIGN KEY (publisher_id) REFERENCES publisher_info (publisher_id)
      ON DELETE CASCADE";

const PENDING_CONTRIBUTION_INDEX: Index<'static> = Index {
    name: "pending_contribution_publisher_id_index",
    table: "pending_contribution",
    columns: "publisher_id",
};

const SERVER_PUBLISHER_TABLES: [(&str, &str, Index<'static>); 4] = [
    (
        "server_publisher_info",
        "publisher_key LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
         status INTEGER DEFAULT 0 NOT NULL,
         excluded INTEGER DEFAULT 0 NOT NULL,
         address TEXT NOT NULL",
        Index {
            name: "server_publisher_info_publisher_key_index",
            table: "server_publisher_info",
            columns: "publisher_key",
        },
    ),
    (
        "server_publisher_banner",
        "publisher_key LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
         title TEXT,
         description TEXT,
         background TEXT,
         logo TEXT,
         CONSTRAINT fk_server_publisher_banner_publisher_key
           FOREIGN KEY (publisher_key) REFERENCES server_publisher_info (publisher_key)
           ON DELETE CASCADE",
        Index {
            name: "server_publisher_banner_publisher_key_index",
            table: "server_publisher_banner",
            columns: "publisher_key",
        },
    ),
    (
        "server_publisher_links",
        "publisher_key LONGVARCHAR NOT NULL,
         provider TEXT,
         link TEXT,
         CONSTRAINT server_publisher_links_unique UNIQUE (publisher_key, provider),
         CONSTRAINT fk_server_publisher_links_publisher_key
           FOREIGN KEY (publisher_key) REFERENCES server_publisher_info (publisher_key)
           ON DELETE CASCADE",
        Index {
            name: "server_publisher_links_publisher_key_index",
            table: "server_publisher_links",
            columns: "publisher_key",
        },
    ),
    (
        "server_publisher_amounts",
        "publisher_key LONGVARCHAR NOT NULL,
         amount DOUBLE DEFAULT 0 NOT NULL,
         CONSTRAINT server_publisher_amounts_unique UNIQUE (publisher_key, amount),
         CONSTRAINT fk_server_publisher_amounts_publisher_key
           FOREIGN KEY (publisher_key) REFERENCES server_publisher_info (publisher_key)
           ON DELETE CASCADE",
        Index {
            name: "server_publisher_amounts_publisher_key_index",
            table: "server_publisher_amounts",
            columns: "publisher_key",
        },
    ),
];

const CONTRIBUTION_QUEUE: &str = "
    contribution_queue_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    type INTEGER NOT NULL,
    amount DOUBLE NOT NULL,
    partial INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL";

const CONTRIBUTION_QUEUE_PUBLISHERS: &str = "
    contribution_queue_id INTEGER NOT NULL,
    publisher_key TEXT NOT NULL,
    amount_percent DOUBLE NOT NULL,
    CONSTRAINT fk_contribution_queue_publishers_publisher_key
      FOREIGN KEY (publisher_key) REFERENCES publisher_info (publisher_id),
    CONSTRAINT fk_contribution_queue_publishers_id
      FOREIGN KEY (contribution_queue_id) REFERENCES contribution_queue (contribution_queue_id)
      ON DELETE CASCADE";

const PROMOTION: &str = "
    promotion_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    type INTEGER NOT NULL,
    public_keys TEXT NOT NULL,
    suggestions INTEGER NOT NULL DEFAULT 0,
    approximate_value DOUBLE NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0,
    expires_at TIMESTAMP NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (promotion_id)";

const PROMOTION_CREDS: &str = "
    promotion_id TEXT UNIQUE NOT NULL,
    tokens TEXT NOT NULL,
    blinded_creds TEXT NOT NULL,
    signed_creds TEXT,
    public_key TEXT,
    batch_proof TEXT,
    claim_id TEXT,
    CONSTRAINT fk_promotion_creds_promotion_id
      FOREIGN KEY (promotion_id) REFERENCES promotion (promotion_id) ON DELETE CASCADE";

const UNBLINDED_TOKENS: &str = "
    token_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    token_value TEXT,
    public_key TEXT,
    value DOUBLE NOT NULL DEFAULT 0,
    promotion_id TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    CONSTRAINT fk_unblinded_tokens_promotion_id
      FOREIGN KEY (promotion_id) REFERENCES promotion (promotion_id) ON DELETE CASCADE";

const PROMOTION_TABLES: [(&str, &str, Index<'static>); 3] = [
    (
        "promotion",
        PROMOTION,
        Index {
            name: "promotion_promotion_id_index",
            table: "promotion",
            columns: "promotion_id",
        },
    ),
    (
        "promotion_creds",
        PROMOTION_CREDS,
        Index {
            name: "promotion_creds_promotion_id_index",
            table: "promotion_creds",
            columns: "promotion_id",
        },
    ),
    (
        "unblinded_tokens",
        UNBLINDED_TOKENS,
        Index {
            name: "unblinded_tokens_token_id_index",
            table: "unblinded_tokens",
            columns: "token_id",
        },
    ),
];

// ── Steps ───────────────────────────────────────────────────────────────────

fn create_indexed(conn: &Connection, table: &str, definition: &str, index: Index<'_>) -> Result<()> {
    let _ = steps::create_table_if_absent(conn, table, definition)?;
    steps::create_index(conn, index)
}

fn v1(conn: &Connection) -> Result<()> {
    let _ = steps::create_table_if_absent(conn, "publisher_info", PUBLISHER_INFO_V1)?;
    let _ = steps::create_table_if_absent(conn, "activity_info", ACTIVITY_INFO_V1)?;
    let _ = steps::create_table_if_absent(conn, "media_publisher_info", MEDIA_PUBLISHER_INFO)?;
    Ok(())
}

fn v2(conn: &Connection) -> Result<()> {
    let _ = steps::add_column_if_absent(
        conn,
        "activity_info",
        "reconcile_stamp",
        "INTEGER DEFAULT 0 NOT NULL",
    )?;
    create_indexed(conn, "contribution_info", CONTRIBUTION_INFO_V2, CONTRIBUTION_INFO_INDEX)?;
    create_indexed(conn, "recurring_donation", RECURRING_DONATION, RECURRING_DONATION_INDEX)
}

fn v3(conn: &Connection) -> Result<()> {
    create_indexed(
        conn,
        "pending_contribution",
        PENDING_CONTRIBUTION_V3,
        PENDING_CONTRIBUTION_INDEX,
    )
}

fn v4(conn: &Connection) -> Result<()> {
    steps::rebuild_table(
        conn,
        &Rebuild {
            table: "activity_info",
            definition: ACTIVITY_INFO_V4,
            indices: &[ACTIVITY_INFO_INDEX],
            copy: RowCopy {
                into: "duration, month, percent, publisher_id, reconcile_stamp, score, weight, year",
                select: "duration, month, percent, publisher_id, reconcile_stamp, score, weight, year",
                tail: "",
            },
        },
    )?;
    conn.execute_batch("UPDATE activity_info SET visits = 5;")?;
    Ok(())
}

fn v6(conn: &Connection) -> Result<()> {
    steps::rebuild_table(
        conn,
        &Rebuild {
            table: "activity_info",
            definition: ACTIVITY_INFO_V6,
            indices: &[ACTIVITY_INFO_INDEX],
            copy: RowCopy {
                into: "publisher_id, reconcile_stamp, duration, percent, score, visits, weight",
                select: "publisher_id, reconcile_stamp, SUM(duration), SUM(percent), SUM(score), \
                         SUM(visits), SUM(weight)",
                tail: "GROUP BY publisher_id, reconcile_stamp",
            },
        },
    )
}

fn v7(conn: &Connection) -> Result<()> {
    steps::rebuild_table(
        conn,
        &Rebuild {
            table: "publisher_info",
            definition: PUBLISHER_INFO_V7,
            indices: &[],
            copy: RowCopy {
                into: "excluded, favIcon, name, provider, publisher_id, url",
                select: "excluded, favIcon, name, provider, publisher_id, url",
                tail: "",
            },
        },
    )?;
    for (table, definition, index) in SERVER_PUBLISHER_TABLES {
        create_indexed(conn, table, definition, index)?;
    }
    Ok(())
}

fn v8(conn: &Connection) -> Result<()> {
    steps::rebuild_table(
        conn,
        &Rebuild {
            table: "contribution_info",
            definition: CONTRIBUTION_INFO_V8,
            indices: &[CONTRIBUTION_INFO_INDEX],
            copy: RowCopy {
                into: "type, date, month, probi, publisher_id, year",
                select: "category, date, month, probi, publisher_id, year",
                tail: "",
            },
        },
    )?;
    steps::rebuild_table(
        conn,
        &Rebuild {
            table: "pending_contribution",
            definition: PENDING_CONTRIBUTION_V8,
            indices: &[PENDING_CONTRIBUTION_INDEX],
            copy: RowCopy {
                into: "added_date, amount, type, publisher_id, viewing_id",
                select: "added_date, amount, category, publisher_id, viewing_id",
                tail: "",
            },
        },
    )
}

fn v9(conn: &Connection) -> Result<()> {
    let _ = steps::create_table_if_absent(conn, "contribution_queue", CONTRIBUTION_QUEUE)?;
    let _ = steps::create_table_if_absent(
        conn,
        "contribution_queue_publishers",
        CONTRIBUTION_QUEUE_PUBLISHERS,
    )?;
    Ok(())
}

fn v10(conn: &Connection) -> Result<()> {
    for (table, definition, index) in PROMOTION_TABLES {
        create_indexed(conn, table, definition, index)?;
    }
    Ok(())
}

/// A `contribution_info` row as stored before version 11.
#[derive(Debug)]
struct LegacyContribution {
    publisher_id: Option<String>,
    probi: String,
    date: i64,
    kind: i64,
}

fn v11(conn: &Connection) -> Result<()> {
    let legacy = if schema::table_exists(conn, "contribution_info")? {
        Some(steps::rename_aside(conn, "contribution_info", &[CONTRIBUTION_INFO_INDEX])?)
    } else {
        None
    };

    steps::create_table(conn, "contribution_info", CONTRIBUTION_INFO_V11)?;
    steps::drop_table(conn, "contribution_info_publishers")?;
    steps::create_table(conn, "contribution_info_publishers", CONTRIBUTION_INFO_PUBLISHERS)?;
    for index in CONTRIBUTION_INFO_PUBLISHERS_INDICES {
        steps::create_index(conn, index)?;
    }

    let Some(legacy) = legacy else {
        return Ok(());
    };

    let rows = read_legacy_contributions(conn, &legacy)?;
    let mut parent = conn.prepare(
        "INSERT INTO contribution_info
           (contribution_id, amount, type, step, retry_count, created_at)
         VALUES (?1, ?2, ?3, -1, -1, ?4)",
    )?;
    let mut child = conn.prepare(
        "INSERT INTO contribution_info_publishers
           (contribution_id, publisher_key, total_amount, contributed_amount)
         VALUES (?1, ?2, ?3, ?3)",
    )?;

    let mut rng = rand::rng();
    let mut publishers = 0_usize;
    for (ordinal, row) in rows.iter().enumerate() {
        let id = contribution_id(row.date, ordinal, rng.random());
        let amount = probi_to_amount(&row.probi);
        let _ = parent.execute(params![id, amount, row.kind, row.date])?;
        if let Some(publisher) = row.publisher_id.as_deref().filter(|p| !p.is_empty()) {
            let _ = child.execute(params![id, publisher, amount])?;
            publishers += 1;
        }
    }
    drop(parent);
    drop(child);

    steps::drop_table(conn, &legacy)?;
    info!(contributions = rows.len(), publishers, "legacy contributions split");
    Ok(())
}

fn read_legacy_contributions(conn: &Connection, table: &str) -> Result<Vec<LegacyContribution>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT publisher_id, probi, date, type FROM {table} ORDER BY rowid"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            let probi = Value::decode(row.get_ref(1)?, ValueKind::String);
            Ok(LegacyContribution {
                publisher_id: row.get(0)?,
                probi: probi.as_str().unwrap_or_default().to_owned(),
                date: row.get(2)?,
                kind: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn v12(conn: &Connection) -> Result<()> {
    steps::rebuild_table(
        conn,
        &Rebuild {
            table: "pending_contribution",
            definition: PENDING_CONTRIBUTION_V12,
            indices: &[PENDING_CONTRIBUTION_INDEX],
            copy: RowCopy {
                into: "added_date, amount, publisher_id, type, viewing_id",
                select: "added_date, amount, publisher_id, type, viewing_id",
                tail: "",
            },
        },
    )
}

fn v13(conn: &Connection) -> Result<()> {
    let _ = steps::add_column_if_absent(conn, "promotion", "claimed_at", "TIMESTAMP")?;
    Ok(())
}

/// Synthetic key for a split legacy contribution.
///
/// The ordinal keeps keys distinct within one run even when dates collide;
/// the random suffix keeps them distinct across runs.
pub(crate) fn contribution_id(date: i64, ordinal: usize, suffix: u32) -> String {
    format!("id_{date}_{ordinal}_{suffix:08x}")
}

/// Convert an 18-decimal fixed-point string to an amount with one decimal.
///
/// `"100000000000000000000"` is `100.0`; `"1570000000000000000"` is `1.5`
/// (truncated, not rounded). Anything that is not a run of ASCII digits is `0.0`.
pub(crate) fn probi_to_amount(probi: &str) -> f64 {
    let digits = probi.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return 0.0;
    }
    let padded = format!("{digits:0>width$}", width = PROBI_DECIMALS + 1);
    let (whole, fraction) = padded.split_at(padded.len() - PROBI_DECIMALS);
    format!("{whole}.{}", &fraction[..1]).parse().unwrap_or(0.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::{StoreConfig, open};

    fn open_unenforced() -> Connection {
        open(&StoreConfig {
            foreign_keys: false,
            ..StoreConfig::memory()
        })
        .unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn seed_v3(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO publisher_info (publisher_id, verified, excluded, name, favIcon, url, provider)
               VALUES ('pub_a', 1, 0, 'A', '', 'https://a.example', ''),
                      ('pub_b', 0, 0, 'B', '', 'https://b.example', 'youtube');
             INSERT INTO activity_info (publisher_id, duration, score, percent, weight, category, month, year, reconcile_stamp)
               VALUES ('pub_a', 10, 1.0, 40, 40.0, 2, 1, 2019, 7),
                      ('pub_a', 20, 2.0, 20, 20.0, 2, 2, 2019, 7),
                      ('pub_b', 30, 3.0, 40, 40.0, 2, 2, 2019, 7);
             INSERT INTO contribution_info (publisher_id, probi, date, category, month, year)
               VALUES ('pub_a', '1570000000000000000', 1550000000, 8, 2, 2019),
                      (NULL, '25000000000000000000', 1550000100, 2, 2, 2019);
             INSERT INTO pending_contribution (publisher_id, amount, added_date, viewing_id, category)
               VALUES ('pub_b', 5.0, 1550000200, 'view-1', 8);",
        )
        .unwrap();
    }

    fn activity_rows(conn: &Connection) -> Vec<(String, i64, i64)> {
        let mut stmt = conn
            .prepare("SELECT publisher_id, duration, visits FROM activity_info ORDER BY publisher_id")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    fn contribution_rows(conn: &Connection) -> Vec<(f64, i64, Option<String>)> {
        let mut stmt = conn
            .prepare(
                "SELECT ci.amount, ci.type, cip.publisher_key
                 FROM contribution_info ci
                 LEFT JOIN contribution_info_publishers cip USING (contribution_id)
                 ORDER BY ci.created_at",
            )
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn full_history_produces_latest_tables() {
        let conn = open_unenforced();
        assert_eq!(migrations().migrate(&conn, 0, 14).unwrap(), 14);
        for table in [
            "publisher_info",
            "activity_info",
            "media_publisher_info",
            "contribution_info",
            "contribution_info_publishers",
            "recurring_donation",
            "pending_contribution",
            "server_publisher_info",
            "server_publisher_banner",
            "server_publisher_links",
            "server_publisher_amounts",
            "contribution_queue",
            "contribution_queue_publishers",
            "promotion",
            "promotion_creds",
            "unblinded_tokens",
        ] {
            assert!(schema::table_exists(&conn, table).unwrap(), "{table} missing");
        }
        assert!(schema::column_exists(&conn, "promotion", "claimed_at").unwrap());
        assert!(schema::column_exists(&conn, "pending_contribution", "pending_contribution_id").unwrap());
        assert!(!schema::column_exists(&conn, "publisher_info", "verified").unwrap());
        assert!(!schema::table_exists(&conn, "contribution_info_temp").unwrap());
    }

    #[test]
    fn table_creation_step_is_idempotent() {
        let conn = open_unenforced();
        v1(&conn).unwrap();
        v2(&conn).unwrap();
        let once = schema::dump(&conn).unwrap();
        v1(&conn).unwrap();
        v2(&conn).unwrap();
        assert_eq!(once, schema::dump(&conn).unwrap());
    }

    #[test]
    fn one_jump_equals_stepwise() {
        let direct = open_unenforced();
        let stepped = open_unenforced();
        let set = migrations();

        for conn in [&direct, &stepped] {
            let _ = set.migrate(conn, 0, 3).unwrap();
            seed_v3(conn);
        }
        let _ = set.migrate(&direct, 3, 14).unwrap();
        for (from, to) in [(3, 5), (5, 8), (8, 11), (11, 14)] {
            let _ = set.migrate(&stepped, from, to).unwrap();
        }

        assert_eq!(schema::dump(&direct).unwrap(), schema::dump(&stepped).unwrap());
        assert_eq!(activity_rows(&direct), activity_rows(&stepped));
        assert_eq!(contribution_rows(&direct), contribution_rows(&stepped));
    }

    #[test]
    fn activity_history_is_merged() {
        let conn = open_unenforced();
        let set = migrations();
        let _ = set.migrate(&conn, 0, 3).unwrap();
        seed_v3(&conn);
        let _ = set.migrate(&conn, 3, 6).unwrap();

        // Both months of pub_a collapse into one row per reconcile stamp.
        assert_eq!(
            activity_rows(&conn),
            vec![("pub_a".to_string(), 30, 10), ("pub_b".to_string(), 30, 5)]
        );
    }

    #[test]
    fn publisher_rebuild_keeps_references() {
        let conn = open_unenforced();
        let _ = migrations().migrate(&conn, 0, 7).unwrap();
        let dump = schema::dump(&conn).unwrap();
        assert!(!dump.contains("publisher_info_temp"));
        assert!(dump.contains("REFERENCES publisher_info (publisher_id)"));
    }

    #[test]
    fn legacy_contributions_split_by_publisher() {
        let conn = open_unenforced();
        let set = migrations();
        let _ = set.migrate(&conn, 0, 10).unwrap();
        conn.execute_batch(
            "INSERT INTO publisher_info (publisher_id, excluded, name, favIcon, url, provider)
               VALUES ('pub_a', 0, 'A', '', 'https://a.example', '');
             INSERT INTO contribution_info (publisher_id, probi, date, type, month, year)
               VALUES ('pub_a', '100000000000000000000', 1700000000, 0, 11, 2023),
                      ('', '2500000000000000000', 1700000050, 2, 11, 2023),
                      (NULL, 'garbage', 1700000099, 2, 11, 2023);",
        )
        .unwrap();

        let _ = set.migrate(&conn, 10, 11).unwrap();

        assert_eq!(count(&conn, "contribution_info"), 3);
        assert_eq!(count(&conn, "contribution_info_publishers"), 1);

        let (id, amount, kind, step, retry, created): (String, f64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT contribution_id, amount, type, step, retry_count, created_at
                 FROM contribution_info WHERE created_at = 1700000000",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .unwrap();
        assert!(id.starts_with("id_1700000000_0_"));
        assert!((amount - 100.0).abs() < f64::EPSILON);
        assert_eq!((kind, step, retry, created), (0, -1, -1, 1_700_000_000));

        let (child_id, publisher, total, contributed): (String, String, f64, f64) = conn
            .query_row(
                "SELECT contribution_id, publisher_key, total_amount, contributed_amount
                 FROM contribution_info_publishers",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(child_id, id);
        assert_eq!(publisher, "pub_a");
        assert!((total - 100.0).abs() < f64::EPSILON);
        assert!((contributed - 100.0).abs() < f64::EPSILON);

        let amounts: Vec<f64> = conn
            .prepare("SELECT amount FROM contribution_info ORDER BY created_at")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(amounts, vec![100.0, 2.5, 0.0]);
        assert!(!schema::table_exists(&conn, "contribution_info_temp").unwrap());
    }

    #[test]
    fn synthetic_ids_are_distinct_for_same_date() {
        let a = contribution_id(1_700_000_000, 0, 0xdead_beef);
        let b = contribution_id(1_700_000_000, 1, 0xdead_beef);
        assert_eq!(a, "id_1700000000_0_deadbeef");
        assert_ne!(a, b);
        assert_eq!(contribution_id(5, 2, 1), "id_5_2_00000001");
    }

    #[test]
    fn probi_conversion() {
        assert!((probi_to_amount("100000000000000000000") - 100.0).abs() < f64::EPSILON);
        assert!((probi_to_amount("1570000000000000000") - 1.5).abs() < f64::EPSILON);
        assert!((probi_to_amount("999999999999999999") - 0.9).abs() < f64::EPSILON);
        assert!(probi_to_amount("5").abs() < f64::EPSILON);
        assert!(probi_to_amount("0").abs() < f64::EPSILON);
        assert!(probi_to_amount("").abs() < f64::EPSILON);
        assert!(probi_to_amount("12.5").abs() < f64::EPSILON);
        assert!(probi_to_amount("-100000000000000000000").abs() < f64::EPSILON);
    }

    #[test]
    fn promotion_values_recomputed() {
        let conn = open_unenforced();
        let set = migrations();
        let _ = set.migrate(&conn, 0, 13).unwrap();
        conn.execute_batch(
            "INSERT INTO promotion (promotion_id, version, type, public_keys, suggestions, expires_at)
               VALUES ('promo', 5, 0, '[]', 40, 0);
             INSERT INTO unblinded_tokens (token_value, public_key, value, promotion_id)
               VALUES ('t', 'k', 1.0, 'promo');",
        )
        .unwrap();
        let _ = set.migrate(&conn, 13, 14).unwrap();

        let approx: f64 = conn
            .query_row("SELECT approximate_value FROM promotion", [], |row| row.get(0))
            .unwrap();
        let value: f64 = conn
            .query_row("SELECT value FROM unblinded_tokens", [], |row| row.get(0))
            .unwrap();
        assert!((approx - 10.0).abs() < f64::EPSILON);
        assert!((value - 0.25).abs() < f64::EPSILON);
    }
}
