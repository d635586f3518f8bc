use coursemail_sql::SQLStore;

use crate::service::MailError;

/// Initialize the SQLite schema for the mail tables and the directory
/// snapshot tables.
pub fn init_schema(sql: &dyn SQLStore) -> Result<(), MailError> {
    let statements = [
        // Directory snapshot: courses
        "CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY,
            shortname TEXT NOT NULL,
            fullname TEXT NOT NULL,
            visible INTEGER NOT NULL DEFAULT 1,
            groupmode INTEGER NOT NULL DEFAULT 0,
            defaultgroupingid INTEGER NOT NULL DEFAULT 0
        )",

        // Directory snapshot: users
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            firstname TEXT NOT NULL,
            lastname TEXT NOT NULL,
            email TEXT NOT NULL
        )",

        // Directory snapshot: course enrolments with role assignments
        "CREATE TABLE IF NOT EXISTS enrolments (
            courseid INTEGER NOT NULL,
            userid INTEGER NOT NULL,
            roleid INTEGER NOT NULL,
            PRIMARY KEY (courseid, userid, roleid)
        )",
        "CREATE INDEX IF NOT EXISTS idx_enrolments_user ON enrolments(userid)",

        // Directory snapshot: course groups and membership
        "CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY,
            courseid INTEGER NOT NULL,
            name TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_groups_course ON groups(courseid)",
        "CREATE TABLE IF NOT EXISTS group_members (
            groupid INTEGER NOT NULL,
            userid INTEGER NOT NULL,
            PRIMARY KEY (groupid, userid)
        )",
        "CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(userid)",

        // Capability grants, for the stored capability oracle
        "CREATE TABLE IF NOT EXISTS capability_grants (
            userid INTEGER NOT NULL,
            courseid INTEGER NOT NULL,
            capability TEXT NOT NULL,
            PRIMARY KEY (userid, courseid, capability)
        )",

        // Labels, private to one user
        "CREATE TABLE IF NOT EXISTS labels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            userid INTEGER NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL DEFAULT ''
        )",
        "CREATE INDEX IF NOT EXISTS idx_labels_user ON labels(userid)",

        // Messages: the canonical record
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            courseid INTEGER NOT NULL,
            subject TEXT NOT NULL,
            content TEXT NOT NULL,
            format INTEGER NOT NULL,
            attachments INTEGER NOT NULL,
            draft INTEGER NOT NULL,
            time INTEGER NOT NULL,
            normalizedsubject TEXT NOT NULL,
            normalizedcontent TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_messages_course ON messages(courseid)",
        "CREATE INDEX IF NOT EXISTS idx_messages_time ON messages(time, id)",

        // Reply/forward lineage
        "CREATE TABLE IF NOT EXISTS message_refs (
            messageid INTEGER NOT NULL,
            reference INTEGER NOT NULL,
            PRIMARY KEY (messageid, reference)
        )",
        "CREATE INDEX IF NOT EXISTS idx_message_refs_ref ON message_refs(reference)",

        // Per-user projection. course/draft/time are duplicated from the
        // message so the common searches hit a single table.
        "CREATE TABLE IF NOT EXISTS message_users (
            messageid INTEGER NOT NULL,
            courseid INTEGER NOT NULL,
            draft INTEGER NOT NULL,
            time INTEGER NOT NULL,
            userid INTEGER NOT NULL,
            role INTEGER NOT NULL,
            unread INTEGER NOT NULL,
            starred INTEGER NOT NULL,
            deleted INTEGER NOT NULL,
            PRIMARY KEY (messageid, userid)
        )",
        "CREATE INDEX IF NOT EXISTS idx_message_users_user
            ON message_users(userid, courseid, deleted, role, time, messageid)",

        // Per-label projection, mirroring the owning user's state so
        // label-scoped counts need no join to message_users.
        "CREATE TABLE IF NOT EXISTS message_labels (
            messageid INTEGER NOT NULL,
            courseid INTEGER NOT NULL,
            draft INTEGER NOT NULL,
            time INTEGER NOT NULL,
            labelid INTEGER NOT NULL,
            role INTEGER NOT NULL,
            unread INTEGER NOT NULL,
            starred INTEGER NOT NULL,
            deleted INTEGER NOT NULL,
            PRIMARY KEY (messageid, labelid)
        )",
        "CREATE INDEX IF NOT EXISTS idx_message_labels_label
            ON message_labels(labelid, courseid, deleted, role, time, messageid)",
    ];

    for statement in statements {
        sql.exec(statement, &[])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use coursemail_sql::SqliteStore;

    #[test]
    fn init_schema_is_idempotent() {
        let sql = SqliteStore::open_in_memory().unwrap();
        init_schema(&sql).unwrap();
        init_schema(&sql).unwrap();
        let rows = sql
            .query("SELECT COUNT(*) AS n FROM messages", &[])
            .unwrap();
        assert_eq!(rows[0].get_i64("n"), Some(0));
    }
}
