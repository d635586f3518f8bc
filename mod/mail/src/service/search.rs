//! Message search: one parameterized query over the per-user (or
//! per-label) projection joined to the message record.

use std::collections::BTreeMap;

use coursemail_sql::Value;

use crate::model::{normalize_text, CourseId, LabelId, Message, MessageId, Role, UserId};
use crate::service::{MailError, MailService};

/// Search parameters. All predicates are conjunctive.
#[derive(Debug, Clone)]
pub struct MessageSearch {
    /// The user whose view is searched.
    pub user: UserId,
    /// Restrict to one course. Otherwise every course the user may use
    /// mail in is searched.
    pub course: Option<CourseId>,
    /// Restrict to messages carrying one of the user's labels.
    pub label: Option<LabelId>,
    /// Restrict to drafts (true) or sent messages (false).
    pub draft: Option<bool>,
    /// Restrict to rows where the user holds one of these roles.
    pub roles: Vec<Role>,
    pub unread: Option<bool>,
    pub starred: Option<bool>,
    /// false searches the inbox side (not deleted), true the trash.
    pub deleted: bool,
    /// Match against subject, content or any visible participant name.
    pub content: String,
    /// Match against the sender's name.
    pub sendername: String,
    /// Match against to/cc recipient names.
    pub recipientname: String,
    pub with_files_only: bool,
    /// Only messages with time at or before this instant. 0 disables.
    pub max_time: i64,
    /// Exclusive cursor: only messages older than this one.
    pub start: Option<MessageId>,
    /// Exclusive cursor: only messages newer than this one.
    pub stop: Option<MessageId>,
    /// Walk from older to newer. Cursors swap meaning and results come
    /// back oldest first.
    pub reverse: bool,
}

impl MessageSearch {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            course: None,
            label: None,
            draft: None,
            roles: Vec::new(),
            unread: None,
            starred: None,
            deleted: false,
            content: String::new(),
            sendername: String::new(),
            recipientname: String::new(),
            with_files_only: false,
            max_time: 0,
            start: None,
            stop: None,
            reverse: false,
        }
    }
}

/// Escapes LIKE wildcards, for use with `ESCAPE '\'`.
pub(crate) fn escape_like(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn name_condition(role_condition: &str, pattern: &str, params: &mut Vec<Value>) -> String {
    params.push(Value::Text(format!(
        "%{}%",
        escape_like(&normalize_text(pattern))
    )));
    format!(
        "EXISTS (SELECT 1 FROM message_users p JOIN users u ON u.id = p.userid
                 WHERE p.messageid = m.id AND {role_condition}
                 AND (u.firstname || ' ' || u.lastname) LIKE ? ESCAPE '\\')"
    )
}

struct Query {
    from: String,
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl MailService {
    /// Messages matching the search, newest first (oldest first with
    /// `reverse`), `offset` rows in. A `limit` of 0 means no limit.
    pub fn search_messages(
        &self,
        search: &MessageSearch,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Message>, MailError> {
        let Some(mut query) = self.search_query(search)? else {
            return Ok(Vec::new());
        };
        self.cursor_conditions(search, &mut query)?;

        let order = if search.reverse {
            "ORDER BY m.time ASC, m.id ASC"
        } else {
            "ORDER BY m.time DESC, m.id DESC"
        };
        let sql = format!(
            "SELECT m.id FROM {} WHERE {} {} LIMIT ? OFFSET ?",
            query.from,
            query.conditions.join(" AND "),
            order,
        );
        query.params.push(Value::Integer(if limit == 0 { -1 } else { limit as i64 }));
        query.params.push(Value::Integer(offset as i64));

        let rows = self.sql.query(&sql, &query.params)?;
        let ids: Vec<MessageId> = rows
            .iter()
            .filter_map(|r| r.get_i64("id"))
            .map(MessageId)
            .collect();
        self.fetch_messages_ordered(&ids)
    }

    /// Number of matching messages. Cursors are ignored.
    pub fn count_messages(&self, search: &MessageSearch) -> Result<i64, MailError> {
        let Some(query) = self.search_query(search)? else {
            return Ok(0);
        };
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {}",
            query.from,
            query.conditions.join(" AND "),
        );
        let rows = self.sql.query(&sql, &query.params)?;
        Ok(rows.first().and_then(|r| r.get_i64("n")).unwrap_or(0))
    }

    /// Number of matching messages in each course with at least one match.
    pub fn count_messages_per_course(
        &self,
        search: &MessageSearch,
    ) -> Result<BTreeMap<CourseId, i64>, MailError> {
        let Some(query) = self.search_query(search)? else {
            return Ok(BTreeMap::new());
        };
        let sql = format!(
            "SELECT mu.courseid, COUNT(*) AS n FROM {} WHERE {} GROUP BY mu.courseid",
            query.from,
            query.conditions.join(" AND "),
        );
        let rows = self.sql.query(&sql, &query.params)?;
        let mut counts = BTreeMap::new();
        for row in &rows {
            counts.insert(
                CourseId(row.get_i64("courseid").unwrap_or(0)),
                row.get_i64("n").unwrap_or(0),
            );
        }
        Ok(counts)
    }

    /// Number of matching messages under each of the user's labels with
    /// at least one match. With a label filter, only that label is
    /// counted.
    pub fn count_messages_per_label(
        &self,
        search: &MessageSearch,
    ) -> Result<BTreeMap<LabelId, i64>, MailError> {
        let mut label_search = search.clone();
        let mut counts = BTreeMap::new();
        match search.label {
            Some(label) => {
                let n = self.count_messages(&label_search)?;
                if n > 0 {
                    counts.insert(label, n);
                }
            }
            None => {
                for label in self.fetch_labels(search.user)? {
                    label_search.label = Some(label.id);
                    let n = self.count_messages(&label_search)?;
                    if n > 0 {
                        counts.insert(label.id, n);
                    }
                }
            }
        }
        Ok(counts)
    }

    /// Builds FROM/WHERE for the search, without cursors. None means the
    /// result is empty without touching the database.
    fn search_query(&self, search: &MessageSearch) -> Result<Option<Query>, MailError> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        // Base selection: the user's projection rows, or the rows of one
        // of their labels.
        let from = match search.label {
            Some(label) => {
                self.fetch_label(search.user, label)?;
                conditions.push("mu.labelid = ?".to_string());
                params.push(Value::Integer(label.0));
                "message_labels mu JOIN messages m ON m.id = mu.messageid"
            }
            None => {
                conditions.push("mu.userid = ?".to_string());
                params.push(Value::Integer(search.user.0));
                "message_users mu JOIN messages m ON m.id = mu.messageid"
            }
        };

        // Course scope.
        match search.course {
            Some(course) => {
                conditions.push("mu.courseid = ?".to_string());
                params.push(Value::Integer(course.0));
            }
            None => {
                let courses = self.visible_course_ids(search.user)?;
                if courses.is_empty() {
                    return Ok(None);
                }
                let placeholders = vec!["?"; courses.len()].join(", ");
                conditions.push(format!("mu.courseid IN ({placeholders})"));
                params.extend(courses.iter().map(|c| Value::Integer(c.0)));
            }
        }

        // Drafts exist only for their sender.
        conditions.push("(mu.role = 1 OR mu.draft = 0)".to_string());

        conditions.push("mu.deleted = ?".to_string());
        params.push(Value::Integer(search.deleted as i64));

        if let Some(draft) = search.draft {
            conditions.push("mu.draft = ?".to_string());
            params.push(Value::Integer(draft as i64));
        }
        if !search.roles.is_empty() {
            let placeholders = vec!["?"; search.roles.len()].join(", ");
            conditions.push(format!("mu.role IN ({placeholders})"));
            params.extend(search.roles.iter().map(|r| Value::Integer(r.as_i64())));
        }
        if let Some(unread) = search.unread {
            conditions.push("mu.unread = ?".to_string());
            params.push(Value::Integer(unread as i64));
        }
        if let Some(starred) = search.starred {
            conditions.push("mu.starred = ?".to_string());
            params.push(Value::Integer(starred as i64));
        }
        if search.with_files_only {
            conditions.push("m.attachments > 0".to_string());
        }
        if search.max_time > 0 {
            conditions.push("m.time <= ?".to_string());
            params.push(Value::Integer(search.max_time));
        }

        if !search.content.is_empty() {
            let normalized = normalize_text(&search.content);
            let pattern = format!("%{}%", escape_like(&normalized));
            params.push(Value::Text(pattern.clone()));
            params.push(Value::Text(pattern));
            let names = name_condition("p.role <> 4", &normalized, &mut params);
            conditions.push(format!(
                "(m.normalizedsubject LIKE ? ESCAPE '\\'
                  OR m.normalizedcontent LIKE ? ESCAPE '\\'
                  OR {names})"
            ));
        }
        if !search.sendername.is_empty() {
            conditions.push(name_condition("p.role = 1", &search.sendername, &mut params));
        }
        if !search.recipientname.is_empty() {
            conditions.push(name_condition(
                "p.role IN (2, 3)",
                &search.recipientname,
                &mut params,
            ));
        }

        Ok(Some(Query {
            from: from.to_string(),
            conditions,
            params,
        }))
    }

    fn cursor_conditions(
        &self,
        search: &MessageSearch,
        query: &mut Query,
    ) -> Result<(), MailError> {
        for (cursor, older_side) in [(search.start, !search.reverse), (search.stop, search.reverse)]
        {
            let Some(id) = cursor else { continue };
            let rows = self.sql.query(
                "SELECT time FROM messages WHERE id = ?",
                &[Value::Integer(id.0)],
            )?;
            let time = rows
                .first()
                .and_then(|r| r.get_i64("time"))
                .ok_or_else(|| MailError::Validation(format!("invalid cursor message {id}")))?;
            let op = if older_side { "<" } else { ">" };
            query
                .conditions
                .push(format!("(m.time {op} ? OR (m.time = ? AND m.id {op} ?))"));
            query.params.push(Value::Integer(time));
            query.params.push(Value::Integer(time));
            query.params.push(Value::Integer(id.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{Color, DeletedStatus, Message, MessageData};
    use crate::service::testing;

    struct Fixture {
        _dir: tempfile::TempDir,
        svc: std::sync::Arc<MailService>,
        course: CourseId,
        alice: UserId,
        bob: UserId,
    }

    fn fixture() -> Fixture {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 5);
        Fixture { _dir, svc, course, alice, bob }
    }

    fn send(fx: &Fixture, from: UserId, to: &[UserId], subject: &str, time: i64) -> Message {
        let mut data = MessageData::new(from, fx.course, time);
        data.to = to.to_vec();
        data.subject = subject.into();
        data.content = format!("Body of {subject}");
        let message = fx.svc.create_message(&data).unwrap();
        fx.svc.send_message(&message, time).unwrap()
    }

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id).collect()
    }

    #[test]
    fn results_are_newest_first() {
        let fx = fixture();
        let m1 = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        let m2 = send(&fx, fx.alice, &[fx.bob], "Two", 2000);
        let m3 = send(&fx, fx.alice, &[fx.bob], "Three", 2000);

        let search = MessageSearch::new(fx.bob);
        let found = fx.svc.search_messages(&search, 0, 0).unwrap();
        // Ties on time break by higher ID first.
        assert_eq!(ids(&found), vec![m3.id, m2.id, m1.id]);
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 3);
    }

    #[test]
    fn count_matches_unbounded_fetch() {
        let fx = fixture();
        for i in 0..5 {
            send(&fx, fx.alice, &[fx.bob], &format!("M{i}"), 1000 + i);
        }
        let mut search = MessageSearch::new(fx.bob);
        search.content = "M".into();
        let found = fx.svc.search_messages(&search, 0, 0).unwrap();
        assert_eq!(found.len() as i64, fx.svc.count_messages(&search).unwrap());
    }

    #[test]
    fn pagination_is_a_prefix_partition() {
        let fx = fixture();
        for i in 0..6 {
            send(&fx, fx.alice, &[fx.bob], &format!("M{i}"), 1000 + i);
        }
        let search = MessageSearch::new(fx.bob);
        let all = fx.svc.search_messages(&search, 0, 0).unwrap();
        let first = fx.svc.search_messages(&search, 0, 4).unwrap();
        let rest = fx.svc.search_messages(&search, 4, 0).unwrap();
        assert_eq!(ids(&first), ids(&all)[..4].to_vec());
        assert_eq!(ids(&rest), ids(&all)[4..].to_vec());
    }

    #[test]
    fn drafts_are_visible_only_to_the_sender() {
        let fx = fixture();
        let mut data = MessageData::new(fx.alice, fx.course, 1000);
        data.subject = "Draft".into();
        data.to = vec![fx.bob];
        fx.svc.create_message(&data).unwrap();

        let mut search = MessageSearch::new(fx.alice);
        search.draft = Some(true);
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 1);

        // Even without a draft filter, the recipient sees nothing.
        assert_eq!(fx.svc.count_messages(&MessageSearch::new(fx.bob)).unwrap(), 0);
    }

    #[test]
    fn deleted_flag_switches_between_inbox_and_trash() {
        let fx = fixture();
        let m1 = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        let m2 = send(&fx, fx.alice, &[fx.bob], "Two", 2000);
        fx.svc.set_deleted(&m1, fx.bob, DeletedStatus::Deleted).unwrap();

        let inbox = MessageSearch::new(fx.bob);
        assert_eq!(ids(&fx.svc.search_messages(&inbox, 0, 0).unwrap()), vec![m2.id]);

        let mut trash = MessageSearch::new(fx.bob);
        trash.deleted = true;
        assert_eq!(ids(&fx.svc.search_messages(&trash, 0, 0).unwrap()), vec![m1.id]);

        // Deleted-forever shows up on neither side.
        fx.svc
            .set_deleted(&m1, fx.bob, DeletedStatus::DeletedForever)
            .unwrap();
        assert_eq!(fx.svc.count_messages(&trash).unwrap(), 0);
    }

    #[test]
    fn role_unread_and_starred_filters() {
        let fx = fixture();
        let received = send(&fx, fx.alice, &[fx.bob], "In", 1000);
        let sent = send(&fx, fx.bob, &[fx.alice], "Out", 2000);
        fx.svc.set_starred(&sent, fx.bob, true).unwrap();

        let mut search = MessageSearch::new(fx.bob);
        search.roles = vec![Role::To, Role::Cc];
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![received.id]);

        let mut search = MessageSearch::new(fx.bob);
        search.unread = Some(true);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![received.id]);

        let mut search = MessageSearch::new(fx.bob);
        search.starred = Some(true);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![sent.id]);
    }

    #[test]
    fn content_matches_subject_body_and_names() {
        let fx = fixture();
        let m1 = send(&fx, fx.alice, &[fx.bob], "Project kickoff!", 1000);
        let m2 = send(&fx, fx.alice, &[fx.bob], "Other", 2000);

        let mut search = MessageSearch::new(fx.bob);
        search.content = "project KICKOFF".into();
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m1.id]);

        // Body matches too.
        search.content = "Body of Other".into();
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m2.id]);

        // Participant names match either direction.
        search.content = "First1 Last1".into();
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 2);

        // LIKE wildcards in the query are literal.
        search.content = "100%".into();
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 0);
    }

    #[test]
    fn sender_and_recipient_name_filters() {
        let fx = fixture();
        let from_alice = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        let from_bob = send(&fx, fx.bob, &[fx.alice], "Two", 2000);

        let mut search = MessageSearch::new(fx.alice);
        search.sendername = "First1".into();
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![from_alice.id]);

        let mut search = MessageSearch::new(fx.alice);
        search.recipientname = "First1".into();
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![from_bob.id]);
    }

    #[test]
    fn name_filters_normalize_the_pattern() {
        let fx = fixture();
        let from_alice = send(&fx, fx.alice, &[fx.bob], "One", 1000);

        // Punctuation in the pattern collapses away, like the indexed text.
        let mut search = MessageSearch::new(fx.bob);
        search.sendername = "First1!".into();
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![from_alice.id]);

        let mut search = MessageSearch::new(fx.alice);
        search.recipientname = " First1,  Last1 ".into();
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 1);

        let mut search = MessageSearch::new(fx.bob);
        search.content = "First1...Last1".into();
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 1);
    }

    #[test]
    fn bcc_recipients_are_not_searchable_by_name() {
        let fx = fixture();
        let carol = testing::seed_user(&fx.svc, 3);
        testing::enrol(&fx.svc, fx.course, carol, 5);

        let mut data = MessageData::new(fx.alice, fx.course, 1000);
        data.subject = "Secret".into();
        data.to = vec![fx.bob];
        data.bcc = vec![carol];
        let message = fx.svc.create_message(&data).unwrap();
        fx.svc.send_message(&message, 1000).unwrap();

        let mut search = MessageSearch::new(fx.alice);
        search.content = "First3".into();
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 0);
        let mut search = MessageSearch::new(fx.alice);
        search.recipientname = "First3".into();
        assert_eq!(fx.svc.count_messages(&search).unwrap(), 0);
    }

    #[test]
    fn label_search_uses_own_labels_only() {
        let fx = fixture();
        let m1 = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        send(&fx, fx.alice, &[fx.bob], "Two", 2000);

        let label = fx.svc.create_label(fx.bob, "Work", Color::None).unwrap();
        fx.svc.set_labels(&m1, fx.bob, &[label.id]).unwrap();

        let mut search = MessageSearch::new(fx.bob);
        search.label = Some(label.id);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m1.id]);

        // Someone else's label is not found.
        let mut search = MessageSearch::new(fx.alice);
        search.label = Some(label.id);
        assert!(matches!(
            fx.svc.search_messages(&search, 0, 0),
            Err(MailError::NotFound(_))
        ));
    }

    #[test]
    fn cursors_are_exclusive() {
        let fx = fixture();
        let m1 = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        let m2 = send(&fx, fx.alice, &[fx.bob], "Two", 2000);
        let m3 = send(&fx, fx.alice, &[fx.bob], "Three", 3000);

        let mut search = MessageSearch::new(fx.bob);
        search.start = Some(m3.id);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m2.id, m1.id]);

        search.stop = Some(m1.id);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m2.id]);

        let mut search = MessageSearch::new(fx.bob);
        search.start = Some(MessageId(999));
        assert!(matches!(
            fx.svc.search_messages(&search, 0, 0),
            Err(MailError::Validation(_))
        ));
    }

    #[test]
    fn reverse_walks_oldest_first() {
        let fx = fixture();
        let m1 = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        let m2 = send(&fx, fx.alice, &[fx.bob], "Two", 2000);
        let m3 = send(&fx, fx.alice, &[fx.bob], "Three", 3000);

        let mut search = MessageSearch::new(fx.bob);
        search.reverse = true;
        assert_eq!(
            ids(&fx.svc.search_messages(&search, 0, 0).unwrap()),
            vec![m1.id, m2.id, m3.id]
        );

        // In reverse, start walks upward from the cursor.
        search.start = Some(m1.id);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m2.id, m3.id]);
        search.stop = Some(m3.id);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m2.id]);
    }

    #[test]
    fn max_time_bounds_results() {
        let fx = fixture();
        let m1 = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        let m2 = send(&fx, fx.alice, &[fx.bob], "Two", 2000);
        send(&fx, fx.alice, &[fx.bob], "Three", 3000);

        let mut search = MessageSearch::new(fx.bob);
        search.max_time = 2000;
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m2.id, m1.id]);
    }

    #[test]
    fn with_files_only() {
        let fx = fixture();
        send(&fx, fx.alice, &[fx.bob], "Plain", 1000);

        fx.svc.stage_file(8, "a.txt", b"a").unwrap();
        let mut data = MessageData::new(fx.alice, fx.course, 2000);
        data.subject = "Attached".into();
        data.to = vec![fx.bob];
        data.draftitemid = 8;
        let message = fx.svc.create_message(&data).unwrap();
        let sent = fx.svc.send_message(&message, 2000).unwrap();

        let mut search = MessageSearch::new(fx.bob);
        search.with_files_only = true;
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![sent.id]);
    }

    #[test]
    fn unenrolled_users_see_nothing() {
        let fx = fixture();
        let m = send(&fx, fx.alice, &[fx.bob], "One", 1000);

        fx.svc.unenrol(fx.course, fx.bob).unwrap();
        assert_eq!(fx.svc.count_messages(&MessageSearch::new(fx.bob)).unwrap(), 0);

        // An explicit course filter bypasses the enrolment scan; the API
        // layer checks course access separately.
        let mut search = MessageSearch::new(fx.bob);
        search.course = Some(fx.course);
        assert_eq!(ids(&fx.svc.search_messages(&search, 0, 0).unwrap()), vec![m.id]);
    }

    #[test]
    fn counts_per_course_and_per_label() {
        let fx = fixture();
        let c2 = testing::seed_course(&fx.svc, 2);
        testing::enrol(&fx.svc, c2, fx.alice, 5);
        testing::enrol(&fx.svc, c2, fx.bob, 5);

        let m1 = send(&fx, fx.alice, &[fx.bob], "One", 1000);
        send(&fx, fx.alice, &[fx.bob], "Two", 2000);
        let mut data = MessageData::new(fx.alice, c2, 3000);
        data.subject = "Other course".into();
        data.to = vec![fx.bob];
        let m3 = fx.svc.create_message(&data).unwrap();
        let m3 = fx.svc.send_message(&m3, 3000).unwrap();

        let search = MessageSearch::new(fx.bob);
        let per_course = fx.svc.count_messages_per_course(&search).unwrap();
        assert_eq!(per_course.get(&fx.course), Some(&2));
        assert_eq!(per_course.get(&c2), Some(&1));

        let work = fx.svc.create_label(fx.bob, "Work", Color::None).unwrap();
        let home = fx.svc.create_label(fx.bob, "Home", Color::None).unwrap();
        fx.svc.set_labels(&m1, fx.bob, &[work.id]).unwrap();
        fx.svc.set_labels(&m3, fx.bob, &[work.id, home.id]).unwrap();

        let per_label = fx.svc.count_messages_per_label(&search).unwrap();
        assert_eq!(per_label.get(&work.id), Some(&2));
        assert_eq!(per_label.get(&home.id), Some(&1));

        // Restricting to one label counts only that label.
        let mut search = MessageSearch::new(fx.bob);
        search.label = Some(home.id);
        let per_label = fx.svc.count_messages_per_label(&search).unwrap();
        assert_eq!(per_label.len(), 1);
        assert_eq!(per_label.get(&home.id), Some(&1));
    }

    #[test]
    fn hidden_courses_are_excluded_without_the_capability() {
        let (_dir, svc) = testing::strict_service();
        let course = testing::seed_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 5);

        let mut data = MessageData::new(alice, course, 1000);
        data.subject = "Hi".into();
        data.to = vec![bob];
        let message = svc.create_message(&data).unwrap();
        svc.send_message(&message, 1000).unwrap();

        assert_eq!(svc.count_messages(&MessageSearch::new(bob)).unwrap(), 1);

        // Hide the course: it drops out of the search scope.
        let mut hidden = svc.fetch_course(course).unwrap();
        hidden.visible = false;
        svc.upsert_course(&hidden).unwrap();
        assert_eq!(svc.count_messages(&MessageSearch::new(bob)).unwrap(), 0);
    }
}
