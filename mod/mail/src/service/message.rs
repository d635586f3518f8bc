//! Message lifecycle engine.
//!
//! Every mutator executes as one statement batch inside a single
//! transaction, so readers never observe a partially-updated projection.
//! Attachment files are deleted or moved only after the batch commits.

use std::collections::{BTreeMap, BTreeSet};

use coursemail_blob::BlobMeta;
use coursemail_sql::{Statement, Value};

use crate::model::{
    normalize_text, CourseId, DeletedStatus, LabelId, Message, MessageData, MessageId,
    Participant, Role, TextFormat, UserId,
};
use crate::service::{MailError, MailService};

/// Blob key prefix of a message's permanent attachment area.
pub(crate) fn message_files_prefix(course: CourseId, message: MessageId) -> String {
    format!("courses/{course}/messages/{message}/")
}

/// Blob key prefix of an upload staging area.
pub(crate) fn staging_prefix(draftitemid: i64) -> String {
    format!("staging/{draftitemid}/")
}

/// Trims the subject and truncates it to 100 characters, ellipsized.
fn clean_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.chars().count() > 100 {
        let truncated: String = subject.chars().take(97).collect();
        format!("{truncated}...")
    } else {
        subject.to_string()
    }
}

impl MailService {
    // ── Fetching ────────────────────────────────────────────────────

    /// Fetch a message aggregate by ID.
    pub fn fetch_message(&self, id: MessageId) -> Result<Message, MailError> {
        self.fetch_messages_map(&[id])?
            .remove(&id)
            .ok_or_else(|| MailError::NotFound(format!("message {id}")))
    }

    /// Fetch a message on behalf of a user. Messages the user may not
    /// view are reported as not found.
    pub fn fetch_message_for(&self, user: UserId, id: MessageId) -> Result<Message, MailError> {
        let message = self.fetch_message(id)?;
        if !self.can_view_message(user, &message)? {
            return Err(MailError::NotFound(format!("message {id}")));
        }
        Ok(message)
    }

    /// Fetch messages by ID, ordered from newer to older.
    pub fn fetch_messages(&self, ids: &[MessageId]) -> Result<Vec<Message>, MailError> {
        let map = self.fetch_messages_map(ids)?;
        let mut messages: Vec<Message> = map.into_values().collect();
        messages.sort_by(|a, b| (b.time, b.id.0).cmp(&(a.time, a.id.0)));
        Ok(messages)
    }

    /// Fetch messages by ID, preserving the given order.
    pub(crate) fn fetch_messages_ordered(
        &self,
        ids: &[MessageId],
    ) -> Result<Vec<Message>, MailError> {
        let mut map = self.fetch_messages_map(ids)?;
        Ok(ids.iter().filter_map(|id| map.remove(id)).collect())
    }

    fn fetch_messages_map(
        &self,
        ids: &[MessageId],
    ) -> Result<BTreeMap<MessageId, Message>, MailError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let unique: BTreeSet<MessageId> = ids.iter().copied().collect();
        let placeholders = vec!["?"; unique.len()].join(", ");
        let params: Vec<Value> = unique.iter().map(|id| Value::Integer(id.0)).collect();

        let rows = self.sql.query(
            &format!(
                "SELECT id, courseid, subject, content, format, attachments, draft, time
                 FROM messages WHERE id IN ({placeholders})"
            ),
            &params,
        )?;

        let mut messages = BTreeMap::new();
        for row in &rows {
            let id = MessageId(row.get_i64("id").unwrap_or(0));
            let format = row
                .get_i64("format")
                .and_then(TextFormat::from_i64)
                .ok_or_else(|| MailError::Internal("invalid message format".into()))?;
            messages.insert(
                id,
                Message {
                    id,
                    course: CourseId(row.get_i64("courseid").unwrap_or(0)),
                    subject: row.get_str("subject").unwrap_or_default().to_string(),
                    content: row.get_str("content").unwrap_or_default().to_string(),
                    format,
                    attachments: row.get_i64("attachments").unwrap_or(0),
                    draft: row.get_i64("draft").unwrap_or(0) != 0,
                    time: row.get_i64("time").unwrap_or(0),
                    participants: BTreeMap::new(),
                    references: Vec::new(),
                },
            );
        }

        // Participants.
        let user_rows = self.sql.query(
            &format!(
                "SELECT messageid, userid, role, unread, starred, deleted
                 FROM message_users WHERE messageid IN ({placeholders})"
            ),
            &params,
        )?;
        let userids: Vec<UserId> = user_rows
            .iter()
            .filter_map(|r| r.get_i64("userid"))
            .map(UserId)
            .collect();
        let users = self.fetch_users_map(&userids)?;
        for row in &user_rows {
            let messageid = MessageId(row.get_i64("messageid").unwrap_or(0));
            let userid = UserId(row.get_i64("userid").unwrap_or(0));
            let (Some(message), Some(user)) = (messages.get_mut(&messageid), users.get(&userid))
            else {
                continue;
            };
            let role = row
                .get_i64("role")
                .and_then(Role::from_i64)
                .ok_or_else(|| MailError::Internal("invalid participant role".into()))?;
            let deleted = row
                .get_i64("deleted")
                .and_then(DeletedStatus::from_i64)
                .ok_or_else(|| MailError::Internal("invalid deleted status".into()))?;
            message.participants.insert(
                userid,
                Participant {
                    user: user.clone(),
                    role,
                    unread: row.get_i64("unread").unwrap_or(0) != 0,
                    starred: row.get_i64("starred").unwrap_or(0) != 0,
                    deleted,
                    labels: Vec::new(),
                },
            );
        }

        // Labels, attributed to their owning user.
        let label_rows = self.sql.query(
            &format!(
                "SELECT ml.messageid, ml.labelid, l.userid
                 FROM message_labels ml
                 JOIN labels l ON l.id = ml.labelid
                 WHERE ml.messageid IN ({placeholders})
                 ORDER BY ml.labelid"
            ),
            &params,
        )?;
        for row in &label_rows {
            let messageid = MessageId(row.get_i64("messageid").unwrap_or(0));
            let userid = UserId(row.get_i64("userid").unwrap_or(0));
            if let Some(participant) = messages
                .get_mut(&messageid)
                .and_then(|m| m.participants.get_mut(&userid))
            {
                participant
                    .labels
                    .push(LabelId(row.get_i64("labelid").unwrap_or(0)));
            }
        }

        // References, newest first.
        let ref_rows = self.sql.query(
            &format!(
                "SELECT messageid, reference FROM message_refs
                 WHERE messageid IN ({placeholders})
                 ORDER BY reference DESC"
            ),
            &params,
        )?;
        for row in &ref_rows {
            let messageid = MessageId(row.get_i64("messageid").unwrap_or(0));
            if let Some(message) = messages.get_mut(&messageid) {
                message
                    .references
                    .push(MessageId(row.get_i64("reference").unwrap_or(0)));
            }
        }

        // A message without a sender row is unusable; skip it.
        messages.retain(|_, m| m.participants.values().any(|p| p.role == Role::From));

        Ok(messages)
    }

    /// Ancestors of a message (or descendants, with `forward`), ordered
    /// from newer to older.
    pub fn fetch_references(
        &self,
        message: MessageId,
        forward: bool,
    ) -> Result<Vec<Message>, MailError> {
        let (sql, field) = if forward {
            ("SELECT messageid FROM message_refs WHERE reference = ?", "messageid")
        } else {
            ("SELECT reference FROM message_refs WHERE messageid = ?", "reference")
        };
        let rows = self.sql.query(sql, &[Value::Integer(message.0)])?;
        let ids: Vec<MessageId> = rows
            .iter()
            .filter_map(|r| r.get_i64(field))
            .map(MessageId)
            .collect();
        self.fetch_messages(&ids)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Create a new draft and populate it from the given data.
    ///
    /// If the data carries a reference, the sender must participate in
    /// it and share its course; the reference chain is copied and the
    /// sender's labels on the reference are seeded onto the draft.
    pub fn create_message(&self, data: &MessageData) -> Result<Message, MailError> {
        let reference = match data.reference {
            Some(id) => {
                let reference = self.fetch_message(id)?;
                assert!(
                    reference.participants.contains_key(&data.sender),
                    "sender does not participate in the referenced message"
                );
                assert_eq!(
                    reference.course, data.course,
                    "referenced message belongs to another course"
                );
                Some(reference)
            }
            None => None,
        };

        let row = Statement::new(
            "INSERT INTO messages
                (courseid, subject, content, format, attachments, draft, time,
                 normalizedsubject, normalizedcontent)
             VALUES (?, '', '', ?, 0, 1, ?, '', '')",
            vec![
                Value::Integer(data.course.0),
                Value::Integer(TextFormat::Html.as_i64()),
                Value::Integer(data.time),
            ],
        );

        let id = self.sql.insert_batch(&row, &|id| {
            let mut statements = vec![Statement::new(
                "INSERT INTO message_users
                    (messageid, courseid, draft, time, userid, role, unread, starred, deleted)
                 VALUES (?, ?, 1, ?, ?, ?, 0, 0, 0)",
                vec![
                    Value::Integer(id),
                    Value::Integer(data.course.0),
                    Value::Integer(data.time),
                    Value::Integer(data.sender.0),
                    Value::Integer(Role::From.as_i64()),
                ],
            )];

            if let Some(reference) = &reference {
                let mut chain = vec![reference.id];
                chain.extend(&reference.references);
                for refid in chain {
                    statements.push(Statement::new(
                        "INSERT INTO message_refs (messageid, reference) VALUES (?, ?)",
                        vec![Value::Integer(id), Value::Integer(refid.0)],
                    ));
                }
                // Seed the sender's labels from the reference.
                if let Some(participant) = reference.participants.get(&data.sender) {
                    for &labelid in &participant.labels {
                        statements.push(Statement::new(
                            "INSERT INTO message_labels
                                (messageid, courseid, draft, time, labelid, role,
                                 unread, starred, deleted)
                             VALUES (?, ?, 1, ?, ?, ?, 0, 0, 0)",
                            vec![
                                Value::Integer(id),
                                Value::Integer(data.course.0),
                                Value::Integer(data.time),
                                Value::Integer(labelid.0),
                                Value::Integer(Role::From.as_i64()),
                            ],
                        ));
                    }
                }
            }

            statements
        })?;

        let message = self.fetch_message(MessageId(id))?;
        self.update_message(&message, data)
    }

    /// Rewrite a draft: course, subject, content, recipients and
    /// attachments. Duplicate recipients across to/cc/bcc keep the role
    /// of their first occurrence; the sender is never demoted to a
    /// recipient. All per-user deleted statuses reset to not-deleted.
    pub fn update_message(
        &self,
        message: &Message,
        data: &MessageData,
    ) -> Result<Message, MailError> {
        assert!(message.draft, "cannot update a sent message");

        let sender = message.sender().user.id;
        let subject = clean_subject(&data.subject);

        // Recipient roles, first occurrence wins.
        let mut desired: BTreeMap<UserId, Role> = BTreeMap::new();
        let lists = [
            (&data.to, Role::To),
            (&data.cc, Role::Cc),
            (&data.bcc, Role::Bcc),
        ];
        for (list, role) in lists {
            for &userid in list.iter() {
                if userid != sender {
                    desired.entry(userid).or_insert(role);
                }
            }
        }

        // Staged attachments.
        let staged = if data.draftitemid > 0 {
            self.blob.list(&staging_prefix(data.draftitemid))?
        } else {
            Vec::new()
        };
        if staged.len() > self.config.max_files {
            return Err(MailError::Validation(format!(
                "too many attached files (maximum {})",
                self.config.max_files
            )));
        }
        let total_bytes: u64 = staged.iter().map(|f| f.size).sum();
        if self.config.max_bytes > 0 && total_bytes > self.config.max_bytes {
            return Err(MailError::Validation(format!(
                "attached files exceed {} bytes",
                self.config.max_bytes
            )));
        }
        let attachments = if data.draftitemid > 0 {
            staged.len() as i64
        } else if data.course != message.course {
            0
        } else {
            message.attachments
        };

        let mut statements = vec![Statement::new(
            "UPDATE messages SET courseid = ?, subject = ?, content = ?, format = ?,
                attachments = ?, time = ?, normalizedsubject = ?, normalizedcontent = ?
             WHERE id = ?",
            vec![
                Value::Integer(data.course.0),
                Value::Text(subject.clone()),
                Value::Text(data.content.clone()),
                Value::Integer(data.format.as_i64()),
                Value::Integer(attachments),
                Value::Integer(data.time),
                Value::Text(normalize_text(&subject)),
                Value::Text(normalize_text(&data.content)),
                Value::Integer(message.id.0),
            ],
        )];

        for participant in message.participants.values() {
            let userid = participant.user.id;
            if participant.role == Role::From {
                continue;
            }
            match desired.get(&userid) {
                None => {
                    statements.push(Statement::new(
                        "DELETE FROM message_users WHERE messageid = ? AND userid = ?",
                        vec![Value::Integer(message.id.0), Value::Integer(userid.0)],
                    ));
                    statements.push(Statement::new(
                        "DELETE FROM message_labels WHERE messageid = ?
                         AND labelid IN (SELECT id FROM labels WHERE userid = ?)",
                        vec![Value::Integer(message.id.0), Value::Integer(userid.0)],
                    ));
                }
                Some(&role) if role != participant.role => {
                    statements.push(Statement::new(
                        "UPDATE message_users SET role = ? WHERE messageid = ? AND userid = ?",
                        vec![
                            Value::Integer(role.as_i64()),
                            Value::Integer(message.id.0),
                            Value::Integer(userid.0),
                        ],
                    ));
                    statements.push(Statement::new(
                        "UPDATE message_labels SET role = ? WHERE messageid = ?
                         AND labelid IN (SELECT id FROM labels WHERE userid = ?)",
                        vec![
                            Value::Integer(role.as_i64()),
                            Value::Integer(message.id.0),
                            Value::Integer(userid.0),
                        ],
                    ));
                }
                Some(_) => {}
            }
        }

        for (&userid, &role) in &desired {
            if !message.participants.contains_key(&userid) {
                statements.push(Statement::new(
                    "INSERT INTO message_users
                        (messageid, courseid, draft, time, userid, role, unread, starred, deleted)
                     VALUES (?, ?, 1, ?, ?, ?, 1, 0, 0)",
                    vec![
                        Value::Integer(message.id.0),
                        Value::Integer(data.course.0),
                        Value::Integer(data.time),
                        Value::Integer(userid.0),
                        Value::Integer(role.as_i64()),
                    ],
                ));
            }
        }

        statements.push(Statement::new(
            "UPDATE message_users SET courseid = ?, time = ?, deleted = 0 WHERE messageid = ?",
            vec![
                Value::Integer(data.course.0),
                Value::Integer(data.time),
                Value::Integer(message.id.0),
            ],
        ));
        statements.push(Statement::new(
            "UPDATE message_labels SET courseid = ?, time = ?, deleted = 0 WHERE messageid = ?",
            vec![
                Value::Integer(data.course.0),
                Value::Integer(data.time),
                Value::Integer(message.id.0),
            ],
        ));

        self.sql.exec_batch(&statements)?;

        // File moves happen after the transaction, in case it rolls back.
        let new_prefix = message_files_prefix(data.course, message.id);
        if data.course != message.course {
            self.blob
                .delete_prefix(&message_files_prefix(message.course, message.id))?;
        }
        if data.draftitemid > 0 {
            self.blob.delete_prefix(&new_prefix)?;
            self.blob
                .move_prefix(&staging_prefix(data.draftitemid), &new_prefix)?;
        }

        self.fetch_message(message.id)
    }

    /// Transition a draft to sent, stamping the time on the message and
    /// every projection row. Labels of the newest referenced message are
    /// seeded onto recipients that have none of their own yet.
    pub fn send_message(&self, message: &Message, time: i64) -> Result<Message, MailError> {
        assert!(message.draft, "message already sent");

        if message.subject.trim().is_empty() {
            return Err(MailError::Validation("empty subject".into()));
        }
        if message.participants.len() < 2 {
            return Err(MailError::Validation("message has no recipients".into()));
        }
        let recipients = message.participants.len() - 1;
        if recipients > self.config.max_recipients {
            return Err(MailError::Validation(format!(
                "cannot send to more than {} recipients",
                self.config.max_recipients
            )));
        }

        let mut statements = vec![
            Statement::new(
                "UPDATE messages SET draft = 0, time = ? WHERE id = ?",
                vec![Value::Integer(time), Value::Integer(message.id.0)],
            ),
            Statement::new(
                "UPDATE message_users SET draft = 0, time = ? WHERE messageid = ?",
                vec![Value::Integer(time), Value::Integer(message.id.0)],
            ),
            Statement::new(
                "UPDATE message_labels SET draft = 0, time = ? WHERE messageid = ?",
                vec![Value::Integer(time), Value::Integer(message.id.0)],
            ),
        ];

        let references = self.fetch_references(message.id, false)?;
        if let Some(parent) = references.first() {
            for participant in message.recipients(&[]) {
                if !participant.labels.is_empty() {
                    continue;
                }
                let Some(previous) = parent.participants.get(&participant.user.id) else {
                    continue;
                };
                for &labelid in &previous.labels {
                    statements.push(Statement::new(
                        "INSERT INTO message_labels
                            (messageid, courseid, draft, time, labelid, role,
                             unread, starred, deleted)
                         VALUES (?, ?, 0, ?, ?, ?, ?, ?, ?)",
                        vec![
                            Value::Integer(message.id.0),
                            Value::Integer(message.course.0),
                            Value::Integer(time),
                            Value::Integer(labelid.0),
                            Value::Integer(participant.role.as_i64()),
                            Value::Integer(participant.unread as i64),
                            Value::Integer(participant.starred as i64),
                            Value::Integer(participant.deleted.as_i64()),
                        ],
                    ));
                }
            }
        }

        self.sql.exec_batch(&statements)?;
        self.fetch_message(message.id)
    }

    // ── Per-user state ──────────────────────────────────────────────

    /// Set the unread flag on the user's projection rows.
    pub fn set_unread(
        &self,
        message: &Message,
        user: UserId,
        unread: bool,
    ) -> Result<(), MailError> {
        self.set_user_flag(message, user, "unread", unread)
    }

    /// Set the starred flag on the user's projection rows.
    pub fn set_starred(
        &self,
        message: &Message,
        user: UserId,
        starred: bool,
    ) -> Result<(), MailError> {
        self.set_user_flag(message, user, "starred", starred)
    }

    fn set_user_flag(
        &self,
        message: &Message,
        user: UserId,
        column: &str,
        value: bool,
    ) -> Result<(), MailError> {
        let participant = message
            .participants
            .get(&user)
            .expect("user does not participate in the message");
        assert!(
            participant.deleted != DeletedStatus::DeletedForever,
            "cannot mutate a permanently deleted row"
        );

        self.sql.exec_batch(&[
            Statement::new(
                format!("UPDATE message_users SET {column} = ? WHERE messageid = ? AND userid = ?"),
                vec![
                    Value::Integer(value as i64),
                    Value::Integer(message.id.0),
                    Value::Integer(user.0),
                ],
            ),
            Statement::new(
                format!(
                    "UPDATE message_labels SET {column} = ? WHERE messageid = ?
                     AND labelid IN (SELECT id FROM labels WHERE userid = ?)"
                ),
                vec![
                    Value::Integer(value as i64),
                    Value::Integer(message.id.0),
                    Value::Integer(user.0),
                ],
            ),
        ])?;
        Ok(())
    }

    /// Set the per-user deleted status.
    ///
    /// Deleting a draft forever removes the whole message, its rows and
    /// its files. Deleting a sent message forever tombstones the user's
    /// row and removes their label rows; other participants keep theirs.
    pub fn set_deleted(
        &self,
        message: &Message,
        user: UserId,
        status: DeletedStatus,
    ) -> Result<(), MailError> {
        let participant = message
            .participants
            .get(&user)
            .expect("user does not participate in the message");
        assert!(
            !message.draft || participant.role == Role::From,
            "only the sender may delete a draft"
        );

        if message.draft && status == DeletedStatus::DeletedForever {
            self.sql.exec_batch(&[
                Statement::new(
                    "DELETE FROM messages WHERE id = ?",
                    vec![Value::Integer(message.id.0)],
                ),
                Statement::new(
                    "DELETE FROM message_refs WHERE messageid = ?",
                    vec![Value::Integer(message.id.0)],
                ),
                Statement::new(
                    "DELETE FROM message_users WHERE messageid = ?",
                    vec![Value::Integer(message.id.0)],
                ),
                Statement::new(
                    "DELETE FROM message_labels WHERE messageid = ?",
                    vec![Value::Integer(message.id.0)],
                ),
            ])?;
            // Delete files after the transaction, in case it rolls back.
            self.blob
                .delete_prefix(&message_files_prefix(message.course, message.id))?;
            return Ok(());
        }

        let mut statements = vec![Statement::new(
            "UPDATE message_users SET deleted = ? WHERE messageid = ? AND userid = ?",
            vec![
                Value::Integer(status.as_i64()),
                Value::Integer(message.id.0),
                Value::Integer(user.0),
            ],
        )];
        if status == DeletedStatus::DeletedForever {
            statements.push(Statement::new(
                "DELETE FROM message_labels WHERE messageid = ?
                 AND labelid IN (SELECT id FROM labels WHERE userid = ?)",
                vec![Value::Integer(message.id.0), Value::Integer(user.0)],
            ));
        } else {
            statements.push(Statement::new(
                "UPDATE message_labels SET deleted = ? WHERE messageid = ?
                 AND labelid IN (SELECT id FROM labels WHERE userid = ?)",
                vec![
                    Value::Integer(status.as_i64()),
                    Value::Integer(message.id.0),
                    Value::Integer(user.0),
                ],
            ));
        }
        self.sql.exec_batch(&statements)?;
        Ok(())
    }

    /// Replace the set of the user's own labels attached to the message.
    pub fn set_labels(
        &self,
        message: &Message,
        user: UserId,
        labels: &[LabelId],
    ) -> Result<(), MailError> {
        let participant = message
            .participants
            .get(&user)
            .expect("user does not participate in the message");
        assert!(
            !message.draft || participant.role == Role::From,
            "only the sender may label a draft"
        );
        assert!(
            participant.deleted != DeletedStatus::DeletedForever,
            "cannot mutate a permanently deleted row"
        );

        let owned = self.fetch_labels_map(labels)?;
        for id in labels {
            let label = owned.get(id).expect("label does not exist");
            assert_eq!(label.userid, user, "label belongs to another user");
        }

        let new: BTreeSet<_> = labels.iter().copied().collect();
        let current: BTreeSet<_> = participant.labels.iter().copied().collect();

        let mut statements = Vec::new();
        for &labelid in current.difference(&new) {
            statements.push(Statement::new(
                "DELETE FROM message_labels WHERE messageid = ? AND labelid = ?",
                vec![Value::Integer(message.id.0), Value::Integer(labelid.0)],
            ));
        }
        for &labelid in new.difference(&current) {
            statements.push(Statement::new(
                "INSERT INTO message_labels
                    (messageid, courseid, draft, time, labelid, role, unread, starred, deleted)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Integer(message.id.0),
                    Value::Integer(message.course.0),
                    Value::Integer(message.draft as i64),
                    Value::Integer(message.time),
                    Value::Integer(labelid.0),
                    Value::Integer(participant.role.as_i64()),
                    Value::Integer(participant.unread as i64),
                    Value::Integer(participant.starred as i64),
                    Value::Integer(participant.deleted.as_i64()),
                ],
            ));
        }

        if !statements.is_empty() {
            self.sql.exec_batch(&statements)?;
        }
        Ok(())
    }

    /// Promote every soft-deleted message of the user in the given
    /// courses to deleted-forever. No-op on an empty course set.
    pub fn empty_trash(&self, user: UserId, courses: &[CourseId]) -> Result<(), MailError> {
        if courses.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; courses.len()].join(", ");
        let courseids: Vec<Value> = courses.iter().map(|c| Value::Integer(c.0)).collect();

        let mut user_params = vec![Value::Integer(user.0)];
        user_params.extend(courseids.clone());
        let mut label_params = vec![Value::Integer(user.0)];
        label_params.extend(courseids);

        self.sql.exec_batch(&[
            Statement::new(
                format!(
                    "UPDATE message_users SET deleted = 2
                     WHERE userid = ? AND deleted = 1 AND courseid IN ({placeholders})"
                ),
                user_params,
            ),
            Statement::new(
                format!(
                    "UPDATE message_labels SET deleted = 2
                     WHERE labelid IN (SELECT id FROM labels WHERE userid = ?)
                     AND deleted = 1 AND courseid IN ({placeholders})"
                ),
                label_params,
            ),
        ])?;
        Ok(())
    }

    /// Delete every message of a course, including attachment files.
    pub fn delete_course_messages(&self, course: CourseId) -> Result<(), MailError> {
        self.sql.exec_batch(&[
            Statement::new(
                "DELETE FROM message_labels WHERE courseid = ?",
                vec![Value::Integer(course.0)],
            ),
            Statement::new(
                "DELETE FROM message_users WHERE courseid = ?",
                vec![Value::Integer(course.0)],
            ),
            Statement::new(
                "DELETE FROM message_refs WHERE messageid IN
                    (SELECT id FROM messages WHERE courseid = ?)",
                vec![Value::Integer(course.0)],
            ),
            Statement::new(
                "DELETE FROM messages WHERE courseid = ?",
                vec![Value::Integer(course.0)],
            ),
        ])?;
        self.blob.delete_prefix(&format!("courses/{course}/"))?;
        Ok(())
    }

    // ── Visibility ──────────────────────────────────────────────────

    /// Whether the user may view the message: sender, or recipient of a
    /// sent message, not deleted forever, and allowed to use mail in the
    /// message's course.
    pub fn can_view_message(&self, user: UserId, message: &Message) -> Result<bool, MailError> {
        let Some(participant) = message.participants.get(&user) else {
            return Ok(false);
        };
        if participant.deleted == DeletedStatus::DeletedForever {
            return Ok(false);
        }
        if participant.role != Role::From && message.draft {
            return Ok(false);
        }
        let course = match self.fetch_course(message.course) {
            Ok(course) => course,
            Err(MailError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.can_use_mail(user, &course)
    }

    /// Whether the user may edit the message: a draft they sent.
    pub fn can_edit_message(&self, user: UserId, message: &Message) -> Result<bool, MailError> {
        Ok(message.draft
            && message.role(user) == Some(Role::From)
            && self.can_view_message(user, message)?)
    }

    /// Whether the user may view the attachments: the message itself or
    /// any message derived from it must be visible.
    pub fn can_view_files(&self, user: UserId, message: &Message) -> Result<bool, MailError> {
        if self.can_view_message(user, message)? {
            return Ok(true);
        }
        for descendant in self.fetch_references(message.id, true)? {
            if self.can_view_message(user, &descendant)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Files ───────────────────────────────────────────────────────

    /// Stage an uploaded file for a later update.
    pub fn stage_file(
        &self,
        draftitemid: i64,
        filename: &str,
        data: &[u8],
    ) -> Result<(), MailError> {
        self.blob
            .put(&format!("{}{}", staging_prefix(draftitemid), filename), data)?;
        Ok(())
    }

    /// Metadata of the message's stored attachments.
    pub fn message_files(&self, message: &Message) -> Result<Vec<BlobMeta>, MailError> {
        Ok(self
            .blob
            .list(&message_files_prefix(message.course, message.id))?)
    }

    /// Contents of one attachment, or None if it does not exist.
    pub fn fetch_file(
        &self,
        message: &Message,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, MailError> {
        Ok(self.blob.get(&format!(
            "{}{}",
            message_files_prefix(message.course, message.id),
            filename
        ))?)
    }
}
