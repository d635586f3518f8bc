use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{CourseId, LabelId, MessageId, User, UserId};

/// Role of a participant in a message. Every message has exactly one
/// `From` participant; everyone else is a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    From,
    To,
    Cc,
    Bcc,
}

impl Role {
    pub fn as_i64(self) -> i64 {
        match self {
            Role::From => 1,
            Role::To => 2,
            Role::Cc => 3,
            Role::Bcc => 4,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Role::From),
            2 => Some(Role::To),
            3 => Some(Role::Cc),
            4 => Some(Role::Bcc),
            _ => None,
        }
    }

    /// Token used at the API boundary.
    pub fn token(self) -> &'static str {
        match self {
            Role::From => "from",
            Role::To => "to",
            Role::Cc => "cc",
            Role::Bcc => "bcc",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "from" => Some(Role::From),
            "to" => Some(Role::To),
            "cc" => Some(Role::Cc),
            "bcc" => Some(Role::Bcc),
            _ => None,
        }
    }
}

/// Per-user deleted status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletedStatus {
    NotDeleted,
    Deleted,
    DeletedForever,
}

impl DeletedStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            DeletedStatus::NotDeleted => 0,
            DeletedStatus::Deleted => 1,
            DeletedStatus::DeletedForever => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(DeletedStatus::NotDeleted),
            1 => Some(DeletedStatus::Deleted),
            2 => Some(DeletedStatus::DeletedForever),
            _ => None,
        }
    }
}

/// Body content format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    /// Auto-detected legacy format.
    Auto,
    Html,
    Plain,
    Markdown,
}

impl TextFormat {
    pub fn as_i64(self) -> i64 {
        match self {
            TextFormat::Auto => 0,
            TextFormat::Html => 1,
            TextFormat::Plain => 2,
            TextFormat::Markdown => 4,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(TextFormat::Auto),
            1 => Some(TextFormat::Html),
            2 => Some(TextFormat::Plain),
            4 => Some(TextFormat::Markdown),
            _ => None,
        }
    }
}

/// One participant's view of a message: their role plus the mutable
/// per-user state (unread/starred/deleted/labels).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user: User,
    pub role: Role,
    pub unread: bool,
    pub starred: bool,
    pub deleted: DeletedStatus,
    /// IDs of this user's own labels attached to the message.
    pub labels: Vec<LabelId>,
}

/// The message aggregate.
///
/// The per-user maps of the storage layer are folded into a single
/// participant map so that role/unread/starred/deleted/labels always
/// share the same key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub course: CourseId,
    pub subject: String,
    pub content: String,
    pub format: TextFormat,
    pub attachments: i64,
    pub draft: bool,
    pub time: i64,
    pub participants: BTreeMap<UserId, Participant>,
    /// Ancestor messages (reply/forward lineage), newest first.
    pub references: Vec<MessageId>,
}

impl Message {
    /// The sender of the message.
    ///
    /// Panics if the message has no `From` participant. Messages loaded
    /// from storage always have one; rows without it are skipped.
    pub fn sender(&self) -> &Participant {
        self.participants
            .values()
            .find(|p| p.role == Role::From)
            .expect("message has no sender")
    }

    /// Role of a participant, or None if the user does not participate.
    pub fn role(&self, user: UserId) -> Option<Role> {
        self.participants.get(&user).map(|p| p.role)
    }

    /// Whether the user is a to/cc/bcc recipient.
    pub fn has_recipient(&self, user: UserId) -> bool {
        matches!(self.role(user), Some(Role::To) | Some(Role::Cc) | Some(Role::Bcc))
    }

    /// Recipients with one of the given roles, or all recipients if empty.
    pub fn recipients(&self, roles: &[Role]) -> Vec<&Participant> {
        self.participants
            .values()
            .filter(|p| p.role != Role::From && (roles.is_empty() || roles.contains(&p.role)))
            .collect()
    }

    fn recipient_ids(&self, roles: &[Role]) -> Vec<UserId> {
        self.recipients(roles).iter().map(|p| p.user.id).collect()
    }
}

/// Normalizes text for searching: every run of non-alphanumeric
/// characters becomes a single space, leading/trailing runs are dropped.
pub fn normalize_text(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Data for creating and updating messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Sender. Ignored for updates.
    pub sender: UserId,
    /// Reference message (reply/forward lineage). Ignored for updates.
    pub reference: Option<MessageId>,
    pub course: CourseId,
    pub to: Vec<UserId>,
    pub cc: Vec<UserId>,
    pub bcc: Vec<UserId>,
    pub subject: String,
    pub content: String,
    pub format: TextFormat,
    /// Staging area handle for uploaded files; 0 means no staged files.
    pub draftitemid: i64,
    pub time: i64,
}

impl MessageData {
    /// Data for a new empty message.
    pub fn new(sender: UserId, course: CourseId, time: i64) -> Self {
        Self {
            sender,
            reference: None,
            course,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            content: String::new(),
            format: TextFormat::Html,
            draftitemid: 0,
            time,
        }
    }

    /// Data recovered from an existing draft, for editing.
    pub fn draft(message: &Message) -> Self {
        assert!(message.draft, "cannot edit a sent message");

        let mut data = Self::new(message.sender().user.id, message.course, message.time);
        for participant in message.participants.values() {
            match participant.role {
                Role::From => {}
                Role::To => data.to.push(participant.user.id),
                Role::Cc => data.cc.push(participant.user.id),
                Role::Bcc => data.bcc.push(participant.user.id),
            }
        }
        data.subject = message.subject.clone();
        data.content = message.content.clone();
        data.format = message.format;
        data
    }

    /// Data for a reply to a sent message.
    ///
    /// Replying to one's own message addresses the original recipients;
    /// replying to someone else's addresses the sender. With `all`, the
    /// remaining to/cc recipients are copied to CC. BCC recipients are
    /// never copied, and may not reply to all.
    pub fn reply(message: &Message, sender: UserId, all: bool, time: i64) -> Self {
        assert!(!message.draft, "cannot reply to a draft");
        assert!(message.participants.contains_key(&sender), "user does not participate");
        assert!(!all || message.role(sender) != Some(Role::Bcc), "bcc recipient cannot reply to all");

        let mut data = Self::new(sender, message.course, time);
        data.reference = Some(message.id);
        data.subject = prefixed_subject("RE:", &message.subject);

        if message.role(sender) == Some(Role::From) {
            data.to = message.recipient_ids(&[Role::To]);
            if all {
                data.cc = message.recipient_ids(&[Role::Cc]);
            }
        } else {
            data.to = vec![message.sender().user.id];
            if all {
                data.cc = message
                    .recipient_ids(&[Role::To, Role::Cc])
                    .into_iter()
                    .filter(|id| *id != sender)
                    .collect();
            }
        }

        data
    }

    /// Data for forwarding a sent message. Starts with no recipients;
    /// the original content is quoted below a header block.
    pub fn forward(message: &Message, sender: UserId, time: i64) -> Self {
        assert!(!message.draft, "cannot forward a draft");
        assert!(message.participants.contains_key(&sender), "user does not participate");

        let mut data = Self::new(sender, message.course, time);
        data.reference = Some(message.id);
        data.subject = prefixed_subject("FW:", &message.subject);
        data.content = format!(
            "\n--------- Forwarded message ---------\n\
             From: {}\nDate: {}\nSubject: {}\n\n{}",
            message.sender().user.fullname(),
            message.time,
            message.subject,
            message.content,
        );
        data.format = message.format;
        data
    }
}

fn prefixed_subject(prefix: &str, subject: &str) -> String {
    if subject.starts_with(prefix) {
        subject.to_string()
    } else {
        format!("{prefix} {subject}")
    }
}
