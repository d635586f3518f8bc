use std::collections::BTreeMap;

use coursemail_sql::{Row, Statement, Value};

use crate::model::{normalized_name, Color, Label, LabelId, UserId};
use crate::service::{MailError, MailService};

impl MailService {
    /// Create a label for a user.
    ///
    /// The name is normalized (whitespace collapsed, trimmed) and must be
    /// non-empty and unique among the user's labels.
    pub fn create_label(
        &self,
        user: UserId,
        name: &str,
        color: Color,
    ) -> Result<Label, MailError> {
        let name = self.validate_label_name(user, name, None)?;

        let id = self.sql.insert(
            "INSERT INTO labels (userid, name, color) VALUES (?, ?, ?)",
            &[
                Value::Integer(user.0),
                Value::Text(name.clone()),
                Value::Text(color.as_str().to_string()),
            ],
        )?;

        Ok(Label {
            id: LabelId(id),
            userid: user,
            name,
            color,
        })
    }

    /// Update the name and color of a label owned by the user.
    pub fn update_label(
        &self,
        user: UserId,
        id: LabelId,
        name: &str,
        color: Color,
    ) -> Result<Label, MailError> {
        let label = self.fetch_label(user, id)?;
        let name = self.validate_label_name(user, name, Some(id))?;

        self.sql.exec(
            "UPDATE labels SET name = ?, color = ? WHERE id = ?",
            &[
                Value::Text(name.clone()),
                Value::Text(color.as_str().to_string()),
                Value::Integer(id.0),
            ],
        )?;

        Ok(Label { name, color, ..label })
    }

    /// Delete a label and its message associations. Messages themselves
    /// are left intact.
    pub fn delete_label(&self, user: UserId, id: LabelId) -> Result<(), MailError> {
        self.fetch_label(user, id)?;

        self.sql.exec_batch(&[
            Statement::new("DELETE FROM labels WHERE id = ?", vec![Value::Integer(id.0)]),
            Statement::new(
                "DELETE FROM message_labels WHERE labelid = ?",
                vec![Value::Integer(id.0)],
            ),
        ])?;

        Ok(())
    }

    /// Fetch a label owned by the user. Labels of other users are
    /// reported as not found.
    pub fn fetch_label(&self, user: UserId, id: LabelId) -> Result<Label, MailError> {
        let rows = self.sql.query(
            "SELECT id, userid, name, color FROM labels WHERE id = ? AND userid = ?",
            &[Value::Integer(id.0), Value::Integer(user.0)],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| MailError::NotFound(format!("label {id}")))?;
        label_from_row(row)
    }

    /// All labels of a user, ordered by name.
    pub fn fetch_labels(&self, user: UserId) -> Result<Vec<Label>, MailError> {
        let rows = self.sql.query(
            "SELECT id, userid, name, color FROM labels WHERE userid = ? ORDER BY name, id",
            &[Value::Integer(user.0)],
        )?;
        rows.iter().map(label_from_row).collect()
    }

    pub(crate) fn fetch_labels_map(
        &self,
        ids: &[LabelId],
    ) -> Result<BTreeMap<LabelId, Label>, MailError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let params: Vec<Value> = ids.iter().map(|id| Value::Integer(id.0)).collect();
        let rows = self.sql.query(
            &format!("SELECT id, userid, name, color FROM labels WHERE id IN ({placeholders})"),
            &params,
        )?;
        let mut labels = BTreeMap::new();
        for row in &rows {
            let label = label_from_row(row)?;
            labels.insert(label.id, label);
        }
        Ok(labels)
    }

    fn validate_label_name(
        &self,
        user: UserId,
        name: &str,
        exclude: Option<LabelId>,
    ) -> Result<String, MailError> {
        let name = normalized_name(name);
        if name.is_empty() {
            return Err(MailError::Validation("empty label name".into()));
        }
        for label in self.fetch_labels(user)? {
            if label.name == name && Some(label.id) != exclude {
                return Err(MailError::Validation(format!("duplicate label name: {name}")));
            }
        }
        Ok(name)
    }
}

fn label_from_row(row: &Row) -> Result<Label, MailError> {
    let color = Color::from_str(row.get_str("color").unwrap_or_default())
        .ok_or_else(|| MailError::Internal("invalid label color".into()))?;
    Ok(Label {
        id: LabelId(row.get_i64("id").unwrap_or(0)),
        userid: UserId(row.get_i64("userid").unwrap_or(0)),
        name: row.get_str("name").unwrap_or_default().to_string(),
        color,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::service::testing;

    #[test]
    fn create_normalizes_name() {
        let (_dir, svc) = testing::service();
        let user = testing::seed_user(&svc, 1);

        let label = svc.create_label(user, "  My   label ", Color::Teal).unwrap();
        assert_eq!(label.name, "My label");
        assert_eq!(label.color, Color::Teal);
    }

    #[test]
    fn create_rejects_empty_name() {
        let (_dir, svc) = testing::service();
        let user = testing::seed_user(&svc, 1);

        let err = svc.create_label(user, "   ", Color::None).unwrap_err();
        assert!(matches!(err, MailError::Validation(_)));
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let (_dir, svc) = testing::service();
        let user = testing::seed_user(&svc, 1);

        svc.create_label(user, "Work", Color::None).unwrap();
        let err = svc.create_label(user, "  Work ", Color::Blue).unwrap_err();
        assert!(matches!(err, MailError::Validation(_)));

        // A different user may reuse the name.
        let other = testing::seed_user(&svc, 2);
        svc.create_label(other, "Work", Color::None).unwrap();
    }

    #[test]
    fn update_keeps_own_name() {
        let (_dir, svc) = testing::service();
        let user = testing::seed_user(&svc, 1);

        let label = svc.create_label(user, "Work", Color::None).unwrap();
        let updated = svc.update_label(user, label.id, "Work", Color::Red).unwrap();
        assert_eq!(updated.name, "Work");
        assert_eq!(updated.color, Color::Red);
    }

    #[test]
    fn other_users_labels_are_not_found() {
        let (_dir, svc) = testing::service();
        let user = testing::seed_user(&svc, 1);
        let other = testing::seed_user(&svc, 2);

        let label = svc.create_label(user, "Work", Color::None).unwrap();
        assert!(matches!(svc.fetch_label(other, label.id), Err(MailError::NotFound(_))));
        assert!(matches!(
            svc.delete_label(other, label.id),
            Err(MailError::NotFound(_))
        ));
    }

    #[test]
    fn fetch_labels_is_ordered_by_name() {
        let (_dir, svc) = testing::service();
        let user = testing::seed_user(&svc, 1);

        svc.create_label(user, "Work", Color::None).unwrap();
        svc.create_label(user, "Family", Color::None).unwrap();
        let names: Vec<String> = svc
            .fetch_labels(user)
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["Family", "Work"]);
    }
}
