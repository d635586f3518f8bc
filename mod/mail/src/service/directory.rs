//! Directory snapshot: read-mostly copies of courses, users, enrolments
//! and groups, seeded by the hosting platform. The mail engine only
//! reads them.

use std::collections::BTreeMap;

use coursemail_sql::{Row, Value};

use crate::model::{Course, CourseId, Group, GroupId, GroupMode, User, UserId};
use crate::service::{Capability, MailError, MailService};

impl MailService {
    // ── Seeding ─────────────────────────────────────────────────────

    pub fn upsert_course(&self, course: &Course) -> Result<(), MailError> {
        self.sql.exec(
            "INSERT INTO courses (id, shortname, fullname, visible, groupmode, defaultgroupingid)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                shortname = excluded.shortname,
                fullname = excluded.fullname,
                visible = excluded.visible,
                groupmode = excluded.groupmode,
                defaultgroupingid = excluded.defaultgroupingid",
            &[
                Value::Integer(course.id.0),
                Value::Text(course.shortname.clone()),
                Value::Text(course.fullname.clone()),
                Value::Integer(course.visible as i64),
                Value::Integer(course.groupmode.as_i64()),
                Value::Integer(course.defaultgroupingid),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_user(&self, user: &User) -> Result<(), MailError> {
        self.sql.exec(
            "INSERT INTO users (id, firstname, lastname, email)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                firstname = excluded.firstname,
                lastname = excluded.lastname,
                email = excluded.email",
            &[
                Value::Integer(user.id.0),
                Value::Text(user.firstname.clone()),
                Value::Text(user.lastname.clone()),
                Value::Text(user.email.clone()),
            ],
        )?;
        Ok(())
    }

    pub fn enrol(&self, course: CourseId, user: UserId, roleid: i64) -> Result<(), MailError> {
        self.sql.exec(
            "INSERT OR IGNORE INTO enrolments (courseid, userid, roleid) VALUES (?, ?, ?)",
            &[
                Value::Integer(course.0),
                Value::Integer(user.0),
                Value::Integer(roleid),
            ],
        )?;
        Ok(())
    }

    /// Removes every role assignment of the user in the course.
    pub fn unenrol(&self, course: CourseId, user: UserId) -> Result<(), MailError> {
        self.sql.exec(
            "DELETE FROM enrolments WHERE courseid = ? AND userid = ?",
            &[Value::Integer(course.0), Value::Integer(user.0)],
        )?;
        Ok(())
    }

    pub fn upsert_group(&self, group: &Group) -> Result<(), MailError> {
        self.sql.exec(
            "INSERT INTO groups (id, courseid, name) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET courseid = excluded.courseid, name = excluded.name",
            &[
                Value::Integer(group.id.0),
                Value::Integer(group.courseid.0),
                Value::Text(group.name.clone()),
            ],
        )?;
        Ok(())
    }

    pub fn add_group_member(&self, group: GroupId, user: UserId) -> Result<(), MailError> {
        self.sql.exec(
            "INSERT OR IGNORE INTO group_members (groupid, userid) VALUES (?, ?)",
            &[Value::Integer(group.0), Value::Integer(user.0)],
        )?;
        Ok(())
    }

    pub fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<(), MailError> {
        self.sql.exec(
            "DELETE FROM group_members WHERE groupid = ? AND userid = ?",
            &[Value::Integer(group.0), Value::Integer(user.0)],
        )?;
        Ok(())
    }

    pub fn grant_capability(
        &self,
        user: UserId,
        course: CourseId,
        capability: Capability,
    ) -> Result<(), MailError> {
        self.sql.exec(
            "INSERT OR IGNORE INTO capability_grants (userid, courseid, capability)
             VALUES (?, ?, ?)",
            &[
                Value::Integer(user.0),
                Value::Integer(course.0),
                Value::Text(capability.as_str().to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn revoke_capability(
        &self,
        user: UserId,
        course: CourseId,
        capability: Capability,
    ) -> Result<(), MailError> {
        self.sql.exec(
            "DELETE FROM capability_grants WHERE userid = ? AND courseid = ? AND capability = ?",
            &[
                Value::Integer(user.0),
                Value::Integer(course.0),
                Value::Text(capability.as_str().to_string()),
            ],
        )?;
        Ok(())
    }

    // ── Fetching ────────────────────────────────────────────────────

    pub fn fetch_course(&self, id: CourseId) -> Result<Course, MailError> {
        let rows = self.sql.query(
            "SELECT id, shortname, fullname, visible, groupmode, defaultgroupingid
             FROM courses WHERE id = ?",
            &[Value::Integer(id.0)],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| MailError::NotFound(format!("course {id}")))?;
        course_from_row(row)
    }

    pub fn fetch_user(&self, id: UserId) -> Result<User, MailError> {
        let rows = self.sql.query(
            "SELECT id, firstname, lastname, email FROM users WHERE id = ?",
            &[Value::Integer(id.0)],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| MailError::NotFound(format!("user {id}")))?;
        user_from_row(row)
    }

    /// Courses the user is enrolled in and allowed to use mail in.
    pub fn fetch_courses(&self, user: UserId) -> Result<Vec<Course>, MailError> {
        let rows = self.sql.query(
            "SELECT c.id, c.shortname, c.fullname, c.visible, c.groupmode, c.defaultgroupingid
             FROM courses c
             WHERE EXISTS (SELECT 1 FROM enrolments e WHERE e.courseid = c.id AND e.userid = ?)
             ORDER BY c.fullname, c.id",
            &[Value::Integer(user.0)],
        )?;
        let mut courses = Vec::new();
        for row in &rows {
            let course = course_from_row(row)?;
            if course.visible
                || self.has_capability(user, course.id, Capability::ViewHiddenCourses)
            {
                courses.push(course);
            }
        }
        Ok(courses)
    }

    /// IDs of the courses returned by [`fetch_courses`](Self::fetch_courses).
    pub(crate) fn visible_course_ids(&self, user: UserId) -> Result<Vec<CourseId>, MailError> {
        Ok(self.fetch_courses(user)?.into_iter().map(|c| c.id).collect())
    }

    pub(crate) fn is_enrolled(&self, course: CourseId, user: UserId) -> Result<bool, MailError> {
        let rows = self.sql.query(
            "SELECT 1 AS found FROM enrolments WHERE courseid = ? AND userid = ? LIMIT 1",
            &[Value::Integer(course.0), Value::Integer(user.0)],
        )?;
        Ok(!rows.is_empty())
    }

    /// Whether the user may use mail in the course: enrolled, and the
    /// course is visible or the user may view hidden courses.
    pub fn can_use_mail(&self, user: UserId, course: &Course) -> Result<bool, MailError> {
        Ok(self.is_enrolled(course.id, user)?
            && (course.visible
                || self.has_capability(user, course.id, Capability::ViewHiddenCourses)))
    }

    pub(crate) fn user_group_ids(
        &self,
        course: CourseId,
        user: UserId,
    ) -> Result<Vec<GroupId>, MailError> {
        let rows = self.sql.query(
            "SELECT gm.groupid FROM group_members gm
             JOIN groups g ON g.id = gm.groupid
             WHERE g.courseid = ? AND gm.userid = ?
             ORDER BY gm.groupid",
            &[Value::Integer(course.0), Value::Integer(user.0)],
        )?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get_i64("groupid"))
            .map(GroupId)
            .collect())
    }

    pub(crate) fn fetch_users_map(
        &self,
        ids: &[UserId],
    ) -> Result<BTreeMap<UserId, User>, MailError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let params: Vec<Value> = ids.iter().map(|id| Value::Integer(id.0)).collect();
        let rows = self.sql.query(
            &format!(
                "SELECT id, firstname, lastname, email FROM users WHERE id IN ({placeholders})"
            ),
            &params,
        )?;
        let mut users = BTreeMap::new();
        for row in &rows {
            let user = user_from_row(row)?;
            users.insert(user.id, user);
        }
        Ok(users)
    }
}

pub(crate) fn course_from_row(row: &Row) -> Result<Course, MailError> {
    let groupmode = row
        .get_i64("groupmode")
        .and_then(GroupMode::from_i64)
        .ok_or_else(|| MailError::Internal("invalid course groupmode".into()))?;
    Ok(Course {
        id: CourseId(row.get_i64("id").unwrap_or(0)),
        shortname: row.get_str("shortname").unwrap_or_default().to_string(),
        fullname: row.get_str("fullname").unwrap_or_default().to_string(),
        visible: row.get_i64("visible").unwrap_or(0) != 0,
        groupmode,
        defaultgroupingid: row.get_i64("defaultgroupingid").unwrap_or(0),
    })
}

pub(crate) fn user_from_row(row: &Row) -> Result<User, MailError> {
    Ok(User {
        id: UserId(row.get_i64("id").unwrap_or(0)),
        firstname: row.get_str("firstname").unwrap_or_default().to_string(),
        lastname: row.get_str("lastname").unwrap_or_default().to_string(),
        email: row.get_str("email").unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::service::testing;

    #[test]
    fn course_round_trip() {
        let (_dir, svc) = testing::service();
        let id = testing::seed_course(&svc, 1);
        let mut course = svc.fetch_course(id).unwrap();
        assert_eq!(course.shortname, "C1");
        assert_eq!(course.defaultgroupingid, 0);

        course.defaultgroupingid = 5;
        svc.upsert_course(&course).unwrap();
        assert_eq!(svc.fetch_course(id).unwrap(), course);

        assert!(matches!(svc.fetch_course(CourseId(99)), Err(MailError::NotFound(_))));
    }

    #[test]
    fn fetch_courses_returns_only_enrolled() {
        let (_dir, svc) = testing::service();
        let c1 = testing::seed_course(&svc, 1);
        testing::seed_course(&svc, 2);
        let user = testing::seed_user(&svc, 1);
        testing::enrol(&svc, c1, user, 5);

        let courses = svc.fetch_courses(user).unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, c1);
    }

    #[test]
    fn hidden_courses_need_a_capability() {
        let (_dir, svc) = testing::strict_service();
        let user = testing::seed_user(&svc, 1);
        let course = Course {
            id: CourseId(7),
            shortname: "H".into(),
            fullname: "Hidden".into(),
            visible: false,
            groupmode: GroupMode::None,
            defaultgroupingid: 0,
        };
        svc.upsert_course(&course).unwrap();
        testing::enrol(&svc, course.id, user, 5);

        assert!(svc.fetch_courses(user).unwrap().is_empty());
        assert!(!svc.can_use_mail(user, &course).unwrap());
    }

    #[test]
    fn group_membership() {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let user = testing::seed_user(&svc, 1);
        let group = Group {
            id: GroupId(3),
            courseid: course,
            name: "Team A".into(),
        };
        svc.upsert_group(&group).unwrap();
        svc.add_group_member(group.id, user).unwrap();

        assert_eq!(svc.user_group_ids(course, user).unwrap(), vec![GroupId(3)]);
        svc.remove_group_member(group.id, user).unwrap();
        assert!(svc.user_group_ids(course, user).unwrap().is_empty());
    }
}
