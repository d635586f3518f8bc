//! Recipient search: which users may a given user address in a course.
//!
//! Enrolled users of the course, minus the searcher, minus users who
//! share a role with the searcher (a privacy rule the mailsamerole
//! capability lifts). In separate-groups mode the searcher only sees
//! members of their own groups, unless they may access all groups.

use coursemail_sql::Value;

use crate::model::{CourseId, GroupId, GroupMode, User, UserId};
use crate::service::directory::user_from_row;
use crate::service::search::escape_like;
use crate::service::{Capability, MailError, MailService};

/// Recipient search parameters.
#[derive(Debug, Clone)]
pub struct UserSearch {
    /// The searching user.
    pub user: UserId,
    pub course: CourseId,
    /// Restrict to users enrolled with this role.
    pub roleid: Option<i64>,
    /// Restrict to members of this group.
    pub groupid: Option<GroupId>,
    /// Restrict to users whose full name contains this text.
    pub name: String,
    /// Restrict to these users, e.g. to validate a recipient list.
    pub include: Vec<UserId>,
}

impl UserSearch {
    pub fn new(user: UserId, course: CourseId) -> Self {
        Self {
            user,
            course,
            roleid: None,
            groupid: None,
            name: String::new(),
            include: Vec::new(),
        }
    }
}

impl MailService {
    /// Users the searcher may address, ordered by last name. A `limit`
    /// of 0 applies the configured search limit.
    pub fn search_users(
        &self,
        search: &UserSearch,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<User>, MailError> {
        let Some((conditions, mut params)) = self.user_conditions(search)? else {
            return Ok(Vec::new());
        };
        let limit = if limit == 0 { self.config.user_search_limit } else { limit };
        let sql = format!(
            "SELECT u.id, u.firstname, u.lastname, u.email FROM users u
             WHERE {} ORDER BY u.lastname, u.firstname, u.id LIMIT ? OFFSET ?",
            conditions.join(" AND "),
        );
        params.push(Value::Integer(limit as i64));
        params.push(Value::Integer(offset as i64));
        let rows = self.sql.query(&sql, &params)?;
        rows.iter().map(user_from_row).collect()
    }

    /// Number of users the searcher may address.
    pub fn count_users(&self, search: &UserSearch) -> Result<i64, MailError> {
        let Some((conditions, params)) = self.user_conditions(search)? else {
            return Ok(0);
        };
        let sql = format!(
            "SELECT COUNT(*) AS n FROM users u WHERE {}",
            conditions.join(" AND "),
        );
        let rows = self.sql.query(&sql, &params)?;
        Ok(rows.first().and_then(|r| r.get_i64("n")).unwrap_or(0))
    }

    /// Builds the WHERE clause. None means the result is empty without
    /// touching the database.
    fn user_conditions(
        &self,
        search: &UserSearch,
    ) -> Result<Option<(Vec<String>, Vec<Value>)>, MailError> {
        let course = self.fetch_course(search.course)?;

        let mut conditions = Vec::new();
        let mut params = Vec::new();

        // EXISTS instead of a join: multiple role assignments must not
        // duplicate a user in the result.
        match search.roleid {
            Some(roleid) => {
                conditions.push(
                    "EXISTS (SELECT 1 FROM enrolments e
                     WHERE e.courseid = ? AND e.userid = u.id AND e.roleid = ?)"
                        .to_string(),
                );
                params.push(Value::Integer(search.course.0));
                params.push(Value::Integer(roleid));
            }
            None => {
                conditions.push(
                    "EXISTS (SELECT 1 FROM enrolments e
                     WHERE e.courseid = ? AND e.userid = u.id)"
                        .to_string(),
                );
                params.push(Value::Integer(search.course.0));
            }
        }

        conditions.push("u.id <> ?".to_string());
        params.push(Value::Integer(search.user.0));

        if !self.has_capability(search.user, search.course, Capability::MailSameRole) {
            conditions.push(
                "NOT EXISTS (SELECT 1 FROM enrolments e1 JOIN enrolments e2
                    ON e2.courseid = e1.courseid AND e2.roleid = e1.roleid
                 WHERE e1.courseid = ? AND e1.userid = ? AND e2.userid = u.id)"
                    .to_string(),
            );
            params.push(Value::Integer(search.course.0));
            params.push(Value::Integer(search.user.0));
        }

        let separate = course.groupmode == GroupMode::Separate
            && !self.has_capability(search.user, search.course, Capability::AccessAllGroups);
        if separate {
            let own = self.user_group_ids(search.course, search.user)?;
            if own.is_empty() {
                return Ok(None);
            }
            match search.groupid {
                Some(groupid) if !own.contains(&groupid) => {
                    return Err(MailError::PermissionDenied(format!(
                        "user {} may not see group {}",
                        search.user, groupid
                    )));
                }
                Some(groupid) => {
                    conditions.push(
                        "EXISTS (SELECT 1 FROM group_members gm
                         WHERE gm.userid = u.id AND gm.groupid = ?)"
                            .to_string(),
                    );
                    params.push(Value::Integer(groupid.0));
                }
                None => {
                    let placeholders = vec!["?"; own.len()].join(", ");
                    conditions.push(format!(
                        "EXISTS (SELECT 1 FROM group_members gm
                         WHERE gm.userid = u.id AND gm.groupid IN ({placeholders}))"
                    ));
                    params.extend(own.iter().map(|g| Value::Integer(g.0)));
                }
            }
        } else if let Some(groupid) = search.groupid {
            let rows = self.sql.query(
                "SELECT courseid FROM groups WHERE id = ?",
                &[Value::Integer(groupid.0)],
            )?;
            let courseid = rows.first().and_then(|r| r.get_i64("courseid"));
            if courseid != Some(search.course.0) {
                return Err(MailError::NotFound(format!("group {groupid}")));
            }
            conditions.push(
                "EXISTS (SELECT 1 FROM group_members gm
                 WHERE gm.userid = u.id AND gm.groupid = ?)"
                    .to_string(),
            );
            params.push(Value::Integer(groupid.0));
        }

        if !search.name.is_empty() {
            conditions
                .push("(u.firstname || ' ' || u.lastname) LIKE ? ESCAPE '\\'".to_string());
            params.push(Value::Text(format!("%{}%", escape_like(&search.name))));
        }

        if !search.include.is_empty() {
            let placeholders = vec!["?"; search.include.len()].join(", ");
            conditions.push(format!("u.id IN ({placeholders})"));
            params.extend(search.include.iter().map(|u| Value::Integer(u.0)));
        }

        Ok(Some((conditions, params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{Course, Group};
    use crate::service::testing;

    fn names(users: &[User]) -> Vec<String> {
        users.iter().map(|u| u.fullname()).collect()
    }

    #[test]
    fn lists_enrolled_users_except_self() {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        let outsider = testing::seed_user(&svc, 3);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 5);
        let _ = outsider;

        let search = UserSearch::new(alice, course);
        let users = svc.search_users(&search, 0, 0).unwrap();
        assert_eq!(names(&users), vec!["First2 Last2"]);
        assert_eq!(svc.count_users(&search).unwrap(), 1);
    }

    #[test]
    fn same_role_users_are_hidden_without_the_capability() {
        let (_dir, svc) = testing::strict_service();
        let course = testing::seed_course(&svc, 1);
        let student = testing::seed_user(&svc, 1);
        let peer = testing::seed_user(&svc, 2);
        let teacher = testing::seed_user(&svc, 3);
        testing::enrol(&svc, course, student, 5);
        testing::enrol(&svc, course, peer, 5);
        testing::enrol(&svc, course, teacher, 3);

        let users = svc.search_users(&UserSearch::new(student, course), 0, 0).unwrap();
        assert_eq!(names(&users), vec!["First3 Last3"]);
    }

    #[test]
    fn same_role_users_appear_with_the_capability() {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let student = testing::seed_user(&svc, 1);
        let peer = testing::seed_user(&svc, 2);
        testing::enrol(&svc, course, student, 5);
        testing::enrol(&svc, course, peer, 5);

        let users = svc.search_users(&UserSearch::new(student, course), 0, 0).unwrap();
        assert_eq!(names(&users), vec!["First2 Last2"]);
    }

    #[test]
    fn role_name_and_include_filters() {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        let carol = testing::seed_user(&svc, 3);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 3);
        testing::enrol(&svc, course, carol, 5);

        let mut search = UserSearch::new(alice, course);
        search.roleid = Some(3);
        assert_eq!(names(&svc.search_users(&search, 0, 0).unwrap()), vec!["First2 Last2"]);

        let mut search = UserSearch::new(alice, course);
        search.name = "Last3".into();
        assert_eq!(names(&svc.search_users(&search, 0, 0).unwrap()), vec!["First3 Last3"]);

        let mut search = UserSearch::new(alice, course);
        search.include = vec![carol];
        assert_eq!(names(&svc.search_users(&search, 0, 0).unwrap()), vec!["First3 Last3"]);
    }

    #[test]
    fn duplicate_role_assignments_do_not_duplicate_users() {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 5);
        testing::enrol(&svc, course, bob, 3);

        let search = UserSearch::new(alice, course);
        assert_eq!(svc.count_users(&search).unwrap(), 1);
        assert_eq!(svc.search_users(&search, 0, 0).unwrap().len(), 1);
    }

    fn separate_course(svc: &crate::service::MailService, id: i64) -> CourseId {
        let course = Course {
            id: CourseId(id),
            shortname: format!("C{id}"),
            fullname: format!("Course {id}"),
            visible: true,
            groupmode: GroupMode::Separate,
            defaultgroupingid: 0,
        };
        svc.upsert_course(&course).unwrap();
        course.id
    }

    #[test]
    fn separate_groups_restrict_to_own_groups() {
        let (_dir, svc) = testing::strict_service();
        let course = separate_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        let carol = testing::seed_user(&svc, 3);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 3);
        testing::enrol(&svc, course, carol, 3);

        let team_a = Group { id: GroupId(1), courseid: course, name: "A".into() };
        let team_b = Group { id: GroupId(2), courseid: course, name: "B".into() };
        svc.upsert_group(&team_a).unwrap();
        svc.upsert_group(&team_b).unwrap();
        svc.add_group_member(team_a.id, alice).unwrap();
        svc.add_group_member(team_a.id, bob).unwrap();
        svc.add_group_member(team_b.id, carol).unwrap();

        let search = UserSearch::new(alice, course);
        assert_eq!(names(&svc.search_users(&search, 0, 0).unwrap()), vec!["First2 Last2"]);

        // Asking for a group outside one's own is denied.
        let mut search = UserSearch::new(alice, course);
        search.groupid = Some(team_b.id);
        assert!(matches!(
            svc.search_users(&search, 0, 0),
            Err(MailError::PermissionDenied(_))
        ));
    }

    #[test]
    fn separate_groups_with_no_membership_sees_nobody() {
        let (_dir, svc) = testing::strict_service();
        let course = separate_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 3);

        let search = UserSearch::new(alice, course);
        assert_eq!(svc.count_users(&search).unwrap(), 0);
        assert!(svc.search_users(&search, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn access_all_groups_lifts_the_restriction() {
        let (_dir, svc) = testing::service();
        let course = separate_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 3);

        // AllowAll grants accessallgroups, so no group filter applies.
        let search = UserSearch::new(alice, course);
        assert_eq!(names(&svc.search_users(&search, 0, 0).unwrap()), vec!["First2 Last2"]);
    }

    #[test]
    fn explicit_group_filter_in_visible_mode() {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let alice = testing::seed_user(&svc, 1);
        let bob = testing::seed_user(&svc, 2);
        let carol = testing::seed_user(&svc, 3);
        testing::enrol(&svc, course, alice, 5);
        testing::enrol(&svc, course, bob, 3);
        testing::enrol(&svc, course, carol, 3);

        let group = Group { id: GroupId(1), courseid: course, name: "A".into() };
        svc.upsert_group(&group).unwrap();
        svc.add_group_member(group.id, bob).unwrap();

        let mut search = UserSearch::new(alice, course);
        search.groupid = Some(group.id);
        assert_eq!(names(&svc.search_users(&search, 0, 0).unwrap()), vec!["First2 Last2"]);

        // A group of another course is not found.
        let mut search = UserSearch::new(alice, course);
        search.groupid = Some(GroupId(99));
        assert!(matches!(svc.search_users(&search, 0, 0), Err(MailError::NotFound(_))));
    }

    #[test]
    fn results_are_ordered_by_last_name() {
        let (_dir, svc) = testing::service();
        let course = testing::seed_course(&svc, 1);
        let searcher = testing::seed_user(&svc, 10);
        testing::enrol(&svc, course, searcher, 5);

        for (id, first, last) in [(1, "Zoe", "Adams"), (2, "Amy", "Young"), (3, "Ben", "Adams")] {
            let user = User {
                id: UserId(id),
                firstname: first.into(),
                lastname: last.into(),
                email: format!("u{id}@example.com"),
            };
            svc.upsert_user(&user).unwrap();
            testing::enrol(&svc, course, user.id, 3);
        }

        let users = svc.search_users(&UserSearch::new(searcher, course), 0, 0).unwrap();
        assert_eq!(
            names(&users),
            vec!["Ben Adams", "Zoe Adams", "Amy Young"]
        );
    }

    #[test]
    fn unknown_course_is_not_found() {
        let (_dir, svc) = testing::service();
        let alice = testing::seed_user(&svc, 1);
        let search = UserSearch::new(alice, CourseId(99));
        assert!(matches!(svc.search_users(&search, 0, 0), Err(MailError::NotFound(_))));
    }
}
