//! Lightweight reminders and task list rows.

use super::*;

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderRecord {
    pub id: String,
    pub person_id: String,
    pub title: String,
    pub due_at: Option<String>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub person_id: String,
    pub title: String,
    pub due_at: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl Store {
    pub fn create_reminder(
        &self,
        person_id: &str,
        title: &str,
        due_at: Option<&str>,
    ) -> Result<ReminderRecord> {
        let id = new_entity_id("rem");
        let now = now_rfc3339();
        self.conn().execute(
            "INSERT INTO reminders (id, person_id, title, due_at, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'ACTIVE', ?5, ?5)",
            params![id, person_id, title, due_at, now],
        )?;
        Ok(ReminderRecord {
            id,
            person_id: person_id.to_string(),
            title: title.to_string(),
            due_at: due_at.map(str::to_string),
            status: "ACTIVE".to_string(),
            created_at: now,
        })
    }

    pub fn list_reminders(&self, person_id: &str) -> Result<Vec<ReminderRecord>> {
        let conn = self.conn();
        let mut statement = conn.prepare(
            "SELECT id, person_id, title, due_at, status, created_at
             FROM reminders
             WHERE person_id = ?1 AND status = 'ACTIVE'
             ORDER BY COALESCE(due_at, created_at) ASC",
        )?;
        let rows = statement.query_map(params![person_id], |row| {
            Ok(ReminderRecord {
                id: row.get(0)?,
                person_id: row.get(1)?,
                title: row.get(2)?,
                due_at: row.get(3)?,
                status: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to list reminders")
    }

    pub fn cancel_reminder(&self, person_id: &str, reminder_id: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE reminders SET status = 'CANCELLED', updated_at = ?3
             WHERE id = ?1 AND person_id = ?2 AND status = 'ACTIVE'",
            params![reminder_id, person_id, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn create_task(
        &self,
        person_id: &str,
        title: &str,
        due_at: Option<&str>,
    ) -> Result<TaskRecord> {
        let id = new_entity_id("task");
        let now = now_rfc3339();
        self.conn().execute(
            "INSERT INTO tasks (id, person_id, title, due_at, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'OPEN', ?5, ?5)",
            params![id, person_id, title, due_at, now],
        )?;
        Ok(TaskRecord {
            id,
            person_id: person_id.to_string(),
            title: title.to_string(),
            due_at: due_at.map(str::to_string),
            status: "OPEN".to_string(),
            created_at: now,
        })
    }

    pub fn list_tasks(&self, person_id: &str, include_done: bool) -> Result<Vec<TaskRecord>> {
        let conn = self.conn();
        let sql = if include_done {
            "SELECT id, person_id, title, due_at, status, created_at
             FROM tasks WHERE person_id = ?1
             ORDER BY COALESCE(due_at, created_at) ASC"
        } else {
            "SELECT id, person_id, title, due_at, status, created_at
             FROM tasks WHERE person_id = ?1 AND status = 'OPEN'
             ORDER BY COALESCE(due_at, created_at) ASC"
        };
        let mut statement = conn.prepare(sql)?;
        let rows = statement.query_map(params![person_id], |row| {
            Ok(TaskRecord {
                id: row.get(0)?,
                person_id: row.get(1)?,
                title: row.get(2)?,
                due_at: row.get(3)?,
                status: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to list tasks")
    }

    pub fn complete_task(&self, person_id: &str, task_id: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE tasks SET status = 'DONE', updated_at = ?3
             WHERE id = ?1 AND person_id = ?2 AND status = 'OPEN'",
            params![task_id, person_id, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }
}
