use anyhow::Result;
use chrono::DateTime;
use libsql::Connection;

use crate::model::{ItemSeed, Principal, ResearchItem, UpdateItem};

const ITEM_COLUMNS: &str = "id, project_id, text, tags, note, source_url, source_title, created_at";

/// Research items of one store, always scoped to their owner's current project.
pub struct Items<'a> {
    conn: &'a Connection,
}

impl<'a> Items<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, owner: &Principal, seed: ItemSeed) -> Result<ResearchItem> {
        let query = format!(
            r#"
            INSERT INTO research_items (id, user_id, project_id, text, tags, note, source_url, source_title, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {ITEM_COLUMNS}
        "#
        );

        let id = uuid::Uuid::new_v4().to_string();
        let mut rows = self
            .conn
            .query(
                &query,
                libsql::params![
                    id,
                    owner.uid.as_str(),
                    owner.project.as_str(),
                    seed.text,
                    serde_json::to_string(&seed.tags)?,
                    seed.note,
                    seed.source_url,
                    seed.source_title,
                    seed.created_at.timestamp_millis()
                ],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(self.row_to_item(&row)?)
        } else {
            anyhow::bail!("Failed to create research item")
        }
    }

    pub async fn get(&self, owner: &Principal, id: &str) -> Result<Option<ResearchItem>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM research_items WHERE user_id = ? AND project_id = ? AND id = ?"
        );
        let mut rows = self
            .conn
            .query(
                &query,
                libsql::params![owner.uid.as_str(), owner.project.as_str(), id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(self.row_to_item(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Newest first.
    pub async fn list(&self, owner: &Principal, limit: i32, offset: i32) -> Result<Vec<ResearchItem>> {
        let query = format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM research_items
            WHERE user_id = ? AND project_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ? OFFSET ?
        "#
        );

        let mut rows = self
            .conn
            .query(
                &query,
                libsql::params![owner.uid.as_str(), owner.project.as_str(), limit, offset],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(self.row_to_item(&row)?);
        }
        Ok(items)
    }

    /// Case-insensitive match over text, source and tags, newest first.
    pub async fn search(&self, owner: &Principal, q: &str, limit: i32) -> Result<Vec<ResearchItem>> {
        let query = format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM research_items
            WHERE user_id = ? AND project_id = ?
              AND (text LIKE ?3 ESCAPE '\' OR source_title LIKE ?3 ESCAPE '\'
                   OR source_url LIKE ?3 ESCAPE '\' OR tags LIKE ?3 ESCAPE '\')
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
        "#
        );

        let pattern = format!("%{}%", escape_like(q));
        let mut rows = self
            .conn
            .query(
                &query,
                libsql::params![owner.uid.as_str(), owner.project.as_str(), pattern, limit],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(self.row_to_item(&row)?);
        }
        Ok(items)
    }

    pub async fn update(
        &self,
        owner: &Principal,
        id: &str,
        input: UpdateItem,
    ) -> Result<Option<ResearchItem>> {
        if self.get(owner, id).await?.is_none() {
            return Ok(None);
        }

        let mut updates = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(tags) = &input.tags {
            updates.push("tags = ?");
            params.push(serde_json::to_string(tags)?.into());
        }
        if let Some(note) = &input.note {
            updates.push("note = ?");
            params.push(note.clone().into());
        }

        if updates.is_empty() {
            return self.get(owner, id).await;
        }

        updates.push("updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')");
        params.push(owner.uid.clone().into());
        params.push(owner.project.clone().into());
        params.push(id.to_string().into());

        let query = format!(
            "UPDATE research_items SET {} WHERE user_id = ? AND project_id = ? AND id = ?",
            updates.join(", ")
        );

        self.conn.execute(&query, params).await?;
        self.get(owner, id).await
    }

    pub async fn delete(&self, owner: &Principal, id: &str) -> Result<bool> {
        let result = self
            .conn
            .execute(
                "DELETE FROM research_items WHERE user_id = ? AND project_id = ? AND id = ?",
                libsql::params![owner.uid.as_str(), owner.project.as_str(), id],
            )
            .await?;
        Ok(result > 0)
    }

    fn row_to_item(&self, row: &libsql::Row) -> Result<ResearchItem> {
        let tags: String = row.get(3)?;
        let created_at: i64 = row.get(7)?;

        Ok(ResearchItem {
            id: row.get(0)?,
            project_id: row.get(1)?,
            text: row.get(2)?,
            tags: serde_json::from_str(&tags)?,
            note: row.get(4)?,
            source_url: row.get(5)?,
            source_title: row.get(6)?,
            created_at: DateTime::from_timestamp_millis(created_at)
                .ok_or_else(|| anyhow::anyhow!("Invalid created_at: {}", created_at))?,
        })
    }
}

/// Makes `%` and `_` in user input match literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
